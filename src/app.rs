use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use coursesync::api::{Fetcher, HttpTransport};
use coursesync::cache::{
  CacheResult, CacheSource, RefreshController, RefreshOutcome, Store, StoredRecord,
};
use coursesync::lms::{GetModules, ModuleItem, ModuleItemContent, ModuleState, COMPLETION_PENDING};
use coursesync::Session;
use tracing::info;
use url::Url;

use crate::config::Config;
use crate::Command;

/// Command runner over one session
pub struct App {
  session: Session,
}

impl App {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    let transport =
      HttpTransport::new(token, config.timeout())?.with_max_retries(config.api.max_retries);

    let base = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid api.url {}: {}", config.api.url, e))?;
    let fetcher = Fetcher::new(Arc::new(transport), base).with_per_page(config.api.per_page);

    let path = config.cache_path()?;
    let store = Store::open(&path)?;
    info!(path = %path.display(), "cache opened");

    let controller = RefreshController::new(store, fetcher).with_ttl(config.ttl());
    Ok(Self {
      session: Session::with_controller(controller),
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Modules { course, force } => self.modules(&course, force).await,
      Command::Item {
        course,
        module,
        item,
        force,
      } => {
        let result = self.session.course(&course).item(&module, &item, force).await?;
        print_source(&result);
        print_items(&result.data);
        Ok(())
      }
      Command::Done {
        course,
        module,
        item,
      } => {
        self.session.course(&course).mark_item_done(&module, &item).await?;
        println!("Marked {} done.", item);
        if self.session.review().should_prompt() {
          self.session.review().mark_prompted();
          println!("Enjoying coursesync? Consider leaving a review.");
        }
        Ok(())
      }
      Command::Status { key } => self.status(&key),
      Command::Invalidate { key, prefix, all } => self.invalidate(key, prefix, all),
      Command::Watch {
        course,
        module,
        interval,
      } => self.watch(&course, &module, Duration::from_secs(interval)).await,
      Command::Logout => {
        let report = self.session.logout()?;
        println!(
          "Removed {} records and {} refresh stamps.",
          report.records, report.refresh_stamps
        );
        Ok(())
      }
    }
  }

  async fn modules(&self, course_id: &str, force: bool) -> Result<()> {
    let course = self.session.course(course_id);
    let result = course.modules(force).await?;
    print_source(&result);

    if result.data.is_empty() {
      println!("No modules.");
    }
    for module in &result.data {
      let state = match &module.data.state {
        Some(ModuleState::Completed) => " [completed]",
        Some(ModuleState::Locked) => " [locked]",
        Some(ModuleState::Started) => " [started]",
        _ => "",
      };
      println!("{} {}{}", module.data.id, module.data.name, state);
      print_items(&course.items(&module.data.id)?);
    }
    Ok(())
  }

  fn status(&self, key: &str) -> Result<()> {
    let status = self.session.controller().status(key)?;
    match status.last_refresh {
      None => println!("{}: never refreshed", key),
      Some(at) => println!(
        "{}: refreshed {} ({})",
        key,
        at.to_rfc3339(),
        if status.stale { "stale" } else { "fresh" }
      ),
    }
    Ok(())
  }

  fn invalidate(&self, key: Option<String>, prefix: bool, all: bool) -> Result<()> {
    let controller = self.session.controller();
    let removed = match (key, prefix, all) {
      (_, _, true) => controller.invalidate_all()?,
      (Some(key), true, false) => controller.invalidate_prefix(&key)?,
      (Some(key), false, false) => usize::from(controller.invalidate(&key)?),
      (None, _, false) => return Err(eyre!("Pass a cache key or --all")),
    };
    println!("Invalidated {} cache keys.", removed);
    Ok(())
  }

  async fn watch(&self, course_id: &str, module_id: &str, interval: Duration) -> Result<()> {
    let course = self.session.course(course_id);
    let _handle = course.watch_items(module_id, |items| {
      println!("--- module changed ---");
      print_items(&items);
    })?;

    let mut ticker = tokio::time::interval(interval);
    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        _ = ticker.tick() => {
          let request = GetModules::new(course_id);
          let refresh = self.session.controller().refresh(&request, true);
          match refresh.await {
            Ok(RefreshOutcome::Fetched(report)) if report.changed() => {
              info!(course_id, "course changed");
            }
            Ok(_) => {}
            Err(e) => eprintln!("Refresh failed: {}", e),
          }
        }
      }
    }
    Ok(())
  }
}

fn print_source<T>(result: &CacheResult<T>) {
  match (&result.source, &result.error) {
    (CacheSource::Offline, Some(error)) => eprintln!("(offline: {}; showing cached data)", error),
    (source, _) => eprintln!("({})", source),
  }
}

fn print_items(items: &[StoredRecord<ModuleItem>]) {
  for item in items {
    let indent = "  ".repeat(item.data.indent as usize + 1);
    let marker = match &item.data.content {
      ModuleItemContent::MasteryPath {
        assignment_set_ids, ..
      } => format!("choose a path ({} options)", assignment_set_ids.len()),
      ModuleItemContent::SubHeader => "--".to_string(),
      content => {
        let done = item
          .data
          .completion_requirement
          .as_ref()
          .map(|r| if r.completed { "[x] " } else { "[ ] " })
          .unwrap_or("");
        let pending = if item.local_flag(COMPLETION_PENDING) {
          " (pending)"
        } else {
          ""
        };
        format!("{}{}{}", done, kind_name(content), pending)
      }
    };
    println!("{}{} {}", indent, item.data.title, marker);
  }
}

fn kind_name(content: &ModuleItemContent) -> &'static str {
  match content {
    ModuleItemContent::File { .. } => "file",
    ModuleItemContent::Page { .. } => "page",
    ModuleItemContent::Discussion { .. } => "discussion",
    ModuleItemContent::Assignment { .. } => "assignment",
    ModuleItemContent::Quiz { .. } => "quiz",
    ModuleItemContent::SubHeader => "header",
    ModuleItemContent::ExternalUrl { .. } => "link",
    ModuleItemContent::ExternalTool { .. } => "tool",
    ModuleItemContent::MasteryPath { .. } => "mastery path",
    ModuleItemContent::Unknown { .. } => "other",
  }
}

//! Remote fetching: transport abstraction, pagination and typed decoding.

mod fetcher;
mod transport;

pub use fetcher::{parse_next_link, Fetcher, Page};
pub use transport::{HttpTransport, Method, RawResponse, Request, Transport};

//! Network collaborators
//!
//! - Fetch: `.torrent` descriptor downloads over HTTP(S)

pub mod fetch;

pub use fetch::{save_descriptor, DescriptorFetcher, FetchError, HttpFetcher};

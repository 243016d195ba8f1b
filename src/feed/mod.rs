//! Feed sources, fetching and parsing.
//!
//! - [`sources`] - Feed source and category model, JSON source list loading
//! - [`fetcher`] - HTTP retrieval with retry, timeout and size limits
//! - [`parser`] - RSS/Atom/JSON Feed parsing using the `feed-rs` crate
//!
//! A fetch failure is always scoped to one source: [`FeedFetcher::fetch`]
//! returns a [`FetchError`] naming the source, and callers continue with the
//! next one.

mod fetcher;
mod parser;
mod sources;

pub use fetcher::{
    FeedFetcher, FetchError, FetchErrorKind, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_FEED_BYTES,
};
pub use parser::{parse_feed, FeedEntry, ParseFeedError};
pub use sources::{load_source_list, FeedCategory, FeedSource, SourceListError};

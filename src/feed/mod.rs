//! Feed ingestion: everything between a category key and a ranked list of
//! articles.
//!
//! - [`registry`] - Category to endpoint mapping (built-in, config or OPML)
//! - [`fetcher`] - HTTP retrieval behind the [`FeedSource`] trait
//! - [`parser`] - RSS/Atom/JSON Feed parsing via `feed-rs`
//! - [`normalize`] - Conversion into canonical [`Article`]s, image extraction
//! - [`rank`] - Deduplication, ordering and truncation
//! - [`opml`] - OPML subscription import with folder categories

pub mod fetcher;
pub mod normalize;
pub mod opml;
pub mod parser;
pub mod rank;
pub mod registry;
mod types;

pub use fetcher::{build_http_client, FeedSource, FetchError, FetchResult, HttpFeedSource};
pub use normalize::{default_placeholders, normalize};
pub use rank::rank;
pub use registry::{normalize_key, Registry, ALL_KEY};
pub use types::{Article, Enclosure, FeedEndpoint, ParsedFeed, RawEntry};

//! inkfeed: merges syndication feeds per category, ranks and summarizes
//! them, and serves the result from a stale-while-revalidate cache over HTTP.

pub mod api;
pub mod cache;
pub mod config;
pub mod feed;
pub mod pipeline;
pub mod summary;
pub mod util;

//! Article enrichment with machine-generated summaries.
//!
//! - [`client`] - The [`Summarizer`] trait and its OpenAI-compatible client
//! - [`prompt`] - Bounded prompt construction
//! - [`batcher`] - Rate-limited batch scheduling with deterministic fallbacks

pub mod batcher;
pub mod client;
pub mod prompt;

pub use batcher::{fallback_summary, BatchConfig, SummaryBatcher, UNAVAILABLE_SUMMARY};
pub use client::{DisabledSummarizer, OpenAiSummarizer, SummarizationError, Summarizer};
pub use prompt::build_prompt;

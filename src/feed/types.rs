use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

// ============================================================================
// Endpoints
// ============================================================================

/// A single remote syndication source.
///
/// Endpoints are defined by configuration (the registry) and never mutated.
/// Ad hoc endpoints supplied through the custom-feed API live only for the
/// duration of that request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedEndpoint {
    pub url: String,
    pub category: Option<String>,
}

impl FeedEndpoint {
    pub fn new(url: impl Into<String>, category: Option<&str>) -> Self {
        Self {
            url: url.into(),
            category: category.map(str::to_string),
        }
    }

    /// Endpoint without a category, as used by the ad hoc custom-feed path.
    pub fn uncategorized(url: impl Into<String>) -> Self {
        Self::new(url, None)
    }
}

// ============================================================================
// Raw (provider-shaped) entries
// ============================================================================

/// An enclosure attached to a feed item (RSS `<enclosure>`, Atom `rel="enclosure"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
}

impl Enclosure {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// Provider-specific record produced by parsing one feed.
///
/// Every field is optional because RSS, Atom and JSON Feed disagree on what
/// is mandatory; the normalizer decides how gaps are filled.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    /// Zero-based index of this item within its feed document.
    pub position: usize,
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Plain-text summary, when the feed carries one
    pub snippet: Option<String>,
    /// Full HTML body (`content:encoded`, Atom `<content>`)
    pub content_html: Option<String>,
    /// HTML description/summary
    pub summary_html: Option<String>,
    /// Explicitly designated image (`media:thumbnail`, `itunes:image`)
    pub image: Option<String>,
    pub enclosures: Vec<Enclosure>,
    /// Inline media references (`media:content` without an image MIME type)
    pub media: Vec<String>,
}

/// Result of parsing one feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    /// Channel/feed title, used as the article source name
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

// ============================================================================
// Canonical article
// ============================================================================

/// The canonical, deduplicated unit of content.
///
/// Created by the normalizer; only `summary` is filled in afterwards (by the
/// summarization batcher). Serialized with the public JSON shape:
/// `{ title, link, publishedAt, sourceName, summary, image }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    #[serde(skip)]
    pub snippet: String,
    #[serde(serialize_with = "summary_or_empty")]
    pub summary: Option<String>,
    pub image: String,
}

impl Article {
    /// Returns the deduplication key `(link, title)`.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.link, &self.title)
    }
}

fn summary_or_empty<S: Serializer>(summary: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(summary.as_deref().unwrap_or_default())
}

//! Conversion of provider-shaped entries into canonical articles.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use super::types::{Article, Enclosure, RawEntry};
use crate::util::{collapse_whitespace, html_to_text, is_absolute_http_url, strip_control_chars, truncate_chars};

/// Title used when an entry carries none.
pub const UNTITLED: &str = "Untitled";

/// Maximum snippet length in characters.
pub const MAX_SNIPPET_CHARS: usize = 500;

/// Placeholder images used when no configuration overrides them.
pub const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "https://images.unsplash.com/photo-1504711434969-e33886168f5c?w=1200&q=80",
    "https://images.unsplash.com/photo-1495020689067-958852a7765e?w=1200&q=80",
    "https://images.unsplash.com/photo-1585829365295-ab7cd400c167?w=1200&q=80",
];

/// A single image-extraction strategy.
pub type ImageStrategy = fn(&RawEntry) -> Option<String>;

/// Content-derived strategies, tried in order before the placeholder.
pub const IMAGE_STRATEGIES: &[ImageStrategy] = &[
    explicit_image,
    enclosure_image,
    inline_media_image,
    html_image,
];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif"];

/// Converts one parsed entry into an [`Article`].
///
/// Never fails: every missing field has a defined default. `summary` is left
/// `None` for the batcher to fill.
pub fn normalize(entry: RawEntry, source_name: &str, placeholders: &[String]) -> Article {
    let title = entry
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let link = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .or_else(|| {
            entry
                .guid
                .as_deref()
                .map(str::trim)
                .filter(|g| is_absolute_http_url(g))
                .map(str::to_string)
        })
        .unwrap_or_default();

    let snippet = snippet_for(&entry);

    let image = IMAGE_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(&entry))
        .or_else(|| placeholder_for(source_name, entry.position, placeholders))
        .unwrap_or_default();

    Article {
        title,
        link,
        published_at: entry.published,
        source_name: clean_text(source_name),
        snippet,
        summary: None,
        image,
    }
}

fn clean_text(raw: &str) -> String {
    collapse_whitespace(&strip_control_chars(raw))
}

/// Plain snippet, else the stripped summary HTML, else the stripped body.
fn snippet_for(entry: &RawEntry) -> String {
    let text = entry
        .snippet
        .as_deref()
        .map(clean_text)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            [&entry.summary_html, &entry.content_html]
                .into_iter()
                .flatten()
                .map(|html| html_to_text(html))
                .find(|s| !s.is_empty())
        })
        .unwrap_or_default();

    truncate_chars(&text, MAX_SNIPPET_CHARS).into_owned()
}

fn accept(candidate: &str) -> Option<String> {
    let candidate = html_escape::decode_html_entities(candidate.trim());
    is_absolute_http_url(&candidate).then(|| candidate.into_owned())
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Strategy 1: the feed's designated image (`media:thumbnail`, `itunes:image`).
pub fn explicit_image(entry: &RawEntry) -> Option<String> {
    entry.image.as_deref().and_then(accept)
}

/// Strategy 2: an enclosure, preferring ones that look like images.
pub fn enclosure_image(entry: &RawEntry) -> Option<String> {
    let looks_like_image = |e: &&Enclosure| e.is_image() || has_image_extension(&e.url);

    entry
        .enclosures
        .iter()
        .filter(looks_like_image)
        .chain(entry.enclosures.iter())
        .find_map(|e| accept(&e.url))
}

/// Strategy 3: inline media references.
pub fn inline_media_image(entry: &RawEntry) -> Option<String> {
    entry.media.iter().find_map(|m| accept(m))
}

fn img_src_regex() -> &'static Regex {
    static RE_IMG: OnceLock<Regex> = OnceLock::new();
    RE_IMG.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
    })
}

/// Strategy 4: the first `<img src>` in the body, then in the summary.
pub fn html_image(entry: &RawEntry) -> Option<String> {
    [&entry.content_html, &entry.summary_html]
        .into_iter()
        .flatten()
        .flat_map(|html| img_src_regex().captures_iter(html))
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .find_map(|m| accept(m.as_str()))
}

/// Strategy 5: a placeholder picked by a stable hash of source and position.
///
/// Returns `None` only when the placeholder list is empty.
pub fn placeholder_for(source_name: &str, position: usize, placeholders: &[String]) -> Option<String> {
    if placeholders.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update((position as u64).to_be_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let index = (u64::from_be_bytes(head) % placeholders.len() as u64) as usize;
    placeholders.get(index).cloned()
}

/// The default placeholder list as owned strings.
pub fn default_placeholders() -> Vec<String> {
    DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect()
}

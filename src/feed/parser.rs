use anyhow::Result;
use feed_rs::model::{Entry, Link};
use feed_rs::parser;

use super::types::{Enclosure, ParsedFeed, RawEntry};

/// Parses an RSS, Atom or JSON Feed document into provider-shaped entries.
///
/// No normalization happens here beyond flattening the `feed-rs` model:
/// missing fields stay `None` so the normalizer can apply its own policy.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());

    let entries = feed
        .entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| raw_entry(position, entry))
        .collect();

    Ok(ParsedFeed { title, entries })
}

fn raw_entry(position: usize, entry: Entry) -> RawEntry {
    let link = primary_link(&entry.links).map(|l| l.href.clone());
    let guid = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());
    let published = entry.published.or(entry.updated);

    // feed-rs reports RSS descriptions as HTML and Atom summaries with their
    // declared type; only a text/plain summary counts as a ready-made snippet.
    let (snippet, summary_html) = match entry.summary {
        Some(text) if text.content_type.to_string().starts_with("text/plain") => {
            (Some(text.content), None)
        }
        Some(text) => (None, Some(text.content)),
        None => (None, None),
    };
    let content_html = entry.content.and_then(|c| c.body);

    let mut image = None;
    let mut enclosures: Vec<Enclosure> = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| Enclosure {
            url: l.href.clone(),
            mime_type: l.media_type.clone(),
        })
        .collect();
    let mut media = Vec::new();

    for object in &entry.media {
        if image.is_none() {
            image = object.thumbnails.first().map(|t| t.image.uri.clone());
        }
        for content in &object.content {
            let Some(url) = content.url.as_ref() else {
                continue;
            };
            match &content.content_type {
                Some(mime) => enclosures.push(Enclosure {
                    url: url.to_string(),
                    mime_type: Some(mime.to_string()),
                }),
                None => media.push(url.to_string()),
            }
        }
    }

    RawEntry {
        position,
        title: entry.title.map(|t| t.content),
        link,
        guid,
        published,
        snippet,
        content_html,
        summary_html,
        image,
        enclosures,
        media,
    }
}

/// Picks the article link: the first `alternate` (or untyped) link, falling
/// back to the first link that is not an enclosure.
fn primary_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| {
            links
                .iter()
                .find(|l| l.rel.as_deref() != Some("enclosure"))
        })
}

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::registry::normalize_key;
use super::types::FeedEndpoint;
use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack exhaustion from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Category assigned to feeds that are not inside any folder outline.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),
}

/// Reads an OPML subscription list and returns its feeds as registry endpoints.
///
/// Folder outlines (those without `xmlUrl`) name the category of the feeds
/// nested inside them; the innermost folder wins. A `category` attribute on
/// the feed outline itself takes precedence over folders. Feeds outside any
/// folder land in [`UNCATEGORIZED`].
///
/// # Security
///
/// - XXE is mitigated because `quick-xml` (0.37) does not expand `<!ENTITY>`
///   declarations; custom entities fail to decode.
/// - Feed URLs are validated like caller-supplied URLs; invalid ones are
///   skipped with a warning.
pub async fn load(path: &std::path::Path) -> Result<Vec<FeedEndpoint>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OPML file: {}", path.display()))?;
    parse_opml_content(&content)
}

/// Parses OPML content into categorized endpoints.
pub fn parse_opml_content(content: &str) -> Result<Vec<FeedEndpoint>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut endpoints = Vec::new();
    let mut buf = Vec::new();
    // One slot per open <outline>: Some(name) for folders, None for feed outlines with children
    let mut folders: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if folders.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH).into());
                }
                let outline = parse_outline(&e, &reader)?;
                match outline.xml_url {
                    Some(_) => {
                        push_endpoint(&mut endpoints, outline, &folders);
                        folders.push(None);
                    }
                    None => folders.push(outline.label),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = parse_outline(&e, &reader)?;
                if outline.xml_url.is_some() {
                    push_endpoint(&mut endpoints, outline, &folders);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                folders.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string()).into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(endpoints)
}

struct Outline {
    xml_url: Option<String>,
    label: Option<String>,
    category: Option<String>,
}

fn parse_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline> {
    let mut outline = Outline {
        xml_url: None,
        label: None,
        category: None,
    };

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let decoder = reader.decoder();
        let value = || -> Result<String> { Ok(attr.decode_and_unescape_value(decoder)?.to_string()) };
        match attr.key.as_ref() {
            b"xmlUrl" => outline.xml_url = Some(value()?),
            b"title" => outline.label = Some(value()?),
            b"text" if outline.label.is_none() => outline.label = Some(value()?),
            b"category" => outline.category = Some(value()?),
            _ => {}
        }
    }

    Ok(outline)
}

fn push_endpoint(endpoints: &mut Vec<FeedEndpoint>, outline: Outline, folders: &[Option<String>]) {
    let Some(url) = outline.xml_url else {
        return;
    };

    if let Err(e) = validate_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL in OPML");
        return;
    }

    // OPML category attributes are comma separated paths like "/News/World"
    let from_attr = outline.category.as_deref().and_then(|c| {
        c.split(',')
            .next()
            .and_then(|path| path.rsplit('/').find(|seg| !seg.trim().is_empty()))
            .map(str::to_string)
    });
    let from_folder = folders.iter().rev().flatten().next().cloned();

    let category = from_attr
        .or(from_folder)
        .map(|c| normalize_key(&c))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNCATEGORIZED.to_string());

    endpoints.push(FeedEndpoint::new(url.trim(), Some(&category)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(endpoints: &[FeedEndpoint]) -> Vec<(&str, &str)> {
        endpoints
            .iter()
            .map(|e| (e.url.as_str(), e.category.as_deref().unwrap_or("")))
            .collect()
    }

    #[test]
    fn test_folders_name_categories() {
        let opml = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
  <outline text="Tech">
    <outline type="rss" text="Verge" xmlUrl="https://www.theverge.com/rss/index.xml"/>
    <outline text="Deep">
      <outline type="rss" text="Ars" xmlUrl="https://feeds.arstechnica.com/arstechnica/index"/>
    </outline>
  </outline>
  <outline type="rss" text="Loose" xmlUrl="https://example.com/loose.xml"/>
</body></opml>"#;

        let endpoints = parse_opml_content(opml).unwrap();
        assert_eq!(
            categories(&endpoints),
            vec![
                ("https://www.theverge.com/rss/index.xml", "tech"),
                ("https://feeds.arstechnica.com/arstechnica/index", "deep"),
                ("https://example.com/loose.xml", UNCATEGORIZED),
            ]
        );
    }

    #[test]
    fn test_category_attribute_wins_over_folder() {
        let opml = r#"<opml version="2.0"><body>
  <outline text="Misc">
    <outline text="BBC" category="/News/World" xmlUrl="https://feeds.bbci.co.uk/news/world/rss.xml"/>
  </outline>
</body></opml>"#;

        let endpoints = parse_opml_content(opml).unwrap();
        assert_eq!(endpoints[0].category.as_deref(), Some("world"));
    }

    #[test]
    fn test_invalid_urls_skipped() {
        let opml = r#"<opml version="2.0"><body>
  <outline text="Bad" xmlUrl="http://192.168.0.1/feed"/>
  <outline text="Also bad" xmlUrl="file:///etc/passwd"/>
  <outline text="Good" xmlUrl="https://example.com/feed"/>
</body></opml>"#;

        let endpoints = parse_opml_content(opml).unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].url, "https://example.com/feed");
    }

    #[test]
    fn test_depth_limit() {
        let mut opml = String::from("<opml><body>");
        for _ in 0..(MAX_OPML_DEPTH + 1) {
            opml.push_str("<outline text=\"f\">");
        }
        for _ in 0..(MAX_OPML_DEPTH + 1) {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_opml_content(&opml).unwrap_err();
        assert!(err.to_string().contains("nesting depth"));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(parse_opml_content("<opml><body><outline text=\"x\"></body>").is_err());
    }

    #[test]
    fn test_custom_entity_not_expanded() {
        let opml = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml><body><outline text="&xxe;" xmlUrl="https://example.com/&xxe;"/></body></opml>"#;
        assert!(parse_opml_content(opml).is_err());
    }
}

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// Ellipsis string used for truncation
const ELLIPSIS: &str = "...";

/// Truncates a string to at most `max_chars` characters.
///
/// If truncation is necessary, the last three characters of the budget are
/// replaced by "..." so the result never exceeds `max_chars`. Counting is by
/// Unicode scalar value, which keeps every cut on a UTF-8 boundary.
///
/// # Returns
///
/// - `Cow::Borrowed(s)` when the string already fits (no allocation)
/// - `Cow::Borrowed("")` when `max_chars == 0`
/// - `Cow::Owned` with the first `max_chars` characters and no ellipsis when
///   `max_chars <= 3`, since there is no room for "char + ellipsis"
/// - `Cow::Owned` with truncated text and "..." appended otherwise
///
/// # Examples
///
/// ```
/// use inkfeed::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// assert_eq!(truncate_chars("Test", 2), "Te");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    // Byte offset of the first char past the budget, if any
    let Some((overflow_at, _)) = s.char_indices().nth(max_chars) else {
        return Cow::Borrowed(s);
    };

    if max_chars <= ELLIPSIS.len() {
        return Cow::Owned(s[..overflow_at].to_string());
    }

    let keep = max_chars - ELLIPSIS.len();
    let cut = s
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(overflow_at);
    Cow::Owned(format!("{}{}", s[..cut].trim_end(), ELLIPSIS))
}

/// Collapses every run of whitespace into a single space and trims the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tag_regex() -> &'static Regex {
    static RE_TAGS: OnceLock<Regex> = OnceLock::new();
    RE_TAGS.get_or_init(|| Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|</?[^>]+>").unwrap())
}

/// Converts an HTML fragment from a feed into a single line of plain text.
///
/// Strips tags (dropping `<script>`/`<style>` bodies entirely), decodes HTML
/// entities, removes control characters and collapses whitespace. Used to
/// derive snippets from `description`/`content:encoded` when a feed does not
/// carry a plain-text summary.
///
/// # Examples
///
/// ```
/// use inkfeed::util::html_to_text;
///
/// assert_eq!(html_to_text("<p>Hello&nbsp;<b>world</b></p>"), "Hello world");
/// ```
pub fn html_to_text(html: &str) -> String {
    // Tags become spaces so "<p>a</p><p>b</p>" does not fuse into "ab"
    let without_tags = tag_regex().replace_all(html, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    collapse_whitespace(&strip_control_chars(&decoded))
}

/// SEC-001: Strip control characters and ANSI escape sequences from text.
///
/// Feed titles and snippets are attacker-controlled; they end up in JSON
/// consumed by a presentation layer and in prompts sent to the summarizer.
///
/// Strips:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - ANSI CSI sequences: `\x1b[` ... (terminal byte 0x40-0x7E)
/// - ANSI OSC sequences: `\x1b]` ... (until BEL 0x07 or ST `\x1b\\`)
/// - Bare ESC (0x1b) not followed by `[` or `]`
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains no control characters (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    let needs_strip = bytes.iter().any(|&b| is_stripped_byte(b));
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: skip parameter/intermediate bytes until the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: skip until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_stripped_byte(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_stripped_byte(bytes[i]) {
                i += 1;
            }
            // SAFETY: we only break on ASCII control bytes, which cannot appear
            // mid-codepoint in valid UTF-8, so s[start..i] is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

#[inline]
fn is_stripped_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d)
}

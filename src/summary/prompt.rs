use crate::feed::Article;
use crate::util::truncate_chars;

/// Maximum snippet characters embedded in a prompt.
pub const MAX_PROMPT_SNIPPET_CHARS: usize = 600;

/// Hard cap on the full prompt, so one runaway feed cannot blow the token budget.
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Instructions sent as the system message of every summarization request.
pub const SYSTEM_PROMPT: &str = "You are a professional news editor creating concise summaries \
(60-120 words). End with \"Why it matters\" and add a byline.";

/// Builds the user prompt for one article.
///
/// Title, source and link are embedded as-is (they were sanitised by the
/// normalizer); the snippet is capped first and then the whole prompt.
pub fn build_prompt(article: &Article) -> String {
    let snippet = if article.snippet.is_empty() {
        "(no snippet)".into()
    } else {
        truncate_chars(&article.snippet, MAX_PROMPT_SNIPPET_CHARS)
    };

    let prompt = format!(
        "Article title: {title}\n\
         Source: {source}\n\
         URL: {link}\n\
         Snippet: {snippet}\n\
         Task: Write a short, original news summary (60-120 words). End with \"Why it matters\". \
         Add byline: \"Source: {source}. Read full article: {link}\"",
        title = article.title,
        source = article.source_name,
        link = article.link,
    );

    truncate_chars(&prompt, MAX_PROMPT_CHARS).into_owned()
}

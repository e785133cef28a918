use std::cmp::Reverse;
use std::collections::HashSet;

use super::types::Article;

/// Merges, deduplicates and orders articles from several feeds.
///
/// - Articles sharing `(link, title)` (exact, case-sensitive) collapse into
///   the first occurrence.
/// - Remaining articles are sorted newest first; undated ones go last.
/// - The sort is stable, so ties keep input (fetch) order.
/// - At most `max` articles are returned.
pub fn rank(articles: Vec<Article>, max: usize) -> Vec<Article> {
    let total = articles.len();
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(total);

    let mut unique: Vec<Article> = articles
        .into_iter()
        .filter(|a| seen.insert((a.link.clone(), a.title.clone())))
        .collect();

    let dropped = total - unique.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = unique.len(), "Dropped duplicate articles");
    }

    // Option orders None below Some, so Reverse puts undated entries last
    unique.sort_by_key(|a| Reverse(a.published_at));
    unique.truncate(max);
    unique
}

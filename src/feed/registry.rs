//! Feed source registry: the static mapping from category to endpoints.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::types::FeedEndpoint;

/// Key of the aggregate over every registered endpoint.
pub const ALL_KEY: &str = "all";

/// Built-in catalogue used when the configuration names no categories.
const DEFAULT_CATALOGUE: &[(&str, &[&str])] = &[
    (
        "world",
        &[
            "https://rss.nytimes.com/services/xml/rss/nyt/World.xml",
            "https://rss.cnn.com/rss/edition_world.rss",
            "https://feeds.bbci.co.uk/news/world/rss.xml",
            "https://www.reutersagency.com/feed/?best-topics=world",
            "https://www.aljazeera.com/xml/rss/all.xml",
            "https://www.npr.org/rss/rss.php?id=1001",
            "https://www.economist.com/world/rss.xml",
            "https://feeds.feedburner.com/time/topstories",
        ],
    ),
    (
        "us",
        &[
            "https://rss.nytimes.com/services/xml/rss/nyt/US.xml",
            "https://rss.cnn.com/rss/edition.rss",
            "https://www.npr.org/rss/rss.php?id=1014",
        ],
    ),
    (
        "politics",
        &[
            "https://rss.nytimes.com/services/xml/rss/nyt/Politics.xml",
            "https://www.npr.org/rss/rss.php?id=1006",
        ],
    ),
    (
        "business",
        &[
            "https://feeds.bbci.co.uk/news/business/rss.xml",
            "https://www.reutersagency.com/feed/?best-topics=business",
            "https://www.ft.com/?format=rss",
            "https://www.economist.com/latest/rss.xml",
            "https://www.economist.com/business/rss.xml",
            "https://feeds.feedburner.com/time/business",
        ],
    ),
    (
        "technology",
        &[
            "https://rss.nytimes.com/services/xml/rss/nyt/Technology.xml",
            "https://rss.cnn.com/rss/edition_technology.rss",
            "https://feeds.bbci.co.uk/news/technology/rss.xml",
            "https://www.theverge.com/rss/index.xml",
            "https://www.engadget.com/rss.xml",
            "https://www.wired.com/feed/rss",
            "https://www.reutersagency.com/feed/?best-topics=technology",
            "https://www.npr.org/rss/rss.php?id=1019",
            "https://feeds.arstechnica.com/arstechnica/index",
            "https://feeds.feedburner.com/TechCrunch/",
            "https://feeds.feedburner.com/venturebeat/SZYF",
            "https://www.economist.com/technology/rss.xml",
        ],
    ),
    (
        "science",
        &[
            "https://feeds.bbci.co.uk/news/science_and_environment/rss.xml",
            "https://www.npr.org/rss/rss.php?id=1007",
            "https://www.sciencedaily.com/rss/all.xml",
            "https://www.sciencemag.org/rss/news_current.xml",
            "https://www.economist.com/science/rss.xml",
        ],
    ),
    (
        "sports",
        &[
            "https://rss.nytimes.com/services/xml/rss/nyt/Sports.xml",
            "https://www.espn.com/espn/rss/news",
            "https://www.espn.com/espn/rss/ncf/news",
            "https://www.espn.com/espn/rss/nba/news",
            "https://www.espn.com/espn/rss/nfl/news",
        ],
    ),
    (
        "culture",
        &["https://rss.nytimes.com/services/xml/rss/nyt/Culture.xml"],
    ),
    (
        "gaming",
        &[
            "https://feeds.feedburner.com/ign/all",
            "https://www.gamespot.com/feeds/news/",
        ],
    ),
    (
        "podcasts",
        &[
            "https://feeds.npr.org/510289/podcast.xml",
            "https://feeds.npr.org/510312/podcast.xml",
            "https://feeds.npr.org/510298/podcast.xml",
            "https://feeds.npr.org/510296/podcast.xml",
        ],
    ),
];

/// Normalizes a caller-supplied category identifier into a registry key.
///
/// Keys are case-insensitive and ignore surrounding whitespace; an empty
/// identifier means the aggregate.
pub fn normalize_key(raw: &str) -> String {
    let key = raw.trim().to_ascii_lowercase();
    if key.is_empty() {
        ALL_KEY.to_string()
    } else {
        key
    }
}

/// Immutable mapping from category key to feed endpoints.
///
/// Category order and endpoint order follow the order of the input: the
/// catalogue or OPML file as written, or category name order for a config
/// `[categories]` table (TOML tables are read into a sorted map). Either way
/// the "all" aggregate, and so tie-breaking in ranking, is deterministic.
#[derive(Debug, Clone)]
pub struct Registry {
    order: Vec<String>,
    by_category: HashMap<String, Vec<FeedEndpoint>>,
    all: Vec<FeedEndpoint>,
}

impl Registry {
    /// Builds a registry from categorized endpoints.
    ///
    /// Endpoints without a category are only reachable through "all".
    /// A URL listed twice in one category is kept once; the same URL may
    /// appear in several categories but appears once in "all".
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = FeedEndpoint>) -> Self {
        let mut order = Vec::new();
        let mut by_category: HashMap<String, Vec<FeedEndpoint>> = HashMap::new();
        let mut all = Vec::new();
        let mut seen_all = HashSet::new();

        for endpoint in endpoints {
            let url = endpoint.url.trim().to_string();
            if url.is_empty() {
                continue;
            }
            let category = endpoint
                .category
                .as_deref()
                .map(normalize_key)
                .filter(|c| c != ALL_KEY);
            let endpoint = FeedEndpoint {
                url: url.clone(),
                category: category.clone(),
            };

            if let Some(category) = category {
                let list = by_category.entry(category.clone()).or_insert_with(|| {
                    order.push(category.clone());
                    Vec::new()
                });
                if !list.iter().any(|e| e.url == url) {
                    list.push(endpoint.clone());
                }
            }

            if seen_all.insert(url) {
                all.push(endpoint);
            }
        }

        Self {
            order,
            by_category,
            all,
        }
    }

    /// Builds a registry from a `category -> [url]` table (config file form).
    ///
    /// Categories are registered in key order.
    pub fn from_categories(table: &BTreeMap<String, Vec<String>>) -> Self {
        Self::from_endpoints(table.iter().flat_map(|(category, urls)| {
            urls.iter()
                .map(move |url| FeedEndpoint::new(url.as_str(), Some(category.as_str())))
        }))
    }

    /// The built-in news catalogue.
    pub fn builtin() -> Self {
        Self::from_endpoints(DEFAULT_CATALOGUE.iter().flat_map(|(category, urls)| {
            urls.iter()
                .map(move |url| FeedEndpoint::new(*url, Some(category)))
        }))
    }

    /// Resolves a category identifier to its endpoints.
    ///
    /// Returns `None` for unknown categories. "all" (or an empty identifier)
    /// resolves to every registered endpoint.
    pub fn resolve(&self, category: &str) -> Option<&[FeedEndpoint]> {
        let key = normalize_key(category);
        if key == ALL_KEY {
            return Some(&self.all);
        }
        self.by_category.get(&key).map(Vec::as_slice)
    }

    /// Category keys in declaration order, excluding "all".
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Every cacheable key: "all" followed by the categories.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(ALL_KEY).chain(self.categories())
    }

    pub fn endpoint_count(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

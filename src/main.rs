use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;

use inkfeed::api::{create_router, AppState};
use inkfeed::cache::CacheManager;
use inkfeed::config::{Config, ConfigError};
use inkfeed::feed::{build_http_client, opml, HttpFeedSource, Registry};
use inkfeed::pipeline::Pipeline;
use inkfeed::summary::{DisabledSummarizer, OpenAiSummarizer, Summarizer, SummaryBatcher};

#[derive(Parser, Debug)]
#[command(name = "inkfeed", about = "Feed aggregation service with cached, summarized category reads")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", default_value = "inkfeed.toml")]
    config: PathBuf,

    /// Listen address, overrides `bind` from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Skip warming every category at startup
    #[arg(long)]
    no_prewarm: bool,
}

/// Registry precedence: OPML file, then `[categories]`, then the built-in catalogue.
async fn build_registry(config: &Config) -> Result<Registry> {
    if let Some(path) = &config.opml_path {
        let endpoints = opml::load(path).await?;
        let registry = Registry::from_endpoints(endpoints);
        if registry.is_empty() {
            anyhow::bail!("OPML file '{}' contains no usable feeds", path.display());
        }
        tracing::info!(path = %path.display(), feeds = registry.endpoint_count(), "Loaded registry from OPML");
        return Ok(registry);
    }

    if !config.categories.is_empty() {
        let registry = Registry::from_categories(&config.categories);
        tracing::info!(feeds = registry.endpoint_count(), "Loaded registry from config");
        return Ok(registry);
    }

    let registry = Registry::builtin();
    tracing::info!(feeds = registry.endpoint_count(), "Using built-in feed catalogue");
    Ok(registry)
}

/// Falls back to fallback-only summaries when no usable credential is configured.
fn build_summarizer(config: &Config, client: reqwest::Client) -> Arc<dyn Summarizer> {
    let key = match config.api_key() {
        Ok(key) => SecretString::from(key),
        Err(ConfigError::MissingCredential) => {
            tracing::warn!("No summarization API key configured, articles will carry fallback summaries");
            return Arc::new(DisabledSummarizer);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Summarization disabled");
            return Arc::new(DisabledSummarizer);
        }
    };

    match OpenAiSummarizer::new(
        client,
        key,
        config.openai_base_url.as_deref(),
        config.openai_model.as_deref(),
    ) {
        Ok(summarizer) => Arc::new(summarizer),
        Err(e) => {
            tracing::warn!(error = %e, "Summarization disabled");
            Arc::new(DisabledSummarizer)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkfeed=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if args.no_prewarm {
        config.prewarm = false;
    }
    tracing::debug!(config = ?config, "Effective configuration");

    let registry = Arc::new(build_registry(&config).await?);

    let client = build_http_client().context("Failed to build HTTP client")?;
    let source = Arc::new(HttpFeedSource::new(client.clone(), config.max_items_per_feed.max(1)));
    let summarizer = build_summarizer(&config, client);
    let batcher = SummaryBatcher::new(summarizer, config.batch_config());
    let summarizer_name = batcher.summarizer_name();
    let pipeline = Arc::new(Pipeline::new(source, batcher, config.pipeline_config()));

    let cache = CacheManager::new(pipeline, registry, config.cache_ttl());
    tracing::info!(
        categories = cache.registry().categories().count(),
        ttl_secs = cache.ttl().as_secs(),
        summarizer = summarizer_name,
        "Cache ready"
    );
    if config.prewarm {
        cache.prewarm();
    }

    let state = Arc::new(AppState::new(cache, config.max_custom_endpoints));
    let app = create_router(state, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

use crate::config::{Config, SourceStoreType};
use crate::error::PlaylinkError;
use crate::freshness::FreshnessPolicy;
use crate::playback::PlaybackResolver;
use crate::refresh::RefreshCoordinator;
use crate::registry::SourceRegistry;
use crate::resolver::{HttpLinkResolver, LinkResolver};
use crate::scanner::BatchScanner;
use crate::scraper::{HtmlPageParser, ParserSet};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub coordinator: RefreshCoordinator,
    pub scanner: BatchScanner,
    pub playback: PlaybackResolver,
    /// Process start, for the uptime reported by `/health`
    pub started_at: Instant,
}

impl AppState {
    /// Build the production wiring: HTTP resolver, HTML scraper and the
    /// configured source store.
    pub async fn new(config: Config) -> Result<Self, PlaylinkError> {
        let registry = open_registry(&config).await;

        let resolver = HttpLinkResolver::new(&config.user_agent, config.resolver_timeout)
            .map_err(|e| PlaylinkError::InternalError(format!("resolver client: {e}")))?;

        // Shared HTTP client for page scraping
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlaylinkError::InternalError(format!("scraper client: {e}")))?;
        let parser = HtmlPageParser::new(
            config.scraper_site.clone(),
            config.scraper_hosts.clone(),
            http_client,
            &config.user_agent,
        );

        Ok(Self::from_parts(
            config,
            registry,
            Arc::new(resolver),
            ParserSet::new(vec![Arc::new(parser)]),
        ))
    }

    /// Assemble state from explicit collaborators.
    pub fn from_parts(
        config: Config,
        registry: SourceRegistry,
        resolver: Arc<dyn LinkResolver>,
        parsers: ParserSet,
    ) -> Self {
        let policy = FreshnessPolicy::new(config.refresh_threshold);
        let coordinator = RefreshCoordinator::new(registry, resolver, parsers);
        let scanner = BatchScanner::new(coordinator.clone(), policy)
            .with_default_batch(config.refresh_batch_size);
        let playback = PlaybackResolver::new(coordinator.clone(), policy);

        Self {
            config: Arc::new(config),
            coordinator,
            scanner,
            playback,
            started_at: Instant::now(),
        }
    }
}

/// Open the configured store, falling back to memory when Valkey is
/// unavailable or not compiled in.
async fn open_registry(config: &Config) -> SourceRegistry {
    if config.source_store == SourceStoreType::Memory {
        info!("Using in-memory source store");
        return SourceRegistry::new_memory();
    }

    #[cfg(feature = "valkey")]
    {
        let url = config
            .valkey_url
            .as_deref()
            .unwrap_or("redis://127.0.0.1:6379");
        match SourceRegistry::new_valkey(url).await {
            Ok(registry) => {
                info!("Using Valkey source store at {}", url);
                registry
            }
            Err(e) => {
                warn!("Valkey unavailable ({}), using in-memory source store", e);
                SourceRegistry::new_memory()
            }
        }
    }

    #[cfg(not(feature = "valkey"))]
    {
        warn!("SOURCE_STORE=valkey requires the `valkey` feature, using in-memory source store");
        SourceRegistry::new_memory()
    }
}

//! Composition root shared by the data commands
//!
//! Opens the SQLite cache, builds the transform pipeline and wires the
//! fetch orchestrator from a validated configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sheetsync_cache::{CacheStore, DatabasePool, SqliteCacheBackend};
use sheetsync_core::config::Config;
use sheetsync_core::domain::CacheKey;
use sheetsync_core::{Clock, SystemClock};
use sheetsync_sync::{ColumnsTransformer, FetchOrchestrator, TransformPipeline, TransformerRegistry};
use sheetsync_telemetry::MetricsRegistry;
use sheetsync_transport::{RetryPolicy, TransportClient};
use tracing::{debug, info};

/// Prefix of transformer ids that select columns, e.g. `columns:Ticker,Qty`
const COLUMNS_PREFIX: &str = "columns:";

/// Everything a data command needs
pub struct AppContext {
    config_path: PathBuf,
    orchestrator: Arc<FetchOrchestrator>,
    metrics: Arc<MetricsRegistry>,
}

impl AppContext {
    /// Validate `config` and open every adapter it describes
    pub async fn open(config: Config, config_path: PathBuf) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let listed: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
            bail!(
                "Invalid configuration in {}:\n{}",
                config_path.display(),
                listed.join("\n")
            );
        }

        let registry = registry_for(&config)?;
        let metrics = Arc::new(MetricsRegistry::new()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let pool = DatabasePool::new(&config.cache.database)
            .await
            .context("Failed to open cache database")?;
        let backend = Arc::new(SqliteCacheBackend::new(pool.pool().clone()));
        let mut store = CacheStore::new(backend)
            .with_clock(Arc::clone(&clock))
            .with_default_ttl(config.cache.default_ttl())
            .with_metrics(Arc::clone(&metrics));
        if let Some(ttl) = config.cache.delta_ttl() {
            store = store.with_delta_ttl(ttl);
        }
        let cache = Arc::new(store);

        let pipeline = Arc::new(
            TransformPipeline::from_config(&config.transform, registry)
                .with_metrics(Arc::clone(&metrics)),
        );
        let client = Arc::new(TransportClient::new(RetryPolicy::from_config(&config.retry)));

        info!(
            config_path = %config_path.display(),
            data_types = config.data_types.len(),
            "Configuration loaded"
        );

        let orchestrator =
            FetchOrchestrator::from_config(Arc::new(config), cache, pipeline, client, clock)
                .with_metrics(Arc::clone(&metrics));

        Ok(Self {
            config_path,
            orchestrator: Arc::new(orchestrator),
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        self.orchestrator.config()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn orchestrator(&self) -> &Arc<FetchOrchestrator> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.orchestrator.cache()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Cache key of a declared data type
    pub fn cache_key(&self, data_type: &str) -> Result<CacheKey> {
        let declared = self
            .config()
            .data_type(data_type)
            .with_context(|| format!("Unknown data type '{data_type}'"))?;
        CacheKey::new(declared.cache_key.clone())
            .with_context(|| format!("Invalid cache key for data type '{data_type}'"))
    }
}

/// Built-in transformers plus the column selections named by data types
///
/// Fails when a data type names a transformer nothing provides.
fn registry_for(config: &Config) -> Result<TransformerRegistry> {
    let mut registry = TransformerRegistry::with_builtins();

    for (name, data_type) in &config.data_types {
        let id = data_type.transformer.as_str();
        if registry.contains(id) {
            continue;
        }
        let Some(selection) = id.strip_prefix(COLUMNS_PREFIX) else {
            bail!(
                "Data type '{name}' uses unknown transformer '{id}' (available: {}, or {COLUMNS_PREFIX}<col>,<col>)",
                registry.ids().join(", ")
            );
        };

        let columns: Vec<&str> = selection
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            bail!("Data type '{name}' selects no columns in transformer '{id}'");
        }

        debug!(transformer = id, columns = ?columns, "Registering column transformer");
        registry.register(Arc::new(ColumnsTransformer::new(id, columns)));
    }

    Ok(registry)
}

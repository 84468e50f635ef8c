//! Tiered fetch orchestration
//!
//! A fetch walks the tiers in order and stops at the first one that yields
//! a usable table:
//!
//! 1. The cache, unless the caller forces a refresh
//! 2. The fast structured endpoint (one snapshot call with retry)
//! 3. The raw-text export, through every configured route in order
//!
//! The table is then transformed and written back to the cache. Cache writes
//! are best effort; a failed write is logged and the rows are still returned.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use sheetsync_cache::CacheStore;
use sheetsync_core::config::Config;
use sheetsync_core::domain::{CacheKey, DomainRow, RawTable, SheetName};
use sheetsync_core::ports::TransformMeta;
use sheetsync_core::Clock;
use sheetsync_telemetry::MetricsRegistry;
use sheetsync_transport::parse::validate_table;
use sheetsync_transport::{ExportRoutes, RouteFailure, SheetApi, TransportClient, TransportError};

use crate::pipeline::{TransformPipeline, TransformRequest};
use crate::FetchError;

// ============================================================================
// Requests and results
// ============================================================================

/// Everything needed to fetch one data type
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub data_type: String,
    pub sheet: SheetName,
    pub transformer_id: String,
    pub cache_key: CacheKey,
    pub force_refresh: bool,
    /// Cache lifetime of the result; `None` uses the store default
    pub ttl: Option<Duration>,
}

impl FetchRequest {
    pub fn new(
        data_type: impl Into<String>,
        sheet: SheetName,
        transformer_id: impl Into<String>,
        cache_key: CacheKey,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            sheet,
            transformer_id: transformer_id.into(),
            cache_key,
            force_refresh: false,
            ttl: None,
        }
    }

    /// Resolve a data type declared in the `data_types` section
    pub fn from_config(config: &Config, data_type: &str) -> Result<Self, FetchError> {
        let declared = config
            .data_type(data_type)
            .ok_or_else(|| FetchError::UnknownDataType(data_type.to_string()))?;
        let invalid = |e: sheetsync_core::domain::DomainError| FetchError::InvalidDataType {
            data_type: data_type.to_string(),
            message: e.to_string(),
        };

        let sheet = SheetName::new(declared.sheet.as_str()).map_err(invalid)?;
        let cache_key = CacheKey::new(declared.cache_key.as_str()).map_err(invalid)?;
        Ok(Self::new(data_type, sheet, declared.transformer.as_str(), cache_key)
            .with_ttl(config.ttl_for(declared)))
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Tier that answered a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTier {
    Cache,
    Api,
    Export,
}

impl FetchTier {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchTier::Cache => "cache",
            FetchTier::Api => "api",
            FetchTier::Export => "export",
        }
    }
}

/// A validated table fresh from the network
#[derive(Debug, Clone)]
pub struct FetchedTable {
    pub sheet: SheetName,
    pub table: RawTable,
    /// Source version; only the structured endpoint provides one
    pub version: Option<i64>,
    pub tier: FetchTier,
    /// Export route that answered
    pub route: Option<String>,
    /// Export routes that failed before `route`, in order
    pub recovered: Vec<RouteFailure>,
}

// ============================================================================
// FetchOrchestrator
// ============================================================================

#[derive(Debug)]
enum ApiTier {
    Ready(SheetApi),
    /// Configured in a way that must not silently fall back
    Rejected(TransportError),
    Disabled,
}

/// Cache, fast endpoint and export routes behind one call
#[derive(Debug)]
pub struct FetchOrchestrator {
    config: Arc<Config>,
    cache: Arc<CacheStore>,
    pipeline: Arc<TransformPipeline>,
    api: ApiTier,
    routes: Option<ExportRoutes>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl FetchOrchestrator {
    /// Build the tiers described by `config`
    ///
    /// An unusable fast endpoint configuration is logged here, once, and the
    /// tier is skipped on every fetch. A token without an intermediary is
    /// kept as an error and surfaced by every fetch instead.
    pub fn from_config(
        config: Arc<Config>,
        cache: Arc<CacheStore>,
        pipeline: Arc<TransformPipeline>,
        client: Arc<TransportClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let api = match SheetApi::from_config(&config.api, Arc::clone(&client), Arc::clone(&clock))
        {
            Ok(api) => {
                debug!(authenticated = api.is_authenticated(), "Fast endpoint configured");
                ApiTier::Ready(api)
            }
            Err(e) if config.api.auth_token.is_some() && config.api.intermediary_url.is_none() => {
                error!(error = %e, "Fast endpoint misconfigured");
                ApiTier::Rejected(e)
            }
            Err(e) if config.api.endpoint_url.is_none() && config.api.auth_token.is_none() => {
                debug!(error = %e, "Fast endpoint not configured, using the raw-text export");
                ApiTier::Disabled
            }
            Err(e) => {
                warn!(error = %e, "Fast endpoint unusable, using the raw-text export");
                ApiTier::Disabled
            }
        };

        let routes = match ExportRoutes::from_config(&config.fallback, client) {
            Ok(routes) => Some(routes),
            Err(e) => {
                debug!(error = %e, "Raw-text export not configured");
                None
            }
        };

        Self {
            config,
            cache,
            pipeline,
            api,
            routes,
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn pipeline(&self) -> &Arc<TransformPipeline> {
        &self.pipeline
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsRegistry>> {
        self.metrics.as_ref()
    }

    /// The fast endpoint client, or why it cannot be used
    pub fn api(&self) -> Result<&SheetApi, TransportError> {
        match &self.api {
            ApiTier::Ready(api) => Ok(api),
            ApiTier::Rejected(e) => Err(e.clone()),
            ApiTier::Disabled => Err(TransportError::Misconfigured(
                "the fast endpoint is not configured".to_string(),
            )),
        }
    }

    /// Fetch a data type declared in configuration
    pub async fn fetch(
        &self,
        data_type: &str,
        force_refresh: bool,
    ) -> Result<Vec<DomainRow>, FetchError> {
        let request = FetchRequest::from_config(&self.config, data_type)?.force_refresh(force_refresh);
        self.fetch_with_fallback(&request).await
    }

    /// Cache, then fast endpoint, then export routes; transform; cache
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the fast endpoint rejects the credentials and
    ///   no export routes are configured
    /// - `AllRoutesFailed` when the fast endpoint and every route failed
    /// - `EmptyTransform` when the transformer dropped every row
    /// - `Transform` when the transformer failed
    pub async fn fetch_with_fallback(
        &self,
        request: &FetchRequest,
    ) -> Result<Vec<DomainRow>, FetchError> {
        if !request.force_refresh {
            if let Some(rows) = self.cache.get::<Vec<DomainRow>>(&request.cache_key).await {
                self.record_fetch(FetchTier::Cache, "hit");
                return Ok(rows);
            }
        }

        let fetched = self.fetch_table(&request.data_type, &request.sheet).await?;
        let rows = self
            .transform_table(&request.data_type, &request.transformer_id, &fetched)
            .await?;

        if let Err(e) = self.cache.set(&request.cache_key, &rows, request.ttl).await {
            warn!(
                data_type = %request.data_type,
                key = %request.cache_key,
                error = %e,
                "Could not cache fetched rows"
            );
        }

        info!(
            data_type = %request.data_type,
            tier = fetched.tier.as_str(),
            route = fetched.route.as_deref().unwrap_or("-"),
            rows = rows.len(),
            "Fetch complete"
        );
        Ok(rows)
    }

    /// Fetch and validate the raw table of `sheet`, bypassing the cache
    ///
    /// `data_type` only labels logs and errors.
    pub async fn fetch_table(
        &self,
        data_type: &str,
        sheet: &SheetName,
    ) -> Result<FetchedTable, FetchError> {
        let api_failure = match &self.api {
            ApiTier::Ready(api) => match self.fetch_from_api(api, sheet).await {
                Ok(fetched) => return Ok(fetched),
                Err(e @ (TransportError::Unauthorized(_) | TransportError::Forbidden(_))) => {
                    warn!(
                        data_type,
                        sheet = %sheet,
                        error = %e,
                        remediation = e.remediation(),
                        "Fast endpoint refused access, falling back to the raw-text export"
                    );
                    Some(e)
                }
                Err(e) => {
                    warn!(
                        data_type,
                        sheet = %sheet,
                        error = %e,
                        "Fast endpoint failed, falling back to the raw-text export"
                    );
                    Some(e)
                }
            },
            ApiTier::Rejected(e) => return Err(FetchError::Transport(e.clone())),
            ApiTier::Disabled => None,
        };

        let Some(routes) = &self.routes else {
            return Err(match api_failure {
                Some(e) => FetchError::from_api(e),
                None => FetchError::Transport(TransportError::Misconfigured(
                    "neither api.endpoint_url nor fallback.export_url_template is set".to_string(),
                )),
            });
        };

        match routes.fetch_table(sheet).await {
            Ok(export) => {
                for failure in &export.recovered {
                    self.record_route_failure(failure.reason.tag());
                }
                if !export.recovered.is_empty() {
                    let summary: Vec<String> =
                        export.recovered.iter().map(ToString::to_string).collect();
                    warn!(
                        data_type,
                        sheet = %sheet,
                        route = %export.route,
                        failed_routes = export.recovered.len(),
                        failures = %summary.join("; "),
                        "Export recovered after route failures"
                    );
                }
                self.record_fetch(FetchTier::Export, "success");
                Ok(FetchedTable {
                    sheet: sheet.clone(),
                    table: export.table,
                    version: None,
                    tier: FetchTier::Export,
                    route: Some(export.route),
                    recovered: export.recovered,
                })
            }
            Err(failures) => {
                for failure in &failures {
                    self.record_route_failure(failure.reason.tag());
                }
                self.record_fetch(FetchTier::Export, "failure");
                let err = FetchError::AllRoutesFailed {
                    data_type: data_type.to_string(),
                    api_failure: api_failure.as_ref().map(ToString::to_string),
                    api_remediation: api_failure.as_ref().and_then(refused_access_remediation),
                    failures,
                };
                error!(data_type, sheet = %sheet, error = %err, "Fetch failed");
                Err(err)
            }
        }
    }

    async fn fetch_from_api(
        &self,
        api: &SheetApi,
        sheet: &SheetName,
    ) -> Result<FetchedTable, TransportError> {
        let result = api.fetch_snapshot(sheet).await.and_then(|snapshot| {
            let table = RawTable::from_snapshot(&snapshot);
            validate_table(&table)?;
            Ok((table, snapshot.version))
        });

        match result {
            Ok((table, version)) => {
                self.record_fetch(FetchTier::Api, "success");
                Ok(FetchedTable {
                    sheet: sheet.clone(),
                    table,
                    version: Some(version),
                    tier: FetchTier::Api,
                    route: None,
                    recovered: Vec::new(),
                })
            }
            Err(e) => {
                self.record_fetch(FetchTier::Api, "failure");
                Err(e)
            }
        }
    }

    /// Run `transformer_id` over a fetched table
    ///
    /// # Errors
    ///
    /// `EmptyTransform` naming the transformer's required columns when a
    /// non-empty table produced no rows.
    pub async fn transform_table(
        &self,
        data_type: &str,
        transformer_id: &str,
        fetched: &FetchedTable,
    ) -> Result<Vec<DomainRow>, FetchError> {
        let meta = TransformMeta {
            data_type: data_type.to_string(),
            sheet: fetched.sheet.to_string(),
            version: fetched.version,
            fetched_at: self.clock.now_ms(),
        };
        let request = TransformRequest::new(transformer_id, fetched.table.rows().to_vec(), meta);
        let rows = self.pipeline.transform(request, None).await?;

        if rows.is_empty() && !fetched.table.is_empty() {
            let required_columns = self
                .pipeline
                .registry()
                .get(transformer_id)
                .map(|t| t.required_columns())
                .unwrap_or_default();
            return Err(FetchError::EmptyTransform {
                transformer: transformer_id.to_string(),
                input_rows: fetched.table.len(),
                required_columns,
            });
        }
        Ok(rows)
    }

    fn record_fetch(&self, tier: FetchTier, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(tier.as_str(), status);
        }
    }

    fn record_route_failure(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_route_failure(reason);
        }
    }
}

/// Remediation to carry into an aggregate error when the fast endpoint refused access
fn refused_access_remediation(err: &TransportError) -> Option<&'static str> {
    match err {
        TransportError::Unauthorized(_) | TransportError::Forbidden(_) => Some(err.remediation()),
        _ => None,
    }
}

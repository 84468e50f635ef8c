//! Raw-text export over ordered routes
//!
//! The export URL of a sheet is reached either directly or through public
//! proxies. Routes are tried in order until one returns a usable table. Each
//! failure is kept with a short reason tag so the caller can name every
//! route when all of them fail.
//!
//! A route answering 403 is treated as an origin-policy block: the proxy (or
//! the source) refuses this origin, so the next route is tried immediately.
//! Any other failure pauses briefly first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use sheetsync_core::config::{FallbackConfig, ProxyRoute};
use sheetsync_core::domain::{RawTable, SheetName};

use crate::client::TransportClient;
use crate::parse::{parse_delimited, validate_table};
use crate::TransportError;

/// Why one route failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteFailureReason {
    OriginPolicyBlock,
    TimedOut,
    ServerError,
    Other(String),
}

impl RouteFailureReason {
    /// Stable tag used in aggregated errors and metrics
    pub fn tag(&self) -> &'static str {
        match self {
            RouteFailureReason::OriginPolicyBlock => "origin-policy block",
            RouteFailureReason::TimedOut => "timed out",
            RouteFailureReason::ServerError => "server error",
            RouteFailureReason::Other(_) => "other",
        }
    }

    fn from_error(err: &TransportError) -> Self {
        match err {
            TransportError::Forbidden(_) => RouteFailureReason::OriginPolicyBlock,
            TransportError::Timeout(_) => RouteFailureReason::TimedOut,
            TransportError::ServerError { .. } => RouteFailureReason::ServerError,
            other => RouteFailureReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RouteFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteFailureReason::Other(detail) => write!(f, "other ({detail})"),
            reason => f.write_str(reason.tag()),
        }
    }
}

/// One failed route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFailure {
    pub route: String,
    pub reason: RouteFailureReason,
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.route, self.reason)
    }
}

/// A successful export fetch
#[derive(Debug, Clone)]
pub struct ExportFetch {
    pub table: RawTable,
    /// Name of the route that answered
    pub route: String,
    /// Routes that failed before it, in order
    pub recovered: Vec<RouteFailure>,
}

/// The raw-text export and the routes that reach it
#[derive(Debug, Clone)]
pub struct ExportRoutes {
    client: Arc<TransportClient>,
    export_url_template: String,
    routes: Vec<ProxyRoute>,
    pause: Duration,
    timeout: Duration,
}

impl ExportRoutes {
    /// Build from the `fallback` configuration section
    ///
    /// # Errors
    ///
    /// `Misconfigured` when no export URL template or no route is configured.
    pub fn from_config(
        config: &FallbackConfig,
        client: Arc<TransportClient>,
    ) -> Result<Self, TransportError> {
        let template = config.export_url_template.clone().ok_or_else(|| {
            TransportError::Misconfigured("fallback.export_url_template is not set".to_string())
        })?;
        if config.proxy_routes.is_empty() {
            return Err(TransportError::Misconfigured(
                "fallback.proxy_routes is empty".to_string(),
            ));
        }

        Ok(Self {
            client,
            export_url_template: template,
            routes: config.proxy_routes.clone(),
            pause: Duration::from_millis(config.route_pause_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn routes(&self) -> &[ProxyRoute] {
        &self.routes
    }

    /// Export URL of `sheet`, with the sheet name percent-encoded
    pub fn export_url(&self, sheet: &SheetName) -> String {
        self.export_url_template
            .replace("{sheet}", &encode_component(sheet.as_str()))
    }

    /// URL to request for `route`; the bare `{url}` template is the direct route
    pub fn route_url(route: &ProxyRoute, export_url: &str) -> String {
        if route.template.trim() == "{url}" {
            export_url.to_string()
        } else {
            route.template.replace("{url}", &encode_component(export_url))
        }
    }

    /// Try every route in order until one yields a table
    ///
    /// # Errors
    ///
    /// Every route failure, in route order, when no route succeeded.
    pub async fn fetch_table(&self, sheet: &SheetName) -> Result<ExportFetch, Vec<RouteFailure>> {
        let export_url = self.export_url(sheet);
        let mut failures: Vec<RouteFailure> = Vec::new();

        for (index, route) in self.routes.iter().enumerate() {
            let url = Self::route_url(route, &export_url);
            debug!(sheet = %sheet, route = %route.name, "Trying export route");

            let result = match self
                .client
                .attempt_text(|http| http.get(&url), self.timeout)
                .await
            {
                Ok(body) => parse_delimited(&body).and_then(|table| {
                    validate_table(&table)?;
                    Ok(table)
                }),
                Err(e) => Err(e),
            };

            match result {
                Ok(table) => {
                    return Ok(ExportFetch {
                        table,
                        route: route.name.clone(),
                        recovered: failures,
                    });
                }
                Err(err) => {
                    let reason = RouteFailureReason::from_error(&err);
                    warn!(
                        sheet = %sheet,
                        route = %route.name,
                        reason = reason.tag(),
                        error = %err,
                        "Export route failed"
                    );
                    let blocked = reason == RouteFailureReason::OriginPolicyBlock;
                    failures.push(RouteFailure {
                        route: route.name.clone(),
                        reason,
                    });

                    let is_last = index + 1 == self.routes.len();
                    if !blocked && !is_last && !self.pause.is_zero() {
                        tokio::time::sleep(self.pause).await;
                    }
                }
            }
        }

        Err(failures)
    }
}

/// Percent-encode everything except unreserved characters
fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

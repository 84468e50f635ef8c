//! Structured endpoint client
//!
//! The endpoint serves two actions for a named sheet:
//!
//! | Action     | Parameters       | Response                          |
//! |------------|------------------|-----------------------------------|
//! | `snapshot` | `sheet`          | Snapshot, or a legacy 2D array    |
//! | `changes`  | `sheet`, `since` | ChangeSet                         |
//!
//! Without a token the endpoint is called directly with
//! `GET <endpoint>?action=..&sheet=..[&since=..]`. The endpoint cannot read
//! request headers, so with a token every call goes as a JSON `POST` to an
//! intermediary that checks the bearer token and forwards the request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use sheetsync_core::config::ApiConfig;
use sheetsync_core::domain::{ChangeSet, DomainError, SheetName, SheetPayload, Snapshot};
use sheetsync_core::Clock;

use crate::client::TransportClient;
use crate::TransportError;

#[derive(Debug, Clone)]
enum ApiTarget {
    Direct { endpoint: Url },
    Intermediary { url: Url, token: String },
}

/// Client for the fast structured endpoint
#[derive(Debug, Clone)]
pub struct SheetApi {
    client: Arc<TransportClient>,
    target: ApiTarget,
    timeout: Duration,
    snapshot_timeout: Duration,
    clock: Arc<dyn Clock>,
}

fn parse_url(field: &str, raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw)
        .map_err(|e| TransportError::Misconfigured(format!("{field} '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransportError::Misconfigured(format!(
            "{field} '{raw}': unsupported scheme {other}"
        ))),
    }
}

impl SheetApi {
    /// Build the client described by `config`
    ///
    /// # Errors
    ///
    /// `Misconfigured` when the fast path cannot be used: a token without an
    /// intermediary, or a missing or malformed endpoint URL. Callers decide
    /// whether that is fatal (token case) or a reason to use the export.
    pub fn from_config(
        config: &ApiConfig,
        client: Arc<TransportClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransportError> {
        let target = match (&config.auth_token, &config.intermediary_url) {
            (Some(token), Some(url)) => ApiTarget::Intermediary {
                url: parse_url("api.intermediary_url", url)?,
                token: token.clone(),
            },
            (Some(_), None) => {
                return Err(TransportError::Misconfigured(
                    "an access token is configured but api.intermediary_url is not; \
                     the endpoint cannot authenticate direct requests"
                        .to_string(),
                ));
            }
            (None, _) => {
                let raw = config.endpoint_url.as_deref().ok_or_else(|| {
                    TransportError::Misconfigured("api.endpoint_url is not set".to_string())
                })?;
                ApiTarget::Direct {
                    endpoint: parse_url("api.endpoint_url", raw)?,
                }
            }
        };

        Ok(Self {
            client,
            target,
            timeout: config.timeout(),
            snapshot_timeout: config.snapshot_timeout(),
            clock,
        })
    }

    /// Direct (unauthenticated) client for `endpoint` with default deadlines
    pub fn direct(
        endpoint: &str,
        client: Arc<TransportClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransportError> {
        let config = ApiConfig {
            endpoint_url: Some(endpoint.to_string()),
            ..ApiConfig::default()
        };
        Self::from_config(&config, client, clock)
    }

    pub fn with_timeouts(mut self, routine: Duration, snapshot: Duration) -> Self {
        self.timeout = routine;
        self.snapshot_timeout = snapshot;
        self
    }

    /// Whether calls go through the authenticated intermediary
    pub fn is_authenticated(&self) -> bool {
        matches!(self.target, ApiTarget::Intermediary { .. })
    }

    /// Fetch a full snapshot of `sheet`
    ///
    /// A legacy 2D array response is normalized into a snapshot whose version
    /// is the current time in milliseconds.
    pub async fn fetch_snapshot(&self, sheet: &SheetName) -> Result<Snapshot, TransportError> {
        let value = self.call("snapshot", sheet, None, self.snapshot_timeout).await?;
        let payload = SheetPayload::decode(value).map_err(payload_error)?;
        let legacy = matches!(payload, SheetPayload::Legacy(_));
        let snapshot = payload
            .into_snapshot(self.clock.now_ms())
            .map_err(payload_error)?;

        info!(
            sheet = %sheet,
            version = snapshot.version,
            rows = snapshot.rows.len(),
            legacy,
            "Snapshot fetched"
        );
        Ok(snapshot)
    }

    /// Fetch the changes of `sheet` after `since`
    ///
    /// A rejected envelope comes back as a change set with `ok: false` so the
    /// caller falls back to a full reload.
    pub async fn fetch_changes(
        &self,
        sheet: &SheetName,
        since: i64,
    ) -> Result<ChangeSet, TransportError> {
        let value = self.call("changes", sheet, Some(since), self.timeout).await?;
        let change_set = match SheetPayload::decode(value) {
            Ok(payload) => payload.into_change_set().map_err(payload_error)?,
            Err(DomainError::SourceRejected(reason)) => {
                warn!(sheet = %sheet, since, reason, "Change poll rejected by source");
                ChangeSet {
                    ok: false,
                    from_version: since,
                    to_version: since,
                    changes: Vec::new(),
                    needs_full_resync: true,
                }
            }
            Err(e) => return Err(payload_error(e)),
        };

        debug!(
            sheet = %sheet,
            from = change_set.from_version,
            to = change_set.to_version,
            changes = change_set.changes.len(),
            "Change set fetched"
        );
        Ok(change_set)
    }

    async fn call(
        &self,
        action: &str,
        sheet: &SheetName,
        since: Option<i64>,
        timeout: Duration,
    ) -> Result<serde_json::Value, TransportError> {
        let operation = format!("{action}:{sheet}");
        let body = match &self.target {
            ApiTarget::Direct { endpoint } => {
                let mut query = vec![("action", action.to_string()), ("sheet", sheet.to_string())];
                if let Some(since) = since {
                    query.push(("since", since.to_string()));
                }
                self.client
                    .execute_text(
                        &operation,
                        |http| http.get(endpoint.clone()).query(&query),
                        timeout,
                    )
                    .await?
            }
            ApiTarget::Intermediary { url, token } => {
                let mut payload = json!({ "action": action, "sheet": sheet.as_str() });
                if let Some(since) = since {
                    payload["since"] = json!(since);
                }
                self.client
                    .execute_text(
                        &operation,
                        |http| http.post(url.clone()).bearer_auth(token).json(&payload),
                        timeout,
                    )
                    .await?
            }
        };

        serde_json::from_str(&body).map_err(|e| {
            let excerpt: String = body.trim().chars().take(80).collect();
            TransportError::InvalidPayload(format!("{operation}: not JSON ({e}): {excerpt}"))
        })
    }
}

fn payload_error(e: DomainError) -> TransportError {
    TransportError::InvalidPayload(e.to_string())
}

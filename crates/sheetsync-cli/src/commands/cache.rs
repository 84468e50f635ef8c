//! Cache command - Inspect and clear the shared cache
//!
//! Targets are either data type names from the configuration or raw cache
//! keys such as `sheets:positions`.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;
use sheetsync_core::domain::{CacheDocument, CacheKey};
use tracing::info;

use crate::context::AppContext;
use crate::output::{format_ms, get_formatter, plural, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached entries, or show one in full
    Show {
        /// Data type name or cache key
        target: Option<String>,
    },
    /// Delete one entry, or every entry
    Clear {
        /// Data type name or cache key
        target: Option<String>,
        /// Required to clear every entry
        #[arg(long, conflicts_with = "target")]
        all: bool,
    },
}

impl CacheCommand {
    pub async fn execute(&self, app: &AppContext, format: OutputFormat) -> Result<()> {
        match self {
            CacheCommand::Show { target: None } => self.execute_list(app, format).await,
            CacheCommand::Show {
                target: Some(target),
            } => {
                let key = resolve_key(app, target)?;
                self.execute_show(app, &key, format).await
            }
            CacheCommand::Clear { target, all } => {
                self.execute_clear(app, target.as_deref(), *all, format)
                    .await
            }
        }
    }

    async fn execute_list(&self, app: &AppContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let now_ms = app.cache().now_ms();
        let keys = app.cache().keys().await.context("Failed to list cache keys")?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(document) = app.cache().inspect(key).await? {
                entries.push((key, summarize(&document, now_ms)));
            }
        }

        if format.is_json() {
            let listed: Vec<_> = entries
                .iter()
                .map(|(key, summary)| {
                    let mut summary = summary.clone();
                    summary["key"] = json!(key.as_str());
                    summary
                })
                .collect();
            formatter.print_json(&json!(listed));
            return Ok(());
        }

        if entries.is_empty() {
            formatter.success("Cache is empty");
            return Ok(());
        }
        formatter.success(&format!(
            "{} cached entr{}",
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" }
        ));
        for (key, summary) in &entries {
            formatter.info(&format!("{key}  {}", describe(summary)));
        }
        Ok(())
    }

    async fn execute_show(&self, app: &AppContext, key: &CacheKey, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let Some(document) = app.cache().inspect(key).await? else {
            formatter.warn(&format!("Nothing cached under '{key}'"));
            return Ok(());
        };
        let summary = summarize(&document, app.cache().now_ms());

        if format.is_json() {
            formatter.print_json(&json!({
                "key": key.as_str(),
                "summary": summary,
                "data": document.data(),
            }));
            return Ok(());
        }

        formatter.success(&format!("{key}  {}", describe(&summary)));
        match document.data() {
            serde_json::Value::Array(rows) => formatter.print_rows(rows),
            other => formatter.info(&other.to_string()),
        }
        Ok(())
    }

    async fn execute_clear(
        &self,
        app: &AppContext,
        target: Option<&str>,
        all: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let formatter = get_formatter(format);
        match (target, all) {
            (Some(target), _) => {
                let key = resolve_key(app, target)?;
                info!(key = %key, "Clearing cache entry");
                app.cache().clear(Some(&key)).await;
                formatter.success(&format!("Cleared '{key}'"));
            }
            (None, true) => {
                info!("Clearing every cache entry");
                app.cache().clear(None).await;
                formatter.success("Cleared every cache entry");
            }
            (None, false) => {
                anyhow::bail!("Name an entry to clear, or pass --all to clear everything")
            }
        }
        Ok(())
    }
}

/// Cache key of a declared data type, or `target` itself as a key
fn resolve_key(app: &AppContext, target: &str) -> Result<CacheKey> {
    if app.config().data_type(target).is_some() {
        return app.cache_key(target);
    }
    CacheKey::new(target).with_context(|| format!("'{target}' is neither a data type nor a cache key"))
}

/// Form, freshness and size of a stored document
fn summarize(document: &CacheDocument, now_ms: i64) -> serde_json::Value {
    let rows = document.data().as_array().map(Vec::len);
    let mut summary = json!({
        "kind": document.kind(),
        "expired": document.is_expired(now_ms),
        "rows": rows,
    });
    match document {
        CacheDocument::Ttl(entry) => {
            summary["storedAt"] = json!(format_ms(entry.timestamp));
            summary["expiresAt"] = json!(format_ms(entry.timestamp + entry.ttl));
        }
        CacheDocument::Delta(entry) => {
            summary["version"] = json!(entry.version);
            summary["lastSnapshotAt"] = json!(format_ms(entry.last_snapshot_at));
        }
    }
    summary
}

fn describe(summary: &serde_json::Value) -> String {
    let mut parts = vec![summary["kind"].as_str().unwrap_or("?").to_string()];
    if let Some(rows) = summary["rows"].as_u64() {
        parts.push(format!("{rows} row{}", plural(rows as usize)));
    }
    if let Some(version) = summary["version"].as_i64() {
        parts.push(format!("version {version}"));
    }
    if let Some(expires) = summary["expiresAt"].as_str() {
        parts.push(format!("expires {expires}"));
    }
    if summary["expired"].as_bool() == Some(true) {
        parts.push("EXPIRED".to_string());
    }
    parts.join(", ")
}

//! Delta command - Version-based sync of delta data types
//!
//! Provides the `sheetsync delta` CLI commands which:
//! 1. Load a versioned snapshot into the cache (`init`, `reload`)
//! 2. Ask the fast endpoint what changed since a version (`poll`)
//! 3. Poll and apply in one step (`sync`)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;
use sheetsync_sync::{DeltaData, DeltaSyncEngine};

use crate::context::AppContext;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum DeltaCommand {
    /// Serve the cached version entry, loading a snapshot when there is none
    Init {
        /// Data type name from the configuration
        data_type: String,
    },
    /// List changes after a version
    Poll {
        /// Data type name from the configuration
        data_type: String,
        /// Version to poll from (defaults to the cached version, or 0)
        #[arg(long)]
        since: Option<i64>,
        /// Apply the result to the cache
        #[arg(long)]
        apply: bool,
    },
    /// Poll for changes and bring the cache up to date
    Sync {
        /// Data type name from the configuration
        data_type: String,
    },
    /// Replace the cached entry with a fresh snapshot
    Reload {
        /// Data type name from the configuration
        data_type: String,
    },
}

impl DeltaCommand {
    pub async fn execute(&self, app: &AppContext, format: OutputFormat) -> Result<()> {
        let engine = DeltaSyncEngine::new(Arc::clone(app.orchestrator()));

        match self {
            DeltaCommand::Init { data_type } => {
                let key = app.cache_key(data_type)?;
                let loaded = engine
                    .init(data_type, &key)
                    .await
                    .with_context(|| format!("Failed to initialize '{data_type}'"))?;
                print_delta(format, data_type, "Initialized", &loaded);
            }
            DeltaCommand::Poll {
                data_type,
                since,
                apply,
            } => {
                self.execute_poll(app, &engine, data_type, *since, *apply, format)
                    .await?
            }
            DeltaCommand::Sync { data_type } => {
                let key = app.cache_key(data_type)?;
                let synced = engine
                    .sync(data_type, &key)
                    .await
                    .with_context(|| format!("Failed to sync '{data_type}'"))?;
                print_delta(format, data_type, "Synced", &synced);
            }
            DeltaCommand::Reload { data_type } => {
                let key = app.cache_key(data_type)?;
                let loaded = engine
                    .reload(data_type, &key)
                    .await
                    .with_context(|| format!("Failed to reload '{data_type}'"))?;
                print_delta(format, data_type, "Reloaded", &loaded);
            }
        }

        Ok(())
    }

    async fn execute_poll(
        &self,
        app: &AppContext,
        engine: &DeltaSyncEngine,
        data_type: &str,
        since: Option<i64>,
        apply: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let formatter = get_formatter(format);
        let key = app.cache_key(data_type)?;

        let since = match since {
            Some(version) => version,
            None => app
                .cache()
                .get_delta::<serde_json::Value>(&key)
                .await
                .map(|view| view.version)
                .unwrap_or(0),
        };

        let change_set = engine
            .poll_changes(data_type, since)
            .await
            .with_context(|| format!("Failed to poll '{data_type}'"))?;
        let outcome = if apply {
            Some(engine.apply_changes_to_cache(data_type, &change_set, &key).await)
        } else {
            None
        };

        if format.is_json() {
            let mut value = serde_json::to_value(&change_set)?;
            if let Some(outcome) = &outcome {
                value["applied"] = json!({
                    "needsReload": outcome.needs_reload,
                    "version": outcome.version,
                });
            }
            formatter.print_json(&value);
            return Ok(());
        }

        let count = change_set.changes.len();
        formatter.success(&format!(
            "{count} change{} for '{data_type}' ({} -> {})",
            plural(count),
            change_set.from_version,
            change_set.to_version
        ));
        for change in &change_set.changes {
            formatter.info(&format!(
                "{} row {} [{}]",
                change.id,
                change.row_key,
                change.changed_columns.join(", ")
            ));
        }
        if change_set.needs_full_resync {
            formatter.warn("The endpoint requested a full resync");
        }
        if let Some(outcome) = outcome {
            if outcome.needs_reload {
                formatter.warn(&format!(
                    "Cache needs a reload at version {}; run 'sheetsync delta reload {data_type}'",
                    outcome.version
                ));
            } else {
                formatter.info(&format!("Cache is at version {}", outcome.version));
            }
        }

        Ok(())
    }
}

fn print_delta(format: OutputFormat, data_type: &str, verb: &str, loaded: &DeltaData) {
    let formatter = get_formatter(format);
    if format.is_json() {
        formatter.print_json(&json!({
            "dataType": data_type,
            "version": loaded.version,
            "rows": loaded.data,
        }));
    } else {
        formatter.success(&format!(
            "{verb} '{data_type}' at version {} ({} row{})",
            loaded.version,
            loaded.data.len(),
            plural(loaded.data.len())
        ));
    }
}

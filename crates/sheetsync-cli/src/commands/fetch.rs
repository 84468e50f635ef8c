//! Fetch command - Fetch one data type through the tiered fallback
//!
//! Provides the `sheetsync fetch` CLI command which:
//! 1. Resolves the data type declared in configuration
//! 2. Serves it from the cache, the fast endpoint or the export routes
//! 3. Prints the transformed rows, or with `--raw` which tier answered

use anyhow::{Context, Result};
use clap::Args;
use sheetsync_core::domain::SheetName;
use sheetsync_sync::FetchRequest;
use tracing::info;

use crate::context::AppContext;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct FetchCommand {
    /// Data type name from the configuration
    pub data_type: String,

    /// Skip the cache and fetch from the network
    #[arg(long)]
    pub force: bool,

    /// Show the raw table and the tier that served it, without transforming or caching
    #[arg(long)]
    pub raw: bool,

    /// Show at most this many rows
    #[arg(long)]
    pub limit: Option<usize>,
}

impl FetchCommand {
    pub async fn execute(&self, app: &AppContext, format: OutputFormat) -> Result<()> {
        if self.raw {
            return self.execute_raw(app, format).await;
        }

        let formatter = get_formatter(format);
        let request = FetchRequest::from_config(app.config(), &self.data_type)?
            .force_refresh(self.force);

        info!(data_type = %self.data_type, force = self.force, "Fetching");
        let rows = app
            .orchestrator()
            .fetch_with_fallback(&request)
            .await
            .with_context(|| format!("Failed to fetch '{}'", self.data_type))?;

        let shown = &rows[..self.limit.unwrap_or(rows.len()).min(rows.len())];
        if format.is_json() {
            formatter.print_rows(shown);
        } else {
            formatter.success(&format!(
                "{} row{} for '{}' ({})",
                rows.len(),
                plural(rows.len()),
                self.data_type,
                request.cache_key
            ));
            formatter.print_rows(shown);
            if shown.len() < rows.len() {
                formatter.info(&format!("... {} more", rows.len() - shown.len()));
            }
        }

        Ok(())
    }

    async fn execute_raw(&self, app: &AppContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let declared = app
            .config()
            .data_type(&self.data_type)
            .with_context(|| format!("Unknown data type '{}'", self.data_type))?;
        let sheet = SheetName::new(declared.sheet.clone())?;

        let fetched = app
            .orchestrator()
            .fetch_table(&self.data_type, &sheet)
            .await
            .with_context(|| format!("Failed to fetch sheet '{sheet}'"))?;
        let recovered: Vec<String> = fetched.recovered.iter().map(ToString::to_string).collect();

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "sheet": fetched.sheet.as_str(),
                "tier": fetched.tier.as_str(),
                "route": fetched.route,
                "version": fetched.version,
                "recovered": recovered,
                "headers": fetched.table.headers(),
                "columns": fetched.table.columns(),
                "rows": fetched.table.len(),
            }));
            return Ok(());
        }

        let via = match &fetched.route {
            Some(route) => format!("{} via {route}", fetched.tier.as_str()),
            None => fetched.tier.as_str().to_string(),
        };
        formatter.success(&format!(
            "{} row{} from '{}' ({via})",
            fetched.table.len(),
            plural(fetched.table.len()),
            fetched.sheet
        ));
        formatter.info(&format!("Headers: {}", fetched.table.headers().join(", ")));
        if let Some(version) = fetched.version {
            formatter.info(&format!("Version: {version}"));
        }
        for failure in &recovered {
            formatter.warn(&format!("Route failed before recovery: {failure}"));
        }

        Ok(())
    }
}

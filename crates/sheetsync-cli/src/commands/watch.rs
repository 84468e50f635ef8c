//! Watch command - Keep every data type fresh until interrupted
//!
//! Each cycle fetches TTL data types (served from the cache while fresh)
//! and syncs delta data types. On Ctrl+C or SIGTERM the loop stops
//! scheduling cycles and runs one background sync, as an application
//! going idle would.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use sheetsync_sync::{BackgroundSyncCoordinator, BackgroundSyncReport, DeltaSyncEngine, Visibility};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Seconds between cycles (defaults to sync.poll_interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Skip the background sync on shutdown
    #[arg(long)]
    pub no_final_sync: bool,
}

/// Outcome of one polling cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub refreshed: usize,
    pub failed: Vec<String>,
}

impl WatchCommand {
    pub async fn execute(&self, app: &AppContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = DeltaSyncEngine::new(Arc::clone(app.orchestrator()));
        let coordinator = BackgroundSyncCoordinator::new(Arc::clone(app.orchestrator()));

        let seconds = self.interval.unwrap_or(app.config().sync.poll_interval_secs).max(1);
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal(signal_token).await;
        });

        let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = seconds, "Watching data types");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = run_cycle(app, &engine).await;
                    report_cycle(&*formatter, format, &summary);
                    if self.once {
                        break;
                    }
                }
            }
        }

        if self.no_final_sync {
            return Ok(());
        }
        match coordinator.on_visibility_change(Visibility::Hidden).await {
            Some(report) => report_background(&*formatter, format, &report),
            None => formatter.warn("Background sync skipped: another run is in progress"),
        }
        Ok(())
    }
}

/// Refresh every declared data type once
///
/// Failures are logged and counted; they never stop the cycle.
pub async fn run_cycle(app: &AppContext, engine: &DeltaSyncEngine) -> CycleSummary {
    let mut summary = CycleSummary::default();

    for (name, declared) in &app.config().data_types {
        let result = if declared.delta {
            match app.cache_key(name) {
                Ok(key) => engine.sync(name, &key).await.map(|_| ()).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        } else {
            app.orchestrator()
                .fetch(name, false)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        };

        match result {
            Ok(()) => summary.refreshed += 1,
            Err(e) => {
                warn!(data_type = %name, error = %e, "Refresh failed");
                summary.failed.push(format!("{name}: {e}"));
            }
        }
    }

    summary
}

fn report_cycle(
    formatter: &dyn crate::output::OutputFormatter,
    format: OutputFormat,
    summary: &CycleSummary,
) {
    if format.is_json() {
        println!(
            "{}",
            json!({"event": "cycle", "refreshed": summary.refreshed, "failed": summary.failed})
        );
        return;
    }
    if summary.failed.is_empty() {
        formatter.success(&format!(
            "Refreshed {} data type{}",
            summary.refreshed,
            plural(summary.refreshed)
        ));
    } else {
        formatter.warn(&format!(
            "Refreshed {}, {} failed",
            summary.refreshed,
            summary.failed.len()
        ));
        for failure in &summary.failed {
            formatter.info(&format!("- {failure}"));
        }
    }
}

fn report_background(
    formatter: &dyn crate::output::OutputFormatter,
    format: OutputFormat,
    report: &BackgroundSyncReport,
) {
    if format.is_json() {
        let sheets: Vec<_> = report
            .sheets
            .iter()
            .map(|s| {
                json!({
                    "sheet": s.sheet.as_str(),
                    "dataTypes": s.data_types,
                    "written": s.written.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                    "failures": s.failures,
                })
            })
            .collect();
        println!(
            "{}",
            json!({
                "event": "background_sync",
                "startedAt": report.started_at,
                "finishedAt": report.finished_at,
                "sheets": sheets,
            })
        );
        return;
    }

    formatter.success(&format!(
        "Background sync: {} sheet{} succeeded, {} failed",
        report.succeeded(),
        plural(report.succeeded()),
        report.failed()
    ));
    for sheet in report.sheets.iter().filter(|s| !s.is_success()) {
        for failure in &sheet.failures {
            formatter.info(&format!("- {}: {failure}", sheet.sheet));
        }
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

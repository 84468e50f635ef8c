//! Config command - View and validate SheetSync configuration
//!
//! Provides the `sheetsync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates it and reports every error at once
//! 3. Prints the path the configuration is read from

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use sheetsync_core::config::Config;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration
    Validate,
    /// Print the configuration file path
    Path,
}

impl ConfigCommand {
    pub fn execute(&self, config: &Config, path: &Path, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(config, path, format),
            ConfigCommand::Validate => execute_validate(config, path, format),
            ConfigCommand::Path => {
                let formatter = get_formatter(format);
                if format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "config_path": path.display().to_string(),
                        "exists": path.exists(),
                    }));
                } else {
                    println!("{}", path.display());
                }
                Ok(())
            }
        }
    }
}

fn execute_show(config: &Config, path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    if format.is_json() {
        let json =
            serde_json::to_value(redacted(config)).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    formatter.success(&format!("Configuration ({})", path.display()));
    formatter.info("");
    let yaml = serde_yaml::to_string(&redacted(config))
        .context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_validate(config: &Config, path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let errors = config.validate();

    if format.is_json() {
        let listed: Vec<_> = errors
            .iter()
            .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
            .collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": path.display().to_string(),
            "errors": listed,
        }));
    } else if errors.is_empty() {
        formatter.success(&format!("Configuration is valid ({})", path.display()));
        formatter.info(&format!(
            "{} data type{} declared",
            config.data_types.len(),
            crate::output::plural(config.data_types.len())
        ));
    } else {
        formatter.error(&format!(
            "{} configuration error{} in {}",
            errors.len(),
            crate::output::plural(errors.len()),
            path.display()
        ));
        for e in &errors {
            formatter.info(&format!("- {e}"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Configuration is invalid")
    }
}

/// Copy of `config` safe to print
fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    if shown.api.auth_token.is_some() {
        shown.api.auth_token = Some("<redacted>".to_string());
    }
    shown
}

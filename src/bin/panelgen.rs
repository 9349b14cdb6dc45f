//! panelgen CLI Binary
//!
//! Command-line interface for batch panel generation.

use anyhow::Context;
use clap::Parser;
use panelgen::cli::{map_error, Cli, RunContext};
use panelgen::config::ConfigLoader;
use panelgen::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("panelgen starting");

    let context = match RunContext::new(cli.workspace.clone(), cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Logging config from the config file, overridden by CLI flags.
///
/// Without `--verbose` only warnings and errors are shown.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = match load_logging_section(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {:#}; using default logging settings", e);
            LoggingConfig::default()
        }
    };

    if !cli.verbose && cli.log_level.is_none() {
        config.level = "warn".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    } else if config.file.is_relative() {
        config.file = cli.workspace.join(&config.file);
    }

    config
}

fn load_logging_section(cli: &Cli) -> anyhow::Result<LoggingConfig> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("reading logging settings from {}", path.display()))?,
        None => ConfigLoader::load(&cli.workspace).with_context(|| {
            format!(
                "reading logging settings for workspace {}",
                cli.workspace.display()
            )
        })?,
    };
    Ok(config.logging)
}

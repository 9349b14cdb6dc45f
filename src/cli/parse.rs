//! CLI parse: clap types for panelgen. No behavior; definitions only.

use crate::types::{AspectRatio, TextKind};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// panelgen - batch panel image generation across rate-limited backends
#[derive(Parser)]
#[command(name = "panelgen")]
#[command(about = "Render panel image batches and place their text overlays")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (where config/ lives)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: warnings only)
    #[arg(long, short)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render every panel of a plan file and place its text overlays
    Run {
        /// Plan file (JSON)
        plan: PathBuf,

        /// Backend to render on (defaults to orchestrator.default_backend)
        #[arg(long)]
        backend: Option<String>,

        /// Write the enriched plan here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Suppress per-job progress lines on stderr
        #[arg(long)]
        quiet: bool,
    },
    /// Render a JSON array of jobs without placement analysis
    Batch {
        /// Jobs file (JSON array)
        jobs: PathBuf,

        #[arg(long)]
        backend: Option<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long)]
        quiet: bool,
    },
    /// Render one subject reference image
    Reference {
        /// Subject description
        description: String,

        /// Art style for the reference
        #[arg(long, default_value = "")]
        style: String,
    },
    /// Estimate the overlay size for a piece of text
    Estimate {
        text: String,

        #[arg(long, value_enum, default_value = "dialogue")]
        kind: KindArg,

        /// Frame aspect ratio (W:H)
        #[arg(long, default_value = "1:1")]
        aspect: AspectRatio,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List configured backends and their execution strategies
    Backends {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Validate the merged configuration
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Dialogue,
    Narrative,
    Effect,
}

impl From<KindArg> for TextKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Dialogue => TextKind::Dialogue,
            KindArg::Narrative => TextKind::Narrative,
            KindArg::Effect => TextKind::Effect,
        }
    }
}

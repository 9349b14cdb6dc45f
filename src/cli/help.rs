//! Command-name contract used for log spans.

use crate::cli::parse::Commands;

/// Command name string (e.g. "run", "backends").
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Run { .. } => "run",
        Commands::Batch { .. } => "batch",
        Commands::Reference { .. } => "reference",
        Commands::Estimate { .. } => "estimate",
        Commands::Backends { .. } => "backends",
        Commands::Validate => "validate",
    }
}

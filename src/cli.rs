//! CLI domain: parse, route, help and output only.
//! No orchestration logic; a single route table dispatches to library services.

mod help;
mod output;
mod parse;
mod route;

pub use help::command_name;
pub use output::{format_backends_text, format_estimate_text, format_progress_line, map_error};
pub use parse::{Cli, Commands, KindArg};
pub use route::RunContext;

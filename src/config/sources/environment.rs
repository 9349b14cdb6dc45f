//! Environment source: `PANELGEN__SECTION__KEY=value`.
//!
//! `PANELGEN__BACKENDS__GEMINI__PACING_DELAY_MS=8000` sets
//! `backends.gemini.pacing_delay_ms`. The single-underscore `PANELGEN_LOG*` and
//! `PANELGEN_ENV` variables are not matched.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const ENV_PREFIX: &str = "PANELGEN";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
}

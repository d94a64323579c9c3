use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Default filter directive; `RUST_LOG` adds to it.
pub const DEFAULT_DIRECTIVE: &str = "wim=info";

/// Installs the global subscriber. Call once, before any job starts.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(DEFAULT_DIRECTIVE.parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

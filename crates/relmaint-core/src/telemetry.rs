//! Log setup for the `relmaint` command.
//!
//! Command results (status lines, checklist links, pushed branches) are
//! printed on stdout; every log event goes to stderr, so the output of a
//! command can be piped or pasted into an issue without log noise.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: relmaint's own crates at `level`,
/// dependencies such as the HTTP client only at `warn`.
fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!("warn,relmaint_core={level},relmaint={level}"))
}

/// Install the global subscriber. `json` switches stderr to
/// newline-delimited JSON. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry.with(stderr.json()).try_init()
    } else {
        registry.with(stderr).try_init()
    };
    installed.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_level_to_relmaint() {
        let filter = default_filter(Level::DEBUG).to_string().to_ascii_lowercase();
        assert!(filter.contains("relmaint_core=debug"));
        assert!(filter.contains("relmaint=debug"));
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}

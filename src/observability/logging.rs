//! Tracing subscriber setup.
//!
//! Controlled by environment variables so deployments tune output without
//! rebuilds:
//!
//! - `LOG_LEVEL`: base level when `RUST_LOG` is unset (default `info`)
//! - `LOG_FORMAT`: `json`, `compact` or `pretty` (default `pretty`)
//! - `LOG_SPANS`: `1`/`true` to log span enter/close events
//! - `RUST_LOG`: full filter directive string, overrides `LOG_LEVEL`

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn build_env_filter() -> EnvFilter {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        // Keep dependency internals quiet unless asked for explicitly.
        format!("{level},rumqttc=warn,tokio=warn")
    });
    EnvFilter::new(base)
}

fn span_events() -> FmtSpan {
    match std::env::var("LOG_SPANS").as_deref() {
        Ok("1") | Ok("true") => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

/// Install the global subscriber. Returns an error when one is already
/// installed, which callers may treat as success in tests.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter())
        .with_span_events(span_events());

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().try_init()?,
        Ok("compact") => builder.compact().try_init()?,
        _ => builder.pretty().try_init()?,
    }
    Ok(())
}

/// Install the global subscriber, tolerating a prior install.
pub fn init_default_logging() {
    if let Err(error) = init_logging() {
        eprintln!("logging already initialized: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_quietens_dependencies() {
        // Only exercises the construction path; filter contents depend on
        // process env.
        let _ = build_env_filter();
    }

    #[test]
    fn repeated_init_is_tolerated() {
        init_default_logging();
        init_default_logging();
    }
}

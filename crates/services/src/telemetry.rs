//! Tracing subscriber setup.
//!
//! - `QUIZ_LOG` holds the filter directives (default `info,services=debug,storage=info`).
//! - `QUIZ_LOG_FORMAT=json` switches to structured JSON lines.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env("QUIZ_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info,services=debug,storage=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    match std::env::var("QUIZ_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().try_init().is_ok(),
        _ => builder.try_init().is_ok(),
    }
}

//! Structured logging for the `appforge` CLI and the API server.
//!
//! `RUST_LOG` wins when set. Otherwise the configured level applies to this
//! workspace's crates while dependencies (sqlx, hyper, reqwest) stay at
//! `warn`, so a `debug` session is not flooded with query and connection logs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log targets owned by this workspace
const WORKSPACE_TARGETS: &[&str] = &["appforge_engine", "appforge", "api_server", "appforge_server", "sdk"];

/// Level applied to every other target
const DEPENDENCY_LEVEL: &str = "warn";

/// Filter directives for `log_level` when `RUST_LOG` is unset
pub fn default_filter(log_level: &str) -> String {
    let mut directives = vec![DEPENDENCY_LEVEL.to_string()];
    directives.extend(
        WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, log_level)),
    );
    directives.join(",")
}

/// Install the global subscriber. Later calls are no-ops.
///
/// Debug builds print pretty terminal output; release builds emit JSON lines
/// with the current span attached.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

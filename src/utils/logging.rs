use tracing_subscriber::EnvFilter;

/// WebSocket internals log every frame at debug, keep them quiet.
const QUIET_DEPENDENCIES: &str = "tungstenite=warn,tokio_tungstenite=warn";

/// Build the log filter: `RUST_LOG` when set and valid, otherwise
/// `default_level` for the crate with the WebSocket stack held at `warn`.
///
/// Unknown level names fall back to `info`.
pub fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match default_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" | "warning" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        };
        EnvFilter::new(format!("{level},{QUIET_DEPENDENCIES}"))
    })
}

/// Initialize tracing for the application.
pub fn init(default_level: &str) {
    // try_init so tests and the binary can both call this
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_target(false)
        .try_init();
}

//! Default tower layers used by the built-in plugins (see [`crate::plugins`]).

use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// A permissive CORS layer: any origin, method, and header.
///
/// Suitable for local development; production services should build their
/// own `CorsLayer` and install it via [`crate::plugins::Cors::custom`].
pub fn default_cors() -> CorsLayer {
    CorsLayer::permissive()
}

/// The tower-http `TraceLayer` installed by the [`crate::plugins::Tracing`]
/// plugin. Logs request/response spans at `DEBUG`.
pub fn default_trace() -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// A `CatchPanicLayer` that turns panics inside handlers into `500` JSON
/// responses instead of killing the connection silently.
pub fn catch_panic_layer() -> CatchPanicLayer {
    CatchPanicLayer::new()
}

/// Initialise the global `tracing` subscriber once, reading the `RUST_LOG`
/// environment variable (defaulting to `info` when unset).
///
/// Safe to call multiple times — subsequent calls are no-ops.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
}

use crate::config::Environment;
use tracing_subscriber::{Registry, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
/// The OpenTelemetry layer is a no-op unless a global tracer provider has been
/// installed, see [`crate::TelemetryGuard`].
pub fn setup_logging(environment: Environment) {
    install(environment, tracing_opentelemetry::layer());
}

pub(crate) fn install<L>(environment: Environment, otel_layer: L)
where
    L: tracing_subscriber::Layer<tracing_subscriber::layer::Layered<tracing_subscriber::EnvFilter, Registry>>
        + Send
        + Sync
        + 'static,
{
    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(otel_layer);

    // A second init (tests, repeated setup) is not an error worth dying for.
    let result = match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init(),
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Tracing subscriber already installed: {}", e);
    }
}

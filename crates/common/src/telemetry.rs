use crate::{Environment, env_or, env_string};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// Environment variable holding the OTLP collector endpoint.
pub const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// OTLP export knobs read from the standard `OTEL_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub endpoint: String,
    pub metric_interval: Duration,
    /// Fraction of root traces kept, clamped to `0.0..=1.0`.
    pub trace_ratio: f64,
}

impl ExportSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            metric_interval: Duration::from_secs(10),
            trace_ratio: 1.0,
        }
    }

    /// `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = env_string(OTLP_ENDPOINT_VAR, "");
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }

        let defaults = Self::new(endpoint);
        Some(Self {
            metric_interval: Duration::from_millis(env_or(
                "OTEL_METRIC_EXPORT_INTERVAL",
                defaults.metric_interval.as_millis() as u64,
            )),
            trace_ratio: env_or("OTEL_TRACES_SAMPLER_ARG", defaults.trace_ratio).clamp(0.0, 1.0),
            ..defaults
        })
    }

    fn sampler(&self) -> Sampler {
        let root = if self.trace_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::TraceIdRatioBased(self.trace_ratio)
        };
        Sampler::ParentBased(Box::new(root))
    }
}

/// Owns the trace and metric providers; dropping it flushes both.
///
/// Must be created inside a Tokio runtime context: the batch exporters spawn
/// onto it.
///
/// # Example
/// ```ignore
/// let _telemetry = TelemetryGuard::init("vinewatch", &ExportSettings::new("http://localhost:4317"), Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Install OTLP providers and the tracing subscriber (JSON in production,
    /// pretty in development) bridged to them.
    pub fn init(
        service_name: &str,
        settings: &ExportSettings,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let resource = service_resource(service_name, environment);

        let tracer_provider = tracer_provider(settings, resource.clone())?;
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = meter_provider(settings, resource)?;
        global::set_meter_provider(meter_provider.clone());

        let otel_layer =
            tracing_opentelemetry::layer().with_tracer(global::tracer(service_name.to_string()));
        crate::logging::install(environment, otel_layer);

        tracing::info!(
            endpoint = %settings.endpoint,
            metric_interval_ms = settings.metric_interval.as_millis() as u64,
            trace_ratio = settings.trace_ratio,
            "OTLP export enabled"
        );

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }

    /// Export telemetry when an OTLP endpoint is configured, otherwise fall
    /// back to plain logging.
    pub fn from_env(service_name: &str, environment: Environment) -> anyhow::Result<Option<Self>> {
        match ExportSettings::from_env() {
            Some(settings) => Self::init(service_name, &settings, environment).map(Some),
            None => {
                crate::setup_logging(environment);
                Ok(None)
            }
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {:?}", e);
        }
    }
}

fn service_resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn tracer_provider(settings: &ExportSettings, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(settings.endpoint.as_str())
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(settings.sampler())
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(settings: &ExportSettings, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(settings.endpoint.as_str())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(settings.metric_interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
    ($name:literal, $($field:tt)+) => {
        tracing::info_span!($name, $($field)+).entered()
    };
}

/// Creates a debug-level span and enters it.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
}

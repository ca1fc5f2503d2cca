//! Logging and OpenTelemetry initialization
//!
//! Log output goes to stdout as text or JSON. Spans are additionally exported
//! over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use std::env;

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{self, Sampler},
    Resource,
};
use tracing::info;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, prelude::*, registry::LookupSpan, EnvFilter, Layer};

use crate::config::{LogFormat, OperatorConfig};
use crate::error::{Error, Result};

const SERVICE_NAME: &str = "mariadb-operator";

/// Install the global subscriber
pub fn init_tracing(config: &OperatorConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive(&config.log_level))
        .from_env_lossy();

    let fmt_layer = match config.log_format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let otel_layer = init_telemetry(&registry)?;
        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::ConfigError(format!("failed to install subscriber: {e}")))?;
        info!("OpenTelemetry tracing initialized");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::ConfigError(format!("failed to install subscriber: {e}")))?;
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
    Ok(())
}

fn default_directive(level: &str) -> Directive {
    level
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into())
}

/// Build the OTLP export layer
pub fn init_telemetry<S>(_subscriber: &S) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let resource = Resource::new(vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("service.build.commit", env!("GIT_SHA")),
    ]);

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&otlp_endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config()
                .with_resource(resource)
                .with_sampler(Sampler::AlwaysOn),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("failed to initialize OTLP exporter: {e}")))?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Flush and shut down the tracer provider
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

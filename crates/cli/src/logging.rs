use anyhow::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use opentelemetry::{global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace as sdk_trace};
use tracing_opentelemetry::OpenTelemetryLayer;

type OtelLayer = OpenTelemetryLayer<tracing_subscriber::Registry, sdk_trace::SdkTracer>;

static TRACER_PROVIDER: OnceLock<sdk_trace::SdkTracerProvider> = OnceLock::new();

/// Initialize logging for the CLI
pub fn init_logging(log_level: Level, data_dir: &Path, no_file_log: bool) -> Result<()> {
    // Initialize OpenTelemetry if OTLP_ENDPOINT is set
    let otel_layer = init_opentelemetry()?;

    if no_file_log {
        init_stderr_logging(log_level, otel_layer)
    } else {
        init_file_logging(log_level, data_dir, otel_layer)
    }
}

/// Initialize OpenTelemetry if OTLP_ENDPOINT environment variable is set
fn init_opentelemetry() -> Result<Option<OtelLayer>> {
    let Ok(endpoint) = std::env::var("OTLP_ENDPOINT") else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = sdk_trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name("authfetch").build())
        .build();

    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer("authfetch");
    let _ = TRACER_PROVIDER.set(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Flush and shut down the OTLP exporter, if one was started
pub fn shutdown_opentelemetry() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        eprintln!("failed to shut down OpenTelemetry: {e}");
    }
}

fn env_filter(level: Level) -> EnvFilter {
    let level_str = level.as_str().to_lowercase();
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("authfetch={level_str},authfetch_client={level_str}").into())
}

fn init_file_logging(level: Level, data_dir: &Path, otel_layer: Option<OtelLayer>) -> Result<()> {
    let env_filter = env_filter(level);

    if let Some(otel) = otel_layer {
        tracing_subscriber::registry()
            .with(otel)
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        let log_file_path = log_file_path(data_dir);
        if let Some(parent) = log_file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(log_file)
                    .with_ansi(false),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn init_stderr_logging(level: Level, otel_layer: Option<OtelLayer>) -> Result<()> {
    let env_filter = env_filter(level);

    if let Some(otel) = otel_layer {
        tracing_subscriber::registry()
            .with(otel)
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn log_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("authfetch.log")
}

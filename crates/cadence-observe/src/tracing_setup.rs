//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use cadence_types::config::LoggingConfig;
//!
//! cadence_observe::tracing_setup::init_tracing(&LoggingConfig::default()).unwrap();
//! // ... run the engine ...
//! cadence_observe::tracing_setup::shutdown_tracing();
//! ```

use std::sync::OnceLock;

use cadence_types::config::LoggingConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Initialize the global tracing subscriber from `config`.
///
/// - Log lines go to stderr so command output on stdout stays clean.
/// - `RUST_LOG`, when set, overrides `config.filter`.
/// - `config.json` switches the fmt layer to one JSON object per line.
/// - `config.otel` additionally bridges spans to OpenTelemetry through a
///   stdout exporter.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a global subscriber
/// has already been installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = build_filter(std::env::var("RUST_LOG").ok(), &config.filter)?;

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    let otel_layer = config.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("cadence");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// `RUST_LOG` directives when present and non-empty, else `fallback`.
fn build_filter(env: Option<String>, fallback: &str) -> Result<EnvFilter, ParseError> {
    match env.filter(|s| !s.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_new(fallback),
    }
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directives_take_precedence() {
        let filter = build_filter(Some("cadence_core=trace".to_string()), "warn").unwrap();
        assert_eq!(filter.to_string(), "cadence_core=trace");
    }

    #[test]
    fn blank_env_falls_back_to_config() {
        let filter = build_filter(Some("  ".to_string()), "info,cadence_core=debug").unwrap();
        assert!(filter.to_string().contains("cadence_core=debug"));
    }

    #[test]
    fn invalid_directive_is_an_error() {
        assert!(build_filter(None, "cadence_core=loud").is_err());
    }
}

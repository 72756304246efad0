//! Logging and Trace Export
//!
//! Installs the process-wide `tracing` subscriber: a console formatter
//! filtered by `RUST_LOG`, plus an optional OTLP span exporter.
//!
//! Session operations run inside a `session` span carrying `session_id` and
//! `phase`; decode tasks run in a child `decode` span. Routed records are
//! logged under the `events` target.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: [`DEFAULT_DIRECTIVES`])
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: gRPC endpoint; setting it enables export
//! - `OTEL_ENABLED`: `true` exports to the default endpoint, `false` disables
//!   export even when an endpoint is set
//! - `OTEL_SERVICE_NAME`: service name on exported spans
//!
//! Export is off unless one of the first two asks for it.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVES: &str = "alpaca_stream_client=info,events=info,tungstenite=warn,tokio_tungstenite=warn,hyper=warn,tonic=warn";

const DEFAULT_SERVICE_NAME: &str = "alpaca-stream-client";

/// OTLP gRPC port on localhost.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Check if spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to flush trace export: {e}");
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives for console output and export.
    pub directives: String,
    /// OTLP endpoint; `None` disables export.
    pub otlp_endpoint: Option<String>,
    /// Service name on exported spans.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            directives: DEFAULT_DIRECTIVES.to_string(),
            otlp_endpoint: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self::from_values(
            var("RUST_LOG").as_deref(),
            var("OTEL_ENABLED").as_deref(),
            var("OTEL_EXPORTER_OTLP_ENDPOINT").as_deref(),
            var("OTEL_SERVICE_NAME").as_deref(),
        )
    }

    /// Build settings from raw variable values.
    #[must_use]
    pub fn from_values(
        rust_log: Option<&str>,
        enabled: Option<&str>,
        endpoint: Option<&str>,
        service_name: Option<&str>,
    ) -> Self {
        let directives = rust_log
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DIRECTIVES)
            .to_string();

        let endpoint = endpoint.map(str::trim).filter(|e| !e.is_empty());
        let otlp_endpoint = match enabled.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("false" | "0") => None,
            Some("true" | "1") => Some(endpoint.unwrap_or(DEFAULT_OTLP_ENDPOINT).to_string()),
            _ => endpoint.map(str::to_string),
        };

        let service_name = service_name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVICE_NAME)
            .to_string();

        Self {
            directives,
            otlp_endpoint,
            service_name,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.directives).unwrap_or_else(|e| {
            eprintln!("Ignoring invalid log filter {:?}: {e}", self.directives);
            EnvFilter::new(DEFAULT_DIRECTIVES)
        })
    }
}

/// Install the subscriber using settings from the environment.
///
/// Keep the returned guard alive until shutdown.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the subscriber with explicit settings.
///
/// If the exporter cannot be built, logging continues on the console alone.
#[must_use]
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let (tracer_provider, export_error) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => match build_tracer_provider(endpoint, &config.service_name) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
    {
        eprintln!("Subscriber already installed: {e}");
    }

    match (&config.otlp_endpoint, export_error) {
        (Some(endpoint), Some(e)) => tracing::warn!(
            endpoint = %endpoint,
            error = %e,
            "Span export unavailable; logging to console only"
        ),
        (Some(endpoint), None) => tracing::info!(endpoint = %endpoint, "Exporting spans"),
        (None, _) => {}
    }

    TelemetryGuard { tracer_provider }
}

fn build_tracer_provider(
    endpoint: &str,
    service_name: &str,
) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_is_off_by_default() {
        let config = TelemetryConfig::from_values(None, None, None, None);
        assert_eq!(config, TelemetryConfig::default());
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn endpoint_enables_export() {
        let config = TelemetryConfig::from_values(None, None, Some("http://otel:4317"), None);
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://otel:4317"));
    }

    #[test]
    fn enabled_flag_uses_local_endpoint() {
        let config = TelemetryConfig::from_values(None, Some("TRUE"), None, None);
        assert_eq!(config.otlp_endpoint.as_deref(), Some(DEFAULT_OTLP_ENDPOINT));
    }

    #[test]
    fn disabled_flag_overrides_endpoint() {
        let config = TelemetryConfig::from_values(None, Some("false"), Some("http://otel:4317"), None);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn rust_log_and_service_name_are_taken_verbatim() {
        let config = TelemetryConfig::from_values(
            Some("alpaca_stream_client=debug"),
            None,
            None,
            Some("paper-feed"),
        );
        assert_eq!(config.directives, "alpaca_stream_client=debug");
        assert_eq!(config.service_name, "paper-feed");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = TelemetryConfig::from_values(Some("  "), Some(""), Some(" "), Some(""));
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    fn invalid_directives_fall_back() {
        let config = TelemetryConfig {
            directives: "alpaca_stream_client=loud".to_string(),
            ..TelemetryConfig::default()
        };
        assert_eq!(
            config.env_filter().to_string(),
            EnvFilter::new(DEFAULT_DIRECTIVES).to_string()
        );
    }

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }
}

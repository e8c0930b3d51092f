//! Logging and tracing setup for the `switchyard` binary.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `SWITCHYARD_LOG_FORMAT=json` | Newline-delimited JSON logs instead of the compact format. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL; enables span export. |

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Keep the returned guard alive until the process exits; dropping it
/// flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("SWITCHYARD_LOG_FORMAT").as_deref() == Ok("json");
    let provider = build_provider(service_name);

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("switchyard")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(use_json.then(|| fmt::layer().with_target(true).json()))
        .with((!use_json).then(|| fmt::layer().with_target(true).compact()))
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the OTLP tracer provider down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[switchyard] OpenTelemetry shutdown error: {e}");
        }
    }
}

/// The collector URL, if one is configured. An empty value counts as unset.
fn otlp_endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = otlp_endpoint()?;
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.as_str())
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("[switchyard] span export to {endpoint} disabled: {e}");
            return None;
        }
    };

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build();

    // The bridge loop is synchronous; there is no runtime for a batch exporter.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

use std::sync::Mutex;
use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{SERVICE_NAME, SERVICE_VERSION},
    resource::DEPLOYMENT_ENVIRONMENT_NAME,
};
use rocket::{
    Data, Request, Response,
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
};
use tonic::metadata::MetadataMap;
use tonic::transport::ClientTlsConfig;
use tracing::{Span, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_OTLP_ENDPOINT: &str = "https://api.honeycomb.io:443";

static TRACER_PROVIDER: Lazy<Mutex<Option<SdkTracerProvider>>> = Lazy::new(|| Mutex::new(None));

/// Span plus start time for one request, kept in the request-local cache.
struct RequestTimer {
    span: Span,
    started: Instant,
}

impl RequestTimer {
    fn open(request: &Request<'_>) -> Self {
        let method = request.method();
        let path = request.uri().path();

        let span = info_span!(
            "http_request",
            otel.name = %format!("{} {}", method, path),
            http.method = %method,
            http.uri = %path,
            http.route = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            http.duration_ms = tracing::field::Empty,
        );

        Self {
            span,
            started: Instant::now(),
        }
    }
}

pub struct TelemetryFairing;

#[rocket::async_trait]
impl Fairing for TelemetryFairing {
    fn info(&self) -> Info {
        Info {
            name: "Request tracing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let timer = RequestTimer::open(request);
        request.local_cache(|| timer);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let timer = request.local_cache(|| RequestTimer::open(request));
        let elapsed = timer.started.elapsed().as_millis() as i64;
        let status = response.status();

        // The route is only known once routing has happened.
        if let Some(route) = request.route() {
            timer.span.record("http.route", tracing::field::display(&route.uri));
        }
        timer.span.record("http.status_code", status.code);
        timer.span.record("http.duration_ms", elapsed);

        let _entered = timer.span.enter();
        match status.class() {
            StatusClass::ServerError => {
                warn!(status = status.code, elapsed_ms = elapsed, "request failed")
            }
            _ => info!(status = status.code, elapsed_ms = elapsed, "request completed"),
        }
    }
}

fn resource() -> Resource {
    let environment =
        std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

    Resource::builder()
        .with_schema_url(
            [
                KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, environment),
            ],
            SCHEMA_URL,
        )
        .build()
}

fn build_tracer_provider(api_key: &str) -> Result<SdkTracerProvider, Box<dyn std::error::Error>> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

    let mut metadata = MetadataMap::new();
    metadata.insert("x-honeycomb-team", api_key.parse()?);

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_tls_config(ClientTlsConfig::new().with_native_roots())
        .with_protocol(Protocol::Grpc)
        .with_metadata(metadata)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build())
}

/// Installs the global subscriber. Spans are exported over OTLP only when
/// `HONEYCOMB_API_KEY` is set; otherwise output goes to stdout alone.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = match std::env::var("HONEYCOMB_API_KEY") {
        Ok(key) if !key.trim().is_empty() => match build_tracer_provider(&key) {
            Ok(provider) => Some(provider),
            Err(e) => {
                eprintln!("OTLP exporter unavailable, logging to stdout only: {}", e);
                None
            }
        },
        _ => None,
    };

    let otel_layer = provider
        .as_ref()
        .map(|p| OpenTelemetryLayer::new(p.tracer(env!("CARGO_PKG_NAME"))));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init();

    if installed.is_err() {
        return;
    }

    if let (Some(provider), Ok(mut slot)) = (provider, TRACER_PROVIDER.lock()) {
        *slot = Some(provider);
    }
}

/// Flushes pending spans. Safe to call when no exporter was installed.
pub fn shutdown_telemetry() {
    let provider = TRACER_PROVIDER.lock().ok().and_then(|mut slot| slot.take());

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to flush spans on shutdown: {:?}", e);
        }
    }
}

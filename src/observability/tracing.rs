//! tracing サブスクライバの初期化と OTLP エクスポート。
use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::{Level, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::filter_fn, layer::SubscriberExt, util::SubscriberInitExt,
};

use super::structured_log::{StructuredLogLayer, handles_level};

const SERVICE_NAME: &str = "author-cluster";
const LOG_FILTER_ENV: &str = "AUTHOR_CLUSTER_LOG";

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// `AUTHOR_CLUSTER_LOG`、`RUST_LOG` の順に見て、どちらも無ければ `info`。
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 構造化ログレイヤーが有効な間、警告以上のイベントは JSON fmt レイヤーに出さない。
fn fmt_accepts(level: &Level, is_event: bool, structured_enabled: bool) -> bool {
    !(structured_enabled && is_event && handles_level(level))
}

/// Tracing サブスクライバを一度だけ初期化する。
///
/// ログは標準エラー出力に JSON で出す（標準出力はレポート用）。
/// `OTEL_EXPORTER_OTLP_ENDPOINT` が設定されていれば OTLP でもスパンを送り、
/// そうでなければ警告以上は構造化ログレイヤーだけが出す。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init() -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty());
        let (tracer, otel_error) = match endpoint.as_deref().map(init_tracer) {
            Some(Ok(tracer)) => (Some(tracer), None),
            Some(Err(error)) => (None, Some(error)),
            None => (None, None),
        };
        let otel_enabled = tracer.is_some();
        let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));
        let structured_enabled = !otel_enabled;
        let structured_layer = structured_enabled.then_some(StructuredLogLayer);
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .with_filter(filter_fn(move |metadata| {
                fmt_accepts(metadata.level(), metadata.is_event(), structured_enabled)
            }));

        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .with(otel_layer)
            .with(structured_layer)
            .try_init()
            .map_err(|e| Error::msg(e.to_string()))?;

        match otel_error {
            Some(error) => warn!(
                error = %error,
                endpoint = endpoint.as_deref().unwrap_or_default(),
                "OpenTelemetry exporter unavailable, spans stay local"
            ),
            None => info!(otel_enabled, "tracing initialized"),
        }
        Ok::<(), Error>(())
    })?;
    Ok(())
}

/// OTLP エクスポーター経由のトレーサー。サンプリング比率は `OTEL_SAMPLING_RATIO`（既定 1.0）。
fn init_tracer(endpoint: &str) -> Result<SdkTracer> {
    let sampling_ratio = std::env::var("OTEL_SAMPLING_RATIO")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(provider.clone());
    let _ = TRACER_PROVIDER.set(provider);
    Ok(tracer)
}

/// 未送信のスパンをフラッシュする。CLI の終了直前に呼ぶ。
pub fn shutdown() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(error) = provider.shutdown() {
            eprintln!("failed to shut down tracer provider: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_go_to_a_single_layer() {
        for level in [Level::WARN, Level::ERROR] {
            assert!(!fmt_accepts(&level, true, true));
            assert!(fmt_accepts(&level, true, false));
        }
        for level in [Level::INFO, Level::DEBUG, Level::TRACE] {
            assert!(fmt_accepts(&level, true, true));
        }
    }

    #[test]
    fn warn_spans_stay_in_fmt_context() {
        assert!(fmt_accepts(&Level::WARN, false, true));
    }
}

//! 警告以上のイベントを、フィールド名に名前空間を付けた1行 JSON で出すレイヤー。
use std::fmt;

use serde_json::{Map, Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

const FIELD_PREFIX: &str = "author_cluster.";

pub(crate) struct StructuredLogLayer;

/// このレイヤーが受け持つレベル（警告とエラー）。
pub(crate) fn handles_level(level: &Level) -> bool {
    matches!(*level, Level::WARN | Level::ERROR)
}

#[derive(Default)]
struct FieldCollector {
    values: Map<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        let key = match field.name() {
            "message" => "message".to_string(),
            name => format!("{FIELD_PREFIX}{name}"),
        };
        self.values.insert(key, value);
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, json!(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, json!(value));
    }
}

impl<S> Layer<S> for StructuredLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if !handles_level(&level) {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        // 実験ステージなど、どのスパンの中で起きたかを残す
        let span = ctx.event_span(event).map(|span| span.name());

        let entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "target": event.metadata().target(),
            "span": span,
            "fields": collector.values,
        });
        eprintln!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }
}

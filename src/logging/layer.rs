//! `tracing` layer that feeds every event into a [`LogHub`].

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use super::{LogEvent, LogHub};

/// Span fields captured at creation and on `record`.
#[derive(Debug, Default)]
struct SpanFields(Map<String, Value>);

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::from(format!("{value:?}")));
    }
}

/// Layer forwarding events to a hub.
#[derive(Debug, Clone)]
pub struct HubLayer {
    hub: Arc<LogHub>,
}

impl HubLayer {
    #[must_use]
    pub fn new(hub: Arc<LogHub>) -> Self {
        Self { hub }
    }
}

impl<S> Layer<S> for HubLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(fields) => fields.0.extend(visitor.fields),
            None => extensions.insert(SpanFields(visitor.fields)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut attrs = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<SpanFields>()
                    && !fields.0.is_empty()
                {
                    attrs.insert(span.name().to_string(), Value::Object(fields.0.clone()));
                }
            }
        }
        attrs.extend(visitor.fields);

        let metadata = event.metadata();
        let mut log = LogEvent::now(metadata.level().as_str(), visitor.message.unwrap_or_default());
        log.attrs = attrs;
        self.hub.publish(&log);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tracing_subscriber::prelude::*;

    use super::*;

    #[test]
    fn test_layer_captures_message_fields_and_span_groups() {
        let hub = Arc::new(LogHub::new(16));
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with(HubLayer::new(Arc::clone(&hub)));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("job", platform = "bilibili");
            let _guard = span.enter();
            tracing::info!(note_id = "BV1", count = 3, "saved note");
        });

        let lines = hub.recent(0);
        assert_eq!(lines.len(), 1);
        let event: LogEvent = serde_json::from_str(lines[0].trim_end()).unwrap();
        assert_eq!(event.level, "INFO");
        assert_eq!(event.msg, "saved note");
        assert_eq!(event.attrs["note_id"], "BV1");
        assert_eq!(event.attrs["count"], 3);
        assert_eq!(event.attrs["job"]["platform"], "bilibili");
    }
}

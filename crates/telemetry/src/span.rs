//! Operation Spans
//!
//! Each one-shot operation (connect, fault-code retrieval, single reads)
//! runs inside an [`OperationSpan`], a `tracing` span named through
//! `otel.name`. Namespaced attributes are set on the span through
//! `tracing-opentelemetry`, the outcome is recorded in `otel.status_code`,
//! and a summary event is logged inside the span when it ends.

use crate::context::{AttributeValue, VehicleContext};
use opentelemetry::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::field::Empty;
use tracing::{debug, debug_span, info, info_span, warn, Level};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Log target of span summary events
pub const TRACE_TARGET: &str = "obd_trace";

/// Outcome of a span
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(String),
}

impl SpanStatus {
    /// Value recorded in `otel.status_code`
    pub fn code(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "OK",
            SpanStatus::Error(_) => "ERROR",
        }
    }
}

/// Snapshot of a completed span
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub name: String,
    pub status: SpanStatus,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl FinishedSpan {
    /// Value of one attribute
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, SpanStatus::Error(_))
    }
}

/// Extra destination for finished spans, next to the tracing pipeline
pub trait TraceSink: Send + Sync {
    fn export(&self, span: FinishedSpan);
}

/// Keeps finished spans in memory
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All finished spans, oldest first
    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent span with this name
    pub fn find(&self, name: &str) -> Option<FinishedSpan> {
        self.spans().into_iter().rev().find(|s| s.name == name)
    }
}

impl TraceSink for MemoryTraceSink {
    fn export(&self, span: FinishedSpan) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
    }
}

/// Starts operation spans with a fixed attribute prefix
#[derive(Clone)]
pub struct Tracer {
    prefix: Arc<str>,
    context: Option<Arc<VehicleContext>>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl Tracer {
    /// Create a tracer writing `<prefix>.<metric>` attributes
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Arc::from(prefix.into()),
            context: None,
            sink: None,
        }
    }

    /// Also hand every finished span to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Tracer that stamps the vehicle's VIN on every span
    pub fn with_context(&self, context: Arc<VehicleContext>) -> Self {
        Self {
            prefix: self.prefix.clone(),
            context: Some(context),
            sink: self.sink.clone(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn context(&self) -> Option<&VehicleContext> {
        self.context.as_deref()
    }

    /// `<prefix>.<metric>`
    pub fn attribute_key(&self, metric: &str) -> String {
        format!("{}.{}", self.prefix, metric)
    }

    /// Start an info-level span
    pub fn start(&self, name: impl Into<String>) -> OperationSpan {
        let name = name.into();
        let span = info_span!(
            "operation",
            otel.name = %name,
            otel.status_code = Empty,
            otel.status_message = Empty,
        );
        self.open(name, span, Level::INFO)
    }

    /// Start a debug-level span, for per-update work
    pub fn start_debug(&self, name: impl Into<String>) -> OperationSpan {
        let name = name.into();
        let span = debug_span!(
            "operation",
            otel.name = %name,
            otel.status_code = Empty,
            otel.status_message = Empty,
        );
        self.open(name, span, Level::DEBUG)
    }

    fn open(&self, name: String, span: tracing::Span, level: Level) -> OperationSpan {
        let mut operation = OperationSpan {
            name,
            span,
            level,
            prefix: self.prefix.clone(),
            attributes: Vec::new(),
            status: SpanStatus::Ok,
            sink: self.sink.clone(),
            finished: false,
        };
        if let Some(vin) = self.context.as_ref().and_then(|c| c.vin.clone()) {
            operation.set_metric("vin", vin);
        }
        operation
    }
}

/// A running span; ends on [`OperationSpan::end`] or when dropped
pub struct OperationSpan {
    name: String,
    span: tracing::Span,
    level: Level,
    prefix: Arc<str>,
    attributes: Vec<(String, AttributeValue)>,
    status: SpanStatus,
    sink: Option<Arc<dyn TraceSink>>,
    finished: bool,
}

impl OperationSpan {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying `tracing` span, for `Instrument` on async work
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Set `<prefix>.<metric>`
    pub fn set_metric(&mut self, metric: &str, value: impl Into<AttributeValue>) {
        let key = format!("{}.{}", self.prefix, metric);
        self.set_attribute(key, value);
    }

    /// Set an attribute, replacing any previous value for the key
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        self.span.set_attribute(key.clone(), otel_value(&value));
        match self.attributes.iter_mut().find(|entry| entry.0 == key) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Mark the span failed
    pub fn set_error(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        self.span.record("otel.status_message", detail.as_str());
        self.status = SpanStatus::Error(detail);
    }

    pub fn status(&self) -> &SpanStatus {
        &self.status
    }

    pub fn attributes(&self) -> &[(String, AttributeValue)] {
        &self.attributes
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.span.record("otel.status_code", self.status.code());

        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.span.in_scope(|| match &self.status {
            SpanStatus::Error(detail) => warn!(
                target: TRACE_TARGET,
                operation = %self.name,
                error = %detail,
                attributes = %attributes,
                "operation failed"
            ),
            SpanStatus::Ok if self.level == Level::DEBUG => debug!(
                target: TRACE_TARGET,
                operation = %self.name,
                attributes = %attributes,
                "operation finished"
            ),
            SpanStatus::Ok => info!(
                target: TRACE_TARGET,
                operation = %self.name,
                attributes = %attributes,
                "operation finished"
            ),
        });

        if let Some(sink) = &self.sink {
            sink.export(FinishedSpan {
                name: self.name.clone(),
                status: self.status.clone(),
                attributes: std::mem::take(&mut self.attributes),
            });
        }
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

fn otel_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Str(s) => Value::from(s.clone()),
        AttributeValue::Int(i) => Value::I64(*i),
        AttributeValue::Float(v) => Value::F64(*v),
    }
}

// src/telemetry.rs
//
// Telemetry sinks: where metric records and free-text messages go.
// Recording is fire-and-forget; a sink never fails the run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{MetricDefinition, MetricRecord};

/// Destination for metrics and run messages
pub trait TelemetrySink: Send + Sync {
    fn record_metric(&self, def: &MetricDefinition, value: f64);
    fn record_message(&self, message: &str);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone)]
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl TelemetrySink for TracingSink {
    fn record_metric(&self, def: &MetricDefinition, value: f64) {
        debug!(
            "[{}] metric {}={} {} (dir {})",
            self.label, def.name, value, def.unit, def.improvement_dir
        );
    }

    fn record_message(&self, message: &str) {
        info!("[{}] {}", self.label, message);
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    metrics: Mutex<Vec<MetricRecord>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.metrics.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Number of records whose name starts with `prefix`
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.metrics
            .lock()
            .iter()
            .filter(|r| r.name.starts_with(prefix))
            .count()
    }

    pub fn find(&self, name: &str) -> Option<MetricRecord> {
        self.metrics.lock().iter().find(|r| r.name == name).cloned()
    }
}

impl TelemetrySink for RecordingSink {
    fn record_metric(&self, def: &MetricDefinition, value: f64) {
        self.metrics.lock().push(MetricRecord::new(def, value));
    }

    fn record_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum JsonlEvent<'a> {
    Metric {
        ts: i64,
        instance: &'a str,
        #[serde(flatten)]
        record: &'a MetricRecord,
    },
    Message {
        ts: i64,
        instance: &'a str,
        message: &'a str,
    },
}

/// Appends one JSON object per event to a results file
///
/// Shared by every worker of a local swarm; each line carries the instance label.
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open results file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sink view that stamps every event with `instance`
    pub fn for_instance(self: &Arc<Self>, instance: impl Into<String>) -> InstanceJsonlSink {
        InstanceJsonlSink {
            inner: Arc::clone(self),
            instance: instance.into(),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }

    fn write_event(&self, event: &JsonlEvent<'_>) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize telemetry event: {}", e);
                return;
            }
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line) {
            warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().flush() {
            warn!("Failed to flush {}: {}", self.path.display(), e);
        }
    }
}

/// `JsonlSink` bound to one worker's label
pub struct InstanceJsonlSink {
    inner: Arc<JsonlSink>,
    instance: String,
}

impl TelemetrySink for InstanceJsonlSink {
    fn record_metric(&self, def: &MetricDefinition, value: f64) {
        let record = MetricRecord::new(def, value);
        self.inner.write_event(&JsonlEvent::Metric {
            ts: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            instance: &self.instance,
            record: &record,
        });
    }

    fn record_message(&self, message: &str) {
        self.inner.write_event(&JsonlEvent::Message {
            ts: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            instance: &self.instance,
            message,
        });
    }
}

/// Forwards every event to several sinks
#[derive(Default, Clone)]
pub struct TeeSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for TeeSink {
    fn record_metric(&self, def: &MetricDefinition, value: f64) {
        for sink in &self.sinks {
            sink.record_metric(def, value);
        }
    }

    fn record_message(&self, message: &str) {
        for sink in &self.sinks {
            sink.record_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ImprovementDir;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.record_metric(&MetricDefinition::time_to_find(0), 10.0);
        sink.record_metric(&MetricDefinition::peers_found(0), 2.0);
        sink.record_message("hello");

        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.count_with_prefix("time-to-find-"), 1);
        assert_eq!(sink.find("peers-found-0").unwrap().value, 2.0);
        assert_eq!(sink.messages(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_tee_forwards_to_all() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let tee = TeeSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingSink::new("test")));
        assert_eq!(tee.len(), 3);

        tee.record_metric(&MetricDefinition::time_to_provide(1), 5.0);
        tee.record_message("Provided CID: x");
        assert_eq!(a.records().len(), 1);
        assert_eq!(b.messages().len(), 1);
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        let sink = Arc::new(JsonlSink::create(&path).unwrap());
        let w1 = sink.for_instance("worker-1");
        w1.record_metric(
            &MetricDefinition::new("peers-found-0", "peers", ImprovementDir::HigherIsBetter),
            3.0,
        );
        w1.record_message("Provided CID: abc");
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "metric");
        assert_eq!(lines[0]["instance"], "worker-1");
        assert_eq!(lines[0]["name"], "peers-found-0");
        assert_eq!(lines[0]["improvement_dir"], 1);
        assert_eq!(lines[0]["value"], 3.0);
        assert_eq!(lines[1]["type"], "message");
        assert_eq!(lines[1]["message"], "Provided CID: abc");
    }
}

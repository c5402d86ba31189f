use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Checkpoints a run reports to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PlannerStart,
    PlannerEnd,
    ResearcherStart,
    ResearcherStepStart,
    ResearcherStepEnd,
    ResearcherEnd,
    ReporterStart,
    ReporterEnd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub seq: u64,
}

/// Where progress notifications go. Delivery failures are reported back but
/// never abort a run.
pub trait ProgressSink: Send + Sync {
    fn send(&self, event: &ProgressEvent) -> Result<()>;
}

/// Numbers events and swallows delivery failures.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    seq: Arc<AtomicU64>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, kind: MessageKind, payload: serde_json::Value) {
        let event = ProgressEvent {
            kind,
            payload,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        if let Err(e) = self.sink.send(&event) {
            warn!(kind = ?event.kind, seq = event.seq, "Progress delivery failed: {:#}", e);
        }
    }
}

/// Writes every event to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn send(&self, event: &ProgressEvent) -> Result<()> {
        info!(kind = ?event.kind, seq = event.seq, "progress");
        debug!(payload = %event.payload, "progress payload");
        Ok(())
    }
}

/// Forwards events to a channel consumer, e.g. a UI stream.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn send(&self, event: &ProgressEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow!("progress receiver closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_sink_sequences_events() {
        let (sink, mut rx) = ChannelSink::new();
        let reporter = ProgressReporter::new(Arc::new(sink));
        reporter.emit(MessageKind::PlannerStart, json!(""));
        reporter.emit(MessageKind::PlannerEnd, json!(["step"]));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, MessageKind::PlannerStart);
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(second.payload, json!(["step"]));
    }

    #[test]
    fn test_closed_receiver_does_not_panic() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(sink
            .send(&ProgressEvent {
                kind: MessageKind::ReporterStart,
                payload: json!(null),
                seq: 0,
            })
            .is_err());
        let reporter = ProgressReporter::new(Arc::new(sink));
        reporter.emit(MessageKind::ReporterStart, json!(null));
    }

    #[test]
    fn test_kind_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageKind::ResearcherStepStart).unwrap(),
            "\"researcher_step_start\""
        );
    }
}

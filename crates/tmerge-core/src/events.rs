use std::path::PathBuf;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

/// What happened to one media file's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataStatus {
    FoundAndApplied,
    InheritedFromOriginal,
    NoMetadataFound,
    MetadataFoundLate,
}

/// Outcome of processing one media file. Exactly one per discovered file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub filename: String,
    pub original_path: PathBuf,
    pub metadata_status: MetadataStatus,
    pub processed_with_metadata: bool,
    pub output_path: Option<PathBuf>,
    /// Set when the file degraded to a plain copy or could not be written
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-archive state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArchiveStage {
    Extracting,
    Discovering,
    ProcessingFiles { index: u64, total: u64 },
    CleaningUp,
    Completed,
    Failed(String),
}

/// Everything the core reports while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessEvent {
    Status(String),
    Stage {
        archive: String,
        stage: ArchiveStage,
    },
    FileStarted {
        archive: String,
        filename: String,
    },
    Progress {
        archive: String,
        fraction: f64,
        total: u64,
        processed: u64,
    },
    FileResult(ProcessingResult),
}

/// Receiver of [`ProcessEvent`]s. Implementations may be called from a
/// worker thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProcessEvent);
}

impl<F> EventSink for F
where
    F: Fn(ProcessEvent) + Send + Sync,
{
    fn emit(&self, event: ProcessEvent) {
        self(event)
    }
}

/// Lets a presentation layer own a single consumer loop.
impl EventSink for Sender<ProcessEvent> {
    fn emit(&self, event: ProcessEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProcessEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |e: ProcessEvent| seen.lock().unwrap().push(e);
        sink.emit(ProcessEvent::Status("hello".into()));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        tx.emit(ProcessEvent::Status("one".into()));
        assert_eq!(rx.recv().unwrap(), ProcessEvent::Status("one".into()));
        drop(rx);
        tx.emit(ProcessEvent::Status("two".into()));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_string(&MetadataStatus::InheritedFromOriginal).unwrap();
        assert_eq!(json, "\"inheritedFromOriginal\"");
    }
}

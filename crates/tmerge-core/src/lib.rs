pub mod cancel;
pub mod embed;
pub mod error;
pub mod events;
pub mod extract;
pub mod media;
pub mod orchestrator;
pub mod pipeline;
pub mod record;
pub mod resolve;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use cancel::CancellationToken;
pub use error::{EmbedError, Error, ExtractionError, RecordError, Result};
pub use events::{ArchiveStage, EventSink, MetadataStatus, NullSink, ProcessEvent, ProcessingResult};
pub use extract::{CommandExtractor, DirectoryExtractor, DittoExtractor, Extractor};
pub use orchestrator::{ArchiveReport, BatchReport, Orchestrator};
pub use pipeline::{ArchivePipeline, ArchiveSummary};
pub use record::MetadataRecord;

fn default_true() -> bool {
    true
}

/// Configuration of one run. Nothing is persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub archives: Vec<PathBuf>,
    pub output: PathBuf,
    /// Parent of the temporary extraction directories (system temp if unset)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub keep_extracted: bool,
    #[serde(default)]
    pub stop_on_archive_failure: bool,
    /// Rewrite files whose sidecar only turns up during reprocessing
    #[serde(default = "default_true")]
    pub reembed_late_matches: bool,
}

impl ProcessOptions {
    pub fn new(archives: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            archives,
            output,
            work_dir: None,
            keep_extracted: false,
            stop_on_archive_failure: false,
            reembed_late_matches: true,
        }
    }

    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = Some(work_dir);
        self
    }

    pub fn with_stop_on_archive_failure(mut self, stop: bool) -> Self {
        self.stop_on_archive_failure = stop;
        self
    }
}

/// Run the full batch on the calling thread.
pub fn process(
    options: ProcessOptions,
    extractor: Arc<dyn Extractor>,
    sink: &dyn EventSink,
) -> BatchReport {
    Orchestrator::new(options, extractor).run(sink)
}

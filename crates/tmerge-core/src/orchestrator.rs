use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::embed::embed;
use crate::error::{Error, Result};
use crate::events::{EventSink, MetadataStatus, ProcessEvent, ProcessingResult};
use crate::extract::Extractor;
use crate::media::MediaFile;
use crate::pipeline::ArchivePipeline;
use crate::resolve::{resolve, LookupScope};
use crate::ProcessOptions;

/// Outcome of one archive: the summary line, or why it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub archive: PathBuf,
    pub outcome: std::result::Result<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub archives: Vec<ArchiveReport>,
    pub results: Vec<ProcessingResult>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn failed_archives(&self) -> impl Iterator<Item = &ArchiveReport> {
        self.archives.iter().filter(|a| a.outcome.is_err())
    }

    pub fn count(&self, status: MetadataStatus) -> usize {
        self.results
            .iter()
            .filter(|r| r.metadata_status == status)
            .count()
    }
}

/// Runs a batch of archives strictly one at a time.
pub struct Orchestrator {
    options: ProcessOptions,
    extractor: Arc<dyn Extractor>,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(options: ProcessOptions, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            options,
            extractor,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Handle for cancelling or pausing a running batch.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Process every archive on the calling thread.
    ///
    /// A failed archive is recorded and the batch moves on, unless
    /// `stop_on_archive_failure` is set.
    pub fn run(&self, sink: &dyn EventSink) -> BatchReport {
        let options = &self.options;
        let mut report = BatchReport::default();

        if let Err(e) = fs::create_dir_all(&options.output) {
            error!("cannot create output directory {}: {}", options.output.display(), e);
            report.archives = options
                .archives
                .iter()
                .map(|a| ArchiveReport {
                    archive: a.clone(),
                    outcome: Err(e.to_string()),
                })
                .collect();
            return report;
        }

        let work_dir = options.work_dir.clone().unwrap_or_else(std::env::temp_dir);
        let mut pipeline =
            ArchivePipeline::new(&options.output, sink).with_cancel_token(&self.cancel_token);

        for (i, archive) in options.archives.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            sink.emit(ProcessEvent::Status(format!(
                "Archive {}/{}: {}",
                i + 1,
                options.archives.len(),
                archive.display()
            )));

            match pipeline.run(archive, self.extractor.as_ref(), &work_dir, options.keep_extracted) {
                Ok(summary) => {
                    let message = summary.message();
                    info!("{}: {}", archive.display(), message);
                    sink.emit(ProcessEvent::Status(message.clone()));
                    report.cancelled |= summary.cancelled;
                    report.results.extend(summary.results);
                    report.archives.push(ArchiveReport {
                        archive: archive.clone(),
                        outcome: Ok(message),
                    });
                }
                Err(e) => {
                    error!("{}: {}", archive.display(), e);
                    sink.emit(ProcessEvent::Status(format!("Failed {}: {}", archive.display(), e)));
                    report.archives.push(ArchiveReport {
                        archive: archive.clone(),
                        outcome: Err(e.to_string()),
                    });
                    if options.stop_on_archive_failure {
                        warn!("stopping batch after failed archive");
                        break;
                    }
                }
            }

            if report.cancelled {
                break;
            }
        }

        report
    }

    /// Run the batch on a dedicated worker thread.
    pub fn run_blocking<S>(self, sink: S) -> io::Result<JoinHandle<BatchReport>>
    where
        S: EventSink + 'static,
    {
        std::thread::Builder::new()
            .name("tmerge-batch".to_string())
            .spawn(move || self.run(&sink))
    }

    /// Run the batch from async code without blocking the executor.
    pub async fn run_async<S>(self, sink: S) -> Result<BatchReport>
    where
        S: EventSink + 'static,
    {
        tokio::task::spawn_blocking(move || self.run(&sink))
            .await
            .map_err(|e| Error::Worker(e.to_string()))
    }

    /// Look again for sidecars of files that ended up without metadata,
    /// this time in the merged output tree.
    ///
    /// Returns how many results changed to `metadataFoundLate`.
    pub fn reprocess(&self, results: &mut [ProcessingResult], sink: &dyn EventSink) -> usize {
        let output_root = &self.options.output;
        let mut candidates = 0usize;
        let mut found = 0usize;

        for result in results
            .iter_mut()
            .filter(|r| r.metadata_status == MetadataStatus::NoMetadataFound)
        {
            let Some(output) = result.output_path.clone() else { continue };
            candidates += 1;
            let Some(resolution) = resolve(&output, output_root, LookupScope::Primary) else {
                continue;
            };

            if self.options.reembed_late_matches {
                let Some(media) = MediaFile::new(output.clone(), output_root, "") else {
                    continue;
                };
                if let Err(e) = embed(&media, &resolution.record, &output) {
                    warn!("{}: late embedding failed: {}", result.filename, e);
                    continue;
                }
                if resolution.consumes_sidecar() {
                    if let Err(e) = fs::remove_file(&resolution.sidecar) {
                        warn!("could not remove {}: {}", resolution.sidecar.display(), e);
                    }
                }
            }

            result.metadata_status = MetadataStatus::MetadataFoundLate;
            result.processed_with_metadata = true;
            result.error = None;
            found += 1;
            sink.emit(ProcessEvent::FileResult(result.clone()));
        }

        sink.emit(ProcessEvent::Status(format!(
            "Reprocessing found metadata for {} / {} files",
            found, candidates
        )));
        found
    }
}

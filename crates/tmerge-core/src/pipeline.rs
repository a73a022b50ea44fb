use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::embed::{apply_file_times, copy_verbatim, embed};
use crate::error::Result;
use crate::events::{ArchiveStage, EventSink, MetadataStatus, ProcessEvent, ProcessingResult};
use crate::extract::Extractor;
use crate::media::{archive_label, MediaFile};
use crate::record::MetadataRecord;
use crate::resolve::{resolve, LookupScope, MatchKind};

static EXTRACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// What one archive produced.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub archive: String,
    pub total: u64,
    pub processed: u64,
    pub results: Vec<ProcessingResult>,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

impl ArchiveSummary {
    pub fn message(&self) -> String {
        format!("Processed {} / {} files", self.processed, self.total)
    }

    pub fn count(&self, status: MetadataStatus) -> usize {
        self.results
            .iter()
            .filter(|r| r.metadata_status == status)
            .count()
    }
}

/// Recursively collect supported images and videos below `root`.
pub fn discover_media(root: &Path, label: &str) -> Vec<MediaFile> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("{}: skipping unreadable entry: {}", label, e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| MediaFile::new(e.into_path(), root, label))
        .collect()
}

/// Processes archives one after another into a shared output root.
pub struct ArchivePipeline<'a> {
    output_root: &'a Path,
    sink: &'a dyn EventSink,
    cancel_token: Option<&'a CancellationToken>,
    /// Output paths written during this run, to report collisions
    written: HashSet<PathBuf>,
}

impl<'a> ArchivePipeline<'a> {
    pub fn new(output_root: &'a Path, sink: &'a dyn EventSink) -> Self {
        Self {
            output_root,
            sink,
            cancel_token: None,
            written: HashSet::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: &'a CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn stage(&self, archive: &str, stage: ArchiveStage) {
        self.sink.emit(ProcessEvent::Stage {
            archive: archive.to_string(),
            stage,
        });
    }

    /// Extract `archive` below `work_dir`, process it, then remove the
    /// extraction directory unless `keep_extracted` is set.
    pub fn run(
        &mut self,
        archive: &Path,
        extractor: &dyn Extractor,
        work_dir: &Path,
        keep_extracted: bool,
    ) -> Result<ArchiveSummary> {
        let label = archive_label(archive);

        self.stage(&label, ArchiveStage::Extracting);
        self.sink.emit(ProcessEvent::Status(format!("Extracting {}", archive.display())));
        let extract_dir = work_dir.join(format!(
            "tmerge-{}-{}-{}",
            label,
            std::process::id(),
            EXTRACT_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        if extract_dir.exists() {
            fs::remove_dir_all(&extract_dir)?;
        }
        fs::create_dir_all(&extract_dir)?;

        info!("Extracting {} with {} into {}", archive.display(), extractor.name(), extract_dir.display());
        if let Err(e) = extractor.extract(archive, &extract_dir) {
            remove_extraction_dir(&extract_dir);
            self.stage(&label, ArchiveStage::Failed(e.to_string()));
            return Err(e.into());
        }

        let summary = self.process_extracted(&label, &extract_dir);

        self.stage(&label, ArchiveStage::CleaningUp);
        if keep_extracted {
            info!("Keeping extracted files in {}", extract_dir.display());
        } else {
            remove_extraction_dir(&extract_dir);
        }

        self.stage(&label, ArchiveStage::Completed);
        Ok(summary)
    }

    /// Process a directory that already holds an extracted archive.
    pub fn process_extracted(&mut self, label: &str, root: &Path) -> ArchiveSummary {
        self.stage(label, ArchiveStage::Discovering);
        let media = discover_media(root, label);
        let total = media.len() as u64;
        info!("{}: {} media file(s) found", label, total);
        self.sink.emit(ProcessEvent::Status(format!("Found {} media files in {}", total, label)));

        let mut results = Vec::with_capacity(media.len());
        let mut consumed: Vec<PathBuf> = Vec::new();
        let mut cancelled = false;

        for (idx, m) in media.iter().enumerate() {
            if self.cancel_token.is_some_and(|t| t.is_cancelled()) {
                info!("{}: cancelled after {} / {} files", label, idx, total);
                cancelled = true;
                break;
            }

            self.stage(
                label,
                ArchiveStage::ProcessingFiles {
                    index: idx as u64,
                    total,
                },
            );
            self.sink.emit(ProcessEvent::FileStarted {
                archive: label.to_string(),
                filename: m.filename.clone(),
            });

            let result = self.process_file(m, root, &mut consumed);
            let processed = idx as u64 + 1;

            self.sink.emit(ProcessEvent::FileResult(result.clone()));
            self.sink.emit(ProcessEvent::Progress {
                archive: label.to_string(),
                fraction: processed as f64 / total as f64,
                total,
                processed,
            });
            results.push(result);
        }

        // Sidecars go only after the whole archive is done, so an edited copy
        // processed later can still inherit from its original.
        for sidecar in consumed {
            match fs::remove_file(&sidecar) {
                Ok(()) => debug!("removed {}", sidecar.display()),
                Err(e) => warn!("could not remove {}: {}", sidecar.display(), e),
            }
        }

        ArchiveSummary {
            archive: label.to_string(),
            total,
            processed: results.len() as u64,
            results,
            cancelled,
        }
    }

    fn process_file(
        &mut self,
        m: &MediaFile,
        root: &Path,
        consumed: &mut Vec<PathBuf>,
    ) -> ProcessingResult {
        let output = m.output_path(self.output_root);
        if !self.written.insert(output.clone()) {
            warn!("{} was already written in this run, overwriting", output.display());
        }

        let Some(resolution) = resolve(&m.path, root, LookupScope::Full) else {
            return match copy_verbatim(&m.path, &output) {
                Ok(out) => unmatched(m, Some(out), None),
                Err(e) => {
                    warn!("{}: copy failed: {}", m.filename, e);
                    unmatched(m, None, Some(e.to_string()))
                }
            };
        };

        match embed(m, &resolution.record, &output) {
            Ok(out) => {
                if resolution.consumes_sidecar() {
                    consumed.push(resolution.sidecar);
                }
                let metadata_status = match resolution.kind {
                    MatchKind::Direct => MetadataStatus::FoundAndApplied,
                    MatchKind::Inherited => MetadataStatus::InheritedFromOriginal,
                };
                ProcessingResult {
                    filename: m.filename.clone(),
                    original_path: m.path.clone(),
                    metadata_status,
                    processed_with_metadata: true,
                    output_path: Some(out),
                    error: None,
                }
            }
            Err(e) => {
                warn!("{}: embedding failed ({}), copying as-is", m.filename, e);
                fallback_copy(m, &output, &resolution.record, e.to_string())
            }
        }
    }
}

fn unmatched(m: &MediaFile, output_path: Option<PathBuf>, error: Option<String>) -> ProcessingResult {
    ProcessingResult {
        filename: m.filename.clone(),
        original_path: m.path.clone(),
        metadata_status: MetadataStatus::NoMetadataFound,
        processed_with_metadata: false,
        output_path,
        error,
    }
}

/// The container could not be rewritten: keep the file, still date it.
fn fallback_copy(m: &MediaFile, output: &Path, record: &MetadataRecord, reason: String) -> ProcessingResult {
    match copy_verbatim(&m.path, output) {
        Ok(out) => {
            if let Ok(date) = record.captured_date() {
                if let Err(e) = apply_file_times(&out, &date) {
                    warn!("{}: could not set file times: {}", m.filename, e);
                }
            }
            unmatched(m, Some(out), Some(reason))
        }
        Err(e) => {
            warn!("{}: copy failed: {}", m.filename, e);
            unmatched(m, None, Some(format!("{}; copy failed: {}", reason, e)))
        }
    }
}

fn remove_extraction_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("could not remove {}: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[test]
    fn test_discover_filters_by_extension() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("Takeout/Google Photos/Album");
        fs::create_dir_all(&base).unwrap();
        for name in ["a.jpg", "b.JPEG", "c.heic", "d.mp4", "e.MOV", "f.png", "a.jpg.supplemental-metadata.json", "metadata.json"] {
            fs::write(base.join(name), b"x").unwrap();
        }

        let found = discover_media(dir.path(), "t");
        let mut names: Vec<_> = found.iter().map(|m| m.filename.as_str()).collect();
        names.sort();
        assert_eq!(names, ["a.jpg", "b.JPEG", "c.heic", "d.mp4", "e.MOV"]);
    }

    #[test]
    fn test_progress_is_monotonic_and_complete() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("extract");
        let out = dir.path().join("out");
        fs::create_dir_all(root.join("Takeout")).unwrap();
        for name in ["1.mp4", "2.mp4", "3.mov"] {
            fs::write(root.join("Takeout").join(name), b"v").unwrap();
        }

        let events = Mutex::new(Vec::new());
        let sink = |e: ProcessEvent| events.lock().unwrap().push(e);
        let summary = ArchivePipeline::new(&out, &sink).process_extracted("t", &root);

        assert_eq!(summary.message(), "Processed 3 / 3 files");
        let fractions: Vec<f64> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.len(), 3);
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_does_not_stop_discovery() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let album = dir.path().join("Takeout/Album");
        let locked = dir.path().join("Takeout/Locked");
        fs::create_dir_all(&album).unwrap();
        fs::create_dir_all(&locked).unwrap();
        fs::write(album.join("a.jpg"), b"x").unwrap();
        fs::write(locked.join("b.jpg"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let found = discover_media(dir.path(), "t");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(found.iter().any(|m| m.filename == "a.jpg"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("extract");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("1.mp4"), b"v").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let out = dir.path().join("out");
        let summary = ArchivePipeline::new(&out, &NullSink)
            .with_cancel_token(&token)
            .process_extracted("t", &root);
        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.total, 1);
    }
}

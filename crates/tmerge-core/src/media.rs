use std::path::{Component, Path, PathBuf};

/// Extensions whose metadata container is rewritten.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "heic"];
/// Extensions copied verbatim (only file timestamps are updated).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Top-level directory of every Takeout export.
pub const ROOT_MARKER: &str = "Takeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// A candidate media file found inside an extracted archive.
#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Absolute path inside the extraction directory
    pub path: PathBuf,
    /// Just the filename, lossily decoded for display; `path` stays exact
    pub filename: String,
    /// Lower-cased extension
    pub extension: String,
    pub kind: MediaKind,
    /// Location below the output root
    pub relative_path: PathBuf,
}

impl MediaFile {
    /// Returns `None` for anything that is not a supported image or video.
    pub fn new(path: PathBuf, archive_root: &Path, archive_label: &str) -> Option<Self> {
        let filename = path.file_name()?.to_string_lossy().into_owned();
        let extension = path.extension()?.to_str()?.to_lowercase();
        let kind = MediaKind::from_extension(&extension)?;
        let relative_path = relative_output_path(&path, archive_root, archive_label);
        Some(Self {
            path,
            filename,
            extension,
            kind,
            relative_path,
        })
    }

    pub fn output_path(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.relative_path)
    }
}

/// Path of `path` below the output root.
///
/// Everything from the first `Takeout` segment onward is kept so that
/// same-named files from different albums stay apart. Without that segment
/// the file is placed under a directory named after its archive.
pub fn relative_output_path(path: &Path, archive_root: &Path, archive_label: &str) -> PathBuf {
    let within = pathdiff::diff_paths(path, archive_root)
        .filter(|p| !p.starts_with(".."))
        .unwrap_or_else(|| PathBuf::from(path.file_name().unwrap_or(path.as_os_str())));

    let segments: Vec<&std::ffi::OsStr> = within
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect();

    match segments.iter().position(|s| *s == ROOT_MARKER) {
        Some(idx) => segments[idx..].iter().collect(),
        None => {
            let mut scoped = PathBuf::from(archive_label);
            scoped.extend(segments);
            scoped
        }
    }
}

/// Directory-safe label for an archive path (its file stem).
pub fn archive_label(archive: &Path) -> String {
    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("archive");
    stem.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

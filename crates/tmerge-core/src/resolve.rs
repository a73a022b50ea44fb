use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::record::MetadataRecord;

/// Sidecar suffix written by current Takeout exports.
pub const SIDECAR_SUFFIX: &str = ".supplemental-metadata.json";
/// Truncated spelling that Takeout also produces.
pub const SIDECAR_SUFFIX_TRUNCATED: &str = ".supplemental-metadat.json";

const SIDECAR_TAG: &str = "supplemental-metadata";

static EDITED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-edited(\.[^.]+)$").unwrap());
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<stem>.+)\((?P<n>\d+)\)(?P<ext>\.[^.]+)$").unwrap());

/// How a sidecar was tied to a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The file's own sidecar
    Direct,
    /// The sidecar of the original an `-edited` file was derived from
    Inherited,
}

/// Which lookup steps to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupScope {
    /// Every step, including the name-mangling fallbacks
    Full,
    /// Only the direct and inherited lookups
    Primary,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: MetadataRecord,
    pub sidecar: PathBuf,
    pub kind: MatchKind,
}

impl Resolution {
    /// An inherited sidecar still belongs to the original and must survive.
    pub fn consumes_sidecar(&self) -> bool {
        self.kind == MatchKind::Direct
    }
}

/// Both spellings of the sidecar name for `filename`, preferred first.
pub fn sidecar_names(filename: &str) -> [String; 2] {
    [
        format!("{}{}", filename, SIDECAR_SUFFIX),
        format!("{}{}", filename, SIDECAR_SUFFIX_TRUNCATED),
    ]
}

/// `NAME-edited.EXT` -> `NAME.EXT`
pub fn edited_base_name(filename: &str) -> Option<String> {
    let caps = EDITED_RE.captures(filename)?;
    let whole = caps.get(0)?;
    let ext = caps.get(1)?.as_str();
    let stem = &filename[..whole.start()];
    if stem.is_empty() {
        return None;
    }
    Some(format!("{}{}", stem, ext))
}

/// Find and parse the sidecar for `media_path`, first hit wins.
///
/// A sidecar that fails to parse is skipped and the search continues.
pub fn resolve(media_path: &Path, archive_root: &Path, scope: LookupScope) -> Option<Resolution> {
    let dir = media_path.parent()?;
    let Some(filename) = media_path.file_name()?.to_str() else {
        debug!("{}: name is not valid UTF-8, no sidecar lookup", media_path.display());
        return None;
    };

    type Step<'a> = Box<dyn Fn() -> Option<PathBuf> + 'a>;
    let mut steps: Vec<(MatchKind, Step<'_>)> = Vec::new();

    match edited_base_name(filename) {
        Some(base) => {
            let base_for_dir = base.clone();
            steps.push((
                MatchKind::Inherited,
                Box::new(move || find_direct(dir, &base_for_dir)),
            ));
            steps.push((
                MatchKind::Inherited,
                Box::new(move || find_recursive(archive_root, &sidecar_names(&base))),
            ));
            steps.push((MatchKind::Direct, Box::new(|| find_direct(dir, filename))));
        }
        None => {
            steps.push((MatchKind::Direct, Box::new(|| find_direct(dir, filename))));
        }
    }

    if scope == LookupScope::Full {
        steps.push((MatchKind::Direct, Box::new(|| find_truncated(dir, filename))));
        steps.push((MatchKind::Direct, Box::new(|| find_bracket_swapped(dir, filename))));
        steps.push((
            MatchKind::Direct,
            Box::new(|| existing(dir.join(format!("{}.json", filename)))),
        ));
    }

    for (kind, step) in &steps {
        let Some(sidecar) = step() else { continue };
        match MetadataRecord::from_path(&sidecar) {
            Ok(record) => {
                debug!("{}: matched {} ({:?})", filename, sidecar.display(), kind);
                return Some(Resolution {
                    record,
                    sidecar,
                    kind: *kind,
                });
            }
            Err(e) => warn!("{}: ignoring sidecar {}: {}", filename, sidecar.display(), e),
        }
    }

    debug!("{}: no sidecar found", filename);
    None
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

/// Both spellings next to the media file, primary first.
fn find_direct(dir: &Path, filename: &str) -> Option<PathBuf> {
    sidecar_names(filename)
        .into_iter()
        .find_map(|name| existing(dir.join(name)))
}

/// Anywhere under `root`; a primary-spelling hit beats a truncated one.
fn find_recursive(root: &Path, names: &[String; 2]) -> Option<PathBuf> {
    let wanted: Vec<String> = names.iter().map(|n| n.nfc().collect()).collect();
    let mut fallback = None;

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| {
            entry
                .map_err(|e| warn!("sidecar search skipped an entry: {}", e))
                .ok()
        })
        .filter(|e| e.file_type().is_file())
    {
        let Some(name) = entry.file_name().to_str() else { continue };
        let name: String = name.nfc().collect();
        if name == wanted[0] {
            return Some(entry.into_path());
        }
        if fallback.is_none() && name == wanted[1] {
            fallback = Some(entry.into_path());
        }
    }

    fallback
}

/// `<file>.<prefix of supplemental-metadata>.json`, longest prefix first.
fn find_truncated(dir: &Path, filename: &str) -> Option<PathBuf> {
    (1..SIDECAR_TAG.len())
        .rev()
        .map(|len| &SIDECAR_TAG[..len])
        .filter(|prefix| !prefix.ends_with('-'))
        .find_map(|prefix| existing(dir.join(format!("{}.{}.json", filename, prefix))))
}

/// `NAME(1).EXT` has its counter moved behind the extension by the export.
fn find_bracket_swapped(dir: &Path, filename: &str) -> Option<PathBuf> {
    let caps = BRACKET_RE.captures(filename)?;
    let original = format!("{}{}", &caps["stem"], &caps["ext"]);
    let n = &caps["n"];
    [
        format!("{}.{}({}).json", original, SIDECAR_TAG, n),
        format!("{}({}).json", original, n),
    ]
    .into_iter()
    .find_map(|name| existing(dir.join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sidecar_json(taken: i64) -> String {
        format!(
            r#"{{"title": "t", "creationTime": {{"timestamp": "{taken}", "formatted": ""}},
                "photoTakenTime": {{"timestamp": "{taken}", "formatted": ""}},
                "geoData": {{"latitude": 0.0, "longitude": 0.0, "altitude": 0.0}}}}"#
        )
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"media").unwrap();
    }

    fn write_sidecar(path: &Path, taken: i64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, sidecar_json(taken)).unwrap();
    }

    #[test]
    fn test_edited_base_name() {
        assert_eq!(edited_base_name("IMG_01-edited.jpg").as_deref(), Some("IMG_01.jpg"));
        assert_eq!(edited_base_name("IMG_01-EDITED.JPG").as_deref(), Some("IMG_01.JPG"));
        assert_eq!(edited_base_name("IMG_01.jpg"), None);
        assert_eq!(edited_base_name("IMG-edited-2.jpg"), None);
        assert_eq!(edited_base_name("-edited.jpg"), None);
    }

    #[test]
    fn test_primary_spelling_preferred() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("IMG_01.jpg");
        touch(&media);
        write_sidecar(&dir.path().join("IMG_01.jpg.supplemental-metadat.json"), 1);
        write_sidecar(&dir.path().join("IMG_01.jpg.supplemental-metadata.json"), 2);

        let res = resolve(&media, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.record.captured_time.timestamp, "2");
        assert_eq!(res.kind, MatchKind::Direct);
        assert!(res.consumes_sidecar());
    }

    #[test]
    fn test_truncated_spelling_used_when_alone() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("IMG_01.jpg");
        touch(&media);
        let sidecar = dir.path().join("IMG_01.jpg.supplemental-metadat.json");
        write_sidecar(&sidecar, 1);

        let res = resolve(&media, dir.path(), LookupScope::Primary).unwrap();
        assert_eq!(res.sidecar, sidecar);
    }

    #[test]
    fn test_edited_inherits_from_original_in_same_dir() {
        let dir = tempdir().unwrap();
        let edited = dir.path().join("IMG_01-edited.jpg");
        touch(&edited);
        write_sidecar(&dir.path().join("IMG_01.jpg.supplemental-metadata.json"), 7);

        let res = resolve(&edited, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.kind, MatchKind::Inherited);
        assert!(!res.consumes_sidecar());
        assert_eq!(res.record.captured_time.timestamp, "7");
    }

    #[test]
    fn test_edited_prefers_inherited_over_own_sidecar() {
        let dir = tempdir().unwrap();
        let edited = dir.path().join("IMG_01-edited.jpg");
        touch(&edited);
        write_sidecar(&dir.path().join("IMG_01.jpg.supplemental-metadata.json"), 7);
        write_sidecar(&dir.path().join("IMG_01-edited.jpg.supplemental-metadata.json"), 9);

        let res = resolve(&edited, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.kind, MatchKind::Inherited);
        assert_eq!(res.record.captured_time.timestamp, "7");
    }

    #[test]
    fn test_edited_finds_original_elsewhere_in_archive() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let edited = root.join("Takeout/Google Photos/Album/IMG_01-edited.jpg");
        touch(&edited);
        write_sidecar(
            &root.join("Takeout/Google Photos/Photos from 2023/IMG_01.jpg.supplemental-metadat.json"),
            5,
        );

        let res = resolve(&edited, root, LookupScope::Primary).unwrap();
        assert_eq!(res.kind, MatchKind::Inherited);
        assert_eq!(res.record.captured_time.timestamp, "5");
    }

    #[test]
    fn test_edited_falls_back_to_own_sidecar() {
        let dir = tempdir().unwrap();
        let edited = dir.path().join("IMG_01-edited.jpg");
        touch(&edited);
        write_sidecar(&dir.path().join("IMG_01-edited.jpg.supplemental-metadata.json"), 9);

        let res = resolve(&edited, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.kind, MatchKind::Direct);
        assert!(res.consumes_sidecar());
    }

    #[test]
    fn test_no_match() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("IMG_02.jpg");
        touch(&media);
        write_sidecar(&dir.path().join("IMG_01.jpg.supplemental-metadata.json"), 1);
        assert!(resolve(&media, dir.path(), LookupScope::Full).is_none());
    }

    #[test]
    fn test_malformed_sidecar_is_skipped() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("IMG_01.jpg");
        touch(&media);
        fs::write(dir.path().join("IMG_01.jpg.supplemental-metadata.json"), b"{").unwrap();
        assert!(resolve(&media, dir.path(), LookupScope::Primary).is_none());

        write_sidecar(&dir.path().join("IMG_01.jpg.json"), 3);
        let res = resolve(&media, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.record.captured_time.timestamp, "3");
    }

    #[test]
    fn test_name_mangling_fallbacks() {
        let dir = tempdir().unwrap();
        let long = dir.path().join("PXL_20230101_123456789.PORTRAIT.jpg");
        touch(&long);
        write_sidecar(&dir.path().join("PXL_20230101_123456789.PORTRAIT.jpg.supplemen.json"), 4);
        let res = resolve(&long, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.record.captured_time.timestamp, "4");
        assert!(resolve(&long, dir.path(), LookupScope::Primary).is_none());

        let dup = dir.path().join("IMG_03(1).jpg");
        touch(&dup);
        write_sidecar(&dir.path().join("IMG_03.jpg.supplemental-metadata(1).json"), 6);
        let res = resolve(&dup, dir.path(), LookupScope::Full).unwrap();
        assert_eq!(res.record.captured_time.timestamp, "6");
    }
}

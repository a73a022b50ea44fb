use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use little_exif::rational::uR64;
use log::{debug, warn};

use crate::error::EmbedError;
use crate::media::{MediaFile, MediaKind};
use crate::record::{format_exif_datetime, GeoData, MetadataRecord};

/// Write `media` to `output` with `record` applied.
///
/// Images get their EXIF block rewritten, videos are copied as-is. In both
/// cases the output's file times are set to the capture time when the record
/// has a valid one.
pub fn embed(
    media: &MediaFile,
    record: &MetadataRecord,
    output: &Path,
) -> Result<PathBuf, EmbedError> {
    ensure_parent(output)?;
    let captured = record.captured_date();

    match media.kind {
        MediaKind::Image => {
            embed_image(&media.path, record, captured.as_ref().ok(), output)?
        }
        MediaKind::Video => {
            copy_verbatim(&media.path, output)?;
        }
    }

    match captured {
        Ok(date) => apply_file_times(output, &date)?,
        Err(e) => warn!("{}: {}, file times left unchanged", media.filename, e),
    }
    Ok(output.to_path_buf())
}

/// Copy without touching the content. The destination appears atomically.
pub fn copy_verbatim(source: &Path, output: &Path) -> io::Result<PathBuf> {
    ensure_parent(output)?;
    if is_same_file(source, output) {
        return Ok(output.to_path_buf());
    }
    let partial = partial_path(output);
    if let Err(e) = fs::copy(source, &partial).and_then(|_| fs::rename(&partial, output)) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    Ok(output.to_path_buf())
}

/// Set access and modification time to `date`.
pub fn apply_file_times(path: &Path, date: &DateTime<Utc>) -> io::Result<()> {
    let ft = filetime::FileTime::from_unix_time(date.timestamp(), 0);
    filetime::set_file_times(path, ft, ft)
}

fn ensure_parent(output: &Path) -> io::Result<()> {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Hidden sibling of `output` that keeps its extension, so the EXIF
/// library still recognises the container.
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    output.with_file_name(format!(".{}.tmerge-partial.{}", name, ext))
}

fn embed_image(
    source: &Path,
    record: &MetadataRecord,
    captured: Option<&DateTime<Utc>>,
    output: &Path,
) -> Result<(), EmbedError> {
    // Work on a copy so the original container seeds the tag set and the
    // destination only ever holds a finished file.
    let partial = partial_path(output);
    fs::copy(source, &partial)?;

    let rewritten = rewrite_container(&partial, record, captured)
        .and_then(|_| fs::rename(&partial, output).map_err(EmbedError::from));
    if rewritten.is_err() {
        let _ = fs::remove_file(&partial);
    }
    rewritten
}

fn rewrite_container(
    path: &Path,
    record: &MetadataRecord,
    captured: Option<&DateTime<Utc>>,
) -> Result<(), EmbedError> {
    // little_exif can panic on unusual containers
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut metadata = match Metadata::new_from_path(path) {
            Ok(m) => m,
            Err(e) => {
                debug!("{}: no readable EXIF ({}), starting empty", path.display(), e);
                Metadata::new()
            }
        };
        apply_record(&mut metadata, record, captured);
        metadata.write_to_file(path)
    }));

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(EmbedError::Metadata {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Err(_) => Err(EmbedError::Panicked(path.to_path_buf())),
    }
}

/// Overwrite the capture-time, location and file-datetime tags.
fn apply_record(metadata: &mut Metadata, record: &MetadataRecord, captured: Option<&DateTime<Utc>>) {
    if let Some(date) = captured {
        let formatted = format_exif_datetime(date);
        metadata.set_tag(ExifTag::DateTimeOriginal(formatted.clone()));
        metadata.set_tag(ExifTag::CreateDate(formatted.clone()));
        metadata.set_tag(ExifTag::ModifyDate(formatted));
    }

    if record.location.is_present() {
        apply_location(metadata, &record.location);
    }
}

fn apply_location(metadata: &mut Metadata, geo: &GeoData) {
    let lat_ref = if geo.latitude >= 0.0 { "N" } else { "S" };
    let lon_ref = if geo.longitude >= 0.0 { "E" } else { "W" };

    metadata.set_tag(ExifTag::GPSLatitudeRef(lat_ref.to_string()));
    metadata.set_tag(ExifTag::GPSLatitude(dms_rationals(geo.latitude)));
    metadata.set_tag(ExifTag::GPSLongitudeRef(lon_ref.to_string()));
    metadata.set_tag(ExifTag::GPSLongitude(dms_rationals(geo.longitude)));

    // EXIF altitude is unsigned; the sign goes into the reference byte.
    let alt_ref: u8 = if geo.altitude < 0.0 { 1 } else { 0 };
    let alt_num = (geo.altitude.abs() * 100.0).round() as u32;
    metadata.set_tag(ExifTag::GPSAltitudeRef(vec![alt_ref]));
    metadata.set_tag(ExifTag::GPSAltitude(vec![ur64(alt_num, 100)]));
}

fn dms_rationals(decimal: f64) -> Vec<uR64> {
    let (d, m, s_num, s_den) = decimal_to_dms(decimal);
    vec![ur64(d, 1), ur64(m, 1), ur64(s_num, s_den)]
}

fn ur64(nominator: u32, denominator: u32) -> uR64 {
    uR64 {
        nominator,
        denominator,
    }
}

const SECONDS_DENOMINATOR: u64 = 10_000;

/// Absolute decimal degrees as (degrees, minutes, seconds numerator,
/// seconds denominator), seconds to 1/10000.
///
/// Rounding happens once on the total so seconds stay below 60.
pub fn decimal_to_dms(decimal: f64) -> (u32, u32, u32, u32) {
    let ticks = (decimal.abs() * 3600.0 * SECONDS_DENOMINATOR as f64).round() as u64;
    let per_minute = 60 * SECONDS_DENOMINATOR;
    let per_degree = 60 * per_minute;
    let degrees = ticks / per_degree;
    let minutes = (ticks % per_degree) / per_minute;
    let seconds = ticks % per_minute;
    (degrees as u32, minutes as u32, seconds as u32, SECONDS_DENOMINATOR as u32)
}

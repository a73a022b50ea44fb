use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RecordError;

/// Format used for every date written into an image container.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// `{timestamp, formatted}` pair as found in Google's sidecar JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStamp {
    /// Decimal string of epoch seconds
    pub timestamp: String,
    pub formatted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoData {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    #[serde(default)]
    pub latitude_span: Option<f64>,
    #[serde(default)]
    pub longitude_span: Option<f64>,
}

impl GeoData {
    /// Google writes `(0, 0)` when the capture had no GPS fix.
    pub fn is_present(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
}

/// One parsed `*.supplemental-metadata.json` sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_views: Option<String>,
    pub creation_time: TimeStamp,
    /// Authoritative for everything written into the image
    #[serde(rename = "photoTakenTime")]
    pub captured_time: TimeStamp,
    #[serde(rename = "geoData")]
    pub location: GeoData,
    #[serde(default)]
    pub people: Option<Vec<Person>>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The capture timestamp of a record is missing or not a valid instant.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid capture time {0:?}")]
pub struct InvalidCaptureTime(pub String);

impl MetadataRecord {
    /// Parse Google's JSON metadata.
    pub fn parse(json_bytes: &[u8]) -> Result<Self, RecordError> {
        Ok(serde_json::from_slice(json_bytes)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, RecordError> {
        let bytes = fs::read(path).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Instant reconstructed from `photoTakenTime.timestamp`.
    pub fn captured_date(&self) -> Result<DateTime<Utc>, InvalidCaptureTime> {
        parse_epoch(&self.captured_time.timestamp)
    }
}

fn parse_epoch(raw: &str) -> Result<DateTime<Utc>, InvalidCaptureTime> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        .ok_or_else(|| InvalidCaptureTime(raw.to_string()))
}

/// Render an instant the way EXIF stores calendar dates (UTC, no zone).
pub fn format_exif_datetime(date: &DateTime<Utc>) -> String {
    date.format(EXIF_DATETIME_FORMAT).to_string()
}

//! Metadata extraction for ingested media.
//!
//! Images are read for EXIF in-process; videos are probed with an external
//! `ffprobe` binary. Extraction never fails an ingest: anything unreadable
//! simply yields no metadata.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::MediaKind;

/// What an extractor found: the opaque blob stored in `media.meta` and
/// an optional capture timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub meta: Option<Value>,
    pub taken_at: Option<NaiveDateTime>,
}

pub trait MetadataExtractor: Send + Sync {
    /// `bytes` is the upload; `staged` is the same content on disk.
    fn extract(&self, kind: MediaKind, bytes: &[u8], staged: &Path) -> ExtractedMetadata;
}

/// Extractor that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataExtractor for NoMetadata {
    fn extract(&self, _kind: MediaKind, _bytes: &[u8], _staged: &Path) -> ExtractedMetadata {
        ExtractedMetadata::default()
    }
}

/// EXIF for images, ffprobe for videos.
#[derive(Debug, Clone)]
pub struct DefaultExtractor {
    ffprobe: Option<PathBuf>,
}

impl DefaultExtractor {
    /// `ffprobe` of `None` disables video probing.
    pub fn new(ffprobe: Option<PathBuf>) -> Self {
        Self { ffprobe }
    }
}

impl MetadataExtractor for DefaultExtractor {
    fn extract(&self, kind: MediaKind, bytes: &[u8], staged: &Path) -> ExtractedMetadata {
        match kind {
            MediaKind::Image => match read_exif(bytes) {
                Some((fields, taken_at)) => ExtractedMetadata {
                    meta: Some(json!({ "exif": fields })),
                    taken_at,
                },
                None => ExtractedMetadata::default(),
            },
            MediaKind::Video => {
                let Some(ffprobe) = &self.ffprobe else {
                    return ExtractedMetadata::default();
                };
                match probe_video(ffprobe, staged) {
                    Some(info) => {
                        let taken_at = video_creation_time(&info);
                        ExtractedMetadata {
                            meta: Some(json!({ "info": info })),
                            taken_at,
                        }
                    }
                    None => ExtractedMetadata::default(),
                }
            }
        }
    }
}

/// Primary-IFD EXIF fields as display strings, plus the best capture time.
pub fn read_exif(bytes: &[u8]) -> Option<(Map<String, Value>, Option<NaiveDateTime>)> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;

    let mut fields = Map::new();
    for field in exif.fields() {
        if field.ifd_num != exif::In::PRIMARY {
            continue;
        }
        let value = field.display_value().to_string();
        fields.insert(field.tag.to_string(), Value::String(value.trim_matches('"').to_string()));
    }
    if fields.is_empty() {
        return None;
    }

    let taken_at = [
        exif::Tag::DateTimeOriginal,
        exif::Tag::DateTimeDigitized,
        exif::Tag::DateTime,
    ]
    .into_iter()
    .find_map(|tag| {
        let field = exif.get_field(tag, exif::In::PRIMARY)?;
        match field.value {
            exif::Value::Ascii(ref v) => v.first().and_then(|raw| parse_exif_datetime(raw)),
            _ => None,
        }
    });

    Some((fields, taken_at))
}

/// Parse the EXIF `YYYY:MM:DD HH:MM:SS` form.
fn parse_exif_datetime(raw: &[u8]) -> Option<NaiveDateTime> {
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?.and_hms_opt(
        dt.hour as u32,
        dt.minute as u32,
        dt.second as u32,
    )
}

fn probe_video(ffprobe: &Path, input: &Path) -> Option<Value> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(input)
        .output();

    let output = match output {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            tracing::warn!(path = %input.display(), status = %o.status, "ffprobe failed");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not run ffprobe");
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(info) if info.is_object() => Some(info),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable ffprobe output");
            None
        }
    }
}

/// `format.tags.creation_time` from ffprobe output (RFC 3339).
fn video_creation_time(info: &Value) -> Option<NaiveDateTime> {
    let raw = info.pointer("/format/tags/creation_time")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.naive_utc())
}

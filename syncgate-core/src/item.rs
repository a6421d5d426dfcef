use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntryError {
    #[error("entry is not an object")]
    NotAnObject,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field {field} has wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("invalid download status: {0}")]
    InvalidStatus(String),
    #[error("invalid timestamp in {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    NotDownloaded,
    Downloaded,
    Current,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::NotDownloaded => "not_downloaded",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Current => "current",
        }
    }

    fn parse(value: &str) -> Result<Self, EntryError> {
        match value {
            "not_downloaded" => Ok(DownloadStatus::NotDownloaded),
            "downloaded" => Ok(DownloadStatus::Downloaded),
            "current" => Ok(DownloadStatus::Current),
            other => Err(EntryError::InvalidStatus(other.to_string())),
        }
    }

    /// Whether a local copy exists at all. `Downloaded` copies may be stale;
    /// only `Current` matches the latest known remote version.
    pub fn is_local(&self) -> bool {
        !matches!(self, DownloadStatus::NotDownloaded)
    }
}

/// One container entry as last reported by the metadata index. A snapshot,
/// advisory the instant after observation; `path` is the only stable identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub path: String,
    pub is_directory: bool,
    pub size_bytes: Option<u64>,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub download_status: DownloadStatus,
    pub is_downloading: bool,
    pub is_uploading: bool,
    pub is_uploaded: bool,
    pub has_unresolved_conflicts: bool,
    pub download_progress: Option<f64>,
    pub upload_progress: Option<f64>,
}

/// A raw entry that failed to parse during a listing, kept alongside the
/// well-formed results instead of aborting the whole operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidEntry {
    pub index: usize,
    pub reason: String,
}

/// Parse one raw index entry. Each entry is parsed independently of the
/// others; the caller decides whether a failure is fatal or recorded.
pub fn parse_entry(raw: &Value) -> Result<Item, EntryError> {
    let map = raw.as_object().ok_or(EntryError::NotAnObject)?;

    let path = match map.get("path") {
        Some(Value::String(path)) if !path.is_empty() => path.clone(),
        Some(Value::String(_)) | None => return Err(EntryError::MissingField("path")),
        Some(_) => {
            return Err(EntryError::WrongType {
                field: "path",
                expected: "string",
            });
        }
    };

    let download_status = match map.get("download_status") {
        None | Some(Value::Null) => DownloadStatus::NotDownloaded,
        Some(Value::String(value)) => DownloadStatus::parse(value)?,
        Some(_) => {
            return Err(EntryError::WrongType {
                field: "download_status",
                expected: "string",
            });
        }
    };

    Ok(Item {
        path,
        is_directory: opt_bool(map, "is_dir")?.unwrap_or(false),
        size_bytes: opt_u64(map, "size")?,
        created_at: opt_timestamp(map, "created")?,
        modified_at: opt_timestamp(map, "modified")?,
        download_status,
        is_downloading: opt_bool(map, "is_downloading")?.unwrap_or(false),
        is_uploading: opt_bool(map, "is_uploading")?.unwrap_or(false),
        is_uploaded: opt_bool(map, "is_uploaded")?.unwrap_or(false),
        has_unresolved_conflicts: opt_bool(map, "has_conflicts")?.unwrap_or(false),
        download_progress: opt_fraction(map, "download_progress")?,
        upload_progress: opt_fraction(map, "upload_progress")?,
    })
}

fn opt_bool(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<bool>, EntryError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(EntryError::WrongType {
            field,
            expected: "bool",
        }),
    }
}

fn opt_u64(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<u64>, EntryError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => value.as_u64().map(Some).ok_or(EntryError::WrongType {
            field,
            expected: "unsigned integer",
        }),
        Some(_) => Err(EntryError::WrongType {
            field,
            expected: "unsigned integer",
        }),
    }
}

// Timestamps arrive either as RFC3339 strings or as unix seconds.
fn opt_timestamp(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, EntryError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => value.as_i64().map(Some).ok_or(EntryError::WrongType {
            field,
            expected: "integer seconds",
        }),
        Some(Value::String(value)) => OffsetDateTime::parse(value, &Rfc3339)
            .map(|parsed| Some(parsed.unix_timestamp()))
            .map_err(|_| EntryError::InvalidTimestamp {
                field,
                value: value.clone(),
            }),
        Some(_) => Err(EntryError::WrongType {
            field,
            expected: "timestamp",
        }),
    }
}

// Progress fractions are 0.0..=1.0; finite out-of-range values are clamped,
// non-finite values invalidate the entry.
fn opt_fraction(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<f64>, EntryError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => {
            let value = value.as_f64().ok_or(EntryError::WrongType {
                field,
                expected: "fraction",
            })?;
            if !value.is_finite() {
                return Err(EntryError::WrongType {
                    field,
                    expected: "finite fraction",
                });
            }
            Ok(Some(value.clamp(0.0, 1.0)))
        }
        Some(_) => Err(EntryError::WrongType {
            field,
            expected: "fraction",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_entry() {
        let raw = json!({
            "path": "Docs/A.txt",
            "is_dir": false,
            "size": 1024,
            "created": "2024-01-01T00:00:00Z",
            "modified": 1_700_000_000,
            "download_status": "current",
            "is_downloading": true,
            "has_conflicts": false,
            "download_progress": 0.5,
        });

        let item = parse_entry(&raw).unwrap();
        assert_eq!(item.path, "Docs/A.txt");
        assert_eq!(item.size_bytes, Some(1024));
        assert_eq!(item.created_at, Some(1_704_067_200));
        assert_eq!(item.modified_at, Some(1_700_000_000));
        assert_eq!(item.download_status, DownloadStatus::Current);
        assert!(item.is_downloading);
        assert_eq!(item.download_progress, Some(0.5));
        assert_eq!(item.upload_progress, None);
    }

    #[test]
    fn defaults_apply_for_sparse_entries() {
        let item = parse_entry(&json!({ "path": "A" })).unwrap();
        assert!(!item.is_directory);
        assert_eq!(item.download_status, DownloadStatus::NotDownloaded);
        assert!(!item.download_status.is_local());
        assert_eq!(item.size_bytes, None);
    }

    #[test]
    fn missing_or_empty_path_is_rejected() {
        assert_eq!(
            parse_entry(&json!({ "size": 1 })),
            Err(EntryError::MissingField("path"))
        );
        assert_eq!(
            parse_entry(&json!({ "path": "" })),
            Err(EntryError::MissingField("path"))
        );
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        assert!(matches!(
            parse_entry(&json!({ "path": 7 })),
            Err(EntryError::WrongType { field: "path", .. })
        ));
        assert!(matches!(
            parse_entry(&json!({ "path": "A", "size": "big" })),
            Err(EntryError::WrongType { field: "size", .. })
        ));
        assert!(matches!(
            parse_entry(&json!([1, 2])),
            Err(EntryError::NotAnObject)
        ));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(
            parse_entry(&json!({ "path": "A", "download_status": "gone" })),
            Err(EntryError::InvalidStatus("gone".into()))
        );
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        assert!(matches!(
            parse_entry(&json!({ "path": "A", "modified": "yesterday" })),
            Err(EntryError::InvalidTimestamp {
                field: "modified",
                ..
            })
        ));
    }

    #[test]
    fn progress_is_clamped_to_unit_range() {
        let item = parse_entry(&json!({ "path": "A", "download_progress": 1.5 })).unwrap();
        assert_eq!(item.download_progress, Some(1.0));
        let item = parse_entry(&json!({ "path": "A", "upload_progress": -0.2 })).unwrap();
        assert_eq!(item.upload_progress, Some(0.0));
    }

    #[test]
    fn status_round_trips_through_as_str() {
        for status in [
            DownloadStatus::NotDownloaded,
            DownloadStatus::Downloaded,
            DownloadStatus::Current,
        ] {
            assert_eq!(DownloadStatus::parse(status.as_str()), Ok(status));
        }
    }
}

//! Immutable value objects for files and directories.
//!
//! `FsObject` is the in-memory representation of a filesystem entry,
//! materialised from a `stat` result, a database row, or a wire node.
//! Instances are ephemeral and never shared across tasks.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{FsalError, FsalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    File,
    Directory,
}

/// A file or directory entry, relative to one of the daemon's base paths.
#[derive(Debug, Clone)]
pub struct FsObject {
    pub base_path: PathBuf,
    /// Normalised, never leading with a separator, never `..`-escaping.
    pub rel_path: String,
    pub name: String,
    pub create_date: DateTime<Utc>,
    pub modify_date: DateTime<Utc>,
    pub size: u64,
    pub kind: FsKind,
}

impl FsObject {
    pub fn is_file(&self) -> bool {
        self.kind == FsKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FsKind::Directory
    }

    /// Absolute path of this entry on disk.
    pub fn path(&self) -> PathBuf {
        self.base_path.join(&self.rel_path)
    }

    /// Build an `FsObject` by statting `base_path.join(rel_path)`.
    pub fn from_path(base_path: &Path, rel_path: &str) -> FsalResult<Self> {
        let full_path = base_path.join(rel_path);
        let metadata = std::fs::symlink_metadata(&full_path)
            .map_err(|e| FsalError::filesystem(&full_path, e))?;
        Self::from_metadata(base_path, rel_path, &metadata)
    }

    pub fn from_metadata(
        base_path: &Path,
        rel_path: &str,
        metadata: &std::fs::Metadata,
    ) -> FsalResult<Self> {
        let name = Path::new(rel_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = if metadata.is_dir() {
            FsKind::Directory
        } else {
            FsKind::File
        };
        let size = if kind == FsKind::Directory { 0 } else { metadata.size() };
        Ok(FsObject {
            base_path: base_path.to_path_buf(),
            rel_path: rel_path.to_string(),
            name,
            create_date: epoch_to_datetime(metadata.ctime(), metadata.ctime_nsec()),
            modify_date: epoch_to_datetime(metadata.mtime(), metadata.mtime_nsec()),
            size,
            kind,
        })
    }

    /// Reconstruct from a persisted index row.
    pub fn from_row(
        base_path: &str,
        rel_path: &str,
        size: i64,
        create_time: f64,
        modify_time: f64,
        is_dir: bool,
    ) -> Self {
        let name = Path::new(rel_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        FsObject {
            base_path: PathBuf::from(base_path),
            rel_path: rel_path.to_string(),
            name,
            create_date: seconds_to_datetime(create_time),
            modify_date: seconds_to_datetime(modify_time),
            size: size.max(0) as u64,
            kind: if is_dir { FsKind::Directory } else { FsKind::File },
        }
    }

    /// Compares content-relevant fields, ignoring `create_date`; used to
    /// decide whether to emit a `modified` event during a scan.
    pub fn changed(&self, other: &FsObject) -> bool {
        self.path() != other.path()
            || self.modify_date != other.modify_date
            || self.size != other.size
            || self.kind != other.kind
    }
}

impl PartialEq for FsObject {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.path() == other.path()
            && self.create_date == other.create_date
            && self.modify_date == other.modify_date
            && self.size == other.size
    }
}

fn epoch_to_datetime(secs: i64, nsecs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, nsecs.max(0) as u32)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn seconds_to_datetime(secs: f64) -> DateTime<Utc> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs.fract()) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

/// Seconds since the UNIX epoch, with fractional precision, as used on
/// the wire (`create-timestamp` / `modify-timestamp`).
pub fn datetime_to_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

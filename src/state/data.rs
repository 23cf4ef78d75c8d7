//! Shared data structures for the captioning pipeline
//!
//! These structs are the envelopes that cross the boundary between
//! the UI thread and the caption worker. Everything here is plain data:
//! owned, cloneable, and safe to send over a channel.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::LibraryError;

/// Stable identifier of an image: its filename without extension
///
/// The same stem keys the image, its `.txt` sidecar and any in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(stem: impl Into<String>) -> Self {
        Self(stem.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One image file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    id: ImageId,
    path: PathBuf,
}

impl ImageRef {
    /// Build a reference from a path, making it absolute if needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LibraryError::NoStem(path.to_path_buf()))?;

        Ok(Self {
            id: ImageId::new(stem),
            path: absolute(path)?,
        })
    }

    pub fn id(&self) -> &ImageId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve a relative path against the working directory
pub fn absolute(path: &Path) -> Result<PathBuf, LibraryError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .map_err(LibraryError::CurrentDir)?
        .join(path))
}

/// A caption loaded from (or destined for) a sidecar file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionRecord {
    pub id: ImageId,
    /// Caption text, possibly empty
    pub text: String,
    /// Path of the `<stem>.txt` sidecar
    pub path: PathBuf,
}

/// Ticket handed out by the dispatcher for each submitted job
///
/// Only used for in-flight bookkeeping; results are correlated by `ImageId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobTicket(pub u64);

/// Request envelope sent to the worker
#[derive(Debug, Clone)]
pub struct CaptionJob {
    pub ticket: JobTicket,
    pub image: ImageRef,
}

/// Response envelope: exactly one per successful job
#[derive(Debug, Clone)]
pub struct CaptionResult {
    pub ticket: JobTicket,
    pub image: ImageRef,
    pub text: String,
    pub completed_at: DateTime<Utc>,
}

impl CaptionResult {
    pub fn id(&self) -> &ImageId {
        self.image.id()
    }
}

/// Report of a job the worker had to drop
#[derive(Debug, Clone)]
pub struct CaptionFailure {
    pub ticket: JobTicket,
    pub image: ImageRef,
    pub reason: String,
}

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::data::{CaptionRecord, ImageId, ImageRef};
use crate::error::StoreError;

/// Extension used for caption sidecar files
pub const CAPTION_EXTENSION: &str = "txt";

/// The CaptionStore maps image identifiers to `<stem>.txt` sidecar files
/// living next to the images in the selected directory.
///
/// The mapping from identifier to path is pure: the same stem always
/// resolves to the same file for a given root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionStore {
    root: PathBuf,
}

impl CaptionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the images and their captions
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the caption file for an identifier (doesn't touch the disk)
    pub fn caption_path(&self, id: &ImageId) -> PathBuf {
        self.root.join(format!("{}.{}", id.as_str(), CAPTION_EXTENSION))
    }

    /// Check if a caption file exists for an identifier
    pub fn exists(&self, id: &ImageId) -> bool {
        self.caption_path(id).is_file()
    }

    /// Whether an image lives directly in this store's directory
    pub fn owns(&self, image: &ImageRef) -> bool {
        image.path().parent() == Some(self.root.as_path())
    }

    /// Read the caption text for an identifier
    ///
    /// A missing file is the normal "no caption yet" case and returns `Ok(None)`.
    pub fn read(&self, id: &ImageId) -> Result<Option<String>, StoreError> {
        let path = self.caption_path(id);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| StoreError::Encoding { path })
    }

    /// Overwrite the whole caption file with `text`
    ///
    /// Returns the path that was written.
    pub fn write(&self, id: &ImageId, text: &str) -> Result<PathBuf, StoreError> {
        let path = self.caption_path(id);
        fs::write(&path, text).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Load the full record for an image, if it has a caption
    pub fn load(&self, image: &ImageRef) -> Result<Option<CaptionRecord>, StoreError> {
        let id = image.id();
        Ok(self.read(id)?.map(|text| CaptionRecord {
            id: id.clone(),
            text,
            path: self.caption_path(id),
        }))
    }
}

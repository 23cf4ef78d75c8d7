use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::data::{absolute, ImageRef};
use super::store::{CaptionStore, CAPTION_EXTENSION};
use crate::error::LibraryError;

/// Set of caption files known to exist in the current directory.
///
/// Seeded by the directory scan and extended by the correlator every time
/// it persists a generated caption, so later lookups treat it as existing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownFiles {
    paths: HashSet<PathBuf>,
}

impl KnownFiles {
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Returns true if the path was not already known
    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.paths.insert(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// The ImageLibrary is the listing of one selected directory:
/// its images (sorted by file name) and the caption files already present.
#[derive(Debug, Clone)]
pub struct ImageLibrary {
    root: PathBuf,
    images: Vec<ImageRef>,
    known: KnownFiles,
}

impl ImageLibrary {
    /// Scan a directory (non-recursively) for images and caption files
    ///
    /// `extensions` are matched case-insensitively and given without the dot.
    /// A relative `root` is resolved against the working directory, so the
    /// root always matches the parent of every image path.
    pub fn scan(root: &Path, extensions: &[String]) -> Result<Self, LibraryError> {
        let root = absolute(root)?;
        let root = root.as_path();
        let mut images = Vec::new();
        let mut known = KnownFiles::default();

        for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|source| LibraryError::Scan {
                path: root.to_path_buf(),
                source,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
                continue;
            };

            if ext == CAPTION_EXTENSION {
                known.insert(path.to_path_buf());
            } else if extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
                match ImageRef::new(path) {
                    Ok(image) => images.push(image),
                    Err(e) => tracing::warn!("⚠️  Skipping {}: {}", path.display(), e),
                }
            }
        }

        tracing::info!(
            "🔍 Scanned {}: {} images, {} captions",
            root.display(),
            images.len(),
            known.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            images,
            known,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn image(&self, index: usize) -> Option<&ImageRef> {
        self.images.get(index)
    }

    pub fn known_files(&self) -> &KnownFiles {
        &self.known
    }

    pub fn known_files_mut(&mut self) -> &mut KnownFiles {
        &mut self.known
    }

    /// An image needs a caption when its sidecar is neither known nor on disk
    pub fn needs_caption(&self, image: &ImageRef, store: &CaptionStore) -> bool {
        !self.known.contains(&store.caption_path(image.id())) && !store.exists(image.id())
    }
}

/// Scan a directory on a blocking thread so the UI stays responsive
pub async fn scan_directory_async(
    root: PathBuf,
    extensions: Vec<String>,
) -> Result<ImageLibrary, LibraryError> {
    tokio::task::spawn_blocking(move || ImageLibrary::scan(&root, &extensions))
        .await
        .map_err(|e| LibraryError::Join(e.to_string()))?
}

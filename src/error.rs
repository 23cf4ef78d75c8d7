//! Error types for every layer of the captioner.
//!
//! Each concern gets its own enum so callers can decide how to present it:
//! storage errors go to the status line, model errors stay inside the worker.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or writing caption sidecar files
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read caption {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write caption {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("caption {path} is not valid UTF-8")]
    Encoding { path: PathBuf },
}

/// Errors raised while decoding an image or running the model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("model failed to load: {0}")]
    Load(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference panicked: {0}")]
    Panicked(String),
}

/// Errors from the worker thread lifecycle
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn caption worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("caption worker panicked")]
    Panicked,
}

/// Errors returned to the UI when a job cannot be queued
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("caption worker is no longer running")]
    WorkerGone,
}

/// Errors from building an image reference or scanning a directory
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{0} has no usable file stem")]
    NoStem(PathBuf),

    #[error("failed to resolve current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("background task failed: {0}")]
    Join(String),
}

/// Errors from loading or saving settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine a config directory")]
    NoConfigDir,

    #[error("settings I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from decoding a preview for display
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("failed to open {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("background task failed: {0}")]
    Join(String),
}

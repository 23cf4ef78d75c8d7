/// State management module
///
/// This module handles everything the UI keeps between frames:
/// - Shared data structures crossing the worker boundary (data.rs)
/// - Caption sidecar files on disk (store.rs)
/// - Directory listings and known caption files (library.rs)
/// - Persistent user settings (settings.rs)

pub mod data;
pub mod library;
pub mod settings;
pub mod store;

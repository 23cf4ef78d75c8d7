/// On-screen preview of the selected image
/// Decodes off the UI thread and fits the image inside a square box
use iced::widget::image::Handle;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

use crate::error::PreviewError;
use crate::state::data::ImageId;

/// A decoded, display-sized image ready for the `image` widget
#[derive(Debug, Clone)]
pub struct Preview {
    pub id: ImageId,
    pub handle: Handle,
    pub width: u32,
    pub height: u32,
}

/// Scale `(width, height)` to fit inside `max`×`max`, keeping the aspect ratio
///
/// Small images are scaled up as well, so every preview fills the box.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }

    let ratio = f64::min(max as f64 / width as f64, max as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);
    (new_width, new_height)
}

/// Load a preview on a blocking thread
pub async fn load_preview(id: ImageId, path: PathBuf, max: u32) -> Result<Preview, PreviewError> {
    tokio::task::spawn_blocking(move || load_preview_blocking(id, &path, max))
        .await
        .map_err(|e| PreviewError::Join(e.to_string()))?
}

/// Blocking version of preview loading
fn load_preview_blocking(id: ImageId, path: &Path, max: u32) -> Result<Preview, PreviewError> {
    let img = image::open(path).map_err(|source| PreviewError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = fit_within(img.width(), img.height(), max);
    let rgba = img.resize_exact(width, height, FilterType::Lanczos3).to_rgba8();

    tracing::debug!(
        "🖼️  Preview for {}: {}x{} -> {}x{}",
        id,
        img.width(),
        img.height(),
        width,
        height
    );

    Ok(Preview {
        id,
        handle: Handle::from_rgba(width, height, rgba.into_raw()),
        width,
        height,
    })
}

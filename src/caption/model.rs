//! Model boundary and preprocessing
//!
//! The worker only needs `infer(prepared image) -> text`. Anything that can
//! do that (a real network, a heuristic, a test closure) plugs in through
//! [`CaptionModel`] and is built once on the worker thread by a [`ModelFactory`].

use image::{imageops::FilterType, RgbImage};

use crate::error::ModelError;
use crate::state::data::{ImageId, ImageRef};

/// Image decoded and resized into the model's input format
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub id: ImageId,
    /// Dimensions of the source file before resizing
    pub source_width: u32,
    pub source_height: u32,
    /// Square RGB8 model input
    pub pixels: RgbImage,
}

/// Anything that turns a prepared image into a caption
pub trait CaptionModel: Send {
    fn infer(&mut self, image: &PreparedImage) -> Result<String, ModelError>;
}

impl<F> CaptionModel for F
where
    F: FnMut(&PreparedImage) -> Result<String, ModelError> + Send,
{
    fn infer(&mut self, image: &PreparedImage) -> Result<String, ModelError> {
        self(image)
    }
}

/// Builds the model on the worker thread (called exactly once)
pub type ModelFactory = Box<dyn FnOnce() -> Result<Box<dyn CaptionModel>, ModelError> + Send>;

/// Factory for the built-in [`PaletteCaptioner`]
pub fn default_factory() -> ModelFactory {
    Box::new(|| {
        let model: Box<dyn CaptionModel> = Box::new(PaletteCaptioner::new());
        Ok(model)
    })
}

/// Decodes source images and resizes them to the model input size
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    input_size: u32,
}

impl Preprocessor {
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size: input_size.max(1),
        }
    }

    /// Decode the image from disk and resize it to a square RGB8 input
    pub fn prepare(&self, image: &ImageRef) -> Result<PreparedImage, ModelError> {
        let decoded = image::open(image.path()).map_err(|source| ModelError::Decode {
            path: image.path().to_path_buf(),
            source,
        })?;

        let (source_width, source_height) = (decoded.width(), decoded.height());
        let pixels = decoded
            .resize_exact(self.input_size, self.input_size, FilterType::Triangle)
            .to_rgb8();

        Ok(PreparedImage {
            id: image.id().clone(),
            source_width,
            source_height,
            pixels,
        })
    }
}

/// Luma above which an image is called bright
const BRIGHT_LUMA: f32 = 170.0;
/// Luma below which an image is called dark
const DARK_LUMA: f32 = 85.0;
/// Aspect ratio beyond which an image is no longer square
const SQUARE_TOLERANCE: f32 = 1.1;

/// Default captioner: describes brightness, orientation and dominant colour
///
/// Deterministic and dependency-free, so the app is usable without
/// downloading weights. Swap in a real network through [`ModelFactory`].
pub struct PaletteCaptioner {
    palette: Vec<(&'static str, [f32; 3])>,
}

impl PaletteCaptioner {
    pub fn new() -> Self {
        let palette = [
            ("black", [0, 0, 0]),
            ("white", [255, 255, 255]),
            ("grey", [128, 128, 128]),
            ("red", [200, 30, 30]),
            ("orange", [240, 140, 20]),
            ("yellow", [230, 220, 40]),
            ("green", [40, 160, 60]),
            ("teal", [20, 150, 150]),
            ("blue", [30, 80, 200]),
            ("purple", [130, 50, 160]),
            ("pink", [240, 150, 190]),
            ("brown", [120, 80, 40]),
        ]
        .into_iter()
        .map(|(name, [r, g, b])| (name, [r as f32, g as f32, b as f32]))
        .collect();

        tracing::debug!("🎨 Palette captioner ready");
        Self { palette }
    }

    fn nearest_colour(&self, mean: [f32; 3]) -> &'static str {
        self.palette
            .iter()
            .map(|(name, c)| {
                let d: f32 = c.iter().zip(mean).map(|(a, b)| (a - b) * (a - b)).sum();
                (*name, d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
            .unwrap_or("grey")
    }
}

impl Default for PaletteCaptioner {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptionModel for PaletteCaptioner {
    fn infer(&mut self, image: &PreparedImage) -> Result<String, ModelError> {
        let count = (image.pixels.width() * image.pixels.height()) as usize;
        if count == 0 {
            return Err(ModelError::Inference("empty model input".to_string()));
        }

        let mut sum = [0f32; 3];
        for pixel in image.pixels.pixels() {
            for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                *acc += channel as f32;
            }
        }
        let mean = sum.map(|s| s / count as f32);
        let luma = 0.299 * mean[0] + 0.587 * mean[1] + 0.114 * mean[2];

        let tone = if luma > BRIGHT_LUMA {
            "bright "
        } else if luma < DARK_LUMA {
            "dark "
        } else {
            ""
        };

        let (w, h) = (image.source_width as f32, image.source_height as f32);
        let shape = if w > h * SQUARE_TOLERANCE {
            "landscape"
        } else if h > w * SQUARE_TOLERANCE {
            "portrait"
        } else {
            "square"
        };

        Ok(format!(
            "a {}{} image, mostly {}",
            tone,
            shape,
            self.nearest_colour(mean)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, colour: [u8; 3]) -> PreparedImage {
        PreparedImage {
            id: ImageId::new("test"),
            source_width: width,
            source_height: height,
            pixels: RgbImage::from_pixel(8, 8, Rgb(colour)),
        }
    }

    #[test]
    fn test_palette_describes_colour_and_shape() {
        let mut model = PaletteCaptioner::new();

        let caption = model.infer(&solid(640, 480, [30, 80, 200])).unwrap();
        assert_eq!(caption, "a dark landscape image, mostly blue");

        let caption = model.infer(&solid(100, 300, [250, 250, 250])).unwrap();
        assert_eq!(caption, "a bright portrait image, mostly white");

        let caption = model.infer(&solid(100, 100, [128, 128, 128])).unwrap();
        assert_eq!(caption, "a square image, mostly grey");
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let mut model = PaletteCaptioner::new();
        let mut image = solid(1, 1, [0, 0, 0]);
        image.pixels = RgbImage::new(0, 0);

        assert!(matches!(model.infer(&image), Err(ModelError::Inference(_))));
    }

    #[test]
    fn test_closure_is_a_model() {
        let mut calls = 0;
        let mut model = |image: &PreparedImage| {
            calls += 1;
            Ok::<_, ModelError>(format!("a photo of a {}", image.id))
        };
        let caption = CaptionModel::infer(&mut model, &solid(1, 1, [0, 0, 0])).unwrap();
        assert_eq!(caption, "a photo of a test");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_preprocessor_resizes_to_square() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbImage::from_pixel(40, 10, Rgb([10, 20, 30])).save(&path).unwrap();

        let prepared = Preprocessor::new(16)
            .prepare(&ImageRef::new(&path).unwrap())
            .unwrap();

        assert_eq!(prepared.id.as_str(), "wide");
        assert_eq!((prepared.source_width, prepared.source_height), (40, 10));
        assert_eq!(prepared.pixels.dimensions(), (16, 16));
    }

    #[test]
    fn test_preprocessor_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let result = Preprocessor::new(16).prepare(&ImageRef::new(&path).unwrap());
        assert!(matches!(result, Err(ModelError::Decode { .. })));
    }
}

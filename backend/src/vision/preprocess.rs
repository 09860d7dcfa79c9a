use std::io::{BufRead, Cursor, Seek};
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Limits, Rgb, RgbImage};
use ndarray::{Array3, Array4, ArrayView3, Axis};
use rand::Rng;

use super::augmentations::Augmentation;
use crate::config::PreprocessingConfig;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Empty image payload")]
    Empty,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns encoded images into normalized `3 x H x W` arrays. Serving, training,
/// evaluation and the CLI all go through this type so their inputs match.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    image_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    max_pixels: u64,
    bomb_max_edge: u32,
    max_decode_alloc: Option<u64>,
    augmentation: Augmentation,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(&PreprocessingConfig::default())
    }
}

impl Preprocessor {
    pub fn new(config: &PreprocessingConfig) -> Self {
        Self {
            image_size: config.image_size,
            mean: config.mean,
            std: config.std,
            max_pixels: config.max_pixels,
            bomb_max_edge: config.bomb_max_edge,
            max_decode_alloc: config.max_decode_alloc,
            augmentation: Augmentation::from_config(config),
        }
    }

    /// Same pipeline with the decoder allocation cap lifted.
    pub fn unbounded(mut self) -> Self {
        self.max_decode_alloc = None;
        self
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    pub fn bomb_max_edge(&self) -> u32 {
        self.bomb_max_edge
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
        if bytes.is_empty() {
            return Err(PreprocessError::Empty);
        }
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        self.decode_with(reader)
    }

    pub fn open(&self, path: &Path) -> Result<DynamicImage, PreprocessError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        self.decode_with(reader)
    }

    fn decode_with<R: BufRead + Seek>(
        &self,
        mut reader: ImageReader<R>,
    ) -> Result<DynamicImage, PreprocessError> {
        match self.max_decode_alloc {
            Some(max_alloc) => {
                let mut limits = Limits::default();
                limits.max_alloc = Some(max_alloc);
                reader.limits(limits);
            }
            None => reader.no_limits(),
        }
        Ok(reader.decode()?)
    }

    /// Shrinks decompression-bomb sized images to fit the bomb edge, keeping
    /// the aspect ratio. Other images pass through untouched.
    pub fn guard_bomb(&self, image: DynamicImage) -> DynamicImage {
        let (width, height) = (image.width(), image.height());
        if !exceeds_pixel_limit(width, height, self.max_pixels) {
            return image;
        }
        let (new_width, new_height) = bounded_dimensions(width, height, self.bomb_max_edge);
        log::warn!(
            "Image of {}x{} exceeds {} pixels, resizing to {}x{}",
            width,
            height,
            self.max_pixels,
            new_width,
            new_height
        );
        image.resize_exact(new_width, new_height, FilterType::Lanczos3)
    }

    fn resized_rgb(&self, image: DynamicImage) -> RgbImage {
        let rgb = self.guard_bomb(image).to_rgb8();
        imageops::resize(&rgb, self.image_size, self.image_size, FilterType::Triangle)
    }

    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<Array3<f32>, PreprocessError> {
        Ok(self.preprocess_image(self.decode(bytes)?))
    }

    pub fn preprocess_path(&self, path: &Path) -> Result<Array3<f32>, PreprocessError> {
        Ok(self.preprocess_image(self.open(path)?))
    }

    /// Deterministic pipeline used for serving and evaluation.
    pub fn preprocess_image(&self, image: DynamicImage) -> Array3<f32> {
        self.normalize(&self.resized_rgb(image))
    }

    /// Training pipeline: same as [`Self::preprocess_image`] plus random
    /// flip/rotation after the resize.
    pub fn preprocess_augmented<R: Rng + ?Sized>(
        &self,
        image: DynamicImage,
        rng: &mut R,
    ) -> Array3<f32> {
        let rgb = self.augmentation.apply(self.resized_rgb(image), rng);
        self.normalize(&rgb)
    }

    pub fn normalize(&self, rgb: &RgbImage) -> Array3<f32> {
        let (width, height) = rgb.dimensions();
        Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
            let value = rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - self.mean[c]) / self.std[c]
        })
    }

    /// Inverse of [`Self::normalize`], clamped to the valid pixel range.
    pub fn denormalize(&self, tensor: ArrayView3<'_, f32>) -> RgbImage {
        let (_, height, width) = tensor.dim();
        RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let channel = |c: usize| {
                let value = tensor[[c, y as usize, x as usize]] * self.std[c] + self.mean[c];
                (value.clamp(0.0, 1.0) * 255.0).round() as u8
            };
            Rgb([channel(0), channel(1), channel(2)])
        })
    }
}

pub fn exceeds_pixel_limit(width: u32, height: u32, max_pixels: u64) -> bool {
    width as u64 * height as u64 > max_pixels
}

/// Size that fits `width x height` inside a `max_edge` square with the long
/// edge set to `max_edge`. The short edge is floored and at least 1.
pub fn bounded_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width >= height {
        let short = (max_edge as u64 * height as u64 / width.max(1) as u64) as u32;
        (max_edge, short.max(1))
    } else {
        let short = (max_edge as u64 * width as u64 / height as u64) as u32;
        (short.max(1), max_edge)
    }
}

/// Stacks equally shaped samples into an `N x 3 x H x W` batch.
pub fn stack_batch(samples: &[Array3<f32>]) -> Result<Array4<f32>, ndarray::ShapeError> {
    let views: Vec<_> = samples.iter().map(|sample| sample.view()).collect();
    ndarray::stack(Axis(0), &views)
}

use image::{Rgb, RgbImage, imageops};
use rand::Rng;

use crate::config::PreprocessingConfig;

/// Random transforms applied to training images only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmentation {
    pub horizontal_flip_prob: f64,
    pub max_rotation_degrees: f32,
}

impl Augmentation {
    pub fn from_config(config: &PreprocessingConfig) -> Self {
        Self {
            horizontal_flip_prob: config.horizontal_flip_prob,
            max_rotation_degrees: config.max_rotation_degrees,
        }
    }

    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            max_rotation_degrees: 0.0,
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, mut image: RgbImage, rng: &mut R) -> RgbImage {
        if self.horizontal_flip_prob > 0.0 && rng.random_bool(self.horizontal_flip_prob.min(1.0)) {
            imageops::flip_horizontal_in_place(&mut image);
        }
        if self.max_rotation_degrees > 0.0 {
            let max = self.max_rotation_degrees;
            let angle = rng.random_range(-max..=max);
            image = rotate_about_center(&image, angle);
        }
        image
    }
}

/// Rotates counter-clockwise by `degrees` around the image center, keeping the
/// canvas size. Uses nearest-neighbour sampling; uncovered pixels are black.
pub fn rotate_about_center(image: &RgbImage, degrees: f32) -> RgbImage {
    if degrees == 0.0 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        // inverse mapping: output pixel -> source pixel
        let sx = (cos * dx - sin * dy + cx).round();
        let sy = (sin * dx + cos * dy + cy).round();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
            *image.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        }
    })
}

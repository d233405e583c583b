//! Perceptual image comparison
//!
//! Scores two images with the structural similarity index (SSIM). Both images
//! are normalized to 8-bit RGB; when their descriptors differ, the *second*
//! image is resampled to the first one's resolution before scoring. The first
//! argument's resolution is authoritative, which keeps historical scores
//! reproducible.
//!
//! The metric follows the common reference formulation:
//! - 7×7 uniform window, sample covariance
//! - K1 = 0.01, K2 = 0.03 over a fixed data range of 255
//! - mean over every window that lies fully inside the image
//! - per-channel means averaged over R, G and B

use std::fmt;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Side length of the square similarity window
pub const WINDOW: u32 = 7;
/// Dynamic range of 8-bit channel values
pub const DATA_RANGE: f64 = 255.0;

const K1: f64 = 0.01;
const K2: f64 = 0.03;
const CHANNELS: usize = 3;

/// Errors raised while loading or scoring images
#[derive(Error, Debug)]
pub enum ComparisonError {
    /// File missing or not decodable as an image
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Image smaller than the similarity window
    #[error("image is {width}x{height}, smaller than the {window}x{window} similarity window")]
    TooSmall { width: u32, height: u32, window: u32 },

    /// Low-level scoring called on images of different shape
    #[error("image descriptors differ: {first} vs {second}")]
    DimensionMismatch {
        first: ImageDescriptor,
        second: ImageDescriptor,
    },
}

/// Shape of a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl ImageDescriptor {
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            channels: CHANNELS as u8,
        }
    }
}

impl fmt::Display for ImageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Load an image file as 8-bit RGB, discarding alpha
pub fn load_rgb(path: &Path) -> Result<RgbImage, ComparisonError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| ComparisonError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Score `second` against `first`, both given as file paths
pub fn compare(first: &Path, second: &Path) -> Result<f64, ComparisonError> {
    let first = load_rgb(first)?;
    let second = load_rgb(second)?;
    compare_images(&first, &second)
}

/// Score `second` against `first`, resampling `second` if the shapes differ
pub fn compare_images(first: &RgbImage, second: &RgbImage) -> Result<f64, ComparisonError> {
    let target = ImageDescriptor::of(first);
    let actual = ImageDescriptor::of(second);

    if target == actual {
        return structural_similarity(first, second);
    }

    tracing::debug!("resampling {} to {}", actual, target);
    let resampled = resample_to(second, target);
    structural_similarity(first, &resampled)
}

/// Resize `image` to the target descriptor's dimensions with an anti-aliased filter
pub fn resample_to(image: &RgbImage, target: ImageDescriptor) -> RgbImage {
    imageops::resize(image, target.width, target.height, FilterType::Lanczos3)
}

/// Mean SSIM over the three color channels of two equally shaped images
pub fn structural_similarity(first: &RgbImage, second: &RgbImage) -> Result<f64, ComparisonError> {
    let a = ImageDescriptor::of(first);
    let b = ImageDescriptor::of(second);
    if a != b {
        return Err(ComparisonError::DimensionMismatch {
            first: a,
            second: b,
        });
    }
    if a.width < WINDOW || a.height < WINDOW {
        return Err(ComparisonError::TooSmall {
            width: a.width,
            height: a.height,
            window: WINDOW,
        });
    }

    let total: f64 = (0..CHANNELS)
        .map(|channel| channel_similarity(first, second, channel))
        .sum();
    Ok(total / CHANNELS as f64)
}

fn channel_similarity(first: &RgbImage, second: &RgbImage, channel: usize) -> f64 {
    let (width, height) = first.dimensions();
    let x = |px: u32, py: u32| first.get_pixel(px, py)[channel] as f64;
    let y = |px: u32, py: u32| second.get_pixel(px, py)[channel] as f64;

    let sum_x = SummedArea::new(width, height, x);
    let sum_y = SummedArea::new(width, height, y);
    let sum_xx = SummedArea::new(width, height, |px, py| x(px, py) * x(px, py));
    let sum_yy = SummedArea::new(width, height, |px, py| y(px, py) * y(px, py));
    let sum_xy = SummedArea::new(width, height, |px, py| x(px, py) * y(px, py));

    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let windows_x = width - WINDOW + 1;
    let windows_y = height - WINDOW + 1;
    let mut total = 0.0;

    for wy in 0..windows_y {
        for wx in 0..windows_x {
            let ux = sum_x.window(wx, wy) / n;
            let uy = sum_y.window(wx, wy) / n;
            let uxx = sum_xx.window(wx, wy) / n;
            let uyy = sum_yy.window(wx, wy) / n;
            let uxy = sum_xy.window(wx, wy) / n;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
        }
    }

    total / (windows_x as f64 * windows_y as f64)
}

/// Inclusive prefix sums over a 2D grid, padded with a zero row and column
struct SummedArea {
    stride: usize,
    data: Vec<f64>,
}

impl SummedArea {
    fn new(width: u32, height: u32, value: impl Fn(u32, u32) -> f64) -> Self {
        let stride = width as usize + 1;
        let mut data = vec![0.0; stride * (height as usize + 1)];
        for py in 0..height {
            let mut row = 0.0;
            for px in 0..width {
                row += value(px, py);
                let idx = (py as usize + 1) * stride + px as usize + 1;
                data[idx] = data[idx - stride] + row;
            }
        }
        Self { stride, data }
    }

    fn at(&self, x: u32, y: u32) -> f64 {
        self.data[y as usize * self.stride + x as usize]
    }

    /// Sum of the `WINDOW`-sized square whose top-left pixel is (x, y)
    fn window(&self, x: u32, y: u32) -> f64 {
        let (x1, y1) = (x + WINDOW, y + WINDOW);
        self.at(x1, y1) - self.at(x, y1) - self.at(x1, y) + self.at(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let fx = x as f64 / width as f64;
            let fy = y as f64 / height as f64;
            Rgb([
                (255.0 * fx) as u8,
                (255.0 * fy) as u8,
                (127.5 + 127.5 * (fx * 6.0).sin() * (fy * 4.0).cos()) as u8,
            ])
        })
    }

    fn noise(width: u32, height: u32, seed: u64) -> RgbImage {
        let mut state = seed;
        RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 56) as u8
            };
            Rgb([next(), next(), next()])
        })
    }

    #[test]
    fn test_identical_images_score_one() {
        let img = gradient(64, 48);
        let score = compare_images(&img, &img).unwrap();
        assert!((score - 1.0).abs() < 1e-12, "score was {}", score);
    }

    #[test]
    fn test_solid_vs_noise_scores_lower() {
        let solid = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        let noisy = noise(64, 64, 7);
        let identical = compare_images(&solid, &solid).unwrap();
        let unrelated = compare_images(&solid, &noisy).unwrap();
        assert!(unrelated < identical);
        assert!(unrelated < 0.5, "score was {}", unrelated);
    }

    #[test]
    fn test_repeated_comparison_is_stable() {
        let a = gradient(80, 60);
        let b = noise(40, 30, 3);
        let first = compare_images(&a, &b).unwrap();
        let second = compare_images(&a, &b).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_downscaled_copy_scores_high() {
        let full = gradient(800, 600);
        let half = imageops::resize(&full, 400, 300, FilterType::Lanczos3);
        let score = compare_images(&full, &half).unwrap();
        assert!(score > 0.9, "score was {}", score);
    }

    #[test]
    fn test_second_image_is_resampled() {
        let big = gradient(64, 48);
        let small = gradient(32, 24);
        let resampled = resample_to(&small, ImageDescriptor::of(&big));
        assert_eq!(resampled.dimensions(), (64, 48));

        // Swapping the arguments changes which side is authoritative
        let forward = compare_images(&big, &small).unwrap();
        let backward = compare_images(&small, &big).unwrap();
        assert!(forward > 0.0 && backward > 0.0);
    }

    #[test]
    fn test_descriptor_mismatch_in_low_level_api() {
        let a = gradient(16, 16);
        let b = gradient(16, 17);
        let err = structural_similarity(&a, &b).unwrap_err();
        assert!(matches!(err, ComparisonError::DimensionMismatch { .. }));
        assert!(err.to_string().contains("16x17x3"));
    }

    #[test]
    fn test_too_small_for_window() {
        let tiny = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let err = compare_images(&tiny, &tiny).unwrap_err();
        assert!(matches!(err, ComparisonError::TooSmall { .. }));
    }

    #[test]
    fn test_alpha_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let rgba = image::RgbaImage::from_fn(16, 16, |x, y| {
            image::Rgba([(x * 16) as u8, (y * 16) as u8, 40, (x * y) as u8])
        });
        let opaque = image::RgbaImage::from_fn(16, 16, |x, y| {
            image::Rgba([(x * 16) as u8, (y * 16) as u8, 40, 255])
        });
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        rgba.save(&a).unwrap();
        opaque.save(&b).unwrap();

        let score = compare(&a, &b).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_undecodable_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        gradient(16, 16).save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not an image").unwrap();

        assert!(matches!(
            compare(&good, &bad),
            Err(ComparisonError::Decode { .. })
        ));
        assert!(matches!(
            compare(&dir.path().join("missing.png"), &good),
            Err(ComparisonError::Decode { .. })
        ));
    }
}

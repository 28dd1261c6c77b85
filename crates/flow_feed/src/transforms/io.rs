//! Image codec: file or byte payload -> [`Raster`], and back.
//!
//! Decoding is a chain of [`Transform`] steps:
//!
//! ```text
//! LoadImage (path -> DynamicImage) -> Resize (optional) -> ToRaster (colour mode, BGR order)
//! ```
//!
//! `read_image` and `decode_image` wrap the common chains. Every failure to open or
//! decode a payload is reported as [`FeedError::Decode`] naming the file or key.

use crate::error::FeedError;
use crate::raster::{Raster, SampleDepth};
use crate::transforms::Transform;
use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

/// How many channels a decoded raster should have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Always 3 channels (BGR), 8-bit.
    #[default]
    Color,
    /// Always 1 channel, 8-bit.
    Grayscale,
    /// Channels and sample depth exactly as stored in the payload.
    Unchanged,
}

// ============================================================================
// LoadImage
// ============================================================================

/// Reads and decodes an image file with buffered I/O.
#[derive(Debug, Clone)]
pub struct LoadImage {
    buffer_size: usize,
}

impl Default for LoadImage {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadImage {
    pub fn new() -> Self {
        Self { buffer_size: 8192 }
    }
}

impl Transform<PathBuf, DynamicImage> for LoadImage {
    fn apply(&self, path: PathBuf) -> Result<DynamicImage> {
        let unreadable = |reason: String| FeedError::Decode {
            locator: path.display().to_string(),
            reason,
        };

        let file = File::open(&path).map_err(|e| unreadable(e.to_string()))?;
        let file_size = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
        let mut reader = BufReader::with_capacity(self.buffer_size, file);
        let mut buffer = Vec::with_capacity(file_size);
        reader
            .read_to_end(&mut buffer)
            .map_err(|e| unreadable(e.to_string()))?;

        let image = image::load_from_memory(&buffer).map_err(|e| unreadable(e.to_string()))?;
        Ok(image)
    }
}

// ============================================================================
// DecodeImage
// ============================================================================

/// Decodes an in-memory compressed image (PNG, JPEG). `locator` names the payload
/// in error messages, e.g. the store key it came from.
#[derive(Debug, Clone)]
pub struct DecodeImage {
    locator: String,
}

impl DecodeImage {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
        }
    }
}

impl<'a> Transform<&'a [u8], DynamicImage> for DecodeImage {
    fn apply(&self, bytes: &'a [u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| {
            FeedError::Decode {
                locator: self.locator.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// Resize
// ============================================================================

/// Resizes to exactly `height` x `width` with bilinear filtering.
/// A zero in either dimension leaves the image untouched.
#[derive(Debug, Clone)]
pub struct Resize {
    height: u32,
    width: u32,
}

impl Resize {
    /// Fails with `ShapeMismatch` when a dimension does not fit the codec's `u32`.
    pub fn new(height: usize, width: usize) -> Result<Self> {
        Ok(Self {
            height: dim_u32("resize height", height)?,
            width: dim_u32("resize width", width)?,
        })
    }
}

impl Transform<DynamicImage, DynamicImage> for Resize {
    fn apply(&self, img: DynamicImage) -> Result<DynamicImage> {
        if self.height == 0 || self.width == 0 {
            return Ok(img);
        }
        if img.height() == self.height && img.width() == self.width {
            return Ok(img);
        }
        Ok(img.resize_exact(self.width, self.height, FilterType::Triangle))
    }
}

// ============================================================================
// ToRaster
// ============================================================================

/// Converts a decoded image into an interleaved raster in BGR channel order.
#[derive(Debug, Clone)]
pub struct ToRaster {
    mode: ColorMode,
}

impl ToRaster {
    pub fn new(mode: ColorMode) -> Self {
        Self { mode }
    }

    fn bgr8(img: &DynamicImage) -> Result<Raster> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut data = rgb.into_raw();
        swap_red_blue(&mut data, 3, 1);
        Raster::new(height as usize, width as usize, 3, data)
    }

    fn native(img: DynamicImage) -> Result<Raster> {
        let height = img.height() as usize;
        let width = img.width() as usize;
        let (channels, depth) = match &img {
            DynamicImage::ImageLuma8(_) => (1, SampleDepth::U8),
            DynamicImage::ImageLumaA8(_) => (2, SampleDepth::U8),
            DynamicImage::ImageRgb8(_) => (3, SampleDepth::U8),
            DynamicImage::ImageRgba8(_) => (4, SampleDepth::U8),
            DynamicImage::ImageLuma16(_) => (1, SampleDepth::U16),
            DynamicImage::ImageLumaA16(_) => (2, SampleDepth::U16),
            DynamicImage::ImageRgb16(_) => (3, SampleDepth::U16),
            DynamicImage::ImageRgba16(_) => (4, SampleDepth::U16),
            DynamicImage::ImageRgb32F(_) => (3, SampleDepth::F32),
            DynamicImage::ImageRgba32F(_) => (4, SampleDepth::F32),
            _ => return Self::bgr8(&img),
        };
        let mut data = img.as_bytes().to_vec();
        if channels >= 3 {
            swap_red_blue(&mut data, channels, depth.bytes_per_sample());
        }
        Raster::with_depth(height, width, channels, depth, data)
    }
}

impl Transform<DynamicImage, Raster> for ToRaster {
    fn apply(&self, img: DynamicImage) -> Result<Raster> {
        match self.mode {
            ColorMode::Color => Self::bgr8(&img),
            ColorMode::Grayscale => {
                let gray = img.to_luma8();
                let (width, height) = gray.dimensions();
                Raster::new(height as usize, width as usize, 1, gray.into_raw())
            }
            ColorMode::Unchanged => Self::native(img),
        }
    }
}

/// Swaps the first and third sample of every pixel (RGB <-> BGR).
fn swap_red_blue(data: &mut [u8], channels: usize, sample_bytes: usize) {
    let pixel_bytes = channels * sample_bytes;
    for pixel in data.chunks_exact_mut(pixel_bytes) {
        for b in 0..sample_bytes {
            pixel.swap(b, 2 * sample_bytes + b);
        }
    }
}

// ============================================================================
// Convenience entry points
// ============================================================================

/// Reads an image file, resizing it on load when both target dimensions are > 0.
pub fn read_image(
    path: impl AsRef<Path>,
    height: usize,
    width: usize,
    mode: ColorMode,
) -> Result<Raster> {
    LoadImage::new()
        .then(Resize::new(height, width)?)
        .then(ToRaster::new(mode))
        .apply(path.as_ref().to_path_buf())
}

/// Decodes a compressed image payload held in memory.
pub fn decode_image(bytes: &[u8], mode: ColorMode, locator: &str) -> Result<Raster> {
    DecodeImage::new(locator)
        .then(ToRaster::new(mode))
        .apply(bytes)
}

fn to_dynamic(raster: &Raster) -> Result<DynamicImage> {
    if !raster.is_u8() {
        bail!(FeedError::InvalidPixelFormat(raster.depth().to_string()));
    }
    let (w, h) = (
        dim_u32("image width", raster.width())?,
        dim_u32("image height", raster.height())?,
    );
    let mut data = raster.as_bytes().to_vec();
    let too_small = || FeedError::shape("image buffer", "full raster", "short buffer");
    let image = match raster.channels() {
        1 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, data).ok_or_else(too_small)?),
        2 => DynamicImage::ImageLumaA8(
            GrayAlphaImage::from_raw(w, h, data).ok_or_else(too_small)?,
        ),
        3 => {
            swap_red_blue(&mut data, 3, 1);
            DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, data).ok_or_else(too_small)?)
        }
        4 => {
            swap_red_blue(&mut data, 4, 1);
            DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, data).ok_or_else(too_small)?)
        }
        other => bail!(FeedError::shape("image channels", "1 to 4", other)),
    };
    Ok(image)
}

/// Encodes an 8-bit raster as PNG bytes.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    let image = to_dynamic(raster)?;
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("Failed to encode raster as PNG")?;
    Ok(buffer)
}

/// Writes an 8-bit raster to disk; the format follows the file extension.
pub fn write_image(path: impl AsRef<Path>, raster: &Raster) -> Result<()> {
    let path = path.as_ref();
    to_dynamic(raster)?
        .save(path)
        .with_context(|| format!("Failed to write image: {}", path.display()))
}

fn dim_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| FeedError::shape(what, format!("at most {}", u32::MAX), value).into())
}

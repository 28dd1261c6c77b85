use crate::error::FeedError;
use anyhow::{bail, Result};
use std::fmt;

/// Storage type of a single raster sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDepth {
    U8,
    U16,
    F32,
}

impl SampleDepth {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleDepth::U8 => 1,
            SampleDepth::U16 => 2,
            SampleDepth::F32 => 4,
        }
    }
}

impl fmt::Display for SampleDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleDepth::U8 => "8-bit unsigned",
            SampleDepth::U16 => "16-bit unsigned",
            SampleDepth::F32 => "32-bit float",
        };
        f.write_str(name)
    }
}

/// A decoded image held as interleaved (height, width, channel) samples.
///
/// Colour rasters keep their channels in BGR(A) order. This is the order the
/// flow images were written in, so a flow pixel reads `[frac, v, u]` in memory.
///
/// Samples wider than one byte are stored in native byte order in `data`; only 8-bit
/// rasters can be decoded into flow or stacked.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    height: usize,
    width: usize,
    channels: usize,
    depth: SampleDepth,
    data: Vec<u8>,
}

impl Raster {
    /// Creates an 8-bit raster from interleaved bytes.
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        Self::with_depth(height, width, channels, SampleDepth::U8, data)
    }

    pub fn with_depth(
        height: usize,
        width: usize,
        channels: usize,
        depth: SampleDepth,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = buffer_len(&[height, width, channels, depth.bytes_per_sample()])
            .ok_or_else(|| {
                FeedError::shape(
                    "raster buffer",
                    format!("a size for {}x{}x{} {}", height, width, channels, depth),
                    "an overflowing byte count",
                )
            })?;
        if data.len() != expected {
            bail!(FeedError::shape(
                "raster buffer",
                format!("{} bytes for {}x{}x{} {}", expected, height, width, channels, depth),
                format!("{} bytes", data.len())
            ));
        }
        Ok(Self {
            height,
            width,
            channels,
            depth,
            data,
        })
    }

    /// Builds an 8-bit raster from channel-major (C, H, W) bytes, the layout used
    /// by raw datum payloads.
    pub fn from_planar(channels: usize, height: usize, width: usize, planar: &[u8]) -> Result<Self> {
        let (plane, expected) = buffer_len(&[height, width])
            .and_then(|plane| Some((plane, plane.checked_mul(channels)?)))
            .ok_or_else(|| {
                FeedError::shape(
                    "planar payload",
                    format!("a size for {}x{}x{}", channels, height, width),
                    "an overflowing byte count",
                )
            })?;
        if planar.len() != expected {
            bail!(FeedError::shape(
                "planar payload",
                format!("{} bytes for {}x{}x{}", expected, channels, height, width),
                format!("{} bytes", planar.len())
            ));
        }
        let mut data = vec![0u8; planar.len()];
        for c in 0..channels {
            let src = &planar[c * plane..(c + 1) * plane];
            for (i, &byte) in src.iter().enumerate() {
                data[i * channels + c] = byte;
            }
        }
        Self::new(height, width, channels, data)
    }

    /// Returns the samples as channel-major (C, H, W) bytes.
    pub fn to_planar(&self) -> Result<Vec<u8>> {
        self.ensure_u8()?;
        let plane = self.height * self.width;
        let mut planar = vec![0u8; self.data.len()];
        for (i, pixel) in self.data.chunks_exact(self.channels).enumerate() {
            for (c, &byte) in pixel.iter().enumerate() {
                planar[c * plane + i] = byte;
            }
        }
        Ok(planar)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn depth(&self) -> SampleDepth {
        self.depth
    }

    pub fn is_u8(&self) -> bool {
        self.depth == SampleDepth::U8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Interleaved samples of row `h`. Only meaningful for 8-bit rasters.
    pub fn row(&self, h: usize) -> &[u8] {
        let stride = self.width * self.channels * self.depth.bytes_per_sample();
        &self.data[h * stride..(h + 1) * stride]
    }

    fn ensure_u8(&self) -> Result<()> {
        if !self.is_u8() {
            bail!(FeedError::InvalidPixelFormat(self.depth.to_string()));
        }
        Ok(())
    }
}

/// Product of `dims`, or `None` when it does not fit in `usize`.
fn buffer_len(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

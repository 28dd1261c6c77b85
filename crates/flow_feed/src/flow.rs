//! Fixed-point flow encoding.
//!
//! A flow field (u, v) is stored as a 3-channel 8-bit image. Each pixel holds
//! `[frac, v, u]` bytes:
//!
//! ```text
//! u = (u_byte - 127) + floor(frac / 10) / 10
//! v = (v_byte - 127) + (frac mod 10) / 10
//! ```
//!
//! so both components carry one decimal digit of precision and an integer range
//! of [-127, 128]. The decoded field is planar: channel 0 holds u, channel 1
//! holds v, both row-major.

use crate::error::FeedError;
use crate::raster::Raster;
use crate::tensor::Dtype;
use anyhow::{bail, Result};
use ndarray::{s, ArrayView3, ArrayViewMut3};

const BYTE_OFFSET: f64 = 127.0;

/// Decodes an encoded flow frame into `out`, shape (2, height, width).
///
/// With `subtract_mean`, the mean of each channel over the whole frame is removed
/// from every element of that channel. Nothing is clamped afterwards.
pub fn decode_flow<T: Dtype>(
    encoded: &Raster,
    mut out: ArrayViewMut3<'_, T>,
    subtract_mean: bool,
) -> Result<()> {
    let (channels, height, width) = out.dim();
    if channels != 2 {
        bail!(FeedError::shape("flow field", "2 channels", format!("{} channels", channels)));
    }
    if encoded.channels() != 3 {
        bail!(FeedError::shape(
            "flow image",
            "3 channels",
            format!("{} channels", encoded.channels())
        ));
    }
    if encoded.height() != height || encoded.width() != width {
        bail!(FeedError::shape(
            "flow image",
            format!("{}x{}", height, width),
            format!("{}x{}", encoded.height(), encoded.width())
        ));
    }
    if !encoded.is_u8() {
        bail!(FeedError::InvalidPixelFormat(encoded.depth().to_string()));
    }

    let (mut u_plane, mut v_plane) = out.multi_slice_mut((s![0, .., ..], s![1, .., ..]));
    let mut total_u = 0.0f64;
    let mut total_v = 0.0f64;

    for h in 0..height {
        for (w, pixel) in encoded.row(h).chunks_exact(3).enumerate() {
            let frac = pixel[0] as f64;
            let u_int = (frac / 10.0).floor();
            let v_frac = (frac - 10.0 * u_int) / 10.0;
            let u_frac = u_int / 10.0;

            let v = (pixel[1] as f64 - BYTE_OFFSET) + v_frac;
            let u = (pixel[2] as f64 - BYTE_OFFSET) + u_frac;

            u_plane[[h, w]] = T::from_f64_lossy(u);
            v_plane[[h, w]] = T::from_f64_lossy(v);
            total_u += u;
            total_v += v;
        }
    }

    if subtract_mean && height * width > 0 {
        let count = (height * width) as f64;
        let mean_u = T::from_f64_lossy(total_u / count);
        let mean_v = T::from_f64_lossy(total_v / count);
        u_plane.mapv_inplace(|x| x - mean_u);
        v_plane.mapv_inplace(|x| x - mean_v);
    }
    Ok(())
}

/// Quantises a (2, height, width) flow field into its 3-channel image encoding.
///
/// Each component is rounded to one decimal. Components outside the encodable
/// range [-127, 128.9] saturate.
pub fn encode_flow<T: Dtype>(field: ArrayView3<'_, T>) -> Result<Raster> {
    let (channels, height, width) = field.dim();
    if channels != 2 {
        bail!(FeedError::shape("flow field", "2 channels", format!("{} channels", channels)));
    }

    let mut data = Vec::with_capacity(height * width * 3);
    for h in 0..height {
        for w in 0..width {
            let (u_byte, u_digit) = quantize(field[[0, h, w]].as_f64());
            let (v_byte, v_digit) = quantize(field[[1, h, w]].as_f64());
            data.extend_from_slice(&[u_digit * 10 + v_digit, v_byte, u_byte]);
        }
    }
    Raster::new(height, width, 3, data)
}

/// Splits a component into its offset integer byte and its tenths digit.
fn quantize(value: f64) -> (u8, u8) {
    if !value.is_finite() {
        return (BYTE_OFFSET as u8, 0);
    }
    let tenths = (value * 10.0).round() as i64;
    let whole = tenths.div_euclid(10) + BYTE_OFFSET as i64;
    let digit = tenths.rem_euclid(10);
    match whole {
        w if w < 0 => (0, 0),
        w if w > 255 => (255, 9),
        w => (w as u8, digit as u8),
    }
}

use num_traits::Float;
use std::fmt::{Debug, Display};

/// Floating-point element type of every tensor produced by this crate.
///
/// The feeding layers are written once against `Dtype` and instantiated for
/// `f32` (the usual training type) or `f64`.
pub trait Dtype: Float + Default + Debug + Display + Send + Sync + 'static {
    fn from_byte(byte: u8) -> Self;

    fn from_f64_lossy(value: f64) -> Self;

    fn as_f64(self) -> f64;
}

impl Dtype for f32 {
    #[inline]
    fn from_byte(byte: u8) -> Self {
        byte as f32
    }

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Dtype for f64 {
    #[inline]
    fn from_byte(byte: u8) -> Self {
        byte as f64
    }

    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}

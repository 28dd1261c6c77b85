//! The two data layers that fill batch buffers.
//!
//! - [`FlowDataFeeder`] (`"FlowData"`): flow images listed in an index file; each
//!   item takes `stack_size` consecutive entries.
//! - [`ImageStackFeeder`] (`"ImageStack"`): datum groups in a key-value store; each
//!   item is one record of `stack_size` frames, flow or plain images.
//!
//! Both run inside the prefetch worker, which owns them for their whole life.

mod flow_list;
mod image_stack;

pub use flow_list::FlowDataFeeder;
pub use image_stack::ImageStackFeeder;

use crate::error::FeedError;
use crate::feed::Batch;
use crate::tensor::Dtype;
use crate::transforms::StackTransform;
use anyhow::{bail, Result};
use ndarray::Array3;
use std::ops::AddAssign;
use std::time::Duration;

/// Fills a whole batch buffer per call, items in order.
///
/// A failing item aborts the fill; the buffer contents are then unspecified and the
/// pipeline never exposes it.
pub trait BatchFiller<T: Dtype>: Send {
    /// Layer name used in thread names and logs.
    fn name(&self) -> &str;

    /// (batch_size, channels, height, width) of every batch this layer produces.
    fn batch_dims(&self) -> (usize, usize, usize, usize);

    fn fill(&mut self, batch: &mut Batch<T>) -> Result<CycleTimings>;
}

/// Time spent per stage while filling one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTimings {
    /// Reading files or records.
    pub read: Duration,
    /// Decoding images and flow, stacking frames.
    pub decode: Duration,
    /// Running the stack transform.
    pub transform: Duration,
}

impl CycleTimings {
    pub fn total(&self) -> Duration {
        self.read + self.decode + self.transform
    }
}

impl AddAssign for CycleTimings {
    fn add_assign(&mut self, other: Self) {
        self.read += other.read;
        self.decode += other.decode;
        self.transform += other.transform;
    }
}

/// Per-item output (channels, height, width) after the transform.
fn item_dims<T: Dtype>(
    transform: &dyn StackTransform<T>,
    stack: &Array3<T>,
) -> Result<(usize, usize, usize)> {
    let (channels, height, width) = stack.dim();
    let dims = transform.output_dims(channels, height, width)?;
    if dims.0 != channels {
        bail!(FeedError::shape(
            "stack transform",
            format!("{} channels preserved", channels),
            format!("{} channels", dims.0)
        ));
    }
    Ok(dims)
}

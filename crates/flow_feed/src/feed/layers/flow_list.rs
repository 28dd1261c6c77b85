use super::{item_dims, BatchFiller, CycleTimings};
use crate::error::FeedError;
use crate::feed::{Batch, FeedConfig};
use crate::source::{ListCursor, SourceCursor};
use crate::stacker::FrameStacker;
use crate::tensor::Dtype;
use crate::transforms::{read_image, ColorMode, StackTransform};
use anyhow::{bail, Context, Result};
use log::{debug, info};
use ndarray::Array3;
use std::time::Instant;

/// Feeds stacks of flow images named in an index file.
///
/// Item `k` of a cycle decodes `stack_size` consecutive entries starting at the
/// cursor and is labeled with the first entry's label. Frames are read at the size
/// of the first listed image. When the list runs out exactly at an item boundary
/// the cursor restarts from the top; when fewer than `stack_size` entries are left
/// the fill fails with `ExhaustedSource`.
pub struct FlowDataFeeder<T: Dtype> {
    list: ListCursor,
    stacker: FrameStacker,
    stack: Array3<T>,
    transform: Box<dyn StackTransform<T>>,
    subtract_mean: Vec<bool>,
    batch_size: usize,
    item_dims: (usize, usize, usize),
}

impl<T: Dtype> FlowDataFeeder<T> {
    /// Opens the index file named by `config.source`.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        info!("Opening file {}", config.source.display());
        let list = ListCursor::from_index_file(&config.source, config.root_folder.as_deref())?;
        Self::with_list(config, list)
    }

    pub fn with_list(config: &FeedConfig, list: ListCursor) -> Result<Self> {
        info!("A total of {} images.", list.len());
        if list.len() < config.stack_size {
            bail!(FeedError::ExhaustedSource(format!(
                "{} listed images cannot fill a stack of {}",
                list.len(),
                config.stack_size
            )));
        }

        let first = list.current()?;
        let probe = read_image(&first.locator, 0, 0, ColorMode::Color)
            .with_context(|| format!("Failed to read first image {}", first.locator))?;
        let stacker = FrameStacker::for_flow(config.stack_size, probe.height(), probe.width())?;
        let stack = stacker.allocate::<T>();
        let transform: Box<dyn StackTransform<T>> = Box::new(config.transform.build()?);
        let item_dims = item_dims(transform.as_ref(), &stack)?;

        let feeder = Self {
            list,
            stacker,
            stack,
            transform,
            subtract_mean: config.subtract_mean.flags(config.stack_size, true)?,
            batch_size: config.batch_size,
            item_dims,
        };
        let (b, c, h, w) = feeder.batch_dims();
        info!("Output data size: {},{},{},{}", b, c, h, w);
        Ok(feeder)
    }

    /// Replaces the crop / mirror / scale transform.
    pub fn with_transform(mut self, transform: Box<dyn StackTransform<T>>) -> Result<Self> {
        self.item_dims = item_dims(transform.as_ref(), &self.stack)?;
        self.transform = transform;
        Ok(self)
    }

    fn fill_item(&mut self, item: usize, batch: &mut Batch<T>) -> Result<CycleTimings> {
        let mut timings = CycleTimings::default();
        let stack_size = self.stacker.stack_size();
        if self.list.remaining() < stack_size {
            bail!(FeedError::ExhaustedSource(format!(
                "{} images left at position {}, a stack needs {}",
                self.list.remaining(),
                self.list.position(),
                stack_size
            )));
        }

        let label = self.list.current()?.label;
        let (height, width) = (self.stack.dim().1, self.stack.dim().2);
        for frame in 0..stack_size {
            let start = Instant::now();
            let locator = self.list.current()?.locator.clone();
            let raster = read_image(&locator, height, width, ColorMode::Color)?;
            timings.read += start.elapsed();

            let start = Instant::now();
            self.stacker
                .place_flow(frame, &raster, self.subtract_mean[frame], self.stack.view_mut())
                .with_context(|| format!("Failed to decode flow image {}", locator))?;
            timings.decode += start.elapsed();
            self.list.advance(1)?;
        }

        let start = Instant::now();
        self.transform.transform(self.stack.view(), batch.item_mut(item))?;
        batch.set_label(item, label);
        timings.transform += start.elapsed();

        if self.list.at_end() {
            debug!("Restarting data prefetching from start.");
            self.list.reset()?;
        }
        Ok(timings)
    }
}

impl<T: Dtype> BatchFiller<T> for FlowDataFeeder<T> {
    fn name(&self) -> &str {
        "FlowData"
    }

    fn batch_dims(&self) -> (usize, usize, usize, usize) {
        let (c, h, w) = self.item_dims;
        (self.batch_size, c, h, w)
    }

    fn fill(&mut self, batch: &mut Batch<T>) -> Result<CycleTimings> {
        let mut timings = CycleTimings::default();
        for item in 0..self.batch_size {
            timings += self
                .fill_item(item, batch)
                .with_context(|| format!("Failed to fill item {} of the batch", item))?;
        }
        Ok(timings)
    }
}

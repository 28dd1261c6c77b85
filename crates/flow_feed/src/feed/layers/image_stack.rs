use super::{item_dims, BatchFiller, CycleTimings};
use crate::error::FeedError;
use crate::feed::{Batch, FeedConfig};
use crate::source::{KeyValueStore, SourceCursor, SqliteStore, StoreCursor};
use crate::stacker::FrameStacker;
use crate::tensor::Dtype;
use crate::transforms::StackTransform;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use ndarray::Array3;
use std::time::Instant;

/// Feeds stacks stored as datum groups, one record per item.
///
/// Every record must hold exactly `stack_size` frames. With `is_flow` the frames
/// are encoded flow images (3 channels) decoded to 2 channels each; otherwise they
/// are copied with their own channel count. The item label is the label of frame 0.
pub struct ImageStackFeeder<T: Dtype> {
    cursor: StoreCursor,
    stacker: FrameStacker,
    stack: Array3<T>,
    transform: Box<dyn StackTransform<T>>,
    is_flow: bool,
    force_color: bool,
    subtract_mean: Vec<bool>,
    batch_size: usize,
    item_dims: (usize, usize, usize),
}

impl<T: Dtype> ImageStackFeeder<T> {
    /// Opens the SQLite store named by `config.source` read-only.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        info!("Opening store {}", config.source.display());
        let store = SqliteStore::open_read_only(&config.source)?;
        Self::with_store(config, Box::new(store))
    }

    /// Feeds from an already opened store.
    pub fn with_store(config: &FeedConfig, store: Box<dyn KeyValueStore>) -> Result<Self> {
        let subtract_mean = config.subtract_mean.flags(config.stack_size, config.is_flow)?;
        let cursor = StoreCursor::new(store, config.rand_skip, config.rand_step, config.seed)?;

        let record = cursor.current()?;
        if record.group.len() != config.stack_size {
            bail!(FeedError::Config(format!(
                "record '{}' holds {} frames but stack_size is {}",
                record.key,
                record.group.len(),
                config.stack_size
            )));
        }
        let first = record
            .group
            .data
            .first()
            .ok_or_else(|| FeedError::Config(format!("record '{}' is empty", record.key)))?
            .to_raster(config.force_color, &record.key)
            .with_context(|| format!("Failed to decode first frame of record '{}'", record.key))?;

        let channels_per_frame = if config.is_flow {
            if first.channels() != 3 {
                bail!(FeedError::Config(format!(
                    "flow frames need 3 encoded channels, record '{}' has {}",
                    record.key,
                    first.channels()
                )));
            }
            2
        } else {
            first.channels()
        };
        let stacker = FrameStacker::new(
            config.stack_size,
            channels_per_frame,
            first.height(),
            first.width(),
        )?;
        let stack = stacker.allocate::<T>();
        let transform: Box<dyn StackTransform<T>> = Box::new(config.transform.build()?);
        let item_dims = item_dims(transform.as_ref(), &stack)?;

        let feeder = Self {
            cursor,
            stacker,
            stack,
            transform,
            is_flow: config.is_flow,
            force_color: config.force_color,
            subtract_mean,
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

        let start = Instant::now();
        let record = self.cursor.current()?;
        timings.read += start.elapsed();

        let stack_size = self.stacker.stack_size();
        if record.group.len() != stack_size {
            bail!(FeedError::StackSizeMismatch {
                expected: stack_size,
                actual: record.group.len(),
            });
        }

        let start = Instant::now();
        for (frame, datum) in record.group.data.iter().enumerate() {
            let raster = datum.to_raster(self.force_color, &record.key)?;
            if self.is_flow {
                self.stacker.place_flow(
                    frame,
                    &raster,
                    self.subtract_mean[frame],
                    self.stack.view_mut(),
                )?;
            } else {
                self.stacker.place_image(frame, &raster, self.stack.view_mut())?;
            }
        }
        timings.decode += start.elapsed();

        let label = record.group.label().unwrap_or_default();
        let start = Instant::now();
        self.transform.transform(self.stack.view(), batch.item_mut(item))?;
        batch.set_label(item, label);
        timings.transform += start.elapsed();

        let start = Instant::now();
        let step = self.cursor.next_step();
        self.cursor.advance(step)?;
        if self.cursor.at_end() {
            debug!("Restarting data prefetching from start.");
            self.cursor.reset()?;
        }
        timings.read += start.elapsed();
        Ok(timings)
    }
}

impl<T: Dtype> BatchFiller<T> for ImageStackFeeder<T> {
    fn name(&self) -> &str {
        "ImageStack"
    }

    fn batch_dims(&self) -> (usize, usize, usize, usize) {
        let (c, h, w) = self.item_dims;
        (self.batch_size, c, h, w)
    }

    fn fill(&mut self, batch: &mut Batch<T>) -> Result<CycleTimings> {
        let mut timings = CycleTimings::default();
        for item in 0..self.batch_size {
            let key = self
                .cursor
                .current()
                .map(|r| r.key.clone())
                .unwrap_or_default();
            timings += self
                .fill_item(item, batch)
                .with_context(|| format!("Failed to fill item {} from record '{}'", item, key))?;
        }
        Ok(timings)
    }
}

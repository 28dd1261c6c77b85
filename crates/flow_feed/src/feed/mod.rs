//! Feeding layers and their prefetch pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │ ListCursor / StoreCursor │ (labeled samples, restart on end)
//!            └────────────┬─────────────┘
//!                         │ encoded frames
//!                         ↓
//!            ┌──────────────────────────┐
//!            │  Flow codec / Stacker    │ (stack_size frames -> one stack)
//!            └────────────┬─────────────┘
//!                         ↓
//!            ┌──────────────────────────┐
//!            │     StackTransform       │ (crop / mirror / scale)
//!            └────────────┬─────────────┘
//!                         │ writes the item's slice of the batch
//!                         ↓
//!   [prefetch worker] ── ready slot ──▶ Prefetcher::next_batch()
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/feed/
//! ├── mod.rs          # Public API exports + architecture docs
//! ├── config.rs       # FeedConfig, builder, JSON loading and validation
//! ├── batch.rs        # Batch buffer (data + labels)
//! ├── registry.rs     # Layer name -> factory
//! ├── worker.rs       # Prefetcher: double-buffered background filling
//! ├── layers/
//! │   ├── mod.rs          # BatchFiller trait, CycleTimings
//! │   ├── flow_list.rs    # FlowData layer (index file)
//! │   └── image_stack.rs  # ImageStack layer (key-value store)
//! └── common/
//!     ├── mod.rs
//!     └── thread.rs   # Thread-local worker RNG
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let config = FeedConfig::builder()
//!     .kind("FlowData")
//!     .source("flow_train.txt")
//!     .batch_size(25)
//!     .stack_size(10)
//!     .build();
//!
//! let mut feed = FeedRegistry::<f32>::with_defaults().spawn(&config)?;
//! for _ in 0..iterations {
//!     let batch = feed.next_batch()?;
//!     // batch.data(): (25, 20, H, W), batch.labels(): (25,)
//! }
//! ```

mod batch;
mod common;
mod config;
mod layers;
mod registry;
mod worker;

pub use batch::Batch;
pub use config::{
    Backend, FeedConfig, FeedConfigBuilder, LabelRemapConfig, SubtractMean, TransformConfig,
};
pub use layers::{BatchFiller, CycleTimings, FlowDataFeeder, ImageStackFeeder};
pub use registry::{FeederFactory, FeedRegistry};
pub use worker::{PrefetchOptions, PrefetchState, Prefetcher};

pub use common::thread::{init_worker_rng, worker_gen_bool, worker_gen_range, WORKER_RNG};

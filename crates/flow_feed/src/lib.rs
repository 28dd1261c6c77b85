//! Data-feeding layers for training on optical flow.
//!
//! Flow fields are stored as 8-bit 3-channel images (see [`flow`]). The feeding
//! layers read them from an index file or a key-value store, decode them back to
//! floating point, stack several temporal frames per item and prefetch whole
//! batches on a background thread. [`LabelRemap`] rewrites integer labels.
//!
//! ```ignore
//! use flow_feed::{FeedConfig, FeedRegistry};
//!
//! let config = FeedConfig::from_json_file("flow_train.json")?;
//! let mut feed = FeedRegistry::<f32>::with_defaults().spawn(&config)?;
//! let batch = feed.next_batch()?;
//! ```

pub mod error;
pub mod feed;
pub mod flow;
pub mod label_remap;
pub mod raster;
pub mod source;
pub mod stacker;
pub mod tensor;
pub mod transforms;

pub use error::FeedError;
pub use feed::{
    Batch, BatchFiller, FeedConfig, FeedRegistry, LabelRemapConfig, PrefetchState, Prefetcher,
};
pub use flow::{decode_flow, encode_flow};
pub use label_remap::LabelRemap;
pub use raster::{Raster, SampleDepth};
pub use source::{Datum, DatumGroup, KeyValueStore, ListCursor, Sample, SourceCursor};
pub use stacker::FrameStacker;
pub use tensor::Dtype;

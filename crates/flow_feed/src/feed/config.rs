//! Configuration for the feeding layers.
//!
//! `FeedConfig` is deserialized from JSON (every field has a default) or assembled
//! with the builder:
//!
//! ```ignore
//! let config = FeedConfig::builder()
//!     .kind("FlowData")
//!     .source("train_flow.txt")
//!     .batch_size(32)
//!     .stack_size(10)
//!     .crop_size(224)
//!     .mirror(true)
//!     .seed(7)
//!     .build();
//! config.validate()?;
//! ```
//!
//! ```json
//! { "kind": "ImageStack", "source": "clips.db", "backend": "sqlite",
//!   "batch_size": 16, "stack_size": 5, "is_flow": true,
//!   "subtract_mean": [true, true, false, false, false], "rand_skip": 100 }
//! ```

use crate::error::FeedError;
use crate::transforms::{CropMirrorScale, Phase};
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `<path> <label>` index file.
    #[default]
    List,
    /// SQLite key-value store of datum groups.
    Sqlite,
}

/// Mean subtraction for flow frames: one flag for every frame, or one per stack position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubtractMean {
    All(bool),
    PerFrame(Vec<bool>),
}

impl Default for SubtractMean {
    fn default() -> Self {
        SubtractMean::All(true)
    }
}

impl SubtractMean {
    /// Expands to one flag per stack position.
    ///
    /// Image stacks never subtract a mean: a single flag is ignored for them, but an
    /// explicit per-frame list asking for subtraction is rejected.
    pub fn flags(&self, stack_size: usize, is_flow: bool) -> Result<Vec<bool>> {
        match self {
            SubtractMean::All(flag) => Ok(vec![*flag && is_flow; stack_size]),
            SubtractMean::PerFrame(flags) => {
                if !is_flow && flags.iter().any(|&f| f) {
                    bail!(FeedError::Config(
                        "subtract_mean is only supported for flow stacks".into()
                    ));
                }
                if flags.len() != stack_size {
                    bail!(FeedError::Config(format!(
                        "subtract_mean has {} flags but stack_size is {}",
                        flags.len(),
                        stack_size
                    )));
                }
                Ok(flags.clone())
            }
        }
    }
}

/// Per-item crop / mirror / scale settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Square crop side; 0 keeps the full frame.
    pub crop_size: usize,
    pub mirror: bool,
    pub scale: f64,
    pub phase: Phase,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            crop_size: 0,
            mirror: false,
            scale: 1.0,
            phase: Phase::Train,
        }
    }
}

impl TransformConfig {
    pub fn build(&self) -> Result<CropMirrorScale> {
        CropMirrorScale::new(self.crop_size, self.mirror, self.scale, self.phase)
    }
}

/// Configuration of one feeding layer and its prefetch worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Registered layer name: `"FlowData"` or `"ImageStack"`.
    pub kind: String,
    /// Index file (list backend) or database file (sqlite backend).
    pub source: PathBuf,
    pub backend: Backend,
    /// Prefix for relative paths in an index file.
    pub root_folder: Option<PathBuf>,
    pub batch_size: usize,
    /// Frames per item.
    pub stack_size: usize,
    /// Whether store frames are encoded flow. List sources are always flow.
    pub is_flow: bool,
    pub subtract_mean: SubtractMean,
    /// Decode encoded store frames as 3-channel colour instead of their native layout.
    pub force_color: bool,
    /// Skip a random number of records in `[0, rand_skip)` at start-up (store only).
    pub rand_skip: usize,
    /// Step a random number of records in `[1, rand_step]` between items (store only).
    /// 0 or 1 steps sequentially.
    pub rand_step: usize,
    pub transform: TransformConfig,
    /// Seeds the worker RNG and the store cursor.
    pub seed: u64,
    /// How long `next_batch` waits for the worker before failing.
    pub timeout_ms: u64,
    /// How often a blocked worker checks for shutdown.
    pub poll_interval_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: "FlowData".to_string(),
            source: PathBuf::new(),
            backend: Backend::List,
            root_folder: None,
            batch_size: 1,
            stack_size: 1,
            is_flow: false,
            subtract_mean: SubtractMean::default(),
            force_color: false,
            rand_skip: 0,
            rand_step: 0,
            transform: TransformConfig::default(),
            seed: 0,
            timeout_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl FeedConfig {
    pub fn builder() -> FeedConfigBuilder {
        FeedConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FeedError::Config(format!("invalid feed configuration: {}", e)).into())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed configuration {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse feed configuration {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Checks the settings that do not depend on the data.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| FeedError::Config(msg);
        ensure!(self.batch_size > 0, invalid("batch_size must be greater than 0".into()));
        ensure!(self.stack_size > 0, invalid("stack_size must be greater than 0".into()));
        ensure!(
            !self.source.as_os_str().is_empty(),
            invalid(format!("{} layer has no source", self.kind))
        );
        ensure!(
            self.timeout_ms > 0,
            invalid("timeout_ms must be greater than 0".into())
        );
        ensure!(
            self.poll_interval_ms > 0,
            invalid("poll_interval_ms must be greater than 0".into())
        );
        ensure!(
            self.transform.scale.is_finite(),
            invalid(format!("transform scale must be finite (got {})", self.transform.scale))
        );
        match (self.kind.as_str(), self.backend) {
            ("FlowData", Backend::List) | ("ImageStack", Backend::Sqlite) => {}
            ("FlowData", backend) | ("ImageStack", backend) => bail!(invalid(format!(
                "{} layer cannot read from the {:?} backend",
                self.kind, backend
            ))),
            // Unknown kinds are reported by the registry.
            _ => {}
        }
        let is_flow = self.is_flow || self.kind == "FlowData";
        self.subtract_mean.flags(self.stack_size, is_flow)?;
        Ok(())
    }
}

/// Builder for FeedConfig with method chaining
#[derive(Default)]
pub struct FeedConfigBuilder {
    config: FeedConfig,
}

impl FeedConfigBuilder {
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.config.kind = kind.into();
        self
    }

    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.config.source = source.into();
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn root_folder(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root_folder = Some(root.into());
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    pub fn is_flow(mut self, is_flow: bool) -> Self {
        self.config.is_flow = is_flow;
        self
    }

    pub fn subtract_mean(mut self, subtract: bool) -> Self {
        self.config.subtract_mean = SubtractMean::All(subtract);
        self
    }

    /// One flag per stack position.
    pub fn subtract_mean_per_frame(mut self, flags: Vec<bool>) -> Self {
        self.config.subtract_mean = SubtractMean::PerFrame(flags);
        self
    }

    pub fn force_color(mut self, force: bool) -> Self {
        self.config.force_color = force;
        self
    }

    pub fn rand_skip(mut self, skip: usize) -> Self {
        self.config.rand_skip = skip;
        self
    }

    pub fn rand_step(mut self, step: usize) -> Self {
        self.config.rand_step = step;
        self
    }

    pub fn crop_size(mut self, size: usize) -> Self {
        self.config.transform.crop_size = size;
        self
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.config.transform.mirror = mirror;
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.config.transform.scale = scale;
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.config.transform.phase = phase;
        self
    }

    /// Set the random seed for reproducible feeding.
    ///
    /// Controls the initial skip, the random step and the random transforms.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set how long the consumer waits for a batch.
    ///
    /// - Too low: may fail during legitimately slow decoding.
    /// - Too high: delays detection of a stuck worker.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn build(self) -> FeedConfig {
        self.config
    }
}

/// Lookup table for [`LabelRemap`](crate::LabelRemap).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRemapConfig {
    pub new_label: Vec<i32>,
}

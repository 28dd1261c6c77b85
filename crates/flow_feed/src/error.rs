//! Error taxonomy for the feeding layers.
//!
//! Every fallible function in this crate returns `anyhow::Result`. Failures that a
//! caller may want to tell apart are raised as a [`FeedError`] and then enriched with
//! context (file path, store key, frame index) on the way up. The kind survives the
//! context chain and can be recovered with [`FeedError::kind_of`]:
//!
//! ```ignore
//! match flow_feed::FeedError::kind_of(&err) {
//!     Some(FeedError::ExhaustedSource(_)) => { /* dataset too small */ }
//!     _ => return Err(err),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Malformed or missing source, or configuration inconsistent with the dataset.
    #[error("configuration error: {0}")]
    Config(String),

    /// Channel or dimension contract violated by a codec, stacker or transform.
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("invalid pixel format: expected 8-bit unsigned samples, got {0}")]
    InvalidPixelFormat(String),

    #[error("stack size mismatch: expected {expected} frames, got {actual}")]
    StackSizeMismatch { expected: usize, actual: usize },

    #[error("frame {index} holds {depth} samples, stacking requires 8-bit unsigned")]
    DepthMismatch { index: usize, depth: String },

    /// Corrupt or unreadable image payload.
    #[error("could not decode {locator}: {reason}")]
    Decode { locator: String, reason: String },

    #[error("value {value} at position {position} is outside the remap table [0, {len})")]
    IndexOutOfRange {
        position: usize,
        value: String,
        len: usize,
    },

    /// Fewer samples than one stack requires.
    #[error("source exhausted: {0}")]
    ExhaustedSource(String),

    #[error("prefetch worker is no longer running")]
    WorkerStopped,

    #[error("timed out after {0:?} waiting for a prefetched batch")]
    Timeout(Duration),
}

impl FeedError {
    pub fn shape(
        what: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Finds the typed error inside an `anyhow` chain, if there is one.
    pub fn kind_of(err: &anyhow::Error) -> Option<&FeedError> {
        err.downcast_ref::<FeedError>()
    }
}

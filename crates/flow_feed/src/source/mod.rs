//! Labeled-sample sources.
//!
//! ```text
//! source/
//! ├── list.rs   → `ListCursor` over a `<path> <label>` index file
//! ├── datum.rs  → `Datum` / `DatumGroup` store records (bincode)
//! └── store.rs  → `KeyValueStore` backends and the `StoreCursor`
//! ```
//!
//! A cursor never wraps around by itself: once [`SourceCursor::at_end`] is true,
//! advancing fails with `ExhaustedSource` until the feeding layer calls
//! [`SourceCursor::reset`].

pub mod datum;
pub mod list;
pub mod store;

pub use datum::{Datum, DatumGroup};
pub use list::ListCursor;
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreCursor, StoreRecord};

use anyhow::Result;

/// A labeled sample named by a file path or store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub locator: String,
    pub label: i32,
}

impl Sample {
    pub fn new(locator: impl Into<String>, label: i32) -> Self {
        Self {
            locator: locator.into(),
            label,
        }
    }
}

/// Sequential position over a read-only collection of samples.
pub trait SourceCursor: Send {
    type Item;

    /// The item under the cursor. Fails with `ExhaustedSource` when at the end.
    fn current(&self) -> Result<&Self::Item>;

    /// Moves forward by `step` items, stopping at the end.
    fn advance(&mut self, step: usize) -> Result<()>;

    fn at_end(&self) -> bool;

    /// Rewinds to the first item.
    fn reset(&mut self) -> Result<()>;
}

//! Processing steps around the flow codec.
//!
//! ```text
//! transforms/
//! ├── core.rs   → `Transform<I, O>` trait and `Chain` composition
//! ├── io.rs     → image codec: load / decode / resize / to-raster, PNG writing
//! └── stack.rs  → `StackTransform` applied per batch item (crop, mirror, scale)
//! ```

pub mod core;
pub mod io;
pub mod stack;

pub use core::{Chain, Transform};
pub use io::{decode_image, encode_png, read_image, write_image, ColorMode};
pub use stack::{CropMirrorScale, Phase, StackTransform};

//! Utilities shared by the feeding layers and the prefetch worker.

pub mod thread;

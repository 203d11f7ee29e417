//! Synchronization primitives shared between the driver and its work units.

pub mod barrier;

pub use barrier::CompletionBarrier;

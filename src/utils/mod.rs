//! Shared infrastructure helpers.

pub mod parallel;

pub use parallel::{CancellationToken, ParallelConfig, ParallelError};

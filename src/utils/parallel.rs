//! Worker-pool configuration and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("failed to build thread pool: {0}")]
    ThreadPoolBuild(String),
}

/// Configuration for parallel batch processing.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads; `0` means one per logical CPU.
    pub threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig { threads: 0 }
    }
}

impl ParallelConfig {
    pub fn with_threads(threads: usize) -> Self {
        ParallelConfig { threads }
    }

    /// The thread count actually used.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Builds a dedicated rayon pool of the configured size.
    pub fn build_pool(&self) -> Result<rayon::ThreadPool, ParallelError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.effective_threads())
            .build()
            .map_err(|e| ParallelError::ThreadPoolBuild(e.to_string()))
    }
}

/// Cooperative cancellation signal shared between a batch driver and its
/// caller. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

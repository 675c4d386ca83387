//! Parallel processing configuration and management
//!
//! This module selects the Rayon thread pool an index is materialized on:
//! the global pool, or a dedicated pool with a fixed number of threads.

use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use crate::errors::{ClimIndError, Result};

/// Configuration for parallel processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    #[must_use]
    pub const fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Create a configuration that uses all available CPU cores
    #[must_use]
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Create a configuration that uses a specific number of threads
    #[must_use]
    pub const fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Set up the global Rayon thread pool with the specified configuration
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::ThreadPoolError`] when the global pool was
    /// already initialized or cannot be built.
    pub fn setup_global_pool(&self) -> Result<()> {
        if let Some(num_threads) = self.num_threads {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    ClimIndError::ThreadPoolError(format!(
                        "Failed to initialize thread pool with {num_threads} threads: {e}"
                    ))
                })?;
            info!(threads = num_threads, "configured global thread pool");
        } else {
            debug!("using default thread pool configuration");
        }
        Ok(())
    }

    /// Run `f` inside the configured pool.
    ///
    /// Without a thread count `f` runs on the current (usually global) pool.
    ///
    /// # Errors
    ///
    /// Returns [`ClimIndError::ThreadPoolError`] when the dedicated pool
    /// cannot be built.
    pub fn install<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        match self.num_threads {
            None => Ok(f()),
            Some(num_threads) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .map_err(|e| {
                        ClimIndError::ThreadPoolError(format!(
                            "Failed to build a pool of {num_threads} threads: {e}"
                        ))
                    })?;
                debug!(threads = num_threads, "running on a dedicated thread pool");
                Ok(pool.install(f))
            }
        }
    }

    /// Get the number of threads `install` will use
    #[must_use]
    pub fn current_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(rayon::current_num_threads)
    }
}

/// Get information about the current parallel configuration
#[must_use]
pub fn get_parallel_info() -> ParallelInfo {
    ParallelInfo {
        current_threads: rayon::current_num_threads(),
        available_cores: num_cpus::get(),
        available_parallelism: std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1),
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelInfo {
    pub current_threads: usize,
    pub available_cores: usize,
    pub available_parallelism: usize,
}

impl ParallelInfo {
    /// Log parallel processing information at debug level
    pub fn log(&self) {
        debug!(
            current_threads = self.current_threads,
            available_cores = self.available_cores,
            available_parallelism = self.available_parallelism,
            "parallel processing information"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_pool_runs_closure() {
        let config = ParallelConfig::with_threads(2);
        let threads = config.install(rayon::current_num_threads).unwrap();
        assert_eq!(threads, 2);
        assert_eq!(config.current_threads(), 2);
        assert_eq!(ParallelConfig::default().install(|| 7).unwrap(), 7);
    }

    #[test]
    fn info_reports_cores() {
        let info = get_parallel_info();
        assert!(info.available_cores >= 1);
        assert!(info.current_threads >= 1);
        info.log();
    }
}

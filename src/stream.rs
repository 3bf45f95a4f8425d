//! Streams: the execution queue primitives run on.
//!
//! A stream owns a fixed-size rayon pool. Execution is synchronous; `wait`
//! exists for callers written against asynchronous runtimes.

use crate::config;
use crate::engine::{Engine, RuntimeKind};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Stream {
    engine: Engine,
    pool: rayon::ThreadPool,
}

impl Stream {
    /// Stream with the configured thread count (one thread for the
    /// sequential runtime).
    pub fn new(engine: &Engine) -> Result<Self> {
        let nthreads = match engine.runtime() {
            RuntimeKind::Sequential => 1,
            _ => config::config()
                .num_threads
                .unwrap_or_else(rayon::current_num_threads),
        };
        Self::with_threads(engine, nthreads)
    }

    pub fn with_threads(engine: &Engine, nthreads: usize) -> Result<Self> {
        if nthreads == 0 {
            return Err(Error::invalid("stream needs at least one thread"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|i| format!("dnnp-worker-{i}"))
            .build()
            .map_err(|e| Error::Runtime(format!("failed to build worker pool: {e}")))?;
        log::debug!("stream on {engine} with {nthreads} threads");
        Ok(Self {
            engine: *engine,
            pool,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn nthreads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    pub fn wait(&self) -> Result<()> {
        Ok(())
    }
}

//! # Pool - bounded, blocking pool of crawl writers
//!
//! Many producer threads share a small number of [`CrawlWriter`]s. A caller
//! checks a writer out, writes one or more records, and hands it back; while
//! it is checked out no other caller can reach it.
//!
//! ```text
//! checkout()
//!   |
//!   ├── idle writer available? ──────────────▶ take it
//!   ├── live < max_active? ──────────────────▶ factory.create() (outside the lock)
//!   └── otherwise wait on the condvar ───────▶ until release / slot freed / deadline
//!
//! drop(guard) / release(guard) ──▶ back to idle (destroyed if the pool is shut down)
//! evict(guard) ──────────────────▶ factory.destroy(), slot freed
//! shutdown() ────────────────────▶ destroy idle writers, reject new checkouts
//! ```
//!
//! Creation and destruction go through a [`WriterFactory`] so that the pool
//! itself knows nothing about files or storage.

mod factory;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use config::{ConfigError, PoolParameters};
use seqfile::SeqFileError;
use thiserror::Error;

pub use factory::CrawlWriterFactory;
pub use writer::CrawlWriter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum PoolError {
    /// Every slot stayed busy until the deadline passed.
    #[error("timed out after {waited:?} waiting for a writer")]
    Timeout { waited: Duration },

    /// The factory failed to build a writer. The slot has been freed.
    #[error("failed to create a writer: {0}")]
    WriterCreation(#[source] BoxError),

    /// The pool has been shut down.
    #[error("pool is closed")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] SeqFileError),
}

/// Builds and tears down pooled writers.
pub trait WriterFactory: Send + Sync {
    type Writer: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn create(&self) -> Result<Self::Writer, Self::Error>;

    /// Closes and finalizes a writer that is leaving the pool.
    fn destroy(&self, writer: Self::Writer) -> Result<(), Self::Error>;
}

/// Snapshot of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_active: usize,
    /// Writers that exist or are being created.
    pub live: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub created: u64,
    pub destroyed: u64,
    pub timeouts: u64,
    pub closed: bool,
}

struct PoolState<W> {
    idle: Vec<W>,
    live: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
    timeouts: u64,
}

pub struct WriterPool<F: WriterFactory> {
    factory: F,
    params: PoolParameters,
    state: Mutex<PoolState<F::Writer>>,
    available: Condvar,
}

impl<F: WriterFactory> WriterPool<F> {
    pub fn new(factory: F, params: PoolParameters) -> Self {
        Self {
            factory,
            params,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                closed: false,
                created: 0,
                destroyed: 0,
                timeouts: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn params(&self) -> &PoolParameters {
        &self.params
    }

    /// Checks out a writer, waiting at most the configured `max_wait`.
    pub fn checkout(&self) -> Result<PooledWriter<'_, F>, PoolError> {
        self.checkout_timeout(self.params.max_wait)
    }

    /// Checks out a writer, waiting at most `wait` for one to free up. A
    /// `wait` too large to form a deadline (`Duration::MAX`) waits forever.
    pub fn checkout_timeout(&self, wait: Duration) -> Result<PooledWriter<'_, F>, PoolError> {
        let deadline = Instant::now().checked_add(wait);
        let mut state = self.lock();

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(writer) = state.idle.pop() {
                tracing::debug!(idle = state.idle.len(), "reused idle writer");
                return Ok(self.guard(writer));
            }

            if state.live < self.params.max_active {
                // Reserve the slot, then build outside the lock.
                state.live += 1;
                drop(state);
                return self.create_reserved();
            }

            let Some(deadline) = deadline else {
                state = self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                state.timeouts += 1;
                tracing::debug!(?wait, "checkout timed out");
                return Err(PoolError::Timeout { waited: wait });
            }
            let (next, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn create_reserved(&self) -> Result<PooledWriter<'_, F>, PoolError> {
        match self.factory.create() {
            Ok(writer) => {
                let mut state = self.lock();
                state.created += 1;
                if state.closed {
                    state.live -= 1;
                    drop(state);
                    self.destroy(writer);
                    return Err(PoolError::Closed);
                }
                tracing::debug!(live = state.live, "created writer");
                Ok(self.guard(writer))
            }
            Err(e) => {
                let mut state = self.lock();
                state.live -= 1;
                drop(state);
                self.available.notify_one();
                tracing::warn!(error = %e, "writer creation failed");
                Err(PoolError::WriterCreation(Box::new(e)))
            }
        }
    }

    /// Returns a writer to the pool. Same as dropping the guard.
    pub fn release(&self, guard: PooledWriter<'_, F>) {
        drop(guard);
    }

    /// Removes a writer from the pool for good, closing it through the
    /// factory. Destroy errors are logged, not returned.
    ///
    /// The slot is freed in the pool the guard was checked out from.
    pub fn evict(&self, mut guard: PooledWriter<'_, F>) {
        if !std::ptr::eq(self, guard.pool) {
            tracing::warn!("evicting a writer that belongs to another pool");
        }
        if let Some(writer) = guard.writer.take() {
            guard.pool.retire(writer);
        }
    }

    fn retire(&self, writer: F::Writer) {
        {
            let mut state = self.lock();
            state.live -= 1;
        }
        self.available.notify_one();
        self.destroy(writer);
    }

    /// Destroys every idle writer and rejects further checkouts. Writers that
    /// are checked out stay with their callers and are destroyed when they
    /// come back. Returns how many writers were destroyed.
    pub fn shutdown(&self) -> usize {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle
        };
        self.available.notify_all();

        let count = idle.len();
        for writer in idle {
            self.destroy(writer);
        }
        if count > 0 {
            tracing::info!(destroyed = count, "pool shut down");
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            max_active: self.params.max_active,
            live: state.live,
            idle: state.idle.len(),
            checked_out: state.live - state.idle.len(),
            created: state.created,
            destroyed: state.destroyed,
            timeouts: state.timeouts,
            closed: state.closed,
        }
    }

    fn guard(&self, writer: F::Writer) -> PooledWriter<'_, F> {
        PooledWriter {
            pool: self,
            writer: Some(writer),
        }
    }

    fn give_back(&self, writer: F::Writer) {
        let mut state = self.lock();
        if state.closed {
            state.live -= 1;
            drop(state);
            self.destroy(writer);
        } else {
            state.idle.push(writer);
            drop(state);
        }
        self.available.notify_one();
    }

    fn destroy(&self, writer: F::Writer) {
        if let Err(e) = self.factory.destroy(writer) {
            tracing::warn!(error = %e, "failed to destroy writer");
        }
        self.lock().destroyed += 1;
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<F::Writer>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: WriterFactory> fmt::Debug for WriterPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: WriterFactory> Drop for WriterPool<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive handle on a checked-out writer. Dropping it returns the writer
/// to the pool.
pub struct PooledWriter<'a, F: WriterFactory> {
    pool: &'a WriterPool<F>,
    writer: Option<F::Writer>,
}

impl<F: WriterFactory> fmt::Debug for PooledWriter<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledWriter")
            .field("checked_out", &self.writer.is_some())
            .finish()
    }
}

impl<F: WriterFactory> Deref for PooledWriter<'_, F> {
    type Target = F::Writer;

    fn deref(&self) -> &Self::Target {
        match &self.writer {
            Some(w) => w,
            None => unreachable!("writer taken before drop"),
        }
    }
}

impl<F: WriterFactory> DerefMut for PooledWriter<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.writer {
            Some(w) => w,
            None => unreachable!("writer taken before drop"),
        }
    }
}

impl<F: WriterFactory> Drop for PooledWriter<'_, F> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            self.pool.give_back(writer);
        }
    }
}

#[cfg(test)]
mod tests;

//! PollerManager: pool poller, satu worker thread per poller

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, error, info, warn};

use super::Poller;
use crate::error::{Error, Result};

struct Worker {
    poller: Arc<Poller>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize) -> Result<Self> {
        let poller = Arc::new(Poller::new()?);
        let runner = Arc::clone(&poller);

        let handle = thread::Builder::new()
            .name(format!("courier-poller-{}", id))
            .spawn(move || {
                if let Err(e) = runner.wait() {
                    error!(poller = id, error = %e, "poller wait loop failed");
                }
            })?;

        Ok(Self {
            poller,
            handle: Some(handle),
        })
    }
}

/// Close the poller and join its thread unless we are running on it.
///
/// Berlaku juga untuk worker yang belum masuk pool (grow gagal di tengah).
impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.poller.close() {
            warn!(error = %e, "failed to wake poller on close");
        }

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("poller thread panicked");
            }
        }
    }
}

/// Explicitly owned pool of pollers
///
/// Connection, server dan client menerima `Arc<PollerManager>`; tidak ada
/// instance global.
pub struct PollerManager {
    workers: RwLock<Vec<Worker>>,
    next_id: AtomicUsize,
    closed: AtomicBool,
}

impl PollerManager {
    /// Start `n` pollers, each on its own thread
    pub fn new(n: usize) -> Result<Self> {
        if n < 1 {
            return Err(Error::InvalidArgument(format!(
                "poller count must be at least 1, got {}",
                n
            )));
        }

        let manager = Self {
            workers: RwLock::new(Vec::with_capacity(n)),
            next_id: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        manager.grow(n)?;

        info!(pollers = n, "poller manager started");
        Ok(manager)
    }

    /// `num_cpus / 20 + 1` pollers
    pub fn with_default() -> Result<Self> {
        Self::new(default_poller_nums())
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Uniformly random poller
    pub fn pick(&self) -> Result<Arc<Poller>> {
        if self.is_closed() {
            return Err(Error::PollerClosed);
        }

        let workers = self.workers.read();
        if workers.is_empty() {
            return Err(Error::PollerClosed);
        }
        let idx = rand::thread_rng().gen_range(0..workers.len());
        Ok(Arc::clone(&workers[idx].poller))
    }

    /// Resize the pool.
    ///
    /// Shrinking closes the excess pollers; descriptors registered on them
    /// are orphaned.
    pub fn set_poller_nums(&self, n: usize) -> Result<()> {
        if n < 1 {
            return Err(Error::InvalidArgument(format!(
                "poller count must be at least 1, got {}",
                n
            )));
        }
        if self.is_closed() {
            return Err(Error::PollerClosed);
        }

        let current = self.len();
        if n > current {
            self.grow(n - current)?;
        } else if n < current {
            let removed: Vec<Worker> = {
                let mut workers = self.workers.write();
                let keep = n.min(workers.len());
                workers.drain(keep..).collect()
            };
            // Join di luar lock
            drop(removed);
        }

        debug!(pollers = n, "poller pool resized");
        Ok(())
    }

    fn grow(&self, count: usize) -> Result<()> {
        // Jika spawn gagal, worker yang sudah jalan di-drop dan dihentikan
        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            spawned.push(Worker::spawn(id)?);
        }
        self.workers.write().extend(spawned);
        Ok(())
    }

    /// Close every poller and join the worker threads
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let workers: Vec<Worker> = self.workers.write().drain(..).collect();
        drop(workers);
        info!("poller manager closed");
    }
}

impl Drop for PollerManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Default pool size: satu poller per 20 CPU, minimal satu
pub fn default_poller_nums() -> usize {
    num_cpus::get() / 20 + 1
}

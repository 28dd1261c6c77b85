//! Double-buffered batch prefetching.
//!
//! Two batch buffers circulate between the consumer and one worker thread:
//!
//! ```text
//!            free (bounded 2)                 ready (bounded 1)
//! consumer ───────────────────▶ worker ──────────────────────────▶ consumer
//!  returns the batch it held    fills a free buffer in place       next_batch()
//! ```
//!
//! Buffers move through the channels, so a buffer is either being filled by the
//! worker or read by the consumer, never both. A failed fill is delivered in place
//! of the batch and stops the worker.

use crate::error::FeedError;
use crate::feed::common::thread::init_worker_rng;
use crate::feed::layers::BatchFiller;
use crate::feed::{Batch, FeedConfig};
use crate::tensor::Dtype;
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const NUM_BUFFERS: usize = 2;

/// What the worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchState {
    /// Waiting for a free buffer.
    Idle,
    /// Filling a buffer.
    Filling,
    /// A filled buffer is published or being handed over.
    Ready,
    /// The worker has exited.
    Stopped,
}

impl PrefetchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PrefetchState::Idle,
            1 => PrefetchState::Filling,
            2 => PrefetchState::Ready,
            _ => PrefetchState::Stopped,
        }
    }
}

/// Worker-side settings taken from [`FeedConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PrefetchOptions {
    pub seed: u64,
    /// How long `next_batch` waits before failing with `Timeout`.
    pub timeout: Duration,
    /// How often a blocked worker checks for shutdown.
    pub poll_interval: Duration,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&FeedConfig> for PrefetchOptions {
    fn from(config: &FeedConfig) -> Self {
        Self {
            seed: config.seed,
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Consumer handle of a running prefetch worker.
///
/// Dropping it stops the worker and joins its thread.
pub struct Prefetcher<T: Dtype> {
    name: String,
    batch_dims: (usize, usize, usize, usize),
    timeout: Duration,
    worker: Option<thread::JoinHandle<()>>,
    free_tx: Option<Sender<Batch<T>>>,
    ready_rx: Option<Receiver<Result<Batch<T>>>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    current: Option<Batch<T>>,
}

impl<T: Dtype> Prefetcher<T> {
    /// Allocates both buffers and starts filling the first one immediately.
    pub fn spawn(filler: Box<dyn BatchFiller<T>>, options: PrefetchOptions) -> Result<Self> {
        let name = filler.name().to_string();
        let batch_dims = filler.batch_dims();

        let (free_tx, free_rx) = bounded::<Batch<T>>(NUM_BUFFERS);
        for _ in 0..NUM_BUFFERS {
            free_tx
                .try_send(Batch::zeros(batch_dims))
                .map_err(|_| anyhow!("Failed to queue a free batch buffer"))?;
        }
        let (ready_tx, ready_rx) = bounded::<Result<Batch<T>>>(1);

        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(PrefetchState::Idle as u8));

        let worker = {
            let shutdown = shutdown.clone();
            let state = state.clone();
            let worker_name = name.clone();
            thread::Builder::new()
                .name(format!("{}-prefetch", name.to_lowercase()))
                .spawn(move || {
                    init_worker_rng(options.seed);
                    let worker = Worker {
                        name: worker_name,
                        filler,
                        free_rx,
                        ready_tx,
                        shutdown,
                        state: state.clone(),
                        poll_interval: options.poll_interval,
                    };
                    worker.run();
                    state.store(PrefetchState::Stopped as u8, Ordering::Release);
                })
                .with_context(|| format!("Failed to spawn prefetch worker for {}", name))?
        };

        info!(
            "Prefetching {} batches of {:?} with {} buffers",
            name, batch_dims, NUM_BUFFERS
        );
        Ok(Self {
            name,
            batch_dims,
            timeout: options.timeout,
            worker: Some(worker),
            free_tx: Some(free_tx),
            ready_rx: Some(ready_rx),
            shutdown,
            state,
            current: None,
        })
    }

    /// Blocks until the next batch is ready and exposes it.
    ///
    /// The batch returned by the previous call goes back to the worker for refilling,
    /// so it must not be used after this call (the borrow checker enforces this).
    pub fn next_batch(&mut self) -> Result<&Batch<T>> {
        let Some(ready_rx) = self.ready_rx.as_ref() else {
            bail!(FeedError::WorkerStopped);
        };
        let batch = match ready_rx.recv_timeout(self.timeout) {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                self.ready_rx = None;
                return Err(e.context(format!("{} prefetch worker failed", self.name)));
            }
            Err(RecvTimeoutError::Timeout) => bail!(FeedError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.ready_rx = None;
                bail!(FeedError::WorkerStopped);
            }
        };

        if let (Some(previous), Some(free_tx)) = (self.current.take(), self.free_tx.as_ref()) {
            // Capacity covers every buffer, so this only fails once the worker is gone.
            let _ = free_tx.try_send(previous);
        }
        Ok(&*self.current.insert(batch))
    }

    /// The batch returned by the last `next_batch` call.
    pub fn current(&self) -> Option<&Batch<T>> {
        self.current.as_ref()
    }

    pub fn state(&self) -> PrefetchState {
        PrefetchState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn batch_dims(&self) -> (usize, usize, usize, usize) {
        self.batch_dims
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Dtype> Drop for Prefetcher<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // Closing both channels wakes a worker blocked on either of them.
        self.free_tx.take();
        self.ready_rx.take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("{} prefetch worker panicked", self.name);
            }
        }
        debug!("{} prefetch worker joined", self.name);
    }
}

struct Worker<T: Dtype> {
    name: String,
    filler: Box<dyn BatchFiller<T>>,
    free_rx: Receiver<Batch<T>>,
    ready_tx: Sender<Result<Batch<T>>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    poll_interval: Duration,
}

impl<T: Dtype> Worker<T> {
    fn run(mut self) {
        let mut cycle = 0u64;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.set_state(PrefetchState::Idle);
            let mut batch = match self.free_rx.recv_timeout(self.poll_interval) {
                Ok(batch) => batch,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            self.set_state(PrefetchState::Filling);
            let start = Instant::now();
            match self.filler.fill(&mut batch) {
                Ok(timings) => {
                    batch.cycle = cycle;
                    debug!(
                        "{} batch {}: read {:?}, decode {:?}, transform {:?}, total {:?}",
                        self.name,
                        cycle,
                        timings.read,
                        timings.decode,
                        timings.transform,
                        start.elapsed()
                    );
                    cycle += 1;
                    self.set_state(PrefetchState::Ready);
                    if !self.publish(Ok(batch)) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{} prefetch failed at batch {}: {:#}", self.name, cycle, e);
                    self.publish(Err(e));
                    break;
                }
            }
        }
    }

    /// Hands a result to the consumer. Returns false once the consumer is gone.
    fn publish(&self, result: Result<Batch<T>>) -> bool {
        let mut pending = result;
        loop {
            match self.ready_tx.send_timeout(pending, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        return false;
                    }
                    pending = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn set_state(&self, state: PrefetchState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

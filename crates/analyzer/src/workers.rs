//! Worker threads.
//!
//! One unbounded queue and one consumer thread per input kind. Closing a
//! queue is the shutdown signal: the blocking pop fails once the queue is
//! closed and drained, and the thread returns.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use contracts::{EngineError, EngineResult, ExposureUpdate, FrameEvent, RawBuffer, StatsSnapshot};
use param_pool::PoolItem;
use tracing::{debug, warn};

use crate::engine::AnalyzerCore;

/// Raw buffer plus the exposure it was captured with
#[derive(Debug)]
pub struct RawJob {
    pub buffer: RawBuffer,
    pub prior_exposure: Option<ExposureUpdate>,
}

struct Queue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Queue<T> {
    fn new(name: &'static str) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { name, tx, rx }
    }

    fn send(&self, item: T) -> EngineResult<()> {
        self.tx.try_send(item).map_err(|_| EngineError::Stopped)?;
        metrics::gauge!("isp3a_queue_depth", "queue" => self.name).set(self.tx.len() as f64);
        Ok(())
    }

    /// Close and drop whatever is still queued
    fn close(&self) -> usize {
        self.tx.close();
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

/// The statistics, event and raw-buffer consumer threads
pub struct WorkerThreads {
    stats: Queue<PoolItem<StatsSnapshot>>,
    events: Queue<FrameEvent>,
    raw: Queue<RawJob>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerThreads {
    /// Spawn the three consumers
    ///
    /// Workers hold the core weakly so dropping the engine also ends them.
    pub fn spawn(core: &Arc<AnalyzerCore>) -> EngineResult<Self> {
        let stats = Queue::new("stats");
        let events = Queue::new("events");
        let raw = Queue::new("raw");
        let weak = Arc::downgrade(core);

        let handles = vec![
            spawn_worker("isp3a-stats", stats.rx.clone(), weak.clone(), |core, item| {
                core.process_stats(item)
            })?,
            spawn_worker("isp3a-events", events.rx.clone(), weak.clone(), |core, event| {
                core.process_event(event)
            })?,
            spawn_worker("isp3a-raw", raw.rx.clone(), weak, |core, job: RawJob| {
                core.process_raw(job.buffer, job.prior_exposure)
            })?,
        ];

        Ok(Self {
            stats,
            events,
            raw,
            handles,
        })
    }

    pub fn send_stats(&self, stats: PoolItem<StatsSnapshot>) -> EngineResult<()> {
        self.stats.send(stats)
    }

    pub fn send_event(&self, event: FrameEvent) -> EngineResult<()> {
        self.events.send(event)
    }

    pub fn send_raw(&self, job: RawJob) -> EngineResult<()> {
        self.raw.send(job)
    }

    /// Close every queue, drop pending items and join the threads
    ///
    /// A worker calling this from its own thread is not joined.
    pub fn shutdown(self) {
        let drained = self.stats.close() + self.events.close() + self.raw.close();
        if drained > 0 {
            debug!(drained, "dropped queued items on shutdown");
        }

        let current = thread::current().id();
        for handle in self.handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("isp3a-worker").to_string();
            if handle.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
            }
        }
    }
}

fn spawn_worker<T, F>(
    name: &'static str,
    rx: Receiver<T>,
    core: Weak<AnalyzerCore>,
    handle: F,
) -> EngineResult<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(&AnalyzerCore, T) + Send + 'static,
{
    let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
        debug!(worker = name, "worker started");
        while let Ok(item) = rx.recv_blocking() {
            let Some(core) = core.upgrade() else {
                break;
            };
            handle(&core, item);
        }
        debug!(worker = name, "worker exited");
    })?;
    Ok(worker)
}

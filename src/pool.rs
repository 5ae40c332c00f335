//! Fixed-size worker pool for hot-plug events.
//!
//! `start` launches exactly `size` long-lived workers. Each pulls one unit
//! of work from the shared queue and runs it to completion on the blocking
//! thread pool before pulling the next, so at most `size` units execute at
//! once. Units are unordered and have no result channel: a failure is
//! logged and counted, never retried and never reported to the submitter.
//!
//! With [`QueuePolicy::Unbounded`] nothing limits queued-but-unstarted
//! work; sustained overload grows memory. [`QueuePolicy::DropWhenFull`]
//! trades that for lost events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::QueuePolicy;
use crate::error::Result;

/// One unit of work.
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("work queue is full, unit dropped")]
    QueueFull,
    #[error("worker pool is shut down")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
}

/// Point-in-time pool counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: usize,
    pub failed: usize,
    pub dropped: usize,
}

#[derive(Clone)]
enum Sender {
    Unbounded(mpsc::UnboundedSender<Job>),
    Bounded(mpsc::Sender<Job>),
}

enum Receiver {
    Unbounded(mpsc::UnboundedReceiver<Job>),
    Bounded(mpsc::Receiver<Job>),
}

impl Receiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            Receiver::Unbounded(rx) => rx.recv().await,
            Receiver::Bounded(rx) => rx.recv().await,
        }
    }
}

/// Cloneable handle for enqueueing work from any thread.
#[derive(Clone)]
pub struct Submitter {
    sender: Sender,
    counters: Arc<Counters>,
}

impl Submitter {
    /// Enqueue `job` without waiting for it to start.
    pub fn submit(&self, job: Job) -> std::result::Result<(), SubmitError> {
        match &self.sender {
            Sender::Unbounded(tx) => tx.send(job).map_err(|_| SubmitError::Closed),
            Sender::Bounded(tx) => match tx.try_send(job) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("pool: queue full, dropping unit of work");
                    Err(SubmitError::QueueFull)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
            },
        }
    }
}

pub struct WorkerPool {
    size: usize,
    submitter: Submitter,
    receiver: Arc<Mutex<Receiver>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(size: usize, policy: QueuePolicy) -> Self {
        let (sender, receiver) = match policy {
            QueuePolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Sender::Unbounded(tx), Receiver::Unbounded(rx))
            }
            QueuePolicy::DropWhenFull { capacity } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Sender::Bounded(tx), Receiver::Bounded(rx))
            }
        };
        let counters = Arc::new(Counters::default());

        Self {
            size: size.max(1),
            submitter: Submitter {
                sender,
                counters: counters.clone(),
            },
            receiver: Arc::new(Mutex::new(receiver)),
            workers: Vec::new(),
            counters,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the workers on the current tokio runtime. Calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        for id in 0..self.size {
            let receiver = self.receiver.clone();
            let counters = self.counters.clone();
            self.workers.push(tokio::spawn(worker(id, receiver, counters)));
        }
        debug!("pool: started {} workers", self.size);
    }

    pub fn submit(&self, job: Job) -> std::result::Result<(), SubmitError> {
        self.submitter.submit(job)
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for the workers to drain it.
    ///
    /// The queue only closes once every [`Submitter`] clone is dropped too.
    pub async fn shutdown(self) -> PoolStats {
        let WorkerPool {
            submitter,
            workers,
            counters,
            ..
        } = self;
        drop(submitter);

        for handle in workers {
            if let Err(e) = handle.await {
                warn!("pool: worker exited abnormally: {}", e);
            }
        }

        PoolStats {
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn worker(id: usize, receiver: Arc<Mutex<Receiver>>, counters: Arc<Counters>) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        match tokio::task::spawn_blocking(job).await {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("worker {}: {}", id, e);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("worker {}: unit of work panicked: {}", id, e);
            }
        }
    }
    debug!("worker {}: queue closed", id);
}

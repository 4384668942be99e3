//! Generic, reusable worker pool shared by the scan and hash-join executors.
//!
//! Grounded on `mvcc/transaction.rs`'s background GC thread (native
//! `std::thread`, an `AtomicBool` stop flag, a `Mutex<Option<JoinHandle>>`)
//! generalized from "one fixed thread" to "N threads pulling from a shared
//! channel", since the execution runtime needs a pool many call sites submit
//! to rather than a single dedicated loop. The queue itself is bounded the
//! way `engines/granite/wal.rs`'s worker channel is in the teacher
//! (`mpsc::sync_channel` with a fixed capacity) rather than the unbounded
//! `mpsc::channel`, so a caller that floods the pool fails fast instead of
//! growing memory without limit.

use log::{error, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{MiniSqlError, Result};

/// Default bound on queued-but-not-yet-running jobs, used by `WorkerPool::new`.
/// `with_capacity` overrides it for callers that need a different bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

struct Worker {
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    sender: Mutex<SyncSender<Message>>,
    receiver: Arc<Mutex<Receiver<Message>>>,
    workers: Mutex<Vec<Worker>>,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    size: AtomicUsize,
    closed: AtomicBool,
}

/// A fixed-ish pool of OS threads pulling tasks off a shared channel.
/// Cloning is cheap (`Arc` inside); every clone shares the same queue.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub size: usize,
    pub active: usize,
    pub queued: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self::with_capacity(size, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like `new`, but with an explicit bound on queued-but-not-running jobs.
    pub fn with_capacity(size: usize, queue_capacity: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Message>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let active = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            workers.push(spawn_worker(id, Arc::clone(&receiver), Arc::clone(&active), Arc::clone(&queued)));
        }

        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(sender),
                receiver,
                workers: Mutex::new(workers),
                active,
                queued,
                size: AtomicUsize::new(size),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.inner.size.load(Ordering::SeqCst),
            active: self.inner.active.load(Ordering::SeqCst),
            queued: self.inner.queued.load(Ordering::SeqCst),
        }
    }

    /// Fire-and-forget submission. Fails fast with `PoolClosed` once the
    /// pool has been shut down, or `ResourceExhausted` if the queue is
    /// already at capacity — this never blocks waiting for room.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MiniSqlError::PoolClosed("worker pool is shut down".into()));
        }
        let sender = self.inner.sender.lock().unwrap();
        match sender.try_send(Message::Run(Box::new(job))) {
            Ok(()) => {
                self.inner.queued.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(MiniSqlError::ResourceExhausted(
                "worker pool queue is full".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(MiniSqlError::PoolClosed(
                "worker pool is shut down".into(),
            )),
        }
    }

    /// Like `submit`, but retries while the queue is full instead of
    /// failing immediately, giving up with `ResourceExhausted` once
    /// `timeout` elapses. Still fails fast with `PoolClosed` if the pool is
    /// shut down, even mid-wait.
    pub fn submit_with_timeout<F>(&self, job: F, timeout: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let mut message = Message::Run(Box::new(job));
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(MiniSqlError::PoolClosed("worker pool is shut down".into()));
            }
            let send_result = {
                let sender = self.inner.sender.lock().unwrap();
                sender.try_send(message)
            };
            match send_result {
                Ok(()) => {
                    self.inner.queued.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        return Err(MiniSqlError::ResourceExhausted(
                            "worker pool queue is full".into(),
                        ));
                    }
                    message = returned;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(MiniSqlError::PoolClosed("worker pool is shut down".into()));
                }
            }
        }
    }

    /// Submit a job and block for its result.
    pub fn submit_wait<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.submit(move || {
            let _ = tx.send(job());
        })?;
        rx.recv().map_err(|_| MiniSqlError::TaskPanic("worker task panicked before producing a result".into()))
    }

    /// Submit many jobs and collect their results in submission order.
    /// A job whose task panics yields a `TaskPanic` error in its slot rather
    /// than aborting the whole batch.
    pub fn submit_batch<F, T>(&self, jobs: Vec<F>) -> Vec<Result<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let pending: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let (tx, rx) = mpsc::channel();
                let submitted = self.submit(move || {
                    let _ = tx.send(job());
                });
                (submitted, rx)
            })
            .collect();

        pending
            .into_iter()
            .map(|(submitted, rx)| match submitted {
                Ok(()) => rx.recv().map_err(|_| MiniSqlError::TaskPanic("worker task panicked before producing a result".into())),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Grow or shrink the pool. Shrinking sends one shutdown message per
    /// removed worker; in-flight tasks on remaining workers are unaffected.
    pub fn resize(&self, new_size: usize) {
        let new_size = new_size.max(1);
        let mut workers = self.inner.workers.lock().unwrap();
        let current = workers.len();
        if new_size > current {
            for id in current..new_size {
                workers.push(spawn_worker(
                    id,
                    Arc::clone(&self.inner.receiver),
                    Arc::clone(&self.inner.active),
                    Arc::clone(&self.inner.queued),
                ));
            }
        } else if new_size < current {
            {
                let sender = self.inner.sender.lock().unwrap();
                for _ in new_size..current {
                    let _ = sender.send(Message::Shutdown);
                }
            }
            for worker in workers.drain(new_size..) {
                if let Some(handle) = worker.handle {
                    let _ = handle.join();
                }
            }
        }
        self.inner.size.store(new_size, Ordering::SeqCst);
        warn!("worker pool resized from {} to {} threads", current, new_size);
    }

    pub fn shutdown(&self) {
        self.shutdown_with_timeout(Duration::from_secs(30));
    }

    pub fn shutdown_with_timeout(&self, timeout: Duration) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut workers = self.inner.workers.lock().unwrap();
        {
            let sender = self.inner.sender.lock().unwrap();
            for _ in 0..workers.len() {
                let _ = sender.send(Message::Shutdown);
            }
        }
        let deadline = std::time::Instant::now() + timeout;
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                if std::time::Instant::now() >= deadline {
                    warn!("worker pool shutdown timed out waiting for a thread to join");
                    break;
                }
                let _ = handle.join();
            }
        }
    }
}

fn spawn_worker(id: usize, receiver: Arc<Mutex<Receiver<Message>>>, active: Arc<AtomicUsize>, queued: Arc<AtomicUsize>) -> Worker {
    let handle = thread::Builder::new()
        .name(format!("minisql-worker-{}", id))
        .spawn(move || loop {
            let msg = {
                let rx = receiver.lock().unwrap();
                rx.recv()
            };
            match msg {
                Ok(Message::Run(job)) => {
                    queued.fetch_sub(1, Ordering::SeqCst);
                    active.fetch_add(1, Ordering::SeqCst);
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                    active.fetch_sub(1, Ordering::SeqCst);
                    if let Err(payload) = result {
                        error!("worker {} task panicked: {}", id, panic_message(&payload));
                    }
                }
                Ok(Message::Shutdown) | Err(_) => break,
            }
        })
        .expect("failed to spawn worker thread");
    Worker { handle: Some(handle) }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn submit_wait_returns_result() {
        let pool = WorkerPool::new(2);
        let result = pool.submit_wait(|| 2 + 2).unwrap();
        assert_eq!(result, 4);
    }

    #[test]
    fn submit_batch_preserves_order() {
        let pool = WorkerPool::new(4);
        let jobs: Vec<_> = (0..10).map(|i| move || i * i).collect();
        let results = pool.submit_batch(jobs);
        let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_task_reports_task_panic_without_killing_pool() {
        let pool = WorkerPool::new(2);
        let err = pool.submit_wait(|| -> i32 { panic!("boom") });
        assert!(matches!(err, Err(MiniSqlError::TaskPanic(_))));
        let ok = pool.submit_wait(|| 1).unwrap();
        assert_eq!(ok, 1);
    }

    #[test]
    fn concurrent_submissions_all_complete() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicI64::new(0));
        let jobs: Vec<_> = (0..50)
            .map(|_| {
                let c = Arc::clone(&counter);
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();
        let results = pool.submit_batch(jobs);
        assert!(results.into_iter().all(|r| r.is_ok()));
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let pool = WorkerPool::new(2);
        pool.resize(4);
        assert_eq!(pool.stats().size, 4);
        pool.resize(1);
        assert_eq!(pool.stats().size, 1);
        assert_eq!(pool.submit_wait(|| 7).unwrap(), 7);
    }

    #[test]
    fn submit_after_shutdown_returns_pool_closed() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        let err = pool.submit(|| {});
        assert!(matches!(err, Err(MiniSqlError::PoolClosed(_))));
    }

    #[test]
    fn submit_fails_fast_when_queue_is_full() {
        let pool = WorkerPool::with_capacity(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        pool.submit(move || {
            let _ = gate_rx.lock().unwrap().recv();
        })
        .unwrap();
        // give the lone worker time to pick the job up so the queue slot is free for the next submit
        thread::sleep(Duration::from_millis(20));

        pool.submit(|| {}).unwrap();
        let err = pool.submit(|| {});
        assert!(matches!(err, Err(MiniSqlError::ResourceExhausted(_))));
        let _ = gate_tx.send(());
    }

    #[test]
    fn submit_with_timeout_waits_for_room_then_succeeds() {
        let pool = WorkerPool::with_capacity(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        pool.submit(move || {
            let _ = gate_rx.lock().unwrap().recv();
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        pool.submit(|| {}).unwrap();

        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = gate_tx.send(());
        });
        let result = pool.submit_with_timeout(|| {}, Duration::from_secs(2));
        opener.join().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn submit_with_timeout_gives_up_past_the_deadline() {
        let pool = WorkerPool::with_capacity(1, 1);
        let (_gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        pool.submit(move || {
            let _ = gate_rx.lock().unwrap().recv();
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        pool.submit(|| {}).unwrap();

        let result = pool.submit_with_timeout(|| {}, Duration::from_millis(30));
        assert!(matches!(result, Err(MiniSqlError::ResourceExhausted(_))));
    }
}

//! Fixed-width worker pool fed by a bounded queue.
//!
//! `reserve` waits while the queue is full, which is what slows the
//! dispatcher down when every worker is busy.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// A unit of work with a label for diagnostics.
struct PoolTask {
    label: String,
    future: BoxFuture<'static, ()>,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// What happened to outstanding work at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Every queued and running task finished before the deadline
    pub drained: bool,
    /// Tasks that were queued or running when the deadline passed
    pub abandoned: usize,
}

/// Runs submitted futures on `width` long-lived worker tasks.
pub struct WorkerPool {
    width: usize,
    sender: Mutex<Option<mpsc::Sender<PoolTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Start `width` workers sharing a queue of `capacity` pending tasks.
    pub fn new(width: usize, capacity: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = mpsc::channel::<PoolTask>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..width)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        info!("Worker pool started with {} workers", width);

        Self {
            width,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Tasks accepted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Wait for room in the queue and hold it until the returned slot is
    /// used or dropped.
    ///
    /// Fails with [`WorkerError::PoolClosed`] once shutdown has begun.
    pub async fn reserve(&self) -> WorkerResult<PoolSlot> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| WorkerError::PoolClosed)?
            .clone()
            .ok_or(WorkerError::PoolClosed)?;

        let permit = sender
            .reserve_owned()
            .await
            .map_err(|_| WorkerError::PoolClosed)?;

        Ok(PoolSlot {
            permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Queue a task, waiting for room if the queue is full.
    pub async fn submit<F>(&self, label: impl Into<String>, future: F) -> WorkerResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.reserve().await?.submit(label, future);
        Ok(())
    }

    /// Stop accepting work and wait up to `drain_timeout` for queued and
    /// running tasks to finish. Workers still busy after that are aborted.
    pub async fn shutdown(&self, drain_timeout: Duration) -> DrainReport {
        // Dropping the sender lets workers exit once the queue is empty
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let mut workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };

        info!(
            "Draining worker pool: {} running, {} queued",
            self.in_flight(),
            self.queued()
        );

        let drained = tokio::time::timeout(drain_timeout, join_all(workers.iter_mut()))
            .await
            .is_ok();

        if drained {
            info!("Worker pool drained");
            return DrainReport {
                drained: true,
                abandoned: 0,
            };
        }

        let abandoned = self.in_flight() + self.queued();
        for worker in &workers {
            worker.abort();
        }
        let _ = join_all(workers.iter_mut()).await;
        metrics::set_pool_in_flight(0);

        warn!(
            "Worker pool drain timed out after {:?}; abandoned {} jobs",
            drain_timeout, abandoned
        );

        DrainReport {
            drained: false,
            abandoned,
        }
    }
}

/// A reserved place in the pool queue. Dropping it gives the place back.
pub struct PoolSlot {
    permit: mpsc::OwnedPermit<PoolTask>,
    counters: Arc<Counters>,
}

impl PoolSlot {
    /// Queue `future` in the reserved place. Never waits.
    pub fn submit<F>(self, label: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        self.permit.send(PoolTask {
            label: label.into(),
            future: future.boxed(),
        });
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PoolTask>>>,
    counters: Arc<Counters>,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        let running = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_pool_in_flight(running);
        debug!(worker = id, "Running {}", task.label);

        if let Err(panic) = AssertUnwindSafe(task.future).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(worker = id, "Task {} panicked: {}", task.label, message);
            metrics::record_pool_panic();
        }

        let running = counters.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_pool_in_flight(running);
    }

    debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::{oneshot, Semaphore};

    #[tokio::test]
    async fn test_runs_submitted_tasks() {
        let pool = WorkerPool::new(2, 2);
        let (tx, rx) = oneshot::channel();

        pool.submit("answer", async move {
            let _ = tx.send(42);
        })
        .await
        .unwrap();

        assert_eq!(rx.await.unwrap(), 42);
        let report = pool.shutdown(Duration::from_secs(1)).await;
        assert!(report.drained);
        assert_eq!(report.abandoned, 0);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 1);

        pool.submit("boom", async { panic!("boom") }).await.unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit("after", async move {
            let _ = tx.send(());
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await.drained);
    }

    #[tokio::test]
    async fn test_submit_blocks_when_saturated() {
        let pool = WorkerPool::new(1, 1);
        let gate = Arc::new(Semaphore::new(0));

        // one running, one queued
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            pool.submit("blocked", async move {
                let _ = gate.acquire().await;
            })
            .await
            .unwrap();
        }

        let third = pool.submit("third", async {});
        assert!(
            tokio::time::timeout(Duration::from_millis(50), third)
                .await
                .is_err(),
            "submit should wait while the queue is full"
        );

        gate.add_permits(10);
        tokio::time::timeout(Duration::from_secs(1), pool.submit("fourth", async {}))
            .await
            .unwrap()
            .unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await.drained);
    }

    #[tokio::test]
    async fn test_dropped_slot_frees_room() {
        let pool = WorkerPool::new(1, 1);
        let gate = Arc::new(Semaphore::new(0));

        let held = Arc::clone(&gate);
        pool.submit("running", async move {
            let _ = held.acquire().await;
        })
        .await
        .unwrap();
        while pool.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let slot = pool.reserve().await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pool.reserve())
                .await
                .is_err(),
            "a held slot should fill the queue"
        );
        drop(slot);

        let slot = tokio::time::timeout(Duration::from_secs(1), pool.reserve())
            .await
            .unwrap()
            .unwrap();
        let (tx, rx) = oneshot::channel();
        slot.submit("reserved", async move {
            let _ = tx.send(());
        });
        assert_eq!(pool.queued(), 1);

        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)).await.drained);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_stuck_tasks() {
        let pool = WorkerPool::new(1, 2);
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        pool.submit("stuck", async move {
            std::future::pending::<()>().await;
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();
        pool.submit("waiting", async {}).await.unwrap();

        // let the worker pick up the first task
        while pool.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let report = pool.shutdown(Duration::from_millis(50)).await;
        assert!(!report.drained);
        assert_eq!(report.abandoned, 2);
        assert!(!finished.load(Ordering::SeqCst));

        assert!(matches!(
            pool.submit("late", async {}).await,
            Err(WorkerError::PoolClosed)
        ));
    }
}

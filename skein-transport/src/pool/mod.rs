//! Expandable pool of worker tasks for request handlers.
//!
//! Handlers run on a pool rather than on the connection's read loop so one
//! slow call never blocks the calls behind it. The pool starts with
//! `initial_workers` tasks and grows on demand up to `max_workers`; past the
//! ceiling, work waits in a FIFO queue. Nothing submitted before
//! [`WorkerPool::shutdown`] is ever dropped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;

/// A unit of work accepted by the pool.
pub type Task = BoxFuture<'static, ()>;

/// Errors returned by [`WorkerPool::run`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("worker pool is shut down")]
    ShutDown,
}

struct Shared {
    name: String,
    max_workers: usize,
    queue: AsyncMutex<mpsc::UnboundedReceiver<Task>>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    queued: AtomicUsize,
}

/// Pool of tokio tasks draining a shared FIFO queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("workers", &self.worker_count())
            .field("idle", &self.idle_workers())
            .field("queued", &self.queued())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool and spawn its initial workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: config.name,
            max_workers: config.max_workers.max(config.initial_workers).max(1),
            queue: AsyncMutex::new(rx),
            workers: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        });

        let pool = Self {
            shared,
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(Vec::with_capacity(config.initial_workers)),
        };
        for _ in 0..config.initial_workers {
            if pool.reserve_worker() {
                pool.spawn_worker();
            }
        }
        tracing::debug!(
            pool = %pool.shared.name,
            workers = config.initial_workers,
            max = pool.shared.max_workers,
            "worker pool started"
        );
        pool
    }

    /// Queue `task` for execution. Never waits for it to run.
    ///
    /// A new worker is spawned when queued work outnumbers idle workers and
    /// the pool is below its ceiling.
    pub fn run(&self, task: Task) -> Result<(), PoolError> {
        // Held across the spawn so shutdown cannot miss a fresh worker handle.
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(PoolError::ShutDown);
        };

        let queued = self.shared.queued.fetch_add(1, Ordering::AcqRel) + 1;
        if tx.send(task).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(PoolError::ShutDown);
        }

        if queued > self.shared.idle.load(Ordering::Acquire) && self.reserve_worker() {
            self.spawn_worker();
            tracing::debug!(
                pool = %self.shared.name,
                workers = self.worker_count(),
                "grew worker pool"
            );
        }
        Ok(())
    }

    /// Stop accepting work, drain the queue and wait for every worker to exit.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(pool = %self.shared.name, error = %e, "worker exited abnormally");
            }
        }
        tracing::debug!(pool = %self.shared.name, "worker pool shut down");
    }

    /// Live workers.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }

    /// Workers waiting for a task.
    pub fn idle_workers(&self) -> usize {
        self.shared.idle.load(Ordering::Acquire)
    }

    /// Tasks submitted but not yet picked up.
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    fn reserve_worker(&self) -> bool {
        self.shared
            .workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.shared.max_workers).then_some(n + 1)
            })
            .is_ok()
    }

    fn spawn_worker(&self) {
        // A worker is born idle so the count is right before it first polls.
        self.shared.idle.fetch_add(1, Ordering::AcqRel);
        let shared = self.shared.clone();
        let handle = tokio::spawn(worker_loop(shared));
        self.handles.lock().push(handle);
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = shared.queue.lock().await.recv().await;
        let Some(task) = task else { break };

        shared.idle.fetch_sub(1, Ordering::AcqRel);
        shared.queued.fetch_sub(1, Ordering::AcqRel);

        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            tracing::error!(
                pool = %shared.name,
                panic = panic_message(panic.as_ref()),
                "task panicked"
            );
        }

        shared.idle.fetch_add(1, Ordering::AcqRel);
    }
    shared.idle.fetch_sub(1, Ordering::AcqRel);
    shared.workers.fetch_sub(1, Ordering::AcqRel);
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use super::*;

    fn gated(gate: &Arc<Semaphore>, started: &mpsc::UnboundedSender<()>) -> Task {
        let gate = gate.clone();
        let started = started.clone();
        Box::pin(async move {
            let _ = started.send(());
            let _permit = gate.acquire().await.expect("gate open");
        })
    }

    #[tokio::test]
    async fn test_idle_workers_absorb_tasks_without_growth() {
        let pool = WorkerPool::new(PoolConfig::new("test", 4, 16));
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        for _ in 0..4 {
            pool.run(gated(&gate, &started_tx)).expect("run");
        }
        for _ in 0..4 {
            started_rx.recv().await.expect("task started");
        }
        assert_eq!(pool.worker_count(), 4);
        assert_eq!(pool.idle_workers(), 0);

        gate.add_permits(4);
        pool.shutdown().await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_grows_to_ceiling_then_queues() {
        let pool = WorkerPool::new(PoolConfig::new("test", 1, 3));
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        for _ in 0..5 {
            pool.run(gated(&gate, &started_tx)).expect("run");
        }
        for _ in 0..3 {
            started_rx.recv().await.expect("task started");
        }
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.queued(), 2);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), started_rx.recv())
                .await
                .is_err(),
            "no fourth task may start while the pool is saturated"
        );

        gate.add_permits(5);
        for _ in 0..2 {
            started_rx.recv().await.expect("queued task started");
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_every_task_runs_exactly_once() {
        let pool = WorkerPool::new(PoolConfig::fixed("test", 3));
        let hits = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());

        for i in 0..100 {
            let hits = hits.clone();
            pool.run(Box::pin(async move {
                tokio::task::yield_now().await;
                hits[i].fetch_add(1, Ordering::SeqCst);
            }))
            .expect("run");
        }
        pool.shutdown().await;

        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.queued(), 0);
    }

    async fn explode() {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(PoolConfig::fixed("test", 1));
        let (tx, rx) = tokio::sync::oneshot::channel();

        pool.run(Box::pin(explode())).expect("run");
        pool.run(Box::pin(async move {
            let _ = tx.send(());
        }))
        .expect("run");

        rx.await.expect("task after panic still runs");
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(PoolConfig::fixed("test", 1));
        pool.shutdown().await;
        pool.shutdown().await;

        assert_eq!(pool.run(Box::pin(async {})), Err(PoolError::ShutDown));
    }

    #[test]
    fn test_panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}

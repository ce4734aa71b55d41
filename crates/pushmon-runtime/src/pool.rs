use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Lifecycle of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    /// Graceful stop in progress: no new work, queue still draining.
    Draining,
    /// Forced stop in progress: no new work, queue abandoned.
    Terminating,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool is draining, terminating or stopped. Callers should stop
    /// producing work.
    #[error("worker pool is closed")]
    Closed,

    /// The queue is full and no worker is running yet to free a slot.
    #[error("worker pool queue is full and the pool is not started")]
    QueueFull,

    /// Workers were still busy when the forced stop timeout elapsed.
    #[error("worker pool did not stop within {0:?}")]
    StopTimeout(Duration),
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Tasks dropped from the queue by a forced stop.
    pub abandoned: u64,
}

struct Shared {
    state: PoolState,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

/// Fixed-size pool of async workers pulling from one bounded queue.
///
/// Every task runs in its own tokio task, so an `Err` or a panic is
/// recorded and the worker moves on to the next job. A forced stop never
/// aborts a task that already started; it only stops workers from taking
/// new ones.
pub struct WorkerPool {
    size: usize,
    shared: Mutex<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    terminate: CancellationToken,
    stopped: CancellationToken,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Creates a pool of `size` workers over a queue holding up to
    /// `queue_capacity` pending tasks. Workers start on [`WorkerPool::start`].
    pub fn new(size: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            size: size.max(1),
            shared: Mutex::new(Shared {
                state: PoolState::Created,
                sender: Some(sender),
                workers: Vec::new(),
            }),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            terminate: CancellationToken::new(),
            stopped: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> PoolState {
        self.lock().state
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Spawns the workers. Must be called inside a tokio runtime; a no-op
    /// unless the pool is still `Created`.
    pub fn start(&self) {
        let mut shared = self.lock();
        if shared.state == PoolState::Created {
            self.spawn_workers(&mut shared);
        }
    }

    fn spawn_workers(&self, shared: &mut Shared) {
        shared.state = PoolState::Running;
        shared.workers = (0..self.size)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    self.receiver.clone(),
                    self.terminate.clone(),
                    self.counters.clone(),
                ))
            })
            .collect();
        tracing::debug!(workers = self.size, "Worker pool started");
    }

    /// Queues `task`, waiting for space if the queue is full.
    ///
    /// Returns [`PoolError::Closed`] once either stop mode has begun. Before
    /// [`WorkerPool::start`] nothing drains the queue, so a full queue is
    /// rejected with [`PoolError::QueueFull`] instead of waiting.
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: Job = Box::pin(task);
        let sender = {
            let shared = self.lock();
            let sender = shared.sender.clone().ok_or(PoolError::Closed)?;
            match shared.state {
                PoolState::Running => sender,
                PoolState::Created => {
                    sender.try_send(job).map_err(|e| match e {
                        mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
                        mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
                    })?;
                    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                _ => return Err(PoolError::Closed),
            }
        };

        tokio::select! {
            biased;
            sent = sender.send(job) => sent.map_err(|_| PoolError::Closed)?,
            _ = self.terminate.cancelled() => return Err(PoolError::Closed),
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stops accepting work, runs everything already queued, and returns once
    /// every worker has exited.
    pub async fn stop_graceful(&self) {
        let workers = {
            let mut shared = self.lock();
            match shared.state {
                PoolState::Created | PoolState::Running => {
                    if shared.state == PoolState::Created {
                        self.spawn_workers(&mut shared);
                    }
                    shared.state = PoolState::Draining;
                    shared.sender = None;
                    Some(std::mem::take(&mut shared.workers))
                }
                _ => None,
            }
        };
        let Some(workers) = workers else {
            self.stopped.cancelled().await;
            return;
        };

        tracing::info!(workers = workers.len(), "Draining worker pool");
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker exited abnormally");
            }
        }
        self.finish();
    }

    /// Stops accepting work and tells workers to exit without draining the
    /// queue. Tasks already running are waited for, up to `timeout`.
    ///
    /// Escalates a graceful stop that is still draining: queued tasks are
    /// dropped and the drain is given at most `timeout` to finish.
    pub async fn stop_forced(&self, timeout: Duration) -> Result<(), PoolError> {
        let stop = {
            let mut shared = self.lock();
            match shared.state {
                PoolState::Created | PoolState::Running => {
                    shared.state = PoolState::Terminating;
                    shared.sender = None;
                    ForcedStop::Owner(std::mem::take(&mut shared.workers))
                }
                PoolState::Draining => {
                    shared.state = PoolState::Terminating;
                    ForcedStop::Escalate
                }
                PoolState::Terminating | PoolState::Stopped => ForcedStop::Wait,
            }
        };

        let joined = match stop {
            ForcedStop::Owner(workers) => {
                self.terminate.cancel();
                let joined = tokio::time::timeout(timeout, async {
                    for handle in workers {
                        let _ = handle.await;
                    }
                })
                .await;
                self.log_abandoned(self.abandon_queue().await);
                self.finish();
                joined
            }
            ForcedStop::Escalate => {
                tracing::info!("Escalating graceful drain to forced stop");
                self.terminate.cancel();
                self.log_abandoned(self.abandon_queue().await);
                // The draining caller still owns the worker handles and
                // marks the pool stopped once they exit.
                tokio::time::timeout(timeout, self.stopped.cancelled()).await
            }
            ForcedStop::Wait => tokio::time::timeout(timeout, self.stopped.cancelled()).await,
        };

        match joined {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Workers still busy after forced stop timeout"
                );
                Err(PoolError::StopTimeout(timeout))
            }
        }
    }

    fn log_abandoned(&self, abandoned: u64) {
        if abandoned > 0 {
            tracing::warn!(abandoned, "Forced stop dropped queued tasks");
        }
    }

    async fn abandon_queue(&self) -> u64 {
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut abandoned = 0;
        while receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        self.counters.abandoned.fetch_add(abandoned, Ordering::Relaxed);
        abandoned
    }

    fn finish(&self) {
        self.lock().state = PoolState::Stopped;
        self.stopped.cancel();
        tracing::debug!("Worker pool stopped");
    }
}

enum ForcedStop {
    /// This call moved the pool out of `Running` and owns the workers.
    Owner(Vec<JoinHandle<()>>),
    /// A graceful drain is in progress and must be cut short.
    Escalate,
    /// Another forced stop is already in progress, or the pool is stopped.
    Wait,
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    terminate: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = terminate.cancelled() => break,
            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(job) = job else {
            break;
        };

        match tokio::spawn(job).await {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker = id, error = %e, "Task failed");
            }
            Err(e) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker = id, error = %e, "Task panicked");
            }
        }
    }
    tracing::trace!(worker = id, "Worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn explode() -> anyhow::Result<()> {
        panic!("task exploded")
    }

    #[tokio::test]
    async fn graceful_stop_drains_large_backlog() {
        let pool = WorkerPool::new(4, 16);
        pool.start();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..1_000 {
            let done = done.clone();
            pool.submit(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        pool.stop_graceful().await;
        assert_eq!(done.load(Ordering::SeqCst), 1_000);
        assert_eq!(pool.state(), PoolState::Stopped);
        assert_eq!(pool.stats().completed, 1_000);
        assert_eq!(pool.stats().submitted, 1_000);
    }

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let graceful = WorkerPool::new(2, 4);
        graceful.start();
        graceful.stop_graceful().await;
        assert_eq!(graceful.submit(async { Ok(()) }).await, Err(PoolError::Closed));

        let forced = WorkerPool::new(2, 4);
        forced.start();
        forced.stop_forced(Duration::from_secs(1)).await.unwrap();
        assert_eq!(forced.submit(async { Ok(()) }).await, Err(PoolError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_while_draining_is_rejected() {
        let pool = Arc::new(WorkerPool::new(1, 4));
        pool.start();
        pool.submit(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap();

        let stopper = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.stop_graceful().await })
        };
        while pool.state() != PoolState::Draining {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.submit(async { Ok(()) }).await, Err(PoolError::Closed));
        stopper.await.unwrap();
        assert_eq!(pool.stats().completed, 1);
    }

    #[tokio::test]
    async fn failing_and_panicking_tasks_keep_workers_alive() {
        let pool = WorkerPool::new(2, 8);
        pool.start();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            pool.submit(async { explode() }).await.unwrap();
            pool.submit(async { Err(anyhow::anyhow!("sample failed")) })
                .await
                .unwrap();
        }
        for _ in 0..50 {
            let done = done.clone();
            pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        pool.stop_graceful().await;
        let stats = pool.stats();
        assert_eq!(done.load(Ordering::SeqCst), 50);
        assert_eq!(stats.completed, 50);
        assert_eq!(stats.failed, 10);
        assert_eq!(stats.panicked, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_worker_count() {
        let pool = WorkerPool::new(3, 64);
        pool.start();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..30 {
            let active = active.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        pool.stop_graceful().await;
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_stop_waits_for_running_task_and_abandons_queue() {
        let pool = WorkerPool::new(1, 16);
        pool.start();
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let queued_ran = Arc::new(AtomicUsize::new(0));

        {
            let started = started.clone();
            let finished = finished.clone();
            pool.submit(async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_secs(1)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        started.notified().await;

        for _ in 0..5 {
            let queued_ran = queued_ran.clone();
            pool.submit(async move {
                queued_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        pool.stop_forced(Duration::from_secs(5)).await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(queued_ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().abandoned, 5);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_stop_reports_timeout() {
        let pool = WorkerPool::new(1, 4);
        pool.start();
        let started = Arc::new(Notify::new());
        {
            let started = started.clone();
            pool.submit(async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap();
        }
        started.notified().await;

        let result = pool.stop_forced(Duration::from_secs(1)).await;
        assert_eq!(result, Err(PoolError::StopTimeout(Duration::from_secs(1))));
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_stop_cuts_short_a_graceful_drain() {
        let pool = Arc::new(WorkerPool::new(1, 64));
        pool.start();
        let started = Arc::new(Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        for i in 0..50 {
            let started = started.clone();
            let ran = ran.clone();
            pool.submit(async move {
                if i == 0 {
                    started.notify_one();
                }
                ran.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap();
        }
        started.notified().await;

        let drainer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.stop_graceful().await })
        };
        while pool.state() != PoolState::Draining {
            tokio::task::yield_now().await;
        }

        let start = tokio::time::Instant::now();
        let result = pool.stop_forced(Duration::from_secs(1)).await;
        let elapsed = start.elapsed();

        assert_eq!(result, Err(PoolError::StopTimeout(Duration::from_secs(1))));
        assert!(elapsed <= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert_eq!(pool.stats().abandoned, 49);

        drainer.await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().completed, 1);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_stop_while_terminating_honors_timeout() {
        let pool = Arc::new(WorkerPool::new(1, 4));
        pool.start();
        let started = Arc::new(Notify::new());
        {
            let started = started.clone();
            pool.submit(async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap();
        }
        started.notified().await;

        let first = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.stop_forced(Duration::from_secs(60)).await })
        };
        while pool.state() != PoolState::Terminating {
            tokio::task::yield_now().await;
        }

        let second = pool.stop_forced(Duration::from_secs(1)).await;
        assert_eq!(second, Err(PoolError::StopTimeout(Duration::from_secs(1))));
        assert_eq!(first.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn full_queue_before_start_is_rejected() {
        let pool = WorkerPool::new(1, 2);
        for _ in 0..2 {
            pool.submit(async { Ok(()) }).await.unwrap();
        }
        assert_eq!(pool.submit(async { Ok(()) }).await, Err(PoolError::QueueFull));
        assert_eq!(pool.stats().submitted, 2);

        pool.stop_graceful().await;
        assert_eq!(pool.stats().completed, 2);
    }

    #[tokio::test]
    async fn tasks_queued_before_start_run_on_graceful_stop() {
        let pool = WorkerPool::new(2, 8);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        assert_eq!(pool.state(), PoolState::Created);

        pool.stop_graceful().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }
}

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::error::ReplicationError;

use super::health::{HealthMonitor, OperationType, Outcome};

/// Ordering among queued requests of the same type. Higher priority
/// runs first; equal priorities run in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueuedRequest {
    priority: Priority,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: priority first, then earlier seq wins.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct TypeWorker {
    queue: Mutex<BinaryHeap<QueuedRequest>>,
    notify: Notify,
}

/// Handle to a queued replication request. Dropping it does not cancel
/// the work; call [`cancel`](Self::cancel) for that.
pub struct RequestHandle<T> {
    rx: oneshot::Receiver<Result<T, ReplicationError>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> RequestHandle<T> {
    /// Mark the request cancelled. A still-queued request is skipped
    /// without side effects; an in-flight request runs to completion
    /// but its result is discarded, and the caller observes
    /// [`ReplicationError::Cancelled`] either way.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub async fn outcome(self) -> Result<T, ReplicationError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::Cancelled),
        }
    }
}

/// Serializes replication operations per type (one in-flight each)
/// while letting different types proceed concurrently. Outcomes feed
/// the health monitor; terminal failures close the type until the host
/// resets it.
pub struct RequestCoordinator {
    monitor: Arc<HealthMonitor>,
    capacity: usize,
    seq: AtomicU64,
    workers: HashMap<OperationType, Arc<TypeWorker>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RequestCoordinator {
    pub fn new(monitor: Arc<HealthMonitor>, capacity: usize) -> Self {
        let mut workers = HashMap::new();
        let mut tasks = Vec::new();

        for op in OperationType::ALL {
            let worker = Arc::new(TypeWorker {
                queue: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
            });
            workers.insert(op, Arc::clone(&worker));
            tasks.push(tokio::spawn(run_worker(worker)));
        }

        Self {
            monitor,
            capacity,
            seq: AtomicU64::new(0),
            workers,
            tasks,
        }
    }

    /// Queue a replication operation. Fails fast when the type is
    /// terminally blocked, when an outbound push is suppressed by a
    /// Failed state inside its backoff window, or when the per-type
    /// queue is full.
    pub fn enqueue<T, F>(
        &self,
        op: OperationType,
        priority: Priority,
        fut: F,
    ) -> Result<RequestHandle<T>, ReplicationError>
    where
        F: Future<Output = Result<T, ReplicationError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.monitor.is_blocked(op) {
            return Err(ReplicationError::Suppressed(op));
        }
        if op.is_outbound() && !self.monitor.push_allowed(op) {
            return Err(ReplicationError::Suppressed(op));
        }

        let worker = &self.workers[&op];
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let monitor = Arc::clone(&self.monitor);
        let cancel_flag = Arc::clone(&cancelled);
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let result = fut.await;
                let outcome = match &result {
                    Ok(_) => Some(Outcome::Success),
                    Err(e) if e.counts_toward_health() => Some(if e.is_terminal() {
                        Outcome::Terminal
                    } else {
                        Outcome::Retryable
                    }),
                    Err(_) => None,
                };
                // Health is recorded before the caller is woken, so a
                // caller observing state right after completion never
                // races the transition. The outcome counts even when
                // the caller already cancelled.
                if let Some(outcome) = outcome {
                    monitor.record(op, outcome);
                }
                if cancel_flag.load(AtomicOrdering::SeqCst) {
                    let _ = tx.send(Err(ReplicationError::Cancelled));
                } else {
                    let _ = tx.send(result);
                }
            })
        });

        {
            let mut queue = worker.queue.lock().expect("queue lock poisoned");
            if queue.len() >= self.capacity {
                return Err(ReplicationError::QueueFull(op));
            }
            queue.push(QueuedRequest {
                priority,
                seq: self.seq.fetch_add(1, AtomicOrdering::SeqCst),
                cancelled: Arc::clone(&cancelled),
                job,
            });
        }
        worker.notify.notify_one();

        Ok(RequestHandle { rx, cancelled })
    }

    /// Enqueue and wait for the result.
    pub async fn submit<T, F>(
        &self,
        op: OperationType,
        priority: Priority,
        fut: F,
    ) -> Result<T, ReplicationError>
    where
        F: Future<Output = Result<T, ReplicationError>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(op, priority, fut)?.outcome().await
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_worker(worker: Arc<TypeWorker>) {
    loop {
        let next = {
            let mut queue = worker.queue.lock().expect("queue lock poisoned");
            queue.pop()
        };

        match next {
            Some(request) => {
                if request.cancelled.load(AtomicOrdering::SeqCst) {
                    continue;
                }
                (request.job)().await;
            }
            None => worker.notify.notified().await,
        }
    }
}

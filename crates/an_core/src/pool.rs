//! Bounded worker pool for per-item batch work.
//!
//! Each [`TaskPool::run`] call owns its own semaphore, dispatches one task
//! per item, and drains every dispatched task before returning. Results are
//! reassembled in input order and failures are kept apart from successes, so
//! one bad item never fails the batch.
//!
//! Cancellation is checked between dispatches: tasks already running finish
//! normally, nothing new starts, and the outcome is flagged as cancelled.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{Error, Result};

pub const DEFAULT_WORKERS: usize = 8;

/// Caller-owned abort flag shared with running batches.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the signal is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Successful results as `(input index, value)`, in input order.
    pub completed: Vec<(usize, T)>,
    /// Failed items as `(input index, error)`, in input order.
    pub failures: Vec<(usize, Error)>,
    /// Dispatch stopped early because the cancel signal was set.
    pub cancelled: bool,
}

impl<T> BatchOutcome<T> {
    pub fn values(self) -> Vec<T> {
        self.completed.into_iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TaskPool {
    workers: usize,
    cancel: CancelSignal,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl TaskPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> BatchOutcome<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(items.len());
        let mut cancelled = false;

        for (index, item) in items.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    cancelled = true;
                    break;
                }
            };
            if self.cancel.is_cancelled() {
                tracing::debug!("Batch cancelled before dispatching item {}", index);
                cancelled = true;
                break;
            }
            let fut = task(index, item);
            handles.push((
                index,
                tokio::spawn(async move {
                    let _permit = permit;
                    fut.await
                }),
            ));
        }

        let mut completed = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();
        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(value)) => completed.push((index, value)),
                Ok(Err(e)) => failures.push((index, e)),
                Err(e) => failures.push((
                    index,
                    Error::External(anyhow::anyhow!("task {} did not complete: {}", index, e)),
                )),
            }
        }

        BatchOutcome {
            completed,
            failures,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let pool = TaskPool::new(4);
        let outcome = pool
            .run(vec![40u64, 10, 30, 0], |i, delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(i * 10)
            })
            .await;
        assert!(!outcome.cancelled);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.values(), vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let pool = TaskPool::new(2);
        let outcome = pool
            .run(vec![1, 2, 3], |_, n| async move {
                if n == 2 {
                    Err(Error::Embedding("boom".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(outcome.completed, vec![(0, 1), (2, 3)]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = TaskPool::new(2);
        let outcome = pool
            .run((0..8).collect(), |_, n: usize| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(n)
                }
            })
            .await;
        assert_eq!(outcome.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let cancel = CancelSignal::new();
        let pool = TaskPool::new(1).with_cancel(cancel.clone());
        let outcome = pool
            .run(vec![0, 1, 2, 3], |_, n| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    Ok(n)
                }
            })
            .await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.values(), vec![0]);
    }

    #[test]
    fn test_cancel_signal_check() {
        let cancel = CancelSignal::new();
        assert!(cancel.check().is_ok());
        cancel.cancel();
        assert!(matches!(cancel.check(), Err(Error::Cancelled)));
    }
}

//! Bounded work queue drained by a fixed pool of tasks.
//!
//! Each worker folds its results into its own accumulator; [`WorkerPool::join`]
//! closes the queue, waits for every worker and hands back the
//! accumulators.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

pub struct WorkerPool<T, R> {
    tx: mpsc::Sender<T>,
    workers: JoinSet<R>,
}

impl<T, R> std::fmt::Debug for WorkerPool<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Default + Send + 'static,
{
    /// Start `workers` tasks (at least one) behind a queue of `capacity`
    /// items (at least one).
    pub fn spawn<F, Fut, O>(workers: usize, capacity: usize, handler: F, fold: fn(&mut R, O)) -> Self
    where
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut set = JoinSet::new();

        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            let handler = handler.clone();
            set.spawn(async move {
                let mut acc = R::default();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(item) = next else { break };
                    fold(&mut acc, handler(item).await);
                }
                acc
            });
        }

        Self { tx, workers: set }
    }

    /// Queue an item, waiting while the queue is full. Returns `false` if
    /// every worker has gone away.
    pub async fn submit(&self, item: T) -> bool {
        self.tx.send(item).await.is_ok()
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn join(self) -> Vec<R> {
        let Self { tx, mut workers } = self;
        drop(tx);

        let mut out = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(acc) => out.push(acc),
                Err(e) => tracing::error!("worker task failed: {}", e),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(acc: &mut u64, n: u64) {
        *acc += n;
    }

    #[tokio::test]
    async fn test_every_item_processed_once() {
        let pool: WorkerPool<u64, u64> = WorkerPool::spawn(4, 2, |n| async move { n }, add);
        for n in 1..=100 {
            assert!(pool.submit(n).await);
        }
        let partials = pool.join().await;
        assert_eq!(partials.len(), 4);
        assert_eq!(partials.iter().sum::<u64>(), 5050);
    }

    #[tokio::test]
    async fn test_zero_sizes_are_clamped() {
        let pool: WorkerPool<u64, u64> = WorkerPool::spawn(0, 0, |n| async move { n * 2 }, add);
        pool.submit(21).await;
        assert_eq!(pool.join().await, vec![42]);
    }

    #[tokio::test]
    async fn test_join_without_items() {
        let pool: WorkerPool<u64, u64> = WorkerPool::spawn(3, 8, |n| async move { n }, add);
        assert_eq!(pool.join().await, vec![0, 0, 0]);
    }
}

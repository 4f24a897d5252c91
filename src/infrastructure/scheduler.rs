//! Single-worker task scheduler.
//!
//! Serialises long-running indexer jobs (refresh, per-subtree update,
//! bundle extraction) onto one background worker that polls its queue at
//! a fixed interval and runs jobs strictly one at a time. There is no
//! job registry, checkpointing, or priority queue here, just a FIFO of
//! closures run one at a time.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

type BoxedJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A handle to the scheduler's single worker. Cloning shares the same
/// underlying queue and worker.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<VecDeque<BoxedJob>>,
    notify: Notify,
}

impl Scheduler {
    /// Spawn the worker task and return a handle to schedule jobs onto it.
    pub fn start() -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        let worker_inner = inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = worker_inner.notify.notified() => {}
                }
                loop {
                    let job = {
                        let mut queue = worker_inner.queue.lock().await;
                        queue.pop_front()
                    };
                    match job {
                        Some(job) => {
                            trace!("scheduler running job");
                            job.await;
                        }
                        None => break,
                    }
                }
            }
        });
        Scheduler { inner }
    }

    /// Enqueue a job. Jobs run strictly in FIFO order, one at a time.
    pub async fn schedule<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("scheduling indexer job");
        self.inner.queue.lock().await.push_back(Box::pin(job));
        self.inner.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn jobs_run_serially_in_order() {
        let scheduler = Scheduler::start();
        let order = Arc::new(Mutex::new(Vec::<u32>::new()));

        for i in 0..5 {
            let order = order.clone();
            scheduler
                .schedule(async move {
                    order.lock().await.push(i);
                })
                .await;
        }

        // give the worker time to drain the queue
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn only_one_job_runs_at_a_time() {
        let scheduler = Scheduler::start();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            scheduler
                .schedule(async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}

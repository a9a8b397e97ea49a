//! Bulk dispatch engine.
//!
//! Drains a chat's pending join requests page by page: each page is fanned
//! out to a bounded pool of workers over a queue, every remote call passes
//! the shared rate limiter, and a page is fully drained before the next one
//! is fetched. Worker faults never escape the run; admins only ever see the
//! aggregate counts.

use crate::api::{Action, ApiError, JoinRequestApi};
use crate::config::{INTER_PAGE_PAUSE_MS, LIST_PAGE_SIZE, RATE_LIMIT_MARGIN_MS};
use crate::executor::{ExecOutcome, Executor};
use crate::limit::RateLimiter;
use crate::registry::PendingRegistry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// One queued unit of work: a single applicant within the current run
#[derive(Debug, Clone, Copy)]
struct DispatchJob {
    user_id: i64,
}

/// Aggregate progress, emitted once per drained page
#[derive(Debug, Clone, Copy)]
pub struct BulkProgress {
    /// Successful mutations so far
    pub succeeded: u64,
    /// Pages fetched so far
    pub pages: u32,
}

/// Final result of one bulk run
#[derive(Debug, Clone, Copy)]
pub struct BulkReport {
    /// Total successful mutations
    pub succeeded: u64,
    /// Pages fetched
    pub pages: u32,
    /// The run stopped early because the bot lacks rights on the chat
    pub aborted_forbidden: bool,
}

/// Paginating, rate-limited, bounded-concurrency dispatcher.
///
/// Pool size controls in-flight parallelism (latency tolerance under the
/// ceiling); the limiter alone controls aggregate throughput.
pub struct BulkDispatcher {
    api: Arc<dyn JoinRequestApi>,
    executor: Arc<Executor>,
    limiter: Arc<RateLimiter>,
    registry: Arc<PendingRegistry>,
    workers: usize,
}

impl BulkDispatcher {
    /// Creates a dispatcher with a pool of `workers` concurrent tasks
    #[must_use]
    pub fn new(
        api: Arc<dyn JoinRequestApi>,
        executor: Arc<Executor>,
        limiter: Arc<RateLimiter>,
        registry: Arc<PendingRegistry>,
        workers: usize,
    ) -> Self {
        Self {
            api,
            executor,
            limiter,
            registry,
            workers: workers.max(1),
        }
    }

    /// Runs one bulk approve/decline over a chat's pending list.
    ///
    /// Terminates when the remote list is exhausted, `cap` successes are
    /// reached, the bot turns out to lack rights on the chat, or a full page
    /// yields zero successes (permanently failing entries would otherwise be
    /// re-served forever).
    ///
    /// Progress is pushed to `progress` once per page; errors on the channel
    /// are ignored so a dropped receiver cannot stall the run.
    pub async fn run(
        &self,
        chat_id: i64,
        cap: Option<u64>,
        action: Action,
        progress: Option<mpsc::UnboundedSender<BulkProgress>>,
    ) -> BulkReport {
        let succeeded = Arc::new(AtomicU64::new(0));
        let forbidden = Arc::new(AtomicBool::new(false));
        let mut pages: u32 = 0;
        let mut queued_total: u64 = 0;

        loop {
            let page = match self.api.list_pending(chat_id, LIST_PAGE_SIZE).await {
                Ok(page) => page,
                Err(ApiError::RateLimited { retry_after }) => {
                    let wait = retry_after + Duration::from_millis(RATE_LIMIT_MARGIN_MS);
                    warn!("listing chat {chat_id} rate limited, waiting {wait:?}");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(e) => {
                    error!("listing chat {chat_id} failed, ending run: {e}");
                    break;
                }
            };

            if page.is_empty() {
                break;
            }
            pages += 1;

            let before = succeeded.load(Ordering::Relaxed);

            // Enqueue the page in remote order, honoring the cap.
            let (tx, rx) = mpsc::unbounded_channel::<DispatchJob>();
            let mut queued_this_batch: u64 = 0;
            for request in &page {
                if let Some(cap) = cap {
                    if before + queued_this_batch >= cap {
                        break;
                    }
                }
                // Send cannot fail here: rx is alive until the batch drains.
                let _ = tx.send(DispatchJob {
                    user_id: request.user_id,
                });
                queued_this_batch += 1;
            }
            drop(tx);
            queued_total += queued_this_batch;

            self.drain_batch(rx, chat_id, action, &succeeded, &forbidden)
                .await;

            let total = succeeded.load(Ordering::Relaxed);
            let batch_succeeded = total - before;
            info!(
                "chat {chat_id}: page {pages} drained, {batch_succeeded} of {queued_this_batch} succeeded ({total} total)"
            );
            if let Some(progress) = &progress {
                let _ = progress.send(BulkProgress {
                    succeeded: total,
                    pages,
                });
            }

            if forbidden.load(Ordering::Relaxed) {
                break;
            }
            if cap.is_some_and(|cap| total >= cap) {
                break;
            }
            if batch_succeeded == 0 {
                warn!("chat {chat_id}: page produced no successes, ending run");
                break;
            }

            tokio::time::sleep(Duration::from_millis(INTER_PAGE_PAUSE_MS)).await;
        }

        let report = BulkReport {
            succeeded: succeeded.load(Ordering::Relaxed),
            pages,
            aborted_forbidden: forbidden.load(Ordering::Relaxed),
        };
        info!(
            "chat {chat_id}: bulk {} finished, {} succeeded over {} pages (queued {queued_total})",
            action.verb(),
            report.succeeded,
            report.pages
        );
        report
    }

    /// Runs one batch to completion: a fixed set of workers pulls from the
    /// queue until it is drained (closed channel is the sentinel), then all
    /// workers are joined. A panicked worker costs only its in-flight job.
    async fn drain_batch(
        &self,
        rx: mpsc::UnboundedReceiver<DispatchJob>,
        chat_id: i64,
        action: Action,
        succeeded: &Arc<AtomicU64>,
        forbidden: &Arc<AtomicBool>,
    ) {
        let rx = Arc::new(Mutex::new(rx));
        let mut pool = JoinSet::new();

        for _ in 0..self.workers {
            let rx = rx.clone();
            let limiter = self.limiter.clone();
            let executor = self.executor.clone();
            let registry = self.registry.clone();
            let succeeded = succeeded.clone();
            let forbidden = forbidden.clone();

            pool.spawn(async move {
                loop {
                    if forbidden.load(Ordering::Relaxed) {
                        break;
                    }
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };

                    limiter.admit().await;
                    match executor.execute(action, chat_id, job.user_id).await {
                        ExecOutcome::Done => {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                            // Keep the local view convergent with the remote.
                            registry.remove(job.user_id);
                        }
                        ExecOutcome::Forbidden => {
                            forbidden.store(true, Ordering::Relaxed);
                            break;
                        }
                        ExecOutcome::Failed => {}
                    }
                }
            });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("dispatch worker panicked: {e}");
                }
            }
        }
    }
}

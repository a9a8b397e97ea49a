//! End-to-end tests for the dispatch core: registry, limiter, executor and
//! the bulk engine wired against a scripted in-memory Telegram double.

use gatekeeper_bot::api::{Action, ApiError, JoinRequestApi};
use gatekeeper_bot::dispatch::{BulkDispatcher, BulkProgress, BulkReport};
use gatekeeper_bot::executor::{ExecOutcome, Executor};
use gatekeeper_bot::limit::RateLimiter;
use gatekeeper_bot::registry::{PendingRegistry, PendingRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const CHAT: i64 = -100_500;

/// Scripted result for one mutation attempt
#[derive(Debug, Clone, Copy)]
enum Step {
    Ok,
    RateLimited(u64),
    Network,
    Forbidden,
    Resolved,
}

/// In-memory stand-in for Telegram: a shrinking pending list plus a FIFO
/// script of failures to inject. An empty script means every call succeeds.
struct MockApi {
    pending: Mutex<Vec<PendingRequest>>,
    script: Mutex<VecDeque<Step>>,
    approve_calls: AtomicUsize,
    decline_calls: AtomicUsize,
}

impl MockApi {
    fn new(pending: Vec<PendingRequest>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(pending),
            script: Mutex::new(VecDeque::new()),
            approve_calls: AtomicUsize::new(0),
            decline_calls: AtomicUsize::new(0),
        })
    }

    fn push_steps(&self, steps: &[Step]) {
        let mut script = self.script.lock().expect("script lock");
        script.extend(steps.iter().copied());
    }

    fn approve_calls(&self) -> usize {
        self.approve_calls.load(Ordering::Relaxed)
    }

    fn remaining(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Step::Ok)
    }

    fn resolve(&self, user_id: i64) -> Result<(), ApiError> {
        match self.next_step() {
            Step::Ok => {
                let mut pending = self.pending.lock().expect("pending lock");
                pending.retain(|r| r.user_id != user_id);
                Ok(())
            }
            Step::RateLimited(secs) => Err(ApiError::RateLimited {
                retry_after: Duration::from_secs(secs),
            }),
            Step::Network => Err(ApiError::Network("connection reset".to_string())),
            Step::Forbidden => Err(ApiError::Forbidden(
                "not enough rights to invite users".to_string(),
            )),
            Step::Resolved => Err(ApiError::AlreadyResolved(
                "HIDE_REQUESTER_MISSING".to_string(),
            )),
        }
    }
}

#[async_trait]
impl JoinRequestApi for MockApi {
    async fn list_pending(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<PendingRequest>, ApiError> {
        let pending = self.pending.lock().expect("pending lock");
        Ok(pending
            .iter()
            .filter(|r| r.chat_id == chat_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn approve(&self, _chat_id: i64, user_id: i64) -> Result<(), ApiError> {
        self.approve_calls.fetch_add(1, Ordering::Relaxed);
        self.resolve(user_id)
    }

    async fn decline(&self, _chat_id: i64, user_id: i64) -> Result<(), ApiError> {
        self.decline_calls.fetch_add(1, Ordering::Relaxed);
        self.resolve(user_id)
    }
}

fn request(user_id: i64) -> PendingRequest {
    PendingRequest {
        user_id,
        chat_id: CHAT,
        chat_title: "Test Chat".to_string(),
        full_name: format!("User {user_id}"),
        username: None,
    }
}

fn requests(n: usize) -> Vec<PendingRequest> {
    (1..=n as i64).map(request).collect()
}

struct Harness {
    api: Arc<MockApi>,
    registry: Arc<PendingRegistry>,
    dispatcher: BulkDispatcher,
}

fn harness(pending: Vec<PendingRequest>, workers: usize) -> Harness {
    let registry = Arc::new(PendingRegistry::new());
    for req in &pending {
        registry.record(req.clone());
    }
    let api = MockApi::new(pending);
    let api_dyn: Arc<dyn JoinRequestApi> = api.clone();
    let executor = Arc::new(Executor::new(api_dyn.clone()));
    let limiter = Arc::new(RateLimiter::new(100_000));
    let dispatcher = BulkDispatcher::new(api_dyn, executor, limiter, registry.clone(), workers);
    Harness {
        api,
        registry,
        dispatcher,
    }
}

async fn run(harness: &Harness, cap: Option<u64>) -> (BulkReport, Vec<BulkProgress>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = harness
        .dispatcher
        .run(CHAT, cap, Action::Approve, Some(tx))
        .await;
    let mut progress = Vec::new();
    while let Ok(p) = rx.try_recv() {
        progress.push(p);
    }
    (report, progress)
}

#[tokio::test(start_paused = true)]
async fn test_bulk_approve_drains_530_requests_over_3_pages() {
    let harness = harness(requests(530), 25);
    let (report, progress) = run(&harness, None).await;

    assert_eq!(report.succeeded, 530);
    assert_eq!(report.pages, 3);
    assert!(!report.aborted_forbidden);
    assert_eq!(harness.api.approve_calls(), 530);
    assert_eq!(harness.api.remaining(), 0);

    // Local bookkeeping converged with the remote.
    assert!(harness.registry.is_empty());

    // Progress once per page, cumulative.
    assert_eq!(progress.len(), 3);
    let totals: Vec<u64> = progress.iter().map(|p| p.succeeded).collect();
    assert_eq!(totals, vec![200, 400, 530]);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_with_cap_never_exceeds_it() {
    let harness = harness(requests(30), 8);
    let (report, _) = run(&harness, Some(10)).await;

    assert_eq!(report.succeeded, 10);
    assert_eq!(harness.api.approve_calls(), 10);
    assert_eq!(harness.api.remaining(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_cap_spans_pages() {
    let harness = harness(requests(250), 25);
    let (report, _) = run(&harness, Some(220)).await;

    assert_eq!(report.succeeded, 220);
    assert_eq!(report.pages, 2);
    assert_eq!(harness.api.approve_calls(), 220);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_on_empty_list_is_a_no_op() {
    let harness = harness(Vec::new(), 25);
    let (report, progress) = run(&harness, None).await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.pages, 0);
    assert_eq!(harness.api.approve_calls(), 0);
    assert!(progress.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bulk_aborts_on_missing_rights() {
    let harness = harness(requests(5), 1);
    harness.api.push_steps(&[Step::Forbidden; 5]);

    let (report, _) = run(&harness, None).await;

    assert!(report.aborted_forbidden);
    assert_eq!(report.succeeded, 0);
    // One attempt was enough to learn the bot cannot act here.
    assert_eq!(harness.api.approve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_stops_after_a_page_with_zero_successes() {
    let harness = harness(requests(3), 2);
    harness.api.push_steps(&[Step::Resolved; 3]);

    let (report, _) = run(&harness, None).await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.pages, 1);
    assert_eq!(harness.api.approve_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_executor_waits_out_rate_limit_then_succeeds() {
    let harness = harness(requests(1), 1);
    harness.api.push_steps(&[Step::RateLimited(2)]);
    let api_dyn: Arc<dyn JoinRequestApi> = harness.api.clone();
    let executor = Executor::new(api_dyn);

    let started = tokio::time::Instant::now();
    let outcome = executor.execute(Action::Approve, CHAT, 1).await;

    assert_eq!(outcome, ExecOutcome::Done);
    assert_eq!(harness.api.approve_calls(), 2);
    // Signaled wait plus the safety margin.
    assert!(started.elapsed() >= Duration::from_millis(2500));
}

#[tokio::test(start_paused = true)]
async fn test_executor_gives_up_when_rate_limit_budget_is_spent() {
    let harness = harness(requests(1), 1);
    harness.api.push_steps(&[Step::RateLimited(1); 8]);
    let api_dyn: Arc<dyn JoinRequestApi> = harness.api.clone();
    let executor = Executor::new(api_dyn);

    let outcome = executor.execute(Action::Approve, CHAT, 1).await;

    assert_eq!(outcome, ExecOutcome::Failed);
    assert_eq!(harness.api.approve_calls(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_executor_retries_network_failures() {
    let harness = harness(requests(1), 1);
    harness.api.push_steps(&[Step::Network, Step::Network]);
    let api_dyn: Arc<dyn JoinRequestApi> = harness.api.clone();
    let executor = Executor::new(api_dyn);

    let started = tokio::time::Instant::now();
    let outcome = executor.execute(Action::Approve, CHAT, 1).await;

    assert_eq!(outcome, ExecOutcome::Done);
    assert_eq!(harness.api.approve_calls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_executor_makes_exactly_one_attempt_on_missing_rights() {
    let harness = harness(requests(1), 1);
    harness.api.push_steps(&[Step::Forbidden]);
    let api_dyn: Arc<dyn JoinRequestApi> = harness.api.clone();
    let executor = Executor::new(api_dyn);

    let outcome = executor.execute(Action::Approve, CHAT, 1).await;

    assert_eq!(outcome, ExecOutcome::Forbidden);
    assert_eq!(harness.api.approve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_tap_performs_one_remote_mutation() {
    let harness = harness(requests(1), 1);
    let api_dyn: Arc<dyn JoinRequestApi> = harness.api.clone();
    let executor = Executor::new(api_dyn);

    // First tap: wins the take, executes.
    let first = harness.registry.take(1);
    assert!(first.is_some());
    let outcome = executor.execute(Action::Approve, CHAT, 1).await;
    assert_eq!(outcome, ExecOutcome::Done);

    // Second tap: entry is gone, no remote call is made.
    assert!(harness.registry.take(1).is_none());
    assert_eq!(harness.api.approve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_declines_go_through_the_same_pipeline() {
    let harness = harness(requests(7), 4);
    let (tx, _rx) = mpsc::unbounded_channel();
    let report = harness
        .dispatcher
        .run(CHAT, None, Action::Decline, Some(tx))
        .await;

    assert_eq!(report.succeeded, 7);
    assert_eq!(harness.api.decline_calls.load(Ordering::Relaxed), 7);
    assert_eq!(harness.api.approve_calls(), 0);
}

mod common;

use async_trait::async_trait;
use common::borrower;
use futures::StreamExt;
use futures::stream::BoxStream;
use loanctl::application::tracker::{Resolution, TransactionTracker};
use loanctl::config::TrackerConfig;
use loanctl::domain::loan::{Identity, Loan, TokenAmount};
use loanctl::domain::ports::{LedgerClient, Signer};
use loanctl::domain::transaction::{Inclusion, LoanCall, TxHandle};
use loanctl::error::Result;
use loanctl::infrastructure::in_memory::{InMemoryLedger, InMemorySigner};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wraps the in-memory ledger with a scripted push notification feed.
struct PushLedger {
    inner: InMemoryLedger,
    events: Mutex<Option<Vec<Inclusion>>>,
}

impl PushLedger {
    fn new(events: Vec<Inclusion>) -> Self {
        let inner = InMemoryLedger::new();
        inner.fund(&borrower(), TokenAmount::new(100));
        Self {
            inner,
            events: Mutex::new(Some(events)),
        }
    }
}

#[async_trait]
impl LedgerClient for PushLedger {
    async fn get_loan_count(&self, identity: &Identity) -> Result<u64> {
        self.inner.get_loan_count(identity).await
    }

    async fn get_loan(&self, identity: &Identity, index: u64) -> Result<Loan> {
        self.inner.get_loan(identity, index).await
    }

    async fn get_balance(&self, identity: &Identity) -> Result<TokenAmount> {
        self.inner.get_balance(identity).await
    }

    async fn submit(
        &self,
        from: &Identity,
        call: &LoanCall,
        signer: &dyn Signer,
    ) -> Result<TxHandle> {
        self.inner.submit(from, call, signer).await
    }

    async fn inclusion_status(&self, handle: &TxHandle) -> Result<Inclusion> {
        self.inner.inclusion_status(handle).await
    }

    async fn watch(&self, _handle: &TxHandle) -> Option<BoxStream<'static, Inclusion>> {
        let events = self.events.lock().unwrap().take()?;
        Some(futures::stream::iter(events).boxed())
    }
}

fn request() -> LoanCall {
    LoanCall::RequestLoan {
        principal: TokenAmount::new(1000),
        collateral: TokenAmount::new(5),
        duration_days: 30,
    }
}

#[tokio::test(start_paused = true)]
async fn test_push_events_replace_polling() {
    let ledger = Arc::new(PushLedger::new(vec![
        Inclusion::Pending,
        Inclusion::Pending,
        Inclusion::Succeeded,
    ]));
    let tracker = TransactionTracker::new(ledger.clone(), TrackerConfig::default());
    let signer = InMemorySigner::new(borrower());

    let guard = tracker.begin().unwrap();
    let tracked = tracker
        .submit_and_track(&guard, &borrower(), request(), &signer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tracked.resolution, Resolution::Confirmed);
    assert_eq!(tracked.polls, 2);
    assert_eq!(ledger.inner.status_lookups(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pushed_revert_is_a_failure() {
    let ledger = Arc::new(PushLedger::new(vec![Inclusion::Reverted(
        "out of gas".to_string(),
    )]));
    let tracker = TransactionTracker::new(ledger, TrackerConfig::default());
    let signer = InMemorySigner::new(borrower());

    let guard = tracker.begin().unwrap();
    let tracked = tracker
        .submit_and_track(&guard, &borrower(), request(), &signer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tracked.resolution, Resolution::Failed("out of gas".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_closed_event_stream_falls_back_to_polling() {
    let ledger = Arc::new(PushLedger::new(vec![Inclusion::Pending]));
    ledger.inner.confirm_after_polls(2);
    let tracker = TransactionTracker::new(ledger.clone(), TrackerConfig::default());
    let signer = InMemorySigner::new(borrower());

    let guard = tracker.begin().unwrap();
    let tracked = tracker
        .submit_and_track(&guard, &borrower(), request(), &signer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tracked.resolution, Resolution::Confirmed);
    assert_eq!(ledger.inner.status_lookups(), 2);
    assert_eq!(tracked.polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_empty_event_stream_polls_until_timeout() {
    let ledger = Arc::new(PushLedger::new(Vec::new()));
    ledger.inner.hold_inclusion(true);
    let tracker = TransactionTracker::new(
        ledger.clone(),
        TrackerConfig {
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(6),
        },
    );
    let signer = InMemorySigner::new(borrower());

    let guard = tracker.begin().unwrap();
    let tracked = tracker
        .submit_and_track(&guard, &borrower(), request(), &signer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tracked.resolution, Resolution::TimedOut);
    assert_eq!(ledger.inner.status_lookups(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_errors_do_not_end_tracking() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fund(&borrower(), TokenAmount::new(100));
    ledger.fail_status_lookups(2);
    let tracker = TransactionTracker::new(ledger.clone(), TrackerConfig::default());
    let signer = InMemorySigner::new(borrower());

    let guard = tracker.begin().unwrap();
    let tracked = tracker
        .submit_and_track(&guard, &borrower(), request(), &signer, &CancellationToken::new())
        .await
        .unwrap();
    drop(guard);

    assert_eq!(tracked.resolution, Resolution::Confirmed);
    assert_eq!(tracked.polls, 3);
    assert_eq!(ledger.status_lookups(), 3);
    assert_eq!(ledger.submissions(), 1);
    assert!(tracker.pending().is_none());
}

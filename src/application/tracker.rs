use crate::config::TrackerConfig;
use crate::domain::loan::Identity;
use crate::domain::ports::{LedgerClientRef, Signer};
use crate::domain::transaction::{
    Inclusion, LoanCall, PendingTransaction, TxHandle, TxKind, TxStatus,
};
use crate::error::{LoanError, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How tracking of one transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    /// Included with a failure outcome, e.g. reverted.
    Failed(String),
    /// No terminal outcome within the wait window. The mutation may still land.
    TimedOut,
    /// The session went away mid-wait. The ledger may still include it.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked {
    pub handle: TxHandle,
    pub kind: TxKind,
    pub resolution: Resolution,
    /// Status checks issued while waiting.
    pub polls: u32,
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Idle,
    /// Claimed by a call that has not broadcast yet.
    Reserved,
    Tracking(PendingTransaction),
}

/// Exclusive claim on the tracker's single in-flight slot.
///
/// Dropping it discards whatever pending transaction was being tracked.
pub struct InFlight<'a> {
    slot: &'a Mutex<Slot>,
}

impl InFlight<'_> {
    fn publish(&self, pending: &PendingTransaction) {
        *lock(self.slot) = Slot::Tracking(pending.clone());
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = Slot::Idle;
    }
}

/// Submits mutations and follows each one to a terminal outcome.
///
/// Never resubmits: a failed or timed out transaction is reported and
/// forgotten, and retrying is the caller's decision.
pub struct TransactionTracker {
    ledger: LedgerClientRef,
    config: TrackerConfig,
    slot: Mutex<Slot>,
}

impl TransactionTracker {
    pub fn new(ledger: LedgerClientRef, config: TrackerConfig) -> Self {
        Self {
            ledger,
            config,
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Claims the in-flight slot, failing fast if another call holds it.
    ///
    /// The slot is held until the returned guard is dropped. Claim it before
    /// any signer interaction so a concurrent call cannot prompt the user for
    /// a transaction that will never be sent.
    ///
    /// # Errors
    ///
    /// `OperationInProgress` if the slot is reserved or tracking.
    pub fn begin(&self) -> Result<InFlight<'_>> {
        let mut slot = lock(&self.slot);
        if !matches!(*slot, Slot::Idle) {
            return Err(LoanError::OperationInProgress);
        }
        *slot = Slot::Reserved;
        Ok(InFlight { slot: &self.slot })
    }

    /// Read-only copy of the transaction being tracked, if any.
    pub fn pending(&self) -> Option<PendingTransaction> {
        match &*lock(&self.slot) {
            Slot::Tracking(pending) => Some(pending.clone()),
            _ => None,
        }
    }

    /// Broadcasts `call` and waits for its outcome.
    ///
    /// Submission failures are returned as errors; everything after the
    /// broadcast resolves to a [`Resolution`]. The ledger's push feed is used
    /// when it offers one, otherwise the inclusion status is polled once per
    /// `poll_interval`. Resolves `TimedOut` no later than `max_wait` after
    /// the broadcast.
    ///
    /// # Arguments
    ///
    /// * `guard` - The claim obtained from [`TransactionTracker::begin`].
    /// * `from` - The signing identity.
    /// * `call` - The contract call to sign and broadcast.
    /// * `signer` - Signer holding the key for `from`.
    /// * `cancel` - Fires on disconnect; tracking then stops with `Cancelled`.
    pub async fn submit_and_track(
        &self,
        guard: &InFlight<'_>,
        from: &Identity,
        call: LoanCall,
        signer: &dyn Signer,
        cancel: &CancellationToken,
    ) -> Result<Tracked> {
        let handle = self.ledger.submit(from, &call, signer).await?;
        info!(%handle, kind = ?call.kind(), %from, "Transaction submitted");

        let mut pending = PendingTransaction::new(handle, call);
        guard.publish(&pending);
        pending.advance(TxStatus::AwaitingConfirmation);
        guard.publish(&pending);

        let deadline = Instant::now() + self.config.max_wait;
        let resolution = match self.ledger.watch(&pending.handle).await {
            Some(events) => {
                self.await_events(events, deadline, &mut pending, guard, cancel)
                    .await
            }
            None => self.poll_until(deadline, &mut pending, guard, cancel).await,
        };

        match &resolution {
            Resolution::Confirmed => {
                pending.advance(TxStatus::Confirmed);
                info!(handle = %pending.handle, polls = pending.attempt, "Transaction confirmed");
            }
            Resolution::Failed(reason) => {
                pending.advance(TxStatus::Failed);
                warn!(handle = %pending.handle, %reason, "Transaction failed on ledger");
            }
            Resolution::TimedOut => {
                pending.advance(TxStatus::TimedOut);
                warn!(
                    handle = %pending.handle,
                    polls = pending.attempt,
                    "No terminal outcome within {:?}; outcome is ambiguous",
                    self.config.max_wait
                );
            }
            Resolution::Cancelled => {
                info!(handle = %pending.handle, "Tracking cancelled by disconnect");
            }
        }

        Ok(Tracked {
            handle: pending.handle.clone(),
            kind: pending.kind(),
            resolution,
            polls: pending.attempt,
        })
    }

    /// Polls once per interval until a terminal inclusion or `deadline`.
    async fn poll_until(
        &self,
        deadline: Instant,
        pending: &mut PendingTransaction,
        guard: &InFlight<'_>,
        cancel: &CancellationToken,
    ) -> Resolution {
        let interval = self.config.poll_interval;
        let mut next_poll = Instant::now() + interval;

        while next_poll <= deadline {
            tokio::select! {
                _ = cancel.cancelled() => return Resolution::Cancelled,
                _ = sleep_until(next_poll) => {}
            }

            pending.attempt += 1;
            guard.publish(pending);

            // A lookup never runs past the deadline.
            let budget = interval.min(deadline.saturating_duration_since(Instant::now()));
            let lookup = tokio::select! {
                _ = cancel.cancelled() => return Resolution::Cancelled,
                lookup = timeout(budget, self.ledger.inclusion_status(&pending.handle)) => lookup,
            };

            match lookup {
                Ok(Ok(Inclusion::Succeeded)) => return Resolution::Confirmed,
                Ok(Ok(Inclusion::Reverted(reason))) => return Resolution::Failed(reason),
                Ok(Ok(Inclusion::Pending)) => {
                    debug!(handle = %pending.handle, attempt = pending.attempt, "Still pending");
                }
                Ok(Err(e)) => {
                    warn!(handle = %pending.handle, attempt = pending.attempt, "Status lookup failed: {}", e);
                }
                Err(_) => {
                    warn!(handle = %pending.handle, attempt = pending.attempt, "Status lookup timed out");
                }
            }

            next_poll += interval;
        }

        Resolution::TimedOut
    }

    /// Consumes pushed status events, falling back to polling if the stream ends.
    async fn await_events(
        &self,
        mut events: BoxStream<'static, Inclusion>,
        deadline: Instant,
        pending: &mut PendingTransaction,
        guard: &InFlight<'_>,
        cancel: &CancellationToken,
    ) -> Resolution {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Resolution::Cancelled,
                _ = sleep_until(deadline) => return Resolution::TimedOut,
                event = events.next() => event,
            };

            match event {
                Some(Inclusion::Succeeded) => return Resolution::Confirmed,
                Some(Inclusion::Reverted(reason)) => return Resolution::Failed(reason),
                Some(Inclusion::Pending) => {
                    pending.attempt += 1;
                    guard.publish(pending);
                }
                None => {
                    debug!(handle = %pending.handle, "Status stream closed, polling instead");
                    return self.poll_until(deadline, pending, guard, cancel).await;
                }
            }
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

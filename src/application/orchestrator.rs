use super::backoff::RetrySchedule;
use super::reconciler::LoanStateReconciler;
use super::session::SignerSession;
use super::tracker::{Resolution, TransactionTracker};
use crate::config::{BackoffConfig, LoanLimits, OrchestratorConfig};
use crate::domain::loan::{Identity, Snapshot, TokenAmount};
use crate::domain::ports::LedgerClientRef;
use crate::domain::transaction::{LoanCall, PendingTransaction, TxHandle};
use crate::error::{LoanError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityCause {
    TimedOut,
    /// The session disconnected while the transaction was being tracked.
    Disconnected,
}

/// Terminal result of a `request_loan` or `repay_loan` call.
#[derive(Debug, Clone, PartialEq)]
pub enum LoanOutcome {
    /// Mined successfully. `snapshot` is `None` when the follow-up refresh
    /// kept failing; call [`LoanOrchestrator::refresh_loans`] later.
    Confirmed {
        handle: TxHandle,
        snapshot: Option<Arc<Snapshot>>,
    },
    /// Mined with a failure outcome. Nothing changed on the ledger.
    Rejected { handle: TxHandle, reason: String },
    /// Unknown whether it landed. Reconcile before retrying.
    Ambiguous {
        handle: TxHandle,
        cause: AmbiguityCause,
    },
}

impl LoanOutcome {
    pub fn handle(&self) -> &TxHandle {
        match self {
            LoanOutcome::Confirmed { handle, .. }
            | LoanOutcome::Rejected { handle, .. }
            | LoanOutcome::Ambiguous { handle, .. } => handle,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, LoanOutcome::Confirmed { .. })
    }
}

/// Entry point for the presentation layer.
///
/// One instance serves one signer session. Mutations are serialized: a call
/// made while another transaction is still in flight fails with
/// `OperationInProgress`.
pub struct LoanOrchestrator {
    session: SignerSession,
    ledger: LedgerClientRef,
    tracker: TransactionTracker,
    reconciler: LoanStateReconciler,
    limits: LoanLimits,
    backoff: BackoffConfig,
}

impl LoanOrchestrator {
    pub fn new(
        session: SignerSession,
        ledger: LedgerClientRef,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            session,
            tracker: TransactionTracker::new(ledger.clone(), config.tracker.clone()),
            reconciler: LoanStateReconciler::new(ledger.clone()),
            ledger,
            limits: config.limits.clone(),
            backoff: config.refresh_backoff.clone(),
        }
    }

    pub async fn connect(&self) -> Result<Identity> {
        self.session.connect().await
    }

    /// Resumes a previously authorized session without prompting and loads
    /// its loans.
    pub async fn restore(&self) -> Result<Option<Arc<Snapshot>>> {
        let Some(identity) = self.session.restore().await? else {
            return Ok(None);
        };
        let scope = self.session.scope(&identity)?;
        self.refresh_with_retry(&identity, &scope).await.map(Some)
    }

    /// Ends the session. Already broadcast transactions stay on the ledger;
    /// their tracking stops and resolves as ambiguous.
    pub async fn disconnect(&self) {
        if let Some(identity) = self.session.disconnect() {
            self.reconciler.invalidate(&identity).await;
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.current_identity()
    }

    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        let identity = self.session.current_identity()?;
        self.reconciler.snapshot(&identity).await
    }

    pub fn pending(&self) -> Option<PendingTransaction> {
        self.tracker.pending()
    }

    /// Native-asset balance of the connected identity, connecting first if
    /// needed.
    pub async fn balance(&self) -> Result<TokenAmount> {
        let identity = self.session.connect().await?;
        let scope = self.session.scope(&identity)?;
        self.with_backoff(&scope, || self.ledger.get_balance(&identity))
            .await
    }

    /// Re-reads every loan of the connected identity from the ledger.
    ///
    /// The only way to learn the fate of an `Ambiguous` outcome. Transient
    /// read failures are retried with backoff; if they persist the previous
    /// snapshot stays in place and the error is returned.
    pub async fn refresh_loans(&self) -> Result<Arc<Snapshot>> {
        let identity = self.session.connect().await?;
        let scope = self.session.scope(&identity)?;
        self.refresh_with_retry(&identity, &scope).await
    }

    /// Requests a new loan and waits until the ledger decides on it.
    ///
    /// Input is validated before any signer or ledger interaction. Connects
    /// if no identity is held yet, then signs, broadcasts and tracks the
    /// transaction. A confirmed request is followed by a refresh so the
    /// returned snapshot already contains the new loan.
    ///
    /// # Arguments
    ///
    /// * `principal` - Amount borrowed, in smallest token units. Must be positive.
    /// * `collateral` - Amount locked from the borrower's balance. Must be positive.
    /// * `duration_days` - Loan term, within the configured limits.
    ///
    /// # Errors
    ///
    /// Fails with `OperationInProgress` while another mutation is in flight
    /// and with `SessionClosed` if the session ends before broadcast. Once
    /// broadcast, every path resolves to a [`LoanOutcome`].
    pub async fn request_loan(
        &self,
        principal: TokenAmount,
        collateral: TokenAmount,
        duration_days: u32,
    ) -> Result<LoanOutcome> {
        self.validate_request(principal, collateral, duration_days)?;
        let guard = self.tracker.begin()?;
        let identity = self.session.connect().await?;
        let scope = self.session.scope(&identity)?;
        let signer = self.session.signer()?;

        let call = LoanCall::RequestLoan {
            principal,
            collateral,
            duration_days,
        };
        ensure_open(&scope)?;
        let tracked = self
            .tracker
            .submit_and_track(&guard, &identity, call, signer, &scope)
            .await?;
        drop(guard);

        Ok(self
            .settle(&identity, &scope, tracked.handle, tracked.resolution)
            .await)
    }

    /// Repays loan `index` of the connected identity and waits for the outcome.
    ///
    /// The loan is checked against the cached snapshot first, refreshing when
    /// none is held, so repaying an unknown, repaid or inactive loan fails
    /// without a submission.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the loan in the borrower's loan list.
    ///
    /// # Errors
    ///
    /// `NotFound`, `AlreadyRepaid` and `LoanNotActive` from the local check,
    /// `SessionClosed` if the session ends before broadcast, and
    /// `OperationInProgress` while another mutation is in flight.
    pub async fn repay_loan(&self, index: u64) -> Result<LoanOutcome> {
        let guard = self.tracker.begin()?;
        let identity = self.session.connect().await?;
        let scope = self.session.scope(&identity)?;
        let signer = self.session.signer()?;

        let snapshot = match self.reconciler.snapshot(&identity).await {
            Some(snapshot) => snapshot,
            None => self.refresh_with_retry(&identity, &scope).await?,
        };
        let loan = snapshot.get(index).ok_or(LoanError::NotFound { index })?;
        if loan.repaid {
            return Err(LoanError::AlreadyRepaid { index });
        }
        if !loan.active {
            return Err(LoanError::LoanNotActive { index });
        }

        ensure_open(&scope)?;
        let call = LoanCall::RepayLoan { index };
        let tracked = self
            .tracker
            .submit_and_track(&guard, &identity, call, signer, &scope)
            .await?;
        drop(guard);

        Ok(self
            .settle(&identity, &scope, tracked.handle, tracked.resolution)
            .await)
    }

    fn validate_request(
        &self,
        principal: TokenAmount,
        collateral: TokenAmount,
        duration_days: u32,
    ) -> Result<()> {
        if principal.is_zero() {
            return Err(LoanError::InvalidInput("principal must be positive".into()));
        }
        if collateral.is_zero() {
            return Err(LoanError::InvalidInput("collateral must be positive".into()));
        }
        if let Some(max) = self.limits.max_principal
            && principal > max
        {
            return Err(LoanError::InvalidInput(format!(
                "principal {} exceeds the maximum of {}",
                principal, max
            )));
        }
        if duration_days < self.limits.min_duration_days
            || duration_days > self.limits.max_duration_days
        {
            return Err(LoanError::InvalidInput(format!(
                "duration must be between {} and {} days",
                self.limits.min_duration_days, self.limits.max_duration_days
            )));
        }
        Ok(())
    }

    async fn settle(
        &self,
        identity: &Identity,
        scope: &CancellationToken,
        handle: TxHandle,
        resolution: Resolution,
    ) -> LoanOutcome {
        match resolution {
            Resolution::Confirmed => {
                self.reconciler.invalidate(identity).await;
                let snapshot = match self.refresh_with_retry(identity, scope).await {
                    Ok(snapshot) => Some(snapshot),
                    Err(LoanError::SessionClosed) => {
                        debug!(%handle, "Confirmed after disconnect; snapshot not refreshed");
                        None
                    }
                    Err(e) => {
                        warn!(%handle, "Confirmed, but reconciliation failed: {}", e);
                        None
                    }
                };
                LoanOutcome::Confirmed { handle, snapshot }
            }
            Resolution::Failed(reason) => LoanOutcome::Rejected { handle, reason },
            Resolution::TimedOut => LoanOutcome::Ambiguous {
                handle,
                cause: AmbiguityCause::TimedOut,
            },
            Resolution::Cancelled => LoanOutcome::Ambiguous {
                handle,
                cause: AmbiguityCause::Disconnected,
            },
        }
    }

    async fn refresh_with_retry(
        &self,
        identity: &Identity,
        scope: &CancellationToken,
    ) -> Result<Arc<Snapshot>> {
        self.with_backoff(scope, || self.reconciler.refresh(identity, scope))
            .await
    }

    /// Retries `LedgerUnavailable` with exponential backoff; any other error
    /// is returned immediately. A disconnect during a wait ends the retries
    /// with `SessionClosed`.
    async fn with_backoff<T, F, Fut>(&self, scope: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut schedule = RetrySchedule::new(&self.backoff);
        loop {
            let attempt = self.backoff.max_attempts - schedule.retries_left();
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "Ledger read recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };
            let Some(delay) = schedule.next() else {
                return Err(err);
            };

            warn!(attempt, ?delay, "Ledger read failed, retrying: {}", err);
            tokio::select! {
                _ = scope.cancelled() => return Err(LoanError::SessionClosed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn ensure_open(scope: &CancellationToken) -> Result<()> {
    if scope.is_cancelled() {
        return Err(LoanError::SessionClosed);
    }
    Ok(())
}

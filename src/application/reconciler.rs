use crate::domain::loan::{Identity, Snapshot};
use crate::domain::ports::LedgerClientRef;
use crate::error::{LoanError, Result};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns the reconciled loan snapshots, one per identity.
///
/// Snapshots are only ever built from ledger reads and swapped in whole;
/// readers get an `Arc` to an immutable value and never see a half-applied
/// refresh.
pub struct LoanStateReconciler {
    ledger: LedgerClientRef,
    snapshots: RwLock<HashMap<Identity, Arc<Snapshot>>>,
    fetch_counter: AtomicU64,
}

impl LoanStateReconciler {
    pub fn new(ledger: LedgerClientRef) -> Self {
        Self {
            ledger,
            snapshots: RwLock::new(HashMap::new()),
            fetch_counter: AtomicU64::new(0),
        }
    }

    /// Reads every loan of `identity` and replaces its snapshot.
    ///
    /// All record reads run concurrently. The first failure aborts the whole
    /// refresh and leaves the previous snapshot in place.
    ///
    /// # Arguments
    ///
    /// * `identity` - The borrower whose loans are read.
    /// * `session` - Scope of the session that asked for the refresh. Once it
    ///   fires the result is discarded with `SessionClosed` instead of
    ///   installed.
    pub async fn refresh(
        &self,
        identity: &Identity,
        session: &CancellationToken,
    ) -> Result<Arc<Snapshot>> {
        let version = self.fetch_counter.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%identity, version, "Refreshing loans");

        let count = self.ledger.get_loan_count(identity).await?;
        let fetches = (0..count).map(move |index| async move {
            self.ledger
                .get_loan(identity, index)
                .await
                .map_err(|e| match e {
                    // The count we just read says this index exists.
                    LoanError::NotFound { index } => LoanError::LedgerUnavailable(format!(
                        "loan {} missing below reported count {}",
                        index, count
                    )),
                    other => other,
                })
        });
        let loans = try_join_all(fetches).await?;

        let snapshot = Arc::new(Snapshot {
            identity: identity.clone(),
            loans,
            as_of_version: version,
        });

        let mut snapshots = self.snapshots.write().await;
        // Disconnect cancels before it invalidates, so checking under the
        // write lock never resurrects a discarded snapshot.
        if session.is_cancelled() {
            debug!(%identity, version, "Session closed, dropping refresh");
            return Err(LoanError::SessionClosed);
        }
        match snapshots.get(identity) {
            Some(current) if current.as_of_version > version => {
                debug!(%identity, version, newer = current.as_of_version, "Discarding superseded refresh");
                Ok(current.clone())
            }
            _ => {
                snapshots.insert(identity.clone(), snapshot.clone());
                info!(%identity, loans = snapshot.len(), version, "Loans reconciled");
                Ok(snapshot)
            }
        }
    }

    pub async fn snapshot(&self, identity: &Identity) -> Option<Arc<Snapshot>> {
        self.snapshots.read().await.get(identity).cloned()
    }

    /// Drops the cached snapshot so the next reader has to refresh.
    pub async fn invalidate(&self, identity: &Identity) {
        if self.snapshots.write().await.remove(identity).is_some() {
            debug!(%identity, "Snapshot invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loan::{Loan, TokenAmount};
    use crate::infrastructure::in_memory::InMemoryLedger;

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    fn loan(repaid: bool) -> Loan {
        Loan {
            index: 0,
            principal_amount: TokenAmount::new(1000),
            collateral_amount: TokenAmount::new(5),
            duration_days: 30,
            active: true,
            repaid,
        }
    }

    #[tokio::test]
    async fn test_refresh_reads_every_index() {
        let borrower = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        for repaid in [true, false, false] {
            ledger.seed_loan(&borrower, loan(repaid));
        }
        let reconciler = LoanStateReconciler::new(ledger.clone());

        let snapshot = reconciler.refresh(&borrower, &live()).await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.loans.iter().map(|l| l.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(ledger.loan_reads(), 3);
        assert_eq!(reconciler.snapshot(&borrower).await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let borrower = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.seed_loan(&borrower, loan(false));
        let reconciler = LoanStateReconciler::new(ledger.clone());
        let first = reconciler.refresh(&borrower, &live()).await.unwrap();

        ledger.seed_loan(&borrower, loan(false));
        ledger.fail_reads(1);
        let result = reconciler.refresh(&borrower, &live()).await;

        assert!(matches!(result, Err(LoanError::LedgerUnavailable(_))));
        assert_eq!(reconciler.snapshot(&borrower).await, Some(first));
    }

    #[tokio::test]
    async fn test_versions_increase_per_refresh() {
        let borrower = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        let reconciler = LoanStateReconciler::new(ledger);

        let first = reconciler.refresh(&borrower, &live()).await.unwrap();
        let second = reconciler.refresh(&borrower, &live()).await.unwrap();
        assert!(second.as_of_version > first.as_of_version);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let alice = Identity::new("0xa1");
        let bob = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.seed_loan(&alice, loan(false));
        let reconciler = LoanStateReconciler::new(ledger);

        reconciler.refresh(&alice, &live()).await.unwrap();
        reconciler.refresh(&bob, &live()).await.unwrap();
        reconciler.invalidate(&bob).await;

        assert_eq!(reconciler.snapshot(&alice).await.map(|s| s.len()), Some(1));
        assert!(reconciler.snapshot(&bob).await.is_none());
    }

    #[tokio::test]
    async fn test_one_failed_record_read_aborts_refresh() {
        let borrower = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.seed_loan(&borrower, loan(false));
        let reconciler = LoanStateReconciler::new(ledger.clone());
        let first = reconciler.refresh(&borrower, &live()).await.unwrap();

        for _ in 0..3 {
            ledger.seed_loan(&borrower, loan(false));
        }
        ledger.fail_loan_read(2);
        let result = reconciler.refresh(&borrower, &live()).await;

        assert!(matches!(result, Err(LoanError::LedgerUnavailable(_))));
        assert_eq!(reconciler.snapshot(&borrower).await, Some(first));

        // The outage was one-shot; the next refresh sees all four loans.
        let recovered = reconciler.refresh(&borrower, &live()).await.unwrap();
        assert_eq!(recovered.len(), 4);
    }

    #[tokio::test]
    async fn test_record_missing_below_count_is_an_outage() {
        let borrower = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        for _ in 0..3 {
            ledger.seed_loan(&borrower, loan(false));
        }
        ledger.lose_loan_record(1);
        let reconciler = LoanStateReconciler::new(ledger);

        let err = reconciler.refresh(&borrower, &live()).await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("loan 1 missing below reported count 3"));
        assert!(reconciler.snapshot(&borrower).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_after_session_closed_is_discarded() {
        let borrower = Identity::new("0xb0");
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.seed_loan(&borrower, loan(false));
        let reconciler = LoanStateReconciler::new(ledger.clone());
        let session = CancellationToken::new();
        session.cancel();

        let result = reconciler.refresh(&borrower, &session).await;

        assert!(matches!(result, Err(LoanError::SessionClosed)));
        assert_eq!(ledger.loan_reads(), 1);
        assert!(reconciler.snapshot(&borrower).await.is_none());
    }
}

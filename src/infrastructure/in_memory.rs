use crate::domain::loan::{Identity, Loan, TokenAmount};
use crate::domain::ports::{LedgerClient, Signer};
use crate::domain::transaction::{Inclusion, LoanCall, SignedCall, TxHandle};
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

struct MempoolEntry {
    from: Identity,
    call: LoanCall,
    lookups: u32,
    revert: Option<String>,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Identity, TokenAmount>,
    loans: HashMap<Identity, Vec<Loan>>,
    mempool: HashMap<TxHandle, MempoolEntry>,
    receipts: HashMap<TxHandle, Inclusion>,
    nonce: u64,
    confirm_after: u32,
    hold: bool,
    revert_next: Option<String>,
    read_outages: u32,
    status_outages: u32,
    /// Record reads that fail once with `LedgerUnavailable`.
    record_outages: HashSet<u64>,
    /// Records a lagging node cannot serve although they are counted.
    lost_records: HashSet<u64>,
    status_latency: Duration,
    submissions: usize,
    status_lookups: usize,
    loan_reads: usize,
}

impl LedgerState {
    fn read_gate(&mut self) -> Result<()> {
        if self.read_outages > 0 {
            self.read_outages -= 1;
            return Err(LoanError::LedgerUnavailable("node unreachable".into()));
        }
        Ok(())
    }

    /// Executes a mined call against the loan contract.
    fn execute(&mut self, from: &Identity, call: &LoanCall) -> Inclusion {
        match call {
            LoanCall::RequestLoan {
                principal,
                collateral,
                duration_days,
            } => {
                let balance = self.balances.get(from).copied().unwrap_or_default();
                let Some(remaining) = balance.checked_sub(*collateral) else {
                    return Inclusion::Reverted("insufficient collateral balance".into());
                };
                self.balances.insert(from.clone(), remaining);
                let loans = self.loans.entry(from.clone()).or_default();
                loans.push(Loan {
                    index: loans.len() as u64,
                    principal_amount: *principal,
                    collateral_amount: *collateral,
                    duration_days: *duration_days,
                    active: true,
                    repaid: false,
                });
                Inclusion::Succeeded
            }
            LoanCall::RepayLoan { index } => {
                let loan = usize::try_from(*index)
                    .ok()
                    .and_then(|i| self.loans.get_mut(from).and_then(|loans| loans.get_mut(i)));
                match loan {
                    None => Inclusion::Reverted("no such loan".into()),
                    Some(loan) if loan.repaid => Inclusion::Reverted("loan already repaid".into()),
                    Some(loan) if !loan.active => Inclusion::Reverted("loan not active".into()),
                    Some(loan) => {
                        loan.repaid = true;
                        let collateral = loan.collateral_amount;
                        let balance = self.balances.entry(from.clone()).or_default();
                        *balance = balance.checked_add(collateral).unwrap_or(*balance);
                        Inclusion::Succeeded
                    }
                }
            }
        }
    }

    fn include(&mut self, handle: &TxHandle) -> Option<Inclusion> {
        let entry = self.mempool.remove(handle)?;
        let inclusion = match entry.revert {
            Some(reason) => Inclusion::Reverted(reason),
            None => self.execute(&entry.from, &entry.call),
        };
        debug!(%handle, ?inclusion, "Included transaction");
        self.receipts.insert(handle.clone(), inclusion.clone());
        Some(inclusion)
    }
}

/// A simulated loan contract.
///
/// Broadcast transactions sit in a mempool until they have been looked up
/// `confirm_after_polls` times, then execute against contract state. Knobs
/// allow holding inclusion indefinitely, forcing reverts and injecting read
/// outages. Counters record every interaction for assertions.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                confirm_after: 1,
                ..LedgerState::default()
            }),
        }
    }

    pub fn fund(&self, identity: &Identity, amount: TokenAmount) {
        self.lock().balances.insert(identity.clone(), amount);
    }

    /// The `n`-th inclusion lookup of a transaction reports it mined.
    pub fn confirm_after_polls(&self, n: u32) {
        self.lock().confirm_after = n.max(1);
    }

    /// Keeps broadcast transactions in the mempool regardless of lookups.
    pub fn hold_inclusion(&self, hold: bool) {
        self.lock().hold = hold;
    }

    /// The next broadcast transaction reverts when mined.
    pub fn revert_next(&self, reason: impl Into<String>) {
        self.lock().revert_next = Some(reason.into());
    }

    /// The next `n` reads fail with `LedgerUnavailable`.
    pub fn fail_reads(&self, n: u32) {
        self.lock().read_outages = n;
    }

    /// The next `n` inclusion lookups fail with `LedgerUnavailable`.
    pub fn fail_status_lookups(&self, n: u32) {
        self.lock().status_outages = n;
    }

    /// The next read of loan record `index` fails with `LedgerUnavailable`.
    pub fn fail_loan_read(&self, index: u64) {
        self.lock().record_outages.insert(index);
    }

    /// Loan record `index` reads as `NotFound` while still being counted.
    pub fn lose_loan_record(&self, index: u64) {
        self.lock().lost_records.insert(index);
    }

    /// Every inclusion lookup takes `latency` before answering.
    pub fn delay_status_lookups(&self, latency: Duration) {
        self.lock().status_latency = latency;
    }

    /// Mines everything still in the mempool, as if it landed out of band.
    pub fn include_pending(&self) -> usize {
        let mut state = self.lock();
        let handles: Vec<TxHandle> = state.mempool.keys().cloned().collect();
        handles
            .iter()
            .filter_map(|handle| state.include(handle))
            .count()
    }

    /// Appends a loan directly, bypassing the mempool.
    pub fn seed_loan(&self, identity: &Identity, mut loan: Loan) -> u64 {
        let mut state = self.lock();
        let loans = state.loans.entry(identity.clone()).or_default();
        loan.index = loans.len() as u64;
        loans.push(loan);
        loans.len() as u64 - 1
    }

    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    pub fn status_lookups(&self) -> usize {
        self.lock().status_lookups
    }

    pub fn loan_reads(&self) -> usize {
        self.lock().loan_reads
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_preconditions(&self, from: &Identity, call: &LoanCall) -> Result<()> {
        let state = self.lock();
        match call {
            LoanCall::RequestLoan {
                principal,
                collateral,
                duration_days,
            } => {
                if *duration_days == 0 {
                    return Err(LoanError::SubmissionRejected("invalid duration".into()));
                }
                if principal.is_zero() || collateral.is_zero() {
                    return Err(LoanError::SubmissionRejected(
                        "amounts must be non-zero".into(),
                    ));
                }
                let balance = state.balances.get(from).copied().unwrap_or_default();
                if balance < *collateral {
                    return Err(LoanError::InsufficientFunds);
                }
            }
            LoanCall::RepayLoan { index } => {
                let count = state.loans.get(from).map_or(0, Vec::len) as u64;
                if *index >= count {
                    return Err(LoanError::SubmissionRejected(format!(
                        "loan {} does not exist",
                        index
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_loan_count(&self, identity: &Identity) -> Result<u64> {
        let mut state = self.lock();
        state.read_gate()?;
        Ok(state.loans.get(identity).map_or(0, Vec::len) as u64)
    }

    async fn get_loan(&self, identity: &Identity, index: u64) -> Result<Loan> {
        let mut state = self.lock();
        state.read_gate()?;
        state.loan_reads += 1;
        if state.record_outages.remove(&index) {
            return Err(LoanError::LedgerUnavailable(format!(
                "read of loan {} timed out",
                index
            )));
        }
        if state.lost_records.contains(&index) {
            return Err(LoanError::NotFound { index });
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| state.loans.get(identity).and_then(|loans| loans.get(i)))
            .cloned()
            .ok_or(LoanError::NotFound { index })
    }

    async fn get_balance(&self, identity: &Identity) -> Result<TokenAmount> {
        let mut state = self.lock();
        state.read_gate()?;
        Ok(state.balances.get(identity).copied().unwrap_or_default())
    }

    async fn submit(
        &self,
        from: &Identity,
        call: &LoanCall,
        signer: &dyn Signer,
    ) -> Result<TxHandle> {
        self.check_preconditions(from, call)?;

        let signed = signer.sign(from, call).await?;
        if signed.from != *from || signed.call != *call {
            return Err(LoanError::SubmissionRejected(
                "signature does not match the call".into(),
            ));
        }

        let mut state = self.lock();
        state.nonce += 1;
        state.submissions += 1;
        let handle = TxHandle(format!("0x{:064x}", state.nonce));
        let revert = state.revert_next.take();
        state.mempool.insert(
            handle.clone(),
            MempoolEntry {
                from: signed.from,
                call: signed.call,
                lookups: 0,
                revert,
            },
        );
        Ok(handle)
    }

    async fn inclusion_status(&self, handle: &TxHandle) -> Result<Inclusion> {
        let latency = self.lock().status_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.status_lookups += 1;
        if state.status_outages > 0 {
            state.status_outages -= 1;
            return Err(LoanError::LedgerUnavailable("receipt lookup failed".into()));
        }

        if let Some(inclusion) = state.receipts.get(handle) {
            return Ok(inclusion.clone());
        }

        let confirm_after = state.confirm_after;
        let hold = state.hold;
        let Some(entry) = state.mempool.get_mut(handle) else {
            return Ok(Inclusion::Pending);
        };
        entry.lookups += 1;
        if hold || entry.lookups < confirm_after {
            return Ok(Inclusion::Pending);
        }
        Ok(state.include(handle).unwrap_or(Inclusion::Pending))
    }
}

/// A wallet holding a single account, with switches for user refusals.
pub struct InMemorySigner {
    identity: Identity,
    authorized: AtomicBool,
    reject_connections: AtomicBool,
    deny_signing: AtomicBool,
    prompts: AtomicUsize,
    signatures: AtomicUsize,
}

impl InMemorySigner {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            authorized: AtomicBool::new(false),
            reject_connections: AtomicBool::new(false),
            deny_signing: AtomicBool::new(false),
            prompts: AtomicUsize::new(0),
            signatures: AtomicUsize::new(0),
        }
    }

    /// Marks the account as previously authorized for this process.
    pub fn authorize(&self) {
        self.authorized.store(true, Ordering::SeqCst);
    }

    pub fn reject_connections(&self, reject: bool) {
        self.reject_connections.store(reject, Ordering::SeqCst);
    }

    pub fn deny_signing(&self, deny: bool) {
        self.deny_signing.store(deny, Ordering::SeqCst);
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for InMemorySigner {
    async fn request_accounts(&self) -> Result<Vec<Identity>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.reject_connections.load(Ordering::SeqCst) {
            return Err(LoanError::UserRejected);
        }
        self.authorize();
        Ok(vec![self.identity.clone()])
    }

    async fn accounts(&self) -> Result<Vec<Identity>> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(vec![self.identity.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn sign(&self, from: &Identity, call: &LoanCall) -> Result<SignedCall> {
        if *from != self.identity {
            return Err(LoanError::SignerDenied);
        }
        if self.deny_signing.load(Ordering::SeqCst) {
            return Err(LoanError::SignerDenied);
        }
        let n = self.signatures.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SignedCall {
            from: from.clone(),
            call: call.clone(),
            signature: format!("sig:{}:{}", self.identity, n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borrower() -> Identity {
        Identity::new("0xb0")
    }

    fn request(collateral: u128) -> LoanCall {
        LoanCall::RequestLoan {
            principal: TokenAmount::new(1000),
            collateral: TokenAmount::new(collateral),
            duration_days: 30,
        }
    }

    #[tokio::test]
    async fn test_request_lands_after_configured_lookups() {
        let ledger = InMemoryLedger::new();
        let signer = InMemorySigner::new(borrower());
        ledger.fund(&borrower(), TokenAmount::new(50));
        ledger.confirm_after_polls(2);

        let handle = ledger.submit(&borrower(), &request(5), &signer).await.unwrap();
        assert_eq!(ledger.get_loan_count(&borrower()).await.unwrap(), 0);

        assert_eq!(ledger.inclusion_status(&handle).await.unwrap(), Inclusion::Pending);
        assert_eq!(ledger.inclusion_status(&handle).await.unwrap(), Inclusion::Succeeded);
        assert_eq!(ledger.inclusion_status(&handle).await.unwrap(), Inclusion::Succeeded);

        let loan = ledger.get_loan(&borrower(), 0).await.unwrap();
        assert_eq!(loan.principal_amount, TokenAmount::new(1000));
        assert!(loan.active && !loan.repaid);
        assert_eq!(
            ledger.get_balance(&borrower()).await.unwrap(),
            TokenAmount::new(45)
        );
    }

    #[tokio::test]
    async fn test_broadcast_preconditions() {
        let ledger = InMemoryLedger::new();
        let signer = InMemorySigner::new(borrower());
        ledger.fund(&borrower(), TokenAmount::new(1));

        assert!(matches!(
            ledger.submit(&borrower(), &request(5), &signer).await,
            Err(LoanError::InsufficientFunds)
        ));
        let zero_duration = LoanCall::RequestLoan {
            principal: TokenAmount::new(1),
            collateral: TokenAmount::new(1),
            duration_days: 0,
        };
        assert!(matches!(
            ledger.submit(&borrower(), &zero_duration, &signer).await,
            Err(LoanError::SubmissionRejected(_))
        ));
        assert!(matches!(
            ledger
                .submit(&borrower(), &LoanCall::RepayLoan { index: 0 }, &signer)
                .await,
            Err(LoanError::SubmissionRejected(_))
        ));
        assert_eq!(ledger.submissions(), 0);
        assert_eq!(signer.signature_count(), 0);
    }

    #[tokio::test]
    async fn test_get_loan_out_of_range() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.get_loan(&borrower(), 0).await,
            Err(LoanError::NotFound { index: 0 })
        ));
    }

    #[tokio::test]
    async fn test_read_outages_are_consumed() {
        let ledger = InMemoryLedger::new();
        ledger.fail_reads(2);
        assert!(ledger.get_loan_count(&borrower()).await.is_err());
        assert!(ledger.get_balance(&borrower()).await.is_err());
        assert_eq!(ledger.get_loan_count(&borrower()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_double_repay_reverts_on_execution() {
        let ledger = InMemoryLedger::new();
        let signer = InMemorySigner::new(borrower());
        ledger.fund(&borrower(), TokenAmount::new(10));
        ledger.hold_inclusion(true);

        ledger.submit(&borrower(), &request(5), &signer).await.unwrap();
        assert_eq!(ledger.include_pending(), 1);

        let repay = LoanCall::RepayLoan { index: 0 };
        let first = ledger.submit(&borrower(), &repay, &signer).await.unwrap();
        let second = ledger.submit(&borrower(), &repay, &signer).await.unwrap();
        ledger.include_pending();

        let outcomes = [
            ledger.inclusion_status(&first).await.unwrap(),
            ledger.inclusion_status(&second).await.unwrap(),
        ];
        assert_eq!(
            outcomes.iter().filter(|i| **i == Inclusion::Succeeded).count(),
            1
        );
        assert!(
            outcomes
                .contains(&Inclusion::Reverted("loan already repaid".to_string()))
        );
        assert_eq!(
            ledger.get_balance(&borrower()).await.unwrap(),
            TokenAmount::new(10)
        );
    }

    #[tokio::test]
    async fn test_signer_denial_blocks_broadcast() {
        let ledger = InMemoryLedger::new();
        let signer = InMemorySigner::new(borrower());
        ledger.fund(&borrower(), TokenAmount::new(10));
        signer.deny_signing(true);

        assert!(matches!(
            ledger.submit(&borrower(), &request(5), &signer).await,
            Err(LoanError::SignerDenied)
        ));
        assert_eq!(ledger.submissions(), 0);
    }
}

use super::loan::{Identity, Loan, TokenAmount};
use super::transaction::{Inclusion, LoanCall, SignedCall, TxHandle};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Read and write access to the loan contract on the ledger.
///
/// Implementations convert every transport failure into a
/// [`LoanError`](crate::error::LoanError) before returning.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_loan_count(&self, identity: &Identity) -> Result<u64>;

    /// Fails with `NotFound` for `index` outside `[0, count)`.
    async fn get_loan(&self, identity: &Identity, index: u64) -> Result<Loan>;

    async fn get_balance(&self, identity: &Identity) -> Result<TokenAmount>;

    /// Signs `call` through `signer` and broadcasts it.
    ///
    /// Returns as soon as the transaction is accepted into the pending pool;
    /// the handle says nothing about confirmation.
    async fn submit(&self, from: &Identity, call: &LoanCall, signer: &dyn Signer)
    -> Result<TxHandle>;

    /// A single idempotent inclusion lookup.
    async fn inclusion_status(&self, handle: &TxHandle) -> Result<Inclusion>;

    /// Push-style status updates for `handle`, where the ledger supports them.
    ///
    /// `None` means callers have to poll [`LedgerClient::inclusion_status`].
    async fn watch(&self, _handle: &TxHandle) -> Option<BoxStream<'static, Inclusion>> {
        None
    }
}

/// The external capability holding keys for one or more accounts.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Prompts the user to expose accounts. Fails with `UserRejected`.
    async fn request_accounts(&self) -> Result<Vec<Identity>>;

    /// Accounts already authorized for this process, without prompting.
    async fn accounts(&self) -> Result<Vec<Identity>>;

    /// Fails with `SignerDenied` when the user declines.
    async fn sign(&self, from: &Identity, call: &LoanCall) -> Result<SignedCall>;
}

pub type LedgerClientRef = Arc<dyn LedgerClient>;
pub type SignerRef = Arc<dyn Signer>;

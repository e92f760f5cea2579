use super::loan::{Identity, TokenAmount};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    RequestLoan,
    RepayLoan,
}

/// A state-changing contract call, carrying its own payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanCall {
    RequestLoan {
        principal: TokenAmount,
        collateral: TokenAmount,
        duration_days: u32,
    },
    RepayLoan {
        index: u64,
    },
}

impl LoanCall {
    pub fn kind(&self) -> TxKind {
        match self {
            LoanCall::RequestLoan { .. } => TxKind::RequestLoan,
            LoanCall::RepayLoan { .. } => TxKind::RepayLoan,
        }
    }

    /// Native asset attached to the call.
    pub fn value(&self) -> TokenAmount {
        match self {
            LoanCall::RequestLoan { collateral, .. } => *collateral,
            LoanCall::RepayLoan { .. } => TokenAmount::ZERO,
        }
    }
}

/// A call authorized by a signer for a given sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCall {
    pub from: Identity,
    pub call: LoanCall,
    pub signature: String,
}

/// Ledger-assigned handle of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the ledger reports about a handle at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inclusion {
    /// Still in the pending pool, or unknown to the queried node.
    Pending,
    Succeeded,
    Reverted(String),
}

impl Inclusion {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Inclusion::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Submitted,
    AwaitingConfirmation,
    Confirmed,
    Failed,
    TimedOut,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed | TxStatus::TimedOut)
    }
}

/// One in-flight mutation. Lives only until it reaches a terminal status.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub handle: TxHandle,
    pub call: LoanCall,
    pub submitted_at: Instant,
    pub status: TxStatus,
    /// Number of status checks made so far.
    pub attempt: u32,
}

impl PendingTransaction {
    pub fn new(handle: TxHandle, call: LoanCall) -> Self {
        Self {
            handle,
            call,
            submitted_at: Instant::now(),
            status: TxStatus::Submitted,
            attempt: 0,
        }
    }

    pub fn kind(&self) -> TxKind {
        self.call.kind()
    }

    /// Moves to `next`, refusing to leave a terminal status.
    pub fn advance(&mut self, next: TxStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

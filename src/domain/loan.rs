use crate::error::{LoanError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An account address as understood by the ledger.
///
/// Opaque to the orchestrator: it is compared and displayed, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A monetary value in ledger-native smallest units (e.g. wei).
///
/// Arithmetic is integer-only; conversion to a human scale goes through
/// [`TokenAmount::to_decimal`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    pub const ZERO: Self = Self(0);

    pub fn new(units: u128) -> Self {
        Self(units)
    }

    pub fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Scales the amount down by `decimals` places, e.g. wei to ether with 18.
    pub fn to_decimal(&self, decimals: u32) -> Result<Decimal> {
        let units = i128::try_from(self.0)
            .map_err(|_| LoanError::Amount(format!("{} units overflow i128", self.0)))?;
        Decimal::try_from_i128_with_scale(units, decimals)
            .map(|d| d.normalize())
            .map_err(|e| LoanError::Amount(format!("cannot scale {} by 10^{}: {}", self.0, decimals, e)))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for TokenAmount {
    fn from(units: u128) -> Self {
        Self(units)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// Recorded but not yet funded.
    Pending,
    Active,
    Repaid,
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Active => "active",
            LoanStatus::Repaid => "repaid",
        };
        f.write_str(s)
    }
}

/// A loan record exactly as the ledger reports it.
///
/// `(identity, index)` is the primary key: the contract appends records to a
/// per-borrower list and never removes them, so the ordinal is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub index: u64,
    pub principal_amount: TokenAmount,
    pub collateral_amount: TokenAmount,
    pub duration_days: u32,
    pub active: bool,
    pub repaid: bool,
}

impl Loan {
    pub fn status(&self) -> LoanStatus {
        match (self.active, self.repaid) {
            (_, true) => LoanStatus::Repaid,
            (true, false) => LoanStatus::Active,
            (false, false) => LoanStatus::Pending,
        }
    }

    pub fn is_repayable(&self) -> bool {
        self.active && !self.repaid
    }
}

/// A reconciled, read-only view of one identity's loans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub identity: Identity,
    pub loans: Vec<Loan>,
    /// Monotonic marker of the fetch that produced this view.
    pub as_of_version: u64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Loan> {
        usize::try_from(index).ok().and_then(|i| self.loans.get(i))
    }

    /// Loans that can still be repaid.
    pub fn outstanding(&self) -> impl Iterator<Item = &Loan> {
        self.loans.iter().filter(|loan| loan.is_repayable())
    }
}

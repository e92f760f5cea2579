use thiserror::Error;

/// How a caller may react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Rejected before touching the ledger; fix the input and call again.
    Local,
    /// The user declined or has no signer; only the user can retry.
    UserRetryable,
    /// Infrastructure hiccup; retried with backoff before surfacing.
    Transient,
    /// Retrying the same request will fail the same way.
    Fatal,
}

#[derive(Error, Debug)]
pub enum LoanError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("No signer available in this environment")]
    NoSignerAvailable,
    #[error("User rejected the connection request")]
    UserRejected,
    #[error("User declined to sign the transaction")]
    SignerDenied,
    #[error("Submission rejected by the ledger: {0}")]
    SubmissionRejected(String),
    #[error("Insufficient funds for this transaction")]
    InsufficientFunds,
    #[error("Loan {index} not found")]
    NotFound { index: u64 },
    #[error("Loan {index} is already repaid")]
    AlreadyRepaid { index: u64 },
    #[error("Loan {index} is not active")]
    LoanNotActive { index: u64 },
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("Signer session was disconnected")]
    SessionClosed,
    #[error("Another transaction is already in flight for this identity")]
    OperationInProgress,
    #[error("Amount error: {0}")]
    Amount(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoanError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            LoanError::InvalidInput(_)
            | LoanError::NotFound { .. }
            | LoanError::AlreadyRepaid { .. }
            | LoanError::LoanNotActive { .. }
            | LoanError::OperationInProgress
            | LoanError::Amount(_) => RetryClass::Local,
            LoanError::NoSignerAvailable
            | LoanError::UserRejected
            | LoanError::SignerDenied
            | LoanError::SessionClosed => RetryClass::UserRetryable,
            LoanError::LedgerUnavailable(_) => RetryClass::Transient,
            LoanError::SubmissionRejected(_)
            | LoanError::InsufficientFunds
            | LoanError::Config(_)
            | LoanError::Csv(_)
            | LoanError::Io(_) => RetryClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.retry_class() == RetryClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;

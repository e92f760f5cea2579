//! Ledger-independent value types and the ports the orchestrator talks through.

pub mod loan;
pub mod ports;
pub mod transaction;

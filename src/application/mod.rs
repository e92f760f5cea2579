//! Application layer coordinating loan mutations against the ledger.
//!
//! `LoanOrchestrator` is the entry point. It composes the `SignerSession`
//! (who is acting), the `TransactionTracker` (what happened to a broadcast
//! transaction) and the `LoanStateReconciler` (what the ledger says now).

pub mod backoff;
pub mod orchestrator;
pub mod reconciler;
pub mod session;
pub mod tracker;

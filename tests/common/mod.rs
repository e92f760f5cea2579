#![allow(dead_code)]

use loanctl::application::orchestrator::LoanOrchestrator;
use loanctl::application::session::SignerSession;
use loanctl::config::OrchestratorConfig;
use loanctl::domain::loan::{Identity, TokenAmount};
use loanctl::infrastructure::in_memory::{InMemoryLedger, InMemorySigner};
use std::sync::Arc;

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub signer: Arc<InMemorySigner>,
    pub orchestrator: Arc<LoanOrchestrator>,
}

pub fn borrower() -> Identity {
    Identity::new("0x00000000000000000000000000000000000000b0")
}

pub fn harness() -> Harness {
    harness_with(OrchestratorConfig::default())
}

pub fn harness_with(config: OrchestratorConfig) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fund(&borrower(), TokenAmount::new(1_000));
    let signer = Arc::new(InMemorySigner::new(borrower()));
    let session = SignerSession::with_signer(signer.clone());
    let orchestrator = Arc::new(LoanOrchestrator::new(session, ledger.clone(), &config));
    Harness {
        ledger,
        signer,
        orchestrator,
    }
}

/// Lets spawned tasks run until the orchestrator has a transaction in flight.
pub async fn wait_for_pending(orchestrator: &LoanOrchestrator) {
    while orchestrator.pending().is_none() {
        tokio::task::yield_now().await;
    }
}

use clap::{Parser, ValueEnum};
use loanctl::application::orchestrator::{LoanOrchestrator, LoanOutcome};
use loanctl::application::session::SignerSession;
use loanctl::config::{self, OrchestratorConfig};
use loanctl::domain::loan::Identity;
use loanctl::infrastructure::in_memory::{InMemoryLedger, InMemorySigner};
use loanctl::interfaces::csv::command_reader::{Command, CommandReader};
use loanctl::interfaces::csv::snapshot_writer::SnapshotWriter;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command script (op, principal, collateral, duration, index)
    input: PathBuf,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format for the final snapshot
    #[arg(long, value_enum, default_value = "csv")]
    format: Format,

    /// Decimal places used to display amounts in CSV output
    #[arg(long, default_value_t = 0)]
    decimals: u32,

    /// Confirmation poll interval in milliseconds (overrides config)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path).into_diagnostic()?,
        None => OrchestratorConfig::default(),
    };
    if let Some(ms) = cli.poll_interval_ms {
        config.tracker.poll_interval = Duration::from_millis(ms);
    }
    config.validate().into_diagnostic()?;

    // Simulated ledger and wallet for the configured borrower
    let borrower = Identity::new(config.simulation.identity.clone());
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.fund(&borrower, config.simulation.initial_balance);
    ledger.confirm_after_polls(config.simulation.confirm_after_polls);
    let signer = Arc::new(InMemorySigner::new(borrower));

    let orchestrator =
        LoanOrchestrator::new(SignerSession::with_signer(signer), ledger, &config);

    let file = File::open(&cli.input).into_diagnostic()?;
    for command in CommandReader::new(file).commands() {
        match command {
            Ok(command) => run(&orchestrator, command).await,
            Err(e) => eprintln!("Error reading command: {}", e),
        }
    }

    let Some(snapshot) = orchestrator.snapshot().await else {
        eprintln!("No connected identity with reconciled loans");
        return Ok(());
    };

    let stdout = io::stdout();
    let mut writer = SnapshotWriter::new(stdout.lock(), cli.decimals);
    match cli.format {
        Format::Csv => writer.write_csv(&snapshot).into_diagnostic()?,
        Format::Json => writer.write_json(&snapshot).into_diagnostic()?,
    }

    Ok(())
}

async fn run(orchestrator: &LoanOrchestrator, command: Command) {
    let result = match command {
        Command::Connect => orchestrator
            .connect()
            .await
            .map(|identity| format!("connected as {}", identity)),
        Command::Request {
            principal,
            collateral,
            duration_days,
        } => orchestrator
            .request_loan(principal, collateral, duration_days)
            .await
            .map(|outcome| describe(&outcome)),
        Command::Repay { index } => orchestrator
            .repay_loan(index)
            .await
            .map(|outcome| describe(&outcome)),
        Command::Refresh => orchestrator
            .refresh_loans()
            .await
            .map(|snapshot| format!("refreshed {} loans", snapshot.len())),
        Command::Balance => orchestrator
            .balance()
            .await
            .map(|balance| format!("balance {}", balance)),
        Command::Disconnect => {
            orchestrator.disconnect().await;
            Ok("disconnected".to_string())
        }
    };

    match result {
        Ok(message) => eprintln!("{}", message),
        Err(e) => eprintln!("Error processing command: {}", e),
    }
}

fn describe(outcome: &LoanOutcome) -> String {
    match outcome {
        LoanOutcome::Confirmed { handle, snapshot } => match snapshot {
            Some(snapshot) => format!("confirmed {} ({} loans)", handle, snapshot.len()),
            None => format!("confirmed {} (loans not yet reconciled)", handle),
        },
        LoanOutcome::Rejected { handle, reason } => format!("rejected {}: {}", handle, reason),
        LoanOutcome::Ambiguous { handle, cause } => {
            format!("ambiguous {} ({:?}); refresh before retrying", handle, cause)
        }
    }
}

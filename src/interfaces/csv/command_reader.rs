use crate::domain::loan::TokenAmount;
use crate::error::{LoanError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Connect,
    Request,
    Repay,
    Refresh,
    Balance,
    Disconnect,
}

/// One raw row of a command script.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CommandRecord {
    pub op: Op,
    pub principal: Option<u128>,
    pub collateral: Option<u128>,
    pub duration: Option<u32>,
    pub index: Option<u64>,
}

/// An orchestrator call, with the arguments its operation needs.
#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Connect,
    Request {
        principal: TokenAmount,
        collateral: TokenAmount,
        duration_days: u32,
    },
    Repay {
        index: u64,
    },
    Refresh,
    Balance,
    Disconnect,
}

impl TryFrom<CommandRecord> for Command {
    type Error = LoanError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let missing = |field: &str| LoanError::InvalidInput(format!("{:?} needs a {}", record.op, field));
        let command = match record.op {
            Op::Connect => Command::Connect,
            Op::Request => Command::Request {
                principal: TokenAmount::new(record.principal.ok_or_else(|| missing("principal"))?),
                collateral: TokenAmount::new(record.collateral.ok_or_else(|| missing("collateral"))?),
                duration_days: record.duration.ok_or_else(|| missing("duration"))?,
            },
            Op::Repay => Command::Repay {
                index: record.index.ok_or_else(|| missing("index"))?,
            },
            Op::Refresh => Command::Refresh,
            Op::Balance => Command::Balance,
            Op::Disconnect => Command::Disconnect,
        };
        Ok(command)
    }
}

/// Reads orchestrator commands from a CSV source.
///
/// Expects the header `op, principal, collateral, duration, index`; unused
/// columns may be left empty.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one command per row; a bad row does not stop the stream.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader.into_deserialize().map(|result| {
            result
                .map_err(LoanError::from)
                .and_then(|record: CommandRecord| Command::try_from(record))
        })
    }
}

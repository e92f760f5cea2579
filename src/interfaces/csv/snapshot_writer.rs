use crate::domain::loan::Snapshot;
use crate::error::{LoanError, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct LoanRow {
    index: u64,
    principal: String,
    collateral: String,
    duration_days: u32,
    status: String,
}

/// Renders a snapshot for humans and scripts.
///
/// Amounts are scaled by `decimals` places (18 turns wei into ether).
pub struct SnapshotWriter<W: Write> {
    writer: W,
    decimals: u32,
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(writer: W, decimals: u32) -> Self {
        Self { writer, decimals }
    }

    pub fn write_csv(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut self.writer);
        wtr.write_record(["index", "principal", "collateral", "duration_days", "status"])?;
        for loan in &snapshot.loans {
            wtr.serialize(LoanRow {
                index: loan.index,
                principal: loan.principal_amount.to_decimal(self.decimals)?.to_string(),
                collateral: loan.collateral_amount.to_decimal(self.decimals)?.to_string(),
                duration_days: loan.duration_days,
                status: loan.status().to_string(),
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Writes the snapshot verbatim, amounts in smallest units.
    pub fn write_json(&mut self, snapshot: &Snapshot) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, snapshot)
            .map_err(|e| LoanError::Io(e.into()))?;
        writeln!(self.writer)?;
        Ok(())
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use eb_types::{EquityPoint, PerfStats, Trade};

use crate::bus::DispatchRecord;

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    /// Reproducibility fingerprint: run id, the market-fill convention,
    /// and the replayed split's data fingerprint.
    pub fingerprint: String,
    /// False when the run was cut short (wall-clock limit).
    pub complete: bool,
    /// P1 identity held at run end.
    pub consistency: bool,
    pub stats: PerfStats,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Recorded pipeline errors, in dispatch order.
    pub errors: Vec<DispatchRecord>,
    /// Events dropped by fingerprint deduplication.
    pub dropped_events: u64,
    /// Set when the run was aborted; the partial result above stands.
    pub failure: Option<String>,
}

impl RunResult {
    /// Placeholder for a run that never started.
    pub fn empty(run_id: impl Into<String>, initial_capital: Decimal) -> Self {
        Self {
            run_id: run_id.into(),
            fingerprint: String::new(),
            complete: false,
            consistency: true,
            stats: PerfStats::empty(initial_capital),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            errors: Vec::new(),
            dropped_events: 0,
            failure: None,
        }
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| !t.is_open())
    }
}

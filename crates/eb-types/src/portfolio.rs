use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trades::Position;

/// One sample of the portfolio value series, appended after every bar's
/// mark-to-market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub equity: Decimal,
}

/// Snapshot broadcast on PORTFOLIO_UPDATE. The risk manager's position
/// mirror is fed exclusively from these, keeping the component graph
/// acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub positions: Vec<Position>,
}

impl PortfolioSnapshot {
    /// Fractional drawdown from the equity peak, in [0, 1].
    pub fn drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(Decimal::ZERO)
    }
}

/// Summary statistics over one finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfStats {
    pub trade_count: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub total_return: f64,
    pub equity_initial: Decimal,
    pub equity_final: Decimal,
    pub commission_total: Decimal,
}

impl PerfStats {
    pub fn empty(initial_capital: Decimal) -> Self {
        Self {
            trade_count: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            sharpe: 0.0,
            max_drawdown: 0.0,
            total_return: 0.0,
            equity_initial: initial_capital,
            equity_final: initial_capital,
            commission_total: Decimal::ZERO,
        }
    }
}

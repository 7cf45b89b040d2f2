//! Cash, positions, trade records, and the equity curve.
//!
//! The ledger is the book of record for one run. It reacts to trade
//! events from the order manager and to bars (mark-to-market), and
//! broadcasts PORTFOLIO_UPDATE snapshots that feed the risk manager's
//! mirror.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use eb_types::{
    Bar, Direction, EquityPoint, Event, PerfStats, PipelineError, PortfolioSnapshot, Position,
    Symbol, Trade, TradeClosed, TradeId, TradeOpened, TradeStatus,
};

use crate::bus::{Emitter, EventHandler};

/// Tolerance for the end-of-run PnL/equity identity: one cent.
pub fn consistency_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

pub struct PortfolioLedger {
    initial_capital: Decimal,
    cash: Decimal,
    positions: HashMap<Symbol, Position>,
    trades: Vec<Trade>,
    trade_index: HashMap<TradeId, usize>,
    equity_curve: Vec<EquityPoint>,
    last_price: HashMap<Symbol, Decimal>,
    peak_equity: Decimal,
    commission_total: Decimal,
}

impl PortfolioLedger {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: HashMap::new(),
            trades: Vec::new(),
            trade_index: HashMap::new(),
            equity_curve: Vec::new(),
            last_price: HashMap::new(),
            peak_equity: initial_capital,
            commission_total: Decimal::ZERO,
        }
    }

    pub fn reset(&mut self, initial_capital: Decimal) {
        *self = Self::new(initial_capital);
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn equity(&self) -> Decimal {
        self.cash + self.positions_value()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Open positions with the price each was last marked at. The
    /// coordinator uses this to synthesize forced closes.
    pub fn open_exposures(&self) -> Vec<(Symbol, Direction, Decimal)> {
        let mut exposures: Vec<_> = self
            .positions
            .values()
            .map(|p| {
                let mark = self
                    .last_price
                    .get(&p.symbol)
                    .copied()
                    .unwrap_or(p.average_entry_price);
                (p.symbol.clone(), p.direction(), mark)
            })
            .collect();
        exposures.sort_by(|a, b| a.0.cmp(&b.0));
        exposures
    }

    pub fn recent_trades(&self, include_open: bool) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|t| include_open || !t.is_open())
            .cloned()
            .collect()
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    fn positions_value(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| {
                let price = self
                    .last_price
                    .get(&p.symbol)
                    .copied()
                    .unwrap_or(p.average_entry_price);
                p.market_value(price)
            })
            .sum()
    }

    fn snapshot(&mut self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        let equity = self.equity();
        self.peak_equity = self.peak_equity.max(equity);
        PortfolioSnapshot {
            timestamp,
            cash: self.cash,
            equity,
            peak_equity: self.peak_equity,
            positions: self.positions.values().cloned().collect(),
        }
    }

    fn on_trade_open(&mut self, open: &TradeOpened, out: &mut Emitter) -> Result<(), PipelineError> {
        // Long entries consume cash, short entries release it.
        let gross = open.quantity * open.price;
        match open.direction {
            Direction::Long => self.cash -= gross + open.commission,
            Direction::Short => self.cash += gross - open.commission,
            Direction::Flat => {
                return Err(PipelineError::Handler {
                    message: "trade opened with flat direction".into(),
                })
            }
        }
        self.commission_total += open.commission;
        self.last_price.insert(open.symbol.clone(), open.price);

        self.positions.insert(
            open.symbol.clone(),
            Position::open(open.symbol.clone(), open.direction, open.quantity, open.price),
        );

        let trade = Trade::open(
            open.trade_id,
            open.symbol.clone(),
            open.direction,
            open.quantity,
            open.timestamp,
            open.price,
            open.commission,
            open.rule_id.clone(),
        );
        self.trade_index.insert(open.trade_id, self.trades.len());
        self.trades.push(trade);

        let snapshot = self.snapshot(open.timestamp);
        out.emit(Event::PortfolioUpdate(snapshot));
        Ok(())
    }

    fn on_trade_close(&mut self, close: &TradeClosed, out: &mut Emitter) -> Result<(), PipelineError> {
        if !close.matched {
            // Standalone close: recorded with zero pnl, no cash impact.
            let mut trade = Trade::open(
                close.trade_id,
                close.symbol.clone(),
                close.direction,
                close.quantity,
                close.timestamp,
                close.price,
                Decimal::ZERO,
                close.rule_id.clone(),
            );
            trade.exit_time = Some(close.timestamp);
            trade.exit_price = Some(close.price);
            trade.rule_id_close = Some(close.rule_id.clone());
            trade.status = TradeStatus::Closed;
            self.trades.push(trade);
            return Err(PipelineError::UnmatchedClose { symbol: close.symbol.to_string() });
        }

        let gross = close.quantity * close.price;
        match close.direction {
            // Closing a long sells; closing a short buys back.
            Direction::Long => self.cash += gross - close.commission,
            _ => self.cash -= gross + close.commission,
        }
        self.commission_total += close.commission;
        self.last_price.insert(close.symbol.clone(), close.price);
        self.positions.remove(&close.symbol);

        match self.trade_index.get(&close.trade_id) {
            Some(index) => {
                self.trades[*index].close(
                    close.timestamp,
                    close.price,
                    close.commission,
                    close.rule_id.clone(),
                );
                debug!(trade_id = close.trade_id, pnl = %self.trades[*index].pnl, "trade closed");
            }
            None => {
                return Err(PipelineError::Handler {
                    message: format!("close references unknown trade {}", close.trade_id),
                })
            }
        }

        let snapshot = self.snapshot(close.timestamp);
        out.emit(Event::PortfolioUpdate(snapshot));
        Ok(())
    }

    fn on_bar(&mut self, bar: &Bar, out: &mut Emitter) {
        self.last_price.insert(bar.symbol.clone(), bar.close);
        if let Some(position) = self.positions.get_mut(&bar.symbol) {
            position.mark(bar.close);
        }

        let cash = self.cash;
        let positions_value = self.positions_value();
        let equity = cash + positions_value;
        self.peak_equity = self.peak_equity.max(equity);
        self.equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            cash,
            positions_value,
            equity,
        });

        let snapshot = self.snapshot(bar.timestamp);
        out.emit(Event::PortfolioUpdate(snapshot));
    }

    /// P1: closed pnl plus open mark-to-market minus open-trade
    /// commissions must equal the equity change, within a cent.
    pub fn is_consistent(&self) -> bool {
        let closed_pnl: Decimal = self
            .trades
            .iter()
            .filter(|t| !t.is_open())
            .map(|t| t.pnl)
            .sum();
        let open_unrealized: Decimal = self.positions.values().map(|p| p.unrealized_pnl).sum();
        let open_commissions: Decimal = self
            .trades
            .iter()
            .filter(|t| t.is_open())
            .map(|t| t.commission_total)
            .sum();

        let expected = closed_pnl + open_unrealized - open_commissions;
        let actual = self.equity() - self.initial_capital;
        (expected - actual).abs() <= consistency_tolerance()
    }

    pub fn statistics(&self) -> PerfStats {
        let closed: Vec<&Trade> = self.trades.iter().filter(|t| !t.is_open()).collect();
        let wins = closed.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let win_rate = if closed.is_empty() {
            0.0
        } else {
            wins as f64 / closed.len() as f64
        };

        let gross_profit: Decimal = closed
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .sum();
        let gross_loss: Decimal = closed
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .sum();
        let profit_factor = if gross_loss > Decimal::ZERO {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        } else if gross_profit > Decimal::ZERO {
            // All-winner sentinel; keeps the objective total.
            9999.0
        } else {
            0.0
        };

        let equity_final = self
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.equity());
        let total_return = if self.initial_capital > Decimal::ZERO {
            ((equity_final - self.initial_capital) / self.initial_capital)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        PerfStats {
            trade_count: self.trades.len(),
            win_rate,
            profit_factor,
            sharpe: self.sharpe(),
            max_drawdown: self.max_drawdown(),
            total_return,
            equity_initial: self.initial_capital,
            equity_final,
            commission_total: self.commission_total,
        }
    }

    /// Annualized Sharpe over per-bar equity returns (252 periods/year,
    /// zero risk-free rate).
    fn sharpe(&self) -> f64 {
        if self.equity_curve.len() < 2 {
            return 0.0;
        }
        let values: Vec<f64> = self
            .equity_curve
            .iter()
            .filter_map(|p| p.equity.to_f64())
            .collect();
        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            mean / std_dev * (252.0_f64).sqrt()
        } else {
            0.0
        }
    }

    /// Largest fractional peak-to-trough decline of the equity curve.
    fn max_drawdown(&self) -> f64 {
        let mut peak = self.initial_capital.to_f64().unwrap_or(0.0);
        let mut max_drawdown = 0.0_f64;
        for point in &self.equity_curve {
            let equity = point.equity.to_f64().unwrap_or(0.0);
            if equity > peak {
                peak = equity;
            }
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - equity) / peak);
            }
        }
        max_drawdown
    }
}

impl EventHandler for PortfolioLedger {
    fn name(&self) -> &'static str {
        "portfolio"
    }

    fn on_event(&mut self, event: &Event, out: &mut Emitter) -> Result<(), PipelineError> {
        match event {
            Event::TradeOpen(open) => self.on_trade_open(open, out),
            Event::TradeClose(close) => self.on_trade_close(close, out),
            Event::Bar(bar) => {
                self.on_bar(bar, out);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

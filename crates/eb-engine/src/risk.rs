//! Signal-to-order translation: position sizing, the single-position
//! constraint, and drawdown control.
//!
//! The risk manager keeps a mirror of positions and equity fed only by
//! PORTFOLIO_UPDATE events; it never queries the portfolio directly, so
//! the component graph stays acyclic.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use eb_types::{
    Direction, Event, Intent, Order, PipelineError, Position, Side, Signal, Symbol,
};

use crate::bus::{Emitter, EventHandler};
use crate::indicators::Atr;

/// Position sizing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SizingPolicy {
    /// `quantity = fixed_quantity`
    Fixed { quantity: Decimal },
    /// `quantity = floor(equity * percent / price)`
    PercentEquity { percent: Decimal },
    /// `quantity = floor(equity * risk_percent / (price * stop_percent))`
    PercentRisk { risk_percent: Decimal, stop_percent: Decimal },
    /// `quantity = floor(equity * risk_percent / (atr * atr_multiple))`
    Volatility {
        risk_percent: Decimal,
        atr_period: usize,
        atr_multiple: Decimal,
    },
}

/// Optional drawdown-based exposure reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownControl {
    /// Above this drawdown, new quantities shrink by `reduction`.
    pub threshold: Decimal,
    /// Fractional size reduction in (0, 1).
    pub reduction: Decimal,
    /// Above this drawdown, no new positions open at all.
    pub cutoff: Decimal,
}

/// Converts signals into sized orders tagged with OPEN/CLOSE intent.
pub struct RiskManager {
    policy: SizingPolicy,
    drawdown: Option<DrawdownControl>,
    positions: HashMap<Symbol, Position>,
    equity: Decimal,
    peak_equity: Decimal,
    atr: HashMap<Symbol, Atr>,
    last_close: HashMap<Symbol, Decimal>,
}

impl RiskManager {
    pub fn new(policy: SizingPolicy, drawdown: Option<DrawdownControl>, initial_capital: Decimal) -> Self {
        Self {
            policy,
            drawdown,
            positions: HashMap::new(),
            equity: initial_capital,
            peak_equity: initial_capital,
            atr: HashMap::new(),
            last_close: HashMap::new(),
        }
    }

    pub fn reset(&mut self, initial_capital: Decimal) {
        self.positions.clear();
        self.equity = initial_capital;
        self.peak_equity = initial_capital;
        self.atr.clear();
        self.last_close.clear();
    }

    fn current_drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(Decimal::ZERO)
    }

    fn open_quantity(&self, symbol: &Symbol, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let raw = match &self.policy {
            SizingPolicy::Fixed { quantity } => *quantity,
            SizingPolicy::PercentEquity { percent } => (self.equity * *percent / price).floor(),
            SizingPolicy::PercentRisk { risk_percent, stop_percent } => {
                if *stop_percent <= Decimal::ZERO {
                    return Decimal::ZERO;
                }
                (self.equity * *risk_percent / (price * *stop_percent)).floor()
            }
            SizingPolicy::Volatility { risk_percent, atr_multiple, .. } => {
                let atr = self.atr.get(symbol).and_then(Atr::value);
                match atr {
                    Some(atr) if atr > Decimal::ZERO && *atr_multiple > Decimal::ZERO => {
                        (self.equity * *risk_percent / (atr * *atr_multiple)).floor()
                    }
                    _ => Decimal::ZERO,
                }
            }
        };

        let Some(control) = &self.drawdown else {
            return raw;
        };
        let drawdown = self.current_drawdown();
        if drawdown > control.threshold {
            (raw * (Decimal::ONE - control.reduction)).floor()
        } else {
            raw
        }
    }

    fn opens_suppressed(&self) -> bool {
        match &self.drawdown {
            Some(control) => self.current_drawdown() > control.cutoff,
            None => false,
        }
    }

    fn close_order(&self, signal: &Signal, position: &Position) -> Order {
        let side = match position.direction() {
            Direction::Long => Side::Sell,
            _ => Side::Buy,
        };
        Order::market(
            signal.symbol.clone(),
            signal.timestamp,
            side,
            position.quantity.abs(),
            Intent::Close,
            format!("{}:close", signal.rule_id),
        )
    }

    fn open_order(&self, signal: &Signal, price: Decimal) -> Option<Order> {
        if self.opens_suppressed() {
            warn!(symbol = %signal.symbol, "drawdown cutoff active, open suppressed");
            return None;
        }
        let side = Side::opening(signal.direction)?;
        let quantity = self.open_quantity(&signal.symbol, price);
        if quantity <= Decimal::ZERO {
            debug!(symbol = %signal.symbol, "sized to zero, open suppressed");
            return None;
        }
        Some(Order::market(
            signal.symbol.clone(),
            signal.timestamp,
            side,
            quantity,
            Intent::Open,
            format!("{}:open", signal.rule_id),
        ))
    }

    fn on_signal(&self, signal: &Signal, out: &mut Emitter) -> Result<(), PipelineError> {
        let price = match self.last_close.get(&signal.symbol) {
            Some(price) => *price,
            None => {
                return Err(PipelineError::NoMarketData {
                    symbol: signal.symbol.to_string(),
                })
            }
        };

        let current = self
            .positions
            .get(&signal.symbol)
            .map(|p| p.direction())
            .unwrap_or(Direction::Flat);

        match (current, signal.direction) {
            // Flat book, directional signal: open.
            (Direction::Flat, Direction::Long | Direction::Short) => {
                if let Some(order) = self.open_order(signal, price) {
                    out.emit(Event::Order(order));
                }
            }
            // Signal matches the open position: suppress.
            (current, desired) if current == desired => {
                debug!(symbol = %signal.symbol, %desired, "position already aligned, suppressed");
            }
            // Directional signal against an open position: close, then
            // immediately reopen the other way.
            (_, Direction::Long | Direction::Short) => {
                if let Some(position) = self.positions.get(&signal.symbol) {
                    out.emit(Event::Order(self.close_order(signal, position)));
                }
                if let Some(order) = self.open_order(signal, price) {
                    out.emit(Event::Order(order));
                }
            }
            // Flat signal with a position on: close it.
            (_, Direction::Flat) => {
                if let Some(position) = self.positions.get(&signal.symbol) {
                    out.emit(Event::Order(self.close_order(signal, position)));
                }
            }
        }
        Ok(())
    }
}

impl EventHandler for RiskManager {
    fn name(&self) -> &'static str {
        "risk_manager"
    }

    fn on_event(&mut self, event: &Event, out: &mut Emitter) -> Result<(), PipelineError> {
        match event {
            Event::Bar(bar) => {
                let policy = &self.policy;
                if let SizingPolicy::Volatility { atr_period, .. } = policy {
                    let period = *atr_period;
                    self.atr
                        .entry(bar.symbol.clone())
                        .or_insert_with(|| Atr::new(period))
                        .push(bar);
                }
                self.last_close.insert(bar.symbol.clone(), bar.close);
                Ok(())
            }
            Event::Signal(signal) => self.on_signal(signal, out),
            Event::PortfolioUpdate(snapshot) => {
                self.equity = snapshot.equity;
                self.peak_equity = snapshot.peak_equity;
                self.positions = snapshot
                    .positions
                    .iter()
                    .map(|p| (p.symbol.clone(), p.clone()))
                    .collect();
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use eb_types::{Bar, PortfolioSnapshot};
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    fn bar(close: Decimal) -> Event {
        Event::Bar(Bar::new(Symbol::from("X"), ts(), close, close, close, close, dec!(1000)))
    }

    fn signal(direction: Direction, rule: &str) -> Event {
        Event::Signal(Signal::new(Symbol::from("X"), ts(), direction, 1.0, "s", rule))
    }

    fn snapshot(positions: Vec<Position>, equity: Decimal, peak: Decimal) -> Event {
        Event::PortfolioUpdate(PortfolioSnapshot {
            timestamp: ts(),
            cash: equity,
            equity,
            peak_equity: peak,
            positions,
        })
    }

    fn orders(out: &mut Emitter) -> Vec<Order> {
        out.take()
            .into_iter()
            .filter_map(|event| match event {
                Event::Order(order) => Some(order),
                _ => None,
            })
            .collect()
    }

    fn fixed_manager(quantity: Decimal) -> RiskManager {
        RiskManager::new(SizingPolicy::Fixed { quantity }, None, dec!(100000))
    }

    #[test]
    fn flat_plus_long_signal_opens() {
        let mut rm = fixed_manager(dec!(10));
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(100)), &mut out).unwrap();
        rm.on_event(&signal(Direction::Long, "r1"), &mut out).unwrap();

        let orders = orders(&mut out);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[0].intent, Intent::Open);
        assert_eq!(orders[0].quantity, dec!(10));
        assert_eq!(orders[0].rule_id, "r1:open");
    }

    #[test]
    fn aligned_signal_is_suppressed() {
        let mut rm = fixed_manager(dec!(10));
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(100)), &mut out).unwrap();
        let long = Position::open(Symbol::from("X"), Direction::Long, dec!(10), dec!(100));
        rm.on_event(&snapshot(vec![long], dec!(100000), dec!(100000)), &mut out).unwrap();

        rm.on_event(&signal(Direction::Long, "r2"), &mut out).unwrap();
        assert!(orders(&mut out).is_empty());
    }

    #[test]
    fn opposing_signal_closes_then_reopens() {
        let mut rm = fixed_manager(dec!(10));
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(100)), &mut out).unwrap();
        let long = Position::open(Symbol::from("X"), Direction::Long, dec!(10), dec!(100));
        rm.on_event(&snapshot(vec![long], dec!(100000), dec!(100000)), &mut out).unwrap();

        rm.on_event(&signal(Direction::Short, "r3"), &mut out).unwrap();
        let orders = orders(&mut out);
        assert_eq!(orders.len(), 2);
        assert_eq!((orders[0].intent, orders[0].side), (Intent::Close, Side::Sell));
        assert_eq!((orders[1].intent, orders[1].side), (Intent::Open, Side::Sell));
        assert_eq!(orders[0].rule_id, "r3:close");
        assert_eq!(orders[1].rule_id, "r3:open");
    }

    #[test]
    fn flat_signal_closes_position() {
        let mut rm = fixed_manager(dec!(10));
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(100)), &mut out).unwrap();
        let short = Position::open(Symbol::from("X"), Direction::Short, dec!(10), dec!(100));
        rm.on_event(&snapshot(vec![short], dec!(100000), dec!(100000)), &mut out).unwrap();

        rm.on_event(&signal(Direction::Flat, "r4"), &mut out).unwrap();
        let orders = orders(&mut out);
        assert_eq!(orders.len(), 1);
        assert_eq!((orders[0].intent, orders[0].side), (Intent::Close, Side::Buy));
    }

    #[test]
    fn percent_equity_sizes_by_price() {
        let mut rm = RiskManager::new(
            SizingPolicy::PercentEquity { percent: dec!(0.5) },
            None,
            dec!(100000),
        );
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(333)), &mut out).unwrap();
        rm.on_event(&signal(Direction::Long, "r5"), &mut out).unwrap();
        // floor(100000 * 0.5 / 333) = 150
        assert_eq!(orders(&mut out)[0].quantity, dec!(150));
    }

    #[test]
    fn percent_risk_sizing() {
        let mut rm = RiskManager::new(
            SizingPolicy::PercentRisk { risk_percent: dec!(0.02), stop_percent: dec!(0.05) },
            None,
            dec!(100000),
        );
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(100)), &mut out).unwrap();
        rm.on_event(&signal(Direction::Long, "r6"), &mut out).unwrap();
        // floor(100000 * 0.02 / (100 * 0.05)) = 400
        assert_eq!(orders(&mut out)[0].quantity, dec!(400));
    }

    #[test]
    fn drawdown_reduction_and_cutoff() {
        let control = DrawdownControl { threshold: dec!(0.05), reduction: dec!(0.5), cutoff: dec!(0.2) };
        let mut rm = RiskManager::new(
            SizingPolicy::Fixed { quantity: dec!(10) },
            Some(control),
            dec!(100000),
        );
        let mut out = Emitter::default();
        rm.on_event(&bar(dec!(100)), &mut out).unwrap();

        // 10% drawdown: above threshold, below cutoff -> halved size.
        rm.on_event(&snapshot(vec![], dec!(90000), dec!(100000)), &mut out).unwrap();
        rm.on_event(&signal(Direction::Long, "r7"), &mut out).unwrap();
        assert_eq!(orders(&mut out)[0].quantity, dec!(5));

        // 25% drawdown: above cutoff -> opens suppressed, closes pass.
        let long = Position::open(Symbol::from("X"), Direction::Long, dec!(5), dec!(100));
        rm.on_event(&snapshot(vec![long], dec!(75000), dec!(100000)), &mut out).unwrap();
        rm.on_event(&signal(Direction::Short, "r8"), &mut out).unwrap();
        let remaining = orders(&mut out);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].intent, Intent::Close);
    }

    #[test]
    fn signal_before_any_bar_is_a_pipeline_error() {
        let mut rm = fixed_manager(dec!(10));
        let mut out = Emitter::default();
        let err = rm.on_event(&signal(Direction::Long, "r9"), &mut out).unwrap_err();
        assert!(matches!(err, PipelineError::NoMarketData { .. }));
    }
}

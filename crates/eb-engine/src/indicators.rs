//! Incremental indicators shared by strategies, the risk manager's
//! volatility sizing, and the broker's variable slippage model.

use std::collections::VecDeque;

use rust_decimal::Decimal;

use eb_types::Bar;

/// Simple moving average over a fixed window.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            window: VecDeque::new(),
            sum: Decimal::ZERO,
        }
    }

    /// Pushes a value; yields the average once the window is full.
    pub fn push(&mut self, value: Decimal) -> Option<Decimal> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.window.len() == self.period {
            Some(self.sum / Decimal::from(self.period))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum = Decimal::ZERO;
    }
}

/// Relative strength index over simple averaged gains/losses.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<Decimal>,
    changes: VecDeque<Decimal>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            changes: VecDeque::new(),
        }
    }

    pub fn push(&mut self, close: Decimal) -> Option<Decimal> {
        if let Some(prev) = self.prev_close {
            self.changes.push_back(close - prev);
            if self.changes.len() > self.period {
                self.changes.pop_front();
            }
        }
        self.prev_close = Some(close);
        self.value()
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.changes.len() < self.period {
            return None;
        }
        let mut gains = Decimal::ZERO;
        let mut losses = Decimal::ZERO;
        for change in &self.changes {
            if *change > Decimal::ZERO {
                gains += *change;
            } else {
                losses += change.abs();
            }
        }
        if losses == Decimal::ZERO {
            return Some(Decimal::from(100));
        }
        if gains == Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        let rs = gains / losses;
        Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
    }

    pub fn reset(&mut self) {
        self.prev_close = None;
        self.changes.clear();
    }
}

/// Average true range over a simple window.
#[derive(Debug, Clone)]
pub struct Atr {
    prev_close: Option<Decimal>,
    ranges: Sma,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            ranges: Sma::new(period),
        }
    }

    pub fn push(&mut self, bar: &Bar) -> Option<Decimal> {
        let tr = bar.true_range(self.prev_close);
        self.prev_close = Some(bar.close);
        self.ranges.push(tr)
    }

    pub fn value(&self) -> Option<Decimal> {
        self.ranges.value()
    }

    pub fn reset(&mut self) {
        self.prev_close = None;
        self.ranges.reset();
    }
}

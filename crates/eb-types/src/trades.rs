use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Symbol;
use crate::signals::Direction;

/// Trade identifier, allocated sequentially per run.
pub type TradeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Round-trip record pairing an opening fill with a closing fill.
/// While only the opening fill exists the trade is `Open` with zero pnl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub commission_total: Decimal,
    pub pnl: Decimal,
    pub rule_id_open: String,
    pub rule_id_close: Option<String>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn open(
        id: TradeId,
        symbol: Symbol,
        direction: Direction,
        quantity: Decimal,
        entry_time: DateTime<Utc>,
        entry_price: Decimal,
        commission: Decimal,
        rule_id_open: impl Into<String>,
    ) -> Self {
        Self {
            id,
            symbol,
            direction,
            quantity,
            entry_time,
            entry_price,
            exit_time: None,
            exit_price: None,
            commission_total: commission,
            pnl: Decimal::ZERO,
            rule_id_open: rule_id_open.into(),
            rule_id_close: None,
            status: TradeStatus::Open,
        }
    }

    /// Completes the round trip:
    /// `pnl = quantity * (exit - entry) * sign - commission_total`.
    pub fn close(
        &mut self,
        exit_time: DateTime<Utc>,
        exit_price: Decimal,
        commission: Decimal,
        rule_id_close: impl Into<String>,
    ) {
        self.exit_time = Some(exit_time);
        self.exit_price = Some(exit_price);
        self.commission_total += commission;
        let sign = Decimal::from(self.direction.sign());
        self.pnl = self.quantity * (exit_price - self.entry_price) * sign - self.commission_total;
        self.rule_id_close = Some(rule_id_close.into());
        self.status = TradeStatus::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }
}

/// Net open exposure in one symbol. Quantity is signed: positive long,
/// negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn open(symbol: Symbol, direction: Direction, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol,
            quantity: quantity * Decimal::from(direction.sign()),
            average_entry_price: price,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.quantity > Decimal::ZERO {
            Direction::Long
        } else if self.quantity < Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Flat
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    /// Mark-to-market against the given price.
    pub fn mark(&mut self, price: Decimal) {
        self.unrealized_pnl = (price - self.average_entry_price) * self.quantity;
    }

    /// Signed market value at the given price.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }
}

/// Payload of a TRADE_OPEN event: the opening fill translated by the
/// order manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOpened {
    pub trade_id: TradeId,
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub commission: Decimal,
    pub rule_id: String,
}

/// Payload of a TRADE_CLOSE event. `matched` is false when no open
/// trade existed for the symbol (contract violation, reported upstream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeClosed {
    pub trade_id: TradeId,
    pub symbol: Symbol,
    /// Direction of the position being closed.
    pub direction: Direction,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub commission: Decimal,
    pub rule_id: String,
    pub matched: bool,
}

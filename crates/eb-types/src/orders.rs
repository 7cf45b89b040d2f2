use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::Symbol;
use crate::signals::Direction;

/// Order identifier, allocated sequentially by the order manager so that
/// runs with identical inputs produce identical artifacts.
pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// The side that opens a position in the given direction.
    pub fn opening(direction: Direction) -> Option<Side> {
        match direction {
            Direction::Long => Some(Side::Buy),
            Direction::Short => Some(Side::Sell),
            Direction::Flat => None,
        }
    }

    /// The direction a fill on this side opens.
    pub fn direction(&self) -> Direction {
        match self {
            Side::Buy => Direction::Long,
            Side::Sell => Direction::Short,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
    Stop { stop_price: Decimal },
}

/// Whether the order opens a new position or closes an existing one.
/// Required on every order; the order manager uses it to pair fills
/// into round-trip trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

/// Sized instruction produced by the risk manager. `id` is `None` until
/// the order manager assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<OrderId>,
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub intent: Intent,
    pub rule_id: String,
    pub status: OrderStatus,
}

impl Order {
    pub fn market(
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        side: Side,
        quantity: Decimal,
        intent: Intent,
        rule_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            symbol,
            timestamp,
            side,
            quantity,
            order_type: OrderType::Market,
            intent,
            rule_id: rule_id.into(),
            status: OrderStatus::Pending,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }
}

/// Broker confirmation that an order executed. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub commission: Decimal,
    /// Per-share price deviation from the reference price, >= 0.
    pub slippage: Decimal,
}

impl Fill {
    pub fn gross_amount(&self) -> Decimal {
        self.quantity * self.fill_price
    }

    /// Signed cash impact: buys consume cash, sells release it.
    pub fn net_amount(&self) -> Decimal {
        match self.side {
            Side::Buy => -(self.gross_amount() + self.commission),
            Side::Sell => self.gross_amount() - self.commission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn opening_side_matches_direction() {
        assert_eq!(Side::opening(Direction::Long), Some(Side::Buy));
        assert_eq!(Side::opening(Direction::Short), Some(Side::Sell));
        assert_eq!(Side::opening(Direction::Flat), None);
    }

    #[test]
    fn market_order_defaults() {
        let o = Order::market(Symbol::from("X"), ts(), Side::Buy, dec!(10), Intent::Open, "r1");
        assert_eq!(o.id, None);
        assert_eq!(o.order_type, OrderType::Market);
        assert_eq!(o.status, OrderStatus::Pending);
    }

    #[test]
    fn fill_net_amount_by_side() {
        let mut f = Fill {
            order_id: 1,
            symbol: Symbol::from("X"),
            timestamp: ts(),
            side: Side::Buy,
            quantity: dec!(10),
            fill_price: dec!(100),
            commission: dec!(1),
            slippage: Decimal::ZERO,
        };
        assert_eq!(f.net_amount(), dec!(-1001));
        f.side = Side::Sell;
        assert_eq!(f.net_amount(), dec!(999));
    }
}

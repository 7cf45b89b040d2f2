use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::Bar;
use crate::orders::{Fill, Order};
use crate::portfolio::PortfolioSnapshot;
use crate::signals::Signal;
use crate::trades::{TradeClosed, TradeOpened};

/// Discriminant of an [`Event`], used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Bar,
    Signal,
    Order,
    Fill,
    TradeOpen,
    TradeClose,
    PortfolioUpdate,
    BacktestStart,
    BacktestEnd,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Bar => "BAR",
            EventKind::Signal => "SIGNAL",
            EventKind::Order => "ORDER",
            EventKind::Fill => "FILL",
            EventKind::TradeOpen => "TRADE_OPEN",
            EventKind::TradeClose => "TRADE_CLOSE",
            EventKind::PortfolioUpdate => "PORTFOLIO_UPDATE",
            EventKind::BacktestStart => "BACKTEST_START",
            EventKind::BacktestEnd => "BACKTEST_END",
        };
        write!(f, "{}", s)
    }
}

/// Typed event flowing through the bus. Serialized as
/// `{"kind": ..., "fields": ...}` for persistence and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields")]
pub enum Event {
    #[serde(rename = "BAR")]
    Bar(Bar),
    #[serde(rename = "SIGNAL")]
    Signal(Signal),
    #[serde(rename = "ORDER")]
    Order(Order),
    #[serde(rename = "FILL")]
    Fill(Fill),
    #[serde(rename = "TRADE_OPEN")]
    TradeOpen(TradeOpened),
    #[serde(rename = "TRADE_CLOSE")]
    TradeClose(TradeClosed),
    #[serde(rename = "PORTFOLIO_UPDATE")]
    PortfolioUpdate(PortfolioSnapshot),
    #[serde(rename = "BACKTEST_START")]
    BacktestStart {
        run_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "BACKTEST_END")]
    BacktestEnd {
        run_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Bar(_) => EventKind::Bar,
            Event::Signal(_) => EventKind::Signal,
            Event::Order(_) => EventKind::Order,
            Event::Fill(_) => EventKind::Fill,
            Event::TradeOpen(_) => EventKind::TradeOpen,
            Event::TradeClose(_) => EventKind::TradeClose,
            Event::PortfolioUpdate(_) => EventKind::PortfolioUpdate,
            Event::BacktestStart { .. } => EventKind::BacktestStart,
            Event::BacktestEnd { .. } => EventKind::BacktestEnd,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Bar(bar) => bar.timestamp,
            Event::Signal(signal) => signal.timestamp,
            Event::Order(order) => order.timestamp,
            Event::Fill(fill) => fill.timestamp,
            Event::TradeOpen(open) => open.timestamp,
            Event::TradeClose(close) => close.timestamp,
            Event::PortfolioUpdate(snapshot) => snapshot.timestamp,
            Event::BacktestStart { timestamp, .. } => *timestamp,
            Event::BacktestEnd { timestamp, .. } => *timestamp,
        }
    }

    /// Stable identity used by fingerprint deduplication. Events without
    /// a natural identity (bars, portfolio updates, lifecycle markers)
    /// return `None` and are never deduplicated.
    pub fn fingerprint(&self) -> Option<String> {
        match self {
            Event::Signal(signal) => Some(signal.rule_id.clone()),
            Event::Order(order) => order.id.map(|id| format!("order:{}", id)),
            Event::TradeOpen(open) => Some(format!("trade-open:{}", open.trade_id)),
            Event::TradeClose(close) => Some(format!("trade-close:{}", close.trade_id)),
            _ => None,
        }
    }
}

/// Persistence/replay envelope: `{kind, timestamp, fields}` with the
/// timestamp lifted out of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub fields: serde_json::Value,
}

impl WireEvent {
    pub fn encode(event: &Event) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(event)?;
        let fields = value
            .get_mut("fields")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok(Self {
            kind: event.kind().to_string(),
            timestamp: event.timestamp(),
            fields,
        })
    }

    pub fn decode(&self) -> Result<Event, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "kind": self.kind,
            "fields": self.fields,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Symbol;
    use crate::signals::Direction;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn wire_round_trip_preserves_event() {
        let event = Event::Signal(Signal::new(
            Symbol::from("X"),
            ts(),
            Direction::Long,
            1.0,
            "sma_crossover",
            "sma:X:long:27",
        ));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"SIGNAL\""));
        assert!(json.contains("\"fields\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn bar_round_trip() {
        let event = Event::Bar(Bar::new(
            Symbol::from("X"),
            ts(),
            dec!(100),
            dec!(101),
            dec!(99),
            dec!(100.5),
            dec!(5000),
        ));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn wire_envelope_round_trips_with_lifted_timestamp() {
        let event = Event::Signal(Signal::new(
            Symbol::from("X"),
            ts(),
            Direction::Short,
            0.5,
            "rsi_reversion",
            "rsi:X:short:14",
        ));
        let wire = WireEvent::encode(&event).unwrap();
        assert_eq!(wire.kind, "SIGNAL");
        assert_eq!(wire.timestamp, ts());
        assert_eq!(wire.decode().unwrap(), event);
    }

    #[test]
    fn fingerprints_by_kind() {
        let signal = Event::Signal(Signal::new(Symbol::from("X"), ts(), Direction::Long, 1.0, "s", "r1"));
        assert_eq!(signal.fingerprint().as_deref(), Some("r1"));

        let order = Event::Order(crate::orders::Order::market(
            Symbol::from("X"),
            ts(),
            crate::orders::Side::Buy,
            dec!(10),
            crate::orders::Intent::Open,
            "r1:open",
        ));
        // Unassigned order ids carry no fingerprint.
        assert_eq!(order.fingerprint(), None);

        let start = Event::BacktestStart { run_id: "run".into(), timestamp: ts() };
        assert_eq!(start.fingerprint(), None);
    }
}

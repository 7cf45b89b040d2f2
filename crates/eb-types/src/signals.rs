use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::Symbol;

/// Desired exposure declared by a strategy. Carries no sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// +1 for long, -1 for short, 0 for flat.
    pub fn sign(&self) -> i32 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Flat => 0,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Flat => Direction::Flat,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Flat => "flat",
        };
        write!(f, "{}", s)
    }
}

/// Directional recommendation emitted by a strategy on a bar.
///
/// `rule_id` is stable for a given (symbol, direction, trigger index) so
/// that repeated emissions for the same trigger deduplicate on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Conviction in [0, 1].
    pub strength: f64,
    pub strategy_id: String,
    pub rule_id: String,
}

impl Signal {
    pub fn new(
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        direction: Direction,
        strength: f64,
        strategy_id: impl Into<String>,
        rule_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol,
            timestamp,
            direction,
            strength: strength.clamp(0.0, 1.0),
            strategy_id: strategy_id.into(),
            rule_id: rule_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn direction_sign_and_opposite() {
        assert_eq!(Direction::Long.sign(), 1);
        assert_eq!(Direction::Short.sign(), -1);
        assert_eq!(Direction::Flat.sign(), 0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Flat.opposite(), Direction::Flat);
    }

    #[test]
    fn strength_is_clamped() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let s = Signal::new(Symbol::from("X"), ts, Direction::Long, 1.5, "s", "r");
        assert_eq!(s.strength, 1.0);
    }
}

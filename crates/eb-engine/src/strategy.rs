//! Strategy contract and the built-in strategies.
//!
//! Strategies consume bars and emit directional signals. They hold
//! indicator state only; positions, cash, and sizing are none of their
//! business.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use eb_types::{
    Bar, ConfigError, Direction, Event, ParamMap, ParamValue, PipelineError, Signal, Symbol,
};

use crate::bus::{Emitter, EventHandler};
use crate::indicators::{Rsi, Sma};

/// A signal-generating strategy.
pub trait Strategy {
    /// Registry name (also the default `strategy_id` on signals).
    fn name(&self) -> &'static str;

    /// Indicator window; no signals before `warmup() + 1` bars.
    fn warmup(&self) -> usize;

    /// Consumes one bar, emitting at most one signal for its symbol.
    fn on_bar(&mut self, bar: &Bar) -> Option<Signal>;

    /// Clears indicator buffers and per-run state. Idempotent.
    fn reset(&mut self);

    /// Current configurable parameter values.
    fn parameters(&self) -> ParamMap;
}

/// Suppresses re-emission while the previous signal for a symbol is
/// still active (same direction, no flattening observed).
#[derive(Debug, Default)]
struct SignalGate {
    last: HashMap<Symbol, Direction>,
}

impl SignalGate {
    fn permit(&mut self, symbol: &Symbol, direction: Direction) -> bool {
        match self.last.get(symbol) {
            Some(active) if *active == direction => false,
            _ => {
                self.last.insert(symbol.clone(), direction);
                true
            }
        }
    }

    fn clear(&mut self) {
        self.last.clear();
    }
}

// ---------------------------------------------------------------------------
// Moving-average crossover
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CrossoverState {
    fast: Sma,
    slow: Sma,
    fast_above: Option<bool>,
    bars_seen: usize,
}

/// Long when the fast SMA crosses above the slow SMA, short on the
/// opposite cross.
#[derive(Debug)]
pub struct SmaCrossover {
    fast: usize,
    slow: usize,
    state: HashMap<Symbol, CrossoverState>,
    gate: SignalGate,
}

impl SmaCrossover {
    pub const NAME: &'static str = "sma_crossover";

    pub fn new(fast: usize, slow: usize) -> Result<Self, ConfigError> {
        if fast == 0 || slow == 0 || fast >= slow {
            return Err(ConfigError::InvalidValue {
                field: "fast/slow".into(),
                message: format!("need 0 < fast < slow, got {fast}/{slow}"),
            });
        }
        Ok(Self {
            fast,
            slow,
            state: HashMap::new(),
            gate: SignalGate::default(),
        })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let mut fast = 5i64;
        let mut slow = 20i64;
        for (name, value) in params {
            match name.as_str() {
                "fast" => fast = int_param(name, value)?,
                "slow" => slow = int_param(name, value)?,
                other => {
                    return Err(ConfigError::UnknownParameter {
                        target: Self::NAME.into(),
                        name: other.into(),
                    })
                }
            }
        }
        Self::new(fast.max(0) as usize, slow.max(0) as usize)
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn warmup(&self) -> usize {
        self.slow
    }

    fn on_bar(&mut self, bar: &Bar) -> Option<Signal> {
        let fast_period = self.fast;
        let slow_period = self.slow;
        let state = self
            .state
            .entry(bar.symbol.clone())
            .or_insert_with(|| CrossoverState {
                fast: Sma::new(fast_period),
                slow: Sma::new(slow_period),
                fast_above: None,
                bars_seen: 0,
            });

        state.bars_seen += 1;
        let fast = state.fast.push(bar.close);
        let slow = state.slow.push(bar.close);
        let (fast, slow) = (fast?, slow?);

        let above = fast > slow;
        let crossed = match state.fast_above.replace(above) {
            Some(prev) => prev != above,
            // First bar with both averages defined: no reference yet.
            None => false,
        };
        if !crossed || state.bars_seen < self.slow + 1 {
            return None;
        }

        let direction = if above { Direction::Long } else { Direction::Short };
        if !self.gate.permit(&bar.symbol, direction) {
            debug!(symbol = %bar.symbol, %direction, "suppressed active signal");
            return None;
        }

        let rule_id = format!("{}:{}:{}:{}", Self::NAME, bar.symbol, direction, state.bars_seen);
        Some(Signal::new(bar.symbol.clone(), bar.timestamp, direction, 1.0, Self::NAME, rule_id))
    }

    fn reset(&mut self) {
        self.state.clear();
        self.gate.clear();
    }

    fn parameters(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("fast".into(), ParamValue::Int(self.fast as i64));
        params.insert("slow".into(), ParamValue::Int(self.slow as i64));
        params
    }
}

// ---------------------------------------------------------------------------
// RSI reversion
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RsiState {
    rsi: Rsi,
    bars_seen: usize,
}

/// Long when RSI drops below the oversold threshold, short above the
/// overbought threshold.
#[derive(Debug)]
pub struct RsiReversion {
    period: usize,
    oversold: Decimal,
    overbought: Decimal,
    state: HashMap<Symbol, RsiState>,
    gate: SignalGate,
}

impl RsiReversion {
    pub const NAME: &'static str = "rsi_reversion";

    pub fn new(period: usize, oversold: Decimal, overbought: Decimal) -> Result<Self, ConfigError> {
        if period == 0 || oversold >= overbought {
            return Err(ConfigError::InvalidValue {
                field: "period/oversold/overbought".into(),
                message: format!("need period > 0 and oversold < overbought, got {period}/{oversold}/{overbought}"),
            });
        }
        Ok(Self {
            period,
            oversold,
            overbought,
            state: HashMap::new(),
            gate: SignalGate::default(),
        })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let mut period = 14i64;
        let mut oversold = Decimal::from(30);
        let mut overbought = Decimal::from(70);
        for (name, value) in params {
            match name.as_str() {
                "period" => period = int_param(name, value)?,
                "oversold" => oversold = decimal_param(name, value)?,
                "overbought" => overbought = decimal_param(name, value)?,
                other => {
                    return Err(ConfigError::UnknownParameter {
                        target: Self::NAME.into(),
                        name: other.into(),
                    })
                }
            }
        }
        Self::new(period.max(0) as usize, oversold, overbought)
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn warmup(&self) -> usize {
        self.period
    }

    fn on_bar(&mut self, bar: &Bar) -> Option<Signal> {
        let period = self.period;
        let state = self
            .state
            .entry(bar.symbol.clone())
            .or_insert_with(|| RsiState { rsi: Rsi::new(period), bars_seen: 0 });

        state.bars_seen += 1;
        let rsi = state.rsi.push(bar.close)?;
        if state.bars_seen < self.period + 1 {
            return None;
        }

        let direction = if rsi < self.oversold {
            Direction::Long
        } else if rsi > self.overbought {
            Direction::Short
        } else {
            return None;
        };

        if !self.gate.permit(&bar.symbol, direction) {
            return None;
        }

        let rule_id = format!("{}:{}:{}:{}", Self::NAME, bar.symbol, direction, state.bars_seen);
        Some(Signal::new(bar.symbol.clone(), bar.timestamp, direction, 1.0, Self::NAME, rule_id))
    }

    fn reset(&mut self) {
        self.state.clear();
        self.gate.clear();
    }

    fn parameters(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("period".into(), ParamValue::Int(self.period as i64));
        params.insert("oversold".into(), ParamValue::Text(self.oversold.to_string()));
        params.insert("overbought".into(), ParamValue::Text(self.overbought.to_string()));
        params
    }
}

// ---------------------------------------------------------------------------
// Bus adapter
// ---------------------------------------------------------------------------

/// Attaches any [`Strategy`] to the bus: BAR in, SIGNAL out.
pub struct StrategyStage {
    strategy: Box<dyn Strategy>,
}

impl StrategyStage {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self { strategy }
    }

    pub fn reset(&mut self) {
        self.strategy.reset();
    }

    pub fn parameters(&self) -> ParamMap {
        self.strategy.parameters()
    }
}

impl EventHandler for StrategyStage {
    fn name(&self) -> &'static str {
        "strategy"
    }

    fn on_event(&mut self, event: &Event, out: &mut Emitter) -> Result<(), PipelineError> {
        if let Event::Bar(bar) = event {
            if let Some(signal) = self.strategy.on_bar(bar) {
                out.emit(Event::Signal(signal));
            }
        }
        Ok(())
    }
}

fn int_param(name: &str, value: &ParamValue) -> Result<i64, ConfigError> {
    value.as_int().ok_or_else(|| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("expected integer, got {value}"),
    })
}

fn decimal_param(name: &str, value: &ParamValue) -> Result<Decimal, ConfigError> {
    let float = value.as_float().ok_or_else(|| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("expected number, got {value}"),
    })?;
    Decimal::from_f64_retain(float).ok_or_else(|| ConfigError::InvalidValue {
        field: name.to_string(),
        message: format!("not representable: {float}"),
    })
}

//! Deterministic fill simulation: slippage and commission models.
//!
//! Market orders fill at the current bar's close; the choice is recorded
//! in the run fingerprint so results remain comparable across engines
//! with the other convention. Limit and stop orders fill when a bar's
//! range crosses the trigger, otherwise they stay pending.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use eb_types::hash::fnv1a;
use eb_types::{Bar, Event, Fill, Order, OrderStatus, OrderType, PipelineError, Side, Symbol};

use crate::bus::{Emitter, EventHandler};
use crate::indicators::{Atr, Sma};

/// Reference-price deviation applied to fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    /// `fill = ref * (1 + sign * percent)`
    Fixed { percent: Decimal },
    /// `p = base + size_impact * (qty / avg_volume)
    ///        + volatility_impact * recent_volatility
    ///        + random_factor * U[-1, 1]`
    Variable {
        base: f64,
        size_impact: f64,
        volatility_impact: f64,
        random_factor: f64,
    },
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::Fixed { percent: Decimal::ZERO }
    }
}

/// Commission charged per fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionModel {
    /// `|fill * qty| * rate`, clamped to `[min, max]`.
    Percentage {
        rate: Decimal,
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
    Fixed { rate: Decimal },
    PerShare { rate: Decimal },
    /// Piecewise by notional value: rate of the first tier whose bound
    /// covers the notional; the last tier is open-ended.
    Tiered { tiers: Vec<CommissionTier> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub notional_upto: Option<Decimal>,
    pub rate: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        CommissionModel::Fixed { rate: Decimal::ZERO }
    }
}

impl CommissionModel {
    fn charge(&self, fill_price: Decimal, quantity: Decimal) -> Decimal {
        match self {
            CommissionModel::Percentage { rate, min, max } => {
                let mut commission = (fill_price * quantity).abs() * *rate;
                if let Some(min) = min {
                    commission = commission.max(*min);
                }
                if let Some(max) = max {
                    commission = commission.min(*max);
                }
                commission
            }
            CommissionModel::Fixed { rate } => *rate,
            CommissionModel::PerShare { rate } => quantity * *rate,
            CommissionModel::Tiered { tiers } => {
                let notional = (fill_price * quantity).abs();
                for tier in tiers {
                    match tier.notional_upto {
                        Some(bound) if notional > bound => continue,
                        _ => return notional * tier.rate,
                    }
                }
                Decimal::ZERO
            }
        }
    }
}

const VOLUME_WINDOW: usize = 20;
const VOLATILITY_WINDOW: usize = 14;

struct MarketState {
    last_bar: Bar,
    avg_volume: Sma,
    atr: Atr,
}

/// Transforms accepted orders into fills.
pub struct SimulatedBroker {
    slippage: SlippageModel,
    commission: CommissionModel,
    run_seed: u64,
    market: HashMap<Symbol, MarketState>,
    pending: Vec<Order>,
}

impl SimulatedBroker {
    pub fn new(slippage: SlippageModel, commission: CommissionModel, run_id: &str) -> Self {
        Self {
            slippage,
            commission,
            run_seed: fnv1a(&[run_id]),
            market: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.market.clear();
        self.pending.clear();
    }

    /// Limit/stop orders still waiting on a trigger.
    pub fn pending_orders(&self) -> &[Order] {
        &self.pending
    }

    fn slippage_fraction(&self, order: &Order, state: &MarketState) -> Decimal {
        match &self.slippage {
            SlippageModel::Fixed { percent } => *percent,
            SlippageModel::Variable { base, size_impact, volatility_impact, random_factor } => {
                let avg_volume = state.avg_volume.value().and_then(|v| v.to_f64()).unwrap_or(0.0);
                let size_term = if avg_volume > 0.0 {
                    order.quantity.to_f64().unwrap_or(0.0) / avg_volume
                } else {
                    0.0
                };
                let volatility = state
                    .atr
                    .value()
                    .zip(state.last_bar.close.to_f64())
                    .and_then(|(atr, close)| {
                        let atr = atr.to_f64()?;
                        if close > 0.0 {
                            Some(atr / close)
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0.0);

                // Seeded per order: the same (run, order) pair always
                // draws the same factor.
                let order_id = order.id.unwrap_or_default().to_string();
                let seed = fnv1a(&[&self.run_seed.to_string(), &order_id]);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let noise: f64 = rng.gen_range(-1.0..=1.0);

                let fraction = base
                    + size_impact * size_term
                    + volatility_impact * volatility
                    + random_factor * noise;
                Decimal::from_f64_retain(fraction).unwrap_or(Decimal::ZERO)
            }
        }
    }

    fn fill_at(&self, order: &Order, reference: Decimal, state: &MarketState) -> Fill {
        let fraction = self.slippage_fraction(order, state);
        let signed = fraction * Decimal::from(order.side.sign());
        let fill_price = reference * (Decimal::ONE + signed);
        let commission = self.commission.charge(fill_price, order.quantity);

        Fill {
            order_id: order.id.unwrap_or_default(),
            symbol: order.symbol.clone(),
            timestamp: state.last_bar.timestamp,
            side: order.side,
            quantity: order.quantity,
            fill_price,
            commission,
            slippage: (fill_price - reference).abs(),
        }
    }

    /// Trigger price for a limit/stop order against one bar, if crossed.
    fn trigger_price(order: &Order, bar: &Bar) -> Option<Decimal> {
        match (&order.order_type, order.side) {
            (OrderType::Market, _) => Some(bar.close),
            (OrderType::Limit { price }, Side::Buy) if bar.low <= *price => Some(*price),
            (OrderType::Limit { price }, Side::Sell) if bar.high >= *price => Some(*price),
            (OrderType::Stop { stop_price }, Side::Buy) if bar.high >= *stop_price => Some(*stop_price),
            (OrderType::Stop { stop_price }, Side::Sell) if bar.low <= *stop_price => Some(*stop_price),
            _ => None,
        }
    }

    fn on_bar(&mut self, bar: &Bar, out: &mut Emitter) {
        let state = self
            .market
            .entry(bar.symbol.clone())
            .or_insert_with(|| MarketState {
                last_bar: bar.clone(),
                avg_volume: Sma::new(VOLUME_WINDOW),
                atr: Atr::new(VOLATILITY_WINDOW),
            });
        state.last_bar = bar.clone();
        state.avg_volume.push(bar.volume);
        state.atr.push(bar);

        // Retry resting limit/stop orders against the new bar.
        let mut still_pending = Vec::new();
        for order in std::mem::take(&mut self.pending) {
            let triggered = order.symbol == bar.symbol;
            match (triggered, Self::trigger_price(&order, bar)) {
                (true, Some(reference)) => match self.market.get(&bar.symbol) {
                    Some(state) => out.emit(Event::Fill(self.fill_at(&order, reference, state))),
                    None => still_pending.push(order),
                },
                _ => still_pending.push(order),
            }
        }
        self.pending = still_pending;
    }

    fn on_order(&mut self, order: &Order, out: &mut Emitter) -> Result<(), PipelineError> {
        // Only accepted (id-bearing, pending) orders are executable.
        if order.id.is_none() || order.status != OrderStatus::Pending {
            return Ok(());
        }
        let Some(state) = self.market.get(&order.symbol) else {
            return Err(PipelineError::NoMarketData { symbol: order.symbol.to_string() });
        };

        match Self::trigger_price(order, &state.last_bar) {
            Some(reference) => {
                let fill = self.fill_at(order, reference, state);
                debug!(order_id = fill.order_id, price = %fill.fill_price, "order filled");
                out.emit(Event::Fill(fill));
            }
            None => self.pending.push(order.clone()),
        }
        Ok(())
    }
}

impl EventHandler for SimulatedBroker {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn on_event(&mut self, event: &Event, out: &mut Emitter) -> Result<(), PipelineError> {
        match event {
            Event::Bar(bar) => {
                self.on_bar(bar, out);
                Ok(())
            }
            Event::Order(order) => self.on_order(order, out),
            _ => Ok(()),
        }
    }
}

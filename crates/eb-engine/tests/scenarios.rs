//! End-to-end runs through the full pipeline: bars in, round-trip
//! trades and an equity curve out.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use eb_data::split::SplitPair;
use eb_data::{BarSeries, BarSource};
use eb_engine::config::{RunConfig, StrategySection};
use eb_engine::registry::{default_registry, Registry, StrategyCtor};
use eb_engine::risk::SizingPolicy;
use eb_engine::strategy::Strategy;
use eb_engine::{BacktestCoordinator, DedupMode};
use eb_types::{
    Bar, ConfigError, Direction, ParamMap, ParamValue, Signal, Symbol, TradeStatus,
};

fn day(index: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(index as i64)
}

fn flat_bar(symbol: &Symbol, timestamp: DateTime<Utc>, close: Decimal) -> Bar {
    Bar::new(symbol.clone(), timestamp, close, close, close, close, dec!(10000))
}

fn series_from_closes(symbol: &Symbol, closes: &[Decimal]) -> BarSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, close)| flat_bar(symbol, day(i), *close))
        .collect();
    BarSeries::from_bars(symbol.clone(), bars).unwrap()
}

fn source_over(symbol: &Symbol, closes: &[Decimal]) -> BarSource {
    let mut splits = BTreeMap::new();
    splits.insert(symbol.clone(), SplitPair::unsplit(series_from_closes(symbol, closes)));
    BarSource::new(splits)
}

fn sma_config(fast: i64, slow: i64, quantity: Decimal) -> RunConfig {
    let mut parameters = ParamMap::new();
    parameters.insert("fast".into(), ParamValue::Int(fast));
    parameters.insert("slow".into(), ParamValue::Int(slow));
    RunConfig {
        initial_capital: dec!(100000),
        close_positions_eod: false,
        max_bars: None,
        strategy: StrategySection { name: "sma_crossover".into(), parameters },
        sizing: SizingPolicy::Fixed { quantity },
        drawdown: None,
        slippage: Default::default(),
        commission: Default::default(),
        dedup: DedupMode::ByFingerprint,
        deadline: None,
    }
}

/// 30 bars: 25 flat closes at 100, then 105, 110, 115, 120, 125.
/// One long entry, one forced close at the final bar.
fn rally_closes() -> Vec<Decimal> {
    let mut closes = vec![dec!(100); 25];
    closes.extend([dec!(105), dec!(110), dec!(115), dec!(120), dec!(125)]);
    closes
}

#[test]
fn clean_round_trip_produces_one_closed_trade() {
    let symbol = Symbol::from("X");
    let mut source = source_over(&symbol, &rally_closes());
    let coordinator = BacktestCoordinator::new(sma_config(2, 5, dec!(10)), "s1");

    let result = coordinator.run(&mut source, &default_registry()).unwrap();

    assert!(result.complete);
    assert!(result.consistency);
    assert_eq!(result.trades.len(), 1);

    let trade = &result.trades[0];
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.direction, Direction::Long);
    assert_eq!(trade.quantity, dec!(10));
    // Hand trace at the first rising close (105): fast SMA(2) =
    // (100 + 105) / 2 = 102.5, slow SMA(5) = (4 * 100 + 105) / 5 = 101;
    // the relation flips on that bar, so the long enters at its close.
    // Orders fill at the signal bar's close (the convention carried in
    // the run fingerprint), giving entry 105 rather than a lagged 115.
    assert_eq!(trade.entry_price, dec!(105));
    assert_eq!(trade.exit_price, Some(dec!(125)));
    // 10 * (125 - 105)
    assert_eq!(trade.pnl, dec!(200));

    assert_eq!(result.stats.equity_final, dec!(100200));
    assert_eq!(result.equity_curve.len(), 30);
    assert!(result.errors.is_empty());
}

#[test]
fn reversal_closes_long_and_opens_short() {
    // The rally series with 120, 115 appended: the pullback flips the
    // averages on the final bar.
    let symbol = Symbol::from("X");
    let mut closes = rally_closes();
    closes.extend([dec!(120), dec!(115)]);

    let mut source = source_over(&symbol, &closes);
    let coordinator = BacktestCoordinator::new(sma_config(2, 5, dec!(10)), "s2");
    let result = coordinator.run(&mut source, &default_registry()).unwrap();

    assert!(result.consistency);
    assert_eq!(result.trades.len(), 2);

    // On the 120 bar the fast average still leads (122.5 vs 118); the
    // flip lands on the 115 bar (117.5 vs 119). The long closes there
    // and the short opens at the same price.
    let long = &result.trades[0];
    assert_eq!(long.direction, Direction::Long);
    assert_eq!(long.entry_price, dec!(105));
    assert_eq!(long.exit_price, Some(dec!(115)));
    // 10 * (115 - 105)
    assert_eq!(long.pnl, dec!(100));

    // The reversal hits the last bar, so the fresh short is force-closed
    // at its own entry mark for a flat round trip.
    let short = &result.trades[1];
    assert_eq!(short.direction, Direction::Short);
    assert_eq!(short.status, TradeStatus::Closed);
    assert_eq!(short.entry_price, dec!(115));
    assert_eq!(short.exit_price, Some(dec!(115)));
    assert_eq!(short.pnl, Decimal::ZERO);

    assert_eq!(result.stats.equity_final, dec!(100100));
}

#[test]
fn identical_runs_are_byte_identical() {
    let symbol = Symbol::from("X");
    let registry = default_registry();

    let run = || {
        let mut source = source_over(&symbol, &rally_closes());
        let coordinator = BacktestCoordinator::new(sma_config(2, 5, dec!(10)), "p6");
        coordinator.run(&mut source, &registry).unwrap()
    };
    let a = run();
    let b = run();

    assert_eq!(
        serde_json::to_string(&a.trades).unwrap(),
        serde_json::to_string(&b.trades).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&a.equity_curve).unwrap(),
        serde_json::to_string(&b.equity_curve).unwrap()
    );
    assert_eq!(a.fingerprint, b.fingerprint);
}

#[test]
fn empty_split_yields_no_trades_and_initial_equity() {
    let symbol = Symbol::from("X");
    let mut splits = BTreeMap::new();
    splits.insert(symbol.clone(), SplitPair::unsplit(BarSeries::empty(symbol.clone())));
    let mut source = BarSource::new(splits);

    let coordinator = BacktestCoordinator::new(sma_config(2, 5, dec!(10)), "empty");
    let result = coordinator.run(&mut source, &default_registry()).unwrap();

    assert!(result.complete);
    assert!(result.consistency);
    assert!(result.trades.is_empty());
    assert!(result.equity_curve.is_empty());
    assert_eq!(result.stats.equity_final, dec!(100000));
}

#[test]
fn single_bar_series_stays_flat() {
    let symbol = Symbol::from("X");
    let mut source = source_over(&symbol, &[dec!(100)]);
    let coordinator = BacktestCoordinator::new(sma_config(2, 5, dec!(10)), "one-bar");
    let result = coordinator.run(&mut source, &default_registry()).unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.equity_curve.len(), 1);
    assert_eq!(result.stats.equity_final, dec!(100000));
}

#[test]
fn max_bars_caps_the_run() {
    let symbol = Symbol::from("X");
    let mut source = source_over(&symbol, &rally_closes());
    let mut config = sma_config(2, 5, dec!(10));
    config.max_bars = Some(10);
    let coordinator = BacktestCoordinator::new(config, "capped");
    let result = coordinator.run(&mut source, &default_registry()).unwrap();

    assert_eq!(result.equity_curve.len(), 10);
    assert!(result.trades.is_empty());
}

#[test]
fn duplicate_signals_emit_a_single_order() {
    use std::cell::RefCell;
    use std::rc::Rc;

    use eb_engine::bus::{priority, Emitter, EventBus, EventHandler};
    use eb_engine::risk::RiskManager;
    use eb_types::{Event, EventKind, PipelineError};

    struct OrderCounter {
        orders: Rc<RefCell<usize>>,
    }

    impl EventHandler for OrderCounter {
        fn name(&self) -> &'static str {
            "order_counter"
        }

        fn on_event(&mut self, event: &Event, _out: &mut Emitter) -> Result<(), PipelineError> {
            if matches!(event, Event::Order(_)) {
                *self.orders.borrow_mut() += 1;
            }
            Ok(())
        }
    }

    let symbol = Symbol::from("X");
    let mut bus = EventBus::new(DedupMode::ByFingerprint);
    let risk = Rc::new(RefCell::new(RiskManager::new(
        SizingPolicy::Fixed { quantity: dec!(10) },
        None,
        dec!(100000),
    )));
    bus.subscribe_many(&[EventKind::Bar, EventKind::Signal], risk, priority::RISK);

    let orders = Rc::new(RefCell::new(0usize));
    let counter = Rc::new(RefCell::new(OrderCounter { orders: orders.clone() }));
    bus.subscribe(EventKind::Order, counter, priority::OBSERVER);

    bus.publish(Event::Bar(flat_bar(&symbol, day(0), dec!(100))));
    let signal = Signal::new(symbol.clone(), day(0), Direction::Long, 1.0, "s", "rule-1");
    bus.publish(Event::Signal(signal.clone()));
    bus.publish(Event::Signal(signal));

    assert_eq!(*orders.borrow(), 1);
    assert_eq!(bus.dropped(), 1);
}

// ---------------------------------------------------------------------------
// Scripted strategy for risk-layer scenarios
// ---------------------------------------------------------------------------

/// Emits a LONG signal on every bar from `start_bar` on (or only once
/// when `once` is set). Rule ids stay unique per bar so deduplication
/// does not interfere with the risk manager's own suppression.
struct PulseLong {
    start_bar: usize,
    once: bool,
    bars_seen: HashMap<Symbol, usize>,
    fired: bool,
}

impl PulseLong {
    const NAME: &'static str = "pulse_long";

    fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let mut start_bar = 1i64;
        let mut once = false;
        for (name, value) in params {
            match name.as_str() {
                "start_bar" => {
                    start_bar = value.as_int().ok_or_else(|| ConfigError::InvalidValue {
                        field: name.clone(),
                        message: "expected integer".into(),
                    })?
                }
                "once" => {
                    once = value.as_flag().ok_or_else(|| ConfigError::InvalidValue {
                        field: name.clone(),
                        message: "expected flag".into(),
                    })?
                }
                other => {
                    return Err(ConfigError::UnknownParameter {
                        target: Self::NAME.into(),
                        name: other.into(),
                    })
                }
            }
        }
        Ok(Self {
            start_bar: start_bar.max(1) as usize,
            once,
            bars_seen: HashMap::new(),
            fired: false,
        })
    }
}

impl Strategy for PulseLong {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn warmup(&self) -> usize {
        0
    }

    fn on_bar(&mut self, bar: &Bar) -> Option<Signal> {
        let seen = self.bars_seen.entry(bar.symbol.clone()).or_insert(0);
        *seen += 1;
        if *seen < self.start_bar || (self.once && self.fired) {
            return None;
        }
        self.fired = true;
        let rule_id = format!("{}:{}:long:{}", Self::NAME, bar.symbol, *seen);
        Some(Signal::new(bar.symbol.clone(), bar.timestamp, Direction::Long, 1.0, Self::NAME, rule_id))
    }

    fn reset(&mut self) {
        self.bars_seen.clear();
        self.fired = false;
    }

    fn parameters(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("start_bar".into(), ParamValue::Int(self.start_bar as i64));
        params.insert("once".into(), ParamValue::Flag(self.once));
        params
    }
}

fn registry_with_pulse() -> Registry<StrategyCtor> {
    let mut registry = default_registry();
    let ctor: StrategyCtor =
        |params| Ok(Box::new(PulseLong::from_params(params)?) as Box<dyn Strategy>);
    registry.register("strategy", PulseLong::NAME, ctor).unwrap();
    registry
}

fn pulse_config(start_bar: i64, once: bool) -> RunConfig {
    let mut config = sma_config(2, 5, dec!(10));
    let mut parameters = ParamMap::new();
    parameters.insert("start_bar".into(), ParamValue::Int(start_bar));
    parameters.insert("once".into(), ParamValue::Flag(once));
    config.strategy = StrategySection { name: PulseLong::NAME.into(), parameters };
    config
}

#[test]
fn repeated_long_signals_open_exactly_one_position() {
    let symbol = Symbol::from("X");
    let closes: Vec<Decimal> = (0..12).map(|i| Decimal::from(100 + i)).collect();
    let mut source = source_over(&symbol, &closes);

    let coordinator = BacktestCoordinator::new(pulse_config(5, false), "s5");
    let result = coordinator.run(&mut source, &registry_with_pulse()).unwrap();

    // One open (bar 5), suppressed repeats, one forced close at the end.
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].status, TradeStatus::Closed);
    assert_eq!(result.trades[0].entry_price, dec!(104));
    assert_eq!(result.trades[0].exit_price, Some(dec!(111)));
    assert!(result.consistency);
    assert!(result.errors.is_empty());
}

#[test]
fn eod_close_flattens_overnight_positions() {
    let symbol = Symbol::from("X");
    let day1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let day2 = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
    let bars = vec![
        flat_bar(&symbol, day1 + Duration::hours(10), dec!(100)),
        flat_bar(&symbol, day1 + Duration::hours(11), dec!(101)),
        flat_bar(&symbol, day1 + Duration::hours(12), dec!(102)),
        flat_bar(&symbol, day2 + Duration::hours(10), dec!(103)),
        flat_bar(&symbol, day2 + Duration::hours(11), dec!(104)),
    ];
    let mut splits = BTreeMap::new();
    splits.insert(
        symbol.clone(),
        SplitPair::unsplit(BarSeries::from_bars(symbol.clone(), bars).unwrap()),
    );
    let mut source = BarSource::new(splits);

    let mut config = pulse_config(1, true);
    config.close_positions_eod = true;
    let coordinator = BacktestCoordinator::new(config, "s6");
    let result = coordinator.run(&mut source, &registry_with_pulse()).unwrap();

    // Opened on day 1's first bar, closed at day 1's last bar; day 2
    // opens flat and stays flat.
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_price, dec!(100));
    assert_eq!(trade.exit_price, Some(dec!(102)));
    assert_eq!(trade.exit_time, Some(day1 + Duration::hours(12)));
    assert_eq!(trade.pnl, dec!(20));
    assert!(result.consistency);
}

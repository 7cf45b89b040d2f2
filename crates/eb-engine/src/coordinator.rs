//! Drives one backtest run: builds a fresh component graph, replays the
//! active split bar by bar, closes positions at day and run boundaries,
//! and assembles the result.
//!
//! Every run owns its components outright; nothing is shared across
//! runs, which is what makes optimizer combinations reproducible and
//! isolated.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use eb_data::BarSource;
use eb_types::{Direction, EbResult, Event, EventKind, Signal, Symbol};

use crate::broker::SimulatedBroker;
use crate::bus::{priority, EventBus};
use crate::config::RunConfig;
use crate::order_manager::OrderManager;
use crate::portfolio::PortfolioLedger;
use crate::registry::{build_strategy, Registry, StrategyCtor};
use crate::results::RunResult;
use crate::risk::RiskManager;
use crate::strategy::StrategyStage;

/// Reference price convention for market fills, part of every run
/// fingerprint.
const FILL_CONVENTION: &str = "fill_at=close";

pub struct BacktestCoordinator {
    config: RunConfig,
    run_id: String,
}

impl BacktestCoordinator {
    pub fn new(config: RunConfig, run_id: impl Into<String>) -> Self {
        Self { config, run_id: run_id.into() }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Executes one run over the source's active split.
    pub fn run(
        &self,
        source: &mut BarSource,
        registry: &Registry<StrategyCtor>,
    ) -> EbResult<RunResult> {
        let strategy = build_strategy(
            registry,
            &self.config.strategy.name,
            &self.config.strategy.parameters,
        )?;

        let mut bus = EventBus::new(self.config.dedup);
        let strategy_stage = Rc::new(RefCell::new(StrategyStage::new(strategy)));
        let risk = Rc::new(RefCell::new(RiskManager::new(
            self.config.sizing.clone(),
            self.config.drawdown.clone(),
            self.config.initial_capital,
        )));
        let order_manager = Rc::new(RefCell::new(OrderManager::new()));
        let broker = Rc::new(RefCell::new(SimulatedBroker::new(
            self.config.slippage.clone(),
            self.config.commission.clone(),
            &self.run_id,
        )));
        let portfolio = Rc::new(RefCell::new(PortfolioLedger::new(self.config.initial_capital)));

        bus.subscribe_many(
            &[EventKind::Order, EventKind::Fill],
            order_manager.clone(),
            priority::ORDER_MANAGER,
        );
        bus.subscribe_many(
            &[EventKind::TradeOpen, EventKind::TradeClose, EventKind::Bar],
            portfolio.clone(),
            priority::PORTFOLIO,
        );
        bus.subscribe_many(
            &[EventKind::Bar, EventKind::Order],
            broker.clone(),
            priority::BROKER,
        );
        bus.subscribe(EventKind::Bar, strategy_stage.clone(), priority::STRATEGY);
        bus.subscribe_many(
            &[EventKind::Bar, EventKind::Signal, EventKind::PortfolioUpdate],
            risk.clone(),
            priority::RISK,
        );

        source.reset();
        info!(run_id = %self.run_id, split = %source.active_split(), "backtest starting");

        let started = Instant::now();
        let deadline = self.config.deadline;
        let mut bars_processed = 0usize;
        let mut last_timestamp: Option<DateTime<Utc>> = None;
        let mut failure: Option<String> = None;

        bus.publish(Event::BacktestStart {
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
        });

        'bars: loop {
            let tick = source.next_tick();
            if tick.is_empty() {
                break;
            }
            for bar in tick {
                if let Some(limit) = deadline {
                    if started.elapsed() > limit {
                        warn!(run_id = %self.run_id, bars_processed, "wall-clock limit hit");
                        failure = Some(format!("timeout after {bars_processed} bars"));
                        break 'bars;
                    }
                }
                if let Some(max_bars) = self.config.max_bars {
                    if bars_processed >= max_bars {
                        debug!(run_id = %self.run_id, max_bars, "bar cap reached");
                        break 'bars;
                    }
                }

                let symbol = bar.symbol.clone();
                let date = bar.date();
                let timestamp = bar.timestamp;
                bars_processed += 1;
                last_timestamp = Some(timestamp);

                bus.publish(Event::Bar(bar));

                if self.config.close_positions_eod {
                    let day_ends = match source.peek(&symbol) {
                        Some(next) => next.date() != date,
                        None => true,
                    };
                    if day_ends {
                        Self::close_symbol_position(
                            &mut bus,
                            &portfolio,
                            &symbol,
                            timestamp,
                            &format!("eod:{symbol}:{date}"),
                        );
                    }
                }
            }
        }

        // Force remaining positions into round trips at their last mark.
        if let Some(timestamp) = last_timestamp {
            let exposures = portfolio.borrow().open_exposures();
            for (symbol, _, _) in exposures {
                Self::close_symbol_position(
                    &mut bus,
                    &portfolio,
                    &symbol,
                    timestamp,
                    &format!("final:{symbol}"),
                );
            }
        }

        bus.publish(Event::BacktestEnd {
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
        });

        let (stats, consistency, trades, equity_curve) = {
            let ledger = portfolio.borrow();
            (
                ledger.statistics(),
                ledger.is_consistent(),
                ledger.recent_trades(true),
                ledger.equity_curve().to_vec(),
            )
        };
        if !consistency {
            warn!(run_id = %self.run_id, "pnl/equity consistency check failed");
        }

        let fingerprint = format!(
            "{}|{}|split={}",
            self.run_id,
            FILL_CONVENTION,
            source.fingerprint(source.active_split())
        );

        info!(
            run_id = %self.run_id,
            bars_processed,
            trades = trades.len(),
            equity_final = %stats.equity_final,
            "backtest finished"
        );

        Ok(RunResult {
            run_id: self.run_id.clone(),
            fingerprint,
            complete: failure.is_none(),
            consistency,
            stats,
            trades,
            equity_curve,
            errors: bus.take_errors(),
            dropped_events: bus.dropped(),
            failure,
        })
    }

    /// Publishes a synthetic FLAT signal for the symbol if it still has
    /// an open position. The risk manager turns it into a CLOSE order
    /// filled at the broker's current reference price.
    fn close_symbol_position(
        bus: &mut EventBus,
        portfolio: &Rc<RefCell<PortfolioLedger>>,
        symbol: &Symbol,
        timestamp: DateTime<Utc>,
        rule_id: &str,
    ) {
        let has_position = portfolio
            .borrow()
            .position(symbol)
            .map(|p| p.direction() != Direction::Flat)
            .unwrap_or(false);
        if !has_position {
            return;
        }
        bus.publish(Event::Signal(Signal::new(
            symbol.clone(),
            timestamp,
            Direction::Flat,
            1.0,
            "coordinator",
            rule_id,
        )));
    }
}

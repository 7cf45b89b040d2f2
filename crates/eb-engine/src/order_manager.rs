//! Order lifecycle tracking and fill-to-trade translation.
//!
//! The order manager assigns ids to incoming orders, republishes them as
//! PENDING for the broker, and pairs fills into round-trip trade events.
//! Ids are sequential within a run so identical inputs reproduce
//! identical artifacts.

use std::collections::HashMap;

use tracing::debug;

use eb_types::{
    Event, Fill, Intent, Order, OrderId, OrderStatus, PipelineError, Symbol, Trade, TradeClosed,
    TradeId, TradeOpened,
};

use crate::bus::{Emitter, EventHandler};

pub struct OrderManager {
    next_order_id: OrderId,
    next_trade_id: TradeId,
    active: HashMap<OrderId, Order>,
    open_trades: HashMap<Symbol, Trade>,
}

impl OrderManager {
    pub fn new() -> Self {
        Self {
            next_order_id: 1,
            next_trade_id: 1,
            active: HashMap::new(),
            open_trades: HashMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.next_order_id = 1;
        self.next_trade_id = 1;
        self.active.clear();
        self.open_trades.clear();
    }

    /// Orders still awaiting a fill.
    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.active.values()
    }

    fn on_order(&mut self, order: &Order, out: &mut Emitter) {
        // Orders we already enriched come back around for the broker;
        // nothing left to do on them.
        if order.id.is_some() {
            return;
        }
        let id = self.next_order_id;
        self.next_order_id += 1;

        let mut accepted = order.clone();
        accepted.id = Some(id);
        accepted.status = OrderStatus::Pending;

        debug!(order_id = id, symbol = %accepted.symbol, "order accepted");
        self.active.insert(id, accepted.clone());
        out.emit(Event::Order(accepted));
    }

    fn on_fill(&mut self, fill: &Fill, out: &mut Emitter) -> Result<(), PipelineError> {
        let Some(mut order) = self.active.remove(&fill.order_id) else {
            return Err(PipelineError::UnknownOrder { order_id: fill.order_id });
        };
        if order.symbol != fill.symbol || order.side != fill.side || order.quantity != fill.quantity
        {
            // Put the order back so a correct fill can still match it.
            let order_id = fill.order_id;
            self.active.insert(order_id, order);
            return Err(PipelineError::FillMismatch {
                order_id,
                message: "symbol/side/quantity differ from the order".into(),
            });
        }
        order.status = OrderStatus::Filled;

        match order.intent {
            Intent::Open => {
                let trade_id = self.next_trade_id;
                self.next_trade_id += 1;
                let direction = fill.side.direction();
                let trade = Trade::open(
                    trade_id,
                    fill.symbol.clone(),
                    direction,
                    fill.quantity,
                    fill.timestamp,
                    fill.fill_price,
                    fill.commission,
                    order.rule_id.clone(),
                );
                self.open_trades.insert(fill.symbol.clone(), trade);
                out.emit(Event::TradeOpen(TradeOpened {
                    trade_id,
                    symbol: fill.symbol.clone(),
                    direction,
                    quantity: fill.quantity,
                    timestamp: fill.timestamp,
                    price: fill.fill_price,
                    commission: fill.commission,
                    rule_id: order.rule_id.clone(),
                }));
                Ok(())
            }
            Intent::Close => match self.open_trades.remove(&fill.symbol) {
                Some(open) => {
                    out.emit(Event::TradeClose(TradeClosed {
                        trade_id: open.id,
                        symbol: fill.symbol.clone(),
                        direction: open.direction,
                        quantity: fill.quantity,
                        timestamp: fill.timestamp,
                        price: fill.fill_price,
                        commission: fill.commission,
                        rule_id: order.rule_id.clone(),
                        matched: true,
                    }));
                    Ok(())
                }
                None => {
                    // Standalone close: reported, not fatal.
                    let trade_id = self.next_trade_id;
                    self.next_trade_id += 1;
                    out.emit(Event::TradeClose(TradeClosed {
                        trade_id,
                        symbol: fill.symbol.clone(),
                        direction: fill.side.direction().opposite(),
                        quantity: fill.quantity,
                        timestamp: fill.timestamp,
                        price: fill.fill_price,
                        commission: fill.commission,
                        rule_id: order.rule_id.clone(),
                        matched: false,
                    }));
                    Err(PipelineError::UnmatchedClose { symbol: fill.symbol.to_string() })
                }
            },
        }
    }
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for OrderManager {
    fn name(&self) -> &'static str {
        "order_manager"
    }

    fn on_event(&mut self, event: &Event, out: &mut Emitter) -> Result<(), PipelineError> {
        match event {
            Event::Order(order) => {
                self.on_order(order, out);
                Ok(())
            }
            Event::Fill(fill) => self.on_fill(fill, out),
            _ => Ok(()),
        }
    }
}

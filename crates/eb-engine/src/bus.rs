//! Typed publish/subscribe with synchronous, priority-ordered dispatch.
//!
//! Everything inside a run goes through this bus: handlers run to
//! completion in descending priority order (ties broken by registration
//! order), events emitted during a dispatch are queued FIFO behind the
//! current event, and handler failures are recorded without aborting
//! the dispatch.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use eb_types::{Event, EventKind, PipelineError};

/// Handler priorities. Higher runs earlier within one dispatch.
pub mod priority {
    /// Must see FILL before the portfolio reacts to the trade events.
    pub const ORDER_MANAGER: i32 = 100;
    pub const PORTFOLIO: i32 = 90;
    pub const BROKER: i32 = 60;
    pub const STRATEGY: i32 = 50;
    pub const RISK: i32 = 40;
    pub const OBSERVER: i32 = 10;
}

/// Sink through which a handler emits downstream events. Emissions are
/// appended to the bus queue after the current event finishes
/// dispatching; they never interleave with sibling handlers.
#[derive(Debug, Default)]
pub struct Emitter {
    queue: VecDeque<Event>,
}

impl Emitter {
    pub fn emit(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Removes and returns everything emitted so far.
    pub fn take(&mut self) -> Vec<Event> {
        self.queue.drain(..).collect()
    }
}

/// A pipeline stage attached to the bus.
pub trait EventHandler {
    /// Stable name used in the dispatch error log.
    fn name(&self) -> &'static str;

    fn on_event(&mut self, event: &Event, out: &mut Emitter) -> Result<(), PipelineError>;
}

/// Deduplication policy for published events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupMode {
    None,
    ByFingerprint,
}

/// One recorded handler failure, surfaced to the coordinator at run end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub kind: String,
    pub handler: String,
    pub message: String,
}

pub type SubscriberId = u64;

struct Subscription {
    id: SubscriberId,
    priority: i32,
    seq: u64,
    handler: Rc<RefCell<dyn EventHandler>>,
}

/// The event bus. Single-threaded by construction; one instance per run.
pub struct EventBus {
    subscriptions: HashMap<EventKind, Vec<Subscription>>,
    next_id: SubscriberId,
    next_seq: u64,
    dedup: DedupMode,
    seen: HashSet<String>,
    batching: bool,
    pending: VecDeque<Event>,
    errors: Vec<DispatchRecord>,
    dropped: u64,
}

impl EventBus {
    pub fn new(dedup: DedupMode) -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 0,
            next_seq: 0,
            dedup,
            seen: HashSet::new(),
            batching: false,
            pending: VecDeque::new(),
            errors: Vec::new(),
            dropped: 0,
        }
    }

    /// Registers a handler for one event kind. Ties in priority are
    /// broken by registration order.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: Rc<RefCell<dyn EventHandler>>,
        priority: i32,
    ) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let subs = self.subscriptions.entry(kind).or_default();
        subs.push(Subscription { id, priority, seq, handler });
        subs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        id
    }

    /// Convenience: one handler across several kinds at one priority.
    pub fn subscribe_many(
        &mut self,
        kinds: &[EventKind],
        handler: Rc<RefCell<dyn EventHandler>>,
        priority: i32,
    ) -> Vec<SubscriberId> {
        kinds
            .iter()
            .map(|kind| self.subscribe(*kind, handler.clone(), priority))
            .collect()
    }

    /// Removes a subscription; silently ignores unknown ids.
    pub fn unsubscribe(&mut self, kind: EventKind, id: SubscriberId) {
        if let Some(subs) = self.subscriptions.get_mut(&kind) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Delivers the event to all handlers for its kind, then drains any
    /// emissions until the queue is empty. While a batch is active the
    /// event is queued instead.
    pub fn publish(&mut self, event: Event) {
        if self.batching {
            self.pending.push_back(event);
            return;
        }
        let mut queue = VecDeque::new();
        queue.push_back(event);
        self.drain_queue(&mut queue);
    }

    /// Starts queueing published events instead of dispatching them.
    pub fn start_batch(&mut self) {
        self.batching = true;
    }

    /// Dispatches every queued event in FIFO order, including events
    /// emitted while draining.
    pub fn end_batch(&mut self) {
        self.batching = false;
        let mut queue = std::mem::take(&mut self.pending);
        self.drain_queue(&mut queue);
    }

    /// Clears all handlers, the dedup table, pending events, and logs.
    pub fn reset(&mut self) {
        self.subscriptions.clear();
        self.seen.clear();
        self.batching = false;
        self.pending.clear();
        self.errors.clear();
        self.dropped = 0;
    }

    pub fn errors(&self) -> &[DispatchRecord] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<DispatchRecord> {
        std::mem::take(&mut self.errors)
    }

    /// Count of events dropped by deduplication.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn drain_queue(&mut self, queue: &mut VecDeque<Event>) {
        while let Some(event) = queue.pop_front() {
            self.dispatch(event, queue);
        }
    }

    fn dispatch(&mut self, event: Event, queue: &mut VecDeque<Event>) {
        if self.dedup == DedupMode::ByFingerprint {
            if let Some(fingerprint) = event.fingerprint() {
                if !self.seen.insert(fingerprint.clone()) {
                    self.dropped += 1;
                    debug!(kind = %event.kind(), fingerprint = %fingerprint, "dropped duplicate event");
                    return;
                }
            }
        }

        let handlers: Vec<Rc<RefCell<dyn EventHandler>>> = self
            .subscriptions
            .get(&event.kind())
            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default();

        let mut emitter = Emitter::default();
        for handler in handlers {
            let mut handler = handler.borrow_mut();
            if let Err(err) = handler.on_event(&event, &mut emitter) {
                warn!(kind = %event.kind(), handler = handler.name(), %err, "handler failed");
                self.errors.push(DispatchRecord {
                    kind: event.kind().to_string(),
                    handler: handler.name().to_string(),
                    message: err.to_string(),
                });
            }
        }
        queue.extend(emitter.take());
    }
}

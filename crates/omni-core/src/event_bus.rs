//! Typed publish/subscribe bus for decoupled communication between
//! the provider manager, the tool catalog, the orchestrator and the UI.
//!
//! The bus is single-threaded (WASM constraint) and uses interior mutability
//! via RefCell. Each subscriber owns a buffered queue and drains it at its
//! own pace, so publishers never know who is listening.
//!
//! Queues are bounded: once a subscriber falls `capacity` events behind,
//! the oldest pending event is dropped. A coalescing subscription skips an
//! event equal to one it already holds.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Pending events a subscription holds before dropping the oldest.
pub const DEFAULT_CAPACITY: usize = 1024;

type Queue<E> = RefCell<Inbox<E>>;

struct Inbox<E> {
    events: VecDeque<E>,
    capacity: usize,
    coalesce: Option<fn(&E, &E) -> bool>,
    dropped: usize,
}

impl<E> Inbox<E> {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            capacity: DEFAULT_CAPACITY,
            coalesce: None,
            dropped: 0,
        }
    }

    fn push(&mut self, event: E) {
        if let Some(same) = self.coalesce {
            if self.events.iter().any(|pending| same(pending, &event)) {
                return;
            }
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
            if self.dropped == 1 {
                log::warn!("Event subscriber fell {} events behind, dropping oldest", self.capacity);
            }
        }
        self.events.push_back(event);
    }
}

/// Shared event bus: clone-cheap via Rc.
pub struct EventBus<E> {
    subscribers: Rc<RefCell<Vec<Weak<Queue<E>>>>>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Publish an event to every live subscription.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.retain(|queue| queue.strong_count() > 0);
        for queue in subscribers.iter().filter_map(Weak::upgrade) {
            queue.borrow_mut().push(event.clone());
        }
    }

    /// Start receiving events emitted from now on.
    pub fn subscribe(&self) -> Subscription<E> {
        let queue = Rc::new(RefCell::new(Inbox::new()));
        self.subscribers.borrow_mut().push(Rc::downgrade(&queue));
        Subscription { queue }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|queue| queue.strong_count() > 0)
            .count()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Rc::clone(&self.subscribers),
        }
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a bus. Dropping it unsubscribes.
pub struct Subscription<E> {
    queue: Rc<Queue<E>>,
}

impl<E> Subscription<E> {
    /// Keep at most `capacity` pending events (at least one).
    pub fn with_capacity(self, capacity: usize) -> Self {
        self.queue.borrow_mut().capacity = capacity.max(1);
        self
    }

    /// Skip events equal to one still pending.
    pub fn coalescing(self) -> Self
    where
        E: PartialEq,
    {
        self.queue.borrow_mut().coalesce = Some(<E as PartialEq>::eq);
        self
    }

    /// Drain all pending events in emission order.
    pub fn drain(&self) -> Vec<E> {
        self.queue.borrow_mut().events.drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.borrow().events.is_empty()
    }

    /// Events lost to the capacity bound since subscribing.
    pub fn dropped(&self) -> usize {
        self.queue.borrow().dropped
    }
}

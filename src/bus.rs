//! Name-addressed publish/subscribe used to decouple the core from any front end.
//!
//! Dispatch is synchronous on the publisher's thread. Subscribers must not block;
//! a subscriber that panics is logged and skipped so no failure crosses the bus.

use crate::data_container::DataArray;
use crate::filters::bank::BankId;
use crate::units::DefaultUnits;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Topic names. These strings are part of the wire contract with front ends.
pub mod topics {
    pub const SCAN_START: &str = "scan.start";
    pub const SCAN_STOP: &str = "scan.stop";
    pub const SCAN_AFTER: &str = "scan.after";
    pub const SCAN_TOGGLE_CONTROLS: &str = "scan.toggle_controls";
    pub const PROGRESS_CHANGE: &str = "progress_change";
    pub const SET_STATUS_TEXT: &str = "set_status_text";

    pub const FILTER_CHANGE: &str = "filter.change";
    pub const FILTER_CHANGE_REFERENCE: &str = "filter.change_reference";
    pub const FILTER_CLEAR_REFERENCE: &str = "filter.clear_reference";
    pub const FILTER_SAVE_DEFAULT: &str = "filter.save_default";

    pub const HISTORY_ARRAYS: &str = "history.arrays";
    pub const HISTORY_CHANGE_REFERENCE: &str = "history.change_reference";
    pub const HISTORY_CLEAR_REFERENCE: &str = "history.clear_reference";
    pub const HISTORY_NEED_POST_PROCESS: &str = "history.need_post_process";
    pub const HISTORY_SET_REFERENCE: &str = "history.set_reference";
    pub const HISTORY_RELOAD_EVENTS: &str = "history.reload_events";
    pub const HISTORY_DRAG_OBJECT: &str = "history.drag_object";
    pub const HISTORY_POST_PROCESS: &str = "history.post_process";

    pub const PLOT_DELETE: &str = "plot.delete";
    pub const PLOT_COLOR_CHANGE: &str = "plot.color_change";
    pub const PLOT_EMPTY_PAGE: &str = "plot.empty_page";
    pub const PLOT_MOVE_AXIS: &str = "plot.move_axis";
    pub const PLOT_SET_FILTERS: &str = "plot.set_filters";
    pub const PLOT_ENABLE_FILTERS: &str = "plot.enable_filters";
    pub const PLOT_APPLY_FILTERS: &str = "plot.apply_filters";
    pub const PLOT_SWITCH_CANVAS: &str = "plot.switch_canvas";

    pub const LOAD_DATA: &str = "load_data";
    pub const REQUEST_CANVAS: &str = "request_canvas";
    pub const REQUEST_ARRAYS: &str = "request_arrays";
    pub const REQUEST_TOP_WINDOW: &str = "request_top_window";
    pub const BROADCAST_CANVAS: &str = "broadcast_canvas";
    pub const BROADCAST_WINDOW: &str = "broadcast_window";
    pub const BROADCAST_REFRESH: &str = "broadcast_refresh";
    pub const DEFAULT_UNITS_CHANGED: &str = "default_units.changed";

    pub const ALL: [&str; 34] = [
        SCAN_START,
        SCAN_STOP,
        SCAN_AFTER,
        SCAN_TOGGLE_CONTROLS,
        PROGRESS_CHANGE,
        SET_STATUS_TEXT,
        FILTER_CHANGE,
        FILTER_CHANGE_REFERENCE,
        FILTER_CLEAR_REFERENCE,
        FILTER_SAVE_DEFAULT,
        HISTORY_ARRAYS,
        HISTORY_CHANGE_REFERENCE,
        HISTORY_CLEAR_REFERENCE,
        HISTORY_NEED_POST_PROCESS,
        HISTORY_SET_REFERENCE,
        HISTORY_RELOAD_EVENTS,
        HISTORY_DRAG_OBJECT,
        HISTORY_POST_PROCESS,
        PLOT_DELETE,
        PLOT_COLOR_CHANGE,
        PLOT_EMPTY_PAGE,
        PLOT_MOVE_AXIS,
        PLOT_SET_FILTERS,
        PLOT_ENABLE_FILTERS,
        PLOT_APPLY_FILTERS,
        PLOT_SWITCH_CANVAS,
        LOAD_DATA,
        REQUEST_CANVAS,
        REQUEST_ARRAYS,
        REQUEST_TOP_WINDOW,
        BROADCAST_CANVAS,
        BROADCAST_WINDOW,
        BROADCAST_REFRESH,
        DEFAULT_UNITS_CHANGED,
    ];
}

/// Payload of a bus message.
#[derive(Debug, Clone)]
pub enum Message {
    Empty,
    Text(String),
    /// Completion in percent.
    Progress(f64),
    Flag(bool),
    Array(Arc<DataArray>),
    Arrays(Vec<Arc<DataArray>>),
    Bank(BankId),
    Banks(Vec<BankId>),
    /// A reference source for the listed banks, or for every bank when the list is empty.
    Reference {
        array: Arc<DataArray>,
        banks: Vec<BankId>,
    },
    Units(DefaultUnits),
}

impl Message {
    pub fn as_array(&self) -> Option<&Arc<DataArray>> {
        match self {
            Message::Array(a) | Message::Reference { array: a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// Identifier returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

pub type Listener = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<String, Vec<(usize, Listener)>>>>,
    next_id: Arc<AtomicUsize>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self
            .listeners
            .read()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("topics", &topics).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        SubscriptionId(id)
    }

    /// Returns `true` when the subscription existed.
    pub fn unsubscribe(&self, topic: &str, subscription: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(bucket) = listeners.get_mut(topic) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(existing, _)| *existing != subscription.0);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            listeners.remove(topic);
        }
        removed
    }

    pub fn has_listeners(&self, topic: &str) -> bool {
        self.listeners
            .read()
            .map(|l| l.get(topic).is_some_and(|b| !b.is_empty()))
            .unwrap_or(false)
    }

    /// Delivers `message` to every subscriber of `topic`, in subscription order.
    pub fn publish(&self, topic: &str, message: Message) {
        let listeners: Vec<Listener> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match listeners.get(topic) {
                Some(bucket) => bucket.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        log::trace!("publishing {topic} to {} subscriber(s)", listeners.len());
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&message))).is_err() {
                log::error!("a subscriber of {topic} panicked");
            }
        }
    }

    /// Shorthand for a `set_status_text` message.
    pub fn status(&self, text: impl Into<String>) {
        self.publish(topics::SET_STATUS_TEXT, Message::Text(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn subscribers_receive_in_order_until_unsubscribed() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let id = bus.subscribe(topics::SET_STATUS_TEXT, move |m| {
            first.lock().unwrap().push(format!("a:{}", m.as_text().unwrap_or("")));
        });
        let second = seen.clone();
        bus.subscribe(topics::SET_STATUS_TEXT, move |m| {
            second.lock().unwrap().push(format!("b:{}", m.as_text().unwrap_or("")));
        });
        bus.status("one");
        assert!(bus.unsubscribe(topics::SET_STATUS_TEXT, id));
        assert!(!bus.unsubscribe(topics::SET_STATUS_TEXT, id));
        bus.status("two");
        assert_eq!(*seen.lock().unwrap(), vec!["a:one", "b:one", "b:two"]);
    }

    #[test]
    fn panicking_subscriber_does_not_reach_publisher() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(topics::SCAN_STOP, |_| panic!("boom"));
        let counter = hits.clone();
        bus.subscribe(topics::SCAN_STOP, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(topics::SCAN_STOP, Message::Empty);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_publish_reentrantly() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = bus.clone();
        bus.subscribe(topics::SCAN_START, move |_| {
            inner.publish(topics::SCAN_STOP, Message::Empty);
        });
        let counter = hits.clone();
        bus.subscribe(topics::SCAN_STOP, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(topics::SCAN_START, Message::Empty);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.has_listeners(topics::LOAD_DATA));
    }
}

//! Couples history arrays to the reference filters of filter banks.
//!
//! The coordinator listens on the bus for the `history.*` reference messages,
//! forwards the source array to every interested [`SharedBank`] and announces
//! the outcome with `filter.change_reference` / `filter.clear_reference`.
//! Banks are held weakly: a bank dropped by its canvas simply disappears.

use crate::bus::{topics, EventBus, Message, SubscriptionId};
use crate::data_container::{ArrayId, DataArray};
use crate::filters::bank::{BankId, FilterBank, SharedBank};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

#[derive(Debug, Default)]
struct State {
    banks: Vec<Weak<RwLock<FilterBank>>>,
    /// Which history array each bank's reference was computed from.
    sources: HashMap<BankId, ArrayId>,
    known: Vec<Arc<DataArray>>,
}

#[derive(Debug)]
struct Inner {
    bus: EventBus,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn live_banks(&self) -> Vec<SharedBank> {
        let mut state = self.state();
        state.banks.retain(|b| b.strong_count() > 0);
        state.banks.iter().filter_map(SharedBank::upgrade).collect()
    }

    fn set_reference(&self, array: &Arc<DataArray>, banks: &[BankId]) -> Vec<BankId> {
        let mut updated = Vec::new();
        for bank in self.live_banks() {
            let id = bank.id();
            if !banks.is_empty() && !banks.contains(&id) {
                continue;
            }
            match bank.set_reference_source(array) {
                Ok(true) => updated.push(id),
                Ok(false) => {}
                Err(err) => log::error!("could not compute the reference of {}: {err}", bank.read().name),
            }
        }
        {
            let mut state = self.state();
            for id in &updated {
                state.sources.insert(*id, array.id);
            }
        }
        if !updated.is_empty() {
            self.bus.publish(
                topics::FILTER_CHANGE_REFERENCE,
                Message::Reference {
                    array: array.clone(),
                    banks: updated.clone(),
                },
            );
        }
        updated
    }

    fn change_reference(&self, array: &Arc<DataArray>) -> Vec<BankId> {
        let interested: Vec<BankId> = {
            let state = self.state();
            state
                .sources
                .iter()
                .filter(|(_, source)| **source == array.id)
                .map(|(bank, _)| *bank)
                .collect()
        };
        if interested.is_empty() {
            log::debug!("no filter bank uses {} as reference", array.name);
            return interested;
        }
        self.set_reference(array, &interested)
    }

    fn clear_reference(&self, banks: &[BankId]) -> Vec<BankId> {
        let mut cleared = Vec::new();
        for bank in self.live_banks() {
            let id = bank.id();
            if banks.contains(&id) && bank.remove_reference().is_some() {
                cleared.push(id);
            }
        }
        {
            let mut state = self.state();
            for id in banks {
                state.sources.remove(id);
            }
        }
        if !cleared.is_empty() {
            self.bus.publish(topics::FILTER_CLEAR_REFERENCE, Message::Banks(cleared.clone()));
        }
        cleared
    }
}

/// Routes reference arrays from the history to filter banks.
#[derive(Debug)]
pub struct ReferenceCoordinator {
    inner: Arc<Inner>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
}

impl ReferenceCoordinator {
    /// Creates a coordinator and subscribes it to the history reference topics.
    pub fn attach(bus: &EventBus) -> ReferenceCoordinator {
        let inner = Arc::new(Inner {
            bus: bus.clone(),
            state: Mutex::new(State::default()),
        });
        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(&inner);
        subscriptions.push((
            topics::HISTORY_SET_REFERENCE,
            bus.subscribe(topics::HISTORY_SET_REFERENCE, move |message| {
                let Some(inner) = weak.upgrade() else { return };
                match message {
                    Message::Reference { array, banks } => {
                        inner.set_reference(array, banks);
                    }
                    Message::Array(array) => {
                        inner.set_reference(array, &[]);
                    }
                    other => log::warn!("history.set_reference ignores {other:?}"),
                }
            }),
        ));

        let weak = Arc::downgrade(&inner);
        subscriptions.push((
            topics::HISTORY_CHANGE_REFERENCE,
            bus.subscribe(topics::HISTORY_CHANGE_REFERENCE, move |message| {
                let Some(inner) = weak.upgrade() else { return };
                if let Some(array) = message.as_array() {
                    inner.change_reference(array);
                }
            }),
        ));

        let weak = Arc::downgrade(&inner);
        subscriptions.push((
            topics::HISTORY_CLEAR_REFERENCE,
            bus.subscribe(topics::HISTORY_CLEAR_REFERENCE, move |message| {
                let Some(inner) = weak.upgrade() else { return };
                match message {
                    Message::Bank(id) => {
                        inner.clear_reference(&[*id]);
                    }
                    Message::Banks(ids) => {
                        inner.clear_reference(ids);
                    }
                    other => log::warn!("history.clear_reference ignores {other:?}"),
                }
            }),
        ));

        let weak = Arc::downgrade(&inner);
        subscriptions.push((
            topics::HISTORY_ARRAYS,
            bus.subscribe(topics::HISTORY_ARRAYS, move |message| {
                let Some(inner) = weak.upgrade() else { return };
                if let Message::Arrays(arrays) = message {
                    inner.state().known = arrays.clone();
                }
            }),
        ));

        ReferenceCoordinator {
            inner,
            subscriptions,
        }
    }

    /// Starts forwarding references to `bank`.
    pub fn register(&self, bank: &SharedBank) {
        let mut state = self.inner.state();
        let weak = bank.downgrade();
        if !state.banks.iter().any(|b| b.ptr_eq(&weak)) {
            state.banks.push(weak);
        }
    }

    pub fn unregister(&self, bank: &SharedBank) {
        let id = bank.id();
        let weak = bank.downgrade();
        let mut state = self.inner.state();
        state.banks.retain(|b| !b.ptr_eq(&weak));
        state.sources.remove(&id);
    }

    /// History arrays last announced on `history.arrays`, for reference selection.
    pub fn known_arrays(&self) -> Vec<Arc<DataArray>> {
        self.inner.state().known.clone()
    }

    /// The history array the reference of `bank` was computed from.
    pub fn source_of(&self, bank: BankId) -> Option<ArrayId> {
        self.inner.state().sources.get(&bank).copied()
    }

    /// Uses `array` as reference for `banks` (every registered bank if empty).
    /// Returns the banks whose reference was computed.
    pub fn set_reference(&self, array: &Arc<DataArray>, banks: &[BankId]) -> Vec<BankId> {
        self.inner.set_reference(array, banks)
    }

    /// Recomputes the reference of every bank fed from `array`.
    pub fn change_reference(&self, array: &Arc<DataArray>) -> Vec<BankId> {
        self.inner.change_reference(array)
    }

    /// Removes the reference filter of `banks` and refreshes their children.
    pub fn clear_reference(&self, banks: &[BankId]) -> Vec<BankId> {
        self.inner.clear_reference(banks)
    }

    /// Unsubscribes from the bus. The coordinator keeps working when called directly.
    pub fn detach(&mut self) {
        for (topic, id) in self.subscriptions.drain(..) {
            self.inner.bus.unsubscribe(topic, id);
        }
    }
}

impl Drop for ReferenceCoordinator {
    fn drop(&mut self) {
        self.detach();
    }
}

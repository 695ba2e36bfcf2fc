//! Ordered filter chains.
//!
//! A [`FilterBank`] owns a list of filters, applies the active ones to copies of
//! 1-D arrays and propagates unit labels through them. Banks can be chained: a
//! child bank first runs its parent's active filters up to and including the
//! parent's reference filter. The bank's reference filter receives a
//! reference array computed from a history array through the same chain.
//!
//! Banks are shared between the processing canvases and the reference
//! coordinator through [`SharedBank`], a cheap handle over `Arc<RwLock<FilterBank>>`.

use crate::bus::{topics, EventBus, Message};
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::Filter;
use crate::units::AxisInfo;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use uuid::Uuid;

/// Identifier of a filter bank, used to scope bus messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankId(pub Uuid);

impl BankId {
    pub fn new() -> BankId {
        BankId(Uuid::new_v4())
    }
}

impl Default for BankId {
    fn default() -> Self {
        BankId::new()
    }
}

/// A filter together with its per-bank flags.
#[derive(Debug, Clone)]
pub struct FilterEntry {
    pub filter: Box<dyn Filter>,
    pub active: bool,
    pub visible: bool,
}

impl FilterEntry {
    pub fn new(filter: Box<dyn Filter>) -> FilterEntry {
        FilterEntry {
            filter,
            active: true,
            visible: true,
        }
    }
}

/// An ordered chain of filters.
///
/// Invariants kept by every mutating method:
/// - at most one reference filter,
/// - no pre-filter after a transform.
#[derive(Debug)]
pub struct FilterBank {
    id: BankId,
    pub name: String,
    pub dimension: usize,
    filters: Vec<FilterEntry>,
    parent: Option<Weak<RwLock<FilterBank>>>,
    children: Vec<Weak<RwLock<FilterBank>>>,
    bus: EventBus,
}

impl FilterBank {
    pub fn id(&self) -> BankId {
        self.id
    }

    pub fn filters(&self) -> &[FilterEntry] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Position of the reference filter, if the bank has one.
    pub fn reference_position(&self) -> Option<usize> {
        self.filters.iter().position(|e| e.filter.is_reference())
    }

    /// Checks that `filter` may be placed at `position`.
    fn check_insert(&self, position: usize, filter: &dyn Filter) -> Result<()> {
        let name = filter.config().name;
        if filter.is_reference() && self.reference_position().is_some() {
            return Err(TerapyError::InvalidFilterOrder(format!(
                "{} already holds a reference filter, cannot add {name}",
                self.name
            )));
        }
        if filter.is_pre_filter() && self.filters[..position].iter().any(|e| e.filter.is_transform()) {
            return Err(TerapyError::InvalidFilterOrder(format!(
                "{name} must run before every transform"
            )));
        }
        if filter.is_transform() && self.filters[position..].iter().any(|e| e.filter.is_pre_filter()) {
            return Err(TerapyError::InvalidFilterOrder(format!(
                "{name} cannot precede a pre-filter"
            )));
        }
        Ok(())
    }

    fn insert_entry(&mut self, position: usize, entry: FilterEntry) -> Result<()> {
        let position = position.min(self.filters.len());
        self.check_insert(position, entry.filter.as_ref())?;
        self.filters.insert(position, entry);
        Ok(())
    }

    /// Active filters up to and including the reference filter, or all active
    /// filters if the bank has none. This is what a child bank inherits.
    fn inheritable(&self) -> Vec<Box<dyn Filter>> {
        let end = self.reference_position().map(|p| p + 1).unwrap_or(self.filters.len());
        self.filters[..end]
            .iter()
            .filter(|e| e.active)
            .map(|e| e.filter.clone())
            .collect()
    }

    /// Filters inherited from every ancestor bank, topmost first.
    fn inherited(&self) -> Vec<Box<dyn Filter>> {
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => {
                let parent = read_bank(&parent);
                let mut chain = parent.inherited();
                chain.extend(parent.inheritable());
                chain
            }
            None => Vec::new(),
        }
    }

    fn live_children(&self) -> Vec<SharedBank> {
        self.children.iter().filter_map(Weak::upgrade).map(SharedBank).collect()
    }

    fn has_ancestor(&self, id: BankId) -> bool {
        let mut next = self.parent.as_ref().and_then(Weak::upgrade);
        while let Some(bank) = next {
            let bank = read_bank(&bank);
            if bank.id == id {
                return true;
            }
            next = bank.parent.as_ref().and_then(Weak::upgrade);
        }
        false
    }
}

/// Applies one filter to `array` and advances the unit side channel.
fn run_filter(filter: &mut dyn Filter, array: &mut DataArray, units: &mut Vec<AxisInfo>) -> Result<()> {
    filter.apply(array)?;
    *units = filter
        .get_units(units)
        .into_iter()
        .map(|a| AxisInfo::new(a.name, a.units.unit()))
        .collect();
    write_units(array, units);
    Ok(())
}

fn write_units(array: &mut DataArray, units: &[AxisInfo]) {
    let d = array.dimension();
    if units.len() != d + 1 {
        log::warn!(
            "filter produced {} unit labels for a {}-D array, keeping the old labels",
            units.len(),
            d
        );
        return;
    }
    array.axes = units[..d].to_vec();
    array.input = units[d].clone();
}

fn read_bank(lock: &RwLock<FilterBank>) -> RwLockReadGuard<'_, FilterBank> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write_bank(lock: &RwLock<FilterBank>) -> RwLockWriteGuard<'_, FilterBank> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

/// Shared handle to a [`FilterBank`].
#[derive(Debug, Clone)]
pub struct SharedBank(Arc<RwLock<FilterBank>>);

impl SharedBank {
    pub fn new(name: &str, dimension: usize, bus: EventBus) -> SharedBank {
        SharedBank(Arc::new(RwLock::new(FilterBank {
            id: BankId::new(),
            name: name.to_string(),
            dimension,
            filters: Vec::new(),
            parent: None,
            children: Vec::new(),
            bus,
        })))
    }

    pub fn id(&self) -> BankId {
        self.read().id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, FilterBank> {
        read_bank(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, FilterBank> {
        write_bank(&self.0)
    }

    pub fn downgrade(&self) -> Weak<RwLock<FilterBank>> {
        Arc::downgrade(&self.0)
    }

    pub fn upgrade(weak: &Weak<RwLock<FilterBank>>) -> Option<SharedBank> {
        weak.upgrade().map(SharedBank)
    }

    pub fn ptr_eq(&self, other: &SharedBank) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Inserts `filter` at `position` (clamped to the end).
    ///
    /// Fails with [`TerapyError::InvalidFilterOrder`] if the bank would hold two
    /// reference filters or a pre-filter after a transform.
    pub fn insert(&self, position: usize, filter: Box<dyn Filter>) -> Result<()> {
        self.insert_entry(position, FilterEntry::new(filter))
    }

    pub fn insert_entry(&self, position: usize, entry: FilterEntry) -> Result<()> {
        self.write().insert_entry(position, entry)?;
        self.refresh();
        Ok(())
    }

    pub fn append(&self, filter: Box<dyn Filter>) -> Result<()> {
        let end = self.read().len();
        self.insert(end, filter)
    }

    pub fn remove(&self, position: usize) -> Option<FilterEntry> {
        let removed = {
            let mut bank = self.write();
            (position < bank.filters.len()).then(|| bank.filters.remove(position))
        };
        if removed.is_some() {
            self.refresh();
        }
        removed
    }

    /// Moves the filter at `from` to `to`. The bank is unchanged if the new
    /// order would break the ordering rules.
    pub fn move_filter(&self, from: usize, to: usize) -> Result<()> {
        {
            let mut bank = self.write();
            if from >= bank.filters.len() {
                return Ok(());
            }
            let entry = bank.filters.remove(from);
            if let Err(err) = bank.check_insert(to.min(bank.filters.len()), entry.filter.as_ref()) {
                bank.filters.insert(from, entry);
                return Err(err);
            }
            let to = to.min(bank.filters.len());
            bank.filters.insert(to, entry);
        }
        self.refresh();
        Ok(())
    }

    pub fn set_active(&self, position: usize, active: bool) {
        let changed = {
            let mut bank = self.write();
            match bank.filters.get_mut(position) {
                Some(entry) if entry.active != active => {
                    entry.active = active;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.refresh();
        }
    }

    pub fn set_visible(&self, position: usize, visible: bool) {
        if let Some(entry) = self.write().filters.get_mut(position) {
            entry.visible = visible;
        }
    }

    /// Makes `child` continue from this bank's output.
    pub fn add_child(&self, child: &SharedBank) -> Result<()> {
        if self.ptr_eq(child) || self.read().has_ancestor(child.id()) {
            return Err(TerapyError::InvalidFilterOrder(
                "a filter bank cannot be its own ancestor".to_string(),
            ));
        }
        child.detach();
        child.write().parent = Some(self.downgrade());
        self.write().children.push(child.downgrade());
        child.refresh();
        Ok(())
    }

    /// Removes the link to the parent bank, if any.
    pub fn detach(&self) {
        let parent = self.write().parent.take().and_then(|w| w.upgrade());
        if let Some(parent) = parent {
            let me = self.downgrade();
            write_bank(&parent).children.retain(|c| !c.ptr_eq(&me) && c.strong_count() > 0);
        }
    }

    pub fn parent(&self) -> Option<SharedBank> {
        self.read().parent.as_ref().and_then(SharedBank::upgrade)
    }

    pub fn children(&self) -> Vec<SharedBank> {
        self.read().live_children()
    }

    /// Applies the inherited filters and then every active filter to a copy of `array`.
    pub fn apply_filters(&self, array: &DataArray) -> Result<DataArray> {
        let mut out = array.copy();
        let mut units = out.units();
        let inherited = self.read().inherited();
        for mut filter in inherited {
            run_filter(filter.as_mut(), &mut out, &mut units)?;
        }
        let mut bank = self.write();
        for entry in bank.filters.iter_mut().filter(|e| e.active) {
            run_filter(entry.filter.as_mut(), &mut out, &mut units)?;
        }
        write_units(&mut out, &units);
        Ok(out)
    }

    /// Unit labels the bank produces for `units` (axes followed by the input).
    ///
    /// Only active filters contribute and every magnitude is reset to 1.
    pub fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let bank = self.read();
        bank.inherited()
            .iter()
            .chain(bank.filters.iter().filter(|e| e.active).map(|e| &e.filter))
            .fold(units.to_vec(), |units, filter| filter.get_units(&units))
            .into_iter()
            .map(|a| AxisInfo::new(a.name, a.units.unit()))
            .collect()
    }

    /// Points the reference filter at `source` and computes the reference.
    pub fn set_reference_source(&self, source: &Arc<DataArray>) -> Result<bool> {
        {
            let mut bank = self.write();
            let Some(position) = bank.reference_position() else {
                return Ok(false);
            };
            bank.filters[position].filter.set_reference_source(Arc::downgrade(source));
        }
        self.compute_reference()
    }

    /// The history array the reference filter was fed from.
    pub fn reference_source(&self) -> Option<Arc<DataArray>> {
        let bank = self.read();
        bank.reference_position()
            .and_then(|p| bank.filters[p].filter.reference_source())
    }

    /// Recomputes the reference array of the bank's reference filter.
    ///
    /// The source array runs through every ancestor's inherited filters and the
    /// active filters before the local reference filter. Publishes
    /// `filter.change` for this bank and refreshes its children. Returns
    /// `false` if the bank has no reference filter or the source is gone.
    pub fn compute_reference(&self) -> Result<bool> {
        let (position, source, chain, bus, id) = {
            let bank = self.read();
            let Some(position) = bank.reference_position() else {
                return Ok(false);
            };
            let mut chain = bank.inherited();
            chain.extend(
                bank.filters[..position]
                    .iter()
                    .filter(|e| e.active)
                    .map(|e| e.filter.clone()),
            );
            (
                position,
                bank.filters[position].filter.reference_source(),
                chain,
                bank.bus.clone(),
                bank.id,
            )
        };

        let reference = match source {
            Some(source) => {
                let mut reference = source.as_ref().copy();
                let mut units = reference.units();
                for mut filter in chain {
                    run_filter(filter.as_mut(), &mut reference, &mut units)?;
                }
                Some(reference)
            }
            None => None,
        };
        let computed = reference.is_some();
        {
            let mut bank = self.write();
            if let Some(entry) = bank.filters.get_mut(position) {
                if !computed && entry.filter.reference().is_some() {
                    log::warn!("reference source of {} is gone, clearing the reference", entry.filter.config().name);
                }
                entry.filter.set_reference(reference);
            }
        }
        bus.publish(topics::FILTER_CHANGE, Message::Bank(id));
        for child in self.children() {
            child.refresh();
        }
        Ok(computed)
    }

    /// Removes the reference filter and refreshes the children.
    pub fn remove_reference(&self) -> Option<FilterEntry> {
        let (removed, bus, id) = {
            let mut bank = self.write();
            let removed = bank.reference_position().map(|p| bank.filters.remove(p));
            (removed, bank.bus.clone(), bank.id)
        };
        if removed.is_some() {
            bus.publish(topics::FILTER_CHANGE, Message::Bank(id));
            for child in self.children() {
                child.refresh();
            }
        }
        removed
    }

    /// Re-derives everything that depends on the bank's filter order.
    ///
    /// Errors are logged, never propagated, so that a broken reference does not
    /// block edits of the chain.
    pub fn refresh(&self) {
        let has_reference = self.read().reference_position().is_some();
        if has_reference {
            if let Err(err) = self.compute_reference() {
                log::error!("could not compute the reference of {}: {err}", self.read().name);
            }
        } else {
            let (bus, id) = {
                let bank = self.read();
                (bank.bus.clone(), bank.id)
            };
            bus.publish(topics::FILTER_CHANGE, Message::Bank(id));
            for child in self.children() {
                child.refresh();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::apodization::Apodization;
    use crate::filters::crop::Crop;
    use crate::filters::derivative::Derivative;
    use crate::filters::fourier::FourierTransform;
    use crate::filters::normalize::Normalize;
    use crate::filters::remove_baseline::RemoveBaseline;
    use crate::units::UnitQuantity;
    use ndarray::IxDyn;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn ramp(n: usize, slope: f64) -> DataArray {
        let t: Vec<f64> = (0..n).map(|i| i as f64 * 0.1).collect();
        let v: Vec<f64> = t.iter().map(|t| slope * t + 1.0).collect();
        DataArray::from_trace(t, v, AxisInfo::parse("Delay", "ps"), AxisInfo::parse("Signal", "V"))
    }

    fn bank() -> SharedBank {
        SharedBank::new("test", 1, EventBus::default())
    }

    #[test]
    fn ordering_rules_are_enforced() {
        let bank = bank();
        bank.append(Box::new(FourierTransform::new())).unwrap();
        assert!(matches!(
            bank.append(Box::new(Apodization::new())),
            Err(TerapyError::InvalidFilterOrder(_))
        ));
        bank.insert(0, Box::new(Apodization::new())).unwrap();
        assert!(matches!(
            bank.insert(0, Box::new(FourierTransform::new())),
            Err(TerapyError::InvalidFilterOrder(_))
        ));
        bank.append(Box::new(Normalize::new())).unwrap();
        assert!(matches!(
            bank.append(Box::new(Normalize::new())),
            Err(TerapyError::InvalidFilterOrder(_))
        ));
        assert_eq!(bank.read().len(), 3);
        assert!(bank.move_filter(0, 2).is_err());
        assert!(bank.read().filters()[0].filter.is_pre_filter());
    }

    #[test]
    fn apply_works_on_a_copy_and_tracks_units() {
        let bank = bank();
        bank.append(Box::new(Derivative::new())).unwrap();
        let input = ramp(20, 3.0);
        let out = bank.apply_filters(&input).unwrap();
        assert_ne!(out.id, input.id);
        assert_relative_eq!(input.data[IxDyn(&[5])].re, 2.5, epsilon = 1e-12);
        assert_relative_eq!(out.data[IxDyn(&[5])].re, 3.0, epsilon = 1e-9);
        let units = bank.get_units(&input.units());
        assert_eq!(out.input, units[1]);
        assert_eq!(out.input.units, UnitQuantity::parse("V/ps").unwrap());
    }

    #[test]
    fn inactive_filters_are_skipped() {
        let bank = bank();
        bank.append(Box::new(Derivative::new())).unwrap();
        bank.set_active(0, false);
        let input = ramp(10, 3.0);
        let out = bank.apply_filters(&input).unwrap();
        assert_eq!(out.input.units.to_string(), "V");
        assert_relative_eq!(out.data[IxDyn(&[3])].re, input.data[IxDyn(&[3])].re);
    }

    #[test]
    fn children_continue_from_the_parent_reference() {
        let parent = bank();
        parent.append(Box::new(RemoveBaseline::new())).unwrap();
        let child = bank();
        child.append(Box::new(Derivative::new())).unwrap();
        parent.add_child(&child).unwrap();
        assert!(child.add_child(&parent).is_err());

        let out = child.apply_filters(&ramp(30, 2.0)).unwrap();
        assert_relative_eq!(out.data[IxDyn(&[10])].re, 2.0, epsilon = 1e-9);
        assert_eq!(out.input.units.to_string(), "V/ps");

        child.detach();
        assert!(parent.children().is_empty());
        assert!(child.parent().is_none());
    }

    #[test]
    fn reference_recompute_is_idempotent_and_announced() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        bus.subscribe(topics::FILTER_CHANGE, move |_| *counter.lock().unwrap() += 1);

        let bank = SharedBank::new("ref", 1, bus);
        bank.append(Box::new(Crop::new())).unwrap();
        bank.append(Box::new(Normalize::new())).unwrap();
        let source = Arc::new(ramp(16, 1.0));
        assert!(bank.set_reference_source(&source).unwrap());
        let first = bank.read().filters()[1].filter.reference().cloned().unwrap();
        bank.compute_reference().unwrap();
        let second = bank.read().filters()[1].filter.reference().cloned().unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(first.coords, second.coords);
        assert!(*seen.lock().unwrap() >= 2);

        assert!(bank.remove_reference().is_some());
        assert!(bank.read().reference_position().is_none());
    }

    #[test]
    fn removing_the_reference_refreshes_children() {
        let bus = EventBus::default();
        let parent = SharedBank::new("parent", 1, bus.clone());
        parent.append(Box::new(Normalize::new())).unwrap();
        let child = SharedBank::new("child", 1, bus.clone());
        parent.add_child(&child).unwrap();

        let child_id = child.id();
        let refreshed = Arc::new(Mutex::new(false));
        let flag = refreshed.clone();
        bus.subscribe(topics::FILTER_CHANGE, move |m| {
            if matches!(m, Message::Bank(id) if *id == child_id) {
                *flag.lock().unwrap() = true;
            }
        });
        parent.remove_reference();
        assert!(*refreshed.lock().unwrap());
    }
}

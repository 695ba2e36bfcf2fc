//! Device contracts consumed by the sequencer, and the registry that resolves
//! device names to live handles.
//!
//! Drivers for real hardware live outside the core. The only driver shipped
//! here is [`simulated`], which the host binary and the tests use.

pub mod simulated;

use crate::error::{Result, TerapyError};
use crate::units::{AxisInfo, UnitQuantity};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

/// One `(name, value, units)` entry of a device state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProperty {
    pub name: String,
    pub value: String,
    pub units: String,
}

impl DeviceProperty {
    pub fn new(name: &str, value: impl ToString, units: &str) -> DeviceProperty {
        DeviceProperty {
            name: name.to_string(),
            value: value.to_string(),
            units: units.to_string(),
        }
    }
}

/// A motorised (or otherwise positionable) axis.
///
/// `get_motion_status` returns 0 when idle and anything else while moving.
pub trait AxisDevice: Send + Debug {
    fn name(&self) -> &str;

    /// Name and unit of the positions this axis reports.
    fn axis(&self) -> AxisInfo;

    fn prepare_scan(&mut self) -> Result<()> {
        Ok(())
    }

    /// Starts a move to `position`. With `wait` set the call returns after the move.
    fn go_to(&mut self, position: f64, wait: bool) -> Result<()>;

    fn jog(&mut self, delta: f64) -> Result<()> {
        let position = self.pos()?;
        self.go_to(position + delta, false)
    }

    fn pos(&mut self) -> Result<f64>;

    fn get_motion_status(&mut self) -> Result<i32>;

    fn stop(&mut self) -> Result<()>;

    fn home(&mut self) -> Result<()> {
        self.go_to(0.0, false)
    }

    fn reset(&mut self) -> Result<()>;

    fn configure(&mut self) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> Vec<DeviceProperty> {
        Vec::new()
    }
}

/// A device that reports one value per quantity on each read.
pub trait InputDevice: Send + Debug {
    fn name(&self) -> &str;

    fn qtynames(&self) -> Vec<String>;

    fn units(&self) -> Vec<UnitQuantity>;

    fn read(&mut self) -> Result<Vec<f64>>;

    fn reset(&mut self) -> Result<()>;

    fn configure(&mut self) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> Vec<DeviceProperty> {
        Vec::new()
    }

    /// Name and unit of quantity `index`.
    fn quantity(&self, index: usize) -> AxisInfo {
        let name = self
            .qtynames()
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("{} {}", self.name(), index));
        let units = self.units().get(index).cloned().unwrap_or_default();
        AxisInfo::new(name, units)
    }
}

pub type SharedAxis = Arc<Mutex<dyn AxisDevice>>;
pub type SharedInput = Arc<Mutex<dyn InputDevice>>;

/// Locks a device, mapping a poisoned lock to a [`TerapyError::DeviceFailure`].
pub fn lock_device<'a, T: ?Sized>(device: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>> {
    device
        .lock()
        .map_err(|_| TerapyError::device(name, "device lock poisoned"))
}

/// Whether a registry entry is an input or an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Axis,
}

impl DeviceKind {
    pub fn tag(&self) -> &'static str {
        match self {
            DeviceKind::Input => "input",
            DeviceKind::Axis => "axis",
        }
    }
}

/// A device as described in a devices config file.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub kind: DeviceKind,
    pub handle: String,
    pub driver: String,
    pub name: String,
    pub axis: String,
    pub properties: Vec<(String, String)>,
    pub snapshot: Vec<DeviceProperty>,
}

impl DeviceEntry {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Named axis and input handles known to the process.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    axes: Vec<(DeviceEntry, SharedAxis)>,
    inputs: Vec<(DeviceEntry, SharedInput)>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    pub fn add_axis<A: AxisDevice + 'static>(&mut self, device: A) -> SharedAxis {
        let entry = Self::entry_for(DeviceKind::Axis, device.name(), &device.axis().name);
        let shared: SharedAxis = Arc::new(Mutex::new(device));
        self.axes.push((entry, shared.clone()));
        shared
    }

    pub fn add_input<I: InputDevice + 'static>(&mut self, device: I) -> SharedInput {
        let entry = Self::entry_for(DeviceKind::Input, device.name(), "");
        let shared: SharedInput = Arc::new(Mutex::new(device));
        self.inputs.push((entry, shared.clone()));
        shared
    }

    fn entry_for(kind: DeviceKind, name: &str, axis: &str) -> DeviceEntry {
        DeviceEntry {
            kind,
            handle: name.to_string(),
            driver: "simulated".to_string(),
            name: name.to_string(),
            axis: axis.to_string(),
            properties: Vec::new(),
            snapshot: Vec::new(),
        }
    }

    /// Builds a registry from config entries.
    ///
    /// Entries with an unknown driver are skipped with a warning; the rest are kept.
    pub fn from_entries(entries: &[DeviceEntry]) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        for entry in entries {
            if entry.driver != simulated::DRIVER {
                log::warn!(
                    "{}",
                    TerapyError::ConfigParseError(format!(
                        "no driver \"{}\" for {} {}",
                        entry.driver,
                        entry.kind.tag(),
                        entry.name
                    ))
                );
                continue;
            }
            match entry.kind {
                DeviceKind::Axis => {
                    let device: SharedAxis =
                        Arc::new(Mutex::new(simulated::SimulatedAxis::from_entry(entry)));
                    registry.axes.push((entry.clone(), device));
                }
                DeviceKind::Input => {
                    let device: SharedInput =
                        Arc::new(Mutex::new(simulated::SimulatedInput::from_entry(entry)));
                    registry.inputs.push((entry.clone(), device));
                }
            }
            log::info!("registered {} {} ({})", entry.kind.tag(), entry.name, entry.driver);
        }
        registry
    }

    pub fn axis(&self, name: &str) -> Option<SharedAxis> {
        self.axes
            .iter()
            .find(|(e, _)| e.name == name || e.handle == name)
            .map(|(_, d)| d.clone())
    }

    pub fn input(&self, name: &str) -> Option<SharedInput> {
        self.inputs
            .iter()
            .find(|(e, _)| e.name == name || e.handle == name)
            .map(|(_, d)| d.clone())
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(|(e, _)| e.name.clone()).collect()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|(e, _)| e.name.clone()).collect()
    }

    /// Config entries with a fresh state snapshot from every device.
    ///
    /// A device whose lock is poisoned keeps its previous snapshot.
    pub fn snapshot(&self) -> Vec<DeviceEntry> {
        let inputs = self.inputs.iter().map(|(entry, device)| {
            let mut entry = entry.clone();
            if let Ok(d) = device.lock() {
                entry.snapshot = d.state();
            }
            entry
        });
        let axes = self.axes.iter().map(|(entry, device)| {
            let mut entry = entry.clone();
            if let Ok(d) = device.lock() {
                entry.snapshot = d.state();
            }
            entry
        });
        inputs.chain(axes).collect()
    }

    /// Resets every device, logging failures.
    pub fn reset_all(&self) {
        for (entry, device) in &self.axes {
            if let Err(err) = lock_device(device, &entry.name).and_then(|mut d| d.reset()) {
                log::error!("{err}");
            }
        }
        for (entry, device) in &self.inputs {
            if let Err(err) = lock_device(device, &entry.name).and_then(|mut d| d.reset()) {
                log::error!("{err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::simulated::{SimulatedAxis, SimulatedInput};
    use super::*;

    #[test]
    fn registry_resolves_by_name() {
        let mut registry = DeviceRegistry::new();
        registry.add_axis(SimulatedAxis::new("delay", AxisInfo::parse("Delay", "ps")));
        registry.add_input(SimulatedInput::constant("lockin", vec![1.0, 2.0]));
        assert!(registry.axis("delay").is_some());
        assert!(registry.input("lockin").is_some());
        assert!(registry.axis("lockin").is_none());
        assert_eq!(registry.axis_names(), vec!["delay"]);
    }

    #[test]
    fn unknown_drivers_are_skipped() {
        let entries = vec![
            DeviceEntry {
                kind: DeviceKind::Axis,
                handle: "stage".into(),
                driver: "newport".into(),
                name: "stage".into(),
                axis: "Delay".into(),
                properties: vec![],
                snapshot: vec![],
            },
            DeviceEntry {
                kind: DeviceKind::Input,
                handle: "lockin".into(),
                driver: "simulated".into(),
                name: "lockin".into(),
                axis: String::new(),
                properties: vec![("values".into(), "1, 2".into())],
                snapshot: vec![],
            },
        ];
        let registry = DeviceRegistry::from_entries(&entries);
        assert!(registry.axis("stage").is_none());
        let input = registry.input("lockin").unwrap();
        assert_eq!(input.lock().unwrap().read().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn snapshot_collects_state() {
        let mut registry = DeviceRegistry::new();
        registry.add_axis(SimulatedAxis::new("delay", AxisInfo::parse("Delay", "ps")));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].snapshot.iter().any(|p| p.name == "position"));
    }
}

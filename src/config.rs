//! Process-wide settings and state.
//!
//! [`CoreSettings`] mirrors the main `<config scope="terapy">` file.
//! [`CoreContext`] bundles everything that is shared between the sequencer,
//! the filter banks and a front end: settings, default units, the stored-tag
//! map, the device, filter and file-format registries, the array history and
//! the event bus. Tests build a fresh context each.
//!
//! The second half of the module is the reflection used to persist object
//! attributes by name ([`ConfigFields`], [`ConfigField`] and the
//! [`config_fields!`](crate::config_fields) macro).

use crate::bus::{topics, EventBus, Message};
use crate::data_container::{ArrayStore, DataArray};
use crate::devices::DeviceRegistry;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterRegistry};
use crate::io::FormatRegistry;
use crate::units::{DefaultUnits, Dimension, UnitQuantity};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

/// Settings stored in the main config file.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreSettings {
    /// Where measurements are saved unless a Save event names a file.
    pub default_path: PathBuf,
    pub user_path: PathBuf,
    pub config_path: PathBuf,
    pub filter_path: PathBuf,
    pub module_path: PathBuf,
    /// Interval of the progress worker.
    pub refresh_delay: Duration,
    /// `(type, symbol)` pairs of default units, e.g. `("time", "ps")`.
    pub units: Vec<(String, String)>,
}

impl Default for CoreSettings {
    fn default() -> Self {
        let home = home::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let user_path = home.join(".terapy");
        CoreSettings {
            default_path: home,
            config_path: user_path.join("config"),
            filter_path: user_path.join("filters"),
            module_path: user_path.join("modules"),
            user_path,
            refresh_delay: Duration::from_millis(250),
            units: Vec::new(),
        }
    }
}

impl CoreSettings {
    /// Default units with every `<units>` entry applied. Bad entries are skipped.
    pub fn default_units(&self) -> DefaultUnits {
        let mut defaults = DefaultUnits::default();
        for (key, symbol) in &self.units {
            if let Err(err) = defaults.set_from_config(key, symbol) {
                log::warn!("skipping default unit {key}={symbol}: {err}");
            }
        }
        defaults
    }
}

/// Shared state of one TeraPy process.
#[derive(Debug)]
pub struct CoreContext {
    settings: RwLock<CoreSettings>,
    default_units: RwLock<DefaultUnits>,
    tags: RwLock<HashMap<String, f64>>,
    devices: RwLock<DeviceRegistry>,
    history: RwLock<ArrayStore>,
    filters: HashMap<String, Box<dyn Filter>>,
    pub formats: FormatRegistry,
    pub bus: EventBus,
}

impl Default for CoreContext {
    fn default() -> Self {
        CoreContext::new(CoreSettings::default())
    }
}

impl CoreContext {
    pub fn new(settings: CoreSettings) -> CoreContext {
        let default_units = settings.default_units();
        CoreContext {
            settings: RwLock::new(settings),
            default_units: RwLock::new(default_units),
            tags: RwLock::new(HashMap::new()),
            devices: RwLock::new(DeviceRegistry::new()),
            history: RwLock::new(ArrayStore::default()),
            filters: FilterRegistry::snapshot(),
            formats: FormatRegistry::with_builtin(),
            bus: EventBus::new(),
        }
    }

    pub fn with_devices(self, devices: DeviceRegistry) -> CoreContext {
        self.set_devices(devices);
        self
    }

    pub fn settings(&self) -> CoreSettings {
        read(&self.settings).clone()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut CoreSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(|p| p.into_inner());
        f(&mut settings);
    }

    pub fn default_units(&self) -> DefaultUnits {
        read(&self.default_units).clone()
    }

    /// Changes one default unit and publishes `default_units.changed`.
    pub fn set_default_unit(&self, dimension: Dimension, units: UnitQuantity) -> Result<()> {
        let updated = {
            let mut defaults = self.default_units.write().unwrap_or_else(|p| p.into_inner());
            defaults.set(dimension, units)?;
            defaults.clone()
        };
        self.bus
            .publish(topics::DEFAULT_UNITS_CHANGED, Message::Units(updated));
        Ok(())
    }

    pub fn set_default_units(&self, units: DefaultUnits) {
        {
            let mut defaults = self.default_units.write().unwrap_or_else(|p| p.into_inner());
            *defaults = units.clone();
        }
        self.bus
            .publish(topics::DEFAULT_UNITS_CHANGED, Message::Units(units));
    }

    /// Stores a tagged value. Only `Store` events write here.
    pub fn store_tag(&self, tag: &str, value: f64) {
        let mut tags = self.tags.write().unwrap_or_else(|p| p.into_inner());
        tags.insert(tag.to_string(), value);
    }

    pub fn tag(&self, tag: &str) -> Option<f64> {
        read(&self.tags).get(tag).copied()
    }

    pub fn devices(&self) -> RwLockReadGuard<'_, DeviceRegistry> {
        read(&self.devices)
    }

    pub fn set_devices(&self, devices: DeviceRegistry) {
        let mut current = self.devices.write().unwrap_or_else(|p| p.into_inner());
        *current = devices;
    }

    /// Fresh instance of the filter registered under `class`.
    pub fn create_filter(&self, class: &str) -> Option<Box<dyn Filter>> {
        self.filters.get(class).cloned()
    }

    pub fn filter_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Adds an array to the history and broadcasts the new history list.
    pub fn add_to_history(&self, array: DataArray) -> Arc<DataArray> {
        let stored = {
            let mut history = self.history.write().unwrap_or_else(|p| p.into_inner());
            history.insert(array)
        };
        self.broadcast_history();
        stored
    }

    pub fn add_derived_to_history(&self, array: DataArray, source: crate::data_container::ArrayId) -> Arc<DataArray> {
        let stored = {
            let mut history = self.history.write().unwrap_or_else(|p| p.into_inner());
            history.insert_derived(array, source)
        };
        self.broadcast_history();
        stored
    }

    pub fn history(&self) -> RwLockReadGuard<'_, ArrayStore> {
        read(&self.history)
    }

    /// Publishes `history.arrays` with every array in the history.
    pub fn broadcast_history(&self) {
        let arrays = read(&self.history).arrays();
        self.bus.publish(topics::HISTORY_ARRAYS, Message::Arrays(arrays));
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

/// Attributes of an object that are persisted by name.
///
/// Implemented with [`config_fields!`](crate::config_fields) for every event
/// kind and filter. Values are exchanged as text.
pub trait ConfigFields {
    fn config_names(&self) -> Vec<&'static str>;

    fn get_config(&self, name: &str) -> Option<String>;

    fn set_config(&mut self, name: &str, value: &str) -> Result<()>;

    /// All `(name, value)` pairs in declaration order.
    fn config_values(&self) -> Vec<(&'static str, String)> {
        self.config_names()
            .into_iter()
            .filter_map(|n| self.get_config(n).map(|v| (n, v)))
            .collect()
    }
}

/// A single attribute value convertible to and from text.
pub trait ConfigField: Sized {
    fn to_config(&self) -> String;
    fn from_config(text: &str) -> Option<Self>;
}

/// Implements [`ConfigField`] through `Display` and `FromStr`.
#[macro_export]
macro_rules! config_field_via_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::config::ConfigField for $ty {
                fn to_config(&self) -> String {
                    self.to_string()
                }
                fn from_config(text: &str) -> Option<Self> {
                    text.trim().parse().ok()
                }
            }
        )*
    };
}

config_field_via_str!(f64, f32, usize, u32, i32, i64);

impl ConfigField for String {
    fn to_config(&self) -> String {
        self.clone()
    }
    fn from_config(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl ConfigField for bool {
    fn to_config(&self) -> String {
        self.to_string()
    }
    fn from_config(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }
}

impl<T: ConfigField> ConfigField for Vec<T> {
    fn to_config(&self) -> String {
        self.iter().map(|v| v.to_config()).collect::<Vec<_>>().join(", ")
    }

    /// Comma- or whitespace-separated list. Any unparsable element fails the whole list.
    fn from_config(text: &str) -> Option<Self> {
        text.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(T::from_config)
            .collect()
    }
}

/// Implements [`ConfigFields`] for a struct from a list of its fields.
///
/// ```ignore
/// config_fields!(Wait { ms });
/// ```
#[macro_export]
macro_rules! config_fields {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::config::ConfigFields for $ty {
            fn config_names(&self) -> Vec<&'static str> {
                vec![$(stringify!($field)),*]
            }

            #[allow(unused_variables)]
            fn get_config(&self, name: &str) -> Option<String> {
                match name {
                    $(stringify!($field) => Some($crate::config::ConfigField::to_config(&self.$field)),)*
                    _ => None,
                }
            }

            #[allow(unused_variables)]
            fn set_config(&mut self, name: &str, value: &str) -> $crate::error::Result<()> {
                match name {
                    $(stringify!($field) => {
                        self.$field = $crate::config::ConfigField::from_config(value).ok_or_else(|| {
                            $crate::error::TerapyError::ConfigParseError(format!(
                                "invalid value \"{}\" for {}",
                                value, name
                            ))
                        })?;
                        Ok(())
                    })*
                    _ => Err($crate::error::TerapyError::ConfigParseError(format!(
                        "unknown attribute {}",
                        name
                    ))),
                }
            }
        }
    };
}

/// Applies every `(name, value)` pair, logging and skipping the ones that fail.
pub fn apply_config<C: ConfigFields + ?Sized>(target: &mut C, values: &[(String, String)]) -> usize {
    let mut failures = 0;
    for (name, value) in values {
        if let Err(err) = target.set_config(name, value) {
            log::warn!("{err}");
            failures += 1;
        }
    }
    failures
}

pub(crate) fn parse_error(what: impl Into<String>) -> TerapyError {
    TerapyError::ConfigParseError(what.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Detector {
        gain: f64,
        samples: usize,
        enabled: bool,
        label: String,
        positions: Vec<f64>,
    }

    config_fields!(Detector {
        gain,
        samples,
        enabled,
        label,
        positions
    });

    #[test]
    fn fields_round_trip_by_name() {
        let mut detector = Detector::default();
        detector.set_config("gain", "2.5").unwrap();
        detector.set_config("samples", "7").unwrap();
        detector.set_config("enabled", "True").unwrap();
        detector.set_config("label", "lock-in").unwrap();
        detector.set_config("positions", "1, 2.5 4").unwrap();
        assert_eq!(detector.positions, vec![1.0, 2.5, 4.0]);
        assert_eq!(detector.get_config("positions").unwrap(), "1, 2.5, 4");

        let mut copy = Detector::default();
        let values: Vec<(String, String)> = detector
            .config_values()
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        assert_eq!(apply_config(&mut copy, &values), 0);
        assert_eq!(copy.gain, 2.5);
        assert_eq!(copy.samples, 7);
        assert!(copy.enabled);
        assert_eq!(copy.label, "lock-in");
    }

    #[test]
    fn bad_values_are_reported() {
        let mut detector = Detector::default();
        assert!(matches!(
            detector.set_config("samples", "many"),
            Err(TerapyError::ConfigParseError(_))
        ));
        assert!(detector.set_config("nonexistent", "1").is_err());
        assert!(detector.set_config("positions", "1, x").is_err());
    }

    #[test]
    fn default_unit_changes_are_published() {
        let ctx = CoreContext::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        ctx.bus.subscribe(topics::DEFAULT_UNITS_CHANGED, move |m| {
            if let Message::Units(u) = m {
                assert_eq!(u.get(Dimension::Time).to_string(), "fs");
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ctx.set_default_unit(Dimension::Time, UnitQuantity::parse("fs").unwrap())
            .unwrap();
        assert!(ctx
            .set_default_unit(Dimension::Time, UnitQuantity::parse("V").unwrap())
            .is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settings_units_seed_the_defaults() {
        let settings = CoreSettings {
            units: vec![
                ("time".into(), "fs".into()),
                ("mass".into(), "kg".into()),
            ],
            ..CoreSettings::default()
        };
        let ctx = CoreContext::new(settings);
        assert_eq!(ctx.default_units().get(Dimension::Time).to_string(), "fs");
    }

    #[test]
    fn tags_may_be_absent() {
        let ctx = CoreContext::default();
        assert_eq!(ctx.tag("missing"), None);
        ctx.store_tag("peak", 1.5);
        assert_eq!(ctx.tag("peak"), Some(1.5));
    }
}

//! This module provides the `Filter` trait and related structures for managing filters and their configuration.
//! Filters transform one-dimensional `DataArray`s and report how they change the units of the array.
//! It also implements a global, thread-safe registry that every filter type adds itself to at start-up.

use crate::config::{apply_config, ConfigFields};
use crate::data_container::DataArray;
use crate::error::Result;
use crate::units::AxisInfo;
#[allow(unused_imports)] // this dependency is required by the `register_filter` macro
use downcast_rs::{impl_downcast, Downcast};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, Weak};

/// The `Filter` trait defines the structure and behavior of a post-processing filter.
///
/// Filters must implement:
/// - A `new` function to initialize a filter with default parameters.
/// - A `config` function to provide metadata and the role of the filter.
/// - An `apply` function that transforms a `DataArray` in place.
/// - A `get_units` function that maps input units to output units without touching data.
///
/// The persisted attributes come from [`ConfigFields`], usually through the
/// `config_fields!` macro. Filters live in the `src/filters` directory and are
/// registered with the `register_filter` attribute, which also provides the
/// [`FilterClass`] implementation.
///
/// **Example**:
/// ```ignore
/// #[register_filter]
/// #[derive(Clone, Debug)]
/// pub struct Scale {
///     factor: f64,
/// }
///
/// config_fields!(Scale { factor });
///
/// impl Filter for Scale {
///     fn new() -> Self { Scale { factor: 1.0 } }
///
///     fn config(&self) -> FilterConfig {
///         FilterConfig {
///             name: "Scale".to_string(),
///             description: "Multiplies the signal by a constant.".to_string(),
///             hyperlink: None,
///             role: FilterRole::Generic,
///         }
///     }
///
///     fn apply(&mut self, array: &mut DataArray) -> Result<()> {
///         array.data.mapv_inplace(|v| v * self.factor);
///         Ok(())
///     }
/// }
/// ```
pub trait Filter: Send + Sync + Debug + CloneBoxedFilter + FilterClass + ConfigFields + Downcast {
    /// Creates a new instance of the filter with default parameters.
    fn new() -> Self
    where
        Self: Sized;

    /// Returns the filter configuration, including name, description and role.
    fn config(&self) -> FilterConfig;

    /// Transforms `array` in place.
    ///
    /// The bank updates the unit labels afterwards from [`Filter::get_units`],
    /// so `apply` only needs to touch coordinates and data.
    fn apply(&mut self, array: &mut DataArray) -> Result<()>;

    /// Output units for the given input units: the axes followed by the input quantity.
    ///
    /// Must be pure. The default keeps the units unchanged.
    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        units.to_vec()
    }

    /// Lets the user edit the filter through `dialog`. Returns `false` if the
    /// dialog was cancelled or a value was rejected.
    fn set(&mut self, dialog: &mut dyn FilterDialog) -> bool {
        let title = self.config().name;
        let fields = self.config_values();
        match dialog.edit(&title, &fields) {
            Some(values) => apply_config(self, &values) == 0,
            None => false,
        }
    }

    /// Hands a reference array to a reference-consuming filter.
    fn set_reference(&mut self, _reference: Option<DataArray>) {}

    /// The reference array currently held, if any.
    fn reference(&self) -> Option<&DataArray> {
        None
    }

    /// The history array the reference is computed from.
    fn reference_source(&self) -> Option<Arc<DataArray>> {
        None
    }

    fn set_reference_source(&mut self, _source: Weak<DataArray>) {}

    fn is_pre_filter(&self) -> bool {
        self.config().role == FilterRole::PreFilter
    }

    fn is_transform(&self) -> bool {
        self.config().role == FilterRole::Transform
    }

    fn is_reference(&self) -> bool {
        self.config().role == FilterRole::Reference
    }
}
impl_downcast!(Filter);

/// The class name a filter is registered and persisted under.
///
/// Implemented by the `register_filter` attribute.
pub trait FilterClass {
    fn class_name(&self) -> &'static str;
}

/// What place a filter may take in a bank.
///
/// # Variants
/// - `PreFilter`: must run before any domain transform (windowing, padding).
/// - `Transform`: changes the domain of the array (Fourier transforms).
/// - `Reference`: consumes a reference array; at most one per bank.
/// - `Generic`: no ordering constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRole {
    PreFilter,
    Transform,
    Reference,
    Generic,
}

/// A structure representing the configuration and metadata of a filter.
///
/// # Fields
/// - `name`: A human-readable name for the filter.
/// - `description`: A detailed description of what the filter does.
/// - `hyperlink`: Optional DOI or reference link with label.
/// - `role`: Where the filter may be placed, represented as a `FilterRole`.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub name: String,
    pub description: String,
    pub hyperlink: Option<(Option<String>, String)>, // (optional_label, url)
    pub role: FilterRole,
}

/// Configuration dialog collaborator used by [`Filter::set`].
pub trait FilterDialog {
    /// Presents `fields` as `(attribute, current value)` pairs and returns the
    /// edited pairs, or `None` if the user cancelled.
    fn edit(&mut self, title: &str, fields: &[(&'static str, String)]) -> Option<Vec<(String, String)>>;
}

/// A trait to allow cloning of boxed filters.
/// This is necessary because `Box<dyn Filter>` cannot be cloned directly.
pub trait CloneBoxedFilter {
    fn clone_box(&self) -> Box<dyn Filter>;
}

impl<T> CloneBoxedFilter for T
where
    T: 'static + Filter + Clone,
{
    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Box<dyn Filter> {
        self.as_ref().clone_box()
    }
}

/// A registry to manage and retrieve registered filters.
///
/// The `FilterRegistry` provides functionality to:
/// - Register new filters.
/// - Retrieve filter prototypes by class name.
///
/// **Example**:
/// ```ignore
/// use crate::filters::filter::{FilterRegistry, FILTER_REGISTRY};
///
/// FilterRegistry::register_filter::<FourierTransform>();
///
/// if let Some(filter) = FILTER_REGISTRY.lock().unwrap().get_filter("FourierTransform") {
///     println!("Filter found: {:?}", filter);
/// }
/// ```
#[derive(Debug)]
pub struct FilterRegistry {
    pub filters: HashMap<String, Box<dyn Filter>>,
}

impl FilterRegistry {
    /// Registers a new filter of type `F` into the global registry.
    ///
    /// A filter registered twice keeps the latest prototype.
    pub fn register_filter<F: Filter + 'static>() {
        let filter_instance = F::new();
        let class = filter_instance.class_name().to_string();
        let mut registry = FILTER_REGISTRY.lock().unwrap_or_else(|p| p.into_inner());
        registry.filters.insert(class, Box::new(filter_instance));
    }

    /// Retrieves a registered filter by its class name.
    pub fn get_filter(&self, class: &str) -> Option<&Box<dyn Filter>> {
        self.filters.get(class)
    }

    /// Copy of every registered prototype, keyed by class name.
    pub fn snapshot() -> HashMap<String, Box<dyn Filter>> {
        crate::filters::register_builtin();
        let registry = FILTER_REGISTRY.lock().unwrap_or_else(|p| p.into_inner());
        registry.filters.clone()
    }
}

impl<'a> IntoIterator for &'a FilterRegistry {
    type Item = &'a Box<dyn Filter>;
    type IntoIter = std::collections::hash_map::Values<'a, String, Box<dyn Filter>>;

    fn into_iter(self) -> Self::IntoIter {
        self.filters.values()
    }
}

/// A global, thread-safe filter registry.
///
/// This allows filters to be registered and accessed globally, across threads.
pub static FILTER_REGISTRY: Lazy<Mutex<FilterRegistry>> = Lazy::new(|| {
    Mutex::new(FilterRegistry {
        filters: HashMap::new(),
    })
});

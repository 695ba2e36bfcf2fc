use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::{set_trace, trace_len, trace_values};
use crate::math_tools::interpolate_complex;
use crate::units::{AxisInfo, UnitQuantity};
use filter_macros::register_filter;
use std::sync::{Arc, Weak};

/// Divides the trace by the reference trace.
///
/// The trace is interpolated onto the coordinates of the reference, so the
/// output lives on the reference grid. The result is dimensionless.
#[register_filter]
#[derive(Clone, Debug)]
pub struct Normalize {
    reference: Option<DataArray>,
    source: Weak<DataArray>,
}

config_fields!(Normalize {});

impl Filter for Normalize {
    fn new() -> Self
    where
        Self: Sized,
    {
        Normalize {
            reference: None,
            source: Weak::new(),
        }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Normalize".to_string(),
            description: "Divides the signal by a reference signal processed by the same filters."
                .to_string(),
            hyperlink: None,
            role: FilterRole::Reference,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        trace_len(array, "Normalize")?;
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| TerapyError::filter("Normalize", "no reference selected"))?;
        trace_len(reference, "Normalize")?;
        let at = reference.coords[0].clone();
        let signal = interpolate_complex(&array.coords[0], &trace_values(array), &at)?;
        let values = &signal / &trace_values(reference);
        set_trace(array, at, values);
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let mut units = units.to_vec();
        if let Some(input) = units.last_mut() {
            *input = AxisInfo::new("Transmission", UnitQuantity::dimensionless());
        }
        units
    }

    fn set_reference(&mut self, reference: Option<DataArray>) {
        self.reference = reference;
    }

    fn reference(&self) -> Option<&DataArray> {
        self.reference.as_ref()
    }

    fn reference_source(&self) -> Option<Arc<DataArray>> {
        self.source.upgrade()
    }

    fn set_reference_source(&mut self, source: Weak<DataArray>) {
        self.source = source;
    }
}

/// Subtracts the reference trace, interpolated onto the coordinates of the trace.
#[register_filter]
#[derive(Clone, Debug)]
pub struct SubtractReference {
    reference: Option<DataArray>,
    source: Weak<DataArray>,
}

config_fields!(SubtractReference {});

impl Filter for SubtractReference {
    fn new() -> Self
    where
        Self: Sized,
    {
        SubtractReference {
            reference: None,
            source: Weak::new(),
        }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Subtract reference".to_string(),
            description: "Subtracts a reference signal processed by the same filters.".to_string(),
            hyperlink: None,
            role: FilterRole::Reference,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        trace_len(array, "SubtractReference")?;
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| TerapyError::filter("SubtractReference", "no reference selected"))?;
        trace_len(reference, "SubtractReference")?;
        let at = array.coords[0].clone();
        let background = interpolate_complex(&reference.coords[0], &trace_values(reference), &at)?;
        let values = &trace_values(array) - &background;
        set_trace(array, at, values);
        Ok(())
    }

    fn set_reference(&mut self, reference: Option<DataArray>) {
        self.reference = reference;
    }

    fn reference(&self) -> Option<&DataArray> {
        self.reference.as_ref()
    }

    fn reference_source(&self) -> Option<Arc<DataArray>> {
        self.source.upgrade()
    }

    fn set_reference_source(&mut self, source: Weak<DataArray>) {
        self.source = source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::IxDyn;

    fn trace(coords: Vec<f64>, values: Vec<f64>) -> DataArray {
        DataArray::from_trace(coords, values, AxisInfo::parse("Frequency", "THz"), AxisInfo::parse("Signal", "V*ps"))
    }

    #[test]
    fn normalize_requires_a_reference() {
        let mut array = trace(vec![0.0, 1.0], vec![1.0, 2.0]);
        assert!(Normalize::new().apply(&mut array).is_err());
    }

    #[test]
    fn normalize_divides_on_the_reference_grid() {
        let mut filter = Normalize::new();
        filter.set_reference(Some(trace(vec![0.5, 1.5], vec![2.0, 4.0])));
        let mut array = trace(vec![0.0, 1.0, 2.0], vec![0.0, 2.0, 4.0]);
        filter.apply(&mut array).unwrap();
        assert_eq!(array.coords[0].to_vec(), vec![0.5, 1.5]);
        assert_relative_eq!(array.data[IxDyn(&[0])].re, 0.5);
        assert_relative_eq!(array.data[IxDyn(&[1])].re, 0.75);
        let units = filter.get_units(&array.units());
        assert!(units[1].units.is_dimensionless());
    }

    #[test]
    fn subtraction_keeps_the_trace_grid() {
        let mut filter = SubtractReference::new();
        filter.set_reference(Some(trace(vec![0.0, 2.0], vec![1.0, 3.0])));
        let mut array = trace(vec![0.0, 1.0, 2.0], vec![5.0, 5.0, 5.0]);
        filter.apply(&mut array).unwrap();
        assert_eq!(array.real_values(), vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn reference_source_is_weak() {
        let mut filter = Normalize::new();
        let source = Arc::new(trace(vec![0.0], vec![1.0]));
        filter.set_reference_source(Arc::downgrade(&source));
        assert!(filter.reference_source().is_some());
        drop(source);
        assert!(filter.reference_source().is_none());
    }
}

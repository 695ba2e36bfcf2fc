use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::Result;
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::trace_len;
use crate::math_tools::numpy_unwrap;
use crate::units::{AxisInfo, UnitQuantity};
use filter_macros::register_filter;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;
use std::f64::consts::PI;

/// Replaces a complex spectrum by its continuous phase.
///
/// A trace that is already real (for instance the output of a Fourier
/// transform in phase mode) is taken as a wrapped phase.
#[register_filter]
#[derive(Clone, Debug)]
pub struct PhaseUnwrap {}

config_fields!(PhaseUnwrap {});

impl Filter for PhaseUnwrap {
    fn new() -> Self
    where
        Self: Sized,
    {
        PhaseUnwrap {}
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Unwrap phase".to_string(),
            description: "Removes the 2π jumps of the spectral phase.".to_string(),
            hyperlink: None,
            role: FilterRole::Generic,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let n = trace_len(array, "PhaseUnwrap")?;
        let real = array.data.iter().all(|v| v.im == 0.0);
        let wrapped: Vec<f64> = array
            .data
            .iter()
            .map(|v| if real { v.re } else { v.arg() })
            .collect();
        let phase = numpy_unwrap(&wrapped, Some(2.0 * PI));
        array.data = ArrayD::from_shape_fn(IxDyn(&[n]), |i| Complex64::new(phase[i[0]], 0.0));
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let mut units = units.to_vec();
        if let Some(input) = units.last_mut() {
            *input = AxisInfo::new("Phase", UnitQuantity::dimensionless());
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn linear_phase_becomes_continuous() {
        let coords = Array1::linspace(0.1, 2.0, 20);
        let values = coords.mapv(|f| Complex64::from_polar(2.0, -4.0 * f));
        let mut array = DataArray::from_complex_trace(
            coords.clone(),
            values,
            AxisInfo::parse("Frequency", "THz"),
            AxisInfo::parse("Signal", "V*ps"),
        );
        PhaseUnwrap::new().apply(&mut array).unwrap();
        for (phase, f) in array.real_values().iter().zip(coords.iter()) {
            assert_relative_eq!(*phase, -4.0 * f, epsilon = 1e-9);
        }
        let units = PhaseUnwrap::new().get_units(&array.units());
        assert_eq!(units[1].name, "Phase");
    }
}

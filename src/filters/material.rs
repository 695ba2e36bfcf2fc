//! Material parameters from a normalized transmission spectrum.
//!
//! Both filters expect the output of a `Normalize` filter: the complex
//! transmission `T(f) = E_sample(f) / E_reference(f)` on a frequency axis.
//! A sample of thickness `d` delays the pulse, so the unwrapped phase of `T`
//! is `φ = -2π f (n - 1) d / c`.

use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::trace_len;
use crate::math_tools::numpy_unwrap;
use crate::units::{AxisInfo, Dimension, UnitQuantity};
use filter_macros::register_filter;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Speed of light in vacuum, m/s.
const C: f64 = 299_792_458.0;

/// Frequencies of the trace in Hz.
fn frequencies_hz(array: &DataArray, filter: &str) -> Result<Vec<f64>> {
    let units = &array.axes[0].units;
    if units.dimensionality().base != [-1, 0, 0, 0] {
        return Err(TerapyError::filter(
            filter,
            format!("expected a frequency axis, got {}", units),
        ));
    }
    let scale = units.si_factor();
    Ok(array.coords[0].iter().map(|f| f * scale).collect())
}

/// Refractive index per frequency for a sample `thickness_mm` thick.
///
/// A real trace is taken as an already unwrapped phase.
fn refractive_index(array: &DataArray, thickness_mm: f64, filter: &str) -> Result<Vec<f64>> {
    trace_len(array, filter)?;
    if thickness_mm <= 0.0 {
        return Err(TerapyError::filter(filter, "the thickness must be positive"));
    }
    let f = frequencies_hz(array, filter)?;
    let real = array.data.iter().all(|v| v.im == 0.0);
    let phase = if real {
        array.real_values()
    } else {
        let wrapped: Vec<f64> = array.data.iter().map(|v| v.arg()).collect();
        numpy_unwrap(&wrapped, Some(2.0 * PI))
    };
    let d = thickness_mm * 1e-3;
    Ok(phase
        .iter()
        .zip(f.iter())
        .map(|(phi, f)| 1.0 - C * phi / (2.0 * PI * f * d))
        .collect())
}

/// Refractive index of a slab from its transmission phase.
#[register_filter]
#[derive(Clone, Debug)]
pub struct RefractiveIndex {
    /// Sample thickness in mm.
    pub thickness: f64,
}

config_fields!(RefractiveIndex { thickness });

impl Filter for RefractiveIndex {
    fn new() -> Self
    where
        Self: Sized,
    {
        RefractiveIndex { thickness: 1.0 }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Refractive index".to_string(),
            description: "Computes the refractive index of a slab from the transmission phase."
                .to_string(),
            hyperlink: Some((
                Some("Duvillaret et al., IEEE JSTQE 2, 739 (1996)".to_string()),
                "https://doi.org/10.1109/2944.571775".to_string(),
            )),
            role: FilterRole::Generic,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let n = refractive_index(array, self.thickness, "RefractiveIndex")?;
        array.data = array
            .data
            .indexed_iter()
            .map(|(i, _)| Complex64::new(n[i[0]], 0.0))
            .collect::<ndarray::Array1<_>>()
            .into_dyn();
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let mut units = units.to_vec();
        if let Some(input) = units.last_mut() {
            *input = AxisInfo::new("Refractive index", UnitQuantity::dimensionless());
        }
        units
    }
}

/// Power absorption coefficient of a slab, in 1/cm.
///
/// With `fresnel` set the transmission is corrected for the reflection losses
/// at both faces, using the refractive index obtained from the phase.
#[register_filter]
#[derive(Clone, Debug)]
pub struct Absorption {
    /// Sample thickness in mm.
    pub thickness: f64,
    pub fresnel: bool,
}

config_fields!(Absorption { thickness, fresnel });

impl Filter for Absorption {
    fn new() -> Self
    where
        Self: Sized,
    {
        Absorption {
            thickness: 1.0,
            fresnel: true,
        }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Absorption".to_string(),
            description: "Computes the power absorption coefficient of a slab.".to_string(),
            hyperlink: None,
            role: FilterRole::Generic,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let index = if self.fresnel {
            Some(refractive_index(array, self.thickness, "Absorption")?)
        } else {
            trace_len(array, "Absorption")?;
            None
        };
        if self.thickness <= 0.0 {
            return Err(TerapyError::filter("Absorption", "the thickness must be positive"));
        }
        let d_cm = self.thickness * 0.1;
        let values: Vec<Complex64> = array
            .data
            .iter()
            .enumerate()
            .map(|(k, t)| {
                let fresnel = index
                    .as_ref()
                    .map(|n| (n[k] + 1.0).powi(2) / (4.0 * n[k]))
                    .unwrap_or(1.0);
                Complex64::new(-2.0 / d_cm * (t.norm() * fresnel).ln(), 0.0)
            })
            .collect();
        array.data = ndarray::Array1::from(values).into_dyn();
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let mut units = units.to_vec();
        if let Some(input) = units.last_mut() {
            *input = AxisInfo::new("Absorption", UnitQuantity::base(Dimension::Length, -2).inverse());
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    /// Transmission of a lossless slab with index `n`, thickness `d_mm`, no Fresnel losses.
    fn slab(n: f64, d_mm: f64, amplitude: f64) -> DataArray {
        let f = Array1::linspace(0.2, 2.0, 10);
        let t = f.mapv(|f| Complex64::from_polar(amplitude, -2.0 * PI * f * 1e12 * (n - 1.0) * d_mm * 1e-3 / C));
        DataArray::from_complex_trace(
            f,
            t,
            AxisInfo::parse("Frequency", "THz"),
            AxisInfo::dimensionless("Transmission"),
        )
    }

    #[test]
    fn index_is_recovered_from_the_phase() {
        let mut array = slab(1.5, 0.5, 1.0);
        let mut filter = RefractiveIndex { thickness: 0.5 };
        filter.apply(&mut array).unwrap();
        for n in array.real_values() {
            assert_relative_eq!(n, 1.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn absorption_without_fresnel_is_the_amplitude_decay() {
        let mut array = slab(1.5, 1.0, (-0.5f64).exp());
        let mut filter = Absorption {
            thickness: 1.0,
            fresnel: false,
        };
        filter.apply(&mut array).unwrap();
        for alpha in array.real_values() {
            assert_relative_eq!(alpha, 10.0, epsilon = 1e-9);
        }
        let units = filter.get_units(&array.units());
        assert_eq!(units[1].units.to_string(), "1/cm");
    }

    #[test]
    fn time_axis_is_rejected() {
        let mut array = slab(1.5, 1.0, 1.0);
        array.axes[0] = AxisInfo::parse("Delay", "ps");
        assert!(RefractiveIndex::new().apply(&mut array).is_err());
    }
}

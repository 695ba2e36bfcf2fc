//! Forward and inverse Fourier transforms of real time traces.
//!
//! The forward transform keeps the strictly positive frequencies below Nyquist,
//! `k = 1..=(n-1)/2`, scales by the sample spacing so that the amplitude does
//! not depend on the trace length, and removes the phase caused by a time axis
//! that does not start at zero.

use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::{set_trace, trace_len, trace_values};
use crate::math_tools::uniform_step;
use crate::units::{AxisInfo, UnitQuantity};
use filter_macros::register_filter;
use ndarray::Array1;
use num_complex::Complex64;
use realfft::RealFftPlanner;
use std::f64::consts::PI;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Which part of the spectrum the forward transform keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumMode {
    Complex,
    Amplitude,
    Phase,
}

impl Display for SpectrumMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SpectrumMode::Complex => write!(f, "complex"),
            SpectrumMode::Amplitude => write!(f, "amplitude"),
            SpectrumMode::Phase => write!(f, "phase"),
        }
    }
}

impl FromStr for SpectrumMode {
    type Err = TerapyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complex" => Ok(SpectrumMode::Complex),
            "amplitude" | "abs" => Ok(SpectrumMode::Amplitude),
            "phase" | "angle" => Ok(SpectrumMode::Phase),
            other => Err(TerapyError::ConfigParseError(format!(
                "unknown spectrum mode {other}"
            ))),
        }
    }
}

crate::config_field_via_str!(SpectrumMode);

/// Time trace to spectrum.
#[register_filter]
#[derive(Clone, Debug)]
pub struct FourierTransform {
    pub mode: SpectrumMode,
}

config_fields!(FourierTransform { mode });

impl Filter for FourierTransform {
    fn new() -> Self
    where
        Self: Sized,
    {
        FourierTransform {
            mode: SpectrumMode::Complex,
        }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Fourier transform".to_string(),
            description: "Transforms a real time trace into its positive-frequency spectrum."
                .to_string(),
            hyperlink: None,
            role: FilterRole::Transform,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let n = trace_len(array, "FourierTransform")?;
        let m = n.saturating_sub(1) / 2;
        if m == 0 {
            return Err(TerapyError::filter(
                "FourierTransform",
                format!("{n} samples are not enough for a spectrum"),
            ));
        }
        let dt = uniform_step(&array.coords[0])
            .ok_or_else(|| TerapyError::filter("FourierTransform", "invalid time axis"))?;
        let t0 = array.coords[0][0];

        let mut real_planner = RealFftPlanner::<f64>::new();
        let r2c = real_planner.plan_fft_forward(n);
        let mut input: Vec<f64> = array
            .data
            .iter()
            .map(|v| if v.re.is_finite() { v.re } else { 0.0 })
            .collect();
        let mut spectrum = r2c.make_output_vec();
        r2c.process(&mut input, &mut spectrum)
            .map_err(|e| TerapyError::filter("FourierTransform", e.to_string()))?;

        let frequency = Array1::from_iter((1..=m).map(|k| k as f64 / (n as f64 * dt)));
        let values = Array1::from_iter((1..=m).map(|k| {
            let f = frequency[k - 1];
            let v = spectrum[k] * dt * Complex64::from_polar(1.0, -2.0 * PI * f * t0);
            match self.mode {
                SpectrumMode::Complex => v,
                SpectrumMode::Amplitude => Complex64::new(v.norm(), 0.0),
                SpectrumMode::Phase => Complex64::new(v.arg(), 0.0),
            }
        }));
        set_trace(array, frequency, values);
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let [axis, input] = units else {
            return units.to_vec();
        };
        let frequency = AxisInfo::new("Frequency", axis.units.inverse());
        let input = match self.mode {
            SpectrumMode::Phase => AxisInfo::new("Phase", UnitQuantity::dimensionless()),
            _ => AxisInfo::new(input.name.clone(), &input.units * &axis.units),
        };
        vec![frequency, input]
    }
}

/// Positive-frequency spectrum back to a real time trace.
///
/// The spectrum is assumed to hold the bins `1..=m` of a trace of length
/// `2(m + 1)` as produced by [`FourierTransform`] in complex mode. The DC and
/// Nyquist bins are set to zero and the time axis starts at zero.
#[register_filter]
#[derive(Clone, Debug)]
pub struct InverseFourierTransform {}

config_fields!(InverseFourierTransform {});

impl Filter for InverseFourierTransform {
    fn new() -> Self
    where
        Self: Sized,
    {
        InverseFourierTransform {}
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Inverse Fourier transform".to_string(),
            description: "Transforms a positive-frequency spectrum back into a time trace."
                .to_string(),
            hyperlink: None,
            role: FilterRole::Transform,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let m = trace_len(array, "InverseFourierTransform")?;
        let df = uniform_step(&array.coords[0])
            .ok_or_else(|| TerapyError::filter("InverseFourierTransform", "invalid frequency axis"))?;
        let n = 2 * (m + 1);
        let dt = 1.0 / (n as f64 * df);

        let mut real_planner = RealFftPlanner::<f64>::new();
        let c2r = real_planner.plan_fft_inverse(n);
        let mut spectrum = c2r.make_input_vec();
        for (bin, v) in spectrum.iter_mut().skip(1).zip(trace_values(array).iter()) {
            *bin = if v.is_finite() { *v / dt } else { Complex64::new(0.0, 0.0) };
        }
        let mut output = c2r.make_output_vec();
        c2r.process(&mut spectrum, &mut output)
            .map_err(|e| TerapyError::filter("InverseFourierTransform", e.to_string()))?;

        let time = Array1::from_iter((0..n).map(|j| j as f64 * dt));
        let values = Array1::from_iter(output.iter().map(|v| Complex64::new(v / n as f64, 0.0)));
        set_trace(array, time, values);
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let [axis, input] = units else {
            return units.to_vec();
        };
        let time = AxisInfo::new("Delay", axis.units.inverse());
        let input = AxisInfo::new(input.name.clone(), &input.units * &axis.units);
        vec![time, input]
    }
}

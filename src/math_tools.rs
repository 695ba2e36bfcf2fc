//! This module provides various windowing functions for signal processing, including Blackman, Hanning, Hamming,
//! Flat Top windows, and an adapted Blackman window implementation. Additionally, it includes utilities for
//! unwrapping phase ranges, estimating sample spacing and interpolating complex traces.

use crate::error::{Result, TerapyError};
use interp1d::Interp1d;
use ndarray::{Array1, ArrayViewMut1, Zip};
use num_complex::Complex64;
use std::f64::consts::PI;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Enum representing the different types of FFT window functions supported.
///
/// These window functions can be applied to signals for spectral analysis.
/// The type determines the nature of the windowing used during FFT computation.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum FftWindowType {
    /// Adapted Blackman window with only the beginning and ending being altered.
    AdaptedBlackman,
    /// Original Blackman window
    Blackman,
    /// Hanning window
    Hanning,
    /// Hamming window
    Hamming,
    /// FlatTop
    FlatTop,
}

impl Display for FftWindowType {
    /// Provides the name used in filter config files.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FftWindowType::AdaptedBlackman => write!(f, "adapted_blackman"),
            FftWindowType::Blackman => write!(f, "blackman"),
            FftWindowType::Hanning => write!(f, "hanning"),
            FftWindowType::Hamming => write!(f, "hamming"),
            FftWindowType::FlatTop => write!(f, "flat_top"),
        }
    }
}

impl FromStr for FftWindowType {
    type Err = TerapyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "adapted_blackman" => Ok(FftWindowType::AdaptedBlackman),
            "blackman" => Ok(FftWindowType::Blackman),
            "hanning" | "hann" => Ok(FftWindowType::Hanning),
            "hamming" => Ok(FftWindowType::Hamming),
            "flat_top" | "flattop" => Ok(FftWindowType::FlatTop),
            other => Err(TerapyError::ConfigParseError(format!("unknown window {other}"))),
        }
    }
}

crate::config_field_via_str!(FftWindowType);

/// Computes the Blackman window value for a given sample.
///
/// The implementation follows the mathematical definition as used by Python's numpy library.
///
/// # Arguments
/// - `n`: The current time or sample index.
/// - `m`: The total length of the signal.
///
/// # Returns
/// The computed value of the Blackman window. It automatically clamps the value in the range [0.0, 1.0].
fn blackman_window(n: f64, m: f64) -> f64 {
    // blackman window as implemented by numpy (python)
    let res = 0.42 - 0.5 * (2.0 * PI * n / m).cos() + 0.08 * (4.0 * PI * n / m).cos();
    if res.is_nan() {
        1.0
    } else {
        res.clamp(0.0, 1.0)
    }
}

/// Applies the adapted Blackman window to a signal's time series.
///
/// The window is adjusted with specific lower and upper bounds. It attenuates
/// the starting and ending portions of the signal's amplitude using Blackman window values.
///
/// # Arguments
/// - `signal`: A mutable view of the signal to which the window will be applied.
/// - `time`: The corresponding time values for the signal.
/// - `lower_bound`: The lower bound for the Blackman window.
/// - `upper_bound`: The upper bound for the Blackman window.
pub fn apply_adapted_blackman_window(
    signal: &mut ArrayViewMut1<Complex64>,
    time: &Array1<f64>,
    lower_bound: f64,
    upper_bound: f64,
) {
    if time.is_empty() {
        return;
    }
    let first = time[0];
    let last = time[time.len() - 1];
    for (s, t) in signal.iter_mut().zip(time.iter()) {
        if *t <= lower_bound + first {
            // first half of blackman
            *s *= blackman_window(t - first, 2.0 * lower_bound);
        } else if *t >= last - upper_bound {
            // second half of blackman
            *s *= blackman_window(t - (last - upper_bound * 2.0), 2.0 * upper_bound);
        }
    }
}

/// Normalizes a time array to the range [0, 1].
fn normalize_time(time: &Array1<f64>) -> Array1<f64> {
    let min = time.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = time.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if max > min {
        time.mapv(|t| (t - min) / (max - min))
    } else {
        Array1::zeros(time.len())
    }
}

/// Applies the Hamming window to the given signal.
pub fn apply_hamming(signal: &mut ArrayViewMut1<Complex64>, time: &Array1<f64>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 0.54 - 0.46 * (2.0 * PI * t).cos();
    });
}

/// Applies the Hanning (Hann) window to the given signal.
///
/// Well-suited for periodic signals, the Hanning window reduces discontinuities
/// at the boundaries of signal segments.
pub fn apply_hanning(signal: &mut ArrayViewMut1<Complex64>, time: &Array1<f64>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 0.5 * (1.0 - (2.0 * PI * t).cos());
    });
}

/// Applies the Blackman window to the given signal.
pub fn apply_blackman(signal: &mut ArrayViewMut1<Complex64>, time: &Array1<f64>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 0.42 - 0.5 * (2.0 * PI * t).cos() + 0.08 * (4.0 * PI * t).cos();
    });
}

/// Applies the Flat Top window to the given signal.
///
/// The Flat Top window is used to provide a very flat passband response
/// for use in measurement applications.
pub fn apply_flat_top(signal: &mut ArrayViewMut1<Complex64>, time: &Array1<f64>) {
    let normalized_time = normalize_time(time);
    Zip::from(signal).and(&normalized_time).for_each(|s, t| {
        *s *= 1.0 - 1.93 * (2.0 * PI * t).cos() + 1.29 * (4.0 * PI * t).cos()
            - 0.388 * (6.0 * PI * t).cos()
            + 0.028 * (8.0 * PI * t).cos();
    });
}

/// Unwraps a periodic signal's values based on the provided period.
///
/// Removes phase discontinuities by adjusting the signal's values to fall within
/// a continuous range.
///
/// # Arguments
/// - `x`: The input signal as an array of values.
/// - `period`: Optional period of the signal. If not provided, it is estimated from the signal.
///
/// # Returns
/// A vector containing the unwrapped signal values.
pub fn numpy_unwrap(x: &[f64], period: Option<f64>) -> Vec<f64> {
    if x.len() < 2 {
        return x.to_vec();
    }
    let period = period.unwrap_or_else(|| {
        let diff_mean = x[1..]
            .iter()
            .zip(x.iter())
            .map(|(&a, &b)| a - b)
            .sum::<f64>()
            / (x.len() - 1) as f64;
        2.0 * PI / diff_mean
    });
    let mut unwrapped = x.to_owned();
    let mut prev_val = x[0];
    let mut prev_unwrapped = x[0];
    for i in 1..x.len() {
        let val = x[i];
        let mut diff = val - prev_val;
        if diff > period / 2.0 {
            diff -= period;
        } else if diff < -period / 2.0 {
            diff += period;
        }
        let unwrapped_val = prev_unwrapped + diff;
        prev_val = val;
        prev_unwrapped = unwrapped_val;
        unwrapped[i] = unwrapped_val;
    }
    unwrapped
}

/// Mean spacing of a sampled axis. Fails for fewer than two samples.
pub fn uniform_step(coords: &Array1<f64>) -> Option<f64> {
    let n = coords.len();
    if n < 2 {
        return None;
    }
    let step = (coords[n - 1] - coords[0]) / (n - 1) as f64;
    (step.is_finite() && step != 0.0).then_some(step)
}

fn same_grid(a: &Array1<f64>, b: &Array1<f64>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= 1e-12 * x.abs().max(y.abs()).max(1.0))
}

/// Linear interpolation of the complex trace `(x, y)` at `at`.
///
/// Real and imaginary parts are interpolated separately. Points outside the
/// sampled range take the value at the nearest end. Identical grids are copied.
pub fn interpolate_complex(
    x: &Array1<f64>,
    y: &Array1<Complex64>,
    at: &Array1<f64>,
) -> Result<Array1<Complex64>> {
    if same_grid(x, at) {
        return Ok(y.clone());
    }
    if x.is_empty() {
        return Err(TerapyError::filter("interpolation", "nothing to interpolate"));
    }
    let re = Interp1d::new_unsorted(x.to_vec(), y.iter().map(|v| v.re).collect())
        .map_err(|e| TerapyError::filter("interpolation", format!("{e:?}")))?;
    let im = Interp1d::new_unsorted(x.to_vec(), y.iter().map(|v| v.im).collect())
        .map_err(|e| TerapyError::filter("interpolation", format!("{e:?}")))?;
    let lo = x.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(lo <= hi) {
        return Err(TerapyError::filter("interpolation", "coordinates are not finite"));
    }
    Ok(at.mapv(|t| {
        let t = t.clamp(lo, hi);
        Complex64::new(re.interpolate(t), im.interpolate(t))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unwrap_removes_jumps() {
        let wrapped = vec![3.0, -3.1, -2.9];
        let unwrapped = numpy_unwrap(&wrapped, Some(2.0 * PI));
        assert_relative_eq!(unwrapped[1], -3.1 + 2.0 * PI, epsilon = 1e-12);
        assert_relative_eq!(unwrapped[2], -2.9 + 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn hanning_vanishes_at_edges() {
        let time = Array1::linspace(0.0, 1.0, 5);
        let mut signal = Array1::from_elem(5, Complex64::new(1.0, 0.0));
        apply_hanning(&mut signal.view_mut(), &time);
        assert_relative_eq!(signal[0].re, 0.0, epsilon = 1e-12);
        assert_relative_eq!(signal[2].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn adapted_blackman_keeps_the_centre() {
        let time = Array1::linspace(0.0, 10.0, 101);
        let mut signal = Array1::from_elem(101, Complex64::new(1.0, 0.0));
        apply_adapted_blackman_window(&mut signal.view_mut(), &time, 1.0, 1.0);
        assert_relative_eq!(signal[50].re, 1.0);
        assert!(signal[0].re < 1e-6);
    }

    #[test]
    fn window_names_round_trip() {
        for w in [
            FftWindowType::AdaptedBlackman,
            FftWindowType::Blackman,
            FftWindowType::Hanning,
            FftWindowType::Hamming,
            FftWindowType::FlatTop,
        ] {
            assert_eq!(w.to_string().parse::<FftWindowType>().unwrap(), w);
        }
    }

    #[test]
    fn interpolation_is_linear_between_samples() {
        let x = Array1::from(vec![0.0, 1.0, 2.0]);
        let y = Array1::from(vec![
            Complex64::new(0.0, 0.0),
            Complex64::new(2.0, -2.0),
            Complex64::new(4.0, -4.0),
        ]);
        let at = Array1::from(vec![0.5, 1.5]);
        let v = interpolate_complex(&x, &y, &at).unwrap();
        assert_relative_eq!(v[0].re, 1.0);
        assert_relative_eq!(v[1].im, -3.0);
        assert_eq!(uniform_step(&x), Some(1.0));
    }
}

//! Post-processing filters for terahertz time-domain spectroscopy traces.
//!
//! Filters operate on 1-D [`DataArray`]s and are chained in a
//! [`bank::FilterBank`]. Each filter has a role that fixes where it may appear
//! in a bank.
//!
//! # Filter Categories
//!
//! * **Pre-filters**: applied to the raw time trace before any domain transform
//!   (apodization, zero padding, baseline removal).
//!
//! * **Transforms**: change the domain of the trace (Fourier transforms).
//!
//! * **Reference filters**: combine the trace with a reference trace computed by
//!   the same bank (normalization, subtraction). At most one per bank.
//!
//! * **Generic filters**: no ordering constraint (cropping, unwrapping,
//!   material parameters, derivative).

use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::FilterRegistry;
use ndarray::Array1;
use num_complex::Complex64;

/// Window functions applied before a Fourier transform.
pub mod apodization;

/// Ordered filter chains with parent/child topology.
pub mod bank;

/// Restriction of a trace to a coordinate range.
pub mod crop;

/// Numerical derivative along the coordinate axis.
pub mod derivative;

/// Core filter interfaces and shared components.
/// Defines the `Filter` trait and supporting structures used by all filter implementations.
pub mod filter;

/// Forward and inverse Fourier transforms between delay and frequency.
pub mod fourier;

/// Refractive index and absorption coefficient from a normalized spectrum.
pub mod material;

/// Reference filters: division by and subtraction of a reference trace.
pub mod normalize;

/// Continuous phase from a complex spectrum.
pub mod phase_unwrap;

/// Couples history arrays to the reference filters of filter banks.
pub mod reference;

/// Subtraction of the pre-pulse offset.
pub mod remove_baseline;

/// Extension of a trace with zeros to refine the frequency grid.
pub mod zero_padding;

/// Registers every filter of this crate in the global registry.
///
/// The `register_filter` attribute does this at start-up already; calling it
/// again is harmless and covers builds where the constructors were not linked.
pub(crate) fn register_builtin() {
    FilterRegistry::register_filter::<apodization::Apodization>();
    FilterRegistry::register_filter::<zero_padding::ZeroPadding>();
    FilterRegistry::register_filter::<remove_baseline::RemoveBaseline>();
    FilterRegistry::register_filter::<crop::Crop>();
    FilterRegistry::register_filter::<fourier::FourierTransform>();
    FilterRegistry::register_filter::<fourier::InverseFourierTransform>();
    FilterRegistry::register_filter::<normalize::Normalize>();
    FilterRegistry::register_filter::<normalize::SubtractReference>();
    FilterRegistry::register_filter::<phase_unwrap::PhaseUnwrap>();
    FilterRegistry::register_filter::<material::RefractiveIndex>();
    FilterRegistry::register_filter::<material::Absorption>();
    FilterRegistry::register_filter::<derivative::Derivative>();
}

/// Checks that `array` is a 1-D trace and returns its length.
pub(crate) fn trace_len(array: &DataArray, filter: &str) -> Result<usize> {
    if array.dimension() != 1 {
        return Err(TerapyError::filter(
            filter,
            format!("expected a 1-D array, got {} dimensions", array.dimension()),
        ));
    }
    Ok(array.shape[0])
}

/// The samples of a 1-D trace.
pub(crate) fn trace_values(array: &DataArray) -> Array1<Complex64> {
    array.data.iter().copied().collect()
}

/// Replaces the coordinates and samples of a 1-D trace.
pub(crate) fn set_trace(array: &mut DataArray, coords: Array1<f64>, values: Array1<Complex64>) {
    let n = coords.len();
    array.shape = vec![n];
    array.coords = vec![coords];
    array.data = values.into_dyn();
    array.idx = vec![0];
    array.scan_dim = 0;
}

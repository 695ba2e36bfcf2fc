use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::trace_len;
use crate::math_tools::{
    apply_adapted_blackman_window, apply_blackman, apply_flat_top, apply_hamming, apply_hanning,
    FftWindowType,
};
use filter_macros::register_filter;
use ndarray::Ix1;

/// Multiplies the time trace with a window function.
///
/// `width` is only used by the adapted Blackman window: it is the length (in
/// axis units) of the tapered region at either end of the trace.
#[register_filter]
#[derive(Clone, Debug)]
pub struct Apodization {
    pub window: FftWindowType,
    pub width: f64,
}

config_fields!(Apodization { window, width });

impl Filter for Apodization {
    fn new() -> Self
    where
        Self: Sized,
    {
        Apodization {
            window: FftWindowType::Hanning,
            width: 1.0,
        }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Apodization".to_string(),
            description: "Applies a window function to the time trace to reduce spectral leakage."
                .to_string(),
            hyperlink: Some((
                Some("Window function".to_string()),
                "https://en.wikipedia.org/wiki/Window_function".to_string(),
            )),
            role: FilterRole::PreFilter,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        trace_len(array, "Apodization")?;
        let time = array.coords[0].clone();
        let mut signal = array
            .data
            .view_mut()
            .into_dimensionality::<Ix1>()
            .map_err(|e| TerapyError::filter("Apodization", e.to_string()))?;
        match self.window {
            FftWindowType::AdaptedBlackman => {
                apply_adapted_blackman_window(&mut signal, &time, self.width, self.width)
            }
            FftWindowType::Blackman => apply_blackman(&mut signal, &time),
            FftWindowType::Hanning => apply_hanning(&mut signal, &time),
            FftWindowType::Hamming => apply_hamming(&mut signal, &time),
            FftWindowType::FlatTop => apply_flat_top(&mut signal, &time),
        }
        Ok(())
    }
}

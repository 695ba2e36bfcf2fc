use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::{set_trace, trace_len, trace_values};
use crate::math_tools::uniform_step;
use filter_macros::register_filter;
use ndarray::Array1;
use num_complex::Complex64;

/// Appends zeros to the time trace so that its length is multiplied by `factor`.
#[register_filter]
#[derive(Clone, Debug)]
pub struct ZeroPadding {
    pub factor: usize,
}

config_fields!(ZeroPadding { factor });

impl Filter for ZeroPadding {
    fn new() -> Self
    where
        Self: Sized,
    {
        ZeroPadding { factor: 2 }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Zero padding".to_string(),
            description: "Extends the trace with zeros to interpolate the spectrum.".to_string(),
            hyperlink: None,
            role: FilterRole::PreFilter,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let n = trace_len(array, "ZeroPadding")?;
        let factor = self.factor.max(1);
        if factor == 1 {
            return Ok(());
        }
        let dt = uniform_step(&array.coords[0])
            .ok_or_else(|| TerapyError::filter("ZeroPadding", "at least two samples are needed"))?;
        let t0 = array.coords[0][0];
        let len = n * factor;
        let coords = Array1::from_iter((0..len).map(|k| t0 + k as f64 * dt));
        let mut values = Array1::from_elem(len, Complex64::new(0.0, 0.0));
        values.slice_mut(ndarray::s![..n]).assign(&trace_values(array));
        set_trace(array, coords, values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::AxisInfo;
    use approx::assert_relative_eq;
    use ndarray::IxDyn;

    #[test]
    fn pads_with_zeros_on_an_extended_grid() {
        let mut array = DataArray::from_trace(
            vec![1.0, 1.5, 2.0],
            vec![4.0, 5.0, 6.0],
            AxisInfo::parse("Delay", "ps"),
            AxisInfo::parse("Signal", "V"),
        );
        let mut filter = ZeroPadding { factor: 3 };
        filter.apply(&mut array).unwrap();
        assert_eq!(array.shape, vec![9]);
        assert!(array.is_consistent());
        assert_relative_eq!(array.coords[0][8], 5.0);
        assert_relative_eq!(array.data[IxDyn(&[2])].re, 6.0);
        assert_relative_eq!(array.data[IxDyn(&[3])].re, 0.0);
    }
}

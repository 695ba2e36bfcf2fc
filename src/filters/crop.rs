use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::{set_trace, trace_len, trace_values};
use filter_macros::register_filter;
use ndarray::Array1;

/// Keeps the samples whose coordinate lies in `[min, max]`.
#[register_filter]
#[derive(Clone, Debug)]
pub struct Crop {
    pub min: f64,
    pub max: f64,
}

config_fields!(Crop { min, max });

impl Filter for Crop {
    fn new() -> Self
    where
        Self: Sized,
    {
        Crop {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Crop".to_string(),
            description: "Restricts the trace to a coordinate range.".to_string(),
            hyperlink: None,
            role: FilterRole::Generic,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        trace_len(array, "Crop")?;
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        let values = trace_values(array);
        let (coords, kept): (Vec<f64>, Vec<_>) = array.coords[0]
            .iter()
            .zip(values.iter())
            .filter(|(c, _)| **c >= lo && **c <= hi)
            .map(|(c, v)| (*c, *v))
            .unzip();
        if coords.is_empty() {
            return Err(TerapyError::filter(
                "Crop",
                format!("no samples left between {lo} and {hi}"),
            ));
        }
        set_trace(array, Array1::from(coords), Array1::from(kept));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::AxisInfo;

    fn trace() -> DataArray {
        DataArray::from_trace(
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
            vec![5.0, 6.0, 7.0, 8.0, 9.0],
            AxisInfo::parse("Frequency", "THz"),
            AxisInfo::parse("Signal", "V"),
        )
    }

    #[test]
    fn keeps_the_inclusive_range() {
        let mut array = trace();
        Crop { min: 3.0, max: 1.0 }.apply(&mut array).unwrap();
        assert_eq!(array.coords[0].to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(array.real_values(), vec![6.0, 7.0, 8.0]);
        assert!(array.is_consistent());
    }

    #[test]
    fn empty_range_is_an_error() {
        let mut array = trace();
        assert!(Crop { min: 10.0, max: 11.0 }.apply(&mut array).is_err());
        assert_eq!(array.shape, vec![5]);
    }
}

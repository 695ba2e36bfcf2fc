use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::Result;
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::trace_len;
use filter_macros::register_filter;
use num_complex::Complex64;

/// Subtracts the mean of the first `points` samples from the trace.
#[register_filter]
#[derive(Clone, Debug)]
pub struct RemoveBaseline {
    pub points: usize,
}

config_fields!(RemoveBaseline { points });

impl Filter for RemoveBaseline {
    fn new() -> Self
    where
        Self: Sized,
    {
        RemoveBaseline { points: 10 }
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Remove baseline".to_string(),
            description: "Removes the offset measured before the pulse.".to_string(),
            hyperlink: None,
            role: FilterRole::PreFilter,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let n = trace_len(array, "RemoveBaseline")?;
        let points = self.points.clamp(1, n.max(1));
        if n == 0 {
            return Ok(());
        }
        let offset = array.data.iter().take(points).sum::<Complex64>() / points as f64;
        array.data.mapv_inplace(|v| v - offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::AxisInfo;
    use approx::assert_relative_eq;

    #[test]
    fn offset_of_the_leading_samples_is_removed() {
        let mut array = DataArray::from_trace(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1.0, 3.0, 10.0, 2.0],
            AxisInfo::parse("Delay", "ps"),
            AxisInfo::parse("Signal", "V"),
        );
        RemoveBaseline { points: 2 }.apply(&mut array).unwrap();
        let values = array.real_values();
        assert_relative_eq!(values[0], -1.0);
        assert_relative_eq!(values[2], 8.0);
    }
}

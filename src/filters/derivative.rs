use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use crate::filters::filter::{Filter, FilterConfig, FilterRole};
use crate::filters::{trace_len, trace_values};
use crate::units::AxisInfo;
use filter_macros::register_filter;
use ndarray::Array1;

/// Numerical derivative with respect to the coordinate axis.
///
/// Central differences inside the trace, one-sided differences at the ends.
#[register_filter]
#[derive(Clone, Debug)]
pub struct Derivative {}

config_fields!(Derivative {});

impl Filter for Derivative {
    fn new() -> Self
    where
        Self: Sized,
    {
        Derivative {}
    }

    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Derivative".to_string(),
            description: "Differentiates the signal along its axis.".to_string(),
            hyperlink: None,
            role: FilterRole::Generic,
        }
    }

    fn apply(&mut self, array: &mut DataArray) -> Result<()> {
        let n = trace_len(array, "Derivative")?;
        if n < 2 {
            return Err(TerapyError::filter("Derivative", "at least two samples are needed"));
        }
        let x = &array.coords[0];
        let y = trace_values(array);
        let slope = Array1::from_iter((0..n).map(|k| {
            let (a, b) = match k {
                0 => (0, 1),
                k if k == n - 1 => (n - 2, n - 1),
                k => (k - 1, k + 1),
            };
            (y[b] - y[a]) / (x[b] - x[a])
        }));
        array.data = slope.into_dyn();
        Ok(())
    }

    fn get_units(&self, units: &[AxisInfo]) -> Vec<AxisInfo> {
        let [axis, input] = units else {
            return units.to_vec();
        };
        vec![
            axis.clone(),
            AxisInfo::new(format!("d{}/d{}", input.name, axis.name), &input.units / &axis.units),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn slope_of_a_parabola() {
        let x: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| x * x).collect();
        let mut array = DataArray::from_trace(x, y, AxisInfo::parse("Delay", "ps"), AxisInfo::parse("Signal", "V"));
        Derivative::new().apply(&mut array).unwrap();
        let d = array.real_values();
        assert_relative_eq!(d[0], 1.0);
        assert_relative_eq!(d[2], 4.0);
        assert_relative_eq!(d[4], 7.0);
    }
}

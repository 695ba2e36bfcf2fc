//! Simulated devices for dry runs and tests.
//!
//! [`SimulatedAxis`] stays busy for a configurable number of status polls after
//! each move and records every target it was sent to. [`SimulatedInput`]
//! reports a constant list, cycles through a list of reads, or calls a closure.

use super::{AxisDevice, DeviceEntry, DeviceProperty, InputDevice};
use crate::error::{Result, TerapyError};
use crate::units::{AxisInfo, UnitQuantity};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

/// Driver name used in devices config files.
pub const DRIVER: &str = "simulated";

fn parse_list(text: &str) -> Vec<f64> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse().ok())
        .collect()
}

#[derive(Debug, Clone)]
pub struct SimulatedAxis {
    name: String,
    axis: AxisInfo,
    position: f64,
    target: f64,
    busy_polls: usize,
    remaining: usize,
    moves: Arc<Mutex<Vec<f64>>>,
    failing: bool,
}

impl SimulatedAxis {
    pub fn new(name: &str, axis: AxisInfo) -> SimulatedAxis {
        SimulatedAxis {
            name: name.to_string(),
            axis,
            position: 0.0,
            target: 0.0,
            busy_polls: 0,
            remaining: 0,
            moves: Arc::new(Mutex::new(Vec::new())),
            failing: false,
        }
    }

    /// Every move now reports busy for `polls` status queries.
    pub fn with_busy_polls(mut self, polls: usize) -> SimulatedAxis {
        self.busy_polls = polls;
        self
    }

    pub fn with_position(mut self, position: f64) -> SimulatedAxis {
        self.position = position;
        self.target = position;
        self
    }

    /// Every call fails with a device error.
    pub fn failing(mut self) -> SimulatedAxis {
        self.failing = true;
        self
    }

    /// Shared log of every target position, in order.
    pub fn move_log(&self) -> Arc<Mutex<Vec<f64>>> {
        self.moves.clone()
    }

    pub fn from_entry(entry: &DeviceEntry) -> SimulatedAxis {
        let units = entry.property("units").unwrap_or("");
        let qty = if entry.axis.is_empty() { entry.name.as_str() } else { entry.axis.as_str() };
        let mut axis = SimulatedAxis::new(&entry.name, AxisInfo::parse(qty, units));
        if let Some(polls) = entry.property("busy_polls").and_then(|p| p.parse().ok()) {
            axis.busy_polls = polls;
        }
        if let Some(pos) = entry.property("position").and_then(|p| p.parse().ok()) {
            axis = axis.with_position(pos);
        }
        axis
    }

    fn check(&self) -> Result<()> {
        if self.failing {
            Err(TerapyError::device(&self.name, "simulated failure"))
        } else {
            Ok(())
        }
    }
}

impl AxisDevice for SimulatedAxis {
    fn name(&self) -> &str {
        &self.name
    }

    fn axis(&self) -> AxisInfo {
        self.axis.clone()
    }

    fn go_to(&mut self, position: f64, wait: bool) -> Result<()> {
        self.check()?;
        if let Ok(mut moves) = self.moves.lock() {
            moves.push(position);
        }
        self.target = position;
        if wait || self.busy_polls == 0 {
            self.position = position;
            self.remaining = 0;
        } else {
            self.remaining = self.busy_polls;
        }
        Ok(())
    }

    fn pos(&mut self) -> Result<f64> {
        self.check()?;
        Ok(self.position)
    }

    fn get_motion_status(&mut self) -> Result<i32> {
        self.check()?;
        if self.remaining == 0 {
            return Ok(0);
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.position = self.target;
        }
        Ok(1)
    }

    fn stop(&mut self) -> Result<()> {
        self.remaining = 0;
        self.target = self.position;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.check()?;
        self.position = 0.0;
        self.target = 0.0;
        self.remaining = 0;
        Ok(())
    }

    fn state(&self) -> Vec<DeviceProperty> {
        vec![
            DeviceProperty::new("position", self.position, &self.axis.units.to_string()),
            DeviceProperty::new("busy_polls", self.busy_polls, ""),
        ]
    }
}

/// Where a [`SimulatedInput`] gets its values from.
#[derive(Clone)]
pub enum InputSource {
    Constant(Vec<f64>),
    /// Read `k` returns entry `k % len`.
    Sequence(Vec<Vec<f64>>),
    /// Read `k` returns `f(k)`.
    Function(Arc<dyn Fn(usize) -> Vec<f64> + Send + Sync>),
}

impl Debug for InputSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            InputSource::Sequence(v) => f.debug_tuple("Sequence").field(&v.len()).finish(),
            InputSource::Function(_) => f.write_str("Function"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedInput {
    name: String,
    qtynames: Vec<String>,
    units: Vec<UnitQuantity>,
    source: InputSource,
    reads: usize,
    failing: bool,
}

impl SimulatedInput {
    pub fn new(name: &str, source: InputSource) -> SimulatedInput {
        SimulatedInput {
            name: name.to_string(),
            qtynames: vec!["Signal".to_string()],
            units: vec![UnitQuantity::base(crate::units::Dimension::Voltage, 0)],
            source,
            reads: 0,
            failing: false,
        }
    }

    pub fn constant(name: &str, values: Vec<f64>) -> SimulatedInput {
        SimulatedInput::new(name, InputSource::Constant(values))
    }

    /// Scalar reads cycling through `values`.
    pub fn sequence(name: &str, values: &[f64]) -> SimulatedInput {
        SimulatedInput::new(
            name,
            InputSource::Sequence(values.iter().map(|v| vec![*v]).collect()),
        )
    }

    pub fn function<F>(name: &str, f: F) -> SimulatedInput
    where
        F: Fn(usize) -> Vec<f64> + Send + Sync + 'static,
    {
        SimulatedInput::new(name, InputSource::Function(Arc::new(f)))
    }

    pub fn with_quantities(mut self, qtynames: &[&str], units: &[&str]) -> SimulatedInput {
        self.qtynames = qtynames.iter().map(|q| q.to_string()).collect();
        self.units = units.iter().map(|u| UnitQuantity::parse_lossy(u)).collect();
        self
    }

    pub fn failing(mut self) -> SimulatedInput {
        self.failing = true;
        self
    }

    pub fn from_entry(entry: &DeviceEntry) -> SimulatedInput {
        let values = entry.property("values").map(parse_list).unwrap_or_else(|| vec![0.0]);
        let mut input = SimulatedInput::constant(&entry.name, values);
        if let Some(names) = entry.property("qtynames") {
            input.qtynames = names.split(',').map(|n| n.trim().to_string()).collect();
        }
        if let Some(units) = entry.property("units") {
            input.units = units.split(',').map(|u| UnitQuantity::parse_lossy(u.trim())).collect();
        }
        input
    }
}

impl InputDevice for SimulatedInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn qtynames(&self) -> Vec<String> {
        self.qtynames.clone()
    }

    fn units(&self) -> Vec<UnitQuantity> {
        self.units.clone()
    }

    fn read(&mut self) -> Result<Vec<f64>> {
        if self.failing {
            return Err(TerapyError::device(&self.name, "simulated read failure"));
        }
        let k = self.reads;
        self.reads += 1;
        Ok(match &self.source {
            InputSource::Constant(v) => v.clone(),
            InputSource::Sequence(v) if v.is_empty() => Vec::new(),
            InputSource::Sequence(v) => v[k % v.len()].clone(),
            InputSource::Function(f) => f(k),
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.reads = 0;
        Ok(())
    }

    fn state(&self) -> Vec<DeviceProperty> {
        vec![DeviceProperty::new("reads", self.reads, "")]
    }
}

//! This module defines the data structures shared by the sequencer and the filter bank:
//! the N-dimensional [`DataArray`] with its scan cursor, the [`Measurement`] run record,
//! and the [`ArrayStore`] arena that tracks which arrays were derived from which.

use crate::events::tree::EventNode;
use crate::units::{convert, AxisInfo};
use chrono::{DateTime, Local};
use ndarray::{Array1, ArrayD, ArrayViewMutD, Axis, IxDyn};
use num_complex::Complex64;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a [`DataArray`] in an [`ArrayStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub Uuid);

impl ArrayId {
    pub fn new() -> ArrayId {
        ArrayId(Uuid::new_v4())
    }
}

impl Default for ArrayId {
    fn default() -> Self {
        ArrayId::new()
    }
}

/// Opaque handle of the plot an array is drawn in. The core never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlotId(pub Uuid);

/// An N-dimensional buffer with per-axis coordinates and a write cursor.
///
/// # Fields
/// - `shape`: extent of every axis, possibly empty for a scalar.
/// - `data`: complex samples of shape `shape`, initially NaN. Acquired values are real.
/// - `coords`: one coordinate vector per axis, `coords[i].len() == shape[i]`, initially NaN.
/// - `idx`: the cursor, one index per axis.
/// - `scan_dim`: the axis the currently active scan loop writes into.
/// - `axes`: name and unit of every coordinate axis.
/// - `input`: name and unit of the measured quantity.
/// - `name`, `filename`, `color`, `plot`: display metadata.
#[derive(Debug, Clone)]
pub struct DataArray {
    pub id: ArrayId,
    pub shape: Vec<usize>,
    pub data: ArrayD<Complex64>,
    pub coords: Vec<Array1<f64>>,
    pub idx: Vec<usize>,
    pub scan_dim: usize,
    pub axes: Vec<AxisInfo>,
    pub input: AxisInfo,
    pub name: String,
    pub filename: Option<PathBuf>,
    pub color: Option<[u8; 3]>,
    pub plot: Option<PlotId>,
}

impl DataArray {
    /// Allocates an array of the given shape with NaN data and coordinates.
    ///
    /// Missing axis descriptions are filled with unnamed dimensionless axes.
    pub fn new(shape: &[usize], axes: Vec<AxisInfo>, input: AxisInfo) -> DataArray {
        let mut axes = axes;
        axes.truncate(shape.len());
        while axes.len() < shape.len() {
            axes.push(AxisInfo::dimensionless(format!("Axis {}", axes.len())));
        }
        DataArray {
            id: ArrayId::new(),
            shape: shape.to_vec(),
            data: ArrayD::from_elem(IxDyn(shape), Complex64::new(f64::NAN, 0.0)),
            coords: shape.iter().map(|n| Array1::from_elem(*n, f64::NAN)).collect(),
            idx: vec![0; shape.len()],
            scan_dim: 0,
            axes,
            input,
            name: String::new(),
            filename: None,
            color: None,
            plot: None,
        }
    }

    /// Builds a fully populated 1-D array from coordinates and real values.
    pub fn from_trace(coords: Vec<f64>, values: Vec<f64>, axis: AxisInfo, input: AxisInfo) -> DataArray {
        let n = coords.len().min(values.len());
        let mut array = DataArray::new(&[n], vec![axis], input);
        array.coords[0] = Array1::from_iter(coords.into_iter().take(n));
        array.data = Array1::from_iter(values.into_iter().take(n).map(|v| Complex64::new(v, 0.0))).into_dyn();
        array
    }

    /// Builds a 1-D array from coordinates and complex values.
    pub fn from_complex_trace(
        coords: Array1<f64>,
        values: Array1<Complex64>,
        axis: AxisInfo,
        input: AxisInfo,
    ) -> DataArray {
        let mut array = DataArray::new(&[coords.len()], vec![axis], input);
        array.coords[0] = coords;
        array.data = values.into_dyn();
        array
    }

    pub fn dimension(&self) -> usize {
        self.shape.len()
    }

    /// `true` when every per-axis list agrees with `shape`.
    pub fn is_consistent(&self) -> bool {
        let d = self.shape.len();
        self.coords.len() == d
            && self.axes.len() == d
            && self.idx.len() == d
            && self.data.shape() == self.shape.as_slice()
            && self.coords.iter().zip(&self.shape).all(|(c, n)| c.len() == *n)
            && self.idx.iter().zip(&self.shape).all(|(i, n)| i < n)
            && self.scan_dim < d.max(1)
    }

    /// Writes `value` (real) at the cursor.
    pub fn set_value(&mut self, value: f64) {
        self.set_complex(Complex64::new(value, 0.0));
    }

    pub fn set_complex(&mut self, value: Complex64) {
        if let Some(v) = self.data.get_mut(IxDyn(&self.idx)) {
            *v = value;
        }
    }

    /// Real part of the sample at the cursor.
    pub fn get_value(&self) -> f64 {
        self.get_complex().re
    }

    pub fn get_complex(&self) -> Complex64 {
        self.data
            .get(IxDyn(&self.idx))
            .copied()
            .unwrap_or(Complex64::new(f64::NAN, 0.0))
    }

    /// Writes `coords[scan_dim][idx[scan_dim]]`. A scalar array has no coordinates.
    pub fn set_coordinate(&mut self, value: f64) {
        let d = self.scan_dim;
        if d < self.dimension() {
            let k = self.idx[d];
            self.coords[d][k] = value;
        }
    }

    pub fn get_coordinate(&self) -> f64 {
        let d = self.scan_dim;
        if d < self.dimension() {
            self.coords[d][self.idx[d]]
        } else {
            f64::NAN
        }
    }

    /// Adds one to `idx[axis]`, carrying into the axes before it on overflow.
    ///
    /// A carry out of axis 0 wraps to zero.
    pub fn increment(&mut self, axis: usize) {
        if self.dimension() == 0 {
            return;
        }
        let mut d = axis.min(self.dimension() - 1);
        loop {
            self.idx[d] += 1;
            if self.idx[d] < self.shape[d] {
                return;
            }
            self.idx[d] = 0;
            if d == 0 {
                return;
            }
            d -= 1;
        }
    }

    /// Subtracts one from `idx[axis]`, borrowing from the axes before it on underflow.
    pub fn decrement(&mut self, axis: usize) {
        if self.dimension() == 0 {
            return;
        }
        let mut d = axis.min(self.dimension() - 1);
        loop {
            if self.idx[d] > 0 {
                self.idx[d] -= 1;
                return;
            }
            self.idx[d] = self.shape[d] - 1;
            if d == 0 {
                return;
            }
            d -= 1;
        }
    }

    pub fn set_position(&mut self, axis: usize, k: usize) {
        if axis < self.dimension() {
            self.idx[axis] = k.min(self.shape[axis].saturating_sub(1));
        }
    }

    /// Moves the scan one axis inwards and starts that axis at zero.
    pub fn increment_scan_dimension(&mut self) {
        let max = self.dimension().saturating_sub(1);
        if self.scan_dim < max {
            self.scan_dim += 1;
            self.idx[self.scan_dim] = 0;
        }
    }

    pub fn decrement_scan_dimension(&mut self) {
        self.scan_dim = self.scan_dim.saturating_sub(1);
    }

    /// Zeros the cursor and the scan dimension.
    pub fn reset_counter(&mut self) {
        self.idx.iter_mut().for_each(|i| *i = 0);
        self.scan_dim = 0;
    }

    /// Deep copy with a fresh id. The color is kept and the plot handle cleared.
    pub fn copy(&self) -> DataArray {
        DataArray {
            id: ArrayId::new(),
            plot: None,
            ..self.clone()
        }
    }

    /// All unit labels of the array: the axes followed by the input.
    pub fn units(&self) -> Vec<AxisInfo> {
        let mut units = self.axes.clone();
        units.push(self.input.clone());
        units
    }

    /// Aligns coordinate and data units to `new_labels`.
    ///
    /// `new_labels` lists the axes followed by the input. Labels the array does
    /// not have are taken from `defaults[i]` if supplied, else from
    /// `new_labels[i]`. Returns the factor applied per label.
    pub fn rescale(&mut self, new_labels: &[AxisInfo], defaults: &[AxisInfo]) -> Vec<Option<f64>> {
        let d = self.dimension();
        let mut labels = self.units();
        for i in labels.len()..new_labels.len() {
            labels.push(defaults.get(i).unwrap_or(&new_labels[i]).clone());
        }
        let scales = convert(&mut labels, new_labels, false);
        for (i, scale) in scales.iter().enumerate() {
            let Some(s) = *scale else { continue };
            if s == 1.0 {
                continue;
            }
            if i < d {
                self.coords[i].mapv_inplace(|c| c * s);
            } else if i == d {
                self.data.mapv_inplace(|v| v * s);
            }
        }
        self.input = labels[d].clone();
        labels.truncate(d);
        self.axes = labels;
        scales
    }

    /// Mutable view of the block addressed by the first `level` cursor indices.
    pub fn block_mut(&mut self, level: usize) -> ArrayViewMutD<'_, Complex64> {
        let mut view = self.data.view_mut();
        for i in 0..level.min(self.idx.len()) {
            view = view.index_axis_move(Axis(0), self.idx[i]);
        }
        view
    }

    /// Copy of the block addressed by the first `level` cursor indices.
    pub fn block(&self, level: usize) -> ArrayD<Complex64> {
        let mut view = self.data.view();
        for i in 0..level.min(self.idx.len()) {
            view = view.index_axis_move(Axis(0), self.idx[i]);
        }
        view.to_owned()
    }

    /// Real parts of a 1-D array as a vector.
    pub fn real_values(&self) -> Vec<f64> {
        self.data.iter().map(|v| v.re).collect()
    }
}

/// The record of one sequence run.
///
/// Only the run worker writes the arrays. `current` is shared with the progress
/// worker, which only reads it.
#[derive(Debug)]
pub struct Measurement {
    pub name: String,
    pub events: EventNode,
    pub arrays: Vec<DataArray>,
    pub total: usize,
    pub current: Arc<AtomicUsize>,
    /// XML snapshot of the event subtree at start.
    pub events_xml: String,
    /// XML snapshot of the device state at start.
    pub devices_xml: String,
    pub started: DateTime<Local>,
}

impl Measurement {
    pub fn new(name: &str, events: EventNode) -> Measurement {
        Measurement {
            name: name.to_string(),
            events,
            arrays: Vec::new(),
            total: 0,
            current: Arc::new(AtomicUsize::new(0)),
            events_xml: String::new(),
            devices_xml: String::new(),
            started: Local::now(),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn advance(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Completion in percent, clamped to `[0, 100]`.
    pub fn progress(&self) -> f64 {
        progress_percent(self.current(), self.total)
    }

    pub fn array(&self, m_id: usize) -> Option<&DataArray> {
        self.arrays.get(m_id)
    }

    pub fn array_mut(&mut self, m_id: usize) -> Option<&mut DataArray> {
        self.arrays.get_mut(m_id)
    }

    /// Applies `f` to every array listed in `m_ids`.
    pub fn for_arrays(&mut self, m_ids: &[usize], mut f: impl FnMut(&mut DataArray)) {
        for m in m_ids {
            if let Some(array) = self.arrays.get_mut(*m) {
                f(array);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<DataArray>> {
        self.arrays.iter().map(|a| Arc::new(a.clone())).collect()
    }
}

pub fn progress_percent(current: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (100.0 * current as f64 / total as f64).clamp(0.0, 100.0)
}

/// Arena of arrays plus the acyclic "derived from" relation between them.
///
/// Plots and filter banks refer to arrays by [`ArrayId`] only.
#[derive(Debug, Default)]
pub struct ArrayStore {
    arrays: HashMap<ArrayId, Arc<DataArray>>,
    order: Vec<ArrayId>,
    derived_from: HashMap<ArrayId, ArrayId>,
}

impl ArrayStore {
    pub fn insert(&mut self, array: DataArray) -> Arc<DataArray> {
        let id = array.id;
        let array = Arc::new(array);
        if self.arrays.insert(id, array.clone()).is_none() {
            self.order.push(id);
        }
        array
    }

    /// Inserts `array` and records that it was computed from `source`.
    ///
    /// The edge is dropped (with a warning) if it would close a cycle.
    pub fn insert_derived(&mut self, array: DataArray, source: ArrayId) -> Arc<DataArray> {
        let id = array.id;
        let stored = self.insert(array);
        if self.ancestors(source).contains(&id) || source == id {
            log::warn!("ignoring derivation {source:?} -> {id:?}, it would form a cycle");
        } else {
            self.derived_from.insert(id, source);
        }
        stored
    }

    pub fn get(&self, id: ArrayId) -> Option<Arc<DataArray>> {
        self.arrays.get(&id).cloned()
    }

    /// Removes an array. Arrays derived from it lose their source edge.
    pub fn remove(&mut self, id: ArrayId) -> Option<Arc<DataArray>> {
        self.order.retain(|i| *i != id);
        self.derived_from.remove(&id);
        self.derived_from.retain(|_, src| *src != id);
        self.arrays.remove(&id)
    }

    pub fn source(&self, id: ArrayId) -> Option<ArrayId> {
        self.derived_from.get(&id).copied()
    }

    /// Chain of sources, nearest first.
    pub fn ancestors(&self, id: ArrayId) -> Vec<ArrayId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(src) = self.derived_from.get(&current) {
            if chain.contains(src) {
                break;
            }
            chain.push(*src);
            current = *src;
        }
        chain
    }

    /// Arrays computed directly from `id`.
    pub fn derived(&self, id: ArrayId) -> Vec<ArrayId> {
        self.order
            .iter()
            .filter(|a| self.derived_from.get(a) == Some(&id))
            .copied()
            .collect()
    }

    /// All arrays in insertion order.
    pub fn arrays(&self) -> Vec<Arc<DataArray>> {
        self.order.iter().filter_map(|id| self.arrays.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

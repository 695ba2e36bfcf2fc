//! Shape inference: one pass over a sequence that decides how many arrays a
//! run produces and what each of them looks like.
//!
//! Every loop with a scan dimension adds an axis to the arrays of the inputs
//! below it. Every loop multiplies the number of reads those inputs perform.
//! The pass also writes `m_id`, `m_ids` and `dim` into the events.

use super::event::EventKind;
use super::tree::EventNode;
use crate::data_container::DataArray;
use crate::devices::{lock_device, DeviceRegistry};
use crate::error::{Result, TerapyError};
use crate::units::AxisInfo;

/// Shape, axes and operation counts of the array behind one input event.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLayout {
    pub shape: Vec<usize>,
    /// Iteration count of every enclosing loop, outermost first.
    pub opcount: Vec<usize>,
    pub axes: Vec<AxisInfo>,
    pub input: AxisInfo,
    pub name: String,
}

impl ArrayLayout {
    /// Number of reads this input performs during a run.
    pub fn operations(&self) -> usize {
        self.opcount.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shapes {
    pub layouts: Vec<ArrayLayout>,
    /// Sum of [`ArrayLayout::operations`] over all arrays.
    pub total: usize,
}

impl Shapes {
    pub fn count(&self) -> usize {
        self.layouts.len()
    }

    /// NaN-filled arrays, one per layout, in `m_id` order.
    pub fn allocate(&self) -> Vec<DataArray> {
        self.layouts
            .iter()
            .map(|layout| {
                let mut array = DataArray::new(&layout.shape, layout.axes.clone(), layout.input.clone());
                array.name = layout.name.clone();
                array
            })
            .collect()
    }
}

struct Walker<'a> {
    devices: &'a DeviceRegistry,
    shape: Vec<usize>,
    opcount: Vec<usize>,
    axes: Vec<AxisInfo>,
    layouts: Vec<ArrayLayout>,
}

fn invalid(message: String) -> TerapyError {
    TerapyError::SequenceInvalid(message)
}

impl Walker<'_> {
    fn axis_info(&self, name: &str) -> Result<AxisInfo> {
        let device = self
            .devices
            .axis(name)
            .ok_or_else(|| invalid(format!("no axis device named \"{name}\"")))?;
        let axis = lock_device(&device, name)?.axis();
        Ok(axis)
    }

    fn input_info(&self, name: &str, quantity: usize, strict: bool) -> Result<AxisInfo> {
        let device = self
            .devices
            .input(name)
            .ok_or_else(|| invalid(format!("no input device named \"{name}\"")))?;
        let device = lock_device(&device, name)?;
        if strict && quantity >= device.qtynames().len() {
            return Err(invalid(format!("{name} has no quantity {quantity}")));
        }
        Ok(device.quantity(quantity))
    }

    fn require_device(&self, name: &str) -> Result<()> {
        if self.devices.axis(name).is_some() || self.devices.input(name).is_some() {
            Ok(())
        } else {
            Err(invalid(format!("no device named \"{name}\"")))
        }
    }

    /// Walks one list of siblings. Returns the arrays written below them and
    /// the last input seen, which later display and save events refer to.
    fn walk(&mut self, children: &mut [EventNode], mut last_input: Option<usize>) -> Result<(Vec<usize>, Option<usize>)> {
        let mut m_ids = Vec::new();
        let mut output_seen = false;
        for node in children.iter_mut() {
            let event = &mut node.event;
            event.clear_ids();
            if !event.is_active {
                continue;
            }
            match &event.kind {
                EventKind::Sequence(_) => {
                    return Err(invalid(format!("{event}: a sequence cannot be nested")));
                }
                kind if kind.is_loop() => {
                    let level = self.shape.len();
                    let n = kind.operation_count();
                    self.opcount.push(n);
                    let scanned = kind.has_scan_dimension();
                    if scanned {
                        let axis = match kind {
                            EventKind::Scan(scan) => self.axis_info(&scan.axis)?,
                            _ => AxisInfo::dimensionless("Iteration"),
                        };
                        self.shape.push(n);
                        self.axes.push(axis);
                    }
                    event.dim = Some(level);
                    let (inner, last) = self.walk(&mut node.children, last_input)?;
                    if scanned {
                        self.shape.pop();
                        self.axes.pop();
                    }
                    self.opcount.pop();
                    node.event.m_ids = inner.clone();
                    m_ids.extend(inner);
                    last_input = last.or(last_input);
                }
                kind if kind.is_input() => {
                    if output_seen {
                        return Err(invalid(format!("{event} follows a display or save event")));
                    }
                    let (device, quantity) = kind.input_device().unwrap_or_default();
                    // Read_Avg averages every quantity, the index only labels the array
                    let input = self.input_info(device, quantity, matches!(kind, EventKind::Read(_)))?;
                    let m = self.layouts.len();
                    self.layouts.push(ArrayLayout {
                        shape: self.shape.clone(),
                        opcount: self.opcount.clone(),
                        axes: self.axes.clone(),
                        input,
                        name: event.name.clone(),
                    });
                    event.m_id = Some(m);
                    m_ids.push(m);
                    last_input = Some(m);
                }
                kind if kind.is_output() => {
                    let m = last_input.ok_or_else(|| invalid(format!("{event} comes before any input")))?;
                    event.m_id = Some(m);
                    output_seen = true;
                }
                EventKind::Move(m) => {
                    self.axis_info(&m.axis)?;
                }
                EventKind::MoveUntil(m) => {
                    self.axis_info(&m.axis)?;
                    self.input_info(&m.input, m.quantity, true)?;
                }
                EventKind::Reset(r) => self.require_device(&r.device)?,
                EventKind::Store(s) => self.require_device(&s.device)?,
                _ => {}
            }
        }
        Ok((m_ids, last_input))
    }
}

/// Infers the arrays of the sequence `root` and annotates its events.
pub fn shapes(root: &mut EventNode, devices: &DeviceRegistry) -> Result<Shapes> {
    if !root.event.kind.is_root() {
        return Err(invalid(format!("{} is not a sequence", root.event)));
    }
    root.event.clear_ids();
    let mut walker = Walker {
        devices,
        shape: Vec::new(),
        opcount: Vec::new(),
        axes: Vec::new(),
        layouts: Vec::new(),
    };
    let (m_ids, _) = walker.walk(&mut root.children, None)?;
    root.event.m_ids = m_ids;
    let total = walker.layouts.iter().map(ArrayLayout::operations).sum();
    Ok(Shapes {
        layouts: walker.layouts,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::simulated::{SimulatedAxis, SimulatedInput};
    use crate::events::event::Event;

    fn devices() -> DeviceRegistry {
        let mut devices = DeviceRegistry::new();
        devices.add_axis(SimulatedAxis::new("A", AxisInfo::parse("Position", "mm")));
        devices.add_axis(SimulatedAxis::new("B", AxisInfo::parse("Delay", "ps")));
        devices.add_input(SimulatedInput::constant("I", vec![1.0, 2.0]).with_quantities(&["X", "Y"], &["V", "V"]));
        devices
    }

    fn node(class: &str, attrs: &[(&str, &str)]) -> EventNode {
        let mut event = Event::from_class(class).unwrap();
        for (name, value) in attrs {
            event = event.with(name, value).unwrap();
        }
        EventNode::new(event)
    }

    #[test]
    fn nested_scans_build_a_raster() {
        let mut root = node("Sequence", &[]).with_child(
            node("Scan", &[("axis", "A"), ("n", "3")]).with_child(
                node("Scan", &[("axis", "B"), ("n", "5")])
                    .with_child(node("Read", &[("input", "I"), ("quantity", "1")]))
                    .with_child(node("Display", &[])),
            ),
        );
        let shapes = shapes(&mut root, &devices()).unwrap();
        assert_eq!(shapes.count(), 1);
        let layout = &shapes.layouts[0];
        assert_eq!(layout.shape, vec![3, 5]);
        assert_eq!(layout.axes[0].name, "Position");
        assert_eq!(layout.axes[1].units.to_string(), "ps");
        assert_eq!(layout.input.name, "Y");
        assert_eq!(shapes.total, 15);

        let outer = &root.children[0];
        assert_eq!(outer.event.dim, Some(0));
        assert_eq!(outer.event.m_ids, vec![0]);
        assert_eq!(outer.children[0].event.dim, Some(1));
        assert_eq!(outer.children[0].children[1].event.m_id, Some(0));
    }

    #[test]
    fn average_multiplies_operations_but_adds_no_axis() {
        let mut root = node("Sequence", &[])
            .with_child(node("Average", &[("n", "5")]).with_child(node("Read", &[("input", "I")])))
            .with_child(node("Repeat", &[("n", "4")]).with_child(node("Read_Avg", &[("input", "I")])))
            .with_child(node("Save", &[]));
        let shapes = shapes(&mut root, &devices()).unwrap();
        assert_eq!(shapes.layouts[0].shape, Vec::<usize>::new());
        assert_eq!(shapes.layouts[1].shape, vec![4]);
        assert_eq!(shapes.layouts[1].axes[0].name, "Iteration");
        assert_eq!(shapes.total, 5 + 4);
        assert_eq!(root.children[2].event.m_id, Some(1));
        assert_eq!(root.event.m_ids, vec![0, 1]);

        let arrays = shapes.allocate();
        assert!(arrays.iter().all(|a| a.is_consistent()));
        assert!(arrays[0].get_value().is_nan());
    }

    #[test]
    fn output_before_input_is_rejected() {
        let mut root = node("Sequence", &[])
            .with_child(node("Display", &[]))
            .with_child(node("Read", &[("input", "I")]));
        assert!(matches!(
            shapes(&mut root, &devices()),
            Err(TerapyError::SequenceInvalid(_))
        ));
    }

    #[test]
    fn input_after_output_in_the_same_branch_is_rejected() {
        let mut root = node("Sequence", &[])
            .with_child(node("Read", &[("input", "I")]))
            .with_child(node("Save", &[]))
            .with_child(node("Read", &[("input", "I")]));
        assert!(shapes(&mut root, &devices()).is_err());
    }

    #[test]
    fn unknown_devices_and_inactive_events() {
        let mut root = node("Sequence", &[]).with_child(node("Read", &[("input", "nope")]));
        assert!(shapes(&mut root, &devices()).is_err());

        root.children[0].event.is_active = false;
        let shapes = shapes(&mut root, &devices()).unwrap();
        assert_eq!(shapes.count(), 0);
        assert_eq!(shapes.total, 0);
    }
}

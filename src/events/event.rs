//! The event kinds a measurement sequence is built from.
//!
//! An [`Event`] wraps one [`EventKind`] variant together with the bookkeeping
//! every node needs (`is_active`, the ids of the arrays it writes, the scan
//! dimension of a loop). The persisted attributes of each variant are exposed
//! through [`ConfigFields`] under the names used in the events config file.

use crate::config::ConfigFields;
use crate::config_fields;
use crate::data_container::DataArray;
use crate::error::{Result, TerapyError};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> EventId {
        EventId(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        EventId::new()
    }
}

/// Exactly one category applies to every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Loop,
    Input,
    Display,
    Save,
    AxisMove,
    Reset,
    Misc,
}

/// How a [`ScanLoop`] walks its positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Straight,
    /// Positions are offsets from the axis position on entry.
    Relative,
    /// Every other invocation runs backwards.
    ZigZag,
    /// Positions are listed explicitly or read from `file`.
    List,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {}

config_fields!(Sequence {});

/// Moves `axis` through a set of positions and runs its children at each one.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanLoop {
    pub axis: String,
    pub min: f64,
    pub max: f64,
    pub n: usize,
    pub positions: Vec<f64>,
    pub file: String,
    pub mode: ScanMode,
    /// Direction of the next zig-zag pass.
    pub forward: bool,
}

config_fields!(ScanLoop {
    axis,
    min,
    max,
    n,
    positions,
    file
});

impl ScanLoop {
    pub fn new(mode: ScanMode) -> ScanLoop {
        ScanLoop {
            axis: String::new(),
            min: 0.0,
            max: 1.0,
            n: 11,
            positions: Vec::new(),
            file: String::new(),
            mode,
            forward: true,
        }
    }

    /// Number of points of one pass.
    pub fn len(&self) -> usize {
        match self.mode {
            ScanMode::List => self.positions.len(),
            _ => self.n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k`-th target in slot order, before any relative offset.
    pub fn target(&self, k: usize) -> f64 {
        match self.mode {
            ScanMode::List => self.positions.get(k).copied().unwrap_or(f64::NAN),
            _ if self.n <= 1 => self.min,
            _ => self.min + k as f64 * (self.max - self.min) / (self.n - 1) as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatLoop {
    pub n: usize,
}

config_fields!(RepeatLoop { n });

/// Runs its children `n` times and keeps the mean of what they wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageLoop {
    pub n: usize,
}

config_fields!(AverageLoop { n });

#[derive(Debug, Clone, PartialEq)]
pub struct MoveAxis {
    pub axis: String,
    pub position: f64,
    pub relative: bool,
    pub wait: bool,
}

config_fields!(MoveAxis {
    axis,
    position,
    relative,
    wait
});

/// Moves `axis` towards `target` until quantity `quantity` of `input`
/// crosses `threshold` (from below when `above` is set).
#[derive(Debug, Clone, PartialEq)]
pub struct MoveUntil {
    pub axis: String,
    pub target: f64,
    pub input: String,
    pub quantity: usize,
    pub threshold: f64,
    pub above: bool,
}

config_fields!(MoveUntil {
    axis,
    target,
    input,
    quantity,
    threshold,
    above
});

#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    pub ms: usize,
}

config_fields!(Wait { ms });

#[derive(Debug, Clone, PartialEq)]
pub struct ResetDevice {
    pub device: String,
}

config_fields!(ResetDevice { device });

/// Stores an axis position or an input reading under `tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreValue {
    pub tag: String,
    pub device: String,
    pub quantity: usize,
}

config_fields!(StoreValue {
    tag,
    device,
    quantity
});

#[derive(Debug, Clone, PartialEq)]
pub struct ReadInput {
    pub input: String,
    pub quantity: usize,
}

config_fields!(ReadInput { input, quantity });

/// Mean of every value an input reports, over `samples` reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAverage {
    pub input: String,
    pub quantity: usize,
    pub samples: usize,
}

config_fields!(ReadAverage {
    input,
    quantity,
    samples
});

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayArray {}

config_fields!(DisplayArray {});

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaveArray {
    pub file: String,
    /// Name generated for this run when `file` is empty.
    pub auto_name: Option<PathBuf>,
}

config_fields!(SaveArray { file });

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Sequence(Sequence),
    Scan(ScanLoop),
    Repeat(RepeatLoop),
    Average(AverageLoop),
    Move(MoveAxis),
    MoveUntil(MoveUntil),
    Wait(Wait),
    Reset(ResetDevice),
    Store(StoreValue),
    Read(ReadInput),
    ReadAvg(ReadAverage),
    Display(DisplayArray),
    Save(SaveArray),
}

impl EventKind {
    /// Every class name accepted by [`EventKind::from_class`].
    pub const CLASSES: [&'static str; 16] = [
        "Sequence",
        "Scan",
        "Scan_Relative",
        "Scan_ZZ",
        "Scan_List",
        "Repeat",
        "Average",
        "Move",
        "Move_Until",
        "Wait",
        "Reset",
        "Store",
        "Read",
        "Read_Avg",
        "Display",
        "Save",
    ];

    /// A default-configured event of the given class.
    pub fn from_class(class: &str) -> Option<EventKind> {
        let kind = match class {
            "Sequence" => EventKind::Sequence(Sequence {}),
            "Scan" => EventKind::Scan(ScanLoop::new(ScanMode::Straight)),
            "Scan_Relative" => EventKind::Scan(ScanLoop::new(ScanMode::Relative)),
            "Scan_ZZ" => EventKind::Scan(ScanLoop::new(ScanMode::ZigZag)),
            "Scan_List" => EventKind::Scan(ScanLoop::new(ScanMode::List)),
            "Repeat" => EventKind::Repeat(RepeatLoop { n: 2 }),
            "Average" => EventKind::Average(AverageLoop { n: 10 }),
            "Move" => EventKind::Move(MoveAxis {
                axis: String::new(),
                position: 0.0,
                relative: false,
                wait: true,
            }),
            "Move_Until" => EventKind::MoveUntil(MoveUntil {
                axis: String::new(),
                target: 0.0,
                input: String::new(),
                quantity: 0,
                threshold: 0.0,
                above: true,
            }),
            "Wait" => EventKind::Wait(Wait { ms: 1000 }),
            "Reset" => EventKind::Reset(ResetDevice { device: String::new() }),
            "Store" => EventKind::Store(StoreValue {
                tag: String::new(),
                device: String::new(),
                quantity: 0,
            }),
            "Read" => EventKind::Read(ReadInput {
                input: String::new(),
                quantity: 0,
            }),
            "Read_Avg" => EventKind::ReadAvg(ReadAverage {
                input: String::new(),
                quantity: 0,
                samples: 1,
            }),
            "Display" => EventKind::Display(DisplayArray {}),
            "Save" => EventKind::Save(SaveArray::default()),
            _ => return None,
        };
        Some(kind)
    }

    pub fn class(&self) -> &'static str {
        match self {
            EventKind::Sequence(_) => "Sequence",
            EventKind::Scan(scan) => match scan.mode {
                ScanMode::Straight => "Scan",
                ScanMode::Relative => "Scan_Relative",
                ScanMode::ZigZag => "Scan_ZZ",
                ScanMode::List => "Scan_List",
            },
            EventKind::Repeat(_) => "Repeat",
            EventKind::Average(_) => "Average",
            EventKind::Move(_) => "Move",
            EventKind::MoveUntil(_) => "Move_Until",
            EventKind::Wait(_) => "Wait",
            EventKind::Reset(_) => "Reset",
            EventKind::Store(_) => "Store",
            EventKind::Read(_) => "Read",
            EventKind::ReadAvg(_) => "Read_Avg",
            EventKind::Display(_) => "Display",
            EventKind::Save(_) => "Save",
        }
    }

    /// Icon shown next to the node in an event tree view.
    pub fn icon(&self) -> &'static str {
        match self.category() {
            EventCategory::Loop if self.is_root() => "sequence",
            EventCategory::Loop => "loop",
            EventCategory::Input => "input",
            EventCategory::Display => "plot",
            EventCategory::Save => "save",
            EventCategory::AxisMove => "axis",
            EventCategory::Reset => "reset",
            EventCategory::Misc => "misc",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::Sequence(_) | EventKind::Scan(_) | EventKind::Repeat(_) | EventKind::Average(_) => {
                EventCategory::Loop
            }
            EventKind::Read(_) | EventKind::ReadAvg(_) => EventCategory::Input,
            EventKind::Display(_) => EventCategory::Display,
            EventKind::Save(_) => EventCategory::Save,
            EventKind::Move(_) | EventKind::MoveUntil(_) => EventCategory::AxisMove,
            EventKind::Reset(_) => EventCategory::Reset,
            EventKind::Wait(_) | EventKind::Store(_) => EventCategory::Misc,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, EventKind::Sequence(_))
    }

    pub fn is_loop(&self) -> bool {
        self.category() == EventCategory::Loop
    }

    pub fn is_input(&self) -> bool {
        self.category() == EventCategory::Input
    }

    /// Display and save events both consume the array of a preceding input.
    pub fn is_output(&self) -> bool {
        matches!(self.category(), EventCategory::Display | EventCategory::Save)
    }

    /// Loops that add an axis to the arrays of their children.
    pub fn has_scan_dimension(&self) -> bool {
        matches!(self, EventKind::Scan(_) | EventKind::Repeat(_))
    }

    /// Iterations of a loop, 1 for everything else.
    pub fn operation_count(&self) -> usize {
        match self {
            EventKind::Scan(scan) => scan.len(),
            EventKind::Repeat(RepeatLoop { n }) | EventKind::Average(AverageLoop { n }) => *n,
            _ => 1,
        }
    }

    /// Name of the input device an input event reads.
    pub fn input_device(&self) -> Option<(&str, usize)> {
        match self {
            EventKind::Read(r) => Some((&r.input, r.quantity)),
            EventKind::ReadAvg(r) => Some((&r.input, r.quantity)),
            _ => None,
        }
    }

    /// Name of the axis device a loop or move drives.
    pub fn axis_device(&self) -> Option<&str> {
        match self {
            EventKind::Scan(scan) => Some(&scan.axis),
            EventKind::Move(m) => Some(&m.axis),
            EventKind::MoveUntil(m) => Some(&m.axis),
            _ => None,
        }
    }

    fn fields(&self) -> &dyn ConfigFields {
        match self {
            EventKind::Sequence(e) => e,
            EventKind::Scan(e) => e,
            EventKind::Repeat(e) => e,
            EventKind::Average(e) => e,
            EventKind::Move(e) => e,
            EventKind::MoveUntil(e) => e,
            EventKind::Wait(e) => e,
            EventKind::Reset(e) => e,
            EventKind::Store(e) => e,
            EventKind::Read(e) => e,
            EventKind::ReadAvg(e) => e,
            EventKind::Display(e) => e,
            EventKind::Save(e) => e,
        }
    }

    fn fields_mut(&mut self) -> &mut dyn ConfigFields {
        match self {
            EventKind::Sequence(e) => e,
            EventKind::Scan(e) => e,
            EventKind::Repeat(e) => e,
            EventKind::Average(e) => e,
            EventKind::Move(e) => e,
            EventKind::MoveUntil(e) => e,
            EventKind::Wait(e) => e,
            EventKind::Reset(e) => e,
            EventKind::Store(e) => e,
            EventKind::Read(e) => e,
            EventKind::ReadAvg(e) => e,
            EventKind::Display(e) => e,
            EventKind::Save(e) => e,
        }
    }
}

impl ConfigFields for EventKind {
    fn config_names(&self) -> Vec<&'static str> {
        self.fields().config_names()
    }

    fn get_config(&self, name: &str) -> Option<String> {
        self.fields().get_config(name)
    }

    fn set_config(&mut self, name: &str, value: &str) -> Result<()> {
        self.fields_mut().set_config(name, value)
    }
}

/// One node's event: a kind plus the state the sequencer attaches to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub kind: EventKind,
    pub is_active: bool,
    /// Array written by an input, or read by a display or save event.
    pub m_id: Option<usize>,
    /// Arrays written anywhere below a loop.
    pub m_ids: Vec<usize>,
    /// Axis of the arrays a scan or repeat loop iterates over.
    pub dim: Option<usize>,
}

impl Event {
    pub fn new(kind: EventKind) -> Event {
        Event {
            id: EventId::new(),
            name: kind.class().replace('_', " "),
            kind,
            is_active: true,
            m_id: None,
            m_ids: Vec::new(),
            dim: None,
        }
    }

    pub fn from_class(class: &str) -> Option<Event> {
        EventKind::from_class(class).map(Event::new)
    }

    pub fn named(mut self, name: &str) -> Event {
        self.name = name.to_string();
        self
    }

    pub fn class(&self) -> &'static str {
        self.kind.class()
    }

    /// Sets a config attribute, returning the event for chaining.
    ///
    /// Used when building trees in code.
    pub fn with(mut self, name: &str, value: impl ToString) -> Result<Event> {
        self.kind.set_config(name, &value.to_string())?;
        Ok(self)
    }

    /// Clears everything a previous shape inference attached.
    pub fn clear_ids(&mut self) {
        self.m_id = None;
        self.m_ids.clear();
        self.dim = None;
    }

    /// Checks the configuration against the array the event resolved to.
    pub fn check_validity(&self, array: Option<&DataArray>) -> Result<()> {
        let invalid = |why: &str| Err(TerapyError::SequenceInvalid(format!("{}: {}", self.name, why)));
        match &self.kind {
            EventKind::Sequence(_) => Ok(()),
            EventKind::Scan(scan) => {
                if scan.axis.is_empty() {
                    return invalid("no axis selected");
                }
                if scan.is_empty() {
                    return invalid("the scan has no positions");
                }
                if scan.mode != ScanMode::List && !(scan.min.is_finite() && scan.max.is_finite()) {
                    return invalid("the scan bounds must be finite");
                }
                Ok(())
            }
            EventKind::Repeat(RepeatLoop { n }) | EventKind::Average(AverageLoop { n }) => {
                if *n == 0 {
                    return invalid("the number of iterations must be positive");
                }
                Ok(())
            }
            EventKind::Move(m) => {
                if m.axis.is_empty() {
                    return invalid("no axis selected");
                }
                if !m.position.is_finite() {
                    return invalid("the position must be finite");
                }
                Ok(())
            }
            EventKind::MoveUntil(m) => {
                if m.axis.is_empty() || m.input.is_empty() {
                    return invalid("an axis and an input are needed");
                }
                Ok(())
            }
            EventKind::Wait(_) => Ok(()),
            EventKind::Reset(r) => {
                if r.device.is_empty() {
                    return invalid("no device selected");
                }
                Ok(())
            }
            EventKind::Store(s) => {
                if s.tag.is_empty() || s.device.is_empty() {
                    return invalid("a tag and a device are needed");
                }
                Ok(())
            }
            EventKind::Read(_) | EventKind::ReadAvg(_) => {
                if let EventKind::ReadAvg(r) = &self.kind {
                    if r.samples == 0 {
                        return invalid("at least one sample is needed");
                    }
                }
                match array {
                    Some(array) if array.is_consistent() => Ok(()),
                    Some(_) => invalid("the data array is inconsistent"),
                    None => invalid("no data array allocated"),
                }
            }
            EventKind::Display(_) | EventKind::Save(_) => match array {
                Some(_) => Ok(()),
                None => invalid("there is no data to show or save"),
            },
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.class())
    }
}

//! Runs an annotated sequence against the devices of a [`CoreContext`].
//!
//! Execution is a depth-first walk over the active events. Loops own the
//! cursor of the arrays below them: on exit each loop hands the cursor back
//! exactly as it found it. Every blocking step polls the shared `can_run`
//! flag, so clearing it unwinds the walk within one tick.

use super::event::{EventKind, ScanMode};
use super::shapes::shapes;
use super::tree::EventNode;
use crate::bus::{topics, Message};
use crate::config::CoreContext;
use crate::data_container::{DataArray, Measurement};
use crate::devices::{lock_device, SharedAxis};
use crate::error::{Result, TerapyError};
use crate::io::read_positions;
use crate::serializer;
use cancellable_loops::{for_each_cancellable, sleep_cancellable, wait_until_cancellable, DEFAULT_TICK};
use ndarray::ArrayD;
use num_complex::Complex64;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything a running event can touch.
pub struct RunContext<'a> {
    pub core: &'a CoreContext,
    pub measurement: &'a mut Measurement,
    pub can_run: &'a AtomicBool,
    /// Polling period of every suspension point.
    pub tick: Duration,
    /// Arrays a canvas was already requested for.
    shown: HashSet<usize>,
}

impl<'a> RunContext<'a> {
    pub fn new(core: &'a CoreContext, measurement: &'a mut Measurement, can_run: &'a AtomicBool) -> RunContext<'a> {
        RunContext {
            core,
            measurement,
            can_run,
            tick: DEFAULT_TICK,
            shown: HashSet::new(),
        }
    }

    pub fn can_run(&self) -> bool {
        self.can_run.load(Ordering::Relaxed)
    }
}

/// Resets the per-run state of every event below `node`.
///
/// Zig-zag scans start forward again, generated file names are dropped and
/// list scans reload their positions file.
pub fn refresh(node: &mut EventNode) -> Result<()> {
    match &mut node.event.kind {
        EventKind::Scan(scan) => {
            scan.forward = true;
            if scan.mode == ScanMode::List && !scan.file.is_empty() {
                let positions = read_positions(Path::new(&scan.file)).map_err(|err| {
                    TerapyError::SequenceInvalid(format!("{}: cannot read {}: {err}", node.event.name, scan.file))
                })?;
                scan.positions = positions.to_vec();
            }
        }
        EventKind::Save(save) => save.auto_name = None,
        _ => {}
    }
    for child in &mut node.children {
        refresh(child)?;
    }
    Ok(())
}

fn check_validity(node: &EventNode, arrays: &[DataArray]) -> Result<()> {
    if !node.event.is_active {
        return Ok(());
    }
    node.event.check_validity(node.event.m_id.and_then(|m| arrays.get(m)))?;
    node.children.iter().try_for_each(|child| check_validity(child, arrays))
}

/// Refreshes, annotates and validates `root`, then allocates its measurement.
///
/// Nothing is moved or read; a [`TerapyError::SequenceInvalid`] means the
/// sequence must not be started.
pub fn prepare(root: &mut EventNode, core: &CoreContext, name: &str) -> Result<Measurement> {
    refresh(root)?;
    let shapes = {
        let devices = core.devices();
        shapes(root, &devices)?
    };
    let arrays = shapes.allocate();
    check_validity(root, &arrays)?;

    let mut measurement = Measurement::new(name, root.clone());
    measurement.arrays = arrays;
    measurement.total = shapes.total;
    measurement.events_xml = serializer::events_to_xml(std::slice::from_ref(root))?;
    measurement.devices_xml = serializer::devices_to_xml(&core.devices().snapshot())?;
    log::info!(
        "prepared {name}: {} array(s), {} operation(s)",
        measurement.arrays.len(),
        measurement.total
    );
    Ok(measurement)
}

/// Runs the sequence `root` and publishes `scan.stop` when it ends.
///
/// Returns [`TerapyError::Cancelled`] when `can_run` was cleared before the end.
pub fn run(root: &mut EventNode, ctx: &mut RunContext<'_>) -> Result<()> {
    if !root.event.kind.is_root() {
        return Err(TerapyError::SequenceInvalid(format!("{} is not a sequence", root.event)));
    }
    for child in root.children.iter_mut() {
        if !ctx.can_run() {
            break;
        }
        if !child.event.is_active {
            continue;
        }
        if child.event.kind.is_loop() {
            ctx.measurement.for_arrays(&child.event.m_ids, DataArray::reset_counter);
        }
        dispatch(child, ctx);
    }
    let completed = ctx.can_run();
    ctx.core.bus.publish(topics::SCAN_STOP, Message::Empty);
    if completed {
        Ok(())
    } else {
        log::info!("{} cancelled after {} operation(s)", ctx.measurement.name, ctx.measurement.current());
        Err(TerapyError::Cancelled)
    }
}

fn dispatch(node: &mut EventNode, ctx: &mut RunContext<'_>) {
    let is_input = node.event.kind.is_input();
    if let Err(err) = run_event(node, ctx) {
        log::error!("{}: {err}", node.event);
    }
    if is_input {
        ctx.measurement.advance();
    }
}

fn run_children(node: &mut EventNode, ctx: &mut RunContext<'_>) {
    for child in node.children.iter_mut() {
        if !ctx.can_run() {
            return;
        }
        if !child.event.is_active {
            continue;
        }
        if child.event.kind.has_scan_dimension() {
            let dim = child.event.dim.unwrap_or(0);
            ctx.measurement.for_arrays(&child.event.m_ids, |array| {
                for _ in array.scan_dim..dim {
                    array.increment_scan_dimension();
                }
            });
        }
        dispatch(child, ctx);
    }
}

fn run_event(node: &mut EventNode, ctx: &mut RunContext<'_>) -> Result<()> {
    match &node.event.kind {
        EventKind::Sequence(_) => Err(TerapyError::SequenceInvalid("nested sequence".to_string())),
        EventKind::Scan(_) => run_scan(node, ctx),
        EventKind::Repeat(repeat) => {
            let n = repeat.n;
            run_repeat(node, n, ctx);
            Ok(())
        }
        EventKind::Average(average) => {
            let n = average.n;
            run_average(node, n, ctx);
            Ok(())
        }
        EventKind::Move(m) => {
            let device = axis_device(ctx.core, &m.axis)?;
            let target = if m.relative {
                lock_device(&device, &m.axis)?.pos()? + m.position
            } else {
                m.position
            };
            if m.wait {
                move_axis(&device, &m.axis, target, ctx)?;
            } else {
                lock_device(&device, &m.axis)?.go_to(target, false)?;
            }
            Ok(())
        }
        EventKind::MoveUntil(m) => {
            let device = axis_device(ctx.core, &m.axis)?;
            lock_device(&device, &m.axis)?.go_to(m.target, false)?;
            let reached = wait_until_cancellable(ctx.tick, ctx.can_run, || {
                let value = match read_input(ctx.core, &m.input) {
                    Ok(values) => values.get(m.quantity).copied().unwrap_or(f64::NAN),
                    Err(err) => {
                        log::error!("{err}");
                        return true;
                    }
                };
                let crossed = if m.above { value >= m.threshold } else { value <= m.threshold };
                let moving = lock_device(&device, &m.axis)
                    .and_then(|mut d| d.get_motion_status())
                    .map(|status| status != 0)
                    .unwrap_or(false);
                crossed || !moving
            });
            log::debug!("{} stopped (condition met: {reached})", m.axis);
            let stopped = lock_device(&device, &m.axis)?.stop();
            stopped
        }
        EventKind::Wait(wait) => {
            sleep_cancellable(Duration::from_millis(wait.ms as u64), ctx.tick, ctx.can_run);
            Ok(())
        }
        EventKind::Reset(reset) => {
            let devices = ctx.core.devices();
            if let Some(axis) = devices.axis(&reset.device) {
                lock_device(&axis, &reset.device)?.reset()
            } else if let Some(input) = devices.input(&reset.device) {
                lock_device(&input, &reset.device)?.reset()
            } else {
                Err(TerapyError::device(&reset.device, "not connected"))
            }
        }
        EventKind::Store(store) => {
            let axis = ctx.core.devices().axis(&store.device);
            let value = match axis {
                Some(axis) => lock_device(&axis, &store.device)?.pos()?,
                None => read_input(ctx.core, &store.device)?
                    .get(store.quantity)
                    .copied()
                    .unwrap_or(f64::NAN),
            };
            ctx.core.store_tag(&store.tag, value);
            Ok(())
        }
        EventKind::Read(read) => {
            let value = read_input(ctx.core, &read.input)
                .map(|values| values.get(read.quantity).copied().unwrap_or(f64::NAN))
                .unwrap_or_else(|err| {
                    log::error!("{err}");
                    f64::NAN
                });
            write_value(ctx, node.event.m_id, value);
            Ok(())
        }
        EventKind::ReadAvg(read) => {
            let (name, samples) = (read.input.clone(), read.samples.max(1));
            let mut sum = 0.0;
            let mut count = 0;
            for _ in 0..samples {
                if !ctx.can_run() {
                    break;
                }
                match read_input(ctx.core, &name) {
                    Ok(values) if !values.is_empty() => {
                        sum += values.iter().sum::<f64>() / values.len() as f64;
                        count += 1;
                    }
                    Ok(_) => log::warn!("{name} returned no values"),
                    Err(err) => log::error!("{err}"),
                }
            }
            let value = if count > 0 { sum / count as f64 } else { f64::NAN };
            write_value(ctx, node.event.m_id, value);
            Ok(())
        }
        EventKind::Display(_) => {
            let m = node.event.m_id.ok_or_else(|| TerapyError::SequenceInvalid("no array to display".to_string()))?;
            let Some(array) = ctx.measurement.array(m) else {
                return Ok(());
            };
            let array = Arc::new(array.clone());
            if ctx.shown.insert(m) {
                ctx.core
                    .bus
                    .publish(topics::REQUEST_CANVAS, Message::Text(array.name.clone()));
            }
            ctx.core.bus.publish(topics::BROADCAST_REFRESH, Message::Array(array));
            Ok(())
        }
        EventKind::Save(_) => run_save(node, ctx),
    }
}

fn axis_device(core: &CoreContext, name: &str) -> Result<SharedAxis> {
    core.devices()
        .axis(name)
        .ok_or_else(|| TerapyError::device(name, "not connected"))
}

fn read_input(core: &CoreContext, name: &str) -> Result<Vec<f64>> {
    let device = core
        .devices()
        .input(name)
        .ok_or_else(|| TerapyError::device(name, "not connected"))?;
    let values = lock_device(&device, name)?.read()?;
    Ok(values)
}

fn write_value(ctx: &mut RunContext<'_>, m_id: Option<usize>, value: f64) {
    if let Some(array) = m_id.and_then(|m| ctx.measurement.array_mut(m)) {
        array.set_value(value);
    }
}

/// Starts a move to `target` and polls until it ends or the run is cancelled.
///
/// Returns the position reported once the axis stopped.
fn move_axis(device: &SharedAxis, name: &str, target: f64, ctx: &RunContext<'_>) -> Result<f64> {
    lock_device(device, name)?.go_to(target, false)?;
    let mut failure = None;
    let done = wait_until_cancellable(ctx.tick, ctx.can_run, || {
        match lock_device(device, name).and_then(|mut d| d.get_motion_status()) {
            Ok(status) => status == 0,
            Err(err) => {
                failure = Some(err);
                true
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    let mut axis = lock_device(device, name)?;
    if !done {
        axis.stop()?;
    }
    axis.pos()
}

fn run_scan(node: &mut EventNode, ctx: &mut RunContext<'_>) -> Result<()> {
    let EventKind::Scan(scan) = &mut node.event.kind else {
        return Ok(());
    };
    let name = scan.axis.clone();
    let device = axis_device(ctx.core, &name)?;
    let n = scan.len();
    let forward = scan.mode != ScanMode::ZigZag || scan.forward;
    if scan.mode == ScanMode::ZigZag {
        scan.forward = !scan.forward;
    }
    let mut last = lock_device(&device, &name)?.pos().unwrap_or(f64::NAN);
    let offset = if scan.mode == ScanMode::Relative { last } else { 0.0 };
    let targets: Vec<f64> = (0..n).map(|k| scan.target(k) + offset).collect();
    if let Err(err) = lock_device(&device, &name).and_then(|mut d| d.prepare_scan()) {
        log::error!("{err}");
    }

    let dim = node.event.dim.unwrap_or(0);
    let m_ids = node.event.m_ids.clone();
    let can_run = ctx.can_run;
    for_each_cancellable(0..n, can_run, |k| {
        let slot = if forward { k } else { n - 1 - k };
        ctx.measurement.for_arrays(&m_ids, |a| a.set_position(dim, slot));
        match move_axis(&device, &name, targets[slot], ctx) {
            Ok(position) => last = position,
            Err(err) => log::error!("{err}"),
        }
        if !ctx.can_run() {
            return;
        }
        ctx.measurement.for_arrays(&m_ids, |a| a.set_coordinate(last));
        run_children(node, ctx);
        ctx.measurement.for_arrays(&m_ids, |a| {
            if forward {
                a.increment(dim)
            } else {
                a.decrement(dim)
            }
        });
    });

    ctx.measurement.for_arrays(&m_ids, |a| {
        if forward {
            a.decrement(dim)
        } else {
            a.increment(dim)
        }
        if dim > 0 {
            a.decrement_scan_dimension();
        }
    });
    Ok(())
}

fn run_repeat(node: &mut EventNode, n: usize, ctx: &mut RunContext<'_>) {
    let dim = node.event.dim.unwrap_or(0);
    let m_ids = node.event.m_ids.clone();
    let can_run = ctx.can_run;
    for_each_cancellable(0..n, can_run, |k| {
        ctx.measurement.for_arrays(&m_ids, |a| {
            a.set_position(dim, k);
            a.set_coordinate(k as f64);
        });
        run_children(node, ctx);
        ctx.measurement.for_arrays(&m_ids, |a| a.increment(dim));
    });
    ctx.measurement.for_arrays(&m_ids, |a| {
        a.decrement(dim);
        if dim > 0 {
            a.decrement_scan_dimension();
        }
    });
}

/// The body writes into the real arrays; after each complete iteration the
/// block under the cursor is added to a running sum, and the mean of the
/// completed iterations replaces the block at the end.
fn run_average(node: &mut EventNode, n: usize, ctx: &mut RunContext<'_>) {
    let level = node.event.dim.unwrap_or(0);
    let m_ids = node.event.m_ids.clone();
    let mut sums: Vec<Option<ArrayD<Complex64>>> = vec![None; m_ids.len()];
    let mut completed = 0usize;
    let can_run = ctx.can_run;
    for_each_cancellable(0..n, can_run, |_| {
        run_children(node, ctx);
        if !ctx.can_run() {
            return;
        }
        for (sum, m) in sums.iter_mut().zip(&m_ids) {
            let Some(array) = ctx.measurement.array(*m) else { continue };
            let block = array.block(level);
            match sum {
                Some(sum) => *sum += &block,
                None => *sum = Some(block),
            }
        }
        completed += 1;
    });
    if completed == 0 {
        return;
    }
    for (sum, m) in sums.into_iter().zip(&m_ids) {
        let (Some(sum), Some(array)) = (sum, ctx.measurement.array_mut(*m)) else {
            continue;
        };
        let mean = sum.mapv(|v| v / completed as f64);
        array.block_mut(level).assign(&mean);
    }
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// `<sequence>_<array>_<start time>.csv` in `dir`.
pub fn auto_save_path(dir: &Path, measurement: &Measurement, array: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.csv",
        sanitize(&measurement.name),
        sanitize(array),
        measurement.started.format("%Y%m%d_%H%M%S")
    ))
}

fn run_save(node: &mut EventNode, ctx: &mut RunContext<'_>) -> Result<()> {
    let m = node
        .event
        .m_id
        .ok_or_else(|| TerapyError::SequenceInvalid("no array to save".to_string()))?;
    let EventKind::Save(save) = &mut node.event.kind else {
        return Ok(());
    };
    let Some(array) = ctx.measurement.array(m) else {
        return Ok(());
    };
    let default_path = ctx.core.settings().default_path;
    let path = if save.file.is_empty() {
        save.auto_name
            .get_or_insert_with(|| auto_save_path(&default_path, &*ctx.measurement, &array.name))
            .clone()
    } else {
        let file = PathBuf::from(&save.file);
        if file.is_absolute() {
            file
        } else {
            default_path.join(file)
        }
    };
    ctx.core.formats.save(&path, array, Some(&array.name))?;
    log::info!("saved {} to {}", array.name, path.display());
    if let Some(array) = ctx.measurement.array_mut(m) {
        array.filename = Some(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::simulated::{SimulatedAxis, SimulatedInput};
    use crate::devices::DeviceRegistry;
    use crate::events::event::Event;
    use crate::units::AxisInfo;
    use approx::assert_relative_eq;
    use ndarray::IxDyn;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn node(class: &str, attrs: &[(&str, &str)]) -> EventNode {
        let mut event = Event::from_class(class).unwrap();
        for (name, value) in attrs {
            event = event.with(name, value).unwrap();
        }
        EventNode::new(event)
    }

    fn core() -> CoreContext {
        let mut devices = DeviceRegistry::new();
        devices.add_axis(SimulatedAxis::new("A", AxisInfo::parse("Position", "mm")).with_busy_polls(2));
        devices.add_input(SimulatedInput::sequence("I", &[1.0, 2.0, 3.0, 4.0]));
        CoreContext::default().with_devices(devices)
    }

    fn execute(core: &CoreContext, root: &mut EventNode) -> Measurement {
        let mut measurement = prepare(root, core, "test").unwrap();
        let can_run = AtomicBool::new(true);
        let mut ctx = RunContext::new(core, &mut measurement, &can_run);
        ctx.tick = Duration::from_millis(1);
        run(root, &mut ctx).unwrap();
        measurement
    }

    #[test]
    fn repeat_writes_one_sample_per_iteration() {
        let core = core();
        let mut root = node("Sequence", &[])
            .with_child(node("Repeat", &[("n", "4")]).with_child(node("Read", &[("input", "I")])));
        let m = execute(&core, &mut root);
        assert_eq!(m.arrays[0].real_values(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.arrays[0].coords[0].to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(m.current(), 4);
        assert_eq!(m.total, 4);
    }

    #[test]
    fn relative_scan_moves_around_the_entry_position() {
        let mut devices = DeviceRegistry::new();
        let axis = SimulatedAxis::new("A", AxisInfo::parse("Position", "mm")).with_position(5.0);
        let moves = axis.move_log();
        devices.add_axis(axis);
        devices.add_input(SimulatedInput::constant("I", vec![1.0]));
        let core = CoreContext::default().with_devices(devices);
        let mut root = node("Sequence", &[]).with_child(
            node("Scan_Relative", &[("axis", "A"), ("min", "-1"), ("max", "1"), ("n", "3")])
                .with_child(node("Read", &[("input", "I")])),
        );
        let m = execute(&core, &mut root);
        assert_eq!(*moves.lock().unwrap(), vec![4.0, 5.0, 6.0]);
        assert_eq!(m.arrays[0].coords[0].to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn move_store_and_reset() {
        let core = core();
        let mut root = node("Sequence", &[])
            .with_child(node("Move", &[("axis", "A"), ("position", "2.5")]))
            .with_child(node("Store", &[("tag", "here"), ("device", "A")]))
            .with_child(node("Move", &[("axis", "A"), ("position", "1"), ("relative", "true")]))
            .with_child(node("Store", &[("tag", "there"), ("device", "A")]))
            .with_child(node("Store", &[("tag", "reading"), ("device", "I")]))
            .with_child(node("Reset", &[("device", "A")]))
            .with_child(node("Store", &[("tag", "home"), ("device", "A")]));
        execute(&core, &mut root);
        assert_eq!(core.tag("here"), Some(2.5));
        assert_eq!(core.tag("there"), Some(3.5));
        assert_eq!(core.tag("reading"), Some(1.0));
        assert_eq!(core.tag("home"), Some(0.0));
        assert_eq!(core.tag("missing"), None);
    }

    #[test]
    fn move_until_stops_on_the_threshold() {
        let mut devices = DeviceRegistry::new();
        let axis = SimulatedAxis::new("A", AxisInfo::parse("Position", "mm")).with_busy_polls(1000);
        devices.add_axis(axis);
        devices.add_input(SimulatedInput::sequence("I", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]));
        let core = CoreContext::default().with_devices(devices);
        let mut root = node("Sequence", &[]).with_child(node(
            "Move_Until",
            &[("axis", "A"), ("target", "100"), ("input", "I"), ("threshold", "3")],
        ));
        execute(&core, &mut root);
        let axis = core.devices().axis("A").unwrap();
        let mut axis = axis.lock().unwrap();
        assert_eq!(axis.get_motion_status().unwrap(), 0);
        assert!(axis.pos().unwrap() < 100.0);
    }

    #[test]
    fn display_requests_a_canvas_once() {
        let core = core();
        let events = Arc::new(Mutex::new(Vec::new()));
        for topic in [topics::REQUEST_CANVAS, topics::BROADCAST_REFRESH] {
            let sink = events.clone();
            core.bus.subscribe(topic, move |_| sink.lock().unwrap().push(topic));
        }
        let mut root = node("Sequence", &[]).with_child(
            node("Repeat", &[("n", "3")])
                .with_child(node("Read", &[("input", "I")]))
                .with_child(node("Display", &[])),
        );
        execute(&core, &mut root);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                topics::REQUEST_CANVAS,
                topics::BROADCAST_REFRESH,
                topics::BROADCAST_REFRESH,
                topics::BROADCAST_REFRESH
            ]
        );
    }

    #[test]
    fn save_generates_a_name_under_the_default_path() {
        let dir = tempdir().unwrap();
        let core = core();
        core.update_settings(|s| s.default_path = dir.path().to_path_buf());
        let mut root = node("Sequence", &[])
            .with_child(node("Repeat", &[("n", "2")]).with_child(node("Read", &[("input", "I")])))
            .with_child(node("Save", &[]));
        let m = execute(&core, &mut root);
        let path = m.arrays[0].filename.clone().unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("test_Read_"));
        let loaded = core.formats.load(&path).unwrap();
        assert_relative_eq!(loaded[0].data[IxDyn(&[1])].re, 2.0);

        refresh(&mut root).unwrap();
        let EventKind::Save(save) = &root.children[1].event.kind else {
            panic!("not a save event");
        };
        assert!(save.auto_name.is_none());
    }

    #[test]
    fn list_scan_reads_positions_from_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("positions.txt");
        std::fs::write(&file, "0.5\n1.5\n4\n").unwrap();
        let file_name = file.to_string_lossy().to_string();
        let core = core();
        let mut root = node("Sequence", &[]).with_child(
            node("Scan_List", &[("axis", "A"), ("file", file_name.as_str())])
                .with_child(node("Read", &[("input", "I")])),
        );
        let m = execute(&core, &mut root);
        assert_eq!(m.arrays[0].shape, vec![3]);
        assert_eq!(m.arrays[0].coords[0].to_vec(), vec![0.5, 1.5, 4.0]);

        std::fs::remove_file(&file).unwrap();
        assert!(matches!(
            prepare(&mut root, &core, "again"),
            Err(TerapyError::SequenceInvalid(_))
        ));
    }

    #[test]
    fn failing_reads_leave_nan_and_the_run_goes_on() {
        let mut devices = DeviceRegistry::new();
        devices.add_input(SimulatedInput::constant("I", vec![1.0]).failing());
        let core = CoreContext::default().with_devices(devices);
        let mut root = node("Sequence", &[])
            .with_child(node("Repeat", &[("n", "2")]).with_child(node("Read", &[("input", "I")])));
        let m = execute(&core, &mut root);
        assert!(m.arrays[0].real_values().iter().all(|v| v.is_nan()));
        assert_eq!(m.current(), 2);
    }

    #[test]
    fn cleared_flag_cancels_before_the_first_event() {
        let core = core();
        let mut root = node("Sequence", &[]).with_child(node("Read", &[("input", "I")]));
        let mut measurement = prepare(&mut root, &core, "test").unwrap();
        let can_run = AtomicBool::new(false);
        let mut ctx = RunContext::new(&core, &mut measurement, &can_run);
        assert!(matches!(run(&mut root, &mut ctx), Err(TerapyError::Cancelled)));
        assert_eq!(measurement.current(), 0);
    }
}

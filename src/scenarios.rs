//! End-to-end runs through the worker, the filter banks and the history.

use crate::bus::{topics, Message};
use crate::config::CoreContext;
use crate::data_container::DataArray;
use crate::devices::simulated::{SimulatedAxis, SimulatedInput};
use crate::devices::DeviceRegistry;
use crate::events::event::Event;
use crate::events::tree::EventNode;
use crate::filters::apodization::Apodization;
use crate::filters::bank::SharedBank;
use crate::filters::filter::Filter;
use crate::filters::fourier::{FourierTransform, SpectrumMode};
use crate::filters::normalize::Normalize;
use crate::filters::reference::ReferenceCoordinator;
use crate::serializer;
use crate::units::{AxisInfo, UnitQuantity};
use crate::worker::start_sequence;
use approx::assert_relative_eq;
use crossbeam_channel::unbounded;
use ndarray::IxDyn;
use num_complex::Complex64;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn node(class: &str, attrs: &[(&str, &str)]) -> EventNode {
    let mut event = Event::from_class(class).unwrap();
    for (name, value) in attrs {
        event = event.with(name, value).unwrap();
    }
    EventNode::new(event)
}

fn core_with(devices: DeviceRegistry) -> Arc<CoreContext> {
    let core = CoreContext::default().with_devices(devices);
    core.update_settings(|s| s.refresh_delay = Duration::from_millis(5));
    Arc::new(core)
}

#[test]
fn straight_scan_with_averaged_reads() {
    let mut devices = DeviceRegistry::new();
    let axis = SimulatedAxis::new("A", AxisInfo::parse("Position", "mm"));
    let moves = axis.move_log();
    devices.add_axis(axis);
    devices.add_input(SimulatedInput::constant("I", vec![2.0, 4.0]));
    let core = core_with(devices);

    let root = node("Sequence", &[]).with_child(
        node("Scan", &[("axis", "A"), ("min", "0"), ("max", "10"), ("n", "11")])
            .with_child(node("Read_Avg", &[("input", "I"), ("quantity", "0")])),
    );
    let measurement = start_sequence(&core, root, "line").unwrap().join().unwrap();

    assert_eq!(measurement.total, 11);
    assert_eq!(measurement.current(), 11);
    assert_eq!(measurement.arrays.len(), 1);
    let array = &measurement.arrays[0];
    assert_eq!(array.shape, vec![11]);
    assert!(array.is_consistent());
    for k in 0..11 {
        assert_relative_eq!(array.coords[0][k], k as f64);
        assert_relative_eq!(array.data[IxDyn(&[k])].re, 3.0);
    }
    assert_eq!(moves.lock().unwrap().len(), 11);

    let snapshot = serializer::events_from_xml(&measurement.events_xml).unwrap();
    assert!(snapshot.roots[0].same_structure(&measurement.events));
}

#[test]
fn zig_zag_raster_keeps_rows_ordered() {
    let mut devices = DeviceRegistry::new();
    devices.add_axis(SimulatedAxis::new("A", AxisInfo::parse("X", "mm")));
    let fast = SimulatedAxis::new("B", AxisInfo::parse("Y", "mm"));
    let moves = fast.move_log();
    devices.add_axis(fast);
    // read k returns k, so the data records the traversal order
    devices.add_input(SimulatedInput::function("I", |k| vec![k as f64]));
    let core = core_with(devices);

    let root = node("Sequence", &[]).with_child(
        node("Scan", &[("axis", "A"), ("n", "3")]).with_child(
            node("Scan_ZZ", &[("axis", "B"), ("min", "0"), ("max", "4"), ("n", "5")])
                .with_child(node("Read", &[("input", "I")])),
        ),
    );
    let measurement = start_sequence(&core, root, "raster").unwrap().join().unwrap();

    let forward = [0.0, 1.0, 2.0, 3.0, 4.0];
    let backward = [4.0, 3.0, 2.0, 1.0, 0.0];
    let expected: Vec<f64> = [forward, backward, forward].concat();
    assert_eq!(*moves.lock().unwrap(), expected);

    let array = &measurement.arrays[0];
    assert_eq!(array.shape, vec![3, 5]);
    assert!(array.coords[1].to_vec().windows(2).all(|w| w[0] < w[1]));
    let row = |i: usize| (0..5).map(|j| array.data[IxDyn(&[i, j])].re).collect::<Vec<_>>();
    assert_eq!(row(0), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(row(1), vec![9.0, 8.0, 7.0, 6.0, 5.0]);
    assert_eq!(row(2), vec![10.0, 11.0, 12.0, 13.0, 14.0]);
    assert_eq!(measurement.total, 15);
}

#[test]
fn average_of_five_reads() {
    let mut devices = DeviceRegistry::new();
    devices.add_input(SimulatedInput::sequence("I", &[1.0, 3.0, 5.0, 7.0, 9.0]));
    let core = core_with(devices);

    let root = node("Sequence", &[])
        .with_child(node("Average", &[("n", "5")]).with_child(node("Read", &[("input", "I")])));
    let measurement = start_sequence(&core, root, "average").unwrap().join().unwrap();

    let array = &measurement.arrays[0];
    assert!(array.shape.is_empty());
    assert_relative_eq!(array.data[IxDyn(&[])].re, 5.0);
    assert_eq!(measurement.current(), 5);
}

#[test]
fn total_counts_every_read_of_every_array() {
    let mut devices = DeviceRegistry::new();
    devices.add_axis(SimulatedAxis::new("A", AxisInfo::parse("X", "mm")));
    devices.add_input(SimulatedInput::constant("I", vec![1.0]));
    let core = core_with(devices);

    let root = node("Sequence", &[])
        .with_child(
            node("Scan", &[("axis", "A"), ("n", "3")])
                .with_child(node("Average", &[("n", "2")]).with_child(node("Read", &[("input", "I")])))
                .with_child(node("Read", &[("input", "I")])),
        )
        .with_child(node("Repeat", &[("n", "4")]).with_child(node("Read_Avg", &[("input", "I")])));
    let measurement = start_sequence(&core, root, "total").unwrap().join().unwrap();

    assert_eq!(measurement.arrays.len(), 3);
    assert_eq!(measurement.total, 3 * 2 + 3 + 4);
    assert_eq!(measurement.current(), measurement.total);
    assert!(measurement.arrays.iter().all(|a| a.data.iter().all(|v| v.re == 1.0)));
}

fn time_trace(n: usize, dt: f64, f: impl Fn(f64) -> f64) -> DataArray {
    let coords: Vec<f64> = (0..n).map(|k| k as f64 * dt).collect();
    let values = coords.iter().map(|t| f(*t)).collect();
    DataArray::from_trace(coords, values, AxisInfo::parse("Delay", "ps"), AxisInfo::parse("Signal", "V"))
}

#[test]
fn apodized_amplitude_spectrum() {
    let core = CoreContext::default();
    let bank = SharedBank::new("spectrum", 1, core.bus.clone());
    bank.append(Box::new(Apodization::new())).unwrap();
    bank.append(Box::new(FourierTransform {
        mode: SpectrumMode::Amplitude,
    }))
    .unwrap();

    let dt = 0.1;
    let trace = time_trace(128, dt, |t| (2.0 * std::f64::consts::PI * 1.5 * t).sin());
    let out = bank.apply_filters(&trace).unwrap();

    assert_eq!(out.shape, vec![63]);
    let fmax = 1.0 / dt / 2.0;
    assert!(out.coords[0].iter().all(|f| (0.0..=fmax).contains(f)));
    assert!(out.data.iter().all(|v| v.re >= 0.0 && v.im == 0.0));

    let ps = UnitQuantity::parse("ps").unwrap();
    let volt = UnitQuantity::parse("V").unwrap();
    assert_eq!(out.input.units.unit(), (&volt * &ps).unit());
    assert_eq!(out.axes[0].units.unit(), ps.inverse().unit());
    let labels = bank.get_units(&trace.units());
    assert_eq!(labels.last().map(|a| a.units.clone()), Some(out.input.units.unit()));
}

fn spectrum(trace: &DataArray) -> Vec<Complex64> {
    let mut out = trace.copy();
    FourierTransform::new().apply(&mut out).unwrap();
    out.data.iter().copied().collect()
}

fn assert_ratio(out: &DataArray, signal: &DataArray, reference: &DataArray) {
    let expected: Vec<Complex64> = spectrum(signal)
        .iter()
        .zip(spectrum(reference))
        .map(|(s, r)| s / r)
        .collect();
    assert_eq!(out.data.len(), expected.len());
    for (got, want) in out.data.iter().zip(&expected) {
        assert!((got - want).norm() <= 1e-9 * want.norm() + 1e-12, "{got} != {want}");
    }
}

#[test]
fn reference_normalization_follows_the_history() {
    let core = CoreContext::default();
    let coordinator = ReferenceCoordinator::attach(&core.bus);
    let bank = SharedBank::new("transmission", 1, core.bus.clone());
    bank.append(Box::new(FourierTransform::new())).unwrap();
    bank.append(Box::new(Normalize::new())).unwrap();
    coordinator.register(&bank);

    let pulse = |t0: f64, width: f64| move |t: f64| (-((t - t0) / width).powi(2)).exp();
    let reference = core.add_to_history(time_trace(64, 0.1, |t| if (t - 0.5).abs() < 1e-9 { 1.0 } else { 0.0 }));
    let sample = time_trace(64, 0.1, pulse(2.0, 0.4));

    core.bus
        .publish(topics::HISTORY_SET_REFERENCE, Message::Array(reference.clone()));
    assert_eq!(coordinator.source_of(bank.id()), Some(reference.id));
    let out = bank.apply_filters(&sample).unwrap();
    assert_ratio(&out, &sample, &reference);
    assert_eq!(out.input.name, "Transmission");

    let mut changed = time_trace(64, 0.1, pulse(1.0, 0.2));
    changed.id = reference.id;
    let changed = Arc::new(changed);
    core.bus
        .publish(topics::HISTORY_CHANGE_REFERENCE, Message::Array(changed.clone()));
    let out = bank.apply_filters(&sample).unwrap();
    assert_ratio(&out, &sample, &changed);
}

#[test]
fn stop_during_a_long_wait_ends_the_run_promptly() {
    let mut devices = DeviceRegistry::new();
    devices.add_input(SimulatedInput::constant("I", vec![1.0]));
    let core = core_with(devices);
    let (after_tx, after_rx) = unbounded();
    core.bus.subscribe(topics::SCAN_AFTER, move |_| {
        let _ = after_tx.send(Instant::now());
    });

    let root = node("Sequence", &[])
        .with_child(node("Read", &[("input", "I")]))
        .with_child(node("Wait", &[("ms", "10000")]));
    let scan = start_sequence(&core, root, "cancel").unwrap();
    thread::sleep(Duration::from_millis(50));
    let stopped = Instant::now();
    core.bus.publish(topics::SCAN_STOP, Message::Empty);

    let after = after_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    // within two 10 ms ticks of the stop request
    assert!(after.duration_since(stopped) < Duration::from_millis(20));
    let measurement = scan.join().unwrap();
    assert_eq!(measurement.current(), 1);
}

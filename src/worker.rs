//! Background execution of a sequence.
//!
//! A run uses two threads: the run worker owns the [`Measurement`] and is its
//! only writer, and the progress worker samples the shared operation counter
//! every `refresh_delay`. Both stop on `scan.stop`, which the run worker also
//! publishes itself when the sequence ends.

use crate::bus::{topics, EventBus, Message, SubscriptionId};
use crate::config::CoreContext;
use crate::data_container::{progress_percent, Measurement};
use crate::events::engine::{prepare, run, RunContext};
use crate::events::tree::EventNode;
use crate::error::{Result, TerapyError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle on a running sequence.
///
/// Dropping the handle without joining cancels the run.
#[derive(Debug)]
pub struct ScanRun {
    bus: EventBus,
    can_run: Arc<AtomicBool>,
    stop_listener: StopListener,
    runner: JoinHandle<Measurement>,
    progress: JoinHandle<()>,
}

/// The run's `scan.stop` subscription, released on drop.
#[derive(Debug)]
struct StopListener {
    bus: EventBus,
    can_run: Arc<AtomicBool>,
    subscription: SubscriptionId,
}

impl Drop for StopListener {
    fn drop(&mut self) {
        // nothing could stop the run once the listener is gone
        self.can_run.store(false, Ordering::Relaxed);
        self.bus.unsubscribe(topics::SCAN_STOP, self.subscription);
    }
}

/// Validates `root` and starts running it in the background.
///
/// An invalid sequence is reported with `set_status_text` and no thread is
/// started.
pub fn start_sequence(core: &Arc<CoreContext>, mut root: EventNode, name: &str) -> Result<ScanRun> {
    let mut measurement = match prepare(&mut root, core, name) {
        Ok(measurement) => measurement,
        Err(err) => {
            log::warn!("not starting {name}: {err}");
            core.bus.status(err.to_string());
            return Err(err);
        }
    };

    let can_run = Arc::new(AtomicBool::new(true));
    let (done_tx, done_rx) = bounded::<()>(1);
    let stop_listener = {
        let flag = can_run.clone();
        let subscription = core.bus.subscribe(topics::SCAN_STOP, move |_| {
            flag.store(false, Ordering::Relaxed);
            // the progress worker may already be gone
            let _ = done_tx.try_send(());
        });
        StopListener {
            bus: core.bus.clone(),
            can_run: can_run.clone(),
            subscription,
        }
    };

    let progress = {
        let bus = core.bus.clone();
        let current = measurement.current.clone();
        let total = measurement.total;
        let period = core.settings().refresh_delay;
        thread::Builder::new()
            .name("terapy-progress".to_string())
            .spawn(move || progress_worker(bus, current, total, period, done_rx))?
    };

    let runner = {
        let core = core.clone();
        let can_run = can_run.clone();
        let name = name.to_string();
        thread::Builder::new().name("terapy-run".to_string()).spawn(move || {
            core.bus.publish(topics::SCAN_START, Message::Text(name.clone()));
            log::info!("running {name}");
            let result = {
                let mut ctx = RunContext::new(&core, &mut measurement, &can_run);
                run(&mut root, &mut ctx)
            };
            match result {
                Ok(()) => log::info!("{name} finished, {} operation(s)", measurement.current()),
                Err(TerapyError::Cancelled) => {}
                Err(err) => {
                    log::error!("{name} aborted: {err}");
                    core.bus.publish(topics::SCAN_STOP, Message::Empty);
                }
            }
            let arrays = measurement
                .arrays
                .iter()
                .map(|array| core.add_to_history(array.clone()))
                .collect();
            core.bus.publish(topics::SCAN_AFTER, Message::Arrays(arrays));
            measurement
        })?
    };

    Ok(ScanRun {
        bus: core.bus.clone(),
        can_run,
        stop_listener,
        runner,
        progress,
    })
}

fn progress_worker(bus: EventBus, current: Arc<AtomicUsize>, total: usize, period: Duration, done: Receiver<()>) {
    let publish = || {
        let percent = progress_percent(current.load(Ordering::Relaxed), total);
        bus.publish(topics::PROGRESS_CHANGE, Message::Progress(percent));
    };
    loop {
        match done.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => publish(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    publish();
}

impl ScanRun {
    /// Requests cancellation by publishing `scan.stop`.
    pub fn stop(&self) {
        self.bus.publish(topics::SCAN_STOP, Message::Empty);
    }

    pub fn is_running(&self) -> bool {
        self.can_run.load(Ordering::Relaxed) && !self.runner.is_finished()
    }

    /// Waits for both workers and returns the measurement.
    pub fn join(self) -> Result<Measurement> {
        let measurement = self.runner.join().map_err(|_| TerapyError::WorkerPanic("run"));
        drop(self.stop_listener);
        if self.progress.join().is_err() {
            log::error!("{}", TerapyError::WorkerPanic("progress"));
        }
        measurement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::simulated::SimulatedInput;
    use crate::devices::DeviceRegistry;
    use crate::events::event::Event;
    use std::sync::Mutex;
    use std::time::Instant;

    fn node(class: &str, attrs: &[(&str, &str)]) -> EventNode {
        let mut event = Event::from_class(class).unwrap();
        for (name, value) in attrs {
            event = event.with(name, value).unwrap();
        }
        EventNode::new(event)
    }

    fn core() -> Arc<CoreContext> {
        let mut devices = DeviceRegistry::new();
        devices.add_input(SimulatedInput::constant("I", vec![1.0]));
        let core = CoreContext::default().with_devices(devices);
        core.update_settings(|s| s.refresh_delay = Duration::from_millis(5));
        Arc::new(core)
    }

    fn record(core: &CoreContext, topics: &[&'static str]) -> Arc<Mutex<Vec<&'static str>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for topic in topics {
            let sink = seen.clone();
            let topic = *topic;
            core.bus.subscribe(topic, move |_| sink.lock().unwrap().push(topic));
        }
        seen
    }

    #[test]
    fn run_publishes_lifecycle_and_fills_the_history() {
        let core = core();
        let seen = record(&core, &[topics::SCAN_START, topics::SCAN_STOP, topics::SCAN_AFTER]);
        let root = node("Sequence", &[]).with_child(
            node("Repeat", &[("n", "3")])
                .with_child(node("Read", &[("input", "I")]))
                .with_child(node("Wait", &[("ms", "5")])),
        );
        let measurement = start_sequence(&core, root, "lifecycle").unwrap().join().unwrap();
        assert_eq!(measurement.current(), 3);
        assert_eq!(measurement.progress(), 100.0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![topics::SCAN_START, topics::SCAN_STOP, topics::SCAN_AFTER]
        );
        assert_eq!(core.history().len(), 1);
    }

    #[test]
    fn invalid_sequences_are_reported_and_not_started() {
        let core = core();
        let status = Arc::new(Mutex::new(None));
        let sink = status.clone();
        core.bus.subscribe(topics::SET_STATUS_TEXT, move |m| {
            *sink.lock().unwrap() = m.as_text().map(str::to_string);
        });
        let seen = record(&core, &[topics::SCAN_START]);
        let root = node("Sequence", &[]).with_child(node("Save", &[]));
        assert!(matches!(
            start_sequence(&core, root, "broken"),
            Err(TerapyError::SequenceInvalid(_))
        ));
        assert!(status.lock().unwrap().is_some());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn progress_is_reported_until_the_end() {
        let core = core();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        core.bus.subscribe(topics::PROGRESS_CHANGE, move |m| {
            if let Message::Progress(p) = m {
                sink.lock().unwrap().push(*p);
            }
        });
        let root = node("Sequence", &[]).with_child(
            node("Repeat", &[("n", "4")])
                .with_child(node("Read", &[("input", "I")]))
                .with_child(node("Wait", &[("ms", "20")])),
        );
        start_sequence(&core, root, "progress").unwrap().join().unwrap();
        let progress = progress.lock().unwrap();
        assert!(progress.len() >= 2);
        assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
        assert_eq!(progress.last(), Some(&100.0));
    }

    #[test]
    fn stop_interrupts_a_long_wait() {
        let core = core();
        let root = node("Sequence", &[])
            .with_child(node("Read", &[("input", "I")]))
            .with_child(node("Wait", &[("ms", "60000")]));
        let scan = start_sequence(&core, root, "long").unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(scan.is_running());
        let start = Instant::now();
        scan.stop();
        let measurement = scan.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(measurement.current(), 1);
    }

    #[test]
    fn finished_runs_release_their_stop_listener() {
        let core = core();
        let root = node("Sequence", &[]).with_child(node("Read", &[("input", "I")]));
        start_sequence(&core, root, "joined").unwrap().join().unwrap();
        assert!(!core.bus.has_listeners(topics::SCAN_STOP));

        let root = node("Sequence", &[]).with_child(node("Read", &[("input", "I")]));
        let scan = start_sequence(&core, root, "dropped").unwrap();
        assert!(core.bus.has_listeners(topics::SCAN_STOP));
        drop(scan);
        assert!(!core.bus.has_listeners(topics::SCAN_STOP));
    }

    #[test]
    fn dropping_the_handle_cancels_the_run() {
        let core = core();
        let (after_tx, after_rx) = bounded(1);
        core.bus.subscribe(topics::SCAN_AFTER, move |_| {
            let _ = after_tx.try_send(Instant::now());
        });
        let root = node("Sequence", &[])
            .with_child(node("Read", &[("input", "I")]))
            .with_child(node("Wait", &[("ms", "60000")]));
        let scan = start_sequence(&core, root, "abandoned").unwrap();
        thread::sleep(Duration::from_millis(30));
        let dropped = Instant::now();
        drop(scan);
        let after = after_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(after.duration_since(dropped) < Duration::from_secs(1));
        assert_eq!(core.history().len(), 1);
    }
}

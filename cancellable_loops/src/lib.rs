//! # cancellable_loops
//!
//! A small utility crate for loops, sleeps and polls that stop early once a shared
//! run flag is cleared.
//!
//! Every blocking primitive in a measurement sequence has to observe the same
//! `can_run` flag, so this crate provides the three shapes that occur in practice:
//!
//! - a sequential loop that stops between items,
//! - a sleep that wakes up every `tick` to look at the flag,
//! - a poll that waits for a condition while looking at the flag.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//! use cancellable_loops::{for_each_cancellable, sleep_cancellable};
//!
//! let can_run = AtomicBool::new(true);
//! let mut visited = 0;
//!
//! let completed = for_each_cancellable(0..10, &can_run, |i| {
//!     visited += 1;
//!     if i == 3 {
//!         can_run.store(false, Ordering::Relaxed);
//!     }
//! });
//!
//! assert!(!completed);
//! assert_eq!(visited, 4);
//! // a cleared flag makes the sleep return immediately
//! assert!(!sleep_cancellable(Duration::from_secs(10), Duration::from_millis(10), &can_run));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Default polling tick used by the sequencer for every suspension point.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Executes a sequential loop that stops as soon as `can_run` is cleared.
///
/// The flag is checked before every item, so an item that is already running
/// is allowed to finish.
///
/// # Returns
///
/// `true` if every item was processed, `false` if the loop was cancelled.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use cancellable_loops::for_each_cancellable;
///
/// let can_run = AtomicBool::new(true);
/// let mut sum = 0;
/// assert!(for_each_cancellable(1..=10, &can_run, |i| sum += i));
/// assert_eq!(sum, 55);
/// ```
pub fn for_each_cancellable<I, F, T>(iter: I, can_run: &AtomicBool, mut func: F) -> bool
where
    I: IntoIterator<Item = T>,
    F: FnMut(T),
{
    for item in iter {
        if !can_run.load(Ordering::Relaxed) {
            return false;
        }
        func(item);
    }
    true
}

/// Sleeps for `duration`, waking up every `tick` to check `can_run`.
///
/// # Returns
///
/// `true` if the full duration elapsed, `false` if the sleep was cut short.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use std::time::Duration;
/// use cancellable_loops::sleep_cancellable;
///
/// let can_run = AtomicBool::new(true);
/// assert!(sleep_cancellable(Duration::from_millis(5), Duration::from_millis(1), &can_run));
/// ```
pub fn sleep_cancellable(duration: Duration, tick: Duration, can_run: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !can_run.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(tick.min(deadline - now));
    }
}

/// Polls `condition` every `tick` until it returns `true` or `can_run` is cleared.
///
/// The condition is evaluated once before the first sleep, so an already
/// satisfied condition returns without waiting.
///
/// # Returns
///
/// `true` if the condition was met, `false` if the wait was cancelled.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use std::time::Duration;
/// use cancellable_loops::wait_until_cancellable;
///
/// let can_run = AtomicBool::new(true);
/// let mut polls = 0;
/// let done = wait_until_cancellable(Duration::from_millis(1), &can_run, || {
///     polls += 1;
///     polls == 3
/// });
/// assert!(done);
/// assert_eq!(polls, 3);
/// ```
pub fn wait_until_cancellable<F>(tick: Duration, can_run: &AtomicBool, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    loop {
        if !can_run.load(Ordering::Relaxed) {
            return false;
        }
        if condition() {
            return true;
        }
        thread::sleep(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn cleared_flag_skips_every_item() {
        let can_run = AtomicBool::new(false);
        let mut count = 0;
        assert!(!for_each_cancellable(0..5, &can_run, |_| count += 1));
        assert_eq!(count, 0);
    }

    #[test]
    fn sleep_returns_promptly_after_cancellation() {
        let can_run = Arc::new(AtomicBool::new(true));
        let flag = can_run.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(false, Ordering::Relaxed);
        });
        let start = Instant::now();
        let completed = sleep_cancellable(Duration::from_secs(10), DEFAULT_TICK, &can_run);
        let elapsed = start.elapsed();
        handle.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn wait_until_stops_when_cancelled() {
        let can_run = AtomicBool::new(true);
        let mut polls = 0;
        let met = wait_until_cancellable(Duration::from_millis(1), &can_run, || {
            polls += 1;
            if polls == 2 {
                can_run.store(false, Ordering::Relaxed);
            }
            false
        });
        assert!(!met);
        assert_eq!(polls, 2);
    }
}

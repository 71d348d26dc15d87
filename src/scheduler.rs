//! A shared scheduler that runs fetch tasks on worker threads and drives polling timers.
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::{Duration, Instant},
};

use crate::{Error, Result};

/// Runs one-off tasks and fixed-rate timers on background threads.
///
/// The scheduler keeps no idle threads: every submitted task gets a worker thread that exits when
/// the task is done, and every timer owns one thread for as long as it is active. Threads are
/// detached, so they never prevent the process from exiting.
///
/// Cloning a `Scheduler` produces another handle to the same scheduler.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    shut_down: AtomicBool,
    timers: Mutex<Vec<Weak<TimerControl>>>,
    next_thread_id: AtomicUsize,
}

#[derive(Default)]
struct TimerControl {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl TimerControl {
    fn lock(&self) -> MutexGuard<'_, bool> {
        // The flag is a plain bool, so it is valid even if a holder panicked.
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self) {
        *self.lock() = true;
        self.wakeup.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.lock()
    }
}

/// Handle to a recurring timer created with [`Scheduler::schedule_at_fixed_rate`].
///
/// Dropping the handle does not stop the timer, call [`PollHandle::cancel`].
pub struct PollHandle {
    control: Arc<TimerControl>,
}

impl PollHandle {
    /// Stop the timer. Future ticks are not executed, a tick that is already running completes.
    ///
    /// This function does not wait for the timer thread to exit.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Returns `true` if the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    /// Run `task` on a new worker thread.
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] if the scheduler has been shut down.
    /// - [`Error::Io`] if the worker thread failed to start.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }

        std::thread::Builder::new()
            .name(self.thread_name("worker"))
            .spawn(move || {
                if std::panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    log::error!(target: "skylab", "scheduled task panicked");
                }
            })?;

        Ok(())
    }

    /// Run `task` every `interval`, starting one `interval` from now.
    ///
    /// Ticks are scheduled at a fixed rate: a slow tick delays the next one but does not shift the
    /// schedule. A panicking tick is logged and does not stop the timer.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `interval` is zero.
    /// - [`Error::Shutdown`] if the scheduler has been shut down.
    /// - [`Error::Io`] if the timer thread failed to start.
    pub fn schedule_at_fixed_rate(
        &self,
        interval: Duration,
        task: impl Fn() + Send + 'static,
    ) -> Result<PollHandle> {
        if interval.is_zero() {
            return Err(Error::Configuration(
                "poll interval must be greater than zero".to_owned(),
            ));
        }
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }

        let control = Arc::new(TimerControl::default());

        {
            let control = Arc::clone(&control);
            std::thread::Builder::new()
                .name(self.thread_name("timer"))
                .spawn(move || run_timer(&control, interval, task))?;
        }

        {
            let mut timers = self.timers();
            timers.retain(|timer| timer.strong_count() > 0);
            timers.push(Arc::downgrade(&control));
        }

        // Shutdown may have raced with registration. Make sure the timer does not outlive it.
        if self.is_shut_down() {
            control.cancel();
            return Err(Error::Shutdown);
        }

        Ok(PollHandle { control })
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn active_timers(&self) -> usize {
        self.timers()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|timer| !timer.is_cancelled())
            .count()
    }

    /// Cancel all timers and stop accepting new tasks. Tasks that are already running complete.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!(target: "skylab", "shutting down scheduler");
        for timer in self.timers().drain(..).filter_map(|timer| timer.upgrade()) {
            timer.cancel();
        }
    }

    /// Returns `true` if the scheduler has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn timers(&self) -> MutexGuard<'_, Vec<Weak<TimerControl>>> {
        self.inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn thread_name(&self, kind: &str) -> String {
        let id = self.inner.next_thread_id.fetch_add(1, Ordering::Relaxed);
        format!("skylab-{kind}-{id}")
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("shut_down", &self.is_shut_down())
            .field("active_timers", &self.active_timers())
            .finish()
    }
}

fn run_timer(control: &TimerControl, interval: Duration, task: impl Fn()) {
    let mut next_tick = Instant::now() + interval;
    loop {
        {
            let mut cancelled = control.lock();
            loop {
                if *cancelled {
                    log::debug!(target: "skylab", "timer cancelled");
                    return;
                }
                let now = Instant::now();
                if now >= next_tick {
                    break;
                }
                cancelled = control
                    .wakeup
                    .wait_timeout(cancelled, next_tick - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        if std::panic::catch_unwind(AssertUnwindSafe(&task)).is_err() {
            log::error!(target: "skylab", "timer task panicked");
        }

        next_tick += interval;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc,
        },
        time::{Duration, Instant},
    };

    use super::Scheduler;
    use crate::Error;

    #[test]
    fn submit_runs_task_on_another_thread() {
        let scheduler = Scheduler::new();
        let (sender, receiver) = mpsc::channel();

        scheduler
            .submit(move || {
                let name = std::thread::current().name().map(str::to_owned);
                sender.send(name).unwrap();
            })
            .unwrap();

        let name = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(name.unwrap().starts_with("skylab-worker-"));
    }

    #[test]
    fn first_tick_happens_after_one_interval() {
        let scheduler = Scheduler::new();
        let (sender, receiver) = mpsc::channel();
        let start = Instant::now();

        let handle = scheduler
            .schedule_at_fixed_rate(Duration::from_millis(100), move || {
                let _ = sender.send(Instant::now());
            })
            .unwrap();

        let first_tick = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel();

        assert!(first_tick - start >= Duration::from_millis(100));
    }

    #[test]
    fn cancelled_timer_stops_ticking() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let handle = {
            let ticks = ticks.clone();
            scheduler
                .schedule_at_fixed_rate(Duration::from_millis(10), move || {
                    ticks.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        assert_eq!(scheduler.active_timers(), 1);

        std::thread::sleep(Duration::from_millis(100));
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(scheduler.active_timers(), 0);

        // Let a tick that might have been running finish.
        std::thread::sleep(Duration::from_millis(30));
        let after_cancel = ticks.load(Ordering::SeqCst);
        assert!(after_cancel > 0);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn panicking_tick_does_not_stop_timer() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let handle = {
            let ticks = ticks.clone();
            scheduler
                .schedule_at_fixed_rate(Duration::from_millis(10), move || {
                    if ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick fails");
                    }
                })
                .unwrap()
        };

        std::thread::sleep(Duration::from_millis(200));
        handle.cancel();

        assert!(ticks.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let scheduler = Scheduler::new();

        assert!(matches!(
            scheduler.schedule_at_fixed_rate(Duration::ZERO, || {}),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn shutdown_cancels_timers_and_rejects_tasks() {
        let scheduler = Scheduler::new();
        let handle = scheduler
            .schedule_at_fixed_rate(Duration::from_secs(60), || {})
            .unwrap();

        scheduler.clone().shutdown();

        assert!(handle.is_cancelled());
        assert_eq!(scheduler.active_timers(), 0);
        assert!(matches!(scheduler.submit(|| {}), Err(Error::Shutdown)));
        assert!(matches!(
            scheduler.schedule_at_fixed_rate(Duration::from_secs(1), || {}),
            Err(Error::Shutdown)
        ));
    }
}

//! Flush and sync timing.
//!
//! [`QuietWindow`] is the single-timer debouncer used for local persistence:
//! every poke restarts the countdown, and the signal fires after one quiet
//! window.
//!
//! [`SyncScheduler`] is the dual-timer policy for remote sync. Each new event
//! resets the short debounce timer; the max-wait timer is armed only by the
//! first event of a pending batch and never reset, so continuous activity
//! cannot postpone an upload past the bound. Whichever deadline elapses first
//! wins: firing cancels both timers and signals exactly once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Single-timer debouncer: the signal fires one `delay` after the last poke.
pub struct QuietWindow {
    delay: Duration,
    fired: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl QuietWindow {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fired: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Restart the countdown.
    pub fn poke(&self) {
        let mut slot = self.task.lock().unwrap();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let fired = Arc::clone(&self.fired);
        let delay = self.delay;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fired.notify_one();
        }));
    }

    /// Cancel a pending countdown without firing.
    pub fn cancel(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Handle to await firings on.
    pub fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.fired)
    }
}

impl Drop for QuietWindow {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct TimerSlots {
    debounce: Option<JoinHandle<()>>,
    max_wait: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    debounce: Duration,
    max_wait: Duration,
    fired: Arc<Notify>,
    slots: Mutex<TimerSlots>,
}

impl SchedulerInner {
    /// Cancel every pending timer, then signal once.
    fn fire(&self) {
        self.cancel_timers();
        self.fired.notify_one();
    }

    fn cancel_timers(&self) {
        let mut slots = self.slots.lock().unwrap();
        for handle in [
            slots.debounce.take(),
            slots.max_wait.take(),
            slots.retry.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Dual-timer sync arming policy.
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    pub fn new(debounce: Duration, max_wait: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                debounce,
                max_wait,
                fired: Arc::new(Notify::new()),
                slots: Mutex::new(TimerSlots {
                    debounce: None,
                    max_wait: None,
                    retry: None,
                }),
            }),
        }
    }

    /// Arm for a newly buffered event.
    ///
    /// Arms the max-wait timer if it is not already running, and always
    /// restarts the debounce timer. Callers guard this with the
    /// buffer-non-empty / tracking-enabled checks.
    pub fn on_event(&self) {
        let mut slots = self.inner.slots.lock().unwrap();

        let max_wait_running = slots
            .max_wait
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !max_wait_running {
            let inner = Arc::clone(&self.inner);
            slots.max_wait = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.max_wait).await;
                inner.fire();
            }));
        }

        if let Some(handle) = slots.debounce.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        slots.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.fire();
        }));
    }

    /// Arm a one-shot retry, replacing any pending one.
    pub fn schedule_retry(&self, delay: Duration) {
        let mut slots = self.inner.slots.lock().unwrap();
        if let Some(handle) = slots.retry.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        slots.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire();
        }));
    }

    /// Cancel every pending timer without firing.
    pub fn cancel(&self) {
        self.inner.cancel_timers();
    }

    /// Handle to await firings on.
    pub fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.fired)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-adjusting polling loop.
//!
//! The loop runs a [`LoopTask`] on the calling thread: it performs the task whenever work is
//! pending and otherwise sleeps for the current interval. The interval grows by a fixed ratio, up
//! to a maximum, when the task asks to back off and returns to its base value once work has been
//! performed normally. [`IntervalLoop::stop`] wakes a sleeping loop immediately.

use crate::MutexExt;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACK_OFF_RATIO: f64 = 1.2;
pub const DEFAULT_BACK_OFF_MAX: Duration = Duration::from_secs(5);

/// Timing settings of an [`IntervalLoop`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopSettings {
    /// Wait between two iterations when no back-off is in effect.
    pub interval: Duration,
    /// Factor applied to the wait on each back-off.
    pub back_off_ratio: f64,
    /// Upper bound of the wait.
    pub back_off_max: Duration,
    /// Sleep one interval before the first iteration.
    pub wait_before_first_iteration: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            back_off_ratio: DEFAULT_BACK_OFF_RATIO,
            back_off_max: DEFAULT_BACK_OFF_MAX,
            wait_before_first_iteration: false,
        }
    }
}

impl LoopSettings {
    /// Replace a back-off ratio that would shrink the wait or leave it undefined with the default.
    fn sanitized(mut self) -> Self {
        if !(self.back_off_ratio.is_finite() && self.back_off_ratio >= 1.0) {
            warn!(
                back_off_ratio = self.back_off_ratio,
                "Invalid back-off ratio, using {DEFAULT_BACK_OFF_RATIO}"
            );
            self.back_off_ratio = DEFAULT_BACK_OFF_RATIO;
        }
        self
    }
}

/// How the loop should pace itself after a unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    /// Go back to the base interval.
    Reset,
    /// Lengthen the interval.
    BackOff,
}

/// Unit of work driven by an [`IntervalLoop`].
pub trait LoopTask {
    /// Whether [`LoopTask::perform`] has something to do.
    fn work_pending(&self) -> bool;

    /// Perform one unit of work.
    fn perform(&self) -> Pace;

    /// Whether the loop should back off when an iteration finds no pending work.
    fn back_off_when_idle(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct LoopState {
    running: bool,
    wait: Duration,
}

#[derive(Debug)]
pub struct IntervalLoop {
    settings: LoopSettings,
    state: Mutex<LoopState>,
    shutdown: Condvar,
}

impl Default for IntervalLoop {
    fn default() -> Self {
        Self::new(LoopSettings::default())
    }
}

impl IntervalLoop {
    pub fn new(settings: LoopSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            settings,
            state: Mutex::new(LoopState {
                running: false,
                wait: settings.interval,
            }),
            shutdown: Condvar::new(),
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Mark the loop as running and reset its interval.
    ///
    /// Must be called before [`IntervalLoop::run`] for the loop to keep iterating. Calling
    /// [`IntervalLoop::stop`] in between is honored: the subsequent run only drains pending work.
    pub fn start(&self) {
        let mut state = self.state.lock_or_panic();
        state.running = true;
        state.wait = self.settings.interval;
    }

    /// Run `task` on the current thread until the loop is stopped and no work is pending.
    pub fn run<T: LoopTask + ?Sized>(&self, task: &T) {
        if self.settings.wait_before_first_iteration {
            self.wait();
        }
        loop {
            if task.work_pending() {
                match task.perform() {
                    Pace::Reset => self.reset_interval(),
                    Pace::BackOff => self.back_off(),
                }
            } else if task.back_off_when_idle() {
                self.back_off();
            }

            if !self.is_running() && !task.work_pending() {
                break;
            }
            self.wait();
        }
    }

    /// Ask the loop to exit, waking it up if it is sleeping.
    ///
    /// Returns whether the loop was running.
    pub fn stop(&self) -> bool {
        let was_running = {
            let mut state = self.state.lock_or_panic();
            std::mem::replace(&mut state.running, false)
        };
        self.shutdown.notify_all();
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.state.lock_or_panic().running
    }

    /// Current wait between iterations.
    pub fn current_interval(&self) -> Duration {
        self.state.lock_or_panic().wait
    }

    pub fn back_off(&self) {
        let mut state = self.state.lock_or_panic();
        let nanos = (state.wait.as_nanos() as f64 * self.settings.back_off_ratio).round();
        state.wait = Duration::from_nanos(nanos as u64).min(self.settings.back_off_max);
    }

    pub fn reset_interval(&self) {
        self.state.lock_or_panic().wait = self.settings.interval;
    }

    fn wait(&self) {
        let state = self.state.lock_or_panic();
        if !state.running {
            return;
        }
        let wait = state.wait;
        // A poisoned lock only means another thread panicked while holding it, the loop exits on
        // its next check either way.
        let _ = self
            .shutdown
            .wait_timeout_while(state, wait, |state| state.running);
    }
}

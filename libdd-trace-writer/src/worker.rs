// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dedicated background thread running a [`Task`], aware of process forks.
//!
//! Threads do not survive a `fork`: the child only inherits the memory of the parent, including
//! the stale handle of a thread that does not exist anymore. Every entry point of [`AsyncWorker`]
//! compares the current process id with the one recorded when the thread was launched. When they
//! differ the worker forgets the inherited thread, calls [`Task::after_fork`] and applies its
//! [`ForkPolicy`].

use crate::MutexExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Work executed on the worker thread.
pub trait Task: Send + Sync + 'static {
    /// Body of the worker thread. Returns when the work is done.
    fn run(&self) -> anyhow::Result<()>;

    /// Hook called in a forked child before the fork policy is applied.
    fn after_fork(&self) {}
}

/// Behavior of a worker detecting that it runs in a forked child.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForkPolicy {
    /// Never start the thread again in the child.
    Stop,
    /// Launch a new thread in the child.
    #[default]
    Restart,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker task failed: {0}")]
    Failed(String),
    #[error("worker task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Default)]
struct Outcome {
    finished: bool,
    error: Option<WorkerError>,
}

/// Completion status of one launched thread, shared with the thread itself.
#[derive(Debug, Default)]
struct RunStatus {
    outcome: Mutex<Outcome>,
    done: Condvar,
}

impl RunStatus {
    fn set_error(&self, error: WorkerError) {
        self.outcome.lock_or_panic().error = Some(error);
    }

    fn finish(&self) {
        self.outcome.lock_or_panic().finished = true;
        self.done.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.outcome.lock_or_panic().finished
    }

    fn wait(&self, timeout: Duration) -> bool {
        let outcome = self.outcome.lock_or_panic();
        match self
            .done
            .wait_timeout_while(outcome, timeout, |outcome| !outcome.finished)
        {
            Ok((outcome, _)) => outcome.finished,
            Err(_) => false,
        }
    }
}

/// Marks the run as finished when the thread exits, including by unwinding.
struct FinishGuard(Arc<RunStatus>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

#[derive(Debug)]
struct Launch {
    handle: Option<JoinHandle<()>>,
    status: Arc<RunStatus>,
}

#[derive(Debug, Default)]
struct WorkerState {
    pid: Option<u32>,
    launch: Option<Launch>,
    halted: bool,
    terminated: bool,
}

/// Runs a [`Task`] on a dedicated, named thread.
///
/// Launch, fork handling and shutdown decisions are serialized under a single mutex so racing
/// callers never launch two threads.
#[derive(Debug)]
pub struct AsyncWorker<T: Task> {
    name: String,
    task: Arc<T>,
    fork_policy: ForkPolicy,
    state: Mutex<WorkerState>,
}

impl<T: Task> AsyncWorker<T> {
    pub fn new(name: impl Into<String>, task: Arc<T>, fork_policy: ForkPolicy) -> Self {
        Self {
            name: name.into(),
            task,
            fork_policy,
            state: Mutex::new(WorkerState::default()),
        }
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    pub fn fork_policy(&self) -> ForkPolicy {
        self.fork_policy
    }

    /// Launch the worker thread unless it is already running.
    ///
    /// Returns whether a thread is running when the call returns. A worker stopped by its fork
    /// policy or terminated is never launched again.
    pub fn perform(&self) -> bool {
        let mut state = self.state.lock_or_panic();
        self.handle_fork(&mut state);

        if state.halted || state.terminated {
            return false;
        }
        if let Some(launch) = &state.launch {
            if !launch.status.is_finished() {
                return true;
            }
        }
        // Reap the previous thread, it has already finished.
        if let Some(handle) = state.launch.take().and_then(|launch| launch.handle) {
            let _ = handle.join();
        }

        let status = Arc::new(RunStatus::default());
        let task = self.task.clone();
        let name = self.name.clone();
        let thread_status = status.clone();
        match thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_task(&name, task.as_ref(), thread_status))
        {
            Ok(handle) => {
                debug!(worker = %self.name, "Worker thread started");
                state.pid = Some(std::process::id());
                state.launch = Some(Launch {
                    handle: Some(handle),
                    status,
                });
                true
            }
            Err(err) => {
                error!(worker = %self.name, error = %err, "Failed to spawn worker thread");
                false
            }
        }
    }

    /// Wait up to `timeout` for the worker thread to exit.
    ///
    /// Returns `true` if the thread exited, or if no thread was running.
    pub fn join(&self, timeout: Duration) -> bool {
        let status = {
            let mut state = self.state.lock_or_panic();
            self.handle_fork(&mut state);
            match &state.launch {
                Some(launch) if launch.handle.is_some() => launch.status.clone(),
                _ => return true,
            }
        };

        if !status.wait(timeout) {
            return false;
        }
        let handle = self
            .state
            .lock_or_panic()
            .launch
            .as_mut()
            .and_then(|launch| launch.handle.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        true
    }

    /// Give up on the worker thread.
    ///
    /// Threads cannot be killed: the thread is detached and left to exit on its own, and the
    /// worker is never launched again. Returns whether a thread was detached.
    pub fn terminate(&self) -> bool {
        let mut state = self.state.lock_or_panic();
        state.terminated = true;
        let detached = state
            .launch
            .as_mut()
            .and_then(|launch| launch.handle.take())
            .is_some();
        if detached {
            debug!(worker = %self.name, "Worker thread detached");
        }
        detached
    }

    /// Whether the thread launched in this process is alive.
    pub fn is_running(&self) -> bool {
        let state = self.state.lock_or_panic();
        !self.is_forked_state(&state)
            && matches!(
                &state.launch,
                Some(launch) if launch.handle.is_some() && !launch.status.is_finished()
            )
    }

    /// Whether a thread has been launched in this process.
    pub fn is_started(&self) -> bool {
        let state = self.state.lock_or_panic();
        !self.is_forked_state(&state) && state.launch.is_some()
    }

    /// Whether the process forked since the thread was launched.
    pub fn is_forked(&self) -> bool {
        self.is_forked_state(&self.state.lock_or_panic())
    }

    /// Handle a fork without launching the thread.
    ///
    /// Returns whether a fork was detected.
    pub fn check_fork(&self) -> bool {
        let mut state = self.state.lock_or_panic();
        self.handle_fork(&mut state)
    }

    /// Whether the last launched thread exited without error.
    pub fn is_completed(&self) -> bool {
        self.outcome(|outcome| outcome.finished && outcome.error.is_none())
    }

    /// Whether the last launched thread exited with an error.
    pub fn is_failed(&self) -> bool {
        self.outcome(|outcome| outcome.finished && outcome.error.is_some())
    }

    /// Error of the last launched thread, if any.
    pub fn error(&self) -> Option<WorkerError> {
        self.outcome(|outcome| outcome.error.clone())
    }

    fn outcome<R: Default>(&self, f: impl FnOnce(&Outcome) -> R) -> R {
        let state = self.state.lock_or_panic();
        match &state.launch {
            Some(launch) => f(&launch.status.outcome.lock_or_panic()),
            None => R::default(),
        }
    }

    fn is_forked_state(&self, state: &WorkerState) -> bool {
        matches!(state.pid, Some(pid) if pid != std::process::id())
    }

    fn handle_fork(&self, state: &mut WorkerState) -> bool {
        if !self.is_forked_state(state) {
            return false;
        }
        debug!(worker = %self.name, policy = ?self.fork_policy, "Fork detected");
        state.pid = Some(std::process::id());
        // The thread does not exist in this process, its handle must be neither joined nor
        // detached.
        if let Some(handle) = state.launch.take().and_then(|launch| launch.handle) {
            std::mem::forget(handle);
        }
        self.task.after_fork();
        if self.fork_policy == ForkPolicy::Stop {
            state.halted = true;
        }
        true
    }
}

fn run_task<T: Task>(name: &str, task: &T, status: Arc<RunStatus>) {
    let _guard = FinishGuard(status.clone());
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(Ok(())) => debug!(worker = %name, "Worker thread completed"),
        Ok(Err(err)) => {
            error!(worker = %name, error = %err, "Worker thread failed");
            status.set_error(WorkerError::Failed(format!("{err:#}")));
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(worker = %name, error = %message, "Worker thread panicked");
            status.set_error(WorkerError::Panicked(message));
            panic::resume_unwind(payload);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

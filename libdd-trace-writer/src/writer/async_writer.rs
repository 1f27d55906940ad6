// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::{PushOutcome, TraceBuffer};
use crate::health_metrics::HealthMetricsSink;
use crate::interval_loop::{IntervalLoop, LoopSettings, LoopTask, Pace};
use crate::span::TraceChunk;
use crate::transport::{ApiId, Counts, Response};
use crate::worker::{AsyncWorker, ForkPolicy, Task, WorkerError};
use crate::writer::{FlushCompleted, TraceWriter};
use crate::MutexExt;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const WORKER_NAME: &str = "dd-trace-writer";

/// Behavior of the writer in a forked child.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriterForkPolicy {
    /// Start a new flush thread in the child.
    #[default]
    Async,
    /// Do not start a flush thread in the child, write on the calling thread instead. Suited to
    /// short-lived children.
    Sync,
}

impl WriterForkPolicy {
    fn worker_policy(self) -> ForkPolicy {
        match self {
            WriterForkPolicy::Async => ForkPolicy::Restart,
            WriterForkPolicy::Sync => ForkPolicy::Stop,
        }
    }
}

/// What [`AsyncTraceWriter::write`] did with the traces.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Queued for the flush thread.
    Queued(PushOutcome),
    /// Written on the calling thread, with the writer's responses.
    Flushed(Option<Vec<Response>>),
}

/// State shared with the flush thread.
#[derive(Debug)]
struct Flusher {
    writer: ArcSwap<Mutex<TraceWriter>>,
    /// Copy of the writer as built, replacing a writer whose lock was held when the process forked.
    seed: TraceWriter,
    buffer: ArcSwap<TraceBuffer>,
    buffer_size: usize,
    health_metrics: Arc<dyn HealthMetricsSink>,
    interval_loop: IntervalLoop,
    fork_policy: WriterForkPolicy,
    is_async: AtomicBool,
}

impl Flusher {
    fn new_buffer(&self) -> TraceBuffer {
        TraceBuffer::with_health_metrics(self.buffer_size, self.health_metrics.clone())
    }

    fn write_traces(&self, traces: Vec<TraceChunk>) -> Option<Vec<Response>> {
        self.writer.load().lock_or_panic().write_traces(traces)
    }

    /// Make the writer usable in a forked child.
    ///
    /// A lock held at fork time belongs to a thread that does not exist in the child and is never
    /// released, so such a writer is replaced. Otherwise only its retries, which the parent also
    /// holds, are dropped.
    fn reset_writer(&self) {
        let current = self.writer.load_full();
        let reusable = match current.try_lock() {
            Ok(mut writer) => {
                let discarded = writer.discard_retries();
                if discarded > 0 {
                    debug!(batches = discarded, "Dropped retries inherited from the parent");
                }
                true
            }
            Err(TryLockError::WouldBlock | TryLockError::Poisoned(_)) => false,
        };
        if !reusable {
            warn!("Writer was busy when the process forked, replacing it");
            // The flush of the dead thread left the writer in an unknown state, it is never dropped.
            std::mem::forget(current);
            self.writer.store(Arc::new(Mutex::new(self.seed.duplicate())));
        }
    }
}

impl Task for Flusher {
    fn run(&self) -> anyhow::Result<()> {
        self.interval_loop.run(self);
        Ok(())
    }

    fn after_fork(&self) {
        // The inherited buffer holds traces of the parent, flushing them again would duplicate
        // them.
        self.buffer.store(Arc::new(self.new_buffer()));
        self.reset_writer();
        if self.fork_policy == WriterForkPolicy::Sync {
            self.is_async.store(false, Ordering::SeqCst);
        }
    }
}

impl LoopTask for Flusher {
    fn work_pending(&self) -> bool {
        !self.buffer.load().is_empty()
    }

    fn perform(&self) -> Pace {
        let traces = self.buffer.load().pop();
        if traces.is_empty() {
            return Pace::Reset;
        }
        let responses = self.write_traces(traces);
        let server_error = responses
            .iter()
            .flatten()
            .any(Response::is_server_error);
        if server_error {
            Pace::BackOff
        } else {
            Pace::Reset
        }
    }
}

/// Writer queuing traces in a bounded buffer flushed by a background thread.
///
/// The thread is started by the first write. When the process forks, the child gets a fresh buffer
/// and, depending on the [`WriterForkPolicy`], either a new thread or synchronous writes.
#[derive(Debug)]
pub struct AsyncTraceWriter {
    flusher: Arc<Flusher>,
    worker: AsyncWorker<Flusher>,
    enabled: AtomicBool,
    shutdown_timeout: Duration,
    flush_completed: Arc<FlushCompleted>,
}

impl AsyncTraceWriter {
    pub fn new(
        writer: TraceWriter,
        buffer_size: usize,
        loop_settings: LoopSettings,
        fork_policy: WriterForkPolicy,
        shutdown_timeout: Duration,
        health_metrics: Arc<dyn HealthMetricsSink>,
    ) -> Self {
        let flush_completed = writer.flush_completed().clone();
        let flusher = Arc::new(Flusher {
            seed: writer.duplicate(),
            writer: ArcSwap::from_pointee(Mutex::new(writer)),
            buffer: ArcSwap::from_pointee(TraceBuffer::with_health_metrics(
                buffer_size,
                health_metrics.clone(),
            )),
            buffer_size,
            health_metrics,
            interval_loop: IntervalLoop::new(loop_settings),
            fork_policy,
            is_async: AtomicBool::new(true),
        });
        let worker = AsyncWorker::new(WORKER_NAME, flusher.clone(), fork_policy.worker_policy());
        Self {
            flusher,
            worker,
            enabled: AtomicBool::new(true),
            shutdown_timeout,
            flush_completed,
        }
    }

    /// Start the flush thread if needed.
    ///
    /// This is also where a fork is detected, so it runs before anything touches the buffer.
    /// Returns whether the flush thread is running. Nothing is started when the writer is disabled
    /// or stopped.
    pub fn perform(&self) -> bool {
        self.worker.check_fork();
        if !self.is_enabled() || self.flusher.buffer.load().is_closed() {
            return false;
        }
        if !self.worker.is_running() {
            self.flusher.interval_loop.start();
        }
        self.worker.perform()
    }

    pub fn write(&self, trace: TraceChunk) -> WriteOutcome {
        self.write_traces(vec![trace])
    }

    pub fn write_traces(&self, traces: Vec<TraceChunk>) -> WriteOutcome {
        // Must run first: a fork swaps the buffer.
        self.perform();
        if self.is_async() {
            WriteOutcome::Queued(self.flusher.buffer.load().concat(traces))
        } else {
            WriteOutcome::Flushed(self.flusher.write_traces(traces))
        }
    }

    /// Stop the flush thread.
    ///
    /// The buffer is closed, so later writes are dropped, and the thread flushes what the buffer
    /// holds before exiting. If it does not exit within `timeout` and `force_stop` is set, the
    /// thread is abandoned. Returns whether the thread exited in time, `false` if it was not
    /// running.
    pub fn stop(&self, force_stop: bool, timeout: Duration) -> bool {
        self.worker.check_fork();
        self.flusher.buffer.load().close();
        if !self.worker.is_running() {
            return false;
        }
        self.flusher.interval_loop.stop();
        let graceful = self.worker.join(timeout);
        if !graceful && force_stop {
            debug!(
                timeout_ms = timeout.as_millis() as u64,
                "Flush thread did not stop in time, abandoning it"
            );
            self.worker.terminate();
        }
        graceful
    }

    /// [`AsyncTraceWriter::stop`] with the configured shutdown timeout.
    pub fn shutdown(&self) -> bool {
        self.stop(false, self.shutdown_timeout)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether writes are queued. Turns `false` in a forked child under [`WriterForkPolicy::Sync`].
    pub fn is_async(&self) -> bool {
        self.flusher.is_async.load(Ordering::SeqCst)
    }

    pub fn fork_policy(&self) -> WriterForkPolicy {
        self.flusher.fork_policy
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn buffer(&self) -> Arc<TraceBuffer> {
        self.worker.check_fork();
        self.flusher.buffer.load_full()
    }

    pub fn buffer_len(&self) -> usize {
        self.worker.check_fork();
        self.flusher.buffer.load().len()
    }

    pub fn interval_loop(&self) -> &IntervalLoop {
        &self.flusher.interval_loop
    }

    pub fn flush_completed(&self) -> &Arc<FlushCompleted> {
        &self.flush_completed
    }

    /// API version currently used. Waits for an ongoing flush.
    pub fn current_api_id(&self) -> ApiId {
        self.worker.check_fork();
        self.flusher
            .writer
            .load()
            .lock_or_panic()
            .current_api_id()
            .clone()
    }

    /// Response counters of the transport. Waits for an ongoing flush.
    pub fn counts(&self) -> Counts {
        self.worker.check_fork();
        self.flusher.writer.load().lock_or_panic().counts()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_started()
    }

    pub fn is_forked(&self) -> bool {
        self.worker.is_forked()
    }

    pub fn error(&self) -> Option<WorkerError> {
        self.worker.error()
    }
}

impl Drop for AsyncTraceWriter {
    fn drop(&mut self) {
        // Let the thread drain the buffer and exit, without waiting for it.
        self.flusher.interval_loop.stop();
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace writers.
//!
//! [`TraceWriter`] flushes traces on the calling thread. [`AsyncTraceWriter`] queues them and
//! flushes them on a background thread. Both are built with a [`TraceWriterBuilder`].

mod async_writer;
mod builder;
mod retry;

pub use async_writer::{
    AsyncTraceWriter, WriteOutcome, WriterForkPolicy, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use builder::{BuilderError, TraceWriterBuilder};
pub use retry::{
    RetryQueue, RetrySettings, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF,
    DEFAULT_MAX_RETRY_QUEUE_SIZE,
};

use crate::event::Event;
use crate::health_metrics::{HealthMetric, HealthMetricsSink, WRITER_DROPPED};
use crate::pipeline::Pipeline;
use crate::span::{set_hostname, TraceChunk};
use crate::transport::{ApiId, Counts, Response, TransportError, VersionedTransport};
use crate::worker::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Event published with the responses of every flush.
pub type FlushCompleted = Event<Vec<Response>>;

pub const FLUSH_COMPLETED: &str = "flush_completed";

/// Writes traces synchronously.
///
/// Every write runs the traces through the pipeline, tags them with the hostname if configured and
/// sends them with the transport. Errors never reach the caller: the traces are dropped and the
/// drop is logged.
#[derive(Debug)]
pub struct TraceWriter {
    transport: VersionedTransport,
    pipeline: Pipeline,
    hostname: Option<String>,
    retry: RetryQueue,
    flush_completed: Arc<FlushCompleted>,
    health_metrics: Arc<dyn HealthMetricsSink>,
}

impl TraceWriter {
    pub fn new(
        transport: VersionedTransport,
        pipeline: Pipeline,
        hostname: Option<String>,
        retry: RetryQueue,
        health_metrics: Arc<dyn HealthMetricsSink>,
    ) -> Self {
        Self {
            transport,
            pipeline,
            hostname,
            retry,
            flush_completed: Arc::new(Event::new(FLUSH_COMPLETED)),
            health_metrics,
        }
    }

    pub fn write(&mut self, trace: TraceChunk) -> Option<Vec<Response>> {
        self.write_traces(vec![trace])
    }

    /// Flush `traces`, returning the response of every request sent, or `None` if the traces were
    /// dropped because of an error.
    pub fn write_traces(&mut self, traces: Vec<TraceChunk>) -> Option<Vec<Response>> {
        let count = traces.len();
        if self.retry.should_flush() {
            self.flush_retry();
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let traces = self.process_traces(traces);
            let responses = self.flush_traces(&traces)?;
            Ok::<_, TransportError>((traces, responses))
        }));
        match result {
            Ok(Ok((traces, responses))) => {
                self.handle_responses(&responses, traces);
                Some(responses)
            }
            Ok(Err(err)) => {
                self.report_dropped(count, &err.to_string());
                None
            }
            Err(payload) => {
                self.report_dropped(count, &panic_message(payload.as_ref()));
                None
            }
        }
    }

    pub fn process_traces(&self, traces: Vec<TraceChunk>) -> Vec<TraceChunk> {
        let mut traces = self.pipeline.process(traces);
        if let Some(hostname) = &self.hostname {
            for trace in &mut traces {
                set_hostname(trace, hostname);
            }
        }
        traces
    }

    /// Send `traces` and publish the responses to the flush completed subscribers.
    ///
    /// # Errors
    /// Fails if the agent rejects every API version the transport can downgrade to.
    pub fn flush_traces(&mut self, traces: &[TraceChunk]) -> Result<Vec<Response>, TransportError> {
        let responses = self.transport.send_traces(traces)?;
        self.flush_completed.publish(&responses);
        Ok(responses)
    }

    pub fn flush_completed(&self) -> &Arc<FlushCompleted> {
        &self.flush_completed
    }

    pub fn transport(&self) -> &VersionedTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut VersionedTransport {
        &mut self.transport
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry
    }

    pub fn current_api_id(&self) -> &ApiId {
        self.transport.current_api_id()
    }

    pub fn counts(&self) -> Counts {
        self.transport.counts()
    }

    /// Writer sharing the configuration, sender and subscribers of this one, without its pending
    /// retries.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            pipeline: self.pipeline.clone(),
            hostname: self.hostname.clone(),
            retry: RetryQueue::new(*self.retry.settings()),
            flush_completed: self.flush_completed.clone(),
            health_metrics: self.health_metrics.clone(),
        }
    }

    /// Drop the traces waiting for a retry. Returns how many batches were dropped.
    pub(crate) fn discard_retries(&mut self) -> usize {
        let discarded = self.retry.len();
        self.retry = RetryQueue::new(*self.retry.settings());
        discarded
    }

    fn handle_responses(&mut self, responses: &[Response], traces: Vec<TraceChunk>) {
        if responses.iter().any(Response::too_many_requests) {
            self.retry.push(traces);
            self.retry.throttled();
        } else if responses.iter().all(Response::is_ok) {
            self.retry.reset_backoff();
        }
    }

    fn flush_retry(&mut self) {
        let Some(traces) = self.retry.pop() else {
            return;
        };
        debug!(traces = traces.len(), "Retrying traces after back-off");
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.flush_traces(&traces)));
        match result {
            Ok(Ok(responses)) => self.handle_responses(&responses, traces),
            Ok(Err(err)) => self.report_dropped(traces.len(), &err.to_string()),
            Err(payload) => self.report_dropped(traces.len(), &panic_message(payload.as_ref())),
        }
    }

    fn report_dropped(&self, count: usize, cause: &str) {
        warn!(dropped = count, cause, "Error while writing traces");
        self.health_metrics.emit(
            HealthMetric::Count(WRITER_DROPPED, i64::try_from(count).unwrap_or(i64::MAX)),
            Some(format!("cause:{cause}")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::health_metrics::InMemoryHealthMetrics;
    use crate::span::{Span, HOSTNAME_KEY};
    use crate::transport::test_utils::RecordingSender;
    use crate::transport::{ApiRegistry, TracerMetadata, V3, V4};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn trace(id: u64) -> TraceChunk {
        vec![
            Span {
                service: "web".to_string(),
                name: "request".to_string(),
                trace_id: id,
                span_id: id,
                ..Default::default()
            },
            Span {
                service: "web".to_string(),
                name: "db".to_string(),
                trace_id: id,
                span_id: id + 1000,
                parent_id: id,
                ..Default::default()
            },
        ]
    }

    fn writer(
        sender: Arc<RecordingSender>,
        pipeline: Pipeline,
        hostname: Option<String>,
        sink: Arc<InMemoryHealthMetrics>,
    ) -> TraceWriter {
        let transport = VersionedTransport::new(
            "http://localhost:8126",
            ApiRegistry::agent_defaults(),
            &V4,
            TracerMetadata::default(),
            sender,
            Chunker::default(),
            sink.clone(),
        )
        .unwrap();
        TraceWriter::new(transport, pipeline, hostname, RetryQueue::default(), sink)
    }

    #[test]
    fn test_write_publishes_flush_completed() {
        let sender = Arc::new(RecordingSender::new(Some(200)));
        let mut writer = writer(
            sender.clone(),
            Pipeline::new(),
            None,
            Arc::new(InMemoryHealthMetrics::new()),
        );
        let published = Arc::new(AtomicUsize::new(0));
        let counter = published.clone();
        writer.flush_completed().subscribe(move |responses: &Vec<Response>| {
            counter.fetch_add(responses.len(), Ordering::SeqCst);
        });

        let responses = writer.write_traces(vec![trace(1), trace(2), trace(3)]).unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].trace_count(), 3);
        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert_eq!(sender.trace_counts_to("/v0.4/traces"), vec![3]);
    }

    #[test]
    fn test_hostname_and_pipeline() {
        let mut pipeline = Pipeline::new();
        pipeline.before_flush(|trace: TraceChunk| (trace[0].trace_id != 2).then_some(trace));
        let writer = writer(
            Arc::new(RecordingSender::new(Some(200))),
            pipeline,
            Some("host-1".to_string()),
            Arc::new(InMemoryHealthMetrics::new()),
        );

        let traces = writer.process_traces(vec![trace(1), trace(2)]);

        assert_eq!(traces.len(), 1);
        assert_eq!(
            traces[0][0].meta.get(HOSTNAME_KEY).map(String::as_str),
            Some("host-1")
        );
        assert!(traces[0][1].meta.get(HOSTNAME_KEY).is_none());
    }

    #[test]
    fn test_downgrade_during_write() {
        let sender = Arc::new(RecordingSender::new(Some(200)));
        sender.set_status("/v0.4/traces", Some(404));
        let mut writer = writer(
            sender,
            Pipeline::new(),
            None,
            Arc::new(InMemoryHealthMetrics::new()),
        );

        let responses = writer.write(trace(1)).unwrap();

        assert!(responses[0].is_ok());
        assert_eq!(writer.current_api_id(), &V3);
    }

    #[test]
    fn test_errors_are_swallowed() {
        let sink = Arc::new(InMemoryHealthMetrics::new());
        let mut writer = writer(
            Arc::new(RecordingSender::new(Some(415))),
            Pipeline::new(),
            None,
            sink.clone(),
        );

        assert!(writer.write_traces(vec![trace(1), trace(2)]).is_none());
        assert_eq!(sink.total(WRITER_DROPPED), 2);
    }

    #[test]
    fn test_panics_are_swallowed() {
        let sink = Arc::new(InMemoryHealthMetrics::new());
        let mut pipeline = Pipeline::new();
        pipeline.before_flush(|_: TraceChunk| -> Option<TraceChunk> { panic!("broken processor") });
        let mut writer = writer(
            Arc::new(RecordingSender::new(Some(200))),
            pipeline,
            None,
            sink.clone(),
        );

        assert!(writer.write(trace(1)).is_none());
        let dropped = sink.snapshot();
        assert_eq!(
            dropped.last().unwrap(),
            &(
                HealthMetric::Count(WRITER_DROPPED, 1),
                Some("cause:broken processor".to_string())
            )
        );
    }

    #[test]
    fn test_throttled_batch_is_retried() {
        let sender = Arc::new(RecordingSender::new(Some(429)));
        let mut writer = writer(
            sender.clone(),
            Pipeline::new(),
            None,
            Arc::new(InMemoryHealthMetrics::new()),
        );

        let responses = writer.write_traces(vec![trace(1), trace(2)]).unwrap();
        assert!(responses[0].too_many_requests());
        assert_eq!(writer.retry_queue().len(), 1);
        assert_eq!(writer.retry_queue().backoff(), Duration::from_secs(2));

        // still backing off, the queued batch waits
        sender.set_status("/v0.4/traces", Some(200));
        writer.write(trace(3)).unwrap();
        assert_eq!(writer.retry_queue().len(), 1);
        assert_eq!(sender.trace_counts_to("/v0.4/traces"), vec![2, 1]);
        assert_eq!(writer.retry_queue().backoff(), DEFAULT_INITIAL_BACKOFF);
    }

    #[test]
    fn test_retry_queue_flushed_before_write() {
        let sender = Arc::new(RecordingSender::new(Some(200)));
        let transport = VersionedTransport::new(
            "http://localhost:8126",
            ApiRegistry::agent_defaults(),
            &V4,
            TracerMetadata::default(),
            sender.clone(),
            Chunker::default(),
            Arc::new(InMemoryHealthMetrics::new()),
        )
        .unwrap();
        let mut retry = RetryQueue::default();
        retry.push(vec![trace(1), trace(2)]);
        let mut writer = TraceWriter::new(
            transport,
            Pipeline::new(),
            None,
            retry,
            Arc::new(InMemoryHealthMetrics::new()),
        );

        writer.write(trace(3)).unwrap();

        assert!(writer.retry_queue().is_empty());
        assert_eq!(sender.trace_counts_to("/v0.4/traces"), vec![2, 1]);
    }
}

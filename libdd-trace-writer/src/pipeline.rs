// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Processing applied to traces before they are encoded.

use crate::span::TraceChunk;
use std::fmt;
use std::sync::Arc;

/// Step of a [`Pipeline`]. Returning `None` drops the trace.
pub trait TraceProcessor: Send + Sync {
    fn process(&self, trace: TraceChunk) -> Option<TraceChunk>;
}

impl<F> TraceProcessor for F
where
    F: Fn(TraceChunk) -> Option<TraceChunk> + Send + Sync,
{
    fn process(&self, trace: TraceChunk) -> Option<TraceChunk> {
        self(trace)
    }
}

/// Ordered list of processors every trace goes through before being flushed.
#[derive(Clone, Default)]
pub struct Pipeline {
    processors: Vec<Arc<dyn TraceProcessor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("processors", &self.processors.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `processor`, it runs after the processors already registered.
    pub fn before_flush(&mut self, processor: impl TraceProcessor + 'static) -> &mut Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run `traces` through every processor. Dropped traces and traces left without spans are
    /// removed.
    pub fn process(&self, traces: Vec<TraceChunk>) -> Vec<TraceChunk> {
        if self.processors.is_empty() {
            return traces;
        }
        traces
            .into_iter()
            .filter_map(|trace| {
                self.processors
                    .iter()
                    .try_fold(trace, |trace, processor| processor.process(trace))
            })
            .filter(|trace| !trace.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn trace(service: &str, spans: usize) -> TraceChunk {
        (0..spans)
            .map(|i| Span {
                service: service.to_string(),
                span_id: i as u64,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let traces = vec![trace("a", 1), trace("b", 2)];
        assert_eq!(Pipeline::new().process(traces.clone()), traces);
    }

    #[test]
    fn test_processors_run_in_order() {
        let mut pipeline = Pipeline::new();
        pipeline
            .before_flush(|mut trace: TraceChunk| {
                for span in &mut trace {
                    span.resource.push('1');
                }
                Some(trace)
            })
            .before_flush(|mut trace: TraceChunk| {
                for span in &mut trace {
                    span.resource.push('2');
                }
                Some(trace)
            });

        let processed = pipeline.process(vec![trace("a", 2)]);

        assert_eq!(pipeline.len(), 2);
        assert!(processed[0].iter().all(|span| span.resource == "12"));
    }

    #[test]
    fn test_drop_traces_and_empty_traces() {
        let mut pipeline = Pipeline::new();
        pipeline
            .before_flush(|trace: TraceChunk| {
                (trace[0].service != "health-check").then_some(trace)
            })
            .before_flush(|trace: TraceChunk| {
                Some(trace.into_iter().filter(|span| span.span_id != 0).collect::<TraceChunk>())
            });

        let processed = pipeline.process(vec![
            trace("web", 3),
            trace("health-check", 2),
            trace("db", 1),
        ]);

        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].len(), 2);
        assert_eq!(processed[0][0].service, "web");
    }
}

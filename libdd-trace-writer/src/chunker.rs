// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splitting of trace batches into size-bounded payloads.

use crate::encoder::Encoder;
use crate::health_metrics::{
    HealthMetric, HealthMetricsSink, NoopHealthMetrics, TRANSPORT_TRACE_TOO_LARGE,
};
use crate::span::TraceChunk;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// The agent accepts payloads up to 10 MiB. Half of it is used to leave room for slow networks.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;

/// A payload ready to be sent, holding `trace_count` traces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedChunk {
    pub bytes: Bytes,
    pub trace_count: usize,
}

impl EncodedChunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    max_size: usize,
    health_metrics: Arc<dyn HealthMetricsSink>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

impl Chunker {
    pub fn new(max_size: usize) -> Self {
        Self::with_health_metrics(max_size, Arc::new(NoopHealthMetrics))
    }

    pub fn with_health_metrics(max_size: usize, health_metrics: Arc<dyn HealthMetricsSink>) -> Self {
        Self {
            max_size,
            health_metrics,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Encode `traces` with `encoder` into payloads of at most `max_size` bytes.
    ///
    /// Traces are packed greedily in their original order. A trace which does not fit in a payload
    /// on its own is dropped and reported, as is a trace the encoder fails to serialize.
    pub fn encode(&self, encoder: &dyn Encoder, traces: &[TraceChunk]) -> Vec<EncodedChunk> {
        let mut chunks = Vec::new();
        let mut pending: Vec<Vec<u8>> = Vec::new();
        let mut pending_size = 0;

        for trace in traces {
            let encoded = match encoder.encode_trace(trace) {
                Ok(encoded) => encoded,
                Err(err) => {
                    warn!(error = %err, spans = trace.len(), "Dropping trace which failed to encode");
                    continue;
                }
            };

            if encoder.join_overhead(1) + encoded.len() > self.max_size {
                debug!(
                    size = encoded.len(),
                    max_size = self.max_size,
                    spans = trace.len(),
                    "Dropping trace. Payload too large"
                );
                self.health_metrics
                    .emit(HealthMetric::Count(TRANSPORT_TRACE_TOO_LARGE, 1), None);
                continue;
            }

            let next_size = pending_size + encoded.len();
            if !pending.is_empty()
                && encoder.join_overhead(pending.len() + 1) + next_size > self.max_size
            {
                chunks.push(Self::flush(encoder, &mut pending));
                pending_size = 0;
            }
            pending_size += encoded.len();
            pending.push(encoded);
        }

        if !pending.is_empty() {
            chunks.push(Self::flush(encoder, &mut pending));
        }
        chunks
    }

    fn flush(encoder: &dyn Encoder, pending: &mut Vec<Vec<u8>>) -> EncodedChunk {
        let encoded_traces = std::mem::take(pending);
        EncodedChunk {
            bytes: Bytes::from(encoder.join(&encoded_traces)),
            trace_count: encoded_traces.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{JsonEncoder, MsgpackEncoder};
    use crate::health_metrics::InMemoryHealthMetrics;
    use crate::span::Span;

    fn trace_with_payload(id: u64, size: usize) -> TraceChunk {
        vec![Span {
            service: "test-service".to_string(),
            name: "test".to_string(),
            resource: "x".repeat(size),
            trace_id: id,
            span_id: id,
            ..Default::default()
        }]
    }

    fn decode(chunk: &EncodedChunk) -> Vec<TraceChunk> {
        rmp_serde::from_slice(&chunk.bytes).unwrap()
    }

    #[test]
    fn test_small_traces_fit_in_one_chunk() {
        let traces: Vec<_> = (0..3).map(|i| trace_with_payload(i, 1024)).collect();
        let chunks = Chunker::default().encode(&MsgpackEncoder, &traces);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].trace_count, 3);
        assert_eq!(decode(&chunks[0]), traces);
    }

    #[test]
    fn test_oversized_trace_is_dropped() {
        let sink = Arc::new(InMemoryHealthMetrics::new());
        let chunker = Chunker::with_health_metrics(DEFAULT_MAX_PAYLOAD_SIZE, sink.clone());
        let traces = vec![trace_with_payload(1, 6 * 1024 * 1024)];

        let chunks = chunker.encode(&MsgpackEncoder, &traces);

        assert!(chunks.is_empty());
        assert_eq!(sink.total(TRANSPORT_TRACE_TOO_LARGE), 1);
    }

    #[test]
    fn test_chunks_respect_max_size_and_order() {
        let sink = Arc::new(InMemoryHealthMetrics::new());
        let max_size = 2000;
        let chunker = Chunker::with_health_metrics(max_size, sink.clone());
        let sizes = [100, 900, 50, 3000, 700, 1800, 10, 400, 1990, 600, 600, 600];
        let traces: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| trace_with_payload(i as u64, *size))
            .collect();

        for encoder in [&MsgpackEncoder as &dyn Encoder, &JsonEncoder] {
            let chunks = chunker.encode(encoder, &traces);
            assert!(chunks.iter().all(|chunk| chunk.len() <= max_size));
            assert!(chunks.iter().all(|chunk| chunk.trace_count > 0));

            let decoded: Vec<TraceChunk> = chunks
                .iter()
                .flat_map(|chunk| -> Vec<TraceChunk> {
                    if encoder.content_type() == "application/json" {
                        serde_json::from_slice(&chunk.bytes).unwrap()
                    } else {
                        decode(chunk)
                    }
                })
                .collect();
            let ids: Vec<u64> = decoded.iter().map(|trace| trace[0].trace_id).collect();
            // traces 3 and 8 can never fit
            assert_eq!(ids, vec![0, 1, 2, 4, 5, 6, 7, 9, 10, 11]);
            assert_eq!(
                chunks.iter().map(|chunk| chunk.trace_count).sum::<usize>(),
                ids.len()
            );
        }
        assert_eq!(sink.total(TRANSPORT_TRACE_TOO_LARGE), 4);
    }

    #[test]
    fn test_greedy_packing() {
        let one = MsgpackEncoder.encode_trace(&trace_with_payload(0, 100)).unwrap().len();
        // room for exactly two traces and the array header
        let chunker = Chunker::new(1 + 2 * one);
        let traces: Vec<_> = (0..5).map(|i| trace_with_payload(i, 100)).collect();

        let chunks = chunker.encode(&MsgpackEncoder, &traces);

        let counts: Vec<usize> = chunks.iter().map(|chunk| chunk.trace_count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(chunks[0].len(), 1 + 2 * one);
    }

    #[test]
    fn test_empty_input() {
        assert!(Chunker::default().encode(&MsgpackEncoder, &[]).is_empty());
    }
}

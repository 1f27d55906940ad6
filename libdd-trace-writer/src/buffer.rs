// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, thread-safe buffer accumulating traces for a single consumer.
//!
//! Producers push from any thread without blocking beyond a short critical section. Once the
//! buffer holds `max_size` items, each new item replaces a randomly chosen stored item, which
//! keeps sampling recent traces fairly while bounding memory. Items pushed while the buffer is not
//! full keep their insertion order.
//!
//! A closed buffer silently rejects new items but can still be drained.

use crate::health_metrics::{
    HealthMetric, HealthMetricsSink, NoopHealthMetrics, QUEUE_ACCEPTED, QUEUE_ACCEPTED_LENGTHS,
    QUEUE_DROPPED, QUEUE_LENGTH, QUEUE_MAX_LENGTH, QUEUE_SPANS,
};
use crate::span::TraceChunk;
use crate::MutexExt;
use rand::Rng;
use std::sync::{Arc, Mutex};

/// Default maximum number of traces held by the writer buffer.
pub const DEFAULT_BUFFER_MAX_SIZE: usize = 1000;

/// Buffer of finished traces shared between application threads and the flush worker.
pub type TraceBuffer = Buffer<TraceChunk>;

/// Size of a buffered item as reported in buffer measurements (the number of spans for a trace).
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl<T> Weighted for Vec<T> {
    fn weight(&self) -> usize {
        self.len()
    }
}

/// Outcome of a push into the buffer.
///
/// Drops are part of the buffer contract and never reported as errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// Items stored in the buffer.
    pub accepted: usize,
    /// Previously stored items evicted to make room.
    pub dropped: usize,
    /// Items rejected because the buffer is closed.
    pub rejected: usize,
}

#[derive(Debug, Default)]
struct Measures {
    accepted: i64,
    accepted_lengths: i64,
    dropped: i64,
    spans: i64,
}

#[derive(Debug)]
struct Inner<T> {
    items: Vec<T>,
    closed: bool,
    measures: Measures,
}

/// Bounded buffer. A `max_size` of 0 means unlimited.
#[derive(Debug)]
pub struct Buffer<T> {
    max_size: usize,
    inner: Mutex<Inner<T>>,
    health_metrics: Arc<dyn HealthMetricsSink>,
}

impl<T: Weighted> Buffer<T> {
    pub fn new(max_size: usize) -> Self {
        Self::with_health_metrics(max_size, Arc::new(NoopHealthMetrics))
    }

    pub fn with_health_metrics(max_size: usize, health_metrics: Arc<dyn HealthMetricsSink>) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                closed: false,
                measures: Measures::default(),
            }),
            health_metrics,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Add `item` to the buffer. If the buffer is full a random stored item is replaced.
    pub fn push(&self, item: T) -> PushOutcome {
        let mut inner = self.inner.lock_or_panic();
        if inner.closed {
            return PushOutcome {
                rejected: 1,
                ..Default::default()
            };
        }
        let dropped = self.store(&mut inner, item);
        PushOutcome {
            accepted: 1,
            dropped,
            rejected: 0,
        }
    }

    /// Bulk alternative to [`Buffer::push`], taking the lock once.
    ///
    /// Items fitting in the remaining capacity are appended in order, the rest replace random
    /// stored items one by one.
    pub fn concat(&self, items: Vec<T>) -> PushOutcome {
        let mut inner = self.inner.lock_or_panic();
        if inner.closed {
            return PushOutcome {
                rejected: items.len(),
                ..Default::default()
            };
        }
        let mut outcome = PushOutcome::default();
        for item in items {
            outcome.accepted += 1;
            outcome.dropped += self.store(&mut inner, item);
        }
        outcome
    }

    /// Take every stored item, leaving the buffer empty.
    ///
    /// Buffer measurements accumulated since the previous pop are emitted then reset.
    pub fn pop(&self) -> Vec<T> {
        let (items, measures) = {
            let mut inner = self.inner.lock_or_panic();
            (
                std::mem::take(&mut inner.items),
                std::mem::take(&mut inner.measures),
            )
        };
        self.emit_measures(&measures, items.len());
        items
    }

    pub fn len(&self) -> usize {
        self.inner.lock_or_panic().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_or_panic().items.is_empty()
    }

    /// Reject every further push. Stored items can still be popped.
    pub fn close(&self) {
        self.inner.lock_or_panic().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_or_panic().closed
    }

    /// Returns the number of evicted items (0 or 1).
    fn store(&self, inner: &mut Inner<T>, item: T) -> usize {
        let weight = item.weight() as i64;
        inner.measures.accepted += 1;
        inner.measures.accepted_lengths += weight;
        inner.measures.spans += weight;

        if self.max_size == 0 || inner.items.len() < self.max_size {
            inner.items.push(item);
            return 0;
        }

        let index = rand::thread_rng().gen_range(0..inner.items.len());
        let discarded = std::mem::replace(&mut inner.items[index], item);
        inner.measures.dropped += 1;
        inner.measures.spans -= discarded.weight() as i64;
        1
    }

    fn emit_measures(&self, measures: &Measures, length: usize) {
        let sink = &self.health_metrics;
        sink.emit(HealthMetric::Count(QUEUE_ACCEPTED, measures.accepted), None);
        sink.emit(
            HealthMetric::Count(QUEUE_ACCEPTED_LENGTHS, measures.accepted_lengths),
            None,
        );
        sink.emit(HealthMetric::Count(QUEUE_DROPPED, measures.dropped), None);
        sink.emit(HealthMetric::Gauge(QUEUE_MAX_LENGTH, self.max_size as i64), None);
        sink.emit(HealthMetric::Gauge(QUEUE_SPANS, measures.spans), None);
        sink.emit(HealthMetric::Gauge(QUEUE_LENGTH, length as i64), None);
    }
}

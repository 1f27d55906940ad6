// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches the agent asked to resend later (429 Too Many Requests).

use crate::span::TraceChunk;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRY_QUEUE_SIZE: usize = 100;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum number of queued batches. Batches queued beyond are dropped.
    pub max_queue_size: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_RETRY_QUEUE_SIZE,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Bounded queue of throttled batches with an exponential back-off.
///
/// The back-off doubles on every throttled response, up to `max_backoff`, and goes back to
/// `initial_backoff` once a batch is fully accepted.
#[derive(Debug)]
pub struct RetryQueue {
    settings: RetrySettings,
    batches: VecDeque<Vec<TraceChunk>>,
    backoff: Duration,
    last_throttled: Option<Instant>,
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

impl RetryQueue {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            batches: VecDeque::new(),
            backoff: settings.initial_backoff,
            last_throttled: None,
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Queue `batch` for a later retry. Returns `false` if the queue is full and the batch was
    /// dropped.
    pub fn push(&mut self, batch: Vec<TraceChunk>) -> bool {
        if self.batches.len() >= self.settings.max_queue_size {
            warn!(
                queue_size = self.batches.len(),
                dropped = batch.len(),
                "Retry queue full, dropping traces"
            );
            return false;
        }
        debug!(
            traces = batch.len(),
            queue_size = self.batches.len() + 1,
            "Queued traces for retry after agent back-pressure"
        );
        self.batches.push_back(batch);
        true
    }

    pub fn pop(&mut self) -> Option<Vec<TraceChunk>> {
        self.batches.pop_front()
    }

    /// Whether a queued batch should be sent before the next write.
    pub fn should_flush(&self) -> bool {
        self.should_flush_at(Instant::now())
    }

    pub fn should_flush_at(&self, now: Instant) -> bool {
        if self.batches.is_empty() {
            return false;
        }
        match self.last_throttled {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.backoff,
        }
    }

    /// Record a throttled response and lengthen the back-off.
    pub fn throttled(&mut self) {
        self.throttled_at(Instant::now());
    }

    pub fn throttled_at(&mut self, now: Instant) {
        self.last_throttled = Some(now);
        self.backoff = self
            .backoff
            .saturating_mul(BACKOFF_MULTIPLIER)
            .min(self.settings.max_backoff);
        debug!(
            backoff_ms = self.backoff.as_millis() as u64,
            "Agent back-pressure detected, back-off increased"
        );
    }

    pub fn reset_backoff(&mut self) {
        if self.last_throttled.take().is_some() || self.backoff != self.settings.initial_backoff {
            debug!("Back-off reset after successful flush");
        }
        self.backoff = self.settings.initial_backoff;
    }
}

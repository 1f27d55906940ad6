// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Asynchronous delivery of finished traces to the Datadog Trace Agent.
//!
//! Application threads hand finished traces to a [`writer::AsyncTraceWriter`]. The traces are
//! queued in a bounded [`buffer::TraceBuffer`] and flushed by a single background thread driven
//! by an [`interval_loop::IntervalLoop`]. Each flush runs the traces through the
//! [`pipeline::Pipeline`], splits them into size-bounded chunks with the [`chunker::Chunker`] and
//! sends them through a [`transport::VersionedTransport`], which downgrades to older agent API
//! versions when the agent does not recognize the current one.
//!
//! Delivery is best effort: traces are dropped, never blocked on, when the buffer is full, when
//! the agent is unreachable or when a single trace is too large to ever be sent. Drops are
//! reported through `tracing` logs and [`health_metrics`].

use std::sync::{Mutex, MutexGuard};

pub mod buffer;
pub mod chunker;
pub mod config;
pub mod encoder;
pub mod event;
pub mod health_metrics;
pub mod interval_loop;
pub mod pipeline;
pub mod span;
pub mod transport;
pub mod worker;
pub mod writer;

/// Extension trait for `Mutex` to provide a method that acquires a lock, panicking if the lock is
/// poisoned.
///
/// This helper is intended to be used to avoid having to add many `#[allow(clippy::unwrap_used)]`
/// annotations across the crate.
///
/// # Panics
///
/// This function will panic if the `Mutex` is poisoned.
pub trait MutexExt<T> {
    fn lock_or_panic(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[inline(always)]
    #[track_caller]
    fn lock_or_panic(&self) -> MutexGuard<'_, T> {
        #[allow(clippy::unwrap_used)]
        self.lock().unwrap()
    }
}

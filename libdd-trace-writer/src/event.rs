// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal publish/subscribe.

use crate::worker::panic_message;
use crate::MutexExt;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::error;

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Named event carrying a payload of type `T`.
pub struct Event<T> {
    name: &'static str,
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T> Event<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self, subscriber: impl Fn(&T) + Send + Sync + 'static) {
        self.subscribers.lock_or_panic().push(Arc::new(subscriber));
    }

    pub fn unsubscribe_all(&self) {
        self.subscribers.lock_or_panic().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock_or_panic().len()
    }

    /// Call every subscriber with `payload`. A panicking subscriber is logged and does not prevent
    /// the others from being called.
    pub fn publish(&self, payload: &T) {
        // Subscribers may subscribe from their callback
        let subscribers = self.subscribers.lock_or_panic().clone();
        for subscriber in subscribers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| subscriber(payload))) {
                error!(
                    event = self.name,
                    error = %panic_message(payload.as_ref()),
                    "Event subscriber panicked"
                );
            }
        }
    }
}

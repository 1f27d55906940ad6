// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::transport::Response;

/// Response counters of a transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub success: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub internal_error: u64,
    /// Non-ok responses since the last ok one.
    pub consecutive_errors: u64,
}

/// Rolling statistics, used for back-off decisions and diagnostics only.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    counts: Counts,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, response: &Response) {
        let counts = &mut self.counts;
        if response.is_ok() {
            counts.success += 1;
            counts.consecutive_errors = 0;
            return;
        }
        if response.is_client_error() {
            counts.client_error += 1;
        }
        if response.is_server_error() {
            counts.server_error += 1;
        }
        if response.is_internal_error() {
            counts.internal_error += 1;
        }
        counts.consecutive_errors += 1;
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.counts.consecutive_errors
    }

    pub fn reset(&mut self) {
        self.counts = Counts::default();
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::transport::HttpSender;
use crate::MutexExt;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

/// Sender answering with a fixed status per path, recording every request.
///
/// A `None` status fails the request as if the connection was refused.
#[derive(Debug)]
pub(crate) struct RecordingSender {
    default_status: Option<u16>,
    statuses: Mutex<HashMap<String, Option<u16>>>,
    requests: Mutex<Vec<http::Request<Bytes>>>,
}

impl RecordingSender {
    pub(crate) fn new(default_status: Option<u16>) -> Self {
        Self {
            default_status,
            statuses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_status(&self, path: &str, status: Option<u16>) {
        self.statuses
            .lock_or_panic()
            .insert(path.to_string(), status);
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.requests
            .lock_or_panic()
            .iter()
            .map(|r| r.uri().path().to_string())
            .collect()
    }

    pub(crate) fn requests_to(&self, path: &str) -> usize {
        self.paths().iter().filter(|p| *p == path).count()
    }

    pub(crate) fn trace_counts_to(&self, path: &str) -> Vec<usize> {
        self.requests
            .lock_or_panic()
            .iter()
            .filter(|r| r.uri().path() == path)
            .filter_map(|r| r.headers().get(super::TRACE_COUNT_HEADER)?.to_str().ok()?.parse().ok())
            .collect()
    }
}

impl HttpSender for RecordingSender {
    fn send(&self, request: http::Request<Bytes>) -> anyhow::Result<http::Response<Bytes>> {
        let status = self
            .statuses
            .lock_or_panic()
            .get(request.uri().path())
            .copied()
            .unwrap_or(self.default_status);
        self.requests.lock_or_panic().push(request);
        match status {
            Some(status) => Ok(http::Response::builder()
                .status(status)
                .body(Bytes::new())?),
            None => anyhow::bail!("connection refused"),
        }
    }
}

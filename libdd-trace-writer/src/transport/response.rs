// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;

/// Classification of one network attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    /// 2xx
    Ok,
    /// 4xx other than 404 and 415, and any unexpected status
    ClientError,
    /// 5xx
    ServerError,
    /// 415, the agent does not know the API version
    Unsupported,
    /// 404, the endpoint of the API version does not exist
    NotFound,
    /// The request failed before any response was received
    InternalError,
}

#[derive(Deserialize)]
struct AgentResponse {
    rate_by_service: HashMap<String, f64>,
}

/// Result of sending one chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    kind: ResponseKind,
    status: Option<u16>,
    payload: Option<Bytes>,
    error: Option<String>,
    trace_count: usize,
    service_rates: Option<HashMap<String, f64>>,
}

impl Response {
    /// Classify an HTTP response.
    pub fn from_status(status: u16, payload: Bytes, trace_count: usize) -> Self {
        let kind = match status {
            200..=299 => ResponseKind::Ok,
            404 => ResponseKind::NotFound,
            415 => ResponseKind::Unsupported,
            500..=599 => ResponseKind::ServerError,
            _ => ResponseKind::ClientError,
        };
        let service_rates = match kind {
            ResponseKind::Ok => serde_json::from_slice::<AgentResponse>(&payload)
                .ok()
                .map(|response| response.rate_by_service),
            _ => None,
        };
        Self {
            kind,
            status: Some(status),
            payload: (!payload.is_empty()).then_some(payload),
            error: None,
            trace_count,
            service_rates,
        }
    }

    /// A request which failed locally, e.g. connection refused or timeout.
    pub fn internal_error(error: impl Display, trace_count: usize) -> Self {
        Self {
            kind: ResponseKind::InternalError,
            status: None,
            payload: None,
            error: Some(error.to_string()),
            trace_count,
            service_rates: None,
        }
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// HTTP status, absent for internal errors.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Description of the local failure of an internal error.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn trace_count(&self) -> usize {
        self.trace_count
    }

    /// Sampling rates per service returned by the agent.
    pub fn service_rates(&self) -> Option<&HashMap<String, f64>> {
        self.service_rates.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Ok
    }

    /// Any 4xx, including [`ResponseKind::NotFound`] and [`ResponseKind::Unsupported`].
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind,
            ResponseKind::ClientError | ResponseKind::NotFound | ResponseKind::Unsupported
        )
    }

    pub fn is_server_error(&self) -> bool {
        self.kind == ResponseKind::ServerError
    }

    pub fn is_internal_error(&self) -> bool {
        self.kind == ResponseKind::InternalError
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ResponseKind::NotFound
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind == ResponseKind::Unsupported
    }

    /// The agent asks the tracer to slow down (429).
    pub fn too_many_requests(&self) -> bool {
        self.status == Some(429)
    }

    /// The agent does not recognize the API version the request was sent with.
    pub fn needs_downgrade(&self) -> bool {
        matches!(self.kind, ResponseKind::NotFound | ResponseKind::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let cases = [
            (200, ResponseKind::Ok),
            (202, ResponseKind::Ok),
            (400, ResponseKind::ClientError),
            (404, ResponseKind::NotFound),
            (415, ResponseKind::Unsupported),
            (429, ResponseKind::ClientError),
            (500, ResponseKind::ServerError),
            (503, ResponseKind::ServerError),
            (302, ResponseKind::ClientError),
        ];
        for (status, kind) in cases {
            let response = Response::from_status(status, Bytes::new(), 1);
            assert_eq!(response.kind(), kind, "status {status}");
            assert_eq!(response.status(), Some(status));
        }
    }

    #[test]
    fn test_predicates() {
        let not_found = Response::from_status(404, Bytes::new(), 1);
        assert!(not_found.is_client_error());
        assert!(not_found.is_not_found());
        assert!(not_found.needs_downgrade());
        assert!(!not_found.is_ok());

        let unsupported = Response::from_status(415, Bytes::new(), 1);
        assert!(unsupported.is_client_error());
        assert!(unsupported.is_unsupported());
        assert!(unsupported.needs_downgrade());

        let throttled = Response::from_status(429, Bytes::new(), 1);
        assert!(throttled.too_many_requests());
        assert!(!throttled.needs_downgrade());

        let server_error = Response::from_status(500, Bytes::new(), 1);
        assert!(server_error.is_server_error());
        assert!(!server_error.is_client_error());
    }

    #[test]
    fn test_internal_error() {
        let response = Response::internal_error("connection refused", 4);
        assert!(response.is_internal_error());
        assert_eq!(response.status(), None);
        assert_eq!(response.error(), Some("connection refused"));
        assert_eq!(response.trace_count(), 4);
        assert!(!response.is_client_error());
    }

    #[test]
    fn test_service_rates() {
        let body = Bytes::from_static(
            br#"{"rate_by_service":{"service:,env:":1.0,"service:web,env:prod":0.5}}"#,
        );
        let response = Response::from_status(200, body.clone(), 2);
        let rates = response.service_rates().unwrap();
        assert_eq!(rates.get("service:web,env:prod"), Some(&0.5));
        assert_eq!(rates.len(), 2);
        assert_eq!(response.payload(), Some(&body));

        let response = Response::from_status(200, Bytes::from_static(b"OK"), 2);
        assert!(response.service_rates().is_none());

        let response = Response::from_status(500, body, 2);
        assert!(response.service_rates().is_none());
    }
}

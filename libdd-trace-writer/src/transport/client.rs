// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::health_metrics::{
    HealthMetric, HealthMetricsSink, API_ERRORS, API_REQUESTS, API_RESPONSES,
};
use crate::transport::{
    ApiVersion, HttpSender, Request, Response, Statistics, TracerMetadata, TransportError,
};
use http::{header, Method, Uri};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

pub const TRACE_COUNT_HEADER: &str = "x-datadog-trace-count";

/// Sends chunks to the endpoint of a single API version.
#[derive(Clone, Debug)]
pub struct TransportClient {
    api: Arc<ApiVersion>,
    endpoint: Uri,
    headers: HashMap<&'static str, String>,
    sender: Arc<dyn HttpSender>,
    stats: Statistics,
    health_metrics: Arc<dyn HealthMetricsSink>,
}

impl TransportClient {
    /// # Errors
    /// Fails if the url of the API endpoint built from `agent_url` is invalid.
    pub fn new(
        agent_url: &str,
        api: Arc<ApiVersion>,
        metadata: &TracerMetadata,
        sender: Arc<dyn HttpSender>,
        health_metrics: Arc<dyn HealthMetricsSink>,
    ) -> Result<Self, TransportError> {
        let url = format!("{}{}", agent_url.trim_end_matches('/'), api.path());
        let endpoint = url
            .parse::<Uri>()
            .map_err(|err| TransportError::InvalidUrl {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            api,
            endpoint,
            headers: metadata.into(),
            sender,
            stats: Statistics::new(),
            health_metrics,
        })
    }

    /// Carry the statistics of a previous client over.
    pub fn with_statistics(mut self, stats: Statistics) -> Self {
        self.stats = stats;
        self
    }

    pub fn api(&self) -> &Arc<ApiVersion> {
        &self.api
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn into_stats(self) -> Statistics {
        self.stats
    }

    /// Send `request`. Failures are classified into the returned [`Response`], never raised.
    pub fn send(&mut self, request: &Request) -> Response {
        let trace_count = request.chunk.trace_count;
        self.health_metrics
            .emit(HealthMetric::Count(API_REQUESTS, 1), None);

        let response = match self.build_request(request) {
            Ok(http_request) => match self.sender.send(http_request) {
                Ok(http_response) => {
                    let status = http_response.status().as_u16();
                    Response::from_status(status, http_response.into_body(), trace_count)
                }
                Err(err) => Response::internal_error(format!("{err:#}"), trace_count),
            },
            Err(err) => Response::internal_error(err, trace_count),
        };

        self.report(&response);
        self.stats.update(&response);
        response
    }

    fn build_request(&self, request: &Request) -> Result<http::Request<bytes::Bytes>, http::Error> {
        let mut builder = http::Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(
                header::USER_AGENT,
                concat!("Tracer/", env!("CARGO_PKG_VERSION")),
            );
        for (key, value) in &self.headers {
            builder = builder.header(*key, value);
        }
        builder
            .header(header::CONTENT_TYPE, request.content_type)
            .header(TRACE_COUNT_HEADER, request.chunk.trace_count.to_string())
            .body(request.chunk.bytes.clone())
    }

    fn report(&self, response: &Response) {
        let api = self.api.id();
        match response.status() {
            Some(status) => {
                self.health_metrics.emit(
                    HealthMetric::Count(API_RESPONSES, 1),
                    Some(format!("status_code:{status}")),
                );
                if response.is_ok() {
                    debug!(%api, status, trace_count = response.trace_count(), "Traces sent to the agent");
                } else {
                    debug!(%api, status, trace_count = response.trace_count(), "Agent rejected traces");
                }
            }
            None => {
                self.health_metrics
                    .emit(HealthMetric::Count(API_ERRORS, 1), None);
                let cause = response.error().unwrap_or_default();
                // Only the first of a series of failures is worth an error, the agent is likely down
                if self.stats.consecutive_errors() > 0 {
                    debug!(%api, endpoint = %self.endpoint, cause, "Failed to send traces");
                } else {
                    error!(%api, endpoint = %self.endpoint, cause, "Failed to send traces");
                }
            }
        }
    }
}

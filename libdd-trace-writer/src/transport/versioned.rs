// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::chunker::Chunker;
use crate::health_metrics::{HealthMetric, HealthMetricsSink, TRANSPORT_CHUNKED};
use crate::span::TraceChunk;
use crate::transport::{
    ApiId, ApiRegistry, ApiVersion, Counts, HttpSender, Request, Response, Statistics,
    TracerMetadata, TransportClient, TransportError,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Transport negotiating the API version with the agent.
///
/// Traces are chunked with the encoder of the current API version. When the agent answers that
/// it does not know the version, the transport switches to its fallback and sends the whole
/// batch again, as every chunk was encoded for the rejected version.
///
/// The transport is driven by a single thread and never retries failed requests.
#[derive(Clone, Debug)]
pub struct VersionedTransport {
    agent_url: String,
    registry: ApiRegistry,
    metadata: TracerMetadata,
    sender: Arc<dyn HttpSender>,
    chunker: Chunker,
    health_metrics: Arc<dyn HealthMetricsSink>,
    client: TransportClient,
}

impl VersionedTransport {
    /// Build a transport starting with the API version `api_id` of `registry`.
    ///
    /// # Errors
    /// Fails if the registry is inconsistent, if `api_id` is not registered or if `agent_url`
    /// does not form valid endpoint urls.
    pub fn new(
        agent_url: impl Into<String>,
        registry: ApiRegistry,
        api_id: &ApiId,
        metadata: TracerMetadata,
        sender: Arc<dyn HttpSender>,
        chunker: Chunker,
        health_metrics: Arc<dyn HealthMetricsSink>,
    ) -> Result<Self, TransportError> {
        registry.validate()?;
        let agent_url = agent_url.into();
        let client = TransportClient::new(
            &agent_url,
            registry.resolve(api_id)?,
            &metadata,
            sender.clone(),
            health_metrics.clone(),
        )?;
        Ok(Self {
            agent_url,
            registry,
            metadata,
            sender,
            chunker,
            health_metrics,
            client,
        })
    }

    pub fn agent_url(&self) -> &str {
        &self.agent_url
    }

    pub fn registry(&self) -> &ApiRegistry {
        &self.registry
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn current_api_id(&self) -> &ApiId {
        self.client.api().id()
    }

    pub fn current_api(&self) -> &Arc<ApiVersion> {
        self.client.api()
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    pub fn stats(&self) -> &Statistics {
        self.client.stats()
    }

    pub fn counts(&self) -> Counts {
        self.client.stats().counts()
    }

    /// Switch to the API version `id`. Statistics are kept.
    ///
    /// # Errors
    /// Fails if `id` is not registered.
    pub fn change_api(&mut self, id: &ApiId) -> Result<(), TransportError> {
        let api = self.registry.resolve(id)?;
        let client = TransportClient::new(
            &self.agent_url,
            api,
            &self.metadata,
            self.sender.clone(),
            self.health_metrics.clone(),
        )?
        .with_statistics(self.client.stats().clone());
        self.client = client;
        Ok(())
    }

    /// Send `traces`, one request per chunk, and return the response of every chunk.
    ///
    /// # Errors
    /// Fails with [`TransportError::NoDowngradeAvailable`] when the agent rejects an API version
    /// which has no fallback.
    pub fn send_traces(&mut self, traces: &[TraceChunk]) -> Result<Vec<Response>, TransportError> {
        'send: loop {
            let encoder = self.client.api().encoder().clone();
            let chunks = self.chunker.encode(encoder.as_ref(), traces);
            let mut responses = Vec::with_capacity(chunks.len());

            for chunk in chunks {
                let response = self
                    .client
                    .send(&Request::new(chunk, encoder.content_type()));
                if response.needs_downgrade() {
                    self.downgrade(&response)?;
                    continue 'send;
                }
                responses.push(response);
            }

            debug!(
                api = %self.current_api_id(),
                chunks = responses.len(),
                traces = traces.len(),
                "Sent trace batch"
            );
            self.health_metrics.emit(
                HealthMetric::Distribution(
                    TRANSPORT_CHUNKED,
                    i64::try_from(responses.len()).unwrap_or(i64::MAX),
                ),
                None,
            );
            return Ok(responses);
        }
    }

    fn downgrade(&mut self, response: &Response) -> Result<(), TransportError> {
        let current = self.client.api().clone();
        let fallback = current
            .fallback()
            .ok_or_else(|| TransportError::NoDowngradeAvailable(current.id().clone()))?;
        info!(
            from = %current.id(),
            to = %fallback,
            status = ?response.status(),
            "Agent does not support the API version, downgrading"
        );
        self.change_api(fallback)
    }
}

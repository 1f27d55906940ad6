// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::DEFAULT_BUFFER_MAX_SIZE;
use crate::chunker::{Chunker, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::config::{WriterConfig, DEFAULT_AGENT_HOST, DEFAULT_AGENT_PORT};
use crate::health_metrics::{DogStatsDHealthMetrics, HealthMetricsSink, NoopHealthMetrics};
use crate::interval_loop::LoopSettings;
use crate::pipeline::{Pipeline, TraceProcessor};
use crate::span;
use crate::transport::{
    ApiId, ApiRegistry, HttpSender, HyperSender, TracerMetadata, TransportError,
    VersionedTransport, DEFAULT_REQUEST_TIMEOUT,
};
use crate::writer::{
    AsyncTraceWriter, RetryQueue, RetrySettings, TraceWriter, WriterForkPolicy,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
use http::Uri;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("invalid agent url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Builder of [`TraceWriter`] and [`AsyncTraceWriter`].
#[derive(Default, Debug)]
pub struct TraceWriterBuilder {
    url: Option<String>,
    metadata: TracerMetadata,
    report_hostname: bool,
    hostname: Option<String>,
    buffer_size: Option<usize>,
    max_payload_size: Option<usize>,
    loop_settings: LoopSettings,
    fork_policy: WriterForkPolicy,
    shutdown_timeout: Option<Duration>,
    disabled: bool,
    request_timeout: Option<Duration>,
    health_metrics: Option<Arc<dyn HealthMetricsSink>>,
    health_metrics_enabled: bool,
    dogstatsd_addr: Option<String>,
    pipeline: Pipeline,
    registry: Option<ApiRegistry>,
    api_id: Option<ApiId>,
    retry_settings: RetrySettings,
    sender: Option<Arc<dyn HttpSender>>,
}

impl TraceWriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with a configuration read from the environment.
    pub fn from_config(config: &WriterConfig) -> Self {
        let mut builder = Self::default();
        builder
            .set_url(&config.agent_url)
            .set_request_timeout(config.request_timeout)
            .set_report_hostname(config.report_hostname)
            .set_buffer_size(config.buffer_size)
            .set_interval(config.flush_interval)
            .set_dogstatsd_addr(&config.dogstatsd_addr);
        if config.health_metrics_enabled {
            builder.enable_health_metrics();
        }
        builder
    }

    /// Sets the url of the agent, `http://<host>:<port>`.
    pub fn set_url(&mut self, url: &str) -> &mut Self {
        self.url = Some(url.to_owned());
        self
    }

    pub fn set_metadata(&mut self, metadata: TracerMetadata) -> &mut Self {
        self.metadata = metadata;
        self
    }

    pub fn set_language(&mut self, language: &str) -> &mut Self {
        language.clone_into(&mut self.metadata.language);
        self
    }

    pub fn set_language_version(&mut self, language_version: &str) -> &mut Self {
        language_version.clone_into(&mut self.metadata.language_version);
        self
    }

    pub fn set_language_interpreter(&mut self, language_interpreter: &str) -> &mut Self {
        language_interpreter.clone_into(&mut self.metadata.language_interpreter);
        self
    }

    pub fn set_tracer_version(&mut self, tracer_version: &str) -> &mut Self {
        tracer_version.clone_into(&mut self.metadata.tracer_version);
        self
    }

    /// Tag the first span of every trace with the name of the host.
    pub fn set_report_hostname(&mut self, report_hostname: bool) -> &mut Self {
        self.report_hostname = report_hostname;
        self
    }

    /// Hostname reported instead of the resolved one.
    pub fn set_hostname(&mut self, hostname: &str) -> &mut Self {
        self.hostname = Some(hostname.to_owned());
        self
    }

    /// Maximum number of traces queued by the async writer. 0 means unlimited.
    pub fn set_buffer_size(&mut self, buffer_size: usize) -> &mut Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.max_payload_size = Some(max_payload_size);
        self
    }

    pub fn set_interval(&mut self, interval: Duration) -> &mut Self {
        self.loop_settings.interval = interval;
        self
    }

    pub fn set_back_off_ratio(&mut self, back_off_ratio: f64) -> &mut Self {
        self.loop_settings.back_off_ratio = back_off_ratio;
        self
    }

    pub fn set_back_off_max(&mut self, back_off_max: Duration) -> &mut Self {
        self.loop_settings.back_off_max = back_off_max;
        self
    }

    pub fn set_wait_before_first_iteration(&mut self, wait: bool) -> &mut Self {
        self.loop_settings.wait_before_first_iteration = wait;
        self
    }

    pub fn set_fork_policy(&mut self, fork_policy: WriterForkPolicy) -> &mut Self {
        self.fork_policy = fork_policy;
        self
    }

    pub fn set_shutdown_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// A disabled async writer queues traces but does not start its flush thread.
    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.disabled = !enabled;
        self
    }

    /// Timeout of a single request to the agent. Ignored when a custom sender is set.
    pub fn set_request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sink receiving health metrics. Takes precedence over DogStatsD.
    pub fn set_health_metrics(&mut self, sink: Arc<dyn HealthMetricsSink>) -> &mut Self {
        self.health_metrics = Some(sink);
        self
    }

    /// Emit health metrics to DogStatsD.
    pub fn enable_health_metrics(&mut self) -> &mut Self {
        self.health_metrics_enabled = true;
        self
    }

    pub fn set_dogstatsd_addr(&mut self, addr: &str) -> &mut Self {
        self.dogstatsd_addr = Some(addr.to_owned());
        self
    }

    pub fn set_pipeline(&mut self, pipeline: Pipeline) -> &mut Self {
        self.pipeline = pipeline;
        self
    }

    pub fn add_processor(&mut self, processor: impl TraceProcessor + 'static) -> &mut Self {
        self.pipeline.before_flush(processor);
        self
    }

    /// API versions the transport may use. Defaults to [`ApiRegistry::agent_defaults`].
    pub fn set_api_registry(&mut self, registry: ApiRegistry) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// Initial API version. Defaults to the default version of the registry.
    pub fn set_api_id(&mut self, api_id: ApiId) -> &mut Self {
        self.api_id = Some(api_id);
        self
    }

    pub fn set_retry_settings(&mut self, retry_settings: RetrySettings) -> &mut Self {
        self.retry_settings = retry_settings;
        self
    }

    /// HTTP client used instead of the default hyper one.
    pub fn set_http_sender(&mut self, sender: Arc<dyn HttpSender>) -> &mut Self {
        self.sender = Some(sender);
        self
    }

    /// Build a writer flushing on the calling thread.
    pub fn build(self) -> Result<TraceWriter, BuilderError> {
        let health_metrics = self.health_metrics_sink();
        self.build_writer(health_metrics)
    }

    /// Build a writer flushing on a background thread.
    pub fn build_async(self) -> Result<AsyncTraceWriter, BuilderError> {
        let loop_settings = self.loop_settings;
        if loop_settings.interval.is_zero() {
            return Err(BuilderError::InvalidConfiguration(
                "the flush interval must not be zero".to_string(),
            ));
        }
        if !loop_settings.back_off_ratio.is_finite() || loop_settings.back_off_ratio < 1.0 {
            return Err(BuilderError::InvalidConfiguration(format!(
                "the back-off ratio must be at least 1, got {}",
                loop_settings.back_off_ratio
            )));
        }
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_MAX_SIZE);
        let fork_policy = self.fork_policy;
        let shutdown_timeout = self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let enabled = !self.disabled;
        let health_metrics = self.health_metrics_sink();

        let writer = self.build_writer(health_metrics.clone())?;
        let writer = AsyncTraceWriter::new(
            writer,
            buffer_size,
            loop_settings,
            fork_policy,
            shutdown_timeout,
            health_metrics,
        );
        writer.set_enabled(enabled);
        Ok(writer)
    }

    fn build_writer(
        self,
        health_metrics: Arc<dyn HealthMetricsSink>,
    ) -> Result<TraceWriter, BuilderError> {
        let max_payload_size = self.max_payload_size.unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE);
        if max_payload_size == 0 {
            return Err(BuilderError::InvalidConfiguration(
                "the max payload size must not be zero".to_string(),
            ));
        }
        let url = self
            .url
            .unwrap_or_else(|| format!("http://{DEFAULT_AGENT_HOST}:{DEFAULT_AGENT_PORT}"));
        validate_url(&url)?;

        let registry = self.registry.unwrap_or_else(ApiRegistry::agent_defaults);
        let api_id = match self.api_id.or_else(|| registry.default_id().cloned()) {
            Some(api_id) => api_id,
            None => {
                return Err(BuilderError::InvalidConfiguration(
                    "no API version registered".to_string(),
                ))
            }
        };
        let sender = self.sender.unwrap_or_else(|| {
            Arc::new(HyperSender::new(
                self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            ))
        });
        let transport = VersionedTransport::new(
            url,
            registry,
            &api_id,
            self.metadata,
            sender,
            Chunker::with_health_metrics(max_payload_size, health_metrics.clone()),
            health_metrics.clone(),
        )?;

        let hostname = if self.report_hostname {
            let hostname = self.hostname.or_else(span::hostname);
            if hostname.is_none() {
                warn!("Hostname reporting is enabled but the hostname could not be resolved");
            }
            hostname
        } else {
            None
        };

        Ok(TraceWriter::new(
            transport,
            self.pipeline,
            hostname,
            RetryQueue::new(self.retry_settings),
            health_metrics,
        ))
    }

    fn health_metrics_sink(&self) -> Arc<dyn HealthMetricsSink> {
        if let Some(sink) = &self.health_metrics {
            return sink.clone();
        }
        if !self.health_metrics_enabled {
            return Arc::new(NoopHealthMetrics);
        }
        let addr = self
            .dogstatsd_addr
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_DOGSTATSD_ADDR);
        match DogStatsDHealthMetrics::new(addr) {
            Ok(sink) => Arc::new(sink),
            Err(err) => {
                warn!(
                    addr,
                    error = %err,
                    "Failed to create DogStatsD client, health metrics are disabled"
                );
                Arc::new(NoopHealthMetrics)
            }
        }
    }
}

fn validate_url(url: &str) -> Result<(), BuilderError> {
    let invalid = |reason: String| BuilderError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let uri = url
        .parse::<Uri>()
        .map_err(|err| invalid(err.to_string()))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid("the scheme must be http or https".to_string())),
    }
    if uri.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

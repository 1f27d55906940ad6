// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network seam of the transport.

use anyhow::anyhow;
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Blocking HTTP client used by the transport.
///
/// Implementations are called from a single thread at a time but must be shareable between the
/// clients of successive API versions.
pub trait HttpSender: Send + Sync + Debug {
    /// Send `request` and wait for the full response.
    ///
    /// # Errors
    /// Fails if no response was received, e.g. the connection was refused or the request timed
    /// out. HTTP error statuses are not errors.
    fn send(&self, request: http::Request<Bytes>) -> anyhow::Result<http::Response<Bytes>>;
}

type HyperClient = Client<HttpConnector, Full<Bytes>>;

struct HyperState {
    pid: u32,
    runtime: Runtime,
    client: HyperClient,
}

/// [`HttpSender`] running requests on hyper, driven by a private current-thread runtime.
///
/// The runtime and the client are built lazily and rebuilt when the process id changes, as the
/// runtime of the parent process is unusable in a forked child. No lock is held while a request is
/// in flight, so a fork during a request leaves nothing for the child to wait on.
pub struct HyperSender {
    timeout: Duration,
    state: ArcSwapOption<HyperState>,
}

impl Debug for HyperSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperSender")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for HyperSender {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl HyperSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: ArcSwapOption::empty(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_state(pid: u32) -> anyhow::Result<HyperState> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        // Connections are not kept alive: requests are spaced by the flush interval and the agent
        // closes idle connections quickly.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());
        Ok(HyperState {
            pid,
            runtime,
            client,
        })
    }

    /// State of the current process, built on first use and after a fork.
    fn state(&self) -> anyhow::Result<Arc<HyperState>> {
        let pid = std::process::id();
        if let Some(current) = self.state.load_full() {
            if current.pid == pid {
                return Ok(current);
            }
            debug!("Fork detected, rebuilding HTTP client");
            // The runtime of the parent references threads which do not exist in this process,
            // dropping it could block forever.
            std::mem::forget(current);
        }
        let state = Arc::new(Self::build_state(pid)?);
        if let Some(previous) = self.state.swap(Some(state.clone())) {
            if previous.pid != pid {
                std::mem::forget(previous);
            }
        }
        Ok(state)
    }
}

impl HttpSender for HyperSender {
    fn send(&self, request: http::Request<Bytes>) -> anyhow::Result<http::Response<Bytes>> {
        let state = self.state()?;
        let (parts, body) = request.into_parts();
        let request = http::Request::from_parts(parts, Full::new(body));
        let client = state.client.clone();
        let timeout = self.timeout;
        state.runtime.block_on(async move {
            let response = tokio::time::timeout(timeout, async {
                let response = client.request(request).await?;
                let (parts, body) = response.into_parts();
                let body = body.collect().await?.to_bytes();
                Ok::<_, anyhow::Error>(http::Response::from_parts(parts, body))
            })
            .await
            .map_err(|_| anyhow!("request timed out after {}ms", timeout.as_millis()))??;
            Ok::<_, anyhow::Error>(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn request(url: String, body: &'static [u8]) -> http::Request<Bytes> {
        http::Request::builder()
            .method(http::Method::POST)
            .uri(url)
            .header("content-type", "application/msgpack")
            .body(Bytes::from_static(body))
            .unwrap()
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_send() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v0.4/traces")
                .header("content-type", "application/msgpack")
                .body("payload");
            then.status(200).body(r#"{"rate_by_service":{}}"#);
        });

        let sender = HyperSender::default();
        let response = sender
            .send(request(server.url("/v0.4/traces"), b"payload"))
            .unwrap();

        mock.assert();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), br#"{"rate_by_service":{}}"#);

        // the runtime is reused for the next request
        let response = sender
            .send(request(server.url("/v0.4/traces"), b"payload"))
            .unwrap();
        assert_eq!(response.status(), 200);
        mock.assert_calls(2);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_error_status_is_not_an_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v0.4/traces");
            then.status(404);
        });

        let response = HyperSender::default()
            .send(request(server.url("/v0.4/traces"), b""))
            .unwrap();

        mock.assert();
        assert_eq!(response.status(), 404);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).delay(Duration::from_secs(2));
        });

        let sender = HyperSender::new(Duration::from_millis(100));
        let err = sender
            .send(request(server.url("/v0.4/traces"), b""))
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_concurrent_requests() {
        let server = MockServer::start();
        let slow = server.mock(|when, then| {
            when.method(POST).path("/slow");
            then.status(200).delay(Duration::from_millis(800));
        });
        let fast = server.mock(|when, then| {
            when.method(POST).path("/fast");
            then.status(202);
        });

        let sender = Arc::new(HyperSender::new(Duration::from_secs(5)));
        let first = sender.state().unwrap();
        let in_flight = {
            let sender = sender.clone();
            let url = server.url("/slow");
            std::thread::spawn(move || sender.send(request(url, b"")).unwrap().status())
        };
        std::thread::sleep(Duration::from_millis(100));

        // a request in flight does not keep other callers from the state
        let state = sender.state().unwrap();
        assert!(Arc::ptr_eq(&first, &state));
        let response = sender.send(request(server.url("/fast"), b"")).unwrap();
        assert_eq!(response.status(), 202);

        assert_eq!(in_flight.join().unwrap(), 200);
        slow.assert();
        fast.assert();
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_connection_refused() {
        // nothing listens on the discard port
        let sender = HyperSender::new(Duration::from_secs(1));
        assert!(sender
            .send(request("http://127.0.0.1:9/v0.4/traces".to_string(), b""))
            .is_err());
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of encoded chunks to the agent.
//!
//! - [`TransportClient`] sends one chunk to one API version and keeps [`Statistics`].
//! - [`VersionedTransport`] chunks trace batches and negotiates the API version, downgrading along
//!   the fallback chain of the [`ApiRegistry`] when the agent does not know the current version.
//! - [`HttpSender`] is the network seam, implemented over hyper by [`HyperSender`].

mod api;
mod client;
mod error;
mod metadata;
mod response;
mod sender;
mod statistics;
#[cfg(test)]
pub(crate) mod test_utils;
mod versioned;

pub use api::{ApiId, ApiRegistry, ApiVersion, V2, V3, V4};
pub use client::{TransportClient, TRACE_COUNT_HEADER};
pub use error::TransportError;
pub use sender::{HttpSender, HyperSender, DEFAULT_REQUEST_TIMEOUT};
pub use metadata::TracerMetadata;
pub use response::{Response, ResponseKind};
pub use statistics::{Counts, Statistics};
pub use versioned::VersionedTransport;

use crate::chunker::EncodedChunk;

/// Unit handed to the network layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub chunk: EncodedChunk,
    pub content_type: &'static str,
}

impl Request {
    pub fn new(chunk: EncodedChunk, content_type: &'static str) -> Self {
        Self {
            chunk,
            content_type,
        }
    }
}

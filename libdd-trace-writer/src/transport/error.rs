// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::transport::ApiId;
use thiserror::Error;

/// Misconfigurations of the transport. Network failures are never reported through this type,
/// they are classified into a [`crate::transport::Response`] instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("API version {0} is not registered")]
    UnknownApiVersion(ApiId),
    #[error("the agent does not support API version {0} and no older version is available")]
    NoDowngradeAvailable(ApiId),
    #[error("the fallback chain starting at API version {0} loops")]
    FallbackCycle(ApiId),
    #[error("invalid agent url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

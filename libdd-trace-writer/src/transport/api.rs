// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::encoder::{Encoder, JsonEncoder, MsgpackEncoder};
use crate::transport::TransportError;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of an agent API version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ApiId(Cow<'static, str>);

impl ApiId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ApiId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl From<String> for ApiId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

pub const V4: ApiId = ApiId::from_static("v0.4");
pub const V3: ApiId = ApiId::from_static("v0.3");
pub const V2: ApiId = ApiId::from_static("v0.2");

/// An API version of the agent: the endpoint receiving traces and the encoding it expects.
#[derive(Clone, Debug)]
pub struct ApiVersion {
    id: ApiId,
    path: String,
    encoder: Arc<dyn Encoder>,
    fallback: Option<ApiId>,
}

impl ApiVersion {
    pub fn new(id: impl Into<ApiId>, path: impl Into<String>, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            encoder,
            fallback: None,
        }
    }

    /// Version to downgrade to when the agent does not support this one.
    pub fn with_fallback(mut self, fallback: impl Into<ApiId>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn id(&self) -> &ApiId {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    pub fn fallback(&self) -> Option<&ApiId> {
        self.fallback.as_ref()
    }
}

/// Set of API versions linked by their fallbacks.
#[derive(Clone, Debug, Default)]
pub struct ApiRegistry {
    versions: HashMap<ApiId, Arc<ApiVersion>>,
    default: Option<ApiId>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Versions supported by the Datadog agent, newest first:
    /// v0.4 (msgpack) -> v0.3 (msgpack) -> v0.2 (json).
    pub fn agent_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .add(ApiVersion::new(V4, "/v0.4/traces", Arc::new(MsgpackEncoder)).with_fallback(V3))
            .add(ApiVersion::new(V3, "/v0.3/traces", Arc::new(MsgpackEncoder)).with_fallback(V2))
            .add(ApiVersion::new(V2, "/v0.2/traces", Arc::new(JsonEncoder)));
        registry.default = Some(V4);
        registry
    }

    /// Register `api`, replacing any version with the same id. The first registered version
    /// becomes the default.
    pub fn add(&mut self, api: ApiVersion) -> &mut Self {
        if self.default.is_none() {
            self.default = Some(api.id.clone());
        }
        self.versions.insert(api.id.clone(), Arc::new(api));
        self
    }

    pub fn get(&self, id: &ApiId) -> Option<&Arc<ApiVersion>> {
        self.versions.get(id)
    }

    pub fn contains(&self, id: &ApiId) -> bool {
        self.versions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn default_id(&self) -> Option<&ApiId> {
        self.default.as_ref()
    }

    /// # Errors
    /// Fails if `id` is not registered.
    pub fn set_default(&mut self, id: ApiId) -> Result<(), TransportError> {
        if !self.contains(&id) {
            return Err(TransportError::UnknownApiVersion(id));
        }
        self.default = Some(id);
        Ok(())
    }

    /// Resolve `id`.
    ///
    /// # Errors
    /// Fails if `id` is not registered.
    pub fn resolve(&self, id: &ApiId) -> Result<Arc<ApiVersion>, TransportError> {
        self.get(id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownApiVersion(id.clone()))
    }

    /// Check that every fallback is registered and that no fallback chain loops.
    ///
    /// # Errors
    /// Returns the first broken link found.
    pub fn validate(&self) -> Result<(), TransportError> {
        for (start, api) in &self.versions {
            let mut api = api;
            let mut steps = 0;
            while let Some(fallback) = &api.fallback {
                api = self
                    .versions
                    .get(fallback)
                    .ok_or_else(|| TransportError::UnknownApiVersion(fallback.clone()))?;
                steps += 1;
                if steps > self.versions.len() {
                    return Err(TransportError::FallbackCycle(start.clone()));
                }
            }
        }
        Ok(())
    }
}

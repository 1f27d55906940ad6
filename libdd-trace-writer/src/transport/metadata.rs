// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

/// Description of the tracer sending the traces, sent as headers with every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracerMetadata {
    pub language: String,
    pub language_version: String,
    pub language_interpreter: String,
    pub language_interpreter_vendor: String,
    pub tracer_version: String,
    pub container_id: String,
}

impl Default for TracerMetadata {
    fn default() -> Self {
        Self {
            language: "rust".to_string(),
            language_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            language_interpreter: "rustc".to_string(),
            language_interpreter_vendor: String::new(),
            tracer_version: env!("CARGO_PKG_VERSION").to_string(),
            container_id: String::new(),
        }
    }
}

impl<'a> From<&'a TracerMetadata> for HashMap<&'static str, String> {
    fn from(metadata: &'a TracerMetadata) -> HashMap<&'static str, String> {
        let mut headers = HashMap::from([
            ("datadog-meta-lang", metadata.language.clone()),
            ("datadog-meta-lang-version", metadata.language_version.clone()),
            (
                "datadog-meta-lang-interpreter",
                metadata.language_interpreter.clone(),
            ),
            (
                "datadog-meta-lang-interpreter-vendor",
                metadata.language_interpreter_vendor.clone(),
            ),
            ("datadog-meta-tracer-version", metadata.tracer_version.clone()),
            ("datadog-container-id", metadata.container_id.clone()),
        ]);
        headers.retain(|_, v| !v.is_empty());
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_skip_empty_values() {
        let metadata = TracerMetadata {
            language: "python".to_string(),
            language_version: "3.12.1".to_string(),
            language_interpreter: "CPython".to_string(),
            tracer_version: "2.0.0".to_string(),
            ..Default::default()
        };
        let headers: HashMap<&'static str, String> = (&metadata).into();

        assert_eq!(headers.len(), 4);
        assert_eq!(headers["datadog-meta-lang"], "python");
        assert_eq!(headers["datadog-meta-lang-version"], "3.12.1");
        assert_eq!(headers["datadog-meta-lang-interpreter"], "CPython");
        assert_eq!(headers["datadog-meta-tracer-version"], "2.0.0");
        assert!(!headers.contains_key("datadog-container-id"));
    }

    #[test]
    fn test_default_describes_rust() {
        let headers: HashMap<&'static str, String> = (&TracerMetadata::default()).into();

        assert_eq!(headers.len(), 4);
        assert_eq!(headers["datadog-meta-lang"], "rust");
        assert_eq!(
            headers["datadog-meta-lang-version"],
            env!("CARGO_PKG_RUST_VERSION")
        );
        assert!(!headers["datadog-meta-lang-version"].is_empty());
        assert_eq!(headers["datadog-meta-lang-interpreter"], "rustc");
        assert_eq!(
            headers["datadog-meta-tracer-version"],
            env!("CARGO_PKG_VERSION")
        );
    }
}

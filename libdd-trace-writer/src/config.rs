// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration of the writer read from the environment.

use crate::buffer::DEFAULT_BUFFER_MAX_SIZE;
use crate::interval_loop::DEFAULT_INTERVAL;
use crate::transport::DEFAULT_REQUEST_TIMEOUT;
use std::time::Duration;

pub const DEFAULT_AGENT_HOST: &str = "127.0.0.1";
pub const DEFAULT_AGENT_PORT: u16 = 8126;
pub const DEFAULT_DOGSTATSD_ADDR: &str = "127.0.0.1:8125";

pub mod parse_env {
    use std::{env, str::FromStr, time::Duration};

    pub fn duration(name: &str) -> Option<Duration> {
        Duration::try_from_secs_f32(env::var(name).ok()?.parse::<f32>().ok()?).ok()
    }

    pub fn int<T: FromStr>(name: &str) -> Option<T> {
        env::var(name).ok()?.parse::<T>().ok()
    }

    pub fn bool(name: &str) -> Option<bool> {
        match env::var(name).ok()?.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
            _ => Some(false),
        }
    }

    pub fn str_not_empty(name: &str) -> Option<String> {
        env::var(name).ok().filter(|s| !s.is_empty())
    }
}

/// Raw values of the environment variables read by the writer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriterSettings {
    pub agent_url: Option<String>,
    pub agent_host: Option<String>,
    pub agent_port: Option<u16>,
    pub agent_timeout: Option<Duration>,
    pub report_hostname: Option<bool>,
    pub buffer_size: Option<usize>,
    pub flush_interval: Option<Duration>,
    pub health_metrics_enabled: Option<bool>,
    pub dogstatsd_url: Option<String>,
}

impl WriterSettings {
    pub const DD_TRACE_AGENT_URL: &'static str = "DD_TRACE_AGENT_URL";
    pub const DD_AGENT_HOST: &'static str = "DD_AGENT_HOST";
    pub const DD_TRACE_AGENT_PORT: &'static str = "DD_TRACE_AGENT_PORT";
    pub const DD_TRACE_AGENT_TIMEOUT_SECONDS: &'static str = "DD_TRACE_AGENT_TIMEOUT_SECONDS";
    pub const DD_TRACE_REPORT_HOSTNAME: &'static str = "DD_TRACE_REPORT_HOSTNAME";
    pub const DD_TRACE_WRITER_BUFFER_SIZE: &'static str = "DD_TRACE_WRITER_BUFFER_SIZE";
    pub const DD_TRACE_WRITER_INTERVAL_SECONDS: &'static str = "DD_TRACE_WRITER_INTERVAL_SECONDS";
    pub const DD_HEALTH_METRICS_ENABLED: &'static str = "DD_HEALTH_METRICS_ENABLED";
    pub const DD_DOGSTATSD_URL: &'static str = "DD_DOGSTATSD_URL";

    pub fn from_env() -> Self {
        Self {
            agent_url: parse_env::str_not_empty(Self::DD_TRACE_AGENT_URL),
            agent_host: parse_env::str_not_empty(Self::DD_AGENT_HOST),
            agent_port: parse_env::int(Self::DD_TRACE_AGENT_PORT),
            agent_timeout: parse_env::duration(Self::DD_TRACE_AGENT_TIMEOUT_SECONDS),
            report_hostname: parse_env::bool(Self::DD_TRACE_REPORT_HOSTNAME),
            buffer_size: parse_env::int(Self::DD_TRACE_WRITER_BUFFER_SIZE),
            flush_interval: parse_env::duration(Self::DD_TRACE_WRITER_INTERVAL_SECONDS),
            health_metrics_enabled: parse_env::bool(Self::DD_HEALTH_METRICS_ENABLED),
            dogstatsd_url: parse_env::str_not_empty(Self::DD_DOGSTATSD_URL),
        }
    }
}

/// Resolved writer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    pub agent_url: String,
    pub request_timeout: Duration,
    pub report_hostname: bool,
    pub buffer_size: usize,
    pub flush_interval: Duration,
    pub health_metrics_enabled: bool,
    /// `host:port` of the DogStatsD server receiving health metrics.
    pub dogstatsd_addr: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::from_settings(&WriterSettings::default())
    }
}

impl WriterConfig {
    pub fn from_env() -> Self {
        Self::from_settings(&WriterSettings::from_env())
    }

    pub fn from_settings(settings: &WriterSettings) -> Self {
        Self {
            agent_url: Self::agent_url_from_settings(settings),
            request_timeout: settings
                .agent_timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            report_hostname: settings.report_hostname.unwrap_or(false),
            buffer_size: settings.buffer_size.unwrap_or(DEFAULT_BUFFER_MAX_SIZE),
            flush_interval: settings
                .flush_interval
                .filter(|interval| !interval.is_zero())
                .unwrap_or(DEFAULT_INTERVAL),
            health_metrics_enabled: settings.health_metrics_enabled.unwrap_or(false),
            dogstatsd_addr: settings
                .dogstatsd_url
                .as_deref()
                .map(|url| url.strip_prefix("udp://").unwrap_or(url).to_string())
                .unwrap_or_else(|| DEFAULT_DOGSTATSD_ADDR.to_string()),
        }
    }

    fn agent_url_from_settings(settings: &WriterSettings) -> String {
        None.or_else(|| {
            settings
                .agent_url
                .as_deref()
                .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
                .map(ToString::to_string)
        })
        .or_else(|| match (&settings.agent_host, settings.agent_port) {
            (None, None) => None,
            _ => Some(format!(
                "http://{}:{}",
                settings.agent_host.as_deref().unwrap_or(DEFAULT_AGENT_HOST),
                settings.agent_port.unwrap_or(DEFAULT_AGENT_PORT),
            )),
        })
        .unwrap_or_else(|| format!("http://{DEFAULT_AGENT_HOST}:{DEFAULT_AGENT_PORT}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.agent_url, "http://127.0.0.1:8126");
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert!(!config.report_hostname);
        assert!(!config.health_metrics_enabled);
        assert_eq!(config.dogstatsd_addr, "127.0.0.1:8125");
    }

    #[test]
    fn test_agent_url_resolution() {
        let settings = WriterSettings {
            agent_url: Some("http://agent:9126".to_string()),
            agent_host: Some("ignored".to_string()),
            ..Default::default()
        };
        assert_eq!(
            WriterConfig::from_settings(&settings).agent_url,
            "http://agent:9126"
        );

        let settings = WriterSettings {
            agent_url: Some("ftp://agent".to_string()),
            agent_port: Some(9999),
            ..Default::default()
        };
        assert_eq!(
            WriterConfig::from_settings(&settings).agent_url,
            "http://127.0.0.1:9999"
        );

        let settings = WriterSettings {
            agent_host: Some("datadog-agent".to_string()),
            ..Default::default()
        };
        assert_eq!(
            WriterConfig::from_settings(&settings).agent_url,
            "http://datadog-agent:8126"
        );
    }

    #[test]
    fn test_zero_durations_fall_back_to_defaults() {
        let settings = WriterSettings {
            agent_timeout: Some(Duration::ZERO),
            flush_interval: Some(Duration::ZERO),
            dogstatsd_url: Some("udp://statsd:8125".to_string()),
            ..Default::default()
        };
        let config = WriterConfig::from_settings(&settings);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.flush_interval, DEFAULT_INTERVAL);
        assert_eq!(config.dogstatsd_addr, "statsd:8125");
    }

    #[test]
    fn test_parse_env() {
        env::set_var("_DD_TRACE_WRITER_TEST_DURATION", "0.5");
        env::set_var("_DD_TRACE_WRITER_TEST_INT", "42");
        env::set_var("_DD_TRACE_WRITER_TEST_BOOL", "True");
        env::set_var("_DD_TRACE_WRITER_TEST_EMPTY", "");

        assert_eq!(
            parse_env::duration("_DD_TRACE_WRITER_TEST_DURATION"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_env::int::<u16>("_DD_TRACE_WRITER_TEST_INT"), Some(42));
        assert_eq!(parse_env::bool("_DD_TRACE_WRITER_TEST_BOOL"), Some(true));
        assert_eq!(parse_env::bool("_DD_TRACE_WRITER_TEST_INT"), Some(false));
        assert_eq!(parse_env::str_not_empty("_DD_TRACE_WRITER_TEST_EMPTY"), None);
        assert_eq!(parse_env::int::<u16>("_DD_TRACE_WRITER_TEST_MISSING"), None);
        assert_eq!(parse_env::duration("_DD_TRACE_WRITER_TEST_BOOL"), None);
    }

    #[test]
    fn test_from_env() {
        env::set_var(WriterSettings::DD_TRACE_AGENT_URL, "http://agent.local:8126");
        env::set_var(WriterSettings::DD_TRACE_WRITER_BUFFER_SIZE, "10");
        env::set_var(WriterSettings::DD_TRACE_REPORT_HOSTNAME, "true");

        let config = WriterConfig::from_env();

        env::remove_var(WriterSettings::DD_TRACE_AGENT_URL);
        env::remove_var(WriterSettings::DD_TRACE_WRITER_BUFFER_SIZE);
        env::remove_var(WriterSettings::DD_TRACE_REPORT_HOSTNAME);

        assert_eq!(config.agent_url, "http://agent.local:8126");
        assert_eq!(config.buffer_size, 10);
        assert!(config.report_hostname);
    }
}

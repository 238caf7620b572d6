//! Configuration management for Thunder Server

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::streaming::{AuthRetryPolicy, StreamerConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub stream: StreamConfig,
    pub keepalive: KeepaliveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Public host name used in generated links
    pub fqdn: String,
    pub has_ssl: bool,
    /// Leave the port out of generated links (behind a reverse proxy)
    pub no_port: bool,
}

impl ServerConfig {
    /// Base URL clients reach the server on, with a trailing slash
    pub fn public_url(&self) -> String {
        let scheme = if self.has_ssl { "https" } else { "http" };
        if self.no_port {
            format!("{}://{}/", scheme, self.fqdn)
        } else {
            format!("{}://{}:{}/", scheme, self.fqdn, self.port)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,
    /// Secondary identities keyed by pool index (1..)
    pub multi_tokens: BTreeMap<usize, String>,
    pub channel: i64,
    pub backend: UpstreamBackend,
    pub bridge_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamBackend {
    Bridge,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub cache_size: usize,
    pub descriptor_flush_secs: u64,
    pub descriptor_cache_capacity: usize,
    pub auth_attempts: u32,
    pub auth_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
}

impl StreamConfig {
    pub fn streamer_config(&self, channel: i64) -> StreamerConfig {
        StreamerConfig {
            channel,
            cache_size: self.cache_size,
            descriptor_capacity: self.descriptor_cache_capacity,
            flush_interval: Duration::from_secs(self.descriptor_flush_secs),
            auth_retry: AuthRetryPolicy {
                attempts: self.auth_attempts,
                backoff: Duration::from_millis(self.auth_backoff_ms),
            },
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub ping_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                fqdn: "0.0.0.0".to_string(),
                has_ssl: false,
                no_port: true,
            },
            upstream: UpstreamConfig {
                api_id: 0,
                api_hash: String::new(),
                bot_token: String::new(),
                multi_tokens: BTreeMap::new(),
                channel: 0,
                backend: UpstreamBackend::Bridge,
                bridge_url: "http://127.0.0.1:8081".to_string(),
            },
            stream: StreamConfig {
                cache_size: 100,
                descriptor_flush_secs: 1800,
                descriptor_cache_capacity: 1024,
                auth_attempts: 6,
                auth_backoff_ms: 250,
                fetch_timeout_secs: 10,
            },
            keepalive: KeepaliveConfig {
                enabled: false,
                ping_interval_secs: 1200,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Build the configuration from a snapshot of environment variables
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let required = |name: &'static str| var(vars, name).ok_or(ConfigError::Missing(name));

        let bind_address = var(vars, "BIND_ADDRESS")
            .unwrap_or(defaults.server.bind_address.as_str())
            .to_string();
        let server = ServerConfig {
            port: number(vars, "PORT", defaults.server.port),
            fqdn: var(vars, "FQDN").unwrap_or(bind_address.as_str()).to_string(),
            has_ssl: flag(vars, "HAS_SSL", defaults.server.has_ssl),
            no_port: flag(vars, "NO_PORT", defaults.server.no_port),
            bind_address,
        };

        let api_id = parse_required("API_ID", required("API_ID")?)?;
        let channel = parse_required("BIN_CHANNEL", required("BIN_CHANNEL")?)?;
        let backend = match var(vars, "UPSTREAM_BACKEND").map(str::to_ascii_lowercase).as_deref() {
            None | Some("bridge") => UpstreamBackend::Bridge,
            Some("memory") => UpstreamBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "UPSTREAM_BACKEND",
                    value: other.to_string(),
                })
            }
        };
        let upstream = UpstreamConfig {
            api_id,
            api_hash: required("API_HASH")?.to_string(),
            bot_token: required("BOT_TOKEN")?.to_string(),
            multi_tokens: parse_multi_tokens(vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            channel,
            backend,
            bridge_url: var(vars, "UPSTREAM_BRIDGE_URL")
                .unwrap_or(defaults.upstream.bridge_url.as_str())
                .to_string(),
        };

        let stream = StreamConfig {
            cache_size: number(vars, "CACHE_SIZE", defaults.stream.cache_size),
            descriptor_flush_secs: number(
                vars,
                "DESCRIPTOR_FLUSH_SECS",
                defaults.stream.descriptor_flush_secs,
            ),
            descriptor_cache_capacity: number(
                vars,
                "DESCRIPTOR_CACHE_CAPACITY",
                defaults.stream.descriptor_cache_capacity,
            ),
            auth_attempts: number(vars, "AUTH_ATTEMPTS", defaults.stream.auth_attempts),
            auth_backoff_ms: number(vars, "AUTH_BACKOFF_MS", defaults.stream.auth_backoff_ms),
            fetch_timeout_secs: number(vars, "FETCH_TIMEOUT_SECS", defaults.stream.fetch_timeout_secs),
        };

        let keepalive = KeepaliveConfig {
            enabled: flag(vars, "KEEPALIVE", defaults.keepalive.enabled),
            ping_interval_secs: number(vars, "PING_INTERVAL", defaults.keepalive.ping_interval_secs),
        };

        Ok(Config {
            server,
            upstream,
            stream,
            keepalive,
        })
    }
}

/// Non-blank value of `name`
fn var<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Collect `MULTI_TOKEN<n>` variables, ordered by `n` and re-indexed from 1
pub fn parse_multi_tokens<'a>(
    vars: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<usize, String> {
    let mut numbered: Vec<(u64, &str)> = vars
        .into_iter()
        .filter_map(|(key, value)| {
            let suffix = key.strip_prefix("MULTI_TOKEN")?;
            let n = suffix.parse::<u64>().ok()?;
            let value = value.trim();
            (!value.is_empty()).then_some((n, value))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);

    numbered
        .into_iter()
        .enumerate()
        .map(|(i, (_, token))| (i + 1, token.to_string()))
        .collect()
}

fn parse_required<T: FromStr + Default + PartialEq>(
    name: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    match value.parse::<T>() {
        Ok(parsed) if parsed != T::default() => Ok(parsed),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

fn number<T: FromStr>(vars: &HashMap<String, String>, name: &str, default: T) -> T {
    let Some(value) = var(vars, name) else {
        return default;
    };
    value.parse().unwrap_or_else(|_| {
        tracing::warn!(variable = name, value, "Invalid number, using default");
        default
    })
}

fn flag(vars: &HashMap<String, String>, name: &str, default: bool) -> bool {
    let Some(value) = var(vars, name) else {
        return default;
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!(variable = name, value, "Invalid boolean, using default");
            default
        }
    }
}

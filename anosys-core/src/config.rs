use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{AnosysError, CoreResult};
use crate::http_client::HttpClient;

/// Collector endpoint used when neither an override nor discovery yields one.
pub const DEFAULT_ENDPOINT: &str = "https://www.anosys.ai";
/// Resolves a credential to the collector endpoint assigned to it.
pub const DEFAULT_DISCOVERY_URL: &str = "https://api.anosys.ai/api/resolveapikeys";

pub const ENV_API_KEY: &str = "ANOSYS_API_KEY";
pub const ENV_ENDPOINT: &str = "ANOSYS_ENDPOINT";
pub const ENV_VERBOSE: &str = "ANOSYS_VERBOSE";

/// Starting values for the per-class short key counters.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CounterCfg {
    #[serde(default = "default_string_base")]
    pub string: u64,
    #[serde(default = "default_number_base")]
    pub number: u64,
    #[serde(default = "default_bool_base")]
    pub boolean: u64,
}

impl Default for CounterCfg {
    fn default() -> Self {
        Self {
            string: default_string_base(),
            number: default_number_base(),
            boolean: default_bool_base(),
        }
    }
}

fn default_string_base() -> u64 {
    100
}
fn default_number_base() -> u64 {
    3
}
fn default_bool_base() -> u64 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// Total request timeout for a telemetry POST in milliseconds (default 5000ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_discovery_url() -> String {
    DEFAULT_DISCOVERY_URL.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Explicit collector endpoint. Skips discovery when set.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_discovery_url")]
    pub discovery_url: String,
    /// Tag recorded as `source` on spans exported by the interceptor.
    #[serde(default)]
    pub source: Option<String>,
    /// Log payloads and failed sends at debug/warn with their contents.
    #[serde(default)]
    pub verbose: bool,
    /// Export spans of streams dropped before exhaustion (off by default).
    #[serde(default)]
    pub report_abandoned_streams: bool,
    #[serde(default)]
    pub counters: CounterCfg,
    /// HTTP client configuration (timeouts). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    /// Collector credential. Never read from or written to config files.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            discovery_url: default_discovery_url(),
            source: None,
            verbose: false,
            report_abandoned_streams: false,
            counters: CounterCfg::default(),
            http: HttpCfg::default(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(AnosysError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| AnosysError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| AnosysError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| AnosysError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| AnosysError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| AnosysError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Defaults overlaid with `ANOSYS_API_KEY`, `ANOSYS_ENDPOINT` and `ANOSYS_VERBOSE`.
    pub fn from_env() -> Self {
        Self::default().with_env_lookup(|k| std::env::var(k).ok())
    }

    /// Overlay environment-style values from `lookup` onto this config.
    /// Values already present (e.g. from a file) are only replaced when the variable is set.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(SecretString::from(key));
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|e| !e.trim().is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(v) = lookup(ENV_VERBOSE) {
            self.verbose = parse_flag(&v);
        }
        self
    }
}

impl Config {
    /// Collector endpoint for this process.
    ///
    /// An explicit `endpoint` wins. Otherwise the credential is looked up at
    /// `discovery_url`; without a credential, or on any discovery failure,
    /// the default endpoint is used. Never fails.
    pub async fn resolve_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        let Some(key) = &self.api_key else {
            tracing::warn!("{ENV_API_KEY} not set; using default collector endpoint");
            return DEFAULT_ENDPOINT.to_string();
        };
        match discover(&self.discovery_url, key.expose_secret(), &self.http).await {
            Ok(url) => {
                tracing::info!(endpoint = %url, "resolved collector endpoint");
                url
            }
            Err(e) => {
                tracing::error!(error = %e, "endpoint discovery failed; using default collector endpoint");
                DEFAULT_ENDPOINT.to_string()
            }
        }
    }
}

#[derive(Deserialize)]
struct Resolved {
    #[serde(default)]
    url: Option<String>,
}

async fn discover(discovery_url: &str, key: &str, http: &HttpCfg) -> CoreResult<String> {
    let client = HttpClient::from_cfg(http)?.with_provider("discovery");
    let resolved: Resolved = client
        .get_json(discovery_url, &[("apikey", key)])
        .await
        .map_err(|e| AnosysError::Discovery(e.to_string()))?;
    resolved
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AnosysError::Discovery("response carried no url".into()))
}

fn parse_flag(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

//! Configuration loading.
//!
//! Values come from an optional YAML file named by `HARBOR_CONFIG`; every
//! field has a default. `LISTEN` overrides the listen address.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::client::manager::ManagerConfig;
use crate::client::options::{ClientOptions, RequestOptions};
use crate::http::parser::DEFAULT_MAX_HEADER_BYTES;

/// Bytes requested per socket read on the server side.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Largest request body the server accepts; longer declarations get 413.
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub read_buffer_size: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub timeout_ms: u64,
    pub follow_redirects: bool,
    pub cache_resolved: bool,
    pub use_proxy: bool,
    pub proxy: Option<Url>,
    pub max_idle_per_host: usize,
    pub idle_timeout_ms: u64,
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            follow_redirects: false,
            cache_resolved: false,
            use_proxy: false,
            proxy: None,
            max_idle_per_host: 8,
            idle_timeout_ms: 90_000,
            max_redirects: 5,
        }
    }
}

impl ClientConfig {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::new()
            .follow_redirects(self.follow_redirects)
            .cache_resolved(self.cache_resolved)
            .use_proxy(self.use_proxy)
            .timeout(Duration::from_millis(self.timeout_ms))
    }

    pub fn request_options(&self) -> RequestOptions {
        RequestOptions::new().max_redirects(self.max_redirects)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            proxy: self.proxy.clone(),
            max_idle_per_host: self.max_idle_per_host,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
        }
    }
}

impl Config {
    /// Loads the configuration from `HARBOR_CONFIG` (if set) and applies
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("HARBOR_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

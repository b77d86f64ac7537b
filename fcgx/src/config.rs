use crate::envsubst::expand_env;
use anyhow::{anyhow, Context, Result};
use fcgx_core::{Backend, ResponseFormat, ServerInfo};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Top-level fcgx configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FcgxConfig {
    /// FastCGI application address: "127.0.0.1:9000", "fastcgi://host:port" or "unix:///run/app.sock".
    #[serde(default = "default_address")]
    pub address: String,

    /// Connection setup timeout (ms). The request cycle itself is not timed.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Sent as DOCUMENT_ROOT; scripts are resolved against it.
    pub document_root: String,

    /// Script path relative to `document_root`.
    #[serde(default = "default_script")]
    pub script: String,

    /// How the application frames its output.
    #[serde(default)]
    pub response_format: ResponseFormatConfig,

    /// Set FCGI_KEEP_CONN on BEGIN_REQUEST.
    #[serde(default)]
    pub keep_conn: bool,

    #[serde(default)]
    pub server: ServerConfig,

    /// Extra params sent with every request; request-derived values win on conflict.
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Maximum application stderr captured per request (bytes).
    #[serde(default = "default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormatConfig {
    #[default]
    Http,
    Cgi,
}

impl From<ResponseFormatConfig> for ResponseFormat {
    fn from(cfg: ResponseFormatConfig) -> Self {
        match cfg {
            ResponseFormatConfig::Http => ResponseFormat::Http,
            ResponseFormatConfig::Cgi => ResponseFormat::Cgi,
        }
    }
}

/// Server identity reported to the application.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub software: Option<String>,
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_addr")]
    pub addr: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_remote_addr")]
    pub remote_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            software: None,
            name: default_server_name(),
            addr: default_server_addr(),
            port: default_server_port(),
            remote_addr: default_remote_addr(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_script() -> String {
    "index.php".to_string()
}

fn default_max_stderr_bytes() -> usize {
    1_048_576 // 1 MiB
}

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_server_addr() -> String {
    "localhost".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_remote_addr() -> String {
    "127.0.0.1".to_string()
}

impl FcgxConfig {
    pub fn validate(&self) -> Result<()> {
        Backend::parse(&self.address)
            .map_err(|e| anyhow!("invalid address '{}': {}", self.address, e))?;
        if self.connect_timeout_ms == 0 {
            return Err(anyhow!("connect_timeout_ms must be >= 1"));
        }
        if self.document_root.is_empty() {
            return Err(anyhow!("document_root must not be empty"));
        }
        if self.script.is_empty() {
            return Err(anyhow!("script must not be empty"));
        }
        if self.max_stderr_bytes == 0 {
            return Err(anyhow!("max_stderr_bytes must be >= 1"));
        }
        for name in self.params.keys() {
            if name.is_empty() {
                return Err(anyhow!("params must not contain an empty name"));
            }
        }
        Ok(())
    }

    pub fn backend(&self) -> Result<Backend> {
        Ok(Backend::parse(&self.address)?)
    }

    pub fn server_info(&self) -> ServerInfo {
        let defaults = ServerInfo::default();
        ServerInfo {
            software: self.server.software.clone().unwrap_or(defaults.software),
            name: self.server.name.clone(),
            addr: self.server.addr.clone(),
            port: self.server.port,
            remote_addr: self.server.remote_addr.clone(),
            remote_port: None,
            params: self.params.clone(),
        }
    }
}

pub fn parse_config(content: &str) -> Result<FcgxConfig> {
    let expanded = expand_env(content)?;
    let config: FcgxConfig =
        serde_yaml::from_str(&expanded).context("failed to deserialize config")?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<FcgxConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("config not found: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config: {}", path.display()))
}

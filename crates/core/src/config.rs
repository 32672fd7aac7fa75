use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubConfig {
    pub app: GitHubAppConfig,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout for GitHub API calls.
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    /// Reuse installation clients across deliveries.
    #[serde(default = "default_true")]
    pub cache_clients: bool,
    /// Count API calls and failures, reported on `/healthz`.
    #[serde(default = "default_true")]
    pub metrics: bool,
    /// Override for GitHub Enterprise Server.
    #[serde(default)]
    pub base_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubAppConfig {
    pub id: u64,
    pub webhook_secret: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage account name.
    pub account: String,
    /// Blob service endpoint. Defaults to `https://{account}.blob.core.windows.net/`.
    #[serde(default)]
    pub endpoint: Option<Url>,
    pub credential: StorageCredential,
    /// Per-request timeout for Blob service calls.
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageCredential {
    /// Base64 encoded account access key, used for Shared Key signing.
    AccountKey(String),
    /// Pre-issued SAS token query string.
    SasToken(String),
}

impl std::fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccountKey(_) => f.write_str("AccountKey(..)"),
            Self::SasToken(_) => f.write_str("SasToken(..)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self { Self { timeout_secs: default_fetch_timeout() } }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> std::net::SocketAddr { (self.address, self.port).into() }
}

impl GitHubConfig {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

impl StorageConfig {
    pub fn endpoint(&self) -> Result<Url, url::ParseError> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Url::parse(&format!("https://{}.blob.core.windows.net/", self.account)),
        }
    }

    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

fn default_address() -> IpAddr { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }

fn default_user_agent() -> String { "workflow-archiver-bot/1.0.0".to_string() }

fn default_api_timeout() -> u64 { 3 }

fn default_fetch_timeout() -> u64 { 10 }

fn default_storage_timeout() -> u64 { 10 }

fn default_true() -> bool { true }

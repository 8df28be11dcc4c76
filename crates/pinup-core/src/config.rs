use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PinupError, PinupResult};

/// Top-level configuration (loaded from pinup.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PinupConfig {
    pub log: LogConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub pool: PoolConfig,
    pub http: HttpConfig,
    pub tree: TreeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Reject plaintext http:// endpoints
    pub enforce_tls: bool,
    /// IPFS-compatible gateways accepting `/api/v0/add`
    pub upload: ServerList,
    /// Public gateways used to build download links
    pub download: ServerList,
    /// Pinning services speaking `/psa/pins`
    pub pin: ServerList,
}

/// A set of interchangeable endpoints plus the one currently selected
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerList {
    #[serde(rename = "use")]
    pub active: String,
    pub list: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Full bearer token, used verbatim
    pub token: Option<String>,
    /// Web3 address; combined with `signature` into a bearer token
    pub address: Option<String>,
    /// Hex signature of `address`, signed by its own key
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pipelines running at once
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout for metadata calls (pin listing, removal)
    pub timeout_secs: u64,
    /// Timeout for upload and pin calls
    pub transfer_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// JSON snapshot of the content tree
    pub state_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enforce_tls: false,
            upload: ServerList::new(
                "https://gw.crustfiles.net",
                &[
                    "https://gw.crustfiles.net",
                    "https://crustipfs.xyz",
                    "https://ipfs-gw.decloud.foundation",
                    "https://gw.w3ipfs.cn:10443",
                    "https://gw.smallwolf.me",
                    "https://gw.w3ipfs.com:7443",
                ],
            ),
            download: ServerList::new(
                "https://ipfs.io",
                &[
                    "https://ipfs.io",
                    "https://gw.w3ipfs.org.cn",
                    "https://crustgateway.online",
                    "https://dweb.link",
                ],
            ),
            pin: ServerList::new("https://pin.crustcode.com", &["https://pin.crustcode.com"]),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            transfer_timeout_secs: 3000,
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("~/.local/share/pinup/tree.json"),
        }
    }
}

impl ServerList {
    pub fn new(active: &str, list: &[&str]) -> Self {
        Self {
            active: active.to_string(),
            list: list.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check the active endpoint is a usable URL.
    ///
    /// An active endpoint missing from `list` is allowed but logged.
    pub fn validate(&self, section: &str, enforce_tls: bool) -> PinupResult<()> {
        let url = self.active.as_str();
        if url.is_empty() {
            return Err(PinupError::Config(format!("gateway.{section}: no endpoint selected")));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PinupError::Config(format!(
                "gateway.{section}: {url} is not an http(s) URL"
            )));
        }
        if url.starts_with("http://") {
            if enforce_tls {
                return Err(PinupError::Config(format!(
                    "gateway.{section}: {url} uses plaintext HTTP, but enforce_tls is enabled"
                )));
            }
            tracing::warn!(endpoint = %url, section, "endpoint uses plaintext HTTP");
        }
        if !self.list.is_empty() && !self.list.iter().any(|s| s == url) {
            tracing::warn!(endpoint = %url, section, "selected endpoint is not in the configured list");
        }
        Ok(())
    }

    /// Endpoint with any trailing slash removed, ready for path joining
    pub fn base_url(&self) -> &str {
        self.active.trim_end_matches('/')
    }
}

impl PinupConfig {
    pub fn validate(&self) -> PinupResult<()> {
        let tls = self.gateway.enforce_tls;
        self.gateway.upload.validate("upload", tls)?;
        self.gateway.pin.validate("pin", tls)?;
        self.gateway.download.validate("download", tls)?;
        if self.pool.concurrency == 0 {
            return Err(PinupError::Config("pool.concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

use crate::protocol::ChannelVocabulary;
use crate::socketio::ReconnectPolicy;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8006";

fn default_request_timeout_secs() -> u64 {
    30
}

/// Where the backend lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ConfigFile")]
pub struct ChannelConfig {
    pub api_base_url: Url,
    /// Realtime server; defaults to `api_base_url`.
    pub socket_url: Option<Url>,
    /// Sent as the account header on status requests.
    pub account: Option<String>,
    pub vocabulary: ChannelVocabulary,
    pub request_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
}

/// On-disk shape; every key is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api_base_url: Option<Url>,
    socket_url: Option<Url>,
    account: Option<String>,
    vocabulary: ChannelVocabulary,
    request_timeout_secs: u64,
    reconnect: ReconnectPolicy,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            api_base_url: None,
            socket_url: None,
            account: None,
            vocabulary: ChannelVocabulary::default(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TryFrom<ConfigFile> for ChannelConfig {
    type Error = url::ParseError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let api_base_url = match file.api_base_url {
            Some(url) => url,
            None => Url::parse(DEFAULT_API_BASE_URL)?,
        };
        Ok(Self {
            api_base_url,
            socket_url: file.socket_url,
            account: file.account,
            vocabulary: file.vocabulary,
            request_timeout_secs: file.request_timeout_secs,
            reconnect: file.reconnect,
        })
    }
}

impl ChannelConfig {
    /// Defaults for a backend running on this machine.
    pub fn local() -> anyhow::Result<Self> {
        ChannelConfig::try_from(ConfigFile::default()).context("parse default api url")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config: ChannelConfig = match ext.as_str() {
            "yml" | "yaml" => serde_yaml::from_str(&contents).context("parse config")?,
            "toml" | "tml" => toml::from_str(&contents).context("parse config")?,
            _ => serde_yaml::from_str(&contents)
                .or_else(|_| toml::from_str(&contents))
                .context("parse config (yaml or toml)")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for url in std::iter::once(&self.api_base_url).chain(self.socket_url.as_ref()) {
            if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
                anyhow::bail!("unsupported url scheme in {url}");
            }
        }
        if self.reconnect.max_attempts == 0 {
            anyhow::bail!("reconnect.max_attempts must be at least 1");
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            anyhow::bail!("reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn socket_url(&self) -> &Url {
        self.socket_url.as_ref().unwrap_or(&self.api_base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

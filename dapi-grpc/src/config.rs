//! DAPI server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

/// Dash network the node is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production mainnet.
    Mainnet,
    /// Public testnet.
    Testnet,
    /// Named development network.
    Devnet,
    /// Local regression-test network.
    #[default]
    Regtest,
}

impl Network {
    /// Anything but mainnet counts as a test network for the legacy status.
    pub fn is_testnet(self) -> bool {
        self != Network::Mainnet
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Devnet => write!(f, "devnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:3010")
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,
    /// Maximum concurrent streams per connection
    pub max_concurrent_streams: u32,
    /// Request timeout in seconds, applied to unary calls except
    /// `waitForStateTransitionResult`, which has its own limit
    pub request_timeout_secs: u64,
    /// Network environment
    pub network: Network,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3010)),
            max_concurrent_streams: 100,
            request_timeout_secs: 30,
            network: Network::Regtest,
        }
    }
}

/// Dash Core JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    /// How often the watcher polls for new blocks and chain locks
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// ZMQ publisher of the node (`zmqpubrawtx` and friends). Without it,
    /// live subscriptions see blocks and chain locks but no mempool events.
    pub zmq_url: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:19998".to_string(),
            rpc_user: String::new(),
            rpc_password: String::new(),
            poll_interval_ms: 1000,
            request_timeout_secs: 10,
            zmq_url: None,
        }
    }
}

/// Upstream Platform (Drive) gRPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub uri: String,
    pub connect_timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            uri: "http://127.0.0.1:26670".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

/// Subscription tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Maximum headers per `BlockHeaders` message
    pub header_batch_size: usize,
    /// Responses buffered per subscription before back-pressure applies
    pub buffer_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            header_batch_size: 2000,
            buffer_size: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub wait_for_result_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            wait_for_result_timeout_secs: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyConfig {
    /// Serve the unversioned services next to v0
    pub enabled: bool,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration for the DAPI server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DapiConfig {
    pub server: ServerConfig,
    pub core: CoreConfig,
    pub drive: DriveConfig,
    pub streaming: StreamingConfig,
    pub platform: PlatformConfig,
    pub legacy: LegacyConfig,
}

impl DapiConfig {
    /// Load configuration from a file path.
    ///
    /// Only TOML is supported. Environment variables with the `DAPI_` prefix
    /// override file values, with `__` separating sections
    /// (`DAPI_SERVER__LISTEN_ADDR`).
    ///
    /// # Example config (TOML)
    /// ```toml
    /// [dapi.server]
    /// listen_addr = "0.0.0.0:3010"
    /// network = "testnet"
    ///
    /// [dapi.core]
    /// rpc_url = "http://127.0.0.1:19998"
    /// rpc_user = "dashrpc"
    /// rpc_password = "password"
    /// zmq_url = "tcp://127.0.0.1:29998"
    ///
    /// [dapi.drive]
    /// uri = "http://127.0.0.1:26670"
    ///
    /// [dapi.legacy]
    /// enabled = true
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut figment = Figment::new();

        // Detect file format based on extension
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            figment = match ext {
                "toml" => figment.merge(Toml::file(path)),
                _ => {
                    return Err(anyhow::anyhow!(
                        "Unsupported config file format: {}. Use .toml",
                        ext
                    ));
                }
            };
        } else {
            return Err(anyhow::anyhow!("Config file must have a .toml extension"));
        }

        // Environment variables take precedence over file config
        figment = figment.merge(
            Env::prefixed("DAPI_")
                .split("__")
                .map(|key| format!("dapi.{}", key).into()),
        );

        let config: DapiConfig = figment.extract_inner("dapi").map_err(anyhow::Error::msg)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.streaming.header_batch_size == 0 {
            anyhow::bail!("streaming.header_batch_size must be at least 1");
        }
        if self.streaming.buffer_size == 0 {
            anyhow::bail!("streaming.buffer_size must be at least 1");
        }
        if self.core.poll_interval_ms == 0 {
            anyhow::bail!("core.poll_interval_ms must be at least 1");
        }
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("server.request_timeout_secs must be at least 1");
        }
        if self.platform.wait_for_result_timeout_secs == 0 {
            anyhow::bail!("platform.wait_for_result_timeout_secs must be at least 1");
        }
        if let Some(url) = &self.core.zmq_url
            && !url.starts_with("tcp://")
            && !url.starts_with("ipc://")
        {
            anyhow::bail!("core.zmq_url must be a tcp:// or ipc:// endpoint, got {}", url);
        }
        Ok(())
    }
}

/// Custom serde module for SocketAddr to handle string serialization.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        addr.to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

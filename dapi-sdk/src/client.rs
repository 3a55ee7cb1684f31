//! Connection handling

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use crate::chain::CoreClient;
use crate::error::{Error, Result};
use crate::platform::PlatformClient;
use crate::subscription::SubscriptionClient;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Deadline for unary calls; streams are not bounded by it
    pub request_timeout: Option<Duration>,
    /// Connect on first use instead of in `connect`
    pub lazy: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            lazy: false,
        }
    }
}

/// Handle on one DAPI endpoint.
///
/// Cheap to clone. Unary calls share one HTTP/2 connection and subscriptions
/// another, so the optional request timeout never cuts a long-lived stream.
#[derive(Clone)]
pub struct DapiClient {
    channel: Channel,
    streaming: Channel,
}

impl DapiClient {
    /// Connect with default settings.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        Self::connect_with_config(endpoint, ClientConfig::default()).await
    }

    pub async fn connect_with_config(endpoint: &str, config: ClientConfig) -> Result<Self> {
        let base = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::InvalidEndpoint(format!("{}: {}", endpoint, e)))?
            .connect_timeout(config.connect_timeout);
        let unary = match config.request_timeout {
            Some(timeout) => base.clone().timeout(timeout),
            None => base.clone(),
        };

        let (channel, streaming) = if config.lazy {
            (unary.connect_lazy(), base.connect_lazy())
        } else {
            let channel = unary.connect().await.map_err(Error::ConnectionFailed)?;
            let streaming = base.connect().await.map_err(Error::ConnectionFailed)?;
            (channel, streaming)
        };
        Ok(Self { channel, streaming })
    }

    /// Core (layer 1) queries and broadcasts.
    pub fn core(&self) -> CoreClient {
        CoreClient::new(self.channel.clone())
    }

    /// Platform (layer 2) queries and broadcasts.
    pub fn platform(&self) -> PlatformClient {
        PlatformClient::new(self.channel.clone())
    }

    /// Header and transaction subscriptions.
    pub fn subscriptions(&self) -> SubscriptionClient {
        SubscriptionClient::new(self.streaming.clone())
    }
}

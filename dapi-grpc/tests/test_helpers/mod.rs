//! Shared fixtures for the e2e tests: a loopback server over in-memory
//! backends and typed clients pointing at it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dapi_grpc::DapiConfig;
use dapi_grpc::DapiServer;
use dapi_grpc::backend::{MemoryCore, MemoryPlatform};
use dapi_grpc::chain::Hash256;
use dapi_grpc::chain::transaction::{OutPoint, Transaction, TxIn, TxOut, p2pkh_script};
use dapi_grpc::proto::{legacy, v0};
use dapi_grpc::services::StreamingService;
use slog::{Logger, o};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Channel;

pub fn test_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// A running server plus direct handles on its backends.
pub struct TestServer {
    pub addr: SocketAddr,
    pub core: Arc<MemoryCore>,
    pub platform: Arc<MemoryPlatform>,
    pub streaming: StreamingService,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn channel(&self) -> Result<Channel, tonic::transport::Error> {
        Channel::from_shared(self.endpoint())
            .expect("valid endpoint")
            .connect()
            .await
    }

    pub async fn core_client(
        &self,
    ) -> Result<v0::core_client::CoreClient<Channel>, tonic::transport::Error> {
        Ok(v0::core_client::CoreClient::new(self.channel().await?))
    }

    pub async fn platform_client(
        &self,
    ) -> Result<v0::platform_client::PlatformClient<Channel>, tonic::transport::Error> {
        Ok(v0::platform_client::PlatformClient::new(self.channel().await?))
    }

    pub async fn legacy_core_client(
        &self,
    ) -> Result<legacy::core_client::CoreClient<Channel>, tonic::transport::Error> {
        Ok(legacy::core_client::CoreClient::new(self.channel().await?))
    }

    pub async fn legacy_platform_client(
        &self,
    ) -> Result<legacy::platform_client::PlatformClient<Channel>, tonic::transport::Error> {
        Ok(legacy::platform_client::PlatformClient::new(
            self.channel().await?,
        ))
    }

    /// Wait until every subscription task has exited.
    pub async fn wait_for_idle_subscriptions(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.streaming.active_subscriptions() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriptions did not wind down");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn spawn_test_server() -> TestServer {
    spawn_test_server_with(DapiConfig::default()).await
}

/// Serve `config` on an ephemeral loopback port.
pub async fn spawn_test_server_with(config: DapiConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let core = Arc::new(MemoryCore::new(config.server.network));
    let platform = Arc::new(MemoryPlatform::new());
    let server = DapiServer::new(
        config,
        core.clone(),
        platform.clone(),
        test_logger(),
    );
    let streaming = server.streaming().clone();

    let (shutdown, signal) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .into_router()
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = signal.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        core,
        platform,
        streaming,
        shutdown: Some(shutdown),
    }
}

/// A plain transaction paying `pubkey_hash`, distinct per `seed`.
pub fn payment(seed: u8, pubkey_hash: [u8; 20]) -> Vec<u8> {
    Transaction {
        version: 2,
        tx_type: 0,
        inputs: vec![TxIn {
            previous_output: OutPoint {
                txid: Hash256([seed; 32]),
                vout: 0,
            },
            script_sig: vec![0x51],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 10_000 + seed as u64,
            script_pubkey: p2pkh_script(&pubkey_hash),
        }],
        lock_time: 0,
        extra_payload: None,
    }
    .encode()
}

//! Dash Core JSON-RPC backend.
//!
//! Queries go straight to the node over HTTP with basic auth. Push events are
//! produced by a watcher task that polls the tip and the best chain lock, and
//! by an optional [`ZmqListener`] that adds mempool transactions and
//! instant-send locks and wakes the watcher on new blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use slog::Logger;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use super::{
    ChainStatus, CoreBackend, CoreEvent, EVENT_CHANNEL_CAPACITY, MasternodeState,
    MasternodeStatus, SendOptions, TransactionInfo, ZmqListener,
};
use crate::chain::{BLS_SIGNATURE_SIZE, Block, ChainLock, DecodeError, Hash256};
use crate::config::CoreConfig;
use crate::error::{DapiError, DapiResult};

/// Most headers `getblockheaders` returns per call.
const MAX_HEADERS_PER_CALL: u32 = 2000;

/// Default `maxfeerate` (coins per kB) when high fees are not allowed.
const DEFAULT_MAX_FEE_RATE: f64 = 0.1;

// Dash Core RPC error codes
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
const RPC_INVALID_PARAMETER: i64 = -8;
const RPC_DESERIALIZATION_ERROR: i64 = -22;
const RPC_VERIFY_ERROR: i64 = -25;
const RPC_VERIFY_REJECTED: i64 = -26;
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcFault>,
}

/// Error object returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
}

impl RpcFault {
    pub fn into_error(self) -> DapiError {
        match self.code {
            RPC_INVALID_ADDRESS_OR_KEY => DapiError::NotFound(self.message),
            RPC_INVALID_PARAMETER | RPC_DESERIALIZATION_ERROR => {
                DapiError::InvalidArgument(self.message)
            }
            RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED => DapiError::FailedPrecondition(self.message),
            RPC_VERIFY_ALREADY_IN_CHAIN => DapiError::AlreadyExists(self.message),
            code => DapiError::Internal(format!("core rpc error {}: {}", code, self.message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    chain: String,
    blocks: u32,
    headers: u32,
    bestblockhash: String,
    difficulty: f64,
    mediantime: u32,
    verificationprogress: f64,
    chainwork: String,
    #[serde(default)]
    warnings: Value,
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    #[serde(default)]
    proxy: String,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    version: u32,
    subversion: String,
    protocolversion: u32,
    #[serde(default)]
    timeoffset: i32,
    connections: u32,
    relayfee: f64,
    incrementalfee: f64,
    #[serde(default)]
    networks: Vec<NetworkEntry>,
    #[serde(default)]
    warnings: Value,
}

#[derive(Debug, Deserialize)]
struct DmnState {
    #[serde(rename = "PoSePenalty", default)]
    pose_penalty: u32,
}

#[derive(Debug, Deserialize)]
struct MasternodeStatusInfo {
    #[serde(rename = "proTxHash", default)]
    pro_tx_hash: String,
    #[serde(default)]
    state: String,
    #[serde(rename = "dmnState")]
    dmn_state: Option<DmnState>,
}

#[derive(Debug, Deserialize)]
struct MnSyncStatus {
    #[serde(rename = "IsSynced", default)]
    is_synced: bool,
}

#[derive(Debug, Deserialize)]
struct BestChainLock {
    blockhash: String,
    height: u32,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeaderInfo {
    height: u32,
}

#[derive(Debug, Deserialize)]
struct SmartFee {
    feerate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTransactionInfo {
    hex: String,
    blockhash: Option<String>,
    height: Option<u32>,
    #[serde(default)]
    confirmations: u32,
    #[serde(default)]
    instantlock: bool,
    #[serde(default)]
    chainlock: bool,
}

/// Warnings are a string on older nodes and a list on newer ones.
fn warnings_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}

fn chain_lock_from(best: BestChainLock) -> Result<ChainLock, DecodeError> {
    let signature = hex::decode(&best.signature)?;
    let signature: [u8; BLS_SIGNATURE_SIZE] =
        signature
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidLength {
                expected: BLS_SIGNATURE_SIZE,
                got: signature.len(),
            })?;
    Ok(ChainLock {
        height: best.height,
        block_hash: Hash256::from_hex(&best.blockhash)?,
        signature,
    })
}

fn chain_status_from(
    chain: BlockchainInfo,
    network: NetworkInfo,
    masternode: Option<MasternodeStatus>,
) -> Result<ChainStatus, DecodeError> {
    let mut warnings = warnings_text(&chain.warnings);
    if warnings.is_empty() {
        warnings = warnings_text(&network.warnings);
    }
    let proxy = network
        .networks
        .iter()
        .map(|n| n.proxy.as_str())
        .find(|p| !p.is_empty())
        .unwrap_or_default()
        .to_string();
    Ok(ChainStatus {
        chain: chain.chain,
        core_version: network.version,
        protocol_version: network.protocolversion,
        agent: network.subversion,
        headers_count: chain.headers,
        blocks_count: chain.blocks,
        best_block_hash: Hash256::from_hex(&chain.bestblockhash)?,
        difficulty: chain.difficulty,
        chain_work: hex::decode(&chain.chainwork)?,
        sync_progress: chain.verificationprogress,
        median_time: chain.mediantime,
        time_offset: network.timeoffset,
        peers_count: network.connections,
        relay_fee: network.relayfee,
        incremental_fee: network.incrementalfee,
        proxy,
        warnings,
        masternode,
    })
}

/// Core backend talking JSON-RPC to a Dash Core node.
pub struct CoreRpcClient {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
    next_id: AtomicU64,
    events: broadcast::Sender<CoreEvent>,
    tip_changed: Arc<Notify>,
    logger: Logger,
}

impl CoreRpcClient {
    pub fn new(config: &CoreConfig, logger: Logger) -> DapiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DapiError::internal(format!("failed to build http client: {}", e)))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            url: config.rpc_url.clone(),
            user: config.rpc_user.clone(),
            password: config.rpc_password.clone(),
            next_id: AtomicU64::new(1),
            events,
            tip_changed: Arc::new(Notify::new()),
            logger,
        })
    }

    /// Issue one call, keeping node-reported faults apart from transport errors.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> DapiResult<Result<T, RpcFault>> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| DapiError::unavailable(format!("core rpc unreachable: {}", e)))?;

        // The node answers faults with HTTP 500 and a JSON body
        let status = response.status();
        let body: RpcResponse = response.json().await.map_err(|e| {
            DapiError::unavailable(format!("core rpc returned http {}: {}", status, e))
        })?;

        if let Some(fault) = body.error {
            return Ok(Err(fault));
        }
        serde_json::from_value(body.result)
            .map(Ok)
            .map_err(|e| DapiError::internal(format!("unexpected {} result: {}", method, e)))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> DapiResult<T> {
        self.request(method, params)
            .await?
            .map_err(RpcFault::into_error)
    }

    /// Like [`Self::call`], with "not found" faults turned into `None`.
    async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> DapiResult<Option<T>> {
        match self.request(method, params).await? {
            Ok(value) => Ok(Some(value)),
            Err(fault)
                if fault.code == RPC_INVALID_ADDRESS_OR_KEY
                    || fault.code == RPC_INVALID_PARAMETER =>
            {
                Ok(None)
            }
            Err(fault) => Err(fault.into_error()),
        }
    }

    async fn masternode_status(&self) -> Option<MasternodeStatus> {
        // Fails on nodes that are not masternodes
        let status: MasternodeStatusInfo = self
            .request("masternode", json!(["status"]))
            .await
            .ok()?
            .ok()?;
        let sync: Option<MnSyncStatus> = self.call("mnsync", json!(["status"])).await.ok();
        let is_synced = sync.is_some_and(|s| s.is_synced);
        Some(MasternodeStatus {
            state: MasternodeState::from_core(&status.state),
            pro_tx_hash: Hash256::from_hex(&status.pro_tx_hash).ok(),
            pose_penalty: status.dmn_state.map(|d| d.pose_penalty).unwrap_or_default(),
            is_synced,
            sync_progress: if is_synced { 1.0 } else { 0.0 },
        })
    }

    /// Spawn the task that turns new tips and chain locks into events.
    pub fn spawn_watcher(self: &Arc<Self>, poll_interval: Duration) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.watch(poll_interval).await })
    }

    /// Spawn the ZMQ subscriber on `url` (e.g. `tcp://127.0.0.1:29998`).
    pub fn spawn_zmq_listener(&self, url: &str) -> JoinHandle<()> {
        let listener = ZmqListener::new(
            url,
            self.events.clone(),
            Arc::clone(&self.tip_changed),
            self.logger.new(slog::o!("source" => "zmq")),
        );
        tokio::spawn(listener.run())
    }

    async fn watch(&self, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_height: Option<u32> = None;
        let mut last_lock: Option<Hash256> = None;

        loop {
            let woken = tokio::select! {
                _ = interval.tick() => false,
                _ = self.tip_changed.notified() => true,
            };
            if woken {
                interval.reset();
            }
            if let Err(e) = self.poll(&mut last_height, &mut last_lock).await {
                slog::warn!(self.logger, "Core watcher poll failed"; "error" => %e);
            }
        }
    }

    async fn poll(
        &self,
        last_height: &mut Option<u32>,
        last_lock: &mut Option<Hash256>,
    ) -> DapiResult<()> {
        let tip = self.best_block_height().await?;
        match *last_height {
            // First poll only records the tip
            None => *last_height = Some(tip),
            Some(seen) if tip > seen => {
                for height in seen + 1..=tip {
                    let Some(hash) = self.block_hash(height).await? else {
                        break;
                    };
                    let Some(block) = self.block(&hash).await? else {
                        break;
                    };
                    slog::debug!(self.logger, "New block"; "height" => height, "hash" => %hash);
                    let _ = self.events.send(CoreEvent::Block(Arc::new(block)));
                    *last_height = Some(height);
                }
            }
            Some(_) => {}
        }

        if let Some(lock) = self.best_chain_lock().await?
            && *last_lock != Some(lock.block_hash)
        {
            *last_lock = Some(lock.block_hash);
            slog::debug!(self.logger, "New chain lock"; "height" => lock.height);
            let _ = self.events.send(CoreEvent::ChainLock(lock));
        }
        Ok(())
    }
}

#[async_trait]
impl CoreBackend for CoreRpcClient {
    async fn chain_status(&self) -> DapiResult<ChainStatus> {
        let (chain, network, masternode) = tokio::join!(
            self.call::<BlockchainInfo>("getblockchaininfo", json!([])),
            self.call::<NetworkInfo>("getnetworkinfo", json!([])),
            self.masternode_status(),
        );
        Ok(chain_status_from(chain?, network?, masternode)?)
    }

    async fn best_block_height(&self) -> DapiResult<u32> {
        self.call("getblockcount", json!([])).await
    }

    async fn block_hash(&self, height: u32) -> DapiResult<Option<Hash256>> {
        let hash: Option<String> = self.call_optional("getblockhash", json!([height])).await?;
        Ok(hash.map(|h| Hash256::from_hex(&h)).transpose()?)
    }

    async fn block_height(&self, hash: &Hash256) -> DapiResult<Option<u32>> {
        let header: Option<BlockHeaderInfo> = self
            .call_optional("getblockheader", json!([hash.to_hex(), true]))
            .await?;
        Ok(header.map(|h| h.height))
    }

    async fn block(&self, hash: &Hash256) -> DapiResult<Option<Block>> {
        let Some(height) = self.block_height(hash).await? else {
            return Ok(None);
        };
        let raw: Option<String> = self
            .call_optional("getblock", json!([hash.to_hex(), 0]))
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let bytes = hex::decode(raw).map_err(DecodeError::from)?;
        Ok(Some(Block::from_raw(height, *hash, &bytes)?))
    }

    async fn block_headers(&self, from_height: u32, count: u32) -> DapiResult<Vec<Vec<u8>>> {
        let mut headers = Vec::new();
        let mut next = from_height;
        let mut remaining = count;
        while remaining > 0 {
            let Some(hash) = self.block_hash(next).await? else {
                break;
            };
            let batch = remaining.min(MAX_HEADERS_PER_CALL);
            let chunk: Vec<String> = self
                .call("getblockheaders", json!([hash.to_hex(), batch, false]))
                .await?;
            if chunk.is_empty() {
                break;
            }
            let received = chunk.len() as u32;
            for header in chunk {
                headers.push(hex::decode(header).map_err(DecodeError::from)?);
            }
            if received < batch {
                break;
            }
            next += received;
            remaining -= received;
        }
        Ok(headers)
    }

    async fn best_chain_lock(&self) -> DapiResult<Option<ChainLock>> {
        // The node reports a fault until it has seen its first chain lock
        match self
            .request::<BestChainLock>("getbestchainlock", json!([]))
            .await?
        {
            Ok(best) => Ok(Some(chain_lock_from(best)?)),
            Err(_) => Ok(None),
        }
    }

    async fn send_raw_transaction(&self, raw: &[u8], options: SendOptions) -> DapiResult<Hash256> {
        let max_fee_rate = if options.allow_high_fees {
            0.0
        } else {
            DEFAULT_MAX_FEE_RATE
        };
        let txid: String = self
            .call(
                "sendrawtransaction",
                json!([hex::encode(raw), max_fee_rate, false, options.bypass_limits]),
            )
            .await?;
        Ok(Hash256::from_hex(&txid)?)
    }

    async fn transaction(&self, txid: &Hash256) -> DapiResult<Option<TransactionInfo>> {
        let info: Option<RawTransactionInfo> = self
            .call_optional("getrawtransaction", json!([txid.to_hex(), true]))
            .await?;
        let Some(info) = info else {
            return Ok(None);
        };
        Ok(Some(TransactionInfo {
            raw: hex::decode(&info.hex).map_err(DecodeError::from)?,
            block_hash: info
                .blockhash
                .as_deref()
                .map(Hash256::from_hex)
                .transpose()?,
            height: info.height,
            confirmations: info.confirmations,
            is_instant_locked: info.instantlock,
            is_chain_locked: info.chainlock,
        }))
    }

    async fn estimate_fee(&self, blocks: u32) -> DapiResult<Option<f64>> {
        let fee: SmartFee = self.call("estimatesmartfee", json!([blocks])).await?;
        Ok(fee.feerate)
    }

    fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }
}

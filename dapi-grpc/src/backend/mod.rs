//! The two external collaborators every facade method is answered from.
//!
//! [`CoreBackend`] stands for the Dash Core node, [`PlatformBackend`] for the
//! Platform storage and validation layer. The services only translate
//! between the wire schemas and these traits.

pub mod core_rpc;
pub mod drive;
pub mod memory;
pub mod zmq;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::chain::{Block, ChainLock, DecodeError, Hash256};
use crate::error::DapiResult;

pub use core_rpc::CoreRpcClient;
pub use drive::DriveClient;
pub use memory::{MemoryCore, MemoryPlatform};
pub use zmq::ZmqListener;

/// Capacity of the push-event channel of a Core backend.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Masternode state as reported by `masternode status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasternodeState {
    #[default]
    Unknown,
    WaitingForProtx,
    PoseBanned,
    Removed,
    OperatorKeyChanged,
    ProtxIpChanged,
    Ready,
    Error,
}

impl MasternodeState {
    /// Parse the node's `state` string.
    pub fn from_core(state: &str) -> Self {
        match state {
            "WAITING_FOR_PROTX" => MasternodeState::WaitingForProtx,
            "POSE_BANNED" => MasternodeState::PoseBanned,
            "REMOVED" => MasternodeState::Removed,
            "OPERATOR_KEY_CHANGED" => MasternodeState::OperatorKeyChanged,
            "PROTX_IP_CHANGED" => MasternodeState::ProtxIpChanged,
            "READY" => MasternodeState::Ready,
            "ERROR" => MasternodeState::Error,
            _ => MasternodeState::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasternodeStatus {
    pub state: MasternodeState,
    pub pro_tx_hash: Option<Hash256>,
    pub pose_penalty: u32,
    pub is_synced: bool,
    pub sync_progress: f64,
}

/// Snapshot of the node's chain, network and version state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainStatus {
    /// Chain name as the node reports it ("main", "test", "regtest", ...)
    pub chain: String,
    pub core_version: u32,
    pub protocol_version: u32,
    pub agent: String,
    pub headers_count: u32,
    pub blocks_count: u32,
    pub best_block_hash: Hash256,
    pub difficulty: f64,
    pub chain_work: Vec<u8>,
    /// Verification progress in `[0, 1]`
    pub sync_progress: f64,
    pub median_time: u32,
    pub time_offset: i32,
    pub peers_count: u32,
    /// Relay fee in coins per kB
    pub relay_fee: f64,
    pub incremental_fee: f64,
    pub proxy: String,
    /// Node warnings; non-empty means the node is in an error state
    pub warnings: String,
    pub masternode: Option<MasternodeStatus>,
}

/// A transaction as known to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub raw: Vec<u8>,
    pub block_hash: Option<Hash256>,
    pub height: Option<u32>,
    pub confirmations: u32,
    pub is_instant_locked: bool,
    pub is_chain_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOptions {
    pub allow_high_fees: bool,
    pub bypass_limits: bool,
}

/// Push events published by a Core backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A block was connected at the tip
    Block(Arc<Block>),
    /// A chain lock was received
    ChainLock(ChainLock),
    /// A transaction entered the mempool
    Transaction(Arc<Vec<u8>>),
    /// An instant-send lock was received for `txid`
    InstantLock { txid: Hash256, message: Vec<u8> },
}

/// Access to a Dash Core node.
///
/// Lookups return `Ok(None)` when the entity does not exist, errors are
/// reserved for failures to answer.
#[async_trait]
pub trait CoreBackend: Send + Sync + 'static {
    async fn chain_status(&self) -> DapiResult<ChainStatus>;

    async fn best_block_height(&self) -> DapiResult<u32>;

    async fn block_hash(&self, height: u32) -> DapiResult<Option<Hash256>>;

    async fn block_height(&self, hash: &Hash256) -> DapiResult<Option<u32>>;

    async fn block(&self, hash: &Hash256) -> DapiResult<Option<Block>>;

    /// Up to `count` consecutive serialized headers starting at `from_height`.
    async fn block_headers(&self, from_height: u32, count: u32) -> DapiResult<Vec<Vec<u8>>>;

    async fn best_chain_lock(&self) -> DapiResult<Option<ChainLock>>;

    /// Submit a raw transaction, returning its txid.
    async fn send_raw_transaction(&self, raw: &[u8], options: SendOptions) -> DapiResult<Hash256>;

    async fn transaction(&self, txid: &Hash256) -> DapiResult<Option<TransactionInfo>>;

    /// Fee estimate in coins per kB for confirmation within `blocks`.
    async fn estimate_fee(&self, blocks: u32) -> DapiResult<Option<f64>>;

    /// Subscribe to push events. Events published before the call are not seen.
    fn subscribe(&self) -> broadcast::Receiver<CoreEvent>;
}

/// 32-byte Platform identifier, displayed in base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identifier(pub [u8; 32]);

impl Identifier {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| DecodeError::InvalidLength {
            expected: 32,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn from_base58(encoded: &str) -> Option<Self> {
        let bytes = bs58::decode(encoded).into_vec().ok()?;
        Self::from_slice(&bytes).ok()
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_base58())
    }
}

/// Hash160 of an identity's first public key.
pub type PublicKeyHash = [u8; 20];

/// Hash identifying a state transition in `waitForStateTransitionResult`.
pub fn state_transition_hash(state_transition: &[u8]) -> [u8; 32] {
    Sha256::digest(state_transition).into()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProofData {
    pub grovedb_proof: Vec<u8>,
    pub quorum_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseMeta {
    pub height: u64,
    pub core_chain_locked_height: u32,
    pub time_ms: u64,
    pub protocol_version: u32,
}

/// Result of a Platform read. `value` is `None` when the entity is absent;
/// with a proof requested, `proof` covers presence or absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub value: Option<T>,
    pub proof: Option<ProofData>,
    pub metadata: ResponseMeta,
}

impl<T> Fetched<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: self.value.map(f),
            proof: self.proof,
            metadata: self.metadata,
        }
    }
}

/// An identity together with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: Identifier,
    pub identity: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStart {
    After(Identifier),
    At(Identifier),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentQuery {
    pub data_contract_id: Identifier,
    pub document_type: String,
    /// Opaque encoded where clauses
    pub where_clause: Vec<u8>,
    /// Opaque encoded order-by clauses
    pub order_by: Vec<u8>,
    pub limit: u32,
    pub start: Option<DocumentStart>,
    pub prove: bool,
}

/// Error reported for a state transition that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastError {
    pub code: u32,
    pub message: String,
    pub data: Vec<u8>,
}

/// Settled outcome of a broadcast state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransitionOutcome {
    pub error: Option<BroadcastError>,
    pub proof: Option<ProofData>,
    pub metadata: ResponseMeta,
}

/// Access to the Platform storage and validation layer.
#[async_trait]
pub trait PlatformBackend: Send + Sync + 'static {
    async fn broadcast_state_transition(&self, state_transition: &[u8]) -> DapiResult<()>;

    /// Resolves once the transition with `hash` has been executed or rejected.
    async fn wait_for_state_transition_result(
        &self,
        hash: [u8; 32],
        prove: bool,
    ) -> DapiResult<StateTransitionOutcome>;

    async fn identity(&self, id: &Identifier, prove: bool) -> DapiResult<Fetched<Vec<u8>>>;

    async fn data_contract(&self, id: &Identifier, prove: bool) -> DapiResult<Fetched<Vec<u8>>>;

    /// `Ok(None)` value means the data contract itself does not exist.
    async fn documents(&self, query: &DocumentQuery) -> DapiResult<Fetched<Vec<Vec<u8>>>>;

    async fn identity_by_public_key_hash(
        &self,
        hash: &PublicKeyHash,
        prove: bool,
    ) -> DapiResult<Fetched<IdentityRecord>>;

    /// One entry per requested hash, in request order.
    async fn identities_by_public_key_hashes(
        &self,
        hashes: &[PublicKeyHash],
        prove: bool,
    ) -> DapiResult<Fetched<Vec<Option<IdentityRecord>>>>;
}

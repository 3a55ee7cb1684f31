//! Core chain operations

use dapi_grpc::proto::v0::core_client::CoreClient as GrpcCoreClient;
use dapi_grpc::proto::v0::{
    BroadcastTransactionRequest, GetBestBlockHeightRequest, GetBlockRequest,
    GetEstimatedTransactionFeeRequest, GetStatusRequest, GetStatusResponse, GetTransactionRequest,
    get_block_request, get_status_response,
};
use tonic::transport::Channel;

use crate::error::{Error, Result, optional};
use crate::types::Hash;

/// Overall node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NotStarted,
    Syncing,
    Ready,
    Error,
}

impl From<get_status_response::Status> for NodeState {
    fn from(status: get_status_response::Status) -> Self {
        match status {
            get_status_response::Status::NotStarted => NodeState::NotStarted,
            get_status_response::Status::Syncing => NodeState::Syncing,
            get_status_response::Status::Ready => NodeState::Ready,
            get_status_response::Status::Error => NodeState::Error,
        }
    }
}

/// Node status summary.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub state: NodeState,
    pub chain: String,
    pub blocks: u32,
    pub headers: u32,
    pub best_block_hash: Hash,
    pub sync_progress: f64,
    pub is_synced: bool,
    pub core_version: u32,
    pub protocol_version: u32,
    pub agent: String,
    pub peers: u32,
    /// Relay fee in coins per kB
    pub relay_fee: f64,
    /// Masternode state, when the node is a masternode
    pub masternode: Option<String>,
}

impl NodeStatus {
    fn from_response(resp: GetStatusResponse) -> Result<Self> {
        let state = get_status_response::Status::try_from(resp.status)
            .map(NodeState::from)
            .unwrap_or(NodeState::NotStarted);
        let chain = resp
            .chain
            .ok_or_else(|| Error::UnexpectedResponse("status without chain".into()))?;
        let version = resp.version.unwrap_or_default();
        let network = resp.network.unwrap_or_default();
        let best_block_hash = if chain.best_block_hash.is_empty() {
            Hash::default()
        } else {
            Hash::from_display_bytes(&chain.best_block_hash)?
        };
        let masternode = resp.masternode.map(|mn| {
            get_status_response::masternode::Status::try_from(mn.status)
                .map(|s| s.as_str_name().to_string())
                .unwrap_or_else(|_| "UNKNOWN".to_string())
        });

        Ok(Self {
            state,
            chain: chain.name,
            blocks: chain.blocks_count,
            headers: chain.headers_count,
            best_block_hash,
            sync_progress: resp.sync_progress,
            is_synced: chain.is_synced,
            core_version: version.software,
            protocol_version: version.protocol,
            agent: version.agent,
            peers: network.peers_count,
            relay_fee: network.fee.map(|f| f.relay).unwrap_or_default(),
            masternode,
        })
    }
}

/// A transaction as the node knows it.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub transaction: Vec<u8>,
    /// `None` while in the mempool
    pub block_hash: Option<Hash>,
    pub height: u32,
    pub confirmations: u32,
    pub is_instant_locked: bool,
    pub is_chain_locked: bool,
}

/// Options for [`CoreClient::broadcast_transaction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastOptions {
    pub allow_high_fees: bool,
    pub bypass_limits: bool,
}

/// Client for Core operations.
#[derive(Clone)]
pub struct CoreClient {
    client: GrpcCoreClient<Channel>,
}

impl CoreClient {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            client: GrpcCoreClient::new(channel),
        }
    }

    /// Get the node status.
    pub async fn status(&mut self) -> Result<NodeStatus> {
        let response = self.client.get_status(GetStatusRequest {}).await?;
        NodeStatus::from_response(response.into_inner())
    }

    /// Get a serialized block by hash.
    pub async fn block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let request = GetBlockRequest {
            block: Some(get_block_request::Block::Hash(hash.to_hex())),
        };
        Ok(optional(self.client.get_block(request).await)?.map(|r| r.into_inner().block))
    }

    /// Get a serialized block by height.
    ///
    /// Heights above the tip are reported by the node as invalid arguments.
    pub async fn block_by_height(&mut self, height: u32) -> Result<Vec<u8>> {
        let request = GetBlockRequest {
            block: Some(get_block_request::Block::Height(height)),
        };
        let response = self.client.get_block(request).await?;
        Ok(response.into_inner().block)
    }

    /// Height of the chain tip.
    pub async fn best_block_height(&mut self) -> Result<u32> {
        let response = self
            .client
            .get_best_block_height(GetBestBlockHeightRequest {})
            .await?;
        Ok(response.into_inner().height)
    }

    /// Submit a raw transaction.
    ///
    /// Returns the transaction id. Rejections and duplicates surface as
    /// [`Error::Rejected`].
    pub async fn broadcast_transaction(
        &mut self,
        transaction: Vec<u8>,
        options: BroadcastOptions,
    ) -> Result<Hash> {
        let request = BroadcastTransactionRequest {
            transaction,
            allow_high_fees: options.allow_high_fees,
            bypass_limits: options.bypass_limits,
        };
        let response = self
            .client
            .broadcast_transaction(request)
            .await
            .map_err(Error::from_broadcast)?;
        Hash::from_hex(&response.into_inner().transaction_id)
    }

    /// Get a transaction by id.
    ///
    /// Returns `None` if the node does not know it.
    pub async fn transaction(&mut self, txid: &Hash) -> Result<Option<TransactionInfo>> {
        let request = GetTransactionRequest { id: txid.to_hex() };
        let Some(response) = optional(self.client.get_transaction(request).await)? else {
            return Ok(None);
        };
        let resp = response.into_inner();
        let block_hash = if resp.block_hash.is_empty() {
            None
        } else {
            Some(Hash::from_display_bytes(&resp.block_hash)?)
        };
        Ok(Some(TransactionInfo {
            transaction: resp.transaction,
            block_hash,
            height: resp.height,
            confirmations: resp.confirmations,
            is_instant_locked: resp.is_instant_locked,
            is_chain_locked: resp.is_chain_locked,
        }))
    }

    /// Fee estimate in coins per kB for confirmation within `blocks`.
    ///
    /// Zero means the node has no estimate.
    pub async fn estimated_fee(&mut self, blocks: u32) -> Result<f64> {
        let response = self
            .client
            .get_estimated_transaction_fee(GetEstimatedTransactionFeeRequest { blocks })
            .await?;
        Ok(response.into_inner().fee)
    }
}

//! Core service implementation (v0).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use slog::Logger;
use tonic::{Request, Response, Status};

use super::streaming::{HeadersStream, StreamingService, TransactionsStream};
use super::utils::{bounded, display_bytes, parse_hash};
use crate::backend::{ChainStatus, CoreBackend, MasternodeState, MasternodeStatus, SendOptions};
use crate::chain::transaction::Transaction;
use crate::error::DapiError;
use crate::proto::v0::{
    BlockHeadersWithChainLocksRequest, BroadcastTransactionRequest, BroadcastTransactionResponse,
    GetBestBlockHeightRequest, GetBestBlockHeightResponse, GetBlockRequest, GetBlockResponse,
    GetEstimatedTransactionFeeRequest, GetEstimatedTransactionFeeResponse, GetStatusRequest,
    GetStatusResponse, GetTransactionRequest, GetTransactionResponse,
    TransactionsWithProofsRequest, core_server::Core, get_block_request, get_status_response,
};

/// Progress at which the node counts as synced.
const SYNCED_PROGRESS: f64 = 0.9999;

const MIN_FEE_BLOCKS: u32 = 1;
const MAX_FEE_BLOCKS: u32 = 1000;

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

/// Overall node status: warnings win, then sync progress.
pub fn sync_status(progress: f64, warnings: &str) -> get_status_response::Status {
    if !warnings.is_empty() {
        get_status_response::Status::Error
    } else if progress >= SYNCED_PROGRESS {
        get_status_response::Status::Ready
    } else {
        get_status_response::Status::Syncing
    }
}

fn masternode_status(state: MasternodeState) -> get_status_response::masternode::Status {
    use get_status_response::masternode::Status;
    match state {
        MasternodeState::Unknown => Status::Unknown,
        MasternodeState::WaitingForProtx => Status::WaitingForProtx,
        MasternodeState::PoseBanned => Status::PoseBanned,
        MasternodeState::Removed => Status::Removed,
        MasternodeState::OperatorKeyChanged => Status::OperatorKeyChanged,
        MasternodeState::ProtxIpChanged => Status::ProtxIpChanged,
        MasternodeState::Ready => Status::Ready,
        MasternodeState::Error => Status::Error,
    }
}

fn masternode_response(mn: MasternodeStatus) -> get_status_response::Masternode {
    get_status_response::Masternode {
        status: masternode_status(mn.state) as i32,
        pro_tx_hash: mn.pro_tx_hash.map(|h| display_bytes(&h)).unwrap_or_default(),
        pose_penalty: mn.pose_penalty,
        is_synced: mn.is_synced,
        sync_progress: mn.sync_progress,
    }
}

fn status_response(status: ChainStatus) -> GetStatusResponse {
    let overall = sync_status(status.sync_progress, &status.warnings);
    let is_synced = overall == get_status_response::Status::Ready;
    GetStatusResponse {
        version: Some(get_status_response::Version {
            protocol: status.protocol_version,
            software: status.core_version,
            agent: status.agent,
        }),
        time: Some(get_status_response::Time {
            now: unix_now(),
            offset: status.time_offset,
            median: status.median_time,
        }),
        status: overall as i32,
        sync_progress: status.sync_progress,
        chain: Some(get_status_response::Chain {
            name: status.chain,
            headers_count: status.headers_count,
            blocks_count: status.blocks_count,
            best_block_hash: display_bytes(&status.best_block_hash),
            difficulty: status.difficulty,
            chain_work: status.chain_work,
            is_synced,
            sync_progress: status.sync_progress,
        }),
        masternode: status.masternode.map(masternode_response),
        network: Some(get_status_response::Network {
            peers_count: status.peers_count,
            fee: Some(get_status_response::NetworkFee {
                relay: status.relay_fee,
                incremental: status.incremental_fee,
            }),
        }),
    }
}

/// Implementation of the v0 Core gRPC service.
#[derive(Clone)]
pub struct CoreService {
    core: Arc<dyn CoreBackend>,
    streaming: StreamingService,
    request_timeout: Duration,
    logger: Logger,
}

impl CoreService {
    pub fn new(
        core: Arc<dyn CoreBackend>,
        streaming: StreamingService,
        request_timeout: Duration,
        logger: Logger,
    ) -> Self {
        Self {
            core,
            streaming,
            request_timeout,
            logger,
        }
    }
}

#[tonic::async_trait]
impl Core for CoreService {
    type subscribeToBlockHeadersWithChainLocksStream = HeadersStream;
    type subscribeToTransactionsWithProofsStream = TransactionsStream;

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        bounded(self.request_timeout, async {
            let status = self.core.chain_status().await?;
            Ok::<_, Status>(Response::new(status_response(status)))
        })
        .await
    }

    async fn get_block(
        &self,
        request: Request<GetBlockRequest>,
    ) -> Result<Response<GetBlockResponse>, Status> {
        let block = request.into_inner().block;
        bounded(self.request_timeout, async {
            let hash = match block {
                Some(get_block_request::Block::Height(height)) => self
                    .core
                    .block_hash(height)
                    .await?
                    .ok_or_else(|| Status::invalid_argument("Invalid block height"))?,
                Some(get_block_request::Block::Hash(hash)) => parse_hash(hash.trim())?,
                None => return Err(Status::invalid_argument("hash or height is not specified")),
            };

            let block = self
                .core
                .block(&hash)
                .await?
                .ok_or_else(|| Status::not_found("Block not found"))?;

            Ok(Response::new(GetBlockResponse {
                block: block.to_bytes(),
            }))
        })
        .await
    }

    async fn get_best_block_height(
        &self,
        _request: Request<GetBestBlockHeightRequest>,
    ) -> Result<Response<GetBestBlockHeightResponse>, Status> {
        bounded(self.request_timeout, async {
            let height = self.core.best_block_height().await?;
            Ok::<_, Status>(Response::new(GetBestBlockHeightResponse { height }))
        })
        .await
    }

    async fn broadcast_transaction(
        &self,
        request: Request<BroadcastTransactionRequest>,
    ) -> Result<Response<BroadcastTransactionResponse>, Status> {
        let req = request.into_inner();
        if req.transaction.is_empty() {
            return Err(Status::invalid_argument("transaction is not specified"));
        }

        Transaction::decode(&req.transaction)
            .map_err(|e| Status::invalid_argument(format!("invalid transaction: {}", e)))?;

        let options = SendOptions {
            allow_high_fees: req.allow_high_fees,
            bypass_limits: req.bypass_limits,
        };
        let sent = bounded(self.request_timeout, async {
            Ok::<_, Status>(self.core.send_raw_transaction(&req.transaction, options).await)
        })
        .await?;
        let txid = match sent {
            Ok(txid) => txid,
            Err(DapiError::InvalidArgument(msg)) => {
                return Err(Status::invalid_argument(format!("invalid transaction: {}", msg)));
            }
            Err(DapiError::FailedPrecondition(msg)) => {
                slog::debug!(self.logger, "Transaction rejected"; "reason" => &msg);
                return Err(Status::failed_precondition(format!(
                    "Transaction is rejected: {}",
                    msg
                )));
            }
            Err(DapiError::AlreadyExists(_)) => {
                return Err(Status::already_exists("Transaction already in chain"));
            }
            Err(e) => return Err(e.into()),
        };

        slog::debug!(self.logger, "Transaction broadcast"; "txid" => %txid);
        Ok(Response::new(BroadcastTransactionResponse {
            transaction_id: txid.to_hex(),
        }))
    }

    async fn get_transaction(
        &self,
        request: Request<GetTransactionRequest>,
    ) -> Result<Response<GetTransactionResponse>, Status> {
        let id = request.into_inner().id;
        if id.is_empty() {
            return Err(Status::invalid_argument("id is not specified"));
        }
        let txid = parse_hash(&id)?;

        bounded(self.request_timeout, async {
            let info = self
                .core
                .transaction(&txid)
                .await?
                .ok_or_else(|| Status::not_found("Transaction not found"))?;

            Ok::<_, Status>(Response::new(GetTransactionResponse {
                transaction: info.raw,
                block_hash: info.block_hash.map(|h| display_bytes(&h)).unwrap_or_default(),
                height: info.height.unwrap_or_default(),
                confirmations: info.confirmations,
                is_instant_locked: info.is_instant_locked,
                is_chain_locked: info.is_chain_locked,
            }))
        })
        .await
    }

    async fn get_estimated_transaction_fee(
        &self,
        request: Request<GetEstimatedTransactionFeeRequest>,
    ) -> Result<Response<GetEstimatedTransactionFeeResponse>, Status> {
        let blocks = request
            .into_inner()
            .blocks
            .clamp(MIN_FEE_BLOCKS, MAX_FEE_BLOCKS);
        bounded(self.request_timeout, async {
            let fee = self.core.estimate_fee(blocks).await?.unwrap_or(0.0);
            Ok::<_, Status>(Response::new(GetEstimatedTransactionFeeResponse { fee }))
        })
        .await
    }

    async fn subscribe_to_block_headers_with_chain_locks(
        &self,
        request: Request<BlockHeadersWithChainLocksRequest>,
    ) -> Result<Response<Self::subscribeToBlockHeadersWithChainLocksStream>, Status> {
        let stream = self
            .streaming
            .subscribe_block_headers(request.into_inner())
            .await?;
        Ok(Response::new(stream))
    }

    async fn subscribe_to_transactions_with_proofs(
        &self,
        request: Request<TransactionsWithProofsRequest>,
    ) -> Result<Response<Self::subscribeToTransactionsWithProofsStream>, Status> {
        let stream = self
            .streaming
            .subscribe_transactions(request.into_inner())
            .await?;
        Ok(Response::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Hash256;

    #[test]
    fn warnings_override_progress() {
        use get_status_response::Status;
        assert_eq!(sync_status(1.0, "disk space is low"), Status::Error);
        assert_eq!(sync_status(0.99995, ""), Status::Ready);
        assert_eq!(sync_status(0.9999, ""), Status::Ready);
        assert_eq!(sync_status(0.5, ""), Status::Syncing);
    }

    #[test]
    fn status_response_marks_synced_chain() {
        let status = ChainStatus {
            chain: "test".into(),
            blocks_count: 12,
            headers_count: 12,
            best_block_hash: Hash256([1u8; 32]),
            sync_progress: 1.0,
            peers_count: 3,
            relay_fee: 0.00001,
            masternode: Some(MasternodeStatus {
                state: MasternodeState::Ready,
                ..MasternodeStatus::default()
            }),
            ..ChainStatus::default()
        };
        let response = status_response(status);
        let chain = response.chain.unwrap();
        assert!(chain.is_synced);
        assert_eq!(chain.blocks_count, 12);
        assert_eq!(chain.name, "test");
        assert_eq!(
            response.status,
            get_status_response::Status::Ready as i32
        );
        assert_eq!(
            response.masternode.unwrap().status,
            get_status_response::masternode::Status::Ready as i32
        );
        assert_eq!(response.network.unwrap().peers_count, 3);
    }
}

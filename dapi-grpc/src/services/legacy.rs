//! Unversioned Core and Platform services kept for older clients.
//!
//! Both answer from the same backends as v0 and only reshape requests and
//! responses: identifiers are base58 strings, documents page by numeric
//! offset and nothing carries proofs or metadata.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};

use super::platform_service::MAX_DOCUMENTS_LIMIT;
use super::utils::{bounded, parse_base58_identifier};
use crate::backend::{CoreBackend, DocumentQuery, PlatformBackend};
use crate::config::Network;
use crate::proto::legacy::{
    BroadcastStateTransitionRequest, BroadcastStateTransitionResponse, GetDataContractRequest,
    GetDataContractResponse, GetDocumentsRequest, GetDocumentsResponse, GetIdentityRequest,
    GetIdentityResponse, GetStatusRequest, GetStatusResponse, core_server::Core,
    get_documents_request, platform_server::Platform,
};

/// Legacy `Core`, limited to `getStatus`.
#[derive(Clone)]
pub struct LegacyCoreService {
    core: Arc<dyn CoreBackend>,
    network: Network,
    request_timeout: Duration,
}

impl LegacyCoreService {
    pub fn new(core: Arc<dyn CoreBackend>, network: Network, request_timeout: Duration) -> Self {
        Self {
            core,
            network,
            request_timeout,
        }
    }
}

#[tonic::async_trait]
impl Core for LegacyCoreService {
    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        let status = bounded(self.request_timeout, self.core.chain_status()).await?;
        Ok(Response::new(GetStatusResponse {
            core_version: status.core_version,
            protocol_version: status.protocol_version,
            blocks: status.blocks_count,
            // Unsigned on this schema; a negative offset reads as zero
            time_offset: u32::try_from(status.time_offset).unwrap_or_default(),
            connections: status.peers_count,
            proxy: status.proxy,
            difficulty: status.difficulty,
            testnet: self.network.is_testnet(),
            relay_fee: status.relay_fee,
            errors: status.warnings,
            network: self.network.to_string(),
        }))
    }
}

/// Offset-paged documents request, translated to a first-page query.
///
/// Returns the query and the number of leading documents to drop.
pub fn legacy_document_query(req: GetDocumentsRequest) -> Result<(DocumentQuery, usize), Status> {
    let data_contract_id = parse_base58_identifier(&req.data_contract_id, "data_contract_id")?;
    if req.document_type.is_empty() {
        return Err(Status::invalid_argument("document_type is not specified"));
    }
    let limit = match req.limit {
        0 => MAX_DOCUMENTS_LIMIT,
        limit if limit > MAX_DOCUMENTS_LIMIT => {
            return Err(Status::invalid_argument(format!(
                "limit should be between 1 and {}",
                MAX_DOCUMENTS_LIMIT
            )));
        }
        limit => limit,
    };
    let offset = match req.start {
        Some(get_documents_request::Start::StartAt(0)) => {
            return Err(Status::invalid_argument("start_at should be at least 1"));
        }
        Some(get_documents_request::Start::StartAt(position)) => position - 1,
        Some(get_documents_request::Start::StartAfter(count)) => count,
        None => 0,
    };

    // Offsets reach no further than one maximal page
    let fetch = offset.saturating_add(limit).min(MAX_DOCUMENTS_LIMIT);
    let query = DocumentQuery {
        data_contract_id,
        document_type: req.document_type,
        where_clause: req.r#where,
        order_by: req.order_by,
        limit: fetch,
        start: None,
        prove: false,
    };
    Ok((query, offset as usize))
}

/// Legacy `Platform` surface.
#[derive(Clone)]
pub struct LegacyPlatformService {
    platform: Arc<dyn PlatformBackend>,
    request_timeout: Duration,
}

impl LegacyPlatformService {
    pub fn new(platform: Arc<dyn PlatformBackend>, request_timeout: Duration) -> Self {
        Self {
            platform,
            request_timeout,
        }
    }
}

#[tonic::async_trait]
impl Platform for LegacyPlatformService {
    async fn broadcast_state_transition(
        &self,
        request: Request<BroadcastStateTransitionRequest>,
    ) -> Result<Response<BroadcastStateTransitionResponse>, Status> {
        let state_transition = request.into_inner().state_transition;
        if state_transition.is_empty() {
            return Err(Status::invalid_argument("State Transition is not specified"));
        }
        bounded(
            self.request_timeout,
            self.platform.broadcast_state_transition(&state_transition),
        )
        .await?;
        Ok(Response::new(BroadcastStateTransitionResponse {}))
    }

    async fn get_identity(
        &self,
        request: Request<GetIdentityRequest>,
    ) -> Result<Response<GetIdentityResponse>, Status> {
        let id = parse_base58_identifier(&request.into_inner().id, "id")?;
        let identity = bounded(self.request_timeout, self.platform.identity(&id, false))
            .await?
            .value
            .ok_or_else(|| Status::not_found("Identity not found"))?;
        Ok(Response::new(GetIdentityResponse { identity }))
    }

    async fn get_data_contract(
        &self,
        request: Request<GetDataContractRequest>,
    ) -> Result<Response<GetDataContractResponse>, Status> {
        let id = parse_base58_identifier(&request.into_inner().id, "id")?;
        let data_contract = bounded(self.request_timeout, self.platform.data_contract(&id, false))
            .await?
            .value
            .ok_or_else(|| Status::not_found("Data contract not found"))?;
        Ok(Response::new(GetDataContractResponse { data_contract }))
    }

    async fn get_documents(
        &self,
        request: Request<GetDocumentsRequest>,
    ) -> Result<Response<GetDocumentsResponse>, Status> {
        let (query, offset) = legacy_document_query(request.into_inner())?;
        let documents = bounded(self.request_timeout, self.platform.documents(&query))
            .await?
            .value
            .ok_or_else(|| Status::not_found("Data contract not found"))?;
        Ok(Response::new(GetDocumentsResponse {
            documents: documents.into_iter().skip(offset).collect(),
        }))
    }
}

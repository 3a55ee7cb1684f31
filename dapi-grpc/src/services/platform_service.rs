//! Platform service implementation (v0).

use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use tonic::{Request, Response, Status};

use super::utils::{bounded, parse_identifier, parse_public_key_hash, parse_public_key_hashes};
use crate::backend::{
    DocumentQuery, DocumentStart, Fetched, IdentityRecord, PlatformBackend,
    StateTransitionOutcome, state_transition_hash,
};
use crate::config::PlatformConfig;
use crate::proto::v0::{
    BroadcastStateTransitionRequest, BroadcastStateTransitionResponse, GetDataContractRequest,
    GetDataContractResponse, GetDocumentsRequest, GetDocumentsResponse,
    GetIdentitiesByPublicKeyHashesRequest, GetIdentitiesByPublicKeyHashesResponse,
    GetIdentityByFirstPublicKeyRequest, GetIdentityByFirstPublicKeyResponse,
    GetIdentityIdByFirstPublicKeyRequest, GetIdentityIdByFirstPublicKeyResponse,
    GetIdentityIdsByPublicKeyHashesRequest, GetIdentityIdsByPublicKeyHashesResponse,
    GetIdentityRequest, GetIdentityResponse, Proof, ResponseMetadata,
    StateTransitionBroadcastError, WaitForStateTransitionResultRequest,
    WaitForStateTransitionResultResponse, get_documents_request, platform_server::Platform,
    wait_for_state_transition_result_response,
};

/// Largest page `getDocuments` returns; also the page size when none is asked for.
pub const MAX_DOCUMENTS_LIMIT: u32 = 100;

/// Proof and metadata as they go on the wire.
type Envelope = (Option<Proof>, Option<ResponseMetadata>);

/// Unwrap a single-entity read. Absent entities are `NotFound` unless a
/// proof was requested, in which case the proof of absence is returned.
fn single<T: Default>(
    fetched: Fetched<T>,
    prove: bool,
    what: &str,
) -> Result<(T, Envelope), Status> {
    if fetched.value.is_none() && !prove {
        return Err(Status::not_found(format!("{} not found", what)));
    }
    Ok((
        fetched.value.unwrap_or_default(),
        (
            fetched.proof.map(Proof::from),
            Some(ResponseMetadata::from(fetched.metadata)),
        ),
    ))
}

/// Flatten a batch read: one entry per request, empty bytes for absent ones.
fn batch(
    fetched: Fetched<Vec<Option<IdentityRecord>>>,
    expected: usize,
    pick: impl Fn(IdentityRecord) -> Vec<u8>,
) -> (Vec<Vec<u8>>, Envelope) {
    let mut entries: Vec<Vec<u8>> = fetched
        .value
        .unwrap_or_default()
        .into_iter()
        .map(|record| record.map(&pick).unwrap_or_default())
        .collect();
    entries.resize(expected, Vec::new());
    (
        entries,
        (
            fetched.proof.map(Proof::from),
            Some(ResponseMetadata::from(fetched.metadata)),
        ),
    )
}

fn outcome_response(outcome: StateTransitionOutcome) -> WaitForStateTransitionResultResponse {
    use wait_for_state_transition_result_response::Result as Outcome;
    let result = match (outcome.error, outcome.proof) {
        (Some(error), _) => Some(Outcome::Error(StateTransitionBroadcastError {
            code: error.code,
            message: error.message,
            data: error.data,
        })),
        (None, Some(proof)) => Some(Outcome::Proof(Proof::from(proof))),
        (None, None) => None,
    };
    WaitForStateTransitionResultResponse {
        result,
        metadata: Some(ResponseMetadata::from(outcome.metadata)),
    }
}

/// Validate and normalize a v0 documents request.
pub fn document_query(req: GetDocumentsRequest) -> Result<DocumentQuery, Status> {
    let data_contract_id = parse_identifier(&req.data_contract_id, "data_contract_id")?;
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
    let start = match req.start {
        Some(get_documents_request::Start::StartAfter(id)) => {
            Some(DocumentStart::After(parse_identifier(&id, "start_after")?))
        }
        Some(get_documents_request::Start::StartAt(id)) => {
            Some(DocumentStart::At(parse_identifier(&id, "start_at")?))
        }
        None => None,
    };
    Ok(DocumentQuery {
        data_contract_id,
        document_type: req.document_type,
        where_clause: req.r#where,
        order_by: req.order_by,
        limit,
        start,
        prove: req.prove,
    })
}

/// Implementation of the v0 Platform gRPC service.
#[derive(Clone)]
pub struct PlatformService {
    platform: Arc<dyn PlatformBackend>,
    config: PlatformConfig,
    request_timeout: Duration,
    logger: Logger,
}

impl PlatformService {
    /// `request_timeout` bounds every unary call except
    /// `waitForStateTransitionResult`, which waits up to
    /// `config.wait_for_result_timeout_secs`.
    pub fn new(
        platform: Arc<dyn PlatformBackend>,
        config: PlatformConfig,
        request_timeout: Duration,
        logger: Logger,
    ) -> Self {
        Self {
            platform,
            config,
            request_timeout,
            logger,
        }
    }
}

#[tonic::async_trait]
impl Platform for PlatformService {
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

        slog::debug!(self.logger, "State transition broadcast";
            "hash" => hex::encode(state_transition_hash(&state_transition)));
        Ok(Response::new(BroadcastStateTransitionResponse {}))
    }

    async fn wait_for_state_transition_result(
        &self,
        request: Request<WaitForStateTransitionResultRequest>,
    ) -> Result<Response<WaitForStateTransitionResultResponse>, Status> {
        let req = request.into_inner();
        if req.state_transition_hash.is_empty() {
            return Err(Status::invalid_argument("state transition hash is not specified"));
        }
        let hash: [u8; 32] = req.state_transition_hash.as_slice().try_into().map_err(|_| {
            Status::invalid_argument(format!(
                "state transition hash must be 32 bytes, got {}",
                req.state_transition_hash.len()
            ))
        })?;

        let timeout = Duration::from_secs(self.config.wait_for_result_timeout_secs);
        let outcome = tokio::time::timeout(
            timeout,
            self.platform.wait_for_state_transition_result(hash, req.prove),
        )
        .await
        .map_err(|_| {
            Status::deadline_exceeded(format!(
                "Waiting period for state transition {} exceeded",
                hex::encode(hash)
            ))
        })??;

        Ok(Response::new(outcome_response(outcome)))
    }

    async fn get_identity(
        &self,
        request: Request<GetIdentityRequest>,
    ) -> Result<Response<GetIdentityResponse>, Status> {
        let req = request.into_inner();
        let id = parse_identifier(&req.id, "id")?;
        let fetched = bounded(self.request_timeout, self.platform.identity(&id, req.prove)).await?;
        let (identity, (proof, metadata)) = single(fetched, req.prove, "Identity")?;
        Ok(Response::new(GetIdentityResponse {
            identity,
            proof,
            metadata,
        }))
    }

    async fn get_data_contract(
        &self,
        request: Request<GetDataContractRequest>,
    ) -> Result<Response<GetDataContractResponse>, Status> {
        let req = request.into_inner();
        let id = parse_identifier(&req.id, "id")?;
        let fetched =
            bounded(self.request_timeout, self.platform.data_contract(&id, req.prove)).await?;
        let (data_contract, (proof, metadata)) = single(fetched, req.prove, "Data contract")?;
        Ok(Response::new(GetDataContractResponse {
            data_contract,
            proof,
            metadata,
        }))
    }

    async fn get_documents(
        &self,
        request: Request<GetDocumentsRequest>,
    ) -> Result<Response<GetDocumentsResponse>, Status> {
        let query = document_query(request.into_inner())?;
        let fetched = bounded(self.request_timeout, self.platform.documents(&query)).await?;
        let (documents, (proof, metadata)) = single(fetched, query.prove, "Data contract")?;
        Ok(Response::new(GetDocumentsResponse {
            documents,
            proof,
            metadata,
        }))
    }

    async fn get_identity_by_first_public_key(
        &self,
        request: Request<GetIdentityByFirstPublicKeyRequest>,
    ) -> Result<Response<GetIdentityByFirstPublicKeyResponse>, Status> {
        let req = request.into_inner();
        let hash = parse_public_key_hash(&req.public_key_hash)?;
        let fetched = bounded(
            self.request_timeout,
            self.platform.identity_by_public_key_hash(&hash, req.prove),
        )
        .await?
        .map(|record| record.identity);
        let (identity, (proof, metadata)) = single(fetched, req.prove, "Identity")?;
        Ok(Response::new(GetIdentityByFirstPublicKeyResponse {
            identity,
            proof,
            metadata,
        }))
    }

    async fn get_identity_id_by_first_public_key(
        &self,
        request: Request<GetIdentityIdByFirstPublicKeyRequest>,
    ) -> Result<Response<GetIdentityIdByFirstPublicKeyResponse>, Status> {
        let req = request.into_inner();
        let hash = parse_public_key_hash(&req.public_key_hash)?;
        let fetched = bounded(
            self.request_timeout,
            self.platform.identity_by_public_key_hash(&hash, req.prove),
        )
        .await?
        .map(|record| record.id.as_bytes().to_vec());
        let (id, (proof, metadata)) = single(fetched, req.prove, "Identity")?;
        Ok(Response::new(GetIdentityIdByFirstPublicKeyResponse {
            id,
            proof,
            metadata,
        }))
    }

    async fn get_identities_by_public_key_hashes(
        &self,
        request: Request<GetIdentitiesByPublicKeyHashesRequest>,
    ) -> Result<Response<GetIdentitiesByPublicKeyHashesResponse>, Status> {
        let req = request.into_inner();
        let hashes = parse_public_key_hashes(&req.public_key_hashes)?;
        let fetched = bounded(
            self.request_timeout,
            self.platform.identities_by_public_key_hashes(&hashes, req.prove),
        )
        .await?;
        let (identities, (proof, metadata)) = batch(fetched, hashes.len(), |r| r.identity);
        Ok(Response::new(GetIdentitiesByPublicKeyHashesResponse {
            identities,
            proof,
            metadata,
        }))
    }

    async fn get_identity_ids_by_public_key_hashes(
        &self,
        request: Request<GetIdentityIdsByPublicKeyHashesRequest>,
    ) -> Result<Response<GetIdentityIdsByPublicKeyHashesResponse>, Status> {
        let req = request.into_inner();
        let hashes = parse_public_key_hashes(&req.public_key_hashes)?;
        let fetched = bounded(
            self.request_timeout,
            self.platform.identities_by_public_key_hashes(&hashes, req.prove),
        )
        .await?;
        let (identity_ids, (proof, metadata)) =
            batch(fetched, hashes.len(), |r| r.id.as_bytes().to_vec());
        Ok(Response::new(GetIdentityIdsByPublicKeyHashesResponse {
            identity_ids,
            proof,
            metadata,
        }))
    }
}

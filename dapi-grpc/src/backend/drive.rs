//! Platform backend forwarding to an upstream Drive gRPC endpoint.

use std::time::Duration;

use async_trait::async_trait;
use slog::Logger;
use tonic::transport::{Channel, Endpoint};

use super::{
    BroadcastError, DocumentQuery, DocumentStart, Fetched, IdentityRecord, Identifier,
    PlatformBackend, ProofData, PublicKeyHash, ResponseMeta, StateTransitionOutcome,
};
use crate::config::DriveConfig;
use crate::error::{DapiError, DapiResult};
use crate::proto::v0::{self, platform_client::PlatformClient};

impl From<v0::Proof> for ProofData {
    fn from(proof: v0::Proof) -> Self {
        ProofData {
            grovedb_proof: proof.grovedb_proof,
            quorum_hash: proof.quorum_hash,
            signature: proof.signature,
            round: proof.round,
        }
    }
}

impl From<v0::ResponseMetadata> for ResponseMeta {
    fn from(meta: v0::ResponseMetadata) -> Self {
        ResponseMeta {
            height: meta.height,
            core_chain_locked_height: meta.core_chain_locked_height,
            time_ms: meta.time_ms,
            protocol_version: meta.protocol_version,
        }
    }
}

fn fetched<T>(
    value: Option<T>,
    proof: Option<v0::Proof>,
    metadata: Option<v0::ResponseMetadata>,
) -> Fetched<T> {
    Fetched {
        value,
        proof: proof.map(ProofData::from),
        metadata: metadata.map(ResponseMeta::from).unwrap_or_default(),
    }
}

/// Empty bytes stand for "absent" on the Drive wire.
fn non_empty(bytes: Vec<u8>) -> Option<Vec<u8>> {
    (!bytes.is_empty()).then_some(bytes)
}

/// Client for the upstream Platform service.
///
/// The channel connects lazily, so a Drive that is down at startup only
/// fails the requests that need it.
#[derive(Clone)]
pub struct DriveClient {
    client: PlatformClient<Channel>,
    logger: Logger,
}

impl DriveClient {
    pub fn new(config: &DriveConfig, logger: Logger) -> DapiResult<Self> {
        let endpoint = Endpoint::from_shared(config.uri.clone())
            .map_err(|e| DapiError::invalid_argument(format!("invalid drive uri: {}", e)))?
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        let channel = endpoint.connect_lazy();
        slog::info!(logger, "Drive client configured"; "uri" => &config.uri);
        Ok(Self {
            client: PlatformClient::new(channel),
            logger,
        })
    }

    fn client(&self) -> PlatformClient<Channel> {
        self.client.clone()
    }
}

#[async_trait]
impl PlatformBackend for DriveClient {
    async fn broadcast_state_transition(&self, state_transition: &[u8]) -> DapiResult<()> {
        self.client()
            .broadcast_state_transition(v0::BroadcastStateTransitionRequest {
                state_transition: state_transition.to_vec(),
            })
            .await?;
        Ok(())
    }

    async fn wait_for_state_transition_result(
        &self,
        hash: [u8; 32],
        prove: bool,
    ) -> DapiResult<StateTransitionOutcome> {
        let response = self
            .client()
            .wait_for_state_transition_result(v0::WaitForStateTransitionResultRequest {
                state_transition_hash: hash.to_vec(),
                prove,
            })
            .await?
            .into_inner();

        use v0::wait_for_state_transition_result_response::Result as WaitResult;
        let (error, proof) = match response.result {
            Some(WaitResult::Error(e)) => (
                Some(BroadcastError {
                    code: e.code,
                    message: e.message,
                    data: e.data,
                }),
                None,
            ),
            Some(WaitResult::Proof(p)) => (None, Some(ProofData::from(p))),
            None => (None, None),
        };
        Ok(StateTransitionOutcome {
            error,
            proof,
            metadata: response.metadata.map(ResponseMeta::from).unwrap_or_default(),
        })
    }

    async fn identity(&self, id: &Identifier, prove: bool) -> DapiResult<Fetched<Vec<u8>>> {
        let response = self
            .client()
            .get_identity(v0::GetIdentityRequest {
                id: id.as_bytes().to_vec(),
                prove,
            })
            .await?
            .into_inner();
        Ok(fetched(
            non_empty(response.identity),
            response.proof,
            response.metadata,
        ))
    }

    async fn data_contract(&self, id: &Identifier, prove: bool) -> DapiResult<Fetched<Vec<u8>>> {
        let response = self
            .client()
            .get_data_contract(v0::GetDataContractRequest {
                id: id.as_bytes().to_vec(),
                prove,
            })
            .await?
            .into_inner();
        Ok(fetched(
            non_empty(response.data_contract),
            response.proof,
            response.metadata,
        ))
    }

    async fn documents(&self, query: &DocumentQuery) -> DapiResult<Fetched<Vec<Vec<u8>>>> {
        use v0::get_documents_request::Start;
        let start = query.start.as_ref().map(|start| match start {
            DocumentStart::After(id) => Start::StartAfter(id.as_bytes().to_vec()),
            DocumentStart::At(id) => Start::StartAt(id.as_bytes().to_vec()),
        });
        let response = self
            .client()
            .get_documents(v0::GetDocumentsRequest {
                data_contract_id: query.data_contract_id.as_bytes().to_vec(),
                document_type: query.document_type.clone(),
                r#where: query.where_clause.clone(),
                order_by: query.order_by.clone(),
                limit: query.limit,
                start,
                prove: query.prove,
            })
            .await?
            .into_inner();
        // Drive reports a missing contract as a status of its own
        Ok(fetched(
            Some(response.documents),
            response.proof,
            response.metadata,
        ))
    }

    async fn identity_by_public_key_hash(
        &self,
        hash: &PublicKeyHash,
        prove: bool,
    ) -> DapiResult<Fetched<IdentityRecord>> {
        let mut identities = self.client();
        let mut ids = self.client();
        let (identity, id) = tokio::join!(
            identities.get_identity_by_first_public_key(v0::GetIdentityByFirstPublicKeyRequest {
                public_key_hash: hash.to_vec(),
                prove,
            }),
            ids.get_identity_id_by_first_public_key(v0::GetIdentityIdByFirstPublicKeyRequest {
                public_key_hash: hash.to_vec(),
                prove: false,
            }),
        );
        let identity = identity?.into_inner();
        let id = id?.into_inner();

        let record = match (non_empty(identity.identity), non_empty(id.id)) {
            (Some(identity), Some(id)) => Some(IdentityRecord {
                id: Identifier::from_slice(&id)?,
                identity,
            }),
            _ => None,
        };
        Ok(fetched(record, identity.proof, identity.metadata))
    }

    async fn identities_by_public_key_hashes(
        &self,
        hashes: &[PublicKeyHash],
        prove: bool,
    ) -> DapiResult<Fetched<Vec<Option<IdentityRecord>>>> {
        let public_key_hashes: Vec<Vec<u8>> = hashes.iter().map(|h| h.to_vec()).collect();
        let mut identities = self.client();
        let mut ids = self.client();
        let (identities, ids) = tokio::join!(
            identities.get_identities_by_public_key_hashes(
                v0::GetIdentitiesByPublicKeyHashesRequest {
                    public_key_hashes: public_key_hashes.clone(),
                    prove,
                }
            ),
            ids.get_identity_ids_by_public_key_hashes(v0::GetIdentityIdsByPublicKeyHashesRequest {
                public_key_hashes,
                prove: false,
            }),
        );
        let identities = identities?.into_inner();
        let ids = ids?.into_inner();

        if identities.identities.len() != hashes.len() || ids.identity_ids.len() != hashes.len() {
            slog::warn!(self.logger, "Drive returned a mismatched batch";
                "requested" => hashes.len(),
                "identities" => identities.identities.len(),
                "ids" => ids.identity_ids.len());
            return Err(DapiError::internal(
                "drive returned a different number of entries than requested",
            ));
        }

        let records = identities
            .identities
            .into_iter()
            .zip(ids.identity_ids)
            .map(|(identity, id)| match (non_empty(identity), non_empty(id)) {
                (Some(identity), Some(id)) => Ok(Some(IdentityRecord {
                    id: Identifier::from_slice(&id)?,
                    identity,
                })),
                _ => Ok(None),
            })
            .collect::<DapiResult<Vec<_>>>()?;
        Ok(fetched(Some(records), identities.proof, identities.metadata))
    }
}

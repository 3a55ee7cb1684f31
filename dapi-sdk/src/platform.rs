//! Platform (layer 2) operations

use std::time::Duration;

use dapi_grpc::proto::v0::platform_client::PlatformClient as GrpcPlatformClient;
use dapi_grpc::proto::v0::{
    BroadcastStateTransitionRequest, GetDataContractRequest, GetDocumentsRequest,
    GetIdentitiesByPublicKeyHashesRequest, GetIdentityByFirstPublicKeyRequest,
    GetIdentityIdByFirstPublicKeyRequest, GetIdentityIdsByPublicKeyHashesRequest,
    GetIdentityRequest, WaitForStateTransitionResultRequest, get_documents_request,
    wait_for_state_transition_result_response,
};
use tonic::transport::Channel;

use crate::error::{Error, Result, optional};
use crate::types::{Identifier, PublicKeyHash};

/// Where a documents page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStart {
    After(Identifier),
    At(Identifier),
}

/// A documents query. Clauses are passed through as encoded bytes.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub data_contract_id: Identifier,
    pub document_type: String,
    pub where_clause: Vec<u8>,
    pub order_by: Vec<u8>,
    /// Zero asks for the server's default page
    pub limit: u32,
    pub start: Option<DocumentStart>,
}

impl DocumentQuery {
    pub fn new(data_contract_id: Identifier, document_type: impl Into<String>) -> Self {
        Self {
            data_contract_id,
            document_type: document_type.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn start_after(mut self, id: Identifier) -> Self {
        self.start = Some(DocumentStart::After(id));
        self
    }

    pub fn start_at(mut self, id: Identifier) -> Self {
        self.start = Some(DocumentStart::At(id));
        self
    }
}

/// Settled outcome of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionResult {
    /// Executed; carries the platform height it was observed at
    Executed { height: u64 },
    /// Rejected with a consensus error
    Rejected { code: u32, message: String },
}

/// Client for Platform operations.
#[derive(Clone)]
pub struct PlatformClient {
    client: GrpcPlatformClient<Channel>,
}

impl PlatformClient {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            client: GrpcPlatformClient::new(channel),
        }
    }

    /// Submit a serialized state transition.
    pub async fn broadcast_state_transition(&mut self, state_transition: Vec<u8>) -> Result<()> {
        self.client
            .broadcast_state_transition(BroadcastStateTransitionRequest { state_transition })
            .await
            .map_err(Error::from_broadcast)?;
        Ok(())
    }

    /// Wait for the state transition with `hash` to settle.
    ///
    /// `timeout` bounds the wait on this side; the server applies its own
    /// limit as well and answers `DeadlineExceeded` when that runs out.
    pub async fn wait_for_state_transition_result(
        &mut self,
        hash: [u8; 32],
        timeout: Duration,
    ) -> Result<StateTransitionResult> {
        let request = WaitForStateTransitionResultRequest {
            state_transition_hash: hash.to_vec(),
            prove: false,
        };

        let response = tokio::time::timeout(
            timeout,
            self.client.wait_for_state_transition_result(request),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|status| match status.code() {
            tonic::Code::DeadlineExceeded => Error::Timeout,
            _ => Error::Grpc(status),
        })?
        .into_inner();

        use wait_for_state_transition_result_response::Result as Outcome;
        match response.result {
            Some(Outcome::Error(error)) => Ok(StateTransitionResult::Rejected {
                code: error.code,
                message: error.message,
            }),
            Some(Outcome::Proof(_)) | None => Ok(StateTransitionResult::Executed {
                height: response.metadata.map(|m| m.height).unwrap_or_default(),
            }),
        }
    }

    /// Get a serialized identity.
    ///
    /// Returns `None` if it does not exist.
    pub async fn identity(&mut self, id: &Identifier) -> Result<Option<Vec<u8>>> {
        let request = GetIdentityRequest {
            id: id.to_bytes().to_vec(),
            prove: false,
        };
        Ok(optional(self.client.get_identity(request).await)?.map(|r| r.into_inner().identity))
    }

    /// Get a serialized data contract.
    pub async fn data_contract(&mut self, id: &Identifier) -> Result<Option<Vec<u8>>> {
        let request = GetDataContractRequest {
            id: id.to_bytes().to_vec(),
            prove: false,
        };
        Ok(optional(self.client.get_data_contract(request).await)?
            .map(|r| r.into_inner().data_contract))
    }

    /// Query documents of one type.
    ///
    /// A missing data contract is [`Error::NotFound`].
    pub async fn documents(&mut self, query: DocumentQuery) -> Result<Vec<Vec<u8>>> {
        let start = query.start.map(|start| match start {
            DocumentStart::After(id) => {
                get_documents_request::Start::StartAfter(id.to_bytes().to_vec())
            }
            DocumentStart::At(id) => get_documents_request::Start::StartAt(id.to_bytes().to_vec()),
        });
        let request = GetDocumentsRequest {
            data_contract_id: query.data_contract_id.to_bytes().to_vec(),
            document_type: query.document_type,
            r#where: query.where_clause,
            order_by: query.order_by,
            limit: query.limit,
            start,
            prove: false,
        };
        match self.client.get_documents(request).await {
            Ok(response) => Ok(response.into_inner().documents),
            Err(status) if status.code() == tonic::Code::NotFound => {
                Err(Error::NotFound(status.message().to_string()))
            }
            Err(e) => Err(Error::Grpc(e)),
        }
    }

    /// Identity whose first public key hashes to `hash`.
    pub async fn identity_by_public_key_hash(
        &mut self,
        hash: &PublicKeyHash,
    ) -> Result<Option<Vec<u8>>> {
        let request = GetIdentityByFirstPublicKeyRequest {
            public_key_hash: hash.0.to_vec(),
            prove: false,
        };
        Ok(
            optional(self.client.get_identity_by_first_public_key(request).await)?
                .map(|r| r.into_inner().identity),
        )
    }

    /// Identifier of the identity whose first public key hashes to `hash`.
    pub async fn identity_id_by_public_key_hash(
        &mut self,
        hash: &PublicKeyHash,
    ) -> Result<Option<Identifier>> {
        let request = GetIdentityIdByFirstPublicKeyRequest {
            public_key_hash: hash.0.to_vec(),
            prove: false,
        };
        optional(self.client.get_identity_id_by_first_public_key(request).await)?
            .map(|r| Identifier::from_slice(&r.into_inner().id))
            .transpose()
    }

    /// Identities for each hash, in request order; `None` where absent.
    pub async fn identities_by_public_key_hashes(
        &mut self,
        hashes: &[PublicKeyHash],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let request = GetIdentitiesByPublicKeyHashesRequest {
            public_key_hashes: hashes.iter().map(|h| h.0.to_vec()).collect(),
            prove: false,
        };
        let response = self
            .client
            .get_identities_by_public_key_hashes(request)
            .await?
            .into_inner();
        Ok(response
            .identities
            .into_iter()
            .map(|identity| (!identity.is_empty()).then_some(identity))
            .collect())
    }

    /// Identity ids for each hash, in request order; `None` where absent.
    pub async fn identity_ids_by_public_key_hashes(
        &mut self,
        hashes: &[PublicKeyHash],
    ) -> Result<Vec<Option<Identifier>>> {
        let request = GetIdentityIdsByPublicKeyHashesRequest {
            public_key_hashes: hashes.iter().map(|h| h.0.to_vec()).collect(),
            prove: false,
        };
        let response = self
            .client
            .get_identity_ids_by_public_key_hashes(request)
            .await?
            .into_inner();
        response
            .identity_ids
            .into_iter()
            .map(|id| {
                if id.is_empty() {
                    Ok(None)
                } else {
                    Identifier::from_slice(&id).map(Some)
                }
            })
            .collect()
    }
}

//! Static table of every method the server can answer.

use std::fmt;

/// Schema version a method belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaVersion {
    V0,
    Legacy,
}

impl SchemaVersion {
    pub fn package(self) -> &'static str {
        match self {
            SchemaVersion::V0 => "org.dash.platform.dapi.v0",
            SchemaVersion::Legacy => "org.dash.platform.dapi",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::V0 => write!(f, "v0"),
            SchemaVersion::Legacy => write!(f, "legacy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ServerStreaming,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Unary => write!(f, "unary"),
            CallKind::ServerStreaming => write!(f, "server-streaming"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub version: SchemaVersion,
    pub service: &'static str,
    pub method: &'static str,
    pub kind: CallKind,
}

impl MethodDescriptor {
    const fn new(
        version: SchemaVersion,
        service: &'static str,
        method: &'static str,
        kind: CallKind,
    ) -> Self {
        Self {
            version,
            service,
            method,
            kind,
        }
    }

    /// `<package>.<Service>`, as reported by gRPC reflection and routing.
    pub fn service_name(&self) -> String {
        format!("{}.{}", self.version.package(), self.service)
    }

    /// `/<package>.<Service>/<method>`, the HTTP/2 path of the call.
    pub fn full_path(&self) -> String {
        format!("/{}/{}", self.service_name(), self.method)
    }
}

use CallKind::{ServerStreaming, Unary};
use SchemaVersion::{Legacy, V0};

pub static METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::new(V0, "Core", "getStatus", Unary),
    MethodDescriptor::new(V0, "Core", "getBlock", Unary),
    MethodDescriptor::new(V0, "Core", "getBestBlockHeight", Unary),
    MethodDescriptor::new(V0, "Core", "broadcastTransaction", Unary),
    MethodDescriptor::new(V0, "Core", "getTransaction", Unary),
    MethodDescriptor::new(V0, "Core", "getEstimatedTransactionFee", Unary),
    MethodDescriptor::new(V0, "Core", "subscribeToBlockHeadersWithChainLocks", ServerStreaming),
    MethodDescriptor::new(V0, "Core", "subscribeToTransactionsWithProofs", ServerStreaming),
    MethodDescriptor::new(V0, "Platform", "broadcastStateTransition", Unary),
    MethodDescriptor::new(V0, "Platform", "waitForStateTransitionResult", Unary),
    MethodDescriptor::new(V0, "Platform", "getIdentity", Unary),
    MethodDescriptor::new(V0, "Platform", "getDataContract", Unary),
    MethodDescriptor::new(V0, "Platform", "getDocuments", Unary),
    MethodDescriptor::new(V0, "Platform", "getIdentityByFirstPublicKey", Unary),
    MethodDescriptor::new(V0, "Platform", "getIdentityIdByFirstPublicKey", Unary),
    MethodDescriptor::new(V0, "Platform", "getIdentitiesByPublicKeyHashes", Unary),
    MethodDescriptor::new(V0, "Platform", "getIdentityIdsByPublicKeyHashes", Unary),
    MethodDescriptor::new(Legacy, "Core", "getStatus", Unary),
    MethodDescriptor::new(Legacy, "Platform", "broadcastStateTransition", Unary),
    MethodDescriptor::new(Legacy, "Platform", "getIdentity", Unary),
    MethodDescriptor::new(Legacy, "Platform", "getDataContract", Unary),
    MethodDescriptor::new(Legacy, "Platform", "getDocuments", Unary),
];

/// Methods of one schema version, in declaration order.
pub fn methods(version: SchemaVersion) -> impl Iterator<Item = &'static MethodDescriptor> {
    METHODS.iter().filter(move |m| m.version == version)
}

/// Methods served under the given legacy setting.
pub fn served(legacy_enabled: bool) -> impl Iterator<Item = &'static MethodDescriptor> {
    METHODS
        .iter()
        .filter(move |m| legacy_enabled || m.version == SchemaVersion::V0)
}

/// Look a method up by its full path.
pub fn find(path: &str) -> Option<&'static MethodDescriptor> {
    METHODS.iter().find(|m| m.full_path() == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::proto::{legacy, v0};

    #[test]
    fn full_path_format() {
        let status = &METHODS[0];
        assert_eq!(status.full_path(), "/org.dash.platform.dapi.v0.Core/getStatus");
        let legacy_status = find("/org.dash.platform.dapi.Core/getStatus").unwrap();
        assert_eq!(legacy_status.version, SchemaVersion::Legacy);
    }

    #[test]
    fn service_names_match_generated_servers() {
        for method in METHODS {
            let generated = match (method.version, method.service) {
                (V0, "Core") => v0::core_server::SERVICE_NAME,
                (V0, "Platform") => v0::platform_server::SERVICE_NAME,
                (Legacy, "Core") => legacy::core_server::SERVICE_NAME,
                (Legacy, "Platform") => legacy::platform_server::SERVICE_NAME,
                other => panic!("unexpected service {:?}", other),
            };
            assert_eq!(method.service_name(), generated);
        }
    }

    #[test]
    fn paths_are_unique() {
        let paths: HashSet<String> = METHODS.iter().map(|m| m.full_path()).collect();
        assert_eq!(paths.len(), METHODS.len());
    }

    #[test]
    fn legacy_is_a_subset_of_v0() {
        let v0_methods: HashSet<(&str, &str)> =
            methods(V0).map(|m| (m.service, m.method)).collect();
        for method in methods(Legacy) {
            assert!(v0_methods.contains(&(method.service, method.method)));
        }
    }

    #[test]
    fn only_core_subscriptions_stream() {
        let streaming: Vec<&str> = METHODS
            .iter()
            .filter(|m| m.kind == CallKind::ServerStreaming)
            .map(|m| m.method)
            .collect();
        assert_eq!(
            streaming,
            vec![
                "subscribeToBlockHeadersWithChainLocks",
                "subscribeToTransactionsWithProofs"
            ]
        );
    }

    #[test]
    fn served_respects_legacy_flag() {
        assert_eq!(served(true).count(), METHODS.len());
        assert!(served(false).all(|m| m.version == V0));
        assert!(find("/org.dash.platform.dapi.v0.Core/missing").is_none());
    }
}

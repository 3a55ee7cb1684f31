//! gRPC facade for the Dash DAPI surface.
//!
//! This crate provides a gRPC server that exposes:
//! - Core chain queries, transaction broadcast and fee estimation
//! - Block header and transaction-with-proof subscriptions
//! - Platform state transitions, identities, data contracts and documents
//! - The older unversioned Core/Platform surface for existing clients
//!
//! Every operation is answered by a [`backend::CoreBackend`] or a
//! [`backend::PlatformBackend`].

pub mod backend;
pub mod chain;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod services;

/// Generated protobuf code from tonic-prost-build.
/// This module is populated by the build.rs script.
#[allow(clippy::all)]
#[allow(clippy::pedantic)]
pub mod proto {
    /// Current schema version (`org.dash.platform.dapi.v0`).
    pub mod v0 {
        tonic::include_proto!("org.dash.platform.dapi.v0");
    }

    /// Unversioned schema (`org.dash.platform.dapi`).
    pub mod legacy {
        tonic::include_proto!("org.dash.platform.dapi");
    }
}

// Re-export key types for convenience
pub use config::{DapiConfig, Network};
pub use error::{DapiError, DapiResult};
pub use server::DapiServer;

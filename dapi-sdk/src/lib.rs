//! DAPI SDK - Rust client for the Dash DAPI gRPC services
//!
//! Typed wrappers over the v0 Core and Platform services.
//!
//! # Quick Start
//!
//! ```ignore
//! use dapi_sdk::{DapiClient, Hash};
//!
//! #[tokio::main]
//! async fn main() -> dapi_sdk::Result<()> {
//!     let client = DapiClient::connect("http://localhost:3010").await?;
//!
//!     let status = client.core().status().await?;
//!     println!("{} blocks on {}", status.blocks, status.chain);
//!
//!     let txid = Hash::from_hex("...")?;
//!     if let Some(tx) = client.core().transaction(&txid).await? {
//!         println!("{} confirmations", tx.confirmations);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod client;
pub mod error;
pub mod platform;
pub mod subscription;
pub mod types;

// Re-exports for convenience
pub use chain::{BroadcastOptions, CoreClient, NodeState, NodeStatus, TransactionInfo};
pub use client::{ClientConfig, DapiClient};
pub use error::{Error, Result};
pub use platform::{DocumentQuery, DocumentStart, PlatformClient, StateTransitionResult};
pub use subscription::{
    BloomFilterParams, EventStream, HeaderEvent, StartFrom, SubscriptionClient, TransactionEvent,
};
pub use types::{Hash, Identifier, PublicKeyHash};

//! gRPC service implementations.

mod core_service;
mod legacy;
mod platform_service;
mod streaming;
mod utils;

pub use core_service::{CoreService, sync_status};
pub use legacy::{LegacyCoreService, LegacyPlatformService};
pub use platform_service::{MAX_DOCUMENTS_LIMIT, PlatformService};
pub use streaming::{HeadersStream, StreamingService, TransactionsStream};

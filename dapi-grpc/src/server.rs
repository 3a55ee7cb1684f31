//! gRPC server setup and configuration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic::transport::server::Router;

use crate::backend::{CoreBackend, PlatformBackend};
use crate::config::DapiConfig;
use crate::proto::{legacy, v0};
use crate::registry;
use crate::services::{
    CoreService, LegacyCoreService, LegacyPlatformService, PlatformService, StreamingService,
};

/// gRPC server instance.
pub struct DapiServer {
    config: DapiConfig,
    core: Arc<dyn CoreBackend>,
    platform: Arc<dyn PlatformBackend>,
    streaming: StreamingService,
    logger: Logger,
}

impl DapiServer {
    /// Create a new server answering from the given backends.
    pub fn new(
        config: DapiConfig,
        core: Arc<dyn CoreBackend>,
        platform: Arc<dyn PlatformBackend>,
        logger: Logger,
    ) -> Self {
        let streaming = StreamingService::new(
            Arc::clone(&core),
            config.streaming.clone(),
            logger.new(slog::o!("service" => "streaming")),
        );
        Self {
            config,
            core,
            platform,
            streaming,
            logger,
        }
    }

    pub fn config(&self) -> &DapiConfig {
        &self.config
    }

    /// Shared subscription state, for inspecting live subscriptions.
    pub fn streaming(&self) -> &StreamingService {
        &self.streaming
    }

    /// Routes for every served service.
    ///
    /// Unary calls are bounded by `server.request_timeout_secs` inside each
    /// service, so `waitForStateTransitionResult` can wait past it.
    pub fn routes(&self) -> Routes {
        let request_timeout = Duration::from_secs(self.config.server.request_timeout_secs);
        let core = CoreService::new(
            Arc::clone(&self.core),
            self.streaming.clone(),
            request_timeout,
            self.logger.new(slog::o!("service" => "core")),
        );
        let platform = PlatformService::new(
            Arc::clone(&self.platform),
            self.config.platform.clone(),
            request_timeout,
            self.logger.new(slog::o!("service" => "platform")),
        );

        let mut routes = Routes::new(v0::core_server::CoreServer::new(core))
            .add_service(v0::platform_server::PlatformServer::new(platform));

        if self.config.legacy.enabled {
            routes = routes
                .add_service(legacy::core_server::CoreServer::new(LegacyCoreService::new(
                    Arc::clone(&self.core),
                    self.config.server.network,
                    request_timeout,
                )))
                .add_service(legacy::platform_server::PlatformServer::new(
                    LegacyPlatformService::new(Arc::clone(&self.platform), request_timeout),
                ));
        }
        routes
    }

    /// Transport with the configured limits and all routes attached.
    ///
    /// Use this to serve on a custom listener.
    pub fn into_router(self) -> Router {
        for method in registry::served(self.config.legacy.enabled) {
            slog::debug!(self.logger, "Serving method";
                "path" => method.full_path(),
                "kind" => %method.kind,
            );
        }
        let routes = self.routes();

        Server::builder()
            .max_concurrent_streams(self.config.server.max_concurrent_streams)
            .add_routes(routes)
    }

    /// Start the gRPC server.
    ///
    /// This will block until the server is shut down.
    pub async fn serve(self) -> Result<(), tonic::transport::Error> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the gRPC server, stopping gracefully once `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        let addr = self.config.server.listen_addr;

        slog::info!(
            self.logger,
            "Starting gRPC server";
            "address" => %addr,
            "network" => %self.config.server.network,
            "legacy" => self.config.legacy.enabled,
            "methods" => registry::served(self.config.legacy.enabled).count(),
        );

        let logger = self.logger.clone();
        let result = self.into_router().serve_with_shutdown(addr, signal).await;
        slog::info!(logger, "gRPC server stopped");
        result
    }
}

//! Container-backed kernel launchers
//!
//! A launcher owns the container, the gateway endpoint and the kernel id of
//! one sandbox. Sessions call it to connect and, after a lost connection,
//! to replace the whole container.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BoxConfig;
use crate::container::{find_free_port, ContainerHandle, ContainerRuntime, SESSION_LABEL};
use crate::kernel::gateway::{BlockingGatewayClient, GatewayClient, GatewayEndpoint};
use crate::kernel::{AsyncKernelLauncher, ExecutionError, KernelLauncher};
use crate::metrics::SANDBOX_START_DURATION;
use crate::ws::{AsyncClient, BlockingClient, ClientDeflateFactory};

use super::{gateway_spec, BoxError, SessionIdentity};

/// Where a sandbox lives; shared by both launcher flavours
struct Placement {
    runtime: Arc<dyn ContainerRuntime>,
    config: BoxConfig,
    session_id: Uuid,
    endpoint: GatewayEndpoint,
    kernel_id: Option<String>,
    container: Option<ContainerHandle>,
}

impl Placement {
    fn new(runtime: Arc<dyn ContainerRuntime>, config: BoxConfig) -> Self {
        let endpoint = GatewayEndpoint::localhost(config.base_port);
        Self {
            runtime,
            config,
            session_id: Uuid::now_v7(),
            endpoint,
            kernel_id: None,
            container: None,
        }
    }

    fn restored(
        runtime: Arc<dyn ContainerRuntime>,
        config: BoxConfig,
        identity: SessionIdentity,
        container: ContainerHandle,
    ) -> Self {
        Self {
            runtime,
            config,
            session_id: identity.session_id,
            endpoint: identity.endpoint,
            kernel_id: identity.kernel_id,
            container: Some(container),
        }
    }

    fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            session_id: self.session_id,
            kernel_id: self.kernel_id.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    fn factory(&self) -> Option<ClientDeflateFactory> {
        self.config.compression.then(ClientDeflateFactory::default)
    }

    /// Record a freshly started container; the old kernel id is void
    fn placed(&mut self, handle: ContainerHandle, port: u16) {
        self.endpoint = GatewayEndpoint::localhost(port);
        self.kernel_id = None;
        self.container = Some(handle);
    }

    fn announce(&self, what: &str) {
        let container = self.container.as_ref().map(|c| c.short_id().to_string());
        if self.config.show_info {
            info!(session_id = %self.session_id, port = self.endpoint.port, ?container, "{what}");
        } else {
            debug!(session_id = %self.session_id, port = self.endpoint.port, ?container, "{what}");
        }
    }
}

/// Find the container labelled with `session_id`
fn find_container(
    runtime: &dyn ContainerRuntime,
    session_id: Uuid,
) -> Result<ContainerHandle, BoxError> {
    runtime
        .list(SESSION_LABEL, &session_id.to_string())?
        .into_iter()
        .next()
        .ok_or(BoxError::SessionNotFound(session_id))
}

// ═══════════════════════════════════════════════════════════════════════════
// Blocking
// ═══════════════════════════════════════════════════════════════════════════

/// Blocking launcher: docker calls, readiness polling and the handshake
/// all run on the calling thread
pub struct ContainerLauncher {
    place: Placement,
}

impl ContainerLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: BoxConfig) -> Self {
        Self {
            place: Placement::new(runtime, config),
        }
    }

    /// Reattach to the container carrying `identity.session_id`
    pub fn restore(
        runtime: Arc<dyn ContainerRuntime>,
        config: BoxConfig,
        identity: SessionIdentity,
    ) -> Result<Self, BoxError> {
        let container = find_container(runtime.as_ref(), identity.session_id)?;
        Ok(Self {
            place: Placement::restored(runtime, config, identity, container),
        })
    }

    pub fn identity(&self) -> SessionIdentity {
        self.place.identity()
    }

    pub fn config(&self) -> &BoxConfig {
        &self.place.config
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.place.container.as_ref()
    }

    pub fn gateway(&self) -> Result<BlockingGatewayClient, BoxError> {
        Ok(BlockingGatewayClient::new(self.place.endpoint.clone())?)
    }

    /// Start a new container and wait for its gateway
    pub fn start_container(&mut self) -> Result<(), BoxError> {
        let started = Instant::now();
        let port = find_free_port(self.place.config.base_port)?;
        let spec = gateway_spec(&self.place.config.image, port, self.place.session_id);
        let handle = self.place.runtime.start(&spec)?;
        self.place.placed(handle, port);
        self.place.announce("waiting for kernel gateway");

        self.gateway()?
            .wait_until_ready(self.place.config.readiness_timeout)?;
        SANDBOX_START_DURATION.observe(started.elapsed().as_secs_f64());
        self.place.announce("kernel gateway started");
        Ok(())
    }

    /// Stop and remove the container. Returns whether there was one.
    pub fn stop_container(&mut self) -> Result<bool, BoxError> {
        match self.place.container.take() {
            Some(handle) => {
                self.place.runtime.stop(&handle)?;
                self.place.announce("container stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn open(&mut self) -> Result<BlockingClient, BoxError> {
        let kernel_id = match &self.place.kernel_id {
            Some(id) => id.clone(),
            None => {
                let id = self.gateway()?.create_kernel()?;
                self.place.kernel_id = Some(id.clone());
                id
            }
        };
        let url = self.place.endpoint.channels_url(&kernel_id)?;
        let factory = self.place.factory();
        let connection =
            BlockingClient::connect(&url, factory.as_ref(), self.place.config.connection_config())
                .map_err(ExecutionError::from)?;
        debug!(%kernel_id, extensions = ?connection.extensions(), "kernel connected");
        Ok(connection)
    }
}

impl KernelLauncher for ContainerLauncher {
    type Transport = BlockingClient;

    fn connect(&mut self) -> Result<Self::Transport, ExecutionError> {
        self.open().map_err(ExecutionError::launch)
    }

    fn restart(&mut self) -> Result<Self::Transport, ExecutionError> {
        if let Err(e) = self.stop_container() {
            warn!(error = %e, "failed to stop old container");
        }
        self.start_container().map_err(ExecutionError::launch)?;
        self.open().map_err(ExecutionError::launch)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Async
// ═══════════════════════════════════════════════════════════════════════════

/// Async launcher: docker calls go to the blocking pool, HTTP and the
/// WebSocket run on the runtime
pub struct AsyncContainerLauncher {
    place: Placement,
}

impl AsyncContainerLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: BoxConfig) -> Self {
        Self {
            place: Placement::new(runtime, config),
        }
    }

    pub async fn restore(
        runtime: Arc<dyn ContainerRuntime>,
        config: BoxConfig,
        identity: SessionIdentity,
    ) -> Result<Self, BoxError> {
        let lookup = Arc::clone(&runtime);
        let session_id = identity.session_id;
        let container =
            tokio::task::spawn_blocking(move || find_container(lookup.as_ref(), session_id))
                .await??;
        Ok(Self {
            place: Placement::restored(runtime, config, identity, container),
        })
    }

    pub fn identity(&self) -> SessionIdentity {
        self.place.identity()
    }

    pub fn config(&self) -> &BoxConfig {
        &self.place.config
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.place.container.as_ref()
    }

    pub fn gateway(&self) -> Result<GatewayClient, BoxError> {
        Ok(GatewayClient::new(self.place.endpoint.clone())?)
    }

    pub async fn start_container(&mut self) -> Result<(), BoxError> {
        let started = Instant::now();
        let port = find_free_port(self.place.config.base_port)?;
        let spec = gateway_spec(&self.place.config.image, port, self.place.session_id);
        let runtime = Arc::clone(&self.place.runtime);
        let handle = tokio::task::spawn_blocking(move || runtime.start(&spec)).await??;
        self.place.placed(handle, port);
        self.place.announce("waiting for kernel gateway");

        self.gateway()?
            .wait_until_ready(self.place.config.readiness_timeout)
            .await?;
        SANDBOX_START_DURATION.observe(started.elapsed().as_secs_f64());
        self.place.announce("kernel gateway started");
        Ok(())
    }

    pub async fn stop_container(&mut self) -> Result<bool, BoxError> {
        match self.place.container.take() {
            Some(handle) => {
                let runtime = Arc::clone(&self.place.runtime);
                tokio::task::spawn_blocking(move || runtime.stop(&handle)).await??;
                self.place.announce("container stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn open(&mut self) -> Result<AsyncClient, BoxError> {
        let kernel_id = match &self.place.kernel_id {
            Some(id) => id.clone(),
            None => {
                let id = self.gateway()?.create_kernel().await?;
                self.place.kernel_id = Some(id.clone());
                id
            }
        };
        let url = self.place.endpoint.channels_url(&kernel_id)?;
        let factory = self.place.factory();
        let connection =
            AsyncClient::connect(&url, factory.as_ref(), self.place.config.connection_config())
                .await
                .map_err(ExecutionError::from)?;
        debug!(%kernel_id, extensions = ?connection.extensions(), "kernel connected");
        Ok(connection)
    }
}

impl AsyncKernelLauncher for AsyncContainerLauncher {
    type Transport = AsyncClient;

    async fn connect(&mut self) -> Result<Self::Transport, ExecutionError> {
        self.open().await.map_err(ExecutionError::launch)
    }

    async fn restart(&mut self) -> Result<Self::Transport, ExecutionError> {
        if let Err(e) = self.stop_container().await {
            warn!(error = %e, "failed to stop old container");
        }
        self.start_container().await.map_err(ExecutionError::launch)?;
        self.open().await.map_err(ExecutionError::launch)
    }
}

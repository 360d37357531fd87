//! Sandbox facades
//!
//! Dropping a box leaves its container running so it can be restored with
//! `from_id`; call `stop` to remove it.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BoxConfig;
use crate::container::{ContainerRuntime, DockerCli};
use crate::kernel::{AsyncSession, BlockingSession, ExecutionOutcome};
use crate::metrics::ACTIVE_SANDBOXES;
use crate::staging::{StagedFile, StagingArea};

use super::launcher::{AsyncContainerLauncher, ContainerLauncher};
use super::{BoxError, BoxStatus, SessionIdentity};

/// Blocking sandbox. Must not be used from inside a tokio runtime.
pub struct KernelBox {
    session: BlockingSession<ContainerLauncher>,
    staging: StagingArea,
}

impl KernelBox {
    pub fn new(config: BoxConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let staging = StagingArea::new(&config.staging_dir);
        let session_config = config.session_config();
        Self {
            session: BlockingSession::new(ContainerLauncher::new(runtime, config), session_config),
            staging,
        }
    }

    /// Sandbox on the local docker CLI
    pub fn docker(config: BoxConfig) -> Self {
        Self::new(config, Arc::new(DockerCli::default()))
    }

    /// Reattach to a running sandbox
    ///
    /// Fails with [`BoxError::SessionNotFound`] when no container carries
    /// the session label. The kernel connection is opened on first use.
    pub fn from_id(
        config: BoxConfig,
        runtime: Arc<dyn ContainerRuntime>,
        identity: SessionIdentity,
    ) -> Result<Self, BoxError> {
        let staging = StagingArea::new(&config.staging_dir);
        let session_config = config.session_config();
        let launcher = ContainerLauncher::restore(runtime, config, identity)?;
        debug!(session_id = %launcher.identity().session_id, "sandbox restored");
        ACTIVE_SANDBOXES.inc();
        Ok(Self {
            session: BlockingSession::new(launcher, session_config),
            staging,
        })
    }

    pub fn identity(&self) -> SessionIdentity {
        self.session.launcher().identity()
    }

    pub fn session_id(&self) -> Uuid {
        self.identity().session_id
    }

    /// Start the container and connect to a new kernel
    pub fn start(&mut self) -> Result<BoxStatus, BoxError> {
        if self.session.launcher().container().is_some() {
            return Ok(BoxStatus::Running);
        }
        self.staging.ensure()?;
        // A container that never became ready still needs a `stop`
        let started = self.session.launcher_mut().start_container();
        if self.session.launcher().container().is_some() {
            ACTIVE_SANDBOXES.inc();
        }
        started?;
        self.session.connect()?;
        Ok(BoxStatus::Started)
    }

    /// `Running` while the gateway answers, `Stopped` otherwise
    pub fn status(&self) -> Result<BoxStatus, BoxError> {
        if self.session.launcher().container().is_none() {
            return Ok(BoxStatus::Stopped);
        }
        Ok(if self.session.launcher().gateway()?.is_ready() {
            BoxStatus::Running
        } else {
            BoxStatus::Stopped
        })
    }

    pub fn run(&mut self, code: &str) -> Result<ExecutionOutcome, BoxError> {
        Ok(self.session.run(code)?)
    }

    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<ExecutionOutcome, BoxError> {
        Ok(self.session.run_file(path)?)
    }

    pub fn install(&mut self, package: &str) -> Result<String, BoxError> {
        Ok(self.session.install(package)?)
    }

    pub fn upload(&self, name: &str, content: &[u8]) -> Result<String, BoxError> {
        Ok(self.staging.upload(name, content)?)
    }

    pub fn download(&self, name: &str) -> Result<StagedFile, BoxError> {
        Ok(self.staging.download(name)?)
    }

    pub fn list_files(&self) -> Result<Vec<StagedFile>, BoxError> {
        Ok(self.staging.list_files()?)
    }

    /// Replace the container and kernel; interpreter state is lost
    pub fn restart(&mut self) -> Result<BoxStatus, BoxError> {
        self.session.restart()?;
        Ok(BoxStatus::Restarted)
    }

    /// Close the connection and remove the container
    pub fn stop(&mut self) -> Result<BoxStatus, BoxError> {
        if let Err(e) = self.session.close() {
            debug!(error = %e, "connection already gone");
        }
        if self.session.launcher_mut().stop_container()? {
            ACTIVE_SANDBOXES.dec();
        }
        Ok(BoxStatus::Stopped)
    }
}

/// Async sandbox
pub struct AsyncKernelBox {
    session: AsyncSession<AsyncContainerLauncher>,
    staging: StagingArea,
}

impl AsyncKernelBox {
    pub fn new(config: BoxConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let staging = StagingArea::new(&config.staging_dir);
        let session_config = config.session_config();
        Self {
            session: AsyncSession::new(AsyncContainerLauncher::new(runtime, config), session_config),
            staging,
        }
    }

    pub fn docker(config: BoxConfig) -> Self {
        Self::new(config, Arc::new(DockerCli::default()))
    }

    pub async fn from_id(
        config: BoxConfig,
        runtime: Arc<dyn ContainerRuntime>,
        identity: SessionIdentity,
    ) -> Result<Self, BoxError> {
        let staging = StagingArea::new(&config.staging_dir);
        let session_config = config.session_config();
        let launcher = AsyncContainerLauncher::restore(runtime, config, identity).await?;
        debug!(session_id = %launcher.identity().session_id, "sandbox restored");
        ACTIVE_SANDBOXES.inc();
        Ok(Self {
            session: AsyncSession::new(launcher, session_config),
            staging,
        })
    }

    pub fn identity(&self) -> SessionIdentity {
        self.session.launcher().identity()
    }

    pub fn session_id(&self) -> Uuid {
        self.identity().session_id
    }

    pub async fn start(&mut self) -> Result<BoxStatus, BoxError> {
        if self.session.launcher().container().is_some() {
            return Ok(BoxStatus::Running);
        }
        let staging = self.staging.clone();
        tokio::task::spawn_blocking(move || staging.ensure()).await??;
        let started = self.session.launcher_mut().start_container().await;
        if self.session.launcher().container().is_some() {
            ACTIVE_SANDBOXES.inc();
        }
        started?;
        self.session.connect().await?;
        Ok(BoxStatus::Started)
    }

    pub async fn status(&self) -> Result<BoxStatus, BoxError> {
        if self.session.launcher().container().is_none() {
            return Ok(BoxStatus::Stopped);
        }
        Ok(if self.session.launcher().gateway()?.is_ready().await {
            BoxStatus::Running
        } else {
            BoxStatus::Stopped
        })
    }

    pub async fn run(&mut self, code: &str) -> Result<ExecutionOutcome, BoxError> {
        Ok(self.session.run(code).await?)
    }

    pub async fn run_file(&mut self, path: impl AsRef<Path>) -> Result<ExecutionOutcome, BoxError> {
        Ok(self.session.run_file(path).await?)
    }

    pub async fn install(&mut self, package: &str) -> Result<String, BoxError> {
        Ok(self.session.install(package).await?)
    }

    pub async fn upload(&self, name: &str, content: Vec<u8>) -> Result<String, BoxError> {
        let staging = self.staging.clone();
        let name = name.to_string();
        Ok(tokio::task::spawn_blocking(move || staging.upload(&name, &content)).await??)
    }

    pub async fn download(&self, name: &str) -> Result<StagedFile, BoxError> {
        let staging = self.staging.clone();
        let name = name.to_string();
        Ok(tokio::task::spawn_blocking(move || staging.download(&name)).await??)
    }

    pub async fn list_files(&self) -> Result<Vec<StagedFile>, BoxError> {
        let staging = self.staging.clone();
        Ok(tokio::task::spawn_blocking(move || staging.list_files()).await??)
    }

    pub async fn restart(&mut self) -> Result<BoxStatus, BoxError> {
        self.session.restart().await?;
        Ok(BoxStatus::Restarted)
    }

    pub async fn stop(&mut self) -> Result<BoxStatus, BoxError> {
        if let Err(e) = self.session.close().await {
            debug!(error = %e, "connection already gone");
        }
        match self.session.launcher_mut().stop_container().await {
            Ok(true) => ACTIVE_SANDBOXES.dec(),
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, session_id = %self.session_id(), "failed to stop container");
                return Err(e);
            }
        }
        Ok(BoxStatus::Stopped)
    }
}

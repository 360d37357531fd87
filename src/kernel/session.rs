//! Execution sessions
//!
//! A session owns one kernel transport and runs code on it one request at
//! a time. `run` takes `&mut self`, so overlapping requests on the same
//! session cannot be expressed.
//!
//! # Retry
//!
//! When the connection drops while waiting for output, the launcher
//! replaces the kernel and the same code is submitted again with a fresh
//! correlation id and a fresh aggregator, so partial output from the lost
//! attempt never leaks into the result. Each attempt gets its own request
//! deadline. After `retries` attempts the run fails with
//! [`ExecutionError::RetriesExhausted`].
//!
//! A timeout is not retried. The session drops its transport and the next
//! `run` reconnects to the same kernel, so interpreter state survives.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::deadline::Deadline;
use crate::metrics::{EXECUTIONS_TOTAL, EXECUTION_DURATION, KERNEL_RESTARTS};

use super::aggregate::OutputAggregator;
use super::message::{DecodeError, ExecuteRequest, InboundMessage};
use super::transport::{AsyncKernelLauncher, AsyncKernelTransport, KernelLauncher, KernelTransport};
use super::{ExecutionError, ExecutionOutcome};

/// Default number of attempts per `run`
pub const DEFAULT_RETRIES: u32 = 3;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Attempts per run, counting the first one
    pub retries: u32,
    /// Budget for one attempt, from submission to terminal message
    pub request_timeout: Option<Duration>,
    /// Log submitted code and output at info level
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            request_timeout: Some(Duration::from_secs(270)),
            verbose: false,
        }
    }
}

/// What to do with one decoded (or undecodable) message
fn classify(
    aggregator: &mut OutputAggregator,
    text: &str,
) -> Result<Option<ExecutionOutcome>, ExecutionError> {
    match InboundMessage::decode(text) {
        Ok(message) => Ok(aggregator.apply(&message)),
        Err(DecodeError::UnknownMessageType(msg_type)) => {
            trace!(%msg_type, "skipping message");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn record(outcome: &ExecutionOutcome, started: Instant, verbose: bool) {
    EXECUTIONS_TOTAL.with_label_values(&[outcome.kind()]).inc();
    EXECUTION_DURATION.observe(started.elapsed().as_secs_f64());
    if verbose {
        info!(kind = outcome.kind(), output = %outcome, "execution finished");
    } else {
        debug!(kind = outcome.kind(), "execution finished");
    }
}

fn read_source(path: &Path) -> Result<String, ExecutionError> {
    Ok(std::fs::read_to_string(path)?)
}

fn install_commands(package: &str) -> Result<(String, String), ExecutionError> {
    let valid = !package.is_empty()
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(ExecutionError::InvalidRequest(format!(
            "invalid package name: {package:?}"
        )));
    }
    let module = package.replace('-', "_");
    Ok((
        format!("!pip install -q {package}"),
        format!("try:\n    import {module}\nexcept:\n    pass"),
    ))
}

// ═══════════════════════════════════════════════════════════════════════════
// Blocking
// ═══════════════════════════════════════════════════════════════════════════

/// Execution session in blocking mode
pub struct BlockingSession<L: KernelLauncher> {
    launcher: L,
    transport: Option<L::Transport>,
    config: SessionConfig,
}

impl<L: KernelLauncher> BlockingSession<L> {
    /// Session that connects lazily on the first run
    pub fn new(launcher: L, config: SessionConfig) -> Self {
        Self {
            launcher,
            transport: None,
            config,
        }
    }

    /// Session over an already connected transport
    pub fn with_transport(launcher: L, transport: L::Transport, config: SessionConfig) -> Self {
        Self {
            launcher,
            transport: Some(transport),
            config,
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.launcher
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Run `code` and wait for its outcome
    pub fn run(&mut self, code: &str) -> Result<ExecutionOutcome, ExecutionError> {
        let started = Instant::now();
        if self.config.verbose {
            info!(code, "running code");
        }

        let mut budget = self.config.retries;
        loop {
            if budget == 0 {
                return Err(ExecutionError::RetriesExhausted {
                    attempts: self.config.retries,
                });
            }
            match self.attempt(code) {
                Ok(outcome) => {
                    record(&outcome, started, self.config.verbose);
                    return Ok(outcome);
                }
                Err(e) if e.is_connection_closed() => {
                    budget -= 1;
                    self.transport = None;
                    warn!(error = %e, remaining = budget, "kernel connection lost");
                    if budget > 0 {
                        self.restart()?;
                    }
                }
                Err(e @ ExecutionError::Timeout(_)) => {
                    // The read may have stopped mid-frame. The next run opens
                    // a fresh channel to the same kernel.
                    self.transport = None;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Connect now instead of on the first run
    pub fn connect(&mut self) -> Result<(), ExecutionError> {
        if self.transport.is_none() {
            self.transport = Some(self.launcher.connect()?);
        }
        Ok(())
    }

    /// Drop the transport, replace the kernel and reconnect
    pub fn restart(&mut self) -> Result<(), ExecutionError> {
        self.transport = None;
        KERNEL_RESTARTS.inc();
        self.transport = Some(self.launcher.restart()?);
        Ok(())
    }

    fn attempt(&mut self, code: &str) -> Result<ExecutionOutcome, ExecutionError> {
        self.connect()?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ExecutionError::InvalidRequest("no kernel transport".into()))?;

        let request = ExecuteRequest::new(code);
        transport.send(&request.to_json()?)?;
        debug!(msg_id = request.msg_id(), "execute_request sent");

        let deadline = Deadline::new(self.config.request_timeout);
        let mut aggregator = OutputAggregator::new(request.msg_id());
        loop {
            let text = transport.receive(&deadline)?;
            if let Some(outcome) = classify(&mut aggregator, &text)? {
                return Ok(outcome);
            }
        }
    }

    /// Run the contents of a source file
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<ExecutionOutcome, ExecutionError> {
        let code = read_source(path.as_ref())?;
        self.run(&code)
    }

    /// `pip install` a package in the kernel, then import it once
    pub fn install(&mut self, package: &str) -> Result<String, ExecutionError> {
        let (install, import_check) = install_commands(package)?;
        self.run(&install)?;
        self.run(&import_check)?;
        info!(package, "package installed");
        Ok(format!("{package} installed successfully"))
    }

    /// Close the transport. The kernel itself is left running.
    pub fn close(&mut self) -> Result<(), ExecutionError> {
        if let Some(mut transport) = self.transport.take() {
            transport.close()?;
        }
        Ok(())
    }

    /// Give back the launcher, dropping the transport
    pub fn into_launcher(self) -> L {
        self.launcher
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Async
// ═══════════════════════════════════════════════════════════════════════════

/// Execution session in async mode
pub struct AsyncSession<L: AsyncKernelLauncher> {
    launcher: L,
    transport: Option<L::Transport>,
    config: SessionConfig,
}

impl<L: AsyncKernelLauncher> AsyncSession<L> {
    pub fn new(launcher: L, config: SessionConfig) -> Self {
        Self {
            launcher,
            transport: None,
            config,
        }
    }

    pub fn with_transport(launcher: L, transport: L::Transport, config: SessionConfig) -> Self {
        Self {
            launcher,
            transport: Some(transport),
            config,
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.launcher
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Run `code` and wait for its outcome
    pub async fn run(&mut self, code: &str) -> Result<ExecutionOutcome, ExecutionError> {
        let started = Instant::now();
        if self.config.verbose {
            info!(code, "running code");
        }

        let mut budget = self.config.retries;
        loop {
            if budget == 0 {
                return Err(ExecutionError::RetriesExhausted {
                    attempts: self.config.retries,
                });
            }
            match self.attempt(code).await {
                Ok(outcome) => {
                    record(&outcome, started, self.config.verbose);
                    return Ok(outcome);
                }
                Err(e) if e.is_connection_closed() => {
                    budget -= 1;
                    self.transport = None;
                    warn!(error = %e, remaining = budget, "kernel connection lost");
                    if budget > 0 {
                        self.restart().await?;
                    }
                }
                Err(e @ ExecutionError::Timeout(_)) => {
                    self.transport = None;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn connect(&mut self) -> Result<(), ExecutionError> {
        if self.transport.is_none() {
            self.transport = Some(self.launcher.connect().await?);
        }
        Ok(())
    }

    pub async fn restart(&mut self) -> Result<(), ExecutionError> {
        self.transport = None;
        KERNEL_RESTARTS.inc();
        self.transport = Some(self.launcher.restart().await?);
        Ok(())
    }

    async fn attempt(&mut self, code: &str) -> Result<ExecutionOutcome, ExecutionError> {
        self.connect().await?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ExecutionError::InvalidRequest("no kernel transport".into()))?;

        let request = ExecuteRequest::new(code);
        transport.send(&request.to_json()?).await?;
        debug!(msg_id = request.msg_id(), "execute_request sent");

        let deadline = Deadline::new(self.config.request_timeout);
        let mut aggregator = OutputAggregator::new(request.msg_id());
        loop {
            let text = transport.receive(&deadline).await?;
            if let Some(outcome) = classify(&mut aggregator, &text)? {
                return Ok(outcome);
            }
        }
    }

    pub async fn run_file(&mut self, path: impl AsRef<Path>) -> Result<ExecutionOutcome, ExecutionError> {
        let code = tokio::fs::read_to_string(path.as_ref()).await?;
        self.run(&code).await
    }

    pub async fn install(&mut self, package: &str) -> Result<String, ExecutionError> {
        let (install, import_check) = install_commands(package)?;
        self.run(&install).await?;
        self.run(&import_check).await?;
        info!(package, "package installed");
        Ok(format!("{package} installed successfully"))
    }

    pub async fn close(&mut self) -> Result<(), ExecutionError> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }
        Ok(())
    }

    pub fn into_launcher(self) -> L {
        self.launcher
    }
}

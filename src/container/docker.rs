//! Docker CLI runtime
//!
//! Shells out to the `docker` binary rather than speaking the engine API,
//! so the only host requirement is a working `docker` on `PATH`.
//!
//! ```text
//! start  →  docker run -d -p H:C/tcp --label k=v IMAGE CMD...
//! stop   →  docker stop ID && docker rm ID
//! list   →  docker ps --filter label=k=v --format '{{json .}}'
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use serde::Deserialize;
use tracing::{debug, info};

use super::{ContainerError, ContainerHandle, ContainerRuntime, ContainerSpec, PortMapping};

/// [`ContainerRuntime`] backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn exec(&self, args: &[String]) -> Result<Output, ContainerError> {
        debug!(binary = %self.binary.display(), ?args, "running docker");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(ContainerError::Spawn)?;
        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: format!("docker {}", args.first().map(String::as_str).unwrap_or("")),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Arguments for `docker run`
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string()];
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}/tcp", port.host, port.container));
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Arguments for `docker ps` filtered on one label
pub fn list_args(label: &str, value: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "--no-trunc".to_string(),
        "--filter".to_string(),
        format!("label={label}={value}"),
        "--format".to_string(),
        "{{json .}}".to_string(),
    ]
}

#[derive(Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// `"a=1,b=2"` → map
fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// `"0.0.0.0:8888->8888/tcp, :::8888->8888/tcp"` → mappings, deduplicated
fn parse_ports(raw: &str) -> Vec<PortMapping> {
    let mut ports: Vec<PortMapping> = Vec::new();
    for entry in raw.split(',') {
        let Some((host, container)) = entry.trim().split_once("->") else {
            continue;
        };
        let host = host.rsplit(':').next().and_then(|p| p.parse().ok());
        let container = container.split('/').next().and_then(|p| p.parse().ok());
        if let (Some(host), Some(container)) = (host, container) {
            let mapping = PortMapping { host, container };
            if !ports.contains(&mapping) {
                ports.push(mapping);
            }
        }
    }
    ports
}

/// Parse `docker ps --format '{{json .}}'` output, one object per line
pub fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerHandle>, ContainerError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let ps: PsLine = serde_json::from_str(line)
                .map_err(|e| ContainerError::Parse(format!("docker ps line {line:?}: {e}")))?;
            Ok(ContainerHandle::new(
                ps.id,
                parse_labels(&ps.labels),
                parse_ports(&ps.ports),
            ))
        })
        .collect()
}

impl ContainerRuntime for DockerCli {
    fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        let output = self.exec(&run_args(spec))?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(ContainerError::Parse("docker run printed no container id".into()));
        }
        let handle = ContainerHandle::new(id, spec.labels.clone(), spec.ports.clone());
        info!(container = handle.short_id(), image = %spec.image, "container started");
        Ok(handle)
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.exec(&["stop".to_string(), handle.id.clone()])?;
        self.exec(&["rm".to_string(), handle.id.clone()])?;
        info!(container = handle.short_id(), "container stopped and removed");
        Ok(())
    }

    fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerHandle>, ContainerError> {
        let output = self.exec(&list_args(label, value))?;
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }
}

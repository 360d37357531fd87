//! Container handle - one running kernel container
//!
//! Handles are plain values: they describe a container, they do not own it.
//! Stopping goes through the runtime that started (or found) it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label carrying the session id, used to find a container again later
pub const SESSION_LABEL: &str = "session_id";

/// A published port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    /// Same port number on both sides
    pub fn same(port: u16) -> Self {
        Self {
            host: port,
            container: port,
        }
    }
}

/// What to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub labels: BTreeMap<String, String>,
}

/// A running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime-assigned container id
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, labels: BTreeMap<String, String>, ports: Vec<PortMapping>) -> Self {
        Self {
            id: id.into(),
            labels,
            ports,
        }
    }

    /// Value of the session label, if present
    pub fn session_id(&self) -> Option<&str> {
        self.labels.get(SESSION_LABEL).map(String::as_str)
    }

    /// Host side of the mapping for `container_port`
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container == container_port)
            .map(|p| p.host)
    }

    /// First published host port
    pub fn first_host_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.host)
    }

    /// Short id as shown by `docker ps`
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

//! Host port probing
//!
//! Each sandbox publishes the gateway on its own host port. Starting from
//! the configured base port, the first port that can be bound is taken.

use std::net::TcpListener;

use tracing::debug;

use super::ContainerError;

/// Whether nothing is listening on `port`
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// First free port in `start..=u16::MAX`
pub fn find_free_port(start: u16) -> Result<u16, ContainerError> {
    for port in start..=u16::MAX {
        if is_port_free(port) {
            debug!(port, "port is free");
            return Ok(port);
        }
        debug!(port, "port is occupied");
    }
    Err(ContainerError::NoFreePort { start })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_occupied_port() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let taken = listener.local_addr().unwrap().port();
        assert!(!is_port_free(taken));
        let found = find_free_port(taken).unwrap();
        assert!(found > taken);
    }
}

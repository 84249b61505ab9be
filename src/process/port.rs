use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use crate::error::{CoredeckError, Result};

/// Ports the engine API is offered, in preference order.
pub const CANDIDATE_PORTS: &[u16] = &[8080, 8081, 8082];

/// Select the first candidate port that can be bound on localhost.
pub fn pick_port(candidates: &[u16]) -> Result<u16> {
    for &port in candidates {
        match TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                drop(listener);
                tracing::debug!(port, "selected engine API port");
                return Ok(port);
            }
            Err(e) => {
                tracing::debug!(port, error = %e, "candidate port unavailable");
            }
        }
    }
    Err(CoredeckError::NoFreePort(candidates.to_vec()))
}

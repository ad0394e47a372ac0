use std::net::TcpListener;

use crate::container::error::{ContainerError, Result};

/// Number of candidates tried by [`find_available_port`].
pub const PORT_SCAN_SPAN: u16 = 100;

/// First port at or above `base` that can be bound on `host`.
///
/// The test listener is released before returning, so another process may
/// still claim the port before the endpoint binds it.
pub fn find_available_port(host: &str, base: u16) -> Result<u16> {
    let end = base.saturating_add(PORT_SCAN_SPAN);
    (base..end)
        .find(|port| TcpListener::bind((host, *port)).is_ok())
        .inspect(|port| tracing::debug!("Selected free port {}", port))
        .ok_or(ContainerError::NoFreePort { start: base, end })
}

//! UDP socket setup

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Receive buffer requested from the OS (about 1.5s of DAC packets)
const SOCKET_RECV_BUFFER: usize = 64 * 1024;

/// Bind the socket the DAC sends to.
///
/// The socket gets a read timeout so the receive loop can notice a halt
/// request without the socket being closed underneath it.
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let port = config.udp_port;
    let bind_err = |source: std::io::Error| NetworkError::BindFailed { port, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

    if config.multicast_group.is_some() {
        // Other listeners on the host may watch the same group
        socket.set_reuse_address(true).map_err(bind_err)?;
    }

    if let Err(e) = socket.set_recv_buffer_size(SOCKET_RECV_BUFFER) {
        tracing::debug!("Could not enlarge receive buffer: {}", e);
    }

    let addr = SocketAddr::from((config.bind_address, port));
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;

    socket
        .set_read_timeout(Some(Duration::from_millis(config.recv_timeout_ms.max(1))))
        .map_err(bind_err)?;

    if let Some(group) = config.multicast_group {
        let interface = config.multicast_interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket
            .join_multicast_v4(&group, &interface)
            .map_err(|source| NetworkError::MulticastFailed { group, source })?;
        tracing::info!("Joined multicast group {} on interface {}", group, interface);
    }

    Ok(socket.into())
}

/// Leave the multicast group joined by [`create_socket`], if any.
pub fn leave_multicast(socket: &UdpSocket, config: &NetworkConfig) -> Result<(), NetworkError> {
    if let Some(group) = config.multicast_group {
        let interface = config.multicast_interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket
            .leave_multicast_v4(&group, &interface)
            .map_err(|source| NetworkError::MulticastFailed { group, source })?;
        tracing::info!("Left multicast group {}", group);
    }
    Ok(())
}

//! UDP broadcast transport for magic packets.
//!
//! Each send binds a fresh ephemeral socket on `0.0.0.0:0`, enables
//! `SO_BROADCAST`, and writes the 102-byte payload as one datagram.  Nothing
//! is kept open between sends.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use lanwake_core::MagicPacket;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::application::wake_device::{WakeError, WakeSender};

/// Sends magic packets to a fixed broadcast address and port.
#[derive(Debug, Clone)]
pub struct UdpWakeSender {
    target: SocketAddr,
}

impl UdpWakeSender {
    /// Creates a sender for `broadcast_address:port`.
    pub fn new(broadcast_address: Ipv4Addr, port: u16) -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(broadcast_address, port)),
        }
    }

    /// Creates a sender for an arbitrary destination (unicast works too).
    pub fn to_addr(target: SocketAddr) -> Self {
        Self { target }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl WakeSender for UdpWakeSender {
    async fn send(&self, packet: &MagicPacket) -> Result<(), WakeError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(WakeError::Socket)?;
        socket.set_broadcast(true).map_err(WakeError::Socket)?;

        let bytes = packet.as_bytes();
        let written = socket
            .send_to(bytes, self.target)
            .await
            .map_err(|source| WakeError::Send {
                target: self.target,
                source,
            })?;

        if written != bytes.len() {
            return Err(WakeError::ShortSend {
                target: self.target,
                written,
                expected: bytes.len(),
            });
        }

        debug!(target = %self.target, ?packet, "magic packet datagram written");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! WakeDeviceUseCase: turns a MAC string into a magic packet on the wire.
//!
//! The use case validates the address *before* anything is sent, so a
//! malformed request never produces a datagram.  Transmission itself is behind
//! the [`WakeSender`] trait; the UDP broadcast implementation lives in
//! `infrastructure::network::wol_sender`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use lanwake_core::{InvalidAddress, MacAddress, MagicPacket};
use thiserror::Error;
use tracing::{info, warn};

/// Failure to put a magic packet on the wire.
#[derive(Debug, Error)]
pub enum WakeError {
    /// The ephemeral UDP socket could not be created or configured.
    #[error("failed to prepare broadcast socket: {0}")]
    Socket(#[source] std::io::Error),

    /// The datagram could not be sent to `target`.
    #[error("failed to send magic packet to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes than the full payload were written.
    #[error("short send to {target}: wrote {written} of {expected} bytes")]
    ShortSend {
        target: SocketAddr,
        written: usize,
        expected: usize,
    },
}

/// Trait for transmitting a magic packet.
///
/// Infrastructure implementations broadcast over UDP; test implementations
/// record the payloads they were given.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WakeSender: Send + Sync {
    /// Sends `packet` once.  `Ok` means "sent", never "woken".
    async fn send(&self, packet: &MagicPacket) -> Result<(), WakeError>;
}

/// Error type for the wake use case.
#[derive(Debug, Error)]
pub enum WakeDeviceError {
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),
    #[error(transparent)]
    Send(#[from] WakeError),
}

/// Validates a MAC address and sends its magic packet.
pub struct WakeDeviceUseCase {
    sender: Arc<dyn WakeSender>,
}

impl WakeDeviceUseCase {
    pub fn new(sender: Arc<dyn WakeSender>) -> Self {
        Self { sender }
    }

    /// Parses `mac` and sends one magic packet for it.
    ///
    /// # Errors
    ///
    /// - [`WakeDeviceError::InvalidAddress`] if `mac` is malformed.  Nothing is
    ///   sent in that case.
    /// - [`WakeDeviceError::Send`] if the transport failed.
    pub async fn wake(&self, mac: &str) -> Result<MacAddress, WakeDeviceError> {
        let target = MacAddress::parse(mac)?;
        self.wake_address(target).await?;
        Ok(target)
    }

    /// Sends one magic packet for an already-validated address.
    ///
    /// # Errors
    ///
    /// Returns the transport's [`WakeError`] unchanged.
    pub async fn wake_address(&self, target: MacAddress) -> Result<(), WakeError> {
        let packet = MagicPacket::for_mac(&target);
        match self.sender.send(&packet).await {
            Ok(()) => {
                info!(%target, "magic packet sent");
                Ok(())
            }
            Err(e) => {
                warn!(%target, "magic packet send failed: {e}");
                Err(e)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Mutex;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl WakeSender for RecordingSender {
        async fn send(&self, packet: &MagicPacket) -> Result<(), WakeError> {
            self.sent.lock().unwrap().push(packet.as_bytes().to_vec());
            Ok(())
        }
    }

    fn broadcast_target() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, 9))
    }

    #[tokio::test]
    async fn test_wake_sends_one_packet_for_valid_mac() {
        // Arrange
        let sender = Arc::new(RecordingSender::default());
        let use_case = WakeDeviceUseCase::new(sender.clone());

        // Act
        let target = use_case.wake("AA:BB:CC:DD:EE:FF").await.unwrap();

        // Assert
        assert_eq!(target.to_string(), "AA:BB:CC:DD:EE:FF");
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(MagicPacket::target(&sent[0]), Some(target));
    }

    #[tokio::test]
    async fn test_wake_dash_and_colon_forms_send_identical_bytes() {
        let sender = Arc::new(RecordingSender::default());
        let use_case = WakeDeviceUseCase::new(sender.clone());

        use_case.wake("AA-BB-CC-DD-EE-FF").await.unwrap();
        use_case.wake("AA:BB:CC:DD:EE:FF").await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test]
    async fn test_wake_invalid_mac_sends_nothing() {
        // Arrange: the mock panics if `send` is called at all.
        let mut mock = MockWakeSender::new();
        mock.expect_send().never();
        let use_case = WakeDeviceUseCase::new(Arc::new(mock));

        // Act
        let result = use_case.wake("ZZZZZZ").await;

        // Assert
        assert!(matches!(result, Err(WakeDeviceError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_wake_propagates_send_failure() {
        // Arrange
        let mut mock = MockWakeSender::new();
        mock.expect_send().times(1).returning(|_| {
            Err(WakeError::Send {
                target: broadcast_target(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        });
        let use_case = WakeDeviceUseCase::new(Arc::new(mock));

        // Act
        let err = use_case.wake("AABBCCDDEEFF").await.unwrap_err();

        // Assert
        assert!(matches!(err, WakeDeviceError::Send(WakeError::Send { .. })));
        assert!(err.to_string().contains("255.255.255.255:9"));
    }

    #[tokio::test]
    async fn test_wake_address_skips_parsing() {
        let sender = Arc::new(RecordingSender::default());
        let use_case = WakeDeviceUseCase::new(sender.clone());
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);

        use_case.wake_address(mac).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(MagicPacket::target(&sent[0]), Some(mac));
    }
}

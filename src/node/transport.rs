//! Point-to-point delivery of event frames from a node to its gateway.

use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use crate::message::EventMessage;

/// Outcome reported by the radio's send-confirmation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The peer acknowledged the frame.
    Delivered,
    /// The radio gave up on the frame.
    Failed,
    /// No confirmation arrived within the wait.
    TimedOut,
}

/// A point-to-point radio able to address registered peers.
pub trait Radio {
    type Address: Debug + Clone;

    fn is_initialized(&self) -> bool;

    fn is_peer_registered(&self, peer: &Self::Address) -> bool;

    /// Hand one frame to the radio for a single transmission.
    fn transmit(&mut self, peer: &Self::Address, frame: &[u8]) -> Result<(), RadioError>;

    /// Block until the send confirmation arrives or `timeout` elapses.
    fn await_confirmation(&mut self, timeout: Duration) -> Result<Confirmation, RadioError>;
}

/// Sends event messages to the gateway's fixed peer address.
pub struct NodeTransport<R: Radio> {
    radio: R,
    gateway: R::Address,
    confirm_timeout: Duration,
}

impl<R: Radio> NodeTransport<R> {
    pub fn new(radio: R, gateway: R::Address, confirm_timeout: Duration) -> Self {
        NodeTransport {
            radio,
            gateway,
            confirm_timeout,
        }
    }

    /// Send `message` as one frame and wait for its confirmation.
    ///
    /// Returns `true` only if the confirmation arrives within the bounded
    /// wait. There is no retry; the caller decides what a `false` means.
    #[tracing::instrument(skip(self), fields(gateway = ?self.gateway))]
    pub fn send(&mut self, message: &EventMessage) -> bool {
        match self.try_send(message) {
            Ok(Confirmation::Delivered) => {
                tracing::debug!("send confirmed");
                true
            }
            Ok(outcome) => {
                tracing::warn!(?outcome, "send not confirmed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                false
            }
        }
    }

    fn try_send(&mut self, message: &EventMessage) -> Result<Confirmation, RadioError> {
        if !self.radio.is_initialized() {
            return Err(RadioError::NotInitialized);
        }
        if !self.radio.is_peer_registered(&self.gateway) {
            return Err(RadioError::PeerNotRegistered);
        }

        self.radio.transmit(&self.gateway, &message.encode())?;
        self.radio.await_confirmation(self.confirm_timeout)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

impl<R: Radio> Debug for NodeTransport<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTransport")
            .field("gateway", &self.gateway)
            .field("confirm_timeout", &self.confirm_timeout)
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RadioError {
    #[error("radio is not initialized")]
    NotInitialized,

    #[error("gateway peer is not registered")]
    PeerNotRegistered,

    #[error("radio i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::message::{EventType, FRAME_LEN};

    /// Scriptable radio that records transmitted frames.
    #[derive(Debug, Default)]
    pub(crate) struct MockRadio {
        pub uninitialized: bool,
        pub unregistered: bool,
        pub fail_transmit: bool,
        pub confirmation: Option<Confirmation>,
        pub sent: Vec<Vec<u8>>,
        pub waited: Vec<Duration>,
    }

    impl MockRadio {
        pub(crate) fn delivering() -> Self {
            MockRadio {
                confirmation: Some(Confirmation::Delivered),
                ..MockRadio::default()
            }
        }

        pub(crate) fn silent() -> Self {
            MockRadio {
                confirmation: Some(Confirmation::TimedOut),
                ..MockRadio::default()
            }
        }
    }

    impl Radio for MockRadio {
        type Address = u8;

        fn is_initialized(&self) -> bool {
            !self.uninitialized
        }

        fn is_peer_registered(&self, _peer: &u8) -> bool {
            !self.unregistered
        }

        fn transmit(&mut self, _peer: &u8, frame: &[u8]) -> Result<(), RadioError> {
            if self.fail_transmit {
                return Err(RadioError::Io(std::io::ErrorKind::Other.into()));
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn await_confirmation(&mut self, timeout: Duration) -> Result<Confirmation, RadioError> {
            self.waited.push(timeout);
            Ok(self.confirmation.unwrap_or(Confirmation::TimedOut))
        }
    }

    fn message() -> EventMessage {
        EventMessage::new(1, EventType::Trigger, 5, 3.85, 1_000)
    }

    #[test]
    fn confirmed_send_returns_true() {
        let mut transport = NodeTransport::new(MockRadio::delivering(), 0, Duration::from_millis(1000));
        assert!(transport.send(&message()));

        let radio = transport.radio();
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].len(), FRAME_LEN);
        assert_eq!(EventMessage::decode(&radio.sent[0]).unwrap(), message());
        assert_eq!(radio.waited, vec![Duration::from_millis(1000)]);
    }

    #[test]
    fn missing_confirmation_returns_false_after_one_transmission() {
        let mut transport = NodeTransport::new(MockRadio::silent(), 0, Duration::from_millis(1000));
        assert!(!transport.send(&message()));
        assert_eq!(transport.radio().sent.len(), 1);
    }

    #[test]
    fn failed_confirmation_returns_false() {
        let radio = MockRadio {
            confirmation: Some(Confirmation::Failed),
            ..MockRadio::default()
        };
        let mut transport = NodeTransport::new(radio, 0, Duration::from_millis(1000));
        assert!(!transport.send(&message()));
    }

    #[test]
    fn unregistered_peer_is_not_transmitted_to() {
        let radio = MockRadio {
            unregistered: true,
            ..MockRadio::delivering()
        };
        let mut transport = NodeTransport::new(radio, 0, Duration::from_millis(1000));
        assert!(!transport.send(&message()));
        assert!(transport.radio().sent.is_empty());
    }

    #[test]
    fn uninitialized_radio_fails_fast() {
        let radio = MockRadio {
            uninitialized: true,
            ..MockRadio::delivering()
        };
        let mut transport = NodeTransport::new(radio, 0, Duration::from_millis(1000));
        assert!(!transport.send(&message()));
        assert!(transport.radio().waited.is_empty());
    }

    #[test]
    fn transmit_error_returns_false() {
        let radio = MockRadio {
            fail_transmit: true,
            ..MockRadio::delivering()
        };
        let mut transport = NodeTransport::new(radio, 0, Duration::from_millis(1000));
        assert!(!transport.send(&message()));
        assert!(transport.radio().waited.is_empty());
    }
}

//! Abstract duplex channel
//!
//! The engine consumes one [`Channel`] per connection: a [`FrameSink`] for
//! outbound frames and an inbound byte stream. Any transport (WebSocket,
//! in-memory) plugs in by pumping bytes through a [`Link`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

/// Identity of a connection; the charge point id
pub type ConnectionId = String;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
}

/// Outbound half of a connection. Sending never blocks.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;
}

impl FrameSink for mpsc::UnboundedSender<Vec<u8>> {
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, frame).map_err(|_| TransportError::Closed)
    }
}

/// Engine side of a connection
pub struct Channel {
    pub id: ConnectionId,
    pub sink: Arc<dyn FrameSink>,
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Transport side of a connection
#[derive(Debug)]
pub struct Link {
    /// Bytes received from the peer go here
    pub to_engine: mpsc::UnboundedSender<Vec<u8>>,
    /// Bytes the engine wants sent come out here
    pub from_engine: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// A channel and the link a transport uses to drive it
pub fn channel(id: impl Into<ConnectionId>) -> (Channel, Link) {
    let (to_engine, inbound) = mpsc::unbounded_channel();
    let (outbound, from_engine) = mpsc::unbounded_channel();
    let channel = Channel {
        id: id.into(),
        sink: Arc::new(outbound),
        inbound,
    };
    (channel, Link { to_engine, from_engine })
}

/// Two channels wired back to back, both carrying identity `id`
pub fn loopback(id: impl Into<ConnectionId>) -> (Channel, Channel) {
    let id = id.into();
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let a = Channel {
        id: id.clone(),
        sink: Arc::new(a_tx),
        inbound: a_rx,
    };
    let b = Channel {
        id,
        sink: Arc::new(b_tx),
        inbound: b_rx,
    };
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_link_wiring() {
        let (mut channel, mut link) = channel("CP-1");

        channel.sink.send(b"out".to_vec()).unwrap();
        assert_eq!(link.from_engine.recv().await.unwrap(), b"out".to_vec());

        link.to_engine.send(b"in".to_vec()).unwrap();
        assert_eq!(channel.inbound.recv().await.unwrap(), b"in".to_vec());
    }

    #[tokio::test]
    async fn test_loopback_is_cross_wired() {
        let (a, mut b) = loopback("CP-1");
        assert_eq!(a.id, b.id);

        a.sink.send(b"ping".to_vec()).unwrap();
        assert_eq!(b.inbound.recv().await.unwrap(), b"ping".to_vec());
    }

    #[test]
    fn test_send_after_peer_dropped() {
        let (channel, link) = channel("CP-1");
        drop(link);
        assert_eq!(channel.sink.send(vec![1]), Err(TransportError::Closed));
    }
}

//! Outbound frame transport seam.

/// Ships frames to the remote endpoint of a connection.
///
/// This is the boundary between the protocol engine and the transport
/// (typically a WebSocket). Implementations return true when the frame was
/// handed to the transport; false is non-fatal everywhere in the engine.
/// In particular, flushing unsubscribes over an already-dead socket during
/// close is allowed to fail silently.
pub trait FrameSender: Send + Sync {
    /// Sends a text frame.
    fn send_text(&self, text: &str) -> bool;

    /// Sends a binary frame. Reserved; WAMP v1 traffic is text.
    fn send_binary(&self, data: &[u8]) -> bool;
}

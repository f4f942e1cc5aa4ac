//! # Radio Link Boundary
//!
//! The radio transport (serial enumeration, packet framing, encryption) lives
//! outside this crate. What the station consumes is narrow: hand a payload to
//! the link for a destination address, optionally requesting an acknowledgment,
//! and get back an opaque packet id; acknowledgment and routing-error events
//! arrive later, asynchronously, keyed by that id.
//!
//! Events travel over a tokio mpsc channel rather than a callback so there is
//! exactly one consumer (the station's ack pump) and no shared-memory races
//! with the tick loop.
//!
//! [`loopback`] provides an in-process implementation for the `simulate`
//! command and for integration tests.

use thiserror::Error;
use tokio::sync::mpsc;

pub mod loopback;

/// Channel half the link uses to publish ack/nak events.
pub type AckEventSender = mpsc::UnboundedSender<AckEvent>;
/// Channel half the station consumes events from.
pub type AckEventReceiver = mpsc::UnboundedReceiver<AckEvent>;

/// One outgoing payload handed to the radio.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub payload: String,
    /// Destination node address.
    pub dest: u32,
    /// Request a routing acknowledgment for this packet.
    pub want_ack: bool,
    /// Channel index (0 = primary).
    pub channel: u32,
    pub hop_limit: u8,
}

/// Acknowledgment or routing-error event reported by the radio for a
/// previously sent packet.
///
/// `from` is the address of the node that originated the routing reply. The
/// radio reports "packet accepted by the local node" through the same event
/// shape as "packet accepted by the destination"; only comparing `from`
/// against our own address tells them apart.
#[derive(Debug, Clone)]
pub struct AckEvent {
    pub id: u32,
    pub from: u32,
    /// Routing error code when the packet failed; `None` for an ack.
    pub error_reason: Option<i32>,
}

/// Map a Meshtastic routing error code to a short label for logs.
/// Unknown codes fall back to the numeric form.
pub fn reason_label(reason: i32) -> String {
    match reason {
        0 => "none".to_string(),
        1 => "no-route".to_string(),
        2 => "got-nak".to_string(),
        3 => "timeout".to_string(),
        5 => "no-interface".to_string(),
        6 => "max-retransmit".to_string(),
        7 => "no-channel".to_string(),
        8 => "too-large".to_string(),
        9 => "no-response".to_string(),
        10 => "duty-cycle-limit".to_string(),
        32 => "bad-request".to_string(),
        33 => "not-authorized".to_string(),
        other => format!("code-{}", other),
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    /// The link is not usable; the caller should mark itself disconnected
    /// and go through the reconnection manager before retrying.
    #[error("radio link is down")]
    Down,
    #[error("radio rejected send: {0}")]
    Rejected(String),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Narrow boundary to the radio stack.
///
/// Implementations own their serial port / socket / simulation state and push
/// [`AckEvent`]s into the channel they were constructed with for as long as
/// the connection lives.
pub trait RadioLink: Send {
    /// Hand a payload to the radio. Returns the transport-assigned packet id,
    /// unique among packets currently in flight.
    fn send(&mut self, req: &SendRequest) -> Result<u32, LinkError>;

    fn is_connected(&self) -> bool;

    /// (Re)establish the link. Returns the local node address, which may
    /// differ from the address before a reconnect.
    fn connect(&mut self) -> Result<u32, LinkError>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::reason_label;

    #[test]
    fn reason_labels_cover_common_codes() {
        assert_eq!(reason_label(3), "timeout");
        assert_eq!(reason_label(6), "max-retransmit");
        assert_eq!(reason_label(99), "code-99");
    }
}

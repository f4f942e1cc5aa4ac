//! In-process radio link used by `meshwx simulate` and by integration tests.
//! Packets never leave the process; the link synthesizes routing replies
//! after a short delay according to its configured behavior.

use std::time::Duration;

use log::debug;
use rand::Rng;
use tokio::sync::mpsc;

use super::{AckEvent, AckEventReceiver, AckEventSender, LinkError, RadioLink, SendRequest};

/// How the loopback link answers each send.
#[derive(Debug, Clone, Copy)]
pub enum AckBehavior {
    /// Every packet is acknowledged by its destination.
    Ack,
    /// Every packet is only ever confirmed by the local node (queued, never
    /// delivered) - exercises the implicit-ack classification.
    ImplicitAck,
    /// Every packet fails with the given routing error code.
    Nak(i32),
    /// No routing reply at all - exercises expiry and retry.
    Silent,
    /// Per-packet dice roll: ack with probability `ack`, nak with
    /// probability `nak`, otherwise silence.
    Lossy { ack: f64, nak: f64 },
}

pub struct LoopbackLink {
    local_addr: u32,
    connected: bool,
    next_id: u32,
    behavior: AckBehavior,
    reply_delay: Duration,
    events: AckEventSender,
}

impl LoopbackLink {
    pub fn new(local_addr: u32, behavior: AckBehavior) -> (Self, AckEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Non-zero starting id; zero is reserved as "no id" by the radio proto.
        let mut first: u32 = rand::random();
        if first == 0 {
            first = 1;
        }
        (
            Self {
                local_addr,
                connected: false,
                next_id: first,
                behavior,
                reply_delay: Duration::from_millis(150),
                events: tx,
            },
            rx,
        )
    }

    /// A link that always delivers and always acks.
    pub fn reliable(local_addr: u32) -> (Self, AckEventReceiver) {
        Self::new(local_addr, AckBehavior::Ack)
    }

    pub fn set_reply_delay(&mut self, delay: Duration) {
        self.reply_delay = delay;
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        id
    }
}

impl RadioLink for LoopbackLink {
    fn send(&mut self, req: &SendRequest) -> Result<u32, LinkError> {
        if !self.connected {
            return Err(LinkError::Down);
        }
        let id = self.allocate_id();
        let reply = match self.behavior {
            AckBehavior::Ack => Some((req.dest, None)),
            AckBehavior::ImplicitAck => Some((self.local_addr, None)),
            AckBehavior::Nak(reason) => Some((req.dest, Some(reason))),
            AckBehavior::Silent => None,
            AckBehavior::Lossy { ack, nak } => {
                let roll: f64 = rand::thread_rng().gen();
                if roll < ack {
                    Some((req.dest, None))
                } else if roll < ack + nak {
                    // Meshtastic MAX_RETRANSMIT
                    Some((req.dest, Some(6)))
                } else {
                    None
                }
            }
        };
        debug!(
            "loopback: accepted id={} dest=0x{:08x} want_ack={} reply={:?}",
            id, req.dest, req.want_ack, reply
        );
        if let Some((from, error_reason)) = reply {
            // Only reply when the sender asked for confirmation, like the
            // real radio does for want_ack packets.
            if req.want_ack {
                let tx = self.events.clone();
                let delay = self.reply_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(AckEvent {
                        id,
                        from,
                        error_reason,
                    });
                });
            }
        }
        Ok(id)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self) -> Result<u32, LinkError> {
        self.connected = true;
        Ok(self.local_addr)
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

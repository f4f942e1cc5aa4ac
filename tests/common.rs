//! Shared helpers for integration tests: a scripted radio link with
//! per-destination behavior and a small station config.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meshwx::config::{Config, PeerEntry};
use meshwx::transport::{
    AckEvent, AckEventReceiver, AckEventSender, LinkError, RadioLink, SendRequest,
};
use tokio::sync::mpsc;

/// What the scripted link does with a want_ack packet to a destination.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedReply {
    /// Routing reply from the destination itself (a real ack).
    AckFromDest,
    /// Routing reply from our own node (local queue confirmation only).
    AckFromLocal,
    /// Routing error with the given reason code.
    Nak(i32),
    /// Never answers.
    Silent,
}

/// Deterministic in-process link. Events are pushed synchronously at send
/// time; the current-thread test runtime delivers them to the ack pump at
/// the next await point, after registration.
pub struct ScriptedLink {
    pub local_addr: u32,
    connected: bool,
    next_id: u32,
    default_reply: ScriptedReply,
    per_dest: HashMap<u32, ScriptedReply>,
    events: AckEventSender,
    sends: Arc<Mutex<Vec<SendRequest>>>,
}

impl ScriptedLink {
    pub fn new(
        local_addr: u32,
        default_reply: ScriptedReply,
    ) -> (Self, AckEventReceiver, Arc<Mutex<Vec<SendRequest>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sends = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                local_addr,
                connected: false,
                next_id: 100,
                default_reply,
                per_dest: HashMap::new(),
                events: tx,
                sends: sends.clone(),
            },
            rx,
            sends,
        )
    }

    pub fn reply_for(mut self, dest: u32, reply: ScriptedReply) -> Self {
        self.per_dest.insert(dest, reply);
        self
    }
}

impl RadioLink for ScriptedLink {
    fn send(&mut self, req: &SendRequest) -> Result<u32, LinkError> {
        if !self.connected {
            return Err(LinkError::Down);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.sends.lock().unwrap().push(req.clone());
        if req.want_ack {
            let reply = self
                .per_dest
                .get(&req.dest)
                .copied()
                .unwrap_or(self.default_reply);
            let event = match reply {
                ScriptedReply::AckFromDest => Some(AckEvent {
                    id,
                    from: req.dest,
                    error_reason: None,
                }),
                ScriptedReply::AckFromLocal => Some(AckEvent {
                    id,
                    from: self.local_addr,
                    error_reason: None,
                }),
                ScriptedReply::Nak(reason) => Some(AckEvent {
                    id,
                    from: req.dest,
                    error_reason: Some(reason),
                }),
                ScriptedReply::Silent => None,
            };
            if let Some(event) = event {
                let _ = self.events.send(event);
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

pub const ADDR_A: u32 = 0x0000_0001;
pub const ADDR_B: u32 = 0x0000_0002;
pub const ADDR_C: u32 = 0x0000_0003;
/// An address that is not in the peer table.
pub const ADDR_STRANGER: u32 = 0x0000_0099;

/// Config with peers A/B/C, selected target C, default delivery timings,
/// stats file inside `dir`.
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.peers = vec![
        PeerEntry {
            name: "A".to_string(),
            address: ADDR_A.to_string(),
        },
        PeerEntry {
            name: "B".to_string(),
            address: ADDR_B.to_string(),
        },
        PeerEntry {
            name: "C".to_string(),
            address: ADDR_C.to_string(),
        },
    ];
    config.station.selected_peer = "C".to_string();
    config.storage.stats_file = dir
        .path()
        .join("signal_stats.json")
        .to_string_lossy()
        .into_owned();
    config.logging.file = None;
    config
}

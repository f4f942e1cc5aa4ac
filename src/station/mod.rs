//! # Station - Sensing-Tick Orchestration
//!
//! The context object that owns everything the delivery subsystem needs:
//! peer registry, delivery tracker, signal tracker, template table, and the
//! radio link handle. Constructed once at startup and driven by the
//! surrounding application twice per tick:
//!
//! - [`Station::on_tick`] - housekeeping that runs every tick no matter
//!   what: reconnection (rate-limited) and pending-entry expiry.
//! - [`Station::submit_reading`] - the send → wait → classify →
//!   (retry | confirm | give-up) protocol for one reading, returning a
//!   [`DeliveryOutcome`] for the batch.
//!
//! Three background tasks are spawned at construction: the **ack pump**
//! (sole consumer of the transport's event channel, feeds the delivery
//! tracker and schedules confirmation replies), the **dispatcher** (owns the
//! due-time queue), and the **executor** (performs deferred sends through
//! the shared link handle). The tick path itself only ever sleeps for the
//! short post-send ack window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Local;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::config::{Config, StationConfig, TransportConfig};
use crate::delivery::{AckClass, DeliveryOutcome, DeliveryStatus, DeliveryTracker};
use crate::logutil::escape_log;
use crate::metrics;
use crate::peers::PeerRegistry;
use crate::signal::{SignalStats, SignalTracker};
use crate::template::{Reading, RenderContext, Templates};
use crate::transport::{AckEventReceiver, RadioLink, SendRequest};

pub mod fanout;
pub mod reconnect;
pub mod scheduler;

use reconnect::{LinkHealth, ReconnectManager};
use scheduler::{start_dispatcher, DeferredTask, DispatcherHandle, RetryTarget};

/// Radio link shared between the tick path and the deferred-task executor.
pub type SharedLink = Arc<Mutex<Box<dyn RadioLink>>>;

/// One per-peer observation sampled off the radio's node table this tick.
#[derive(Debug, Clone)]
pub struct SignalObservation {
    pub peer: String,
    pub snr: f32,
    pub hops: Option<u32>,
}

/// Mesh context supplied by the surrounding glue alongside each reading.
#[derive(Debug, Clone, Default)]
pub struct PeerContext {
    pub online_nodes: Option<u32>,
    pub total_nodes: Option<u32>,
    pub observations: Vec<SignalObservation>,
}

/// Payload for the deferred confirmation reply, quoting the signal we saw
/// toward the peer when the confirmed reading went out.
pub fn confirmation_payload(signal: Option<f32>) -> String {
    match signal {
        Some(s) => format!("rx ok; snr {:.1}", s),
        None => "rx ok; snr --".to_string(),
    }
}

pub struct Station {
    station_cfg: StationConfig,
    transport_cfg: TransportConfig,
    registry: PeerRegistry,
    tracker: DeliveryTracker,
    signals: SignalTracker,
    templates: Templates,
    link: SharedLink,
    dispatcher: DispatcherHandle,
    retry_live: Arc<AtomicBool>,
    retry_notify: Arc<Notify>,
    reconnect: ReconnectManager,
    self_name: Option<String>,
}

impl Station {
    /// Build the station and spawn its background tasks. Must be called
    /// inside a tokio runtime. The link starts unconnected; the first
    /// `on_tick` dials it.
    pub fn new(
        config: Config,
        link: Box<dyn RadioLink>,
        events: AckEventReceiver,
    ) -> Result<Self> {
        let registry = PeerRegistry::from_entries(
            config
                .peers
                .iter()
                .map(|p| (p.name.as_str(), p.address.as_str())),
        )?;
        let tracker = DeliveryTracker::new();
        let signals = SignalTracker::load(&config.storage.stats_file);
        let templates = Templates::new(
            config.message_templates.clone(),
            &config.station.message_template,
        );
        let link: SharedLink = Arc::new(Mutex::new(link));
        let retry_live = Arc::new(AtomicBool::new(false));
        let retry_notify = Arc::new(Notify::new());

        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let dispatcher = start_dispatcher(due_tx);

        spawn_ack_pump(
            events,
            tracker.clone(),
            dispatcher.clone(),
            registry.clone(),
            &config.station,
        );
        spawn_task_executor(
            due_rx,
            link.clone(),
            tracker.clone(),
            &config.station,
            &config.transport,
            retry_live.clone(),
            retry_notify.clone(),
        );

        let reconnect = ReconnectManager::new(config.station.reconnect_interval_duration());
        Ok(Self {
            station_cfg: config.station,
            transport_cfg: config.transport,
            registry,
            tracker,
            signals,
            templates,
            link,
            dispatcher,
            retry_live,
            retry_notify,
            reconnect,
            self_name: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().expect("link mutex poisoned").is_connected()
    }

    /// Configured peer name the connected node resolved to, if any.
    pub fn self_peer(&self) -> Option<&str> {
        self.self_name.as_deref()
    }

    pub fn signal_stats(&self, peer: &str) -> Option<&SignalStats> {
        self.signals.snapshot(peer)
    }

    pub fn all_signal_stats(&self) -> &std::collections::BTreeMap<String, SignalStats> {
        self.signals.all()
    }

    /// Housekeeping that runs every sensing tick whether or not a reading
    /// was available: rate-limited reconnection and the expiry sweep.
    pub async fn on_tick(&mut self) {
        let health = {
            let mut link = self.link.lock().expect("link mutex poisoned");
            self.reconnect.ensure_connected(link.as_mut())
        };
        if let LinkHealth::Reconnected(addr) = health {
            self.adopt_local_address(addr);
        }
        self.tracker
            .sweep_expired(self.station_cfg.pending_max_age_duration());
    }

    fn adopt_local_address(&mut self, addr: u32) {
        self.tracker.set_local_address(addr);
        self.self_name = self.registry.resolve_self(addr).map(String::from);
        match &self.self_name {
            Some(name) => info!(
                "local node 0x{:08x} is configured peer '{}'; fan-out mode",
                addr, name
            ),
            None => info!(
                "local node 0x{:08x} is not in the peer table; sending to '{}' only",
                addr, self.station_cfg.selected_peer
            ),
        }
    }

    /// Relay one reading to the current target set and report how delivery
    /// went. Blocks for the ack window when ack mode is on; any peer still
    /// unconfirmed afterwards gets exactly one deferred retry.
    pub async fn submit_reading(
        &mut self,
        reading: &Reading,
        ctx: &PeerContext,
    ) -> Result<DeliveryOutcome> {
        // Signal statistics update regardless of what delivery does.
        for obs in &ctx.observations {
            self.signals.record(&obs.peer, obs.snr);
        }

        // Serialize behind an outstanding retry cycle.
        self.await_retry_drain().await;

        if !self.is_connected() {
            warn!("link down; skipping reading send this tick");
            return Ok(DeliveryOutcome::default());
        }

        let targets = fanout::resolve_targets(
            &self.registry,
            self.self_name.as_deref(),
            &self.station_cfg.selected_peer,
        )?;
        if targets.is_empty() {
            warn!("peer table leaves no targets; nothing to send");
            return Ok(DeliveryOutcome::default());
        }

        let payload = {
            let first_target = targets[0].0;
            let obs = ctx.observations.iter().find(|o| o.peer == first_target);
            let render = RenderContext {
                online_nodes: ctx.online_nodes,
                total_nodes: ctx.total_nodes,
                snr: obs.map(|o| o.snr).or_else(|| {
                    self.signals
                        .snapshot(first_target)
                        .and_then(|s| s.recent.back().copied())
                }),
                hops: obs.and_then(|o| o.hops),
            };
            self.templates.render(reading, &render, Local::now())
        };

        let want_ack = self.station_cfg.ack_mode;
        let mut batch: Vec<(String, u32)> = Vec::new();
        let mut sent = 0usize;
        for (name, address) in &targets {
            let req = SendRequest {
                payload: payload.clone(),
                dest: *address,
                want_ack,
                channel: self.transport_cfg.channel,
                hop_limit: self.transport_cfg.hop_limit,
            };
            let outcome = {
                let mut link = self.link.lock().expect("link mutex poisoned");
                link.send(&req)
            };
            match outcome {
                Ok(id) => {
                    sent += 1;
                    metrics::inc_readings_sent();
                    info!(
                        "sent reading to {} (0x{:08x}) id={} '{}'",
                        name,
                        address,
                        id,
                        escape_log(&payload)
                    );
                    if want_ack {
                        let signal_at_send = self
                            .signals
                            .snapshot(name)
                            .and_then(|s| s.recent.back().copied());
                        self.tracker.register(id, name, signal_at_send);
                        batch.push((name.to_string(), id));
                    }
                }
                Err(e) => {
                    error!(
                        "send to {} (0x{:08x}) failed: {} (reconnect manager will recover)",
                        name, address, e
                    );
                }
            }
        }

        if !want_ack {
            debug!("ack mode off; batch of {} complete at send time", sent);
            return Ok(DeliveryOutcome::fire_and_forget(sent));
        }

        // Short bounded wait for immediate acks; nothing else happens on the
        // tick path during this window.
        tokio::time::sleep(self.station_cfg.ack_window_duration()).await;

        let outcome = self.tracker.outcome(&batch);
        info!(
            "delivery outcome: {} sent, {} acked, {} pending, {} naked",
            outcome.sent,
            outcome.acked.len(),
            outcome.pending.len(),
            outcome.naked.len()
        );

        if !outcome.pending.is_empty() {
            let retry_targets: Vec<RetryTarget> = batch
                .iter()
                .filter(|(peer, _)| outcome.pending.contains(peer))
                .filter_map(|(peer, id)| {
                    let address = self.registry.lookup(peer).ok()?;
                    Some(RetryTarget {
                        peer: peer.clone(),
                        address,
                        original_id: *id,
                        signal: self
                            .signals
                            .snapshot(peer)
                            .and_then(|s| s.recent.back().copied()),
                    })
                })
                .collect();
            if !retry_targets.is_empty() {
                self.retry_live.store(true, Ordering::SeqCst);
                info!(
                    "scheduling single retry for {} peer(s) in {}s",
                    retry_targets.len(),
                    self.station_cfg.retry_delay
                );
                self.dispatcher.schedule(
                    self.station_cfg.retry_delay_duration(),
                    DeferredTask::Retry {
                        payload,
                        targets: retry_targets,
                    },
                );
            }
        }

        Ok(outcome)
    }

    async fn await_retry_drain(&self) {
        while self.retry_live.load(Ordering::SeqCst) {
            debug!("previous retry cycle still outstanding; holding this batch");
            self.retry_notify.notified().await;
        }
    }

    /// Stop deferred dispatch, flush signal statistics, drop the link. Any
    /// packet still in flight is the radio's to lose.
    pub async fn shutdown(&mut self) {
        self.dispatcher.shutdown().await;
        if let Err(e) = self.signals.persist() {
            warn!("final signal stats persist failed: {}", e);
        }
        self.link.lock().expect("link mutex poisoned").close();
        info!("station shut down");
    }
}

/// Sole consumer of the transport's ack/nak events. Classification happens
/// in the tracker; a real ack (when confirmations are on) schedules the
/// deferred confirmation reply from here so it runs off the tick path.
fn spawn_ack_pump(
    mut events: AckEventReceiver,
    tracker: DeliveryTracker,
    dispatcher: DispatcherHandle,
    registry: PeerRegistry,
    cfg: &StationConfig,
) {
    let confirmations = cfg.confirmations;
    let confirm_wait = cfg.confirm_wait_duration();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let AckClass::Acked {
                peer,
                signal_at_send,
            } = tracker.on_event(&event)
            {
                if confirmations {
                    match registry.lookup(&peer) {
                        Ok(address) => {
                            debug!(
                                "confirmation to {} scheduled in {:?}",
                                peer, confirm_wait
                            );
                            dispatcher.schedule(
                                confirm_wait,
                                DeferredTask::Confirmation {
                                    peer,
                                    address,
                                    signal: signal_at_send,
                                },
                            );
                        }
                        Err(e) => warn!("cannot schedule confirmation: {}", e),
                    }
                }
            }
        }
        debug!("ack event channel closed; pump exiting");
    });
}

/// Executes deferred tasks against the shared link: confirmation replies
/// (no ack requested, so acks never ack acks) and the single per-batch
/// retry cycle.
fn spawn_task_executor(
    mut due_rx: mpsc::UnboundedReceiver<DeferredTask>,
    link: SharedLink,
    tracker: DeliveryTracker,
    station_cfg: &StationConfig,
    transport_cfg: &TransportConfig,
    retry_live: Arc<AtomicBool>,
    retry_notify: Arc<Notify>,
) {
    let ack_mode = station_cfg.ack_mode;
    let ack_window = station_cfg.ack_window_duration();
    let channel = transport_cfg.channel;
    let hop_limit = transport_cfg.hop_limit;
    tokio::spawn(async move {
        while let Some(task) = due_rx.recv().await {
            match task {
                DeferredTask::Confirmation {
                    peer,
                    address,
                    signal,
                } => {
                    let req = SendRequest {
                        payload: confirmation_payload(signal),
                        dest: address,
                        want_ack: false,
                        channel,
                        hop_limit,
                    };
                    let sent = {
                        let mut link = link.lock().expect("link mutex poisoned");
                        link.send(&req)
                    };
                    match sent {
                        Ok(id) => {
                            metrics::inc_confirmations_sent();
                            info!("confirmation sent to {} id={}", peer, id);
                        }
                        Err(e) => warn!("confirmation to {} failed: {}", peer, e),
                    }
                }
                DeferredTask::Retry { payload, targets } => {
                    let mut resent: Vec<(String, u32)> = Vec::new();
                    for target in targets {
                        // A late ack between scheduling and now cancels the
                        // resend for that peer.
                        if tracker.status(target.original_id) == DeliveryStatus::Acked {
                            debug!("late ack from {}; retry not needed", target.peer);
                            continue;
                        }
                        let req = SendRequest {
                            payload: payload.clone(),
                            dest: target.address,
                            want_ack: ack_mode,
                            channel,
                            hop_limit,
                        };
                        let outcome = {
                            let mut link = link.lock().expect("link mutex poisoned");
                            link.send(&req)
                        };
                        match outcome {
                            Ok(id) => {
                                metrics::inc_retried();
                                metrics::inc_readings_sent();
                                tracker.register(id, &target.peer, target.signal);
                                info!("retry sent to {} id={}", target.peer, id);
                                resent.push((target.peer, id));
                            }
                            Err(e) => warn!("retry send to {} failed: {}", target.peer, e),
                        }
                    }
                    // Retry cycle counts as drained once its sends are
                    // issued; the next batch may go out.
                    retry_live.store(false, Ordering::SeqCst);
                    retry_notify.notify_one();

                    if !resent.is_empty() {
                        let tracker = tracker.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(ack_window).await;
                            let outcome = tracker.outcome(&resent);
                            for peer in &outcome.acked {
                                info!("retry delivered to {}", peer);
                            }
                            for peer in &outcome.pending {
                                warn!(
                                    "retry to {} still unconfirmed; giving up until next reading",
                                    peer
                                );
                            }
                            for peer in &outcome.naked {
                                warn!("retry to {} failed", peer);
                            }
                        });
                    }
                }
            }
        }
        debug!("deferred task channel closed; executor exiting");
    });
}

//! # Meshwx - Weather Station Relay for Meshtastic Networks
//!
//! Meshwx reads an environmental sensor on a schedule and relays each reading
//! to one or more Meshtastic peers with best-effort delivery confirmation.
//! The crate implements the delivery side of that loop: fan-out targeting,
//! per-packet acknowledgment tracking, retry and confirmation scheduling,
//! link reconnection, and per-peer signal-quality statistics.
//!
//! Sensor polling, the interactive menu, CSV audit logging, and the radio
//! transport itself (serial framing, encryption) are external collaborators.
//! The transport is consumed through the [`transport::RadioLink`] trait:
//! "send a payload to an address, optionally requesting an ack, returning a
//! packet id" plus an asynchronous stream of [`transport::AckEvent`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshwx::config::Config;
//! use meshwx::station::Station;
//! use meshwx::transport::loopback::LoopbackLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (link, events) = LoopbackLink::reliable(0x0a0b0c0d);
//!     let mut station = Station::new(config, Box::new(link), events)?;
//!     station.on_tick().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`station`] - Sensing-tick orchestration: fan-out, retry, confirmation
//! - [`delivery`] - Pending-message table and ack classification
//! - [`signal`] - Per-peer signal-quality statistics with persistence
//! - [`peers`] - Configured peer registry and self-identity resolution
//! - [`transport`] - Radio link boundary and the in-process loopback link
//! - [`template`] - Outgoing message template rendering
//! - [`config`] - Configuration management
//!
//! ## Architecture
//!
//! One primary control flow drives the sensing tick. The transport delivers
//! ack/nak events on its own task; a spawned pump feeds them to the delivery
//! tracker, which is the only state shared across tasks (and is locked
//! accordingly). Deferred work (retries, confirmation replies) goes through
//! an explicit due-time queue drained by a dispatcher task, so nothing ever
//! sleeps on the tick path except the short post-send ack window.

pub mod config;
pub mod delivery;
pub mod logutil;
pub mod metrics;
pub mod peers;
pub mod signal;
pub mod station;
pub mod template;
pub mod transport;

//! # Signal Quality Tracker
//!
//! Rolling per-peer SNR statistics: lifetime min/max/mean plus a bounded
//! window of the most recent samples for trend display. Observations are fed
//! in once per sensing tick from whatever the surrounding glue sampled off
//! the radio's node table; delivery outcome plays no part here.
//!
//! The whole table is persisted to a JSON stats file every tenth sample per
//! peer, bounding both write amplification and crash loss (at most nine
//! samples per peer). Persistence failures are logged and never surface to
//! the caller - the in-memory table stays authoritative.
//!
//! Only the sensing tick mutates this tracker, so it carries no lock of its
//! own.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Samples kept for trend display.
pub const RECENT_WINDOW: usize = 100;
/// Persist the table every Nth sample for a given peer.
const SAVE_EVERY: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalStats {
    pub min: f32,
    pub max: f32,
    /// Running mean over every sample ever seen, not just the window.
    pub mean: f64,
    pub sample_count: u64,
    /// Strictly the last [`RECENT_WINDOW`] samples, oldest first.
    pub recent: VecDeque<f32>,
}

impl SignalStats {
    fn first(sample: f32) -> Self {
        let mut recent = VecDeque::with_capacity(RECENT_WINDOW);
        recent.push_back(sample);
        Self {
            min: sample,
            max: sample,
            mean: sample as f64,
            sample_count: 1,
            recent,
        }
    }

    fn update(&mut self, sample: f32) {
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.mean = (self.mean * self.sample_count as f64 + sample as f64)
            / (self.sample_count + 1) as f64;
        self.sample_count += 1;
        self.recent.push_back(sample);
        while self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }
    }
}

/// Per-peer statistics table with periodic persistence.
pub struct SignalTracker {
    stats: BTreeMap<String, SignalStats>,
    path: PathBuf,
}

impl SignalTracker {
    /// Load the stats file if present; a missing or unreadable file starts
    /// the table empty (logged, never fatal).
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let stats = match Self::read_file(&path) {
            Ok(Some(table)) => {
                debug!(
                    "loaded signal stats for {} peer(s) from {}",
                    table.len(),
                    path.display()
                );
                table
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(
                    "could not read signal stats file {}: {} (starting empty)",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };
        Self { stats, path }
    }

    fn read_file(path: &Path) -> Result<Option<BTreeMap<String, SignalStats>>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let table = serde_json::from_str(&content)
            .map_err(|e| anyhow!("malformed stats file: {}", e))?;
        Ok(Some(table))
    }

    /// Record one SNR observation for a peer. Persists the full table on
    /// every tenth sample for that peer.
    pub fn record(&mut self, peer: &str, snr: f32) {
        let sample_count = {
            let entry = self
                .stats
                .entry(peer.to_string())
                .and_modify(|s| s.update(snr))
                .or_insert_with(|| SignalStats::first(snr));
            entry.sample_count
        };
        if sample_count % SAVE_EVERY == 0 {
            if let Err(e) = self.persist() {
                warn!("signal stats persist failed: {} (keeping in-memory)", e);
            }
        }
    }

    pub fn snapshot(&self, peer: &str) -> Option<&SignalStats> {
        self.stats.get(peer)
    }

    pub fn all(&self) -> &BTreeMap<String, SignalStats> {
        &self.stats
    }

    /// Overwrite the stats file with the full table. Exclusive-locked so a
    /// concurrent reporting process never sees a half-written file.
    pub fn persist(&self) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let body = serde_json::to_string_pretty(&self.stats)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        debug!(
            "persisted signal stats ({} peers) to {}",
            self.stats.len(),
            self.path.display()
        );
        Ok(())
    }
}

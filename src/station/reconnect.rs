//! Link reconnection with a minimum interval between attempts.
//!
//! USB radios come and go; the rule is simply "never hammer the port". An
//! attempt is made only when the link reports disconnected and at least the
//! configured interval has passed since the previous attempt. Failures are
//! logged and retried on later ticks forever.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::metrics;
use crate::transport::RadioLink;

/// What `ensure_connected` found (and possibly did).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Link was already up; nothing to do.
    Connected,
    /// Link was down and a reconnect succeeded. Carries the (possibly new)
    /// local node address - the caller must re-resolve identity.
    Reconnected(u32),
    /// Link is down; no attempt made or the attempt failed.
    Down,
}

pub struct ReconnectManager {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectManager {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    pub fn ensure_connected(&mut self, link: &mut dyn RadioLink) -> LinkHealth {
        if link.is_connected() {
            return LinkHealth::Connected;
        }
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.interval {
                debug!(
                    "link down; next reconnect attempt in {:?}",
                    self.interval - last.elapsed()
                );
                return LinkHealth::Down;
            }
        }
        self.last_attempt = Some(Instant::now());
        metrics::inc_reconnect_attempts();
        info!("link down; attempting reconnect");
        match link.connect() {
            Ok(addr) => {
                info!("reconnected; local node is 0x{:08x}", addr);
                LinkHealth::Reconnected(addr)
            }
            Err(e) => {
                warn!("reconnect failed: {} (will retry)", e);
                LinkHealth::Down
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LinkError, SendRequest};

    /// Link that counts connect attempts and can be told to fail them.
    struct FlakyLink {
        connected: bool,
        attempts: u32,
        fail_connect: bool,
    }

    impl RadioLink for FlakyLink {
        fn send(&mut self, _req: &SendRequest) -> Result<u32, LinkError> {
            Err(LinkError::Down)
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn connect(&mut self) -> Result<u32, LinkError> {
            self.attempts += 1;
            if self.fail_connect {
                Err(LinkError::Connect("no device".into()))
            } else {
                self.connected = true;
                Ok(0x42)
            }
        }
        fn close(&mut self) {
            self.connected = false;
        }
    }

    #[test]
    fn consecutive_calls_within_interval_attempt_once() {
        let mut link = FlakyLink {
            connected: false,
            attempts: 0,
            fail_connect: true,
        };
        let mut mgr = ReconnectManager::new(Duration::from_secs(10));
        assert_eq!(mgr.ensure_connected(&mut link), LinkHealth::Down);
        assert_eq!(mgr.ensure_connected(&mut link), LinkHealth::Down);
        assert_eq!(link.attempts, 1, "second call inside the interval must not dial");
    }

    #[test]
    fn successful_reconnect_reports_new_address() {
        let mut link = FlakyLink {
            connected: false,
            attempts: 0,
            fail_connect: false,
        };
        let mut mgr = ReconnectManager::new(Duration::from_millis(0));
        assert_eq!(mgr.ensure_connected(&mut link), LinkHealth::Reconnected(0x42));
        assert_eq!(mgr.ensure_connected(&mut link), LinkHealth::Connected);
        assert_eq!(link.attempts, 1);
    }

    #[test]
    fn zero_interval_allows_back_to_back_attempts() {
        let mut link = FlakyLink {
            connected: false,
            attempts: 0,
            fail_connect: true,
        };
        let mut mgr = ReconnectManager::new(Duration::from_millis(0));
        mgr.ensure_connected(&mut link);
        mgr.ensure_connected(&mut link);
        assert_eq!(link.attempts, 2);
    }
}

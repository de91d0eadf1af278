//! Lock-guarded view manager instance shared by the transport and the tick
//! scheduler.

use std::sync::{Mutex, MutexGuard};

use crate::utils::ViewServError;
use crate::viewsvc::{ServerId, View, ViewNum, ViewState};

use serde::{Deserialize, Serialize};

use tokio::time::{Duration, Instant};

/// Configuration parameters of the view service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewServiceConfig {
    /// Expected interval between pings from each server, in millisecs.
    /// The failure detector also runs once per this interval.
    pub ping_interval_ms: u64,

    /// Number of missed ping intervals after which a server is dead.
    pub dead_pings: u64,
}

impl Default for ViewServiceConfig {
    fn default() -> Self {
        ViewServiceConfig {
            ping_interval_ms: 100,
            dead_pings: 5,
        }
    }
}

impl ViewServiceConfig {
    /// Parses a config from an optional TOML string on top of defaults and
    /// validates it.
    pub fn parse(config_str: Option<&str>) -> Result<Self, ViewServError> {
        let config = parsed_config!(config_str => ViewServiceConfig;
                                    ping_interval_ms, dead_pings)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ViewServError> {
        if self.ping_interval_ms == 0 {
            return logged_err!(
                "invalid config.ping_interval_ms '{}'",
                self.ping_interval_ms
            );
        }
        if self.dead_pings == 0 {
            return logged_err!(
                "invalid config.dead_pings '{}'",
                self.dead_pings
            );
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// `ping_interval * dead_pings`.
    pub fn dead_threshold(&self) -> Duration {
        Duration::from_millis(
            self.ping_interval_ms.saturating_mul(self.dead_pings),
        )
    }
}

/// Snapshot of the manager state for diagnostics.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ViewStatus {
    pub view: View,
    pub acknowledged: bool,
    pub idle: Option<ServerId>,
}

/// The view manager: one `ViewState` behind one exclusive lock. Each entry
/// point runs to completion under the lock, so a transition's field changes
/// are never observed half-applied.
#[derive(Debug)]
pub struct ViewManager {
    config: ViewServiceConfig,
    state: Mutex<ViewState>,
}

impl ViewManager {
    /// Creates a view manager holding the bootstrap view.
    pub fn new(config: ViewServiceConfig) -> Result<Self, ViewServError> {
        config.validate()?;
        let state = Mutex::new(ViewState::new(config.dead_threshold()));
        Ok(ViewManager { config, state })
    }

    pub fn config(&self) -> &ViewServiceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        // state is only mutated inside complete critical sections, so a
        // panicking holder cannot leave it torn
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ping entry point. Records liveness of `me` and returns the freshest
    /// view. An empty `me` is not a valid server and only reads the view.
    pub fn ping(&self, me: &ServerId, viewnum: ViewNum) -> View {
        if me.is_none() {
            pf_warn!("ping with empty server ID, treating as get");
            return self.get();
        }
        let mut state = self.lock();
        state.ping(me, viewnum, Instant::now())
    }

    /// Get entry point; pure read.
    pub fn get(&self) -> View {
        self.lock().get()
    }

    /// Tick entry point, driven by the periodic scheduler.
    pub fn tick(&self) {
        let mut state = self.lock();
        state.tick(Instant::now());
    }

    /// Diagnostic snapshot of the whole state.
    pub fn status(&self) -> ViewStatus {
        let state = self.lock();
        ViewStatus {
            view: state.get(),
            acknowledged: state.acknowledged(),
            idle: state.idle().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tokio::time;

    fn fast_config() -> ViewServiceConfig {
        ViewServiceConfig {
            ping_interval_ms: 10,
            dead_pings: 5,
        }
    }

    #[test]
    fn config_defaults() -> Result<(), ViewServError> {
        let config = ViewServiceConfig::parse(None)?;
        assert_eq!(config, ViewServiceConfig::default());
        assert_eq!(config.ping_interval(), Duration::from_millis(100));
        assert_eq!(config.dead_threshold(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn config_overrides() -> Result<(), ViewServError> {
        let config =
            ViewServiceConfig::parse(Some("ping_interval_ms = 20\n"))?;
        assert_eq!(config.ping_interval_ms, 20);
        assert_eq!(config.dead_pings, 5);
        assert_eq!(config.dead_threshold(), Duration::from_millis(100));
        Ok(())
    }

    #[test]
    fn config_invalid() {
        assert!(ViewServiceConfig::parse(Some("dead_pings = 0")).is_err());
        assert!(ViewServiceConfig::parse(Some("ping_interval_ms = 0")).is_err());
        assert!(ViewServiceConfig::parse(Some("deadpings = 3")).is_err());
        assert!(ViewServiceConfig::parse(Some("dead_pings = -1")).is_err());
    }

    #[test]
    fn empty_id_ping_only_reads() -> Result<(), ViewServError> {
        let manager = ViewManager::new(fast_config())?;
        assert_eq!(manager.ping(&ServerId::none(), 0), View::bootstrap());
        assert_eq!(manager.get(), View::bootstrap());
        Ok(())
    }

    #[test]
    fn concurrent_pings_serialized() -> Result<(), ViewServError> {
        let manager = Arc::new(ViewManager::new(fast_config())?);
        manager.ping(&"p".into(), 0);
        manager.ping(&"p".into(), 1);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                thread::spawn(move || {
                    let me = ServerId::new(format!("s{}", i));
                    (0..50).map(|_| manager.ping(&me, 0)).last()
                })
            })
            .collect();
        for handle in handles {
            let last = handle.join().map_err(|_| {
                ViewServError::msg("pinger thread panicked")
            })?;
            assert!(last.is_some());
        }
        // exactly one of them won the backup slot
        let status = manager.status();
        assert_eq!(status.view.viewnum, 2);
        assert_eq!(status.view.primary, ServerId::new("p"));
        assert!(!status.view.backup.is_none());
        assert_ne!(status.idle.as_ref(), Some(&status.view.backup));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tick_with_real_clock() -> Result<(), ViewServError> {
        let manager = ViewManager::new(fast_config())?;
        manager.ping(&"s1".into(), 0);
        manager.ping(&"s1".into(), 1);
        manager.ping(&"s2".into(), 0);
        manager.ping(&"s1".into(), 2);
        // keep only s2 alive past the dead threshold
        for _ in 0..10 {
            time::sleep(Duration::from_millis(10)).await;
            manager.ping(&"s2".into(), 2);
            manager.tick();
        }
        assert_eq!(
            manager.get(),
            View {
                viewnum: 3,
                primary: "s2".into(),
                backup: ServerId::none(),
            }
        );
        Ok(())
    }
}

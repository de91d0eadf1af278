//! View server process: owns the view manager, its network reactor, and the
//! periodic tick scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::utils::ViewServError;
use crate::viewsvc::reactor::ViewReactor;
use crate::viewsvc::{View, ViewManager, ViewServiceConfig};

use tokio::sync::watch;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Standalone view server.
pub struct ViewServer {
    /// The lock-guarded view manager, shared with connection responders.
    manager: Arc<ViewManager>,

    /// Network-facing reactor module.
    reactor: ViewReactor,

    /// Interval driving the failure detector.
    tick_interval: Interval,
}

impl ViewServer {
    /// Creates a new view server, binds its listener and starts accepting
    /// connections. Ticking starts once `run()` is called.
    pub async fn new_and_setup(
        bind_addr: SocketAddr,
        config: ViewServiceConfig,
        rx_term: watch::Receiver<bool>,
    ) -> Result<Self, ViewServError> {
        let manager = Arc::new(ViewManager::new(config)?);
        let reactor =
            ViewReactor::new_and_setup(bind_addr, manager.clone(), rx_term)
                .await?;

        let mut tick_interval = time::interval(manager.config().ping_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        pf_info!(
            "view server up: ping_interval {:?} dead_threshold {:?}",
            manager.config().ping_interval(),
            manager.config().dead_threshold()
        );
        Ok(ViewServer {
            manager,
            reactor,
            tick_interval,
        })
    }

    /// Actual bound address of the listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    /// Current view, read directly from the manager.
    pub fn view(&self) -> View {
        self.manager.get()
    }

    /// Main loop: ticks the failure detector once per ping interval. Breaks
    /// out of the loop only upon catching the termination signal.
    pub async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ViewServError> {
        loop {
            tokio::select! {
                _ = self.tick_interval.tick() => {
                    self.manager.tick();
                },

                // receiving termination signal
                _ = rx_term.changed() => {
                    pf_warn!("view server caught termination signal");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ViewClerk, ViewPinger};
    use crate::viewsvc::ServerId;
    use tokio::time::Duration;

    fn fast_config() -> ViewServiceConfig {
        ViewServiceConfig {
            ping_interval_ms: 20,
            dead_pings: 3,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failover_end_to_end() -> Result<(), ViewServError> {
        let (tx_term, rx_term) = watch::channel(false);
        let mut server = ViewServer::new_and_setup(
            "127.0.0.1:0".parse()?,
            fast_config(),
            rx_term.clone(),
        )
        .await?;
        let addr = server.local_addr();
        let server_handle =
            tokio::spawn(async move { server.run(rx_term).await });

        let mut p1 = ViewPinger::new_by_connect("s1".into(), addr).await?;
        let mut p2 = ViewPinger::new_by_connect("s2".into(), addr).await?;
        for _ in 0..5 {
            p1.beat().await?;
            p2.beat().await?;
            time::sleep(Duration::from_millis(10)).await;
        }
        let mut clerk = ViewClerk::new_by_connect(addr).await?;
        let status = clerk.status().await?;
        assert_eq!(status.view.viewnum, 2);
        assert_eq!(status.view.primary, ServerId::new("s1"));
        assert_eq!(status.view.backup, ServerId::new("s2"));
        assert!(status.acknowledged);

        // s1 goes silent
        for _ in 0..10 {
            p2.beat().await?;
            time::sleep(Duration::from_millis(20)).await;
        }
        let view = clerk.get().await?;
        assert_eq!(view.viewnum, 3);
        assert_eq!(view.primary, ServerId::new("s2"));
        assert!(view.backup.is_none());
        assert_eq!(p2.view(), &view);

        // s1 comes back restarted and becomes the new backup
        p1.restart();
        p1.beat().await?;
        assert_eq!(
            p1.view(),
            &View {
                viewnum: 4,
                primary: "s2".into(),
                backup: "s1".into(),
            }
        );

        tx_term.send(true)?;
        server_handle.await.map_err(ViewServError::msg)??;
        Ok(())
    }
}

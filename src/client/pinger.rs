//! Replica-side heartbeat driver: pings the view server once per interval
//! and keeps track of the latest view and this replica's role in it.

use std::net::SocketAddr;

use crate::client::ViewClerk;
use crate::utils::ViewServError;
use crate::viewsvc::{Role, ServerId, View};

use tokio::sync::watch;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Heartbeat driver for one replica server.
pub struct ViewPinger {
    /// My server ID.
    me: ServerId,

    /// Stub connected to the view server.
    clerk: ViewClerk,

    /// Latest view heard from the view server.
    view: View,
}

impl ViewPinger {
    /// Creates a pinger for server `me` and connects to the view server.
    pub async fn new_by_connect(
        me: ServerId,
        server: SocketAddr,
    ) -> Result<Self, ViewServError> {
        if me.is_none() {
            return logged_err!("pinger needs a non-empty server ID");
        }
        let clerk = ViewClerk::new_by_connect(server).await?;
        Ok(ViewPinger {
            me,
            clerk,
            view: View::bootstrap(),
        })
    }

    pub fn me(&self) -> &ServerId {
        &self.me
    }

    /// Latest view heard.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// My role in the latest view heard.
    pub fn role(&self) -> Role {
        self.view.role_of(&self.me)
    }

    /// Forgets the latest view, as if this replica just rebooted. The next
    /// beat pings with viewnum 0.
    pub fn restart(&mut self) {
        pf_info!("restarting, forgetting view {}", self.view);
        self.view = View::bootstrap();
    }

    /// Pings once with the latest viewnum heard, which doubles as the
    /// acknowledgment of that view. Returns the refreshed view.
    pub async fn beat(&mut self) -> Result<&View, ViewServError> {
        let view = self.clerk.ping(&self.me, self.view.viewnum).await?;
        if view != self.view {
            let old_role = self.role();
            let new_role = view.role_of(&self.me);
            if old_role != new_role {
                pf_info!("role {:?} -> {:?} in view {}", old_role, new_role, view);
            } else {
                pf_debug!("view {} -> {}", self.view, view);
            }
            self.view = view;
        }
        Ok(&self.view)
    }

    /// Beats once per `interval` until the termination signal arrives. A
    /// failed beat ends the loop with its error.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ViewServError> {
        let mut beat_interval = time::interval(interval);
        beat_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = beat_interval.tick() => {
                    if let Err(e) = self.beat().await {
                        pf_error!("error pinging view server: {}", e);
                        return Err(e);
                    }
                },

                // receiving termination signal
                _ = rx_term.changed() => {
                    pf_warn!("pinger caught termination signal");
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
    use crate::viewsvc::{ViewServer, ViewServiceConfig};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_until_terminated() -> Result<(), ViewServError> {
        let (tx_term, rx_term) = watch::channel(false);
        let config = ViewServiceConfig {
            ping_interval_ms: 20,
            dead_pings: 3,
        };
        let mut server = ViewServer::new_and_setup(
            "127.0.0.1:0".parse()?,
            config,
            rx_term.clone(),
        )
        .await?;
        let addr = server.local_addr();
        tokio::spawn(async move { server.run(rx_term).await });

        // pinger stops on its own signal, before the server goes away
        let (tx_stop, rx_stop) = watch::channel(false);
        let mut pinger = ViewPinger::new_by_connect("s1".into(), addr).await?;
        let pinger_handle = tokio::spawn(async move {
            pinger.run(Duration::from_millis(20), rx_stop).await?;
            Ok::<ViewPinger, ViewServError>(pinger)
        });

        time::sleep(Duration::from_millis(200)).await;
        tx_stop.send(true)?;
        let pinger = pinger_handle.await.map_err(ViewServError::msg)??;
        tx_term.send(true)?;
        assert_eq!(pinger.role(), Role::Primary);
        assert_eq!(pinger.view().viewnum, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_id_rejected() -> Result<(), ViewServError> {
        let addr: SocketAddr = "127.0.0.1:1".parse()?;
        assert!(ViewPinger::new_by_connect(ServerId::none(), addr)
            .await
            .is_err());
        Ok(())
    }
}

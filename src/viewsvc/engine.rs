//! View store and transition engine: decides when a new view gets published.

use crate::viewsvc::liveness::LivenessTracker;
use crate::viewsvc::{ServerId, View, ViewNum};

use tokio::time::{Duration, Instant};

/// Complete state of the view service: the current view, whether its
/// primary has acknowledged it, the single idle candidate slot, and the
/// liveness records of every server that ever pinged.
///
/// All entry points take the current instant explicitly; the caller owns
/// the clock and is responsible for serializing calls.
#[derive(Debug)]
pub struct ViewState {
    /// Current view.
    view: View,

    /// Has the current primary pinged with the current viewnum?
    acked: bool,

    /// At most one unassigned live server eligible for promotion.
    idle: Option<ServerId>,

    /// Last-seen timestamps of servers.
    liveness: LivenessTracker,

    /// Servers silent for longer than this are considered dead.
    dead_threshold: Duration,
}

impl ViewState {
    /// Creates the initial state holding the bootstrap view.
    pub fn new(dead_threshold: Duration) -> Self {
        ViewState {
            view: View::bootstrap(),
            acked: false,
            idle: None,
            liveness: LivenessTracker::new(),
            dead_threshold,
        }
    }

    /// Current view.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// Whether the current primary has acknowledged the current view.
    pub fn acknowledged(&self) -> bool {
        self.acked
    }

    /// Current idle candidate, if any.
    pub fn idle(&self) -> Option<&ServerId> {
        self.idle.as_ref()
    }

    fn is_dead(&self, id: &ServerId, now: Instant) -> bool {
        self.liveness.is_dead(id, now, self.dead_threshold)
    }

    /// Installs the successor of the current view. Every transition bumps
    /// viewnum by exactly one and waits for a fresh acknowledgment.
    fn publish(&mut self, primary: ServerId, backup: ServerId, reason: &str) {
        let next = View {
            viewnum: self.view.viewnum + 1,
            primary,
            backup,
        };
        pf_info!("view {} -> {} ({})", self.view, next, reason);
        self.view = next;
        self.acked = false;
    }

    /// Takes the idle candidate out of its slot if it is alive and does not
    /// already hold a role in the current view.
    fn take_live_idle(&mut self, now: Instant) -> Option<ServerId> {
        let eligible = match self.idle.as_ref() {
            Some(idle) => {
                !self.is_dead(idle, now)
                    && !self.view.is_primary(idle)
                    && !self.view.is_backup(idle)
            }
            None => false,
        };
        if eligible {
            self.idle.take()
        } else {
            None
        }
    }

    /// Handles a ping from server `me` claiming to have seen view `viewnum`
    /// (0 meaning it holds no view). Returns the view after handling.
    pub fn ping(&mut self, me: &ServerId, viewnum: ViewNum, now: Instant) -> View {
        self.liveness.heard(me, now);
        if self.view.is_primary(me) && viewnum == self.view.viewnum && !self.acked
        {
            pf_debug!("primary {} acked view {}", me, viewnum);
            self.acked = true;
        }

        if self.view.viewnum == 0 {
            // first ping ever installs the first primary
            self.publish(me.clone(), ServerId::none(), "bootstrap");
        } else if self.view.is_primary(me) && viewnum == 0 {
            // restarted primary stays in place; only the failure detector
            // may replace it
            pf_debug!("primary {} pinged with viewnum 0, view unchanged", me);
        } else if !self.view.is_primary(me)
            && self.view.backup.is_none()
            && self.acked
        {
            if self.idle.as_ref() == Some(me) {
                self.idle = None;
            }
            let primary = self.view.primary.clone();
            self.publish(primary, me.clone(), "backup fill");
        } else if !self.view.is_primary(me) && !self.view.is_backup(me) {
            if self.idle.as_ref() != Some(me) {
                pf_debug!("registered idle candidate {}", me);
                self.idle = Some(me.clone());
            }
        }

        self.view.clone()
    }

    /// Read-only snapshot of the current view.
    pub fn get(&self) -> View {
        self.view.clone()
    }

    /// Failure detection pass, expected once per ping interval. Publishes at
    /// most one new view.
    pub fn tick(&mut self, now: Instant) {
        if let Some(idle) = self.idle.as_ref() {
            if self.is_dead(idle, now) {
                pf_debug!("idle candidate {} expired", idle);
                self.idle = None;
            }
        }

        // an unacknowledged primary may not know it is primary yet; replacing
        // it now could leave two servers acting as primary
        if !self.acked {
            return;
        }

        if self.is_dead(&self.view.primary, now) {
            let primary = self.view.backup.clone();
            let backup = self.take_live_idle(now).unwrap_or_default();
            self.publish(primary, backup, "primary failed");
        } else if self.is_dead(&self.view.backup, now) {
            if let Some(idle) = self.take_live_idle(now) {
                let primary = self.view.primary.clone();
                self.publish(primary, idle, "backup replaced");
            }
        }
    }
}

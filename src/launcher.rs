use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Config, queue::SendQueue, quota::HourlyQuota, relay::Connector,
    session::SessionStore,
};

/// shared state of the running launcher
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub queue: Arc<SendQueue>,
    pub quota: Arc<HourlyQuota>,
    pub connector: Box<dyn Connector>,
    pub token: CancellationToken,
    locked: AtomicBool,
    reset_scheduled: AtomicBool,
}

impl AppState {
    pub fn new(config: Config, connector: Box<dyn Connector>, token: CancellationToken) -> Self {
        Self {
            sessions: SessionStore::new(config.session_ttl),
            quota: Arc::new(HourlyQuota::new(config.hourly_cap)),
            queue: Default::default(),
            connector,
            token,
            locked: AtomicBool::new(false),
            reset_scheduled: AtomicBool::new(false),
            config,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn check_credentials(&self, username: &str, password: &str) -> bool {
        username == self.config.username && password == self.config.password
    }

    /// log everybody out and drop pending jobs, then keep the launcher locked
    /// for `reset_lock` so in-flight requests cannot sneak past the reset
    ///
    /// Hourly quota windows survive a reset.
    pub fn full_reset(self: &Arc<Self>) {
        self.locked.store(true, Ordering::SeqCst);
        self.sessions.clear();
        let dropped = self.queue.clear();
        info!("launcher reset, {dropped} pending jobs dropped");

        let state = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(state.config.reset_lock) => {},
                _ = state.token.cancelled() => {},
            }
            state.locked.store(false, Ordering::SeqCst);
        });
    }

    /// run a full reset one session lifetime from now, unless one is already pending
    pub fn schedule_reset(self: &Arc<Self>) {
        if self.reset_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = self.clone();
        let after: Duration = self.config.session_ttl;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    state.reset_scheduled.store(false, Ordering::SeqCst);
                    state.full_reset();
                },
                _ = state.token.cancelled() => {},
            }
        });
    }
}

use crate::config::CachePolicy;
use crate::manager::Registry;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Uninitialized,
    /// Started, waiting for the first poll.
    WarmingUp,
    /// First poll done, refreshing every poll period.
    SteadyState,
    Stopped,
}

impl SchedulerState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Uninitialized => "uninitialized",
            SchedulerState::WarmingUp => "warming_up",
            SchedulerState::SteadyState => "steady_state",
            SchedulerState::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    // Run a refresh pass outside of the normal interval. The worker answers
    // once every due entry has been refreshed.
    Refresh(oneshot::Sender<()>),
    Shutdown,
}

pub(crate) struct Scheduler {
    pub(crate) policy: CachePolicy,
    pub(crate) registry: Arc<Registry>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
}

impl Scheduler {
    /// Waits `first_poll_delay`, refreshes every due entry, then keeps doing
    /// so every `poll_period` until the Shutdown command is received.
    pub(crate) async fn run(self, mut rx: mpsc::Receiver<Command>) {
        let first_poll = tokio::time::sleep(self.policy.first_poll_delay());
        tokio::pin!(first_poll);
        loop {
            tokio::select! {
                _ = &mut first_poll => break,
                cmd = rx.recv() => {
                    if !self.handle(cmd).await {
                        self.set_state(SchedulerState::Stopped);
                        return;
                    }
                }
            }
        }

        self.tick().await;
        self.set_state(SchedulerState::SteadyState);

        // The next tick is never armed sooner than a full period after the
        // previous one finished.
        let period = self.policy.poll_period();
        let Some(start) = Instant::now().checked_add(period) else {
            tracing::warn!(
                poll_period = self.policy.poll_period,
                "Poll period out of range, periodic refresh disabled"
            );
            while self.handle(rx.recv().await).await {}
            self.set_state(SchedulerState::Stopped);
            tracing::info!("Cache refresh scheduler stopped");
            return;
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                cmd = rx.recv() => {
                    if !self.handle(cmd).await {
                        break;
                    }
                }
            }
        }

        self.set_state(SchedulerState::Stopped);
        tracing::info!("Cache refresh scheduler stopped");
    }

    // Returns false once the worker should exit.
    async fn handle(&self, cmd: Option<Command>) -> bool {
        match cmd {
            Some(Command::Refresh(done)) => {
                self.tick().await;
                let _ = done.send(());
                true
            }
            Some(Command::Shutdown) | None => false,
        }
    }

    async fn tick(&self) {
        tracing::info!("Executing cache refresh triggered by timer");
        self.registry.evict_idle();

        let mut refreshes = JoinSet::new();
        for entry in self.registry.entries() {
            refreshes.spawn(async move { entry.refresh_if_due().await });
        }

        while let Some(result) = refreshes.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "Refresh task failed");
            }
        }
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.write() = state;
        tracing::debug!(state = state.as_str(), "Scheduler state changed");
    }
}

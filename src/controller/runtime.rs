use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use super::AutoController;
use super::tick::TickOutcome;
use super::types::{ControlCommand, ControlStatus};
use crate::error::{Result, SunmineError};

/// Cloneable handle used by the web layer and `main`
#[derive(Clone)]
pub struct ControllerHandle {
    commands_tx: mpsc::UnboundedSender<ControlCommand>,
    status_rx: watch::Receiver<Arc<ControlStatus>>,
}

impl ControllerHandle {
    pub fn enable(&self) -> Result<()> {
        self.send(ControlCommand::Enable)
    }

    pub fn disable(&self) -> Result<()> {
        self.send(ControlCommand::Disable)
    }

    fn send(&self, cmd: ControlCommand) -> Result<()> {
        self.commands_tx
            .send(cmd)
            .map_err(|_| SunmineError::generic("controller task is not running"))
    }

    /// Latest published snapshot
    pub fn status(&self) -> Arc<ControlStatus> {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ControlStatus>> {
        self.status_rx.clone()
    }
}

impl AutoController {
    /// Run the control loop until shutdown.
    ///
    /// Ticks are awaited inline, so a slow command delays the next tick. The
    /// interval restarts once a command returns, which drops every firing
    /// that elapsed while it was in flight.
    pub async fn run(
        mut self,
        mut commands_rx: mpsc::UnboundedReceiver<ControlCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.logger.info(&format!(
            "Starting auto-control loop (tick {}s, cooldown {}s)",
            self.tick_interval.as_secs(),
            self.min_interval.num_seconds()
        ));
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let TickOutcome::Commanded(_) = self.tick_at(Utc::now()).await {
                        ticker.reset();
                    }
                }
                Some(cmd) = commands_rx.recv() => {
                    self.handle_command(cmd);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the loop on the runtime and return a handle to it
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (ControllerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = ControllerHandle {
            commands_tx,
            status_rx: self.subscribe(),
        };
        let task = tokio::spawn(self.run(commands_rx, shutdown));
        (handle, task)
    }
}

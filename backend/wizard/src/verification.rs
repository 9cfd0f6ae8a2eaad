use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info};

pub const COMPLETE: u8 = 100;

/// Progress-bar driven identity check.
///
/// Progress climbs by a fixed increment on every tick until it reaches
/// [`COMPLETE`]. Dropping the simulator stops the timer.
pub struct VerificationSimulator {
    tick: Duration,
    increment: u8,
    progress: Arc<watch::Sender<u8>>,
    task: Option<JoinHandle<()>>,
}

impl VerificationSimulator {
    pub fn new(tick: Duration, increment: u8) -> Self {
        let (progress, _) = watch::channel(0);

        Self {
            tick,
            increment: increment.max(1),
            progress: Arc::new(progress),
            task: None,
        }
    }

    /// A simulator for a session whose identity was verified earlier.
    pub fn completed(tick: Duration, increment: u8) -> Self {
        let simulator = Self::new(tick, increment);
        simulator.progress.send_replace(COMPLETE);
        simulator
    }

    /// Starts the countdown. Returns `false` when already running or complete.
    pub fn start(&mut self) -> bool {
        if self.is_complete() || self.is_running() {
            return false;
        }

        let progress = self.progress.clone();
        let tick = self.tick;
        let increment = self.increment;

        info!("Starting identity verification");

        self.task = Some(tokio::spawn(async move {
            loop {
                sleep(tick).await;

                let mut done = false;
                progress.send_modify(|value| {
                    *value = value.saturating_add(increment).min(COMPLETE);
                    done = *value >= COMPLETE;
                });

                if done {
                    debug!("Identity verification reached {COMPLETE}%");
                    break;
                }
            }
        }));

        true
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    pub fn is_complete(&self) -> bool {
        self.progress() >= COMPLETE
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Resolves once progress reaches [`COMPLETE`]. Never resolves for a
    /// simulator that was not started.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|value| *value >= COMPLETE).await;
    }

    /// Stops the timer, keeping the progress reached so far.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Identity verification cancelled at {}%", self.progress());
        }
    }
}

impl Drop for VerificationSimulator {
    fn drop(&mut self) {
        self.cancel();
    }
}

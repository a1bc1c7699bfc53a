//! Real-time driver for the [`SosMachine`].
//!
//! Runs the machine on a background task, feeding it button inputs and a
//! periodic tick. When the machine fires, the trigger is dispatched on its
//! own task so gesture handling never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use lifeline_shared::models::TriggerReason;

use crate::config::SosTiming;
use crate::sos::{SosMachine, SosSnapshot};

/// Whatever raises the emergency once a gesture completes.
#[async_trait]
pub trait TriggerTarget: Send + Sync + 'static {
    async fn fire(&self, reason: TriggerReason);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SosInput {
    Press,
    Release,
    Cancel,
    Confirm,
}

pub struct SosDriver {
    inputs: mpsc::Sender<SosInput>,
    state: watch::Receiver<SosSnapshot>,
    task: JoinHandle<()>,
}

impl SosDriver {
    /// Must be called within a Tokio runtime.
    pub fn spawn(timing: SosTiming, target: Arc<dyn TriggerTarget>) -> Self {
        let machine = SosMachine::new(timing);
        let (state_tx, state) = watch::channel(machine.snapshot());
        let (inputs, rx) = mpsc::channel(32);
        let task = tokio::spawn(run(machine, timing, rx, state_tx, target));
        Self {
            inputs,
            state,
            task,
        }
    }

    pub async fn press(&self) {
        self.send(SosInput::Press).await;
    }

    pub async fn release(&self) {
        self.send(SosInput::Release).await;
    }

    pub async fn cancel(&self) {
        self.send(SosInput::Cancel).await;
    }

    pub async fn confirm(&self) {
        self.send(SosInput::Confirm).await;
    }

    pub async fn send(&self, input: SosInput) {
        if self.inputs.send(input).await.is_err() {
            debug!("SOS driver stopped; dropping {:?}", input);
        }
    }

    pub fn snapshot(&self) -> SosSnapshot {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SosSnapshot> {
        self.state.clone()
    }
}

impl Drop for SosDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut machine: SosMachine,
    timing: SosTiming,
    mut inputs: mpsc::Receiver<SosInput>,
    state: watch::Sender<SosSnapshot>,
    target: Arc<dyn TriggerTarget>,
) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(timing.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let fired = tokio::select! {
            input = inputs.recv() => {
                let Some(input) = input else { break };
                let now = start.elapsed().as_millis() as u64;
                match input {
                    SosInput::Press => {
                        machine.press(now);
                        None
                    }
                    SosInput::Release => machine.release(now),
                    SosInput::Cancel => {
                        if machine.cancel() {
                            info!("SOS cancelled");
                        }
                        None
                    }
                    SosInput::Confirm => machine.confirm(),
                }
            }
            _ = ticker.tick() => machine.tick(start.elapsed().as_millis() as u64),
        };

        state.send_replace(machine.snapshot());

        if let Some(reason) = fired {
            info!("SOS fired ({})", reason);
            let target = target.clone();
            tokio::spawn(async move { target.fire(reason).await });
        }
    }
}

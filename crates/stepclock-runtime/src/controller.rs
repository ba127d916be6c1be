//! Control loop ownership and the command queue into it
//!
//! The `Controller` owns the engine exclusively. Other tasks (the HTTP
//! surface) talk to it through a `ControlHandle`; commands are drained at
//! the start of every pass, before the engine polls.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use stepclock_core::{MinuteOfDay, StepClockError, StepClockResult};

use crate::{CatchUpEngine, EngineStatus, ManualSetOutcome, PollOutcome};

/// Request sent to the control loop
#[derive(Debug)]
pub enum ControlCommand {
    /// Operator entry of the time the clock face shows
    SetClock {
        minute: MinuteOfDay,
        reply: oneshot::Sender<StepClockResult<ManualSetOutcome>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Cloneable sender side of the command queue
#[derive(Clone, Debug)]
pub struct ControlHandle {
    commands: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    /// Wrap a raw command sender
    pub fn new(commands: mpsc::Sender<ControlCommand>) -> Self {
        ControlHandle { commands }
    }

    /// Manual set; resolves once the loop has applied it
    pub async fn set_clock(&self, minute: MinuteOfDay) -> StepClockResult<ManualSetOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::SetClock { minute, reply }).await?;
        rx.await.map_err(|_| StepClockError::ControlUnavailable)?
    }

    pub async fn status(&self) -> StepClockResult<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Status { reply }).await?;
        rx.await.map_err(|_| StepClockError::ControlUnavailable)
    }

    async fn send(&self, command: ControlCommand) -> StepClockResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| StepClockError::ControlUnavailable)
    }
}

/// Engine plus its command queue
pub struct Controller {
    engine: CatchUpEngine,
    commands: mpsc::Receiver<ControlCommand>,
}

impl Controller {
    /// Wrap an engine; `capacity` bounds the pending commands
    pub fn new(engine: CatchUpEngine, capacity: usize) -> (Self, ControlHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Controller {
                engine,
                commands: rx,
            },
            ControlHandle::new(tx),
        )
    }

    /// One loop pass: apply queued commands, then poll once
    pub fn pass(&mut self) -> PollOutcome {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
        self.engine.poll()
    }

    /// Run passes every `poll_interval` until `shutdown` resolves; returns
    /// the number of passes.
    ///
    /// `shutdown` is polled across passes rather than recreated, so a signal
    /// that arrives while a pass blocks is seen at the next wait.
    pub async fn run<F>(&mut self, poll_interval: Duration, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut passes = 0;
        loop {
            self.pass();
            passes += 1;
            tokio::select! {
                _ = &mut shutdown => return passes,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SetClock { minute, reply } => {
                let result = self.engine.manual_set(minute);
                if reply.send(result).is_err() {
                    tracing::debug!("manual set requester went away");
                }
            }
            ControlCommand::Status { reply } => {
                let _ = reply.send(self.engine.status());
            }
        }
    }

    pub fn engine(&self) -> &CatchUpEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CatchUpEngine {
        &mut self.engine
    }
}

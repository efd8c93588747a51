//! Command worker: waits for attach, then runs operator commands through the
//! registry with the configured retry policy.

use crate::command::ModelCommand;
use crate::error::SessionError;
use crate::outbox::Outbox;
use crate::retry::RetryPolicy;
use crate::session::AttachState;
use dashmap::DashMap;
use mesh_registry::Application;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Result of running one command through the retry loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Handler invocations performed
    pub attempts: u32,
    /// Invocations that queued a message
    pub succeeded: u32,
    /// Invocations rejected by the handler
    pub failed: u32,
    /// Stopped early because a send was acknowledged
    pub acknowledged: bool,
}

/// Summary of a worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerReport {
    /// Whether attach completed before commands were processed
    pub attached: bool,
    /// Per command line outcome, in input order
    pub outcomes: Vec<Result<CommandOutcome, SessionError>>,
}

impl RunnerReport {
    /// Number of command lines that were rejected before invocation
    pub fn rejected(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }
}

/// Worker executing operator commands
#[derive(Debug)]
pub struct CommandRunner {
    app: Arc<Application>,
    outbox: Outbox,
    acks: Arc<DashMap<u64, u32>>,
    state_rx: watch::Receiver<AttachState>,
    retry: RetryPolicy,
    settle_delay: Duration,
    next_command_id: u64,
}

impl CommandRunner {
    /// Create a worker sharing the registry and send queue of a session
    pub fn new(
        app: Arc<Application>,
        outbox: Outbox,
        acks: Arc<DashMap<u64, u32>>,
        state_rx: watch::Receiver<AttachState>,
        retry: RetryPolicy,
        settle_delay: Duration,
    ) -> Self {
        Self {
            app,
            outbox,
            acks,
            state_rx,
            retry,
            settle_delay,
            next_command_id: 1,
        }
    }

    /// Process command lines until the channel closes.
    ///
    /// Nothing runs before attach succeeds; if attach fails the lines are
    /// left unread.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<String>) -> RunnerReport {
        let mut report = RunnerReport::default();

        if !self.wait_attached().await {
            warn!("Application not attached, dropping operator commands");
            return report;
        }
        report.attached = true;

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        while let Some(line) = commands.recv().await {
            let outcome = self.execute(&line).await;
            if let Err(e) = &outcome {
                error!("Command {:?} dropped: {}", line, e);
            }
            report.outcomes.push(outcome);
        }

        debug!(
            "Command worker finished: {} commands, {} rejected",
            report.outcomes.len(),
            report.rejected()
        );
        report
    }

    async fn wait_attached(&mut self) -> bool {
        loop {
            let state = *self.state_rx.borrow_and_update();
            match state {
                AttachState::Attached => return true,
                AttachState::AttachFailed => return false,
                AttachState::Idle | AttachState::Attaching => {}
            }
            if self.state_rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Resolve a command line and invoke its handler per the retry policy
    pub async fn execute(&mut self, line: &str) -> Result<CommandOutcome, SessionError> {
        let command = ModelCommand::parse(line)?;
        let resolved = self
            .app
            .resolve(command.element_index, command.model_id, command.opcode)?;

        let command_id = self.next_command_id;
        self.next_command_id += 1;
        let publisher = self.outbox.for_command(command_id);
        if self.retry.stop_on_ack {
            self.acks.insert(command_id, 0);
        }

        info!(
            "Command {}: element {} {} op {} x{}",
            command_id,
            resolved.element.index(),
            resolved.model.identifier(),
            command.opcode,
            self.retry.attempts
        );

        let mut outcome = CommandOutcome::default();
        let mut last_error = None;
        for attempt in 1..=self.retry.attempts {
            outcome.attempts += 1;
            match resolved.model.invoke(command.opcode, &publisher, &command.args) {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        "Command {} attempt {}/{} failed: {}",
                        command_id, attempt, self.retry.attempts, e
                    );
                    last_error = Some(e);
                }
            }

            if attempt == self.retry.attempts {
                break;
            }
            if !self.retry.backoff.is_zero() {
                tokio::time::sleep(self.retry.backoff).await;
            } else if self.retry.stop_on_ack {
                tokio::task::yield_now().await;
            }
            if self.retry.stop_on_ack && self.acked(command_id) {
                info!("Command {} acknowledged after {} attempts", command_id, attempt);
                outcome.acknowledged = true;
                break;
            }
        }

        self.acks.remove(&command_id);

        match last_error {
            Some(e) if outcome.succeeded == 0 => Err(e.into()),
            _ => Ok(outcome),
        }
    }

    fn acked(&self, command_id: u64) -> bool {
        self.acks.get(&command_id).map_or(false, |n| *n > 0)
    }
}

//! Background task driving the alarm service.
//!
//! One task owns the [`AlarmService`] and multiplexes the poll timer, the
//! repeat timer and user commands, so every command runs to completion before
//! the next pass sees the state.

use crate::error::CoreError;
use crate::scheduler::Postponement;
use crate::service::{AlarmService, UpcomingDose, log_pass_error};
use dosealarm_protocol::RecordId;
use dosealarm_store::MedicationRecord;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const COMMAND_BUFFER: usize = 32;
const MIN_PERIOD: Duration = Duration::from_millis(1);

type Reply<T> = oneshot::Sender<Result<T, CoreError>>;

/// Requests handled by the runtime task.
#[derive(Debug)]
pub enum AlarmCommand {
    Acknowledge {
        id: RecordId,
        reply: Reply<MedicationRecord>,
    },
    Postpone {
        id: RecordId,
        minutes: u32,
        reply: Reply<Postponement>,
    },
    Delete {
        id: RecordId,
        reply: Reply<bool>,
    },
    Upcoming {
        reply: Reply<Vec<UpcomingDose>>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running alarm runtime.
#[derive(Debug, Clone)]
pub struct AlarmHandle {
    sender: mpsc::Sender<AlarmCommand>,
}

impl AlarmHandle {
    pub async fn acknowledge(&self, id: RecordId) -> Result<MedicationRecord, CoreError> {
        self.request(|reply| AlarmCommand::Acknowledge { id, reply })
            .await
    }

    pub async fn postpone(&self, id: RecordId, minutes: u32) -> Result<Postponement, CoreError> {
        self.request(|reply| AlarmCommand::Postpone { id, minutes, reply })
            .await
    }

    pub async fn delete(&self, id: RecordId) -> Result<bool, CoreError> {
        self.request(|reply| AlarmCommand::Delete { id, reply }).await
    }

    pub async fn upcoming(&self) -> Result<Vec<UpcomingDose>, CoreError> {
        self.request(|reply| AlarmCommand::Upcoming { reply }).await
    }

    /// Ask the runtime to stop after the command in flight.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.sender
            .send(AlarmCommand::Shutdown)
            .await
            .map_err(|_| CoreError::Stopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> AlarmCommand,
    ) -> Result<T, CoreError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| CoreError::Stopped)?;
        response.await.map_err(|_| CoreError::Stopped)?
    }
}

/// Spawn the runtime task. The join handle yields the service back on shutdown.
pub fn spawn(service: AlarmService) -> (AlarmHandle, JoinHandle<AlarmService>) {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(service, receiver));
    (AlarmHandle { sender }, task)
}

async fn run(
    mut service: AlarmService,
    mut commands: mpsc::Receiver<AlarmCommand>,
) -> AlarmService {
    let policy = service.policy().clone();
    let poll_period = policy.poll_interval.max(MIN_PERIOD);
    let repeat_period = policy
        .repeat_interval
        .to_std()
        .unwrap_or(poll_period)
        .max(MIN_PERIOD);
    let mut poll = tokio::time::interval(poll_period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut repeat = tokio::time::interval(repeat_period);
    repeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "alarm runtime started (poll_ms={}, repeat_ms={})",
        poll_period.as_millis(),
        repeat_period.as_millis()
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                log_pass_error("poll", service.tick().await);
            }
            _ = repeat.tick() => {
                log_pass_error("repeat", service.repeat_active().await);
            }
            command = commands.recv() => {
                match command {
                    Some(AlarmCommand::Shutdown) | None => break,
                    Some(command) => handle_command(&mut service, command).await,
                }
            }
        }
    }
    info!("alarm runtime stopped");
    service
}

async fn handle_command(service: &mut AlarmService, command: AlarmCommand) {
    match command {
        AlarmCommand::Acknowledge { id, reply } => {
            debug!("handling acknowledge (record={})", id);
            let _ = reply.send(service.acknowledge(&id).await);
        }
        AlarmCommand::Postpone { id, minutes, reply } => {
            debug!("handling postpone (record={}, minutes={})", id, minutes);
            let _ = reply.send(service.postpone(&id, minutes).await);
        }
        AlarmCommand::Delete { id, reply } => {
            debug!("handling delete (record={})", id);
            let _ = reply.send(service.delete(&id).await);
        }
        AlarmCommand::Upcoming { reply } => {
            let _ = reply.send(service.upcoming().await);
        }
        AlarmCommand::Shutdown => {}
    }
}

//! Job status state machine.
//!
//! - `queued → running` once the worker has been started
//! - `running ⇄ paused` on pause and resume
//! - `running | paused → canceled` on cancel
//! - `queued | running | paused → failed` on a worker failure marker
//! - `queued | running → done` on a worker completion marker
//! - `canceled | failed` + retry starts a new generation and leaves the old record alone

use crate::types::{Command, JobStatus, WorkerOutcome};

/// What a command does to a job in a given status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEffect {
    /// Move the job to this status
    Transition(JobStatus),
    /// Accepted, nothing changes
    Unchanged,
    /// Start a new generation; the current record stays as it is
    NewGeneration,
    /// Not allowed in this status
    Rejected,
}

/// Decide what `command` does to a job that is currently `status`
pub fn command_effect(status: JobStatus, command: Command) -> CommandEffect {
    use JobStatus::*;

    match (command, status) {
        (Command::Pause, Running) => CommandEffect::Transition(Paused),
        (Command::Pause, _) => CommandEffect::Unchanged,

        (Command::Resume, Paused) => CommandEffect::Transition(Running),
        (Command::Resume, _) => CommandEffect::Unchanged,

        (Command::Cancel, Running | Paused) => CommandEffect::Transition(Canceled),
        (Command::Cancel, _) => CommandEffect::Unchanged,

        (Command::Retry, Canceled | Failed) => CommandEffect::NewGeneration,
        (Command::Retry, Done) => CommandEffect::Unchanged,
        (Command::Retry, Queued | Running | Paused) => CommandEffect::Rejected,
    }
}

/// Status a worker's terminal marker moves the job to, if the current status allows it
///
/// Completion is only accepted from `queued` or `running`; a paused job keeps its completion
/// deferred until it is resumed.
pub fn outcome_status(status: JobStatus, outcome: &WorkerOutcome) -> Option<JobStatus> {
    match (outcome, status) {
        (WorkerOutcome::Failed { .. }, s) if s.is_active() => Some(JobStatus::Failed),
        (WorkerOutcome::Done, JobStatus::Queued | JobStatus::Running) => Some(JobStatus::Done),
        _ => None,
    }
}

//! Events exchanged between simulator components.
//!
//! Upward flow (nodes → scheduler) and the submission path are events; the
//! scheduler commands nodes through direct calls, so there are no
//! node-inbound command events.

use serde::Serialize;

use crate::job::JobId;

/// Submitter → driver → scheduler: a job reached its submit time.
#[derive(Clone, Serialize)]
pub struct JobSubmitted {
    pub job_id: JobId,
}

/// Periodic self-trigger of the scheduler.
#[derive(Clone, Serialize)]
pub struct InvokeScheduling {}

/// Rank 0 of a job reached a voluntary scheduling point; the workload cursor
/// has already been advanced.
#[derive(Clone, Serialize)]
pub struct SchedulingPointReached {
    pub job_id: JobId,
}

/// Rank 0 evaluated the phase's evolving model to a new desired node count.
#[derive(Clone, Serialize)]
pub struct EvolvingRequested {
    pub job_id: JobId,
    pub num_nodes: usize,
}

/// Rank 0 finished the last phase of the workload.
#[derive(Clone, Serialize)]
pub struct WorkloadProcessed {
    pub job_id: JobId,
}

/// The walltime monitor fired for a running job.
#[derive(Clone, Serialize)]
pub struct WalltimeExceeded {
    pub job_id: JobId,
}

/// Rank 0 performed the final takeover (or finished a reconfiguration):
/// the job is RUNNING again.
#[derive(Clone, Serialize)]
pub struct JobRunning {
    pub job_id: JobId,
}

/// Scheduler → driver: a job reached a terminal state.
#[derive(Clone, Serialize)]
pub struct JobFinished {
    pub job_id: JobId,
    pub killed: bool,
}

/// Driver → scheduler: all submitted jobs terminated, close the policy
/// channel.
#[derive(Clone, Serialize)]
pub struct SchedulerFinalize {}

/// Periodic self-trigger of the sensing actor.
#[derive(Clone, Serialize)]
pub struct SensingTick {}

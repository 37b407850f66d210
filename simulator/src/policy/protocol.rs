//! Wire schema of the policy channel.
//!
//! Requests are JSON text frames built with `json!`; replies are typed. The
//! numeric codes and the invocation enumeration are part of the external
//! contract and must not change.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::job::{Job, JobId, JobType};

pub const REQUEST_CODE: u64 = 0xFFEC4400;
pub const REPLY_CODE: u64 = 0xFFEC4401;
pub const SHUTDOWN_CODE: u64 = 0xFFEC44FF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationType {
    Periodic,
    JobSubmit,
    JobCompleted,
    JobKilled,
    SchedulingPoint,
    EvolvingRequest,
}

impl InvocationType {
    pub fn code(&self) -> u32 {
        match self {
            InvocationType::Periodic => 0,
            InvocationType::JobSubmit => 1,
            InvocationType::JobCompleted => 2,
            InvocationType::JobKilled => 3,
            InvocationType::SchedulingPoint => 4,
            InvocationType::EvolvingRequest => 5,
        }
    }
}

/// One job's decision in the policy reply.
#[derive(Clone, Debug, Deserialize)]
pub struct JobDecision {
    pub id: JobId,
    #[serde(default)]
    pub kill_flag: bool,
    #[serde(default)]
    pub assigned_node_ids: Vec<usize>,
    /// Omitting the field leaves the job's current GPU assignment untouched.
    #[serde(default)]
    pub assigned_num_gpus_per_node: Option<u32>,
    #[serde(default)]
    pub modified_runtime_args: bool,
    #[serde(default)]
    pub runtime_arguments: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PolicyReply {
    pub code: u64,
    #[serde(default)]
    pub jobs: Vec<JobDecision>,
}

impl PolicyReply {
    pub fn parse(frame: &str) -> PolicyReply {
        let reply: PolicyReply = serde_json::from_str(frame)
            .unwrap_or_else(|e| panic!("Can't parse policy reply: {}", e));
        if reply.code != REPLY_CODE {
            panic!("Unknown message code {:#x} from scheduling algorithm", reply.code);
        }
        reply
    }
}

/// Job view shipped to the policy.
pub fn job_view(job: &Job) -> Value {
    let mut view = json!({
        "id": job.id,
        "state": job.state.code(),
        "type": job.job_type.code(),
        "walltime": job.walltime,
        "submit_time": job.submit_time,
        "start_time": job.start_time,
        "end_time": job.end_time,
        "wait_time": job.wait_time,
        "makespan": job.makespan,
        "turnaround_time": job.turnaround_time,
        "assigned_nodes": job.assigned_nodes,
        "assigned_num_gpus_per_node": job.assigned_num_gpus_per_node,
        "arguments": job.arguments,
        "attributes": job.attributes,
        "runtime_arguments": job.runtime_arguments,
        "total_phase_count": job.workload.total_phase_count,
        "completed_phases": job.workload.completed_phases,
    });
    if job.job_type == JobType::Rigid {
        view["num_nodes"] = json!(job.num_nodes);
        view["num_gpus_per_node"] = json!(job.num_gpus_per_node);
    } else {
        view["num_nodes_min"] = json!(job.num_nodes_min);
        view["num_nodes_max"] = json!(job.num_nodes_max);
        view["num_gpus_per_node_min"] = json!(job.num_gpus_per_node_min);
        view["num_gpus_per_node_max"] = json!(job.num_gpus_per_node_max);
    }
    if let Some(request) = job.evolving_request {
        view["evolving_request"] = json!(request);
    }
    view
}

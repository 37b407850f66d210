//! Jobs and their lifecycle state machine.

use std::collections::HashMap;

use serde::Deserialize;

use crate::workload::Workload;

/// Index into the platform's node arena; also the node id on the wire.
pub type NodeIndex = usize;

/// Job identity, assigned monotonically at submission.
pub type JobId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Rigid,
    Moldable,
    Malleable,
    Evolving,
    Adaptive,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Rigid => "rigid",
            JobType::Moldable => "moldable",
            JobType::Malleable => "malleable",
            JobType::Evolving => "evolving",
            JobType::Adaptive => "adaptive",
        }
    }

    /// Numeric type code on the wire.
    pub fn code(&self) -> u32 {
        match self {
            JobType::Rigid => 0,
            JobType::Moldable => 1,
            JobType::Malleable => 2,
            JobType::Evolving => 3,
            JobType::Adaptive => 4,
        }
    }

    /// Whether the workload may announce a desired new size.
    pub fn is_evolving(&self) -> bool {
        matches!(self, JobType::Evolving | JobType::Adaptive)
    }

    /// Whether the policy may resize the job at scheduling points.
    pub fn is_malleable(&self) -> bool {
        matches!(self, JobType::Malleable | JobType::Adaptive)
    }

    /// Whether the node set may change after the initial allocation.
    pub fn allows_runtime_assignment(&self) -> bool {
        matches!(self, JobType::Malleable | JobType::Evolving | JobType::Adaptive)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    PendingSubmission,
    Pending,
    PendingAllocation,
    PendingKill,
    Running,
    PendingReconfiguration,
    InReconfiguration,
    Completed,
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Killed)
    }

    /// Numeric state code on the wire; the values follow the protocol's
    /// enumeration order.
    pub fn code(&self) -> u32 {
        match self {
            JobState::PendingSubmission => 0,
            JobState::Pending => 1,
            JobState::PendingAllocation => 2,
            JobState::PendingKill => 3,
            JobState::Running => 4,
            JobState::PendingReconfiguration => 5,
            JobState::InReconfiguration => 6,
            JobState::Completed => 7,
            JobState::Killed => 8,
        }
    }
}

/// One batch job: user-declared sizing, timestamps, the workload, and the
/// three node sets tracked by the orchestration (assigned by the policy,
/// executing the application, currently expanding).
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub state: JobState,
    pub walltime: f64,
    pub num_nodes: usize,
    pub num_gpus_per_node: u32,
    pub num_nodes_min: usize,
    pub num_nodes_max: usize,
    pub num_gpus_per_node_min: u32,
    pub num_gpus_per_node_max: u32,
    pub submit_time: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub wait_time: f64,
    pub makespan: f64,
    pub turnaround_time: f64,
    pub workload: Workload,
    pub assigned_nodes: Vec<NodeIndex>,
    pub executing_nodes: Vec<NodeIndex>,
    pub expanding_nodes: Vec<NodeIndex>,
    pub assigned_num_gpus_per_node: u32,
    pub executing_num_gpus_per_node: u32,
    pub arguments: HashMap<String, String>,
    pub attributes: HashMap<String, String>,
    /// Mutable key/value map the policy may update between invocations.
    pub runtime_arguments: HashMap<String, String>,
    /// Last evolving size request reported by the workload.
    pub evolving_request: Option<usize>,
}

impl Job {
    pub fn rigid(
        walltime: f64,
        num_nodes: usize,
        num_gpus_per_node: u32,
        submit_time: f64,
        arguments: HashMap<String, String>,
        attributes: HashMap<String, String>,
        workload: Workload,
    ) -> Job {
        let job = Job {
            id: 0,
            job_type: JobType::Rigid,
            state: JobState::PendingSubmission,
            walltime,
            num_nodes,
            num_gpus_per_node,
            num_nodes_min: 0,
            num_nodes_max: 0,
            num_gpus_per_node_min: 0,
            num_gpus_per_node_max: 0,
            submit_time,
            start_time: -1.0,
            end_time: -1.0,
            wait_time: -1.0,
            makespan: -1.0,
            turnaround_time: -1.0,
            workload,
            assigned_nodes: Vec::new(),
            executing_nodes: Vec::new(),
            expanding_nodes: Vec::new(),
            assigned_num_gpus_per_node: num_gpus_per_node,
            executing_num_gpus_per_node: 0,
            arguments,
            attributes,
            runtime_arguments: HashMap::new(),
            evolving_request: None,
        };
        job.check_specification();
        job
    }

    #[allow(clippy::too_many_arguments)]
    pub fn elastic(
        walltime: f64,
        job_type: JobType,
        num_nodes_min: usize,
        num_nodes_max: usize,
        num_gpus_per_node_min: u32,
        num_gpus_per_node_max: u32,
        submit_time: f64,
        arguments: HashMap<String, String>,
        attributes: HashMap<String, String>,
        workload: Workload,
    ) -> Job {
        let job = Job {
            id: 0,
            job_type,
            state: JobState::PendingSubmission,
            walltime,
            num_nodes: 0,
            num_gpus_per_node: 0,
            num_nodes_min,
            num_nodes_max,
            num_gpus_per_node_min,
            num_gpus_per_node_max,
            submit_time,
            start_time: -1.0,
            end_time: -1.0,
            wait_time: -1.0,
            makespan: -1.0,
            turnaround_time: -1.0,
            workload,
            assigned_nodes: Vec::new(),
            executing_nodes: Vec::new(),
            expanding_nodes: Vec::new(),
            assigned_num_gpus_per_node: 0,
            executing_num_gpus_per_node: 0,
            arguments,
            attributes,
            runtime_arguments: HashMap::new(),
            evolving_request: None,
        };
        job.check_specification();
        job
    }

    /// Applies a state transition with its side effects. `start_time` and
    /// `end_time` are each set exactly once.
    pub fn set_state(&mut self, new_state: JobState, now: f64) {
        match (self.state, new_state) {
            (JobState::PendingAllocation, JobState::Running) => {
                if self.start_time < 0.0 {
                    self.start_time = now;
                    self.wait_time = self.start_time - self.submit_time;
                }
                self.executing_nodes = self.assigned_nodes.clone();
                if self.job_type == JobType::Rigid {
                    self.executing_num_gpus_per_node = self.num_gpus_per_node;
                } else {
                    self.executing_num_gpus_per_node = self.assigned_num_gpus_per_node;
                    let num_nodes = self.executing_nodes.len();
                    let gpus = self.executing_num_gpus_per_node;
                    self.workload
                        .scale_to(num_nodes, gpus, &self.arguments, &self.runtime_arguments);
                    self.workload.scale_init_phase_to(
                        num_nodes,
                        gpus,
                        &self.arguments,
                        &self.runtime_arguments,
                    );
                }
            }
            (JobState::PendingReconfiguration, JobState::InReconfiguration) => {
                self.executing_nodes = self.assigned_nodes.clone();
                self.executing_num_gpus_per_node = self.assigned_num_gpus_per_node;
                let num_nodes = self.executing_nodes.len();
                let gpus = self.executing_num_gpus_per_node;
                self.workload
                    .scale_to(num_nodes, gpus, &self.arguments, &self.runtime_arguments);
                self.workload.scale_reconfiguration_phase_to(
                    num_nodes,
                    gpus,
                    &self.arguments,
                    &self.runtime_arguments,
                );
            }
            _ => {}
        }
        if new_state.is_terminal() && self.end_time < 0.0 {
            self.end_time = now;
            self.makespan = self.end_time - self.start_time;
            self.turnaround_time = self.end_time - self.submit_time;
        }
        self.state = new_state;
    }

    /// Records the nodes joining the job during a reconfiguration and scales
    /// the expansion phase to them.
    pub fn set_expanding_nodes(&mut self, nodes: Vec<NodeIndex>) {
        let count = nodes.len();
        self.expanding_nodes = nodes;
        self.workload.scale_expansion_phase_to(
            count,
            self.executing_num_gpus_per_node,
            &self.arguments,
            &self.runtime_arguments,
        );
    }

    /// Adds a node to the policy assignment. Returns true when the node must
    /// be reserved (runtime growth of an already-running elastic job).
    pub fn assign_node(&mut self, node: NodeIndex) -> bool {
        if self.state == JobState::Pending {
            self.assigned_nodes.push(node);
            false
        } else if self.job_type.allows_runtime_assignment() {
            self.assigned_nodes.push(node);
            true
        } else {
            panic!(
                "Assigning nodes during runtime not allowed for {} job {}",
                self.job_type.as_str(),
                self.id
            );
        }
    }

    /// Derives the next lifecycle state after a policy decision.
    pub fn update_state(&mut self) {
        if self.assigned_nodes != self.executing_nodes {
            if self.state == JobState::Pending {
                self.state = JobState::PendingAllocation;
            } else if self.state == JobState::Running {
                self.state = JobState::PendingReconfiguration;
            }
        } else if self.state == JobState::PendingReconfiguration {
            self.state = JobState::Running;
        }
    }

    /// User-declared sizing sanity, checked once at load time.
    pub fn check_specification(&self) {
        if self.job_type == JobType::Rigid {
            if self.num_nodes < 1 {
                panic!("Invalid specification for rigid job: number of nodes cannot be less than 1");
            }
        } else {
            if self.num_nodes_min < 1 {
                panic!(
                    "Invalid specification for non-rigid job: number of minimum nodes cannot be less than 1"
                );
            }
            if self.num_nodes_max < 1 {
                panic!(
                    "Invalid specification for non-rigid job: number of maximum nodes cannot be less than 1"
                );
            }
            if self.num_nodes_min > self.num_nodes_max {
                panic!(
                    "Invalid specification for non-rigid job: minimum number of nodes ({}) is greater than the maximum number of nodes ({})",
                    self.num_nodes_min, self.num_nodes_max
                );
            }
            if self.num_gpus_per_node_min > self.num_gpus_per_node_max {
                panic!(
                    "Invalid specification for non-rigid job: minimum number of GPUs per node ({}) is greater than the maximum number of GPUs per node ({})",
                    self.num_gpus_per_node_min, self.num_gpus_per_node_max
                );
            }
        }
    }

    /// Policy assignment sanity, checked at every decision point. Rigid jobs
    /// must match their declared size exactly, including the GPU count.
    pub fn check_assignment_validity(&self) {
        let assigned = self.assigned_nodes.len();
        if self.job_type == JobType::Rigid {
            if assigned != self.num_nodes {
                panic!(
                    "Invalid configuration for job {}: Number of assigned nodes is expected to be {} but is {}",
                    self.id, self.num_nodes, assigned
                );
            }
            if self.assigned_num_gpus_per_node != self.num_gpus_per_node {
                panic!(
                    "Invalid configuration for job {}: Number of assigned GPUs per node is expected to be {} but is {}",
                    self.id, self.num_gpus_per_node, self.assigned_num_gpus_per_node
                );
            }
        } else {
            if assigned < self.num_nodes_min || assigned > self.num_nodes_max {
                panic!(
                    "Invalid configuration for job {}: Number of assigned nodes is expected to be [{}-{}] but is {}",
                    self.id, self.num_nodes_min, self.num_nodes_max, assigned
                );
            }
            if self.assigned_num_gpus_per_node < self.num_gpus_per_node_min
                || self.assigned_num_gpus_per_node > self.num_gpus_per_node_max
            {
                panic!(
                    "Invalid configuration for job {}: Number of assigned GPUs per node is expected to be [{}-{}] but is {}",
                    self.id,
                    self.num_gpus_per_node_min,
                    self.num_gpus_per_node_max,
                    self.assigned_num_gpus_per_node
                );
            }
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self.state {
            JobState::Completed => "completed",
            JobState::Killed => "killed",
            _ => panic!("Invalid final job status for job {}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::Workload;

    fn empty_workload() -> Workload {
        Workload::for_tests(vec![])
    }

    fn rigid_job(submit: f64) -> Job {
        Job::rigid(
            100.0,
            2,
            0,
            submit,
            HashMap::new(),
            HashMap::new(),
            empty_workload(),
        )
    }

    #[test]
    fn allocation_takeover_sets_start_once() {
        let mut job = rigid_job(5.0);
        job.state = JobState::Pending;
        job.assigned_nodes = vec![0, 1];
        job.update_state();
        assert_eq!(job.state, JobState::PendingAllocation);

        job.set_state(JobState::Running, 12.0);
        assert_eq!(job.start_time, 12.0);
        assert_eq!(job.wait_time, 7.0);
        assert_eq!(job.executing_nodes, vec![0, 1]);

        // a second takeover must not move the start time
        job.state = JobState::PendingAllocation;
        job.set_state(JobState::Running, 20.0);
        assert_eq!(job.start_time, 12.0);
    }

    #[test]
    fn terminal_transition_fills_statistics() {
        let mut job = rigid_job(0.0);
        job.state = JobState::PendingAllocation;
        job.assigned_nodes = vec![0, 1];
        job.set_state(JobState::Running, 3.0);
        job.set_state(JobState::Completed, 13.0);
        assert_eq!(job.end_time, 13.0);
        assert_eq!(job.makespan, 10.0);
        assert_eq!(job.turnaround_time, 13.0);
        assert_eq!(job.status_str(), "completed");
    }

    #[test]
    fn reconfiguration_state_derivation() {
        let mut job = Job::elastic(
            0.0,
            JobType::Malleable,
            1,
            4,
            0,
            0,
            0.0,
            HashMap::new(),
            HashMap::new(),
            empty_workload(),
        );
        job.state = JobState::Running;
        job.executing_nodes = vec![0];
        job.assigned_nodes = vec![0];
        job.update_state();
        assert_eq!(job.state, JobState::Running);

        job.assigned_nodes = vec![0, 1];
        job.update_state();
        assert_eq!(job.state, JobState::PendingReconfiguration);

        // the policy may also revert its decision before the apply step
        job.assigned_nodes = vec![0];
        job.update_state();
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    #[should_panic(expected = "not allowed for rigid")]
    fn rigid_runtime_assignment_is_fatal() {
        let mut job = rigid_job(0.0);
        job.state = JobState::Running;
        job.assign_node(3);
    }

    #[test]
    #[should_panic(expected = "assigned nodes is expected to be")]
    fn rigid_assignment_size_mismatch_is_fatal() {
        let mut job = rigid_job(0.0);
        job.assigned_nodes = vec![0];
        job.check_assignment_validity();
    }

    #[test]
    #[should_panic(expected = "minimum number of nodes")]
    fn contradictory_bounds_are_fatal() {
        Job::elastic(
            0.0,
            JobType::Malleable,
            4,
            2,
            0,
            0,
            0.0,
            HashMap::new(),
            HashMap::new(),
            empty_workload(),
        );
    }
}

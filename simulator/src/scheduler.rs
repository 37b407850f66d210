//! Central orchestrator.
//!
//! Owns the job queue and the modified-jobs delta, invokes the external
//! policy through the gateway, and turns its decisions into per-node
//! commands: allocations, reconfigurations (shrink/grow/swap at safe
//! points), continues and kills. All job lifecycle transitions are
//! serialised through this component.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use dslab_core::{cast, log_debug, log_info, Event, EventHandler, Id, SimulationContext};

use crate::config::SimulationConfig;
use crate::events::{
    EvolvingRequested, InvokeScheduling, JobFinished, JobRunning, JobSubmitted, SchedulerFinalize,
    SchedulingPointReached, WalltimeExceeded, WorkloadProcessed,
};
use crate::job::{JobId, JobState, NodeIndex};
use crate::node::NodeAgent;
use crate::platform::PlatformManager;
use crate::policy::gateway::{collect_job_views, PolicyGateway};
use crate::policy::InvocationType;
use crate::storage::JobStorage;
use crate::sync::{Barrier, SyncContext};
use crate::walltime::WalltimeMonitor;

/// Slack applied to the minimum-scheduling-interval comparison.
pub const SCHEDULING_EPSILON: f64 = 1e-3;

pub struct Scheduler {
    ctx: SimulationContext,
    jobs: Rc<RefCell<JobStorage>>,
    nodes: Vec<Rc<NodeAgent>>,
    platform: Rc<PlatformManager>,
    gateway: PolicyGateway,
    sync: Rc<SyncContext>,
    walltime_monitors: WalltimeMonitor,
    driver_id: Id,

    scheduling_interval: f64,
    min_scheduling_interval: f64,
    schedule_on_job_submit: bool,
    schedule_on_job_finalize: bool,
    schedule_on_scheduling_point: bool,
    grace_period: f64,

    last_invocation: f64,
    current_job_id: JobId,
    job_queue: Vec<JobId>,
    modified_jobs: Vec<JobId>,
}

impl Scheduler {
    pub fn new(
        ctx: SimulationContext,
        config: &SimulationConfig,
        jobs: Rc<RefCell<JobStorage>>,
        nodes: Vec<Rc<NodeAgent>>,
        platform: Rc<PlatformManager>,
        gateway: PolicyGateway,
        sync: Rc<SyncContext>,
        driver_id: Id,
    ) -> Scheduler {
        let walltime_monitors = WalltimeMonitor::new(ctx.clone());
        Scheduler {
            ctx,
            jobs,
            nodes,
            platform,
            gateway,
            sync,
            walltime_monitors,
            driver_id,
            scheduling_interval: config.scheduling_interval,
            min_scheduling_interval: config.min_scheduling_interval,
            schedule_on_job_submit: config.schedule_on_job_submit,
            schedule_on_job_finalize: config.schedule_on_job_finalize,
            schedule_on_scheduling_point: config.schedule_on_scheduling_point,
            grace_period: config.job_kill_grace_period,
            // the first trigger must always reach the policy
            last_invocation: f64::NEG_INFINITY,
            current_job_id: 0,
            job_queue: Vec::new(),
            modified_jobs: Vec::new(),
        }
    }

    /// Starts the periodic invoker when a scheduling interval is configured.
    pub fn start(&self) {
        if self.scheduling_interval > 0.0 {
            self.ctx
                .emit_self(InvokeScheduling {}, self.scheduling_interval);
        }
    }

    /// One policy invocation, rate-limited by the minimum scheduling
    /// interval. A dropped trigger still resumes the requesting job so no
    /// workload stalls at its boundary.
    fn schedule(
        &mut self,
        invocation_type: InvocationType,
        requesting_job: Option<JobId>,
        evolving_request: Option<usize>,
    ) {
        let now = self.ctx.time();
        let at_boundary = matches!(
            invocation_type,
            InvocationType::SchedulingPoint | InvocationType::EvolvingRequest
        );
        if self.min_scheduling_interval > 0.0
            && now - self.last_invocation < self.min_scheduling_interval - SCHEDULING_EPSILON
        {
            if at_boundary {
                self.resume_requesting_job(requesting_job.unwrap());
            }
            return;
        }

        let job_views = collect_job_views(&self.jobs, &self.modified_jobs, requesting_job);
        let node_views = self
            .platform
            .take_modified()
            .into_iter()
            .map(|node| self.nodes[node].wire_view())
            .collect();
        let reply = self.gateway.exchange(
            now,
            invocation_type,
            requesting_job,
            evolving_request,
            job_views,
            node_views,
            &self.platform,
        );
        self.modified_jobs.clear();
        let scheduled = self.gateway.apply(&reply, now, &self.jobs, &self.nodes);

        if at_boundary {
            self.resume_requesting_job(requesting_job.unwrap());
        }
        for job_id in scheduled {
            let state = self.jobs.borrow().job(job_id).state;
            match state {
                JobState::PendingAllocation => self.forward_job_allocation(job_id),
                JobState::PendingKill => self.forward_job_kill(job_id, false),
                _ => {}
            }
            self.modified_jobs.push(job_id);
        }
        self.last_invocation = now;
    }

    /// Continues a job that stopped at a scheduling boundary: kill it, apply
    /// a pending reconfiguration, or respawn on the unchanged node set.
    fn resume_requesting_job(&mut self, job_id: JobId) {
        let state = self.jobs.borrow().job(job_id).state;
        match state {
            JobState::PendingKill => self.forward_job_kill(job_id, false),
            JobState::PendingReconfiguration => self.handle_reconfiguration(job_id),
            JobState::Completed | JobState::Killed => {}
            _ => {
                let executing = self.jobs.borrow().job(job_id).executing_nodes.clone();
                for node in executing {
                    self.nodes[node].continue_job(job_id);
                }
            }
        }
    }

    fn handle_job_submit(&mut self, job_id: JobId) {
        log_info!(self.ctx, "received submission of job {}", job_id);
        {
            let mut jobs = self.jobs.borrow_mut();
            let job = jobs.job_mut(job_id);
            assert_eq!(
                job_id, self.current_job_id,
                "job submissions must arrive in submit-time order"
            );
            job.id = self.current_job_id;
            job.set_state(JobState::Pending, self.ctx.time());
        }
        self.current_job_id += 1;
        self.job_queue.push(job_id);
        log_debug!(self.ctx, "job queue length {}", self.job_queue.len());
        self.modified_jobs.push(job_id);
        if self.schedule_on_job_submit {
            self.schedule(InvocationType::JobSubmit, Some(job_id), None);
        }
    }

    fn handle_scheduling_point(&mut self, job_id: JobId) {
        log_info!(self.ctx, "received scheduling point from job {}", job_id);
        self.modified_jobs.push(job_id);
        if self.schedule_on_scheduling_point {
            self.schedule(InvocationType::SchedulingPoint, Some(job_id), None);
        } else {
            self.resume_requesting_job(job_id);
        }
    }

    fn handle_evolving_request(&mut self, job_id: JobId, num_nodes: usize) {
        log_info!(
            self.ctx,
            "received evolving request for {} node(s) from job {}",
            num_nodes,
            job_id
        );
        self.jobs.borrow_mut().job_mut(job_id).evolving_request = Some(num_nodes);
        self.modified_jobs.push(job_id);
        if self.schedule_on_scheduling_point {
            self.schedule(InvocationType::EvolvingRequest, Some(job_id), Some(num_nodes));
        } else {
            self.resume_requesting_job(job_id);
        }
    }

    fn handle_processed_workload(&mut self, job_id: JobId) {
        log_info!(self.ctx, "received workload processed message from job {}", job_id);
        let executing = self.jobs.borrow().job(job_id).executing_nodes.clone();
        for node in executing {
            self.nodes[node].complete(job_id);
        }
        {
            let mut jobs = self.jobs.borrow_mut();
            let job = jobs.job_mut(job_id);
            job.workload.complete();
            job.set_state(JobState::Completed, self.ctx.time());
        }
        self.clear_reservations(job_id);
        self.job_queue.retain(|id| *id != job_id);
        self.modified_jobs.push(job_id);
        self.walltime_monitors.cancel(job_id);
        self.ctx.emit_now(
            JobFinished {
                job_id,
                killed: false,
            },
            self.driver_id,
        );
        if self.schedule_on_job_finalize {
            self.schedule(InvocationType::JobCompleted, Some(job_id), None);
        }
    }

    fn forward_job_kill(&mut self, job_id: JobId, exceeded_walltime: bool) {
        log_info!(self.ctx, "killing job {}", job_id);
        if !exceeded_walltime {
            self.walltime_monitors.cancel(job_id);
        }
        let executing = self.jobs.borrow().job(job_id).executing_nodes.clone();
        for node in executing {
            self.nodes[node].kill(job_id);
        }
        self.jobs
            .borrow_mut()
            .job_mut(job_id)
            .set_state(JobState::Killed, self.ctx.time());
        self.clear_reservations(job_id);
        self.job_queue.retain(|id| *id != job_id);
        self.modified_jobs.push(job_id);
        self.ctx.emit_now(
            JobFinished {
                job_id,
                killed: true,
            },
            self.driver_id,
        );
        if exceeded_walltime && self.schedule_on_job_finalize {
            self.schedule(InvocationType::JobKilled, Some(job_id), None);
        }
    }

    /// Dispatches a fresh allocation: one barrier sized to the assigned set,
    /// ranks in iteration order. The job performs its takeover to RUNNING
    /// once every rank passed the init phase; the workload is scaled to the
    /// assigned geometry before the first worker spawns so the init phase
    /// sees concrete payloads.
    fn forward_job_allocation(&mut self, job_id: JobId) {
        {
            let mut jobs = self.jobs.borrow_mut();
            let job = jobs.job_mut(job_id);
            if job.job_type != crate::job::JobType::Rigid {
                let num_nodes = job.assigned_nodes.len();
                let gpus = job.assigned_num_gpus_per_node;
                job.workload
                    .scale_to(num_nodes, gpus, &job.arguments, &job.runtime_arguments);
                job.workload
                    .scale_init_phase_to(num_nodes, gpus, &job.arguments, &job.runtime_arguments);
            }
        }
        let assigned = self.jobs.borrow().job(job_id).assigned_nodes.clone();
        log_info!(
            self.ctx,
            "allocating job {} on nodes {:?}",
            job_id,
            assigned
        );
        let barrier = Barrier::new(self.sync.clone(), assigned.len());
        for (rank, node) in assigned.iter().enumerate() {
            self.nodes[*node].allocate(job_id, rank, barrier.clone(), assigned.clone());
        }
    }

    /// Applies a changed assignment to a running job: retained nodes are
    /// reconfigured, new nodes expand, vacated nodes are released. All
    /// members synchronise on one fresh barrier before main phases resume.
    fn handle_reconfiguration(&mut self, job_id: JobId) {
        let previous: Vec<NodeIndex> = self.jobs.borrow().job(job_id).executing_nodes.clone();
        let previous_set: FxHashSet<NodeIndex> = previous.iter().copied().collect();

        // the state transition flips the executing set to the assigned one
        // and rescales the workload
        self.jobs
            .borrow_mut()
            .job_mut(job_id)
            .set_state(JobState::InReconfiguration, self.ctx.time());
        let new_nodes: Vec<NodeIndex> = self.jobs.borrow().job(job_id).executing_nodes.clone();
        let new_set: FxHashSet<NodeIndex> = new_nodes.iter().copied().collect();
        log_info!(
            self.ctx,
            "reconfiguring job {} from {:?} to {:?}",
            job_id,
            previous,
            new_nodes
        );

        let barrier = Barrier::new(self.sync.clone(), new_nodes.len());
        let mut expand_nodes: Vec<NodeIndex> = Vec::new();
        let mut expand_member_ranks: Vec<usize> = Vec::new();
        for (rank, node) in new_nodes.iter().enumerate() {
            if previous_set.contains(node) {
                self.nodes[*node].reconfigure(job_id, rank, barrier.clone(), new_nodes.clone());
            } else {
                expand_nodes.push(*node);
                expand_member_ranks.push(rank);
            }
        }

        self.jobs
            .borrow_mut()
            .job_mut(job_id)
            .set_expanding_nodes(expand_nodes.clone());
        if !expand_nodes.is_empty() {
            let expand_barrier = Barrier::new(self.sync.clone(), expand_nodes.len());
            for (expand_rank, (node, rank)) in expand_nodes
                .iter()
                .zip(expand_member_ranks.into_iter())
                .enumerate()
            {
                self.nodes[*node].expand(
                    job_id,
                    rank,
                    expand_rank,
                    barrier.clone(),
                    expand_barrier.clone(),
                    new_nodes.clone(),
                );
            }
        }

        for node in previous {
            if !new_set.contains(&node) {
                self.nodes[node].complete(job_id);
            }
        }
    }

    fn clear_reservations(&self, job_id: JobId) {
        let assigned = self.jobs.borrow().job(job_id).assigned_nodes.clone();
        for node in assigned {
            self.nodes[node].remove_expected(job_id);
        }
    }
}

impl EventHandler for Scheduler {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            JobSubmitted { job_id } => {
                self.handle_job_submit(job_id);
            }
            InvokeScheduling {} => {
                // a tick emitted before finalization may still be in flight
                if !self.platform.finished() {
                    self.schedule(InvocationType::Periodic, None, None);
                    if self.scheduling_interval > 0.0 {
                        self.ctx
                            .emit_self(InvokeScheduling {}, self.scheduling_interval);
                    }
                }
            }
            SchedulingPointReached { job_id } => {
                self.handle_scheduling_point(job_id);
            }
            EvolvingRequested { job_id, num_nodes } => {
                self.handle_evolving_request(job_id, num_nodes);
            }
            WorkloadProcessed { job_id } => {
                self.handle_processed_workload(job_id);
            }
            WalltimeExceeded { job_id } => {
                self.walltime_monitors.fired(job_id);
                if !self.jobs.borrow().job(job_id).state.is_terminal() {
                    log_info!(self.ctx, "job {} exceeded its walltime", job_id);
                    self.forward_job_kill(job_id, true);
                }
            }
            JobRunning { job_id } => {
                log_debug!(self.ctx, "job {} is running", job_id);
                let walltime = self.jobs.borrow().job(job_id).walltime;
                self.walltime_monitors.arm(job_id, walltime, self.grace_period);
                self.modified_jobs.push(job_id);
            }
            SchedulerFinalize {} => {
                log_info!(self.ctx, "received finalization");
                self.gateway.finalize();
                self.platform.set_finished();
            }
        })
    }
}

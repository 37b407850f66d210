//! Application worker: executes one job's workload on one node for one rank.
//!
//! A worker incarnation runs exactly one pass: optional init phase, optional
//! reconfiguration phase, the takeover barrier, optional expansion phase,
//! then main phases until the workload ends or a scheduling boundary
//! (voluntary scheduling point or evolving request) hands control back to
//! the scheduler. Kills are cooperative: the cancellation flag is checked
//! after every suspension point.

use std::cell::Cell;
use std::rc::Rc;

use futures::future::{join, join_all, LocalBoxFuture};
use futures::FutureExt;

use dslab_core::{log_debug, log_info};

use crate::events::{EvolvingRequested, JobRunning, SchedulingPointReached, WorkloadProcessed};
use crate::formula::EvalContext;
use crate::job::{JobId, JobState, NodeIndex};
use crate::node::NodeAgent;
use crate::sync::Barrier;
use crate::tasks::{Task, TaskKind};
use crate::workload::{Phase, Workload};

/// Completion handle of an asynchronous execution; owned, so it can be
/// carried across phases until the next collection point.
type AsyncHandle = LocalBoxFuture<'static, ()>;

struct SlotSnapshot {
    rank: usize,
    expand_rank: usize,
    barrier: Rc<Barrier>,
    expand_barrier: Option<Rc<Barrier>>,
    members: Vec<NodeIndex>,
    cancel: Rc<Cell<bool>>,
    initializing: bool,
    reconfiguring: bool,
    expanding: bool,
}

pub(crate) struct Application {
    node: Rc<NodeAgent>,
    job_id: JobId,
}

impl Application {
    pub fn new(node: Rc<NodeAgent>, job_id: JobId) -> Application {
        Application { node, job_id }
    }

    pub async fn run(self) {
        let snapshot = self.node.with_slot(self.job_id, |slot| SlotSnapshot {
            rank: slot.rank,
            expand_rank: slot.expand_rank,
            barrier: slot.barrier.clone(),
            expand_barrier: slot.expand_barrier.clone(),
            members: slot.members.clone(),
            cancel: slot.cancel.clone(),
            initializing: slot.initializing,
            reconfiguring: slot.reconfiguring,
            expanding: slot.expanding,
        });
        let slot = match snapshot {
            Some(slot) => slot,
            None => return,
        };
        let rank = slot.rank;
        let barrier = slot.barrier.clone();
        let members = slot.members.clone();
        let cancel = slot.cancel.clone();

        if slot.initializing {
            let phase = self.workload_phase(|w| w.init_phase.clone());
            if let Some(phase) = phase {
                log_debug!(self.node.ctx, "job {} rank {}: init phase", self.job_id, rank);
                self.run_one_time_phase(&phase, &members, rank, &barrier, &cancel)
                    .await;
                if cancel.get() {
                    return;
                }
            }
            self.node.update_slot(self.job_id, |s| s.initializing = false);
        }

        if slot.reconfiguring {
            let phase = self.workload_phase(|w| w.reconfiguration_phase.clone());
            if let Some(phase) = phase {
                log_debug!(
                    self.node.ctx,
                    "job {} rank {}: reconfiguration phase",
                    self.job_id,
                    rank
                );
                self.run_one_time_phase(&phase, &members, rank, &barrier, &cancel)
                    .await;
                if cancel.get() {
                    return;
                }
            }
            self.node.update_slot(self.job_id, |s| s.reconfiguring = false);
        }

        barrier.wait().await;
        if cancel.get() {
            return;
        }
        if rank == 0 {
            // final takeover: the executing set becomes the assigned set and
            // the scheduler arms the walltime monitor
            let now = self.node.ctx.time();
            self.node
                .jobs
                .borrow_mut()
                .job_mut(self.job_id)
                .set_state(JobState::Running, now);
            self.node.ctx.emit_now(
                JobRunning { job_id: self.job_id },
                self.node.scheduler_id.get(),
            );
        }

        if slot.expanding {
            let phase = self.workload_phase(|w| w.expansion_phase.clone());
            if let Some(phase) = phase {
                let expanding_nodes = self
                    .node
                    .jobs
                    .borrow()
                    .job(self.job_id)
                    .expanding_nodes
                    .clone();
                let expand_barrier = slot
                    .expand_barrier
                    .clone()
                    .expect("expanding node without an expansion barrier");
                log_debug!(
                    self.node.ctx,
                    "job {} expand rank {}: expansion phase",
                    self.job_id,
                    slot.expand_rank
                );
                self.run_one_time_phase(
                    &phase,
                    &expanding_nodes,
                    slot.expand_rank,
                    &expand_barrier,
                    &cancel,
                )
                .await;
                if cancel.get() {
                    return;
                }
            }
            self.node.update_slot(self.job_id, |s| s.expanding = false);
        }

        self.run_main_phases(rank, &members, &barrier, &cancel).await;
    }

    async fn run_main_phases(
        &self,
        rank: usize,
        members: &[NodeIndex],
        barrier: &Rc<Barrier>,
        cancel: &Rc<Cell<bool>>,
    ) {
        let (job_type, mut local_phases) = {
            let jobs = self.node.jobs.borrow();
            let job = jobs.job(self.job_id);
            (job.job_type, job.workload.phases.clone())
        };

        let mut handles: Vec<AsyncHandle> = Vec::new();
        let mut popped: u32 = 0;
        let mut initial_phase = true;

        while let Some(phase) = local_phases.front().cloned() {
            let is_last_phase = local_phases.len() == 1;
            let mut remaining = phase.iterations;
            while remaining > 0 {
                if !initial_phase {
                    if job_type.is_evolving() && phase.has_evolving_model() {
                        let requested = self.evaluate_evolving(&phase, remaining, members);
                        if requested != members.len() {
                            join_all(handles.drain(..)).await;
                            barrier.wait().await;
                            if cancel.get() {
                                return;
                            }
                            if rank == 0 {
                                self.advance_workload(popped, remaining);
                                log_info!(
                                    self.node.ctx,
                                    "job {} requests {} node(s)",
                                    self.job_id,
                                    requested
                                );
                                self.node.ctx.emit_now(
                                    EvolvingRequested {
                                        job_id: self.job_id,
                                        num_nodes: requested,
                                    },
                                    self.node.scheduler_id.get(),
                                );
                            }
                            return;
                        }
                    } else if job_type.is_malleable()
                        && phase.scheduling_point
                        && !(is_last_phase && remaining == 1 && !phase.final_scheduling_point)
                    {
                        join_all(handles.drain(..)).await;
                        barrier.wait().await;
                        if cancel.get() {
                            return;
                        }
                        if rank == 0 {
                            self.advance_workload(popped, remaining);
                            self.node.ctx.emit_now(
                                SchedulingPointReached { job_id: self.job_id },
                                self.node.scheduler_id.get(),
                            );
                        }
                        return;
                    }
                }
                if phase.barrier {
                    join_all(handles.drain(..)).await;
                    barrier.wait().await;
                    if cancel.get() {
                        return;
                    }
                }
                for task in &phase.tasks {
                    let new_handles = self.run_task(task, members, rank, barrier, cancel).await;
                    handles.extend(new_handles);
                    if cancel.get() {
                        return;
                    }
                }
                remaining -= 1;
                initial_phase = false;
            }
            local_phases.pop_front();
            popped += 1;
        }

        join_all(handles.drain(..)).await;
        barrier.wait().await;
        if cancel.get() {
            return;
        }
        if rank == 0 {
            log_info!(self.node.ctx, "job {} processed its workload", self.job_id);
            self.node.ctx.emit_now(
                WorkloadProcessed { job_id: self.job_id },
                self.node.scheduler_id.get(),
            );
        }
    }

    async fn run_one_time_phase(
        &self,
        phase: &Phase,
        members: &[NodeIndex],
        rank: usize,
        barrier: &Rc<Barrier>,
        cancel: &Rc<Cell<bool>>,
    ) {
        let mut handles: Vec<AsyncHandle> = Vec::new();
        for _ in 0..phase.iterations {
            for task in &phase.tasks {
                let new_handles = self.run_task(task, members, rank, barrier, cancel).await;
                handles.extend(new_handles);
                if cancel.get() {
                    return;
                }
            }
            if phase.barrier {
                barrier.wait().await;
                if cancel.get() {
                    return;
                }
            }
        }
        join_all(handles).await;
    }

    /// Runs one task (all its iterations); asynchronous executions are
    /// returned as handles owned by the caller until the next collection
    /// point.
    fn run_task<'a>(
        &'a self,
        task: &'a Task,
        members: &'a [NodeIndex],
        rank: usize,
        barrier: &'a Rc<Barrier>,
        cancel: &'a Rc<Cell<bool>>,
    ) -> LocalBoxFuture<'a, Vec<AsyncHandle>> {
        async move {
            let mut collected: Vec<AsyncHandle> = Vec::new();
            let iterations = task.iterations;
            if iterations > 1 {
                log_debug!(
                    self.node.ctx,
                    "starting task {} with {} iterations",
                    task.name,
                    iterations
                );
            }
            let task_start = self.node.ctx.time();
            for _ in 0..iterations {
                if task.synchronized {
                    barrier.wait().await;
                    if cancel.get() {
                        return collected;
                    }
                }
                if task.is_asynchronous() {
                    collected.push(self.execute_async(task, members, rank));
                } else {
                    self.execute(task, members, rank, barrier, cancel).await;
                }
                if cancel.get() {
                    return collected;
                }
            }
            if self.node.monitoring.borrow().log_task_times() {
                let duration = self.node.ctx.time() - task_start;
                self.node.monitoring.borrow_mut().add_task_time(
                    self.node.ctx.time(),
                    self.job_id,
                    &self.node.name,
                    &task.name,
                    duration,
                );
            }
            collected
        }
        .boxed_local()
    }

    /// Synchronous execution of one task iteration.
    async fn execute(
        &self,
        task: &Task,
        members: &[NodeIndex],
        rank: usize,
        barrier: &Rc<Barrier>,
        cancel: &Rc<Cell<bool>>,
    ) {
        match &task.kind {
            TaskKind::BusyWait { delays } => {
                self.node.busy_wait(delays.sizes[rank]).await;
            }
            TaskKind::Idle { delays } => {
                if delays.sizes[rank] > 0.0 {
                    self.node.ctx.sleep(delays.sizes[rank]).await;
                }
            }
            TaskKind::CpuCombined {
                flops,
                payloads,
                coupled,
            } => {
                self.execute_cpu(
                    flops.as_ref().map(|f| f.sizes.as_slice()),
                    payloads.as_ref().map(|p| p.sizes.as_slice()),
                    *coupled,
                    members,
                    rank,
                    barrier,
                )
                .await;
            }
            TaskKind::GpuCombined { flops, comm } => {
                self.execute_gpu(
                    flops.as_ref().map(|f| f.sizes.as_slice()),
                    comm.as_ref().map(|c| (&c.intra_node, &c.inter_node)),
                    members,
                    rank,
                    barrier,
                )
                .await;
            }
            TaskKind::PfsRead { sizes } => {
                self.node.pfs_read(sizes.sizes[rank]).await;
            }
            TaskKind::PfsWrite { sizes } => {
                self.node.pfs_write(sizes.sizes[rank]).await;
            }
            TaskKind::BbRead { sizes } => {
                self.node.bb_read(sizes.sizes[rank], members).await;
            }
            TaskKind::BbWrite { sizes } => {
                self.node.bb_write(sizes.sizes[rank], members).await;
            }
            TaskKind::Sequence { tasks } => {
                let mut handles: Vec<AsyncHandle> = Vec::new();
                for sub_task in tasks {
                    let new_handles = self.run_task(sub_task, members, rank, barrier, cancel).await;
                    handles.extend(new_handles);
                    if cancel.get() {
                        break;
                    }
                }
                join_all(handles).await;
            }
        }
    }

    async fn execute_cpu(
        &self,
        flops: Option<&[f64]>,
        payloads: Option<&[f64]>,
        coupled: bool,
        members: &[NodeIndex],
        rank: usize,
        barrier: &Rc<Barrier>,
    ) {
        if coupled && flops.is_some() && payloads.is_some() {
            // single joint execution issued by rank 0 for all members
            barrier.wait().await;
            if rank == 0 {
                let flops = flops.unwrap();
                let mut parts = Vec::new();
                for (i, member) in members.iter().enumerate() {
                    if flops[i] > 0.0 {
                        parts.push(self.node.exec_flops_on(*member, flops[i]));
                    }
                }
                parts.push(self.node.exec_transfer_matrix(payloads.unwrap(), members));
                join_all(parts).await;
            }
            barrier.wait().await;
            return;
        }
        let own_computation = match flops {
            Some(flops) if flops[rank] > 0.0 => {
                log_debug!(self.node.ctx, "processing {} FLOPS", flops[rank]);
                Some(self.node.exec_flops(flops[rank]))
            }
            _ => None,
        };
        if let Some(payloads) = payloads {
            barrier.wait().await;
            if rank == 0 {
                self.node.exec_transfer_matrix(payloads, members).await;
            }
            barrier.wait().await;
        }
        if let Some(computation) = own_computation {
            computation.await;
        }
    }

    async fn execute_gpu(
        &self,
        flops: Option<&[f64]>,
        comm: Option<(&Vec<f64>, &Vec<f64>)>,
        members: &[NodeIndex],
        rank: usize,
        barrier: &Rc<Barrier>,
    ) {
        let num_gpus = self
            .node
            .jobs
            .borrow()
            .job(self.job_id)
            .executing_num_gpus_per_node;
        if num_gpus == 0 {
            panic!("GPU task not executable: no GPUs assigned");
        }
        let mut local: Vec<AsyncHandle> = Vec::new();
        if let Some(flops) = flops {
            if flops[rank] > 0.0 {
                let per_gpu = flops[rank] / num_gpus as f64;
                local.extend(self.node.exec_gpu_computation_async(num_gpus, per_gpu));
            }
        }
        let mut inter_node: Option<&Vec<f64>> = None;
        if let Some((intra, inter)) = comm {
            if intra.iter().any(|&b| b > 0.0) {
                local.push(self.node.exec_gpu_transfer_async(intra, num_gpus));
            }
            if inter.iter().any(|&b| b > 0.0) && members.len() > 1 {
                inter_node = Some(inter);
            }
        }
        // inter-node traffic synchronises on the job barrier while kernels
        // and the intra-node link transfer proceed concurrently
        let inter_part = async {
            if let Some(payloads) = inter_node {
                barrier.wait().await;
                if rank == 0 {
                    self.node.exec_transfer_matrix(payloads, members).await;
                }
                barrier.wait().await;
            }
        };
        join(join_all(local), inter_part).await;
    }

    /// Asynchronous execution: the I/O is issued immediately, the returned
    /// handle resolves on completion.
    fn execute_async(&self, task: &Task, members: &[NodeIndex], rank: usize) -> AsyncHandle {
        match &task.kind {
            TaskKind::PfsRead { sizes } => self.node.pfs_read(sizes.sizes[rank]),
            TaskKind::PfsWrite { sizes } => self.node.pfs_write(sizes.sizes[rank]),
            TaskKind::BbRead { sizes } => self.node.bb_read(sizes.sizes[rank], members),
            TaskKind::BbWrite { sizes } => self.node.bb_write(sizes.sizes[rank], members),
            _ => panic!("Task {} does not support asynchronous execution", task.name),
        }
    }

    fn workload_phase(&self, select: impl FnOnce(&Workload) -> Option<Phase>) -> Option<Phase> {
        let jobs = self.node.jobs.borrow();
        select(&jobs.job(self.job_id).workload)
    }

    fn advance_workload(&self, popped: u32, remaining: u32) {
        self.node
            .jobs
            .borrow_mut()
            .job_mut(self.job_id)
            .workload
            .advance(popped, remaining);
    }

    /// Evaluates the phase's evolving model at the current phase iteration;
    /// out-of-range results are clipped or fatal depending on configuration.
    fn evaluate_evolving(&self, phase: &Phase, remaining: u32, members: &[NodeIndex]) -> usize {
        let jobs = self.node.jobs.borrow();
        let job = jobs.job(self.job_id);
        let model = phase.evolving_model.as_ref().unwrap();
        let ctx = EvalContext::new(members.len() as u32, job.executing_num_gpus_per_node)
            .with_arguments(&job.arguments)
            .with_arguments(&job.runtime_arguments)
            .with_phase_iteration(phase.initial_iterations - remaining);
        let value = model.evaluate(&ctx).floor();
        if value < 0.0 {
            panic!(
                "Evolving model '{}' of job {} evaluated to {}",
                model.source(),
                job.id,
                value
            );
        }
        let requested = value as usize;
        if requested < job.num_nodes_min || requested > job.num_nodes_max {
            if self.node.clip_evolving_requests {
                requested.clamp(job.num_nodes_min, job.num_nodes_max)
            } else {
                panic!(
                    "Evolving model '{}' of job {} requested {} nodes outside [{}-{}]",
                    model.source(),
                    job.id,
                    requested,
                    job.num_nodes_min,
                    job.num_nodes_max
                );
            }
        } else {
            requested
        }
    }
}

//! Compute-node agent.
//!
//! One agent per node. The scheduler drives it through direct calls
//! (allocate/continue/reconfigure/expand/complete/kill/expect); the agent
//! spawns one application worker per (job, incarnation) and owns the node's
//! simulation resources: compute, burst-buffer disk, GPUs and the network
//! attachment.
//!
//! Execution helpers issue their resource requests immediately and return
//! owned completion futures, so a returned handle can be held across other
//! suspension points without losing its completion event.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use futures::future::{join_all, LocalBoxFuture};
use futures::{select, FutureExt};
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use dslab_compute::multicore::{
    CompFailed, CompFinished, CompStarted, Compute, CoresDependency,
};
use dslab_core::{cast, log_debug, Event, EventHandler, Id, SimulationContext};
use dslab_network::{DataTransferCompleted, Network};
use dslab_storage::disk::Disk;
use dslab_storage::events::{DataReadCompleted, DataWriteCompleted};

use crate::application::Application;
use crate::gpu::{Gpu, GpuState};
use crate::job::{JobId, NodeIndex};
use crate::monitoring::Monitoring;
use crate::platform::{NodeKind, PlatformManager};
use crate::storage::JobStorage;
use crate::sync::{Barrier, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Free,
    Allocated,
    Reserved,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Free => "free",
            NodeState::Allocated => "allocated",
            NodeState::Reserved => "reserved",
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            NodeState::Free => 0,
            NodeState::Allocated => 1,
            NodeState::Reserved => 2,
        }
    }
}

/// Per-job bookkeeping kept between worker incarnations.
pub(crate) struct JobSlot {
    pub rank: usize,
    pub expand_rank: usize,
    pub barrier: Rc<Barrier>,
    pub expand_barrier: Option<Rc<Barrier>>,
    pub members: Vec<NodeIndex>,
    pub initializing: bool,
    pub reconfiguring: bool,
    pub expanding: bool,
    pub cancel: Rc<Cell<bool>>,
}

pub struct NodeAgent {
    pub index: NodeIndex,
    pub name: String,
    pub kind: NodeKind,
    pub(crate) ctx: SimulationContext,

    pub(crate) compute: Rc<RefCell<Compute>>,
    pub(crate) network: Option<Rc<RefCell<Network>>>,
    pub(crate) burst_buffer: Option<Rc<RefCell<Disk>>>,
    pub(crate) flops_per_byte: f64,
    pub(crate) speed: u64,
    pub(crate) cores: u32,
    pub(crate) pfs_hosts: Vec<Id>,
    pub(crate) gpus: Vec<Rc<Gpu>>,
    pub(crate) gpu_link_mutex: Rc<Mutex>,
    pub(crate) gpu_to_gpu_bw: f64,

    pub(crate) jobs: Rc<RefCell<JobStorage>>,
    pub(crate) platform: Rc<PlatformManager>,
    pub(crate) monitoring: Rc<RefCell<Monitoring>>,
    pub(crate) scheduler_id: Cell<Id>,
    pub(crate) allow_oversubscription: bool,
    pub(crate) clip_evolving_requests: bool,

    running_jobs: RefCell<BTreeSet<JobId>>,
    expected_jobs: RefCell<BTreeSet<JobId>>,
    slots: RefCell<FxHashMap<JobId, JobSlot>>,

    self_ref: RefCell<Weak<NodeAgent>>,
}

#[allow(clippy::too_many_arguments)]
impl NodeAgent {
    pub(crate) fn new(
        index: NodeIndex,
        name: String,
        kind: NodeKind,
        ctx: SimulationContext,
        compute: Rc<RefCell<Compute>>,
        network: Option<Rc<RefCell<Network>>>,
        burst_buffer: Option<Rc<RefCell<Disk>>>,
        flops_per_byte: f64,
        speed: u64,
        cores: u32,
        pfs_hosts: Vec<Id>,
        gpus: Vec<Rc<Gpu>>,
        gpu_link_mutex: Rc<Mutex>,
        gpu_to_gpu_bw: f64,
        jobs: Rc<RefCell<JobStorage>>,
        platform: Rc<PlatformManager>,
        monitoring: Rc<RefCell<Monitoring>>,
        allow_oversubscription: bool,
        clip_evolving_requests: bool,
    ) -> Rc<NodeAgent> {
        let agent = Rc::new(NodeAgent {
            index,
            name,
            kind,
            ctx,
            compute,
            network,
            burst_buffer,
            flops_per_byte,
            speed,
            cores,
            pfs_hosts,
            gpus,
            gpu_link_mutex,
            gpu_to_gpu_bw,
            jobs,
            platform,
            monitoring,
            scheduler_id: Cell::new(u32::MAX),
            allow_oversubscription,
            clip_evolving_requests,
            running_jobs: RefCell::new(BTreeSet::new()),
            expected_jobs: RefCell::new(BTreeSet::new()),
            slots: RefCell::new(FxHashMap::default()),
            self_ref: RefCell::new(Weak::new()),
        });
        *agent.self_ref.borrow_mut() = Rc::downgrade(&agent);
        agent.platform.mark_modified(index);
        agent.collect_statistics();
        agent
    }

    pub fn set_scheduler(&self, scheduler_id: Id) {
        self.scheduler_id.set(scheduler_id);
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn state(&self) -> NodeState {
        if !self.running_jobs.borrow().is_empty() {
            NodeState::Allocated
        } else if !self.expected_jobs.borrow().is_empty() {
            NodeState::Reserved
        } else {
            NodeState::Free
        }
    }

    pub fn running_jobs(&self) -> Vec<JobId> {
        self.running_jobs.borrow().iter().copied().collect()
    }

    pub fn expected_jobs(&self) -> Vec<JobId> {
        self.expected_jobs.borrow().iter().copied().collect()
    }

    fn collect_statistics(&self) {
        self.monitoring.borrow_mut().add_node_utilization(
            self.ctx.time(),
            &self.name,
            self.state().as_str(),
            &self.running_jobs(),
            &self.expected_jobs(),
        );
    }

    fn spawn_worker(&self, job_id: JobId) {
        let node = self
            .self_ref
            .borrow()
            .upgrade()
            .expect("node agent self reference lost");
        self.ctx.spawn(Application::new(node, job_id).run());
    }

    /// First placement of a job on this node.
    pub fn allocate(&self, job_id: JobId, rank: usize, barrier: Rc<Barrier>, members: Vec<NodeIndex>) {
        if !self.allow_oversubscription && !self.running_jobs.borrow().is_empty() {
            panic!(
                "Node {} already allocated to job {} and cannot be assigned to job {}",
                self.index,
                self.running_jobs.borrow().iter().next().unwrap(),
                job_id
            );
        }
        log_debug!(self.ctx, "allocating job {} with rank {}", job_id, rank);
        self.slots.borrow_mut().insert(
            job_id,
            JobSlot {
                rank,
                expand_rank: 0,
                barrier,
                expand_barrier: None,
                members,
                initializing: true,
                reconfiguring: false,
                expanding: false,
                cancel: Rc::new(Cell::new(false)),
            },
        );
        self.running_jobs.borrow_mut().insert(job_id);
        self.platform.mark_modified(self.index);
        self.collect_statistics();
        self.spawn_worker(job_id);
    }

    /// Respawns the worker after a scheduling point that did not change the
    /// node set; bookkeeping is reused as-is.
    pub fn continue_job(&self, job_id: JobId) {
        log_debug!(self.ctx, "continuing job {}", job_id);
        self.spawn_worker(job_id);
    }

    /// Reconfiguration of a retained node: new rank and barrier, the
    /// reconfiguration phase runs before main phases resume.
    pub fn reconfigure(&self, job_id: JobId, rank: usize, barrier: Rc<Barrier>, members: Vec<NodeIndex>) {
        log_debug!(self.ctx, "reconfiguring job {} with rank {}", job_id, rank);
        {
            let mut slots = self.slots.borrow_mut();
            let slot = slots
                .get_mut(&job_id)
                .unwrap_or_else(|| panic!("Node {} has no bookkeeping for job {}", self.index, job_id));
            slot.rank = rank;
            slot.barrier = barrier;
            slot.members = members;
            slot.reconfiguring = true;
        }
        self.spawn_worker(job_id);
    }

    /// A node newly joining a running job: runs the reconfiguration phase as
    /// part of the takeover plus the expansion phase on the expansion
    /// barrier.
    pub fn expand(
        &self,
        job_id: JobId,
        rank: usize,
        expand_rank: usize,
        barrier: Rc<Barrier>,
        expand_barrier: Rc<Barrier>,
        members: Vec<NodeIndex>,
    ) {
        if !self.allow_oversubscription {
            let running = self.running_jobs.borrow();
            if !running.is_empty() && !running.contains(&job_id) {
                panic!(
                    "Node {} already allocated to job {} and cannot be expanded for job {}",
                    self.index,
                    running.iter().next().unwrap(),
                    job_id
                );
            }
        }
        log_debug!(
            self.ctx,
            "expanding job {} with rank {} (expand rank {})",
            job_id,
            rank,
            expand_rank
        );
        self.slots.borrow_mut().insert(
            job_id,
            JobSlot {
                rank,
                expand_rank,
                barrier,
                expand_barrier: Some(expand_barrier),
                members,
                initializing: false,
                reconfiguring: true,
                expanding: true,
                cancel: Rc::new(Cell::new(false)),
            },
        );
        self.running_jobs.borrow_mut().insert(job_id);
        self.platform.mark_modified(self.index);
        self.collect_statistics();
        self.spawn_worker(job_id);
    }

    /// Releases the node from a job whose worker has already returned.
    pub fn complete(&self, job_id: JobId) {
        self.slots.borrow_mut().remove(&job_id);
        self.running_jobs.borrow_mut().remove(&job_id);
        self.platform.mark_modified(self.index);
        self.collect_statistics();
    }

    /// Terminates the job's worker immediately; its future drains at the
    /// next suspension point and is abandoned to the runtime.
    pub fn kill(&self, job_id: JobId) {
        if let Some(slot) = self.slots.borrow_mut().remove(&job_id) {
            slot.cancel.set(true);
        }
        self.running_jobs.borrow_mut().remove(&job_id);
        self.platform.mark_modified(self.index);
        self.collect_statistics();
    }

    /// Reserves the node for a job the policy has pre-assigned.
    pub fn expect(&self, job_id: JobId) {
        if !self.allow_oversubscription {
            let running = self.running_jobs.borrow();
            if !running.contains(&job_id) && !running.is_empty() {
                panic!(
                    "Node {} already allocated and cannot be reserved for job {}",
                    self.index, job_id
                );
            }
            let expected = self.expected_jobs.borrow();
            if !expected.contains(&job_id) && !expected.is_empty() {
                panic!(
                    "Node {} already reserved and cannot be reserved for job {}",
                    self.index, job_id
                );
            }
        }
        self.expected_jobs.borrow_mut().insert(job_id);
        self.platform.mark_modified(self.index);
        self.collect_statistics();
    }

    pub fn remove_expected(&self, job_id: JobId) {
        let removed = self.expected_jobs.borrow_mut().remove(&job_id);
        if removed {
            self.platform.mark_modified(self.index);
            self.collect_statistics();
        }
    }

    pub(crate) fn with_slot<R>(&self, job_id: JobId, f: impl FnOnce(&JobSlot) -> R) -> Option<R> {
        self.slots.borrow().get(&job_id).map(f)
    }

    pub(crate) fn update_slot(&self, job_id: JobId, f: impl FnOnce(&mut JobSlot)) {
        if let Some(slot) = self.slots.borrow_mut().get_mut(&job_id) {
            f(slot);
        }
    }

    /// Node view shipped to the external policy.
    pub fn wire_view(&self) -> Value {
        json!({
            "id": self.index,
            "type": self.kind.code(),
            "state": self.state().code(),
            "assigned_jobs": self.running_jobs(),
            "gpus": self
                .gpus
                .iter()
                .map(|gpu| json!({"id": gpu.id, "state": gpu.state().code()}))
                .collect::<Vec<_>>(),
        })
    }

    // Execution helpers used by application workers. Each issues its
    // requests before returning, so completion events are never missed.

    /// Computation of `flops` on a member node's compute, spreading over the
    /// available cores; completion is routed back to this node.
    pub(crate) fn exec_flops_on(&self, member: NodeIndex, flops: f64) -> LocalBoxFuture<'static, ()> {
        let compute = if member == self.index {
            self.compute.clone()
        } else {
            self.platform.resources(member).compute.clone()
        };
        let cores = self.platform.resources(member).cores;
        let request_id = compute.borrow_mut().run(
            flops as u64,
            0,
            1,
            cores,
            CoresDependency::Linear,
            self.ctx.id(),
        );
        let finished = self.ctx.recv_event_by_key::<CompFinished>(request_id);
        let failed = self.ctx.recv_event_by_key::<CompFailed>(request_id);
        let node_index = self.index;
        async move {
            let mut finished = finished.fuse();
            let mut failed = failed.fuse();
            select! {
                _ = finished => {}
                f = failed => {
                    panic!("Computation failed on node {}: {:?}", node_index, f.data.reason);
                }
            }
        }
        .boxed_local()
    }

    pub(crate) fn exec_flops(&self, flops: f64) -> LocalBoxFuture<'static, ()> {
        self.exec_flops_on(self.index, flops)
    }

    /// Occupies this node's CPU for `delay` wall-clock seconds.
    pub(crate) async fn busy_wait(&self, delay: f64) {
        if delay <= 0.0 {
            return;
        }
        log_debug!(self.ctx, "waiting {} seconds", delay);
        self.exec_flops(delay * self.speed as f64 * self.cores as f64)
            .await;
    }

    /// Issues every positive off-diagonal cell of a sender×receiver payload
    /// matrix as a network transfer; the returned handle resolves when all
    /// transfers completed. Called by rank 0 only.
    pub(crate) fn exec_transfer_matrix(
        &self,
        payloads: &[f64],
        members: &[NodeIndex],
    ) -> LocalBoxFuture<'static, ()> {
        let n = members.len();
        let mut completions = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let bytes = payloads[i * n + j];
                if bytes > 0.0 && i != j {
                    let network = self.network.as_ref().unwrap_or_else(|| {
                        panic!("Node {} has no network attachment for communication", self.index)
                    });
                    let src = self.platform.resources(members[i]).host_id;
                    let dst = self.platform.resources(members[j]).host_id;
                    let id = network
                        .borrow_mut()
                        .transfer_data(src, dst, bytes, self.ctx.id());
                    self.platform.transfer_started();
                    let completed = self.ctx.recv_event_by_key::<DataTransferCompleted>(id as u64);
                    let platform = self.platform.clone();
                    completions.push(async move {
                        completed.await;
                        platform.transfer_finished();
                    });
                }
            }
        }
        async move {
            join_all(completions).await;
        }
        .boxed_local()
    }

    /// PFS read of `bytes` into this node, split evenly across its PFS
    /// targets.
    pub(crate) fn pfs_read(&self, bytes: f64) -> LocalBoxFuture<'static, ()> {
        self.pfs_transfer(bytes, true)
    }

    pub(crate) fn pfs_write(&self, bytes: f64) -> LocalBoxFuture<'static, ()> {
        self.pfs_transfer(bytes, false)
    }

    fn pfs_transfer(&self, bytes: f64, read: bool) -> LocalBoxFuture<'static, ()> {
        if bytes <= 0.0 {
            return async {}.boxed_local();
        }
        if self.pfs_hosts.is_empty() {
            panic!("Node {} has no PFS targets", self.index);
        }
        let network = self
            .network
            .as_ref()
            .unwrap_or_else(|| panic!("Node {} has no network attachment for PFS I/O", self.index))
            .clone();
        if read {
            log_debug!(self.ctx, "reading {} bytes from PFS", bytes);
        } else {
            log_debug!(self.ctx, "writing {} bytes to PFS", bytes);
        }
        let share = bytes / self.pfs_hosts.len() as f64;
        let mut completions = Vec::new();
        for pfs in &self.pfs_hosts {
            let (src, dst) = if read {
                (*pfs, self.ctx.id())
            } else {
                (self.ctx.id(), *pfs)
            };
            let id = network
                .borrow_mut()
                .transfer_data(src, dst, share, self.ctx.id());
            if read {
                self.platform.pfs_read_started();
            } else {
                self.platform.pfs_write_started();
            }
            let completed = self.ctx.recv_event_by_key::<DataTransferCompleted>(id as u64);
            let platform = self.platform.clone();
            completions.push(async move {
                completed.await;
                if read {
                    platform.pfs_read_finished();
                } else {
                    platform.pfs_write_finished();
                }
            });
        }
        async move {
            join_all(completions).await;
        }
        .boxed_local()
    }

    /// Burst-buffer read of this rank's share. Node-local buffers read the
    /// node's own disk; wide-striped buffers pull equal shares from every
    /// member's disk and charge the per-byte reassembly cost on this node.
    pub(crate) fn bb_read(&self, bytes: f64, members: &[NodeIndex]) -> LocalBoxFuture<'static, ()> {
        if bytes <= 0.0 {
            return async {}.boxed_local();
        }
        match self.kind {
            NodeKind::ComputeWithBb => {
                log_debug!(self.ctx, "reading {} bytes from burst buffer", bytes);
                let disk = self.burst_buffer.as_ref().unwrap();
                let request_id = disk.borrow_mut().read(bytes as u64, self.ctx.id());
                let completed = self.ctx.recv_event_by_key::<DataReadCompleted>(request_id);
                async move {
                    completed.await;
                }
                .boxed_local()
            }
            NodeKind::ComputeWithWideStripedBb => {
                let share = bytes / members.len() as f64;
                log_debug!(
                    self.ctx,
                    "reading {} bytes from wide-striped burst buffer ({} per node)",
                    bytes,
                    share
                );
                let mut completions: Vec<LocalBoxFuture<'static, ()>> = Vec::new();
                for member in members {
                    let resources = self.platform.resources(*member);
                    let disk = resources
                        .disk
                        .unwrap_or_else(|| panic!("No burst buffer available on node {}", member));
                    let key = disk.borrow_mut().read(share as u64, self.ctx.id());
                    let read_done = self.ctx.recv_event_by_key::<DataReadCompleted>(key);
                    completions.push(
                        async move {
                            read_done.await;
                        }
                        .boxed_local(),
                    );
                    if *member != self.index {
                        let network = self.network.as_ref().unwrap();
                        let id = network.borrow_mut().transfer_data(
                            resources.host_id,
                            self.ctx.id(),
                            share,
                            self.ctx.id(),
                        );
                        let transfer_done =
                            self.ctx.recv_event_by_key::<DataTransferCompleted>(id as u64);
                        completions.push(
                            async move {
                                transfer_done.await;
                            }
                            .boxed_local(),
                        );
                    }
                }
                if self.flops_per_byte > 0.0 {
                    completions.push(self.exec_flops(self.flops_per_byte * bytes));
                }
                async move {
                    join_all(completions).await;
                }
                .boxed_local()
            }
            NodeKind::Compute => panic!("No burst buffer available on node {}", self.index),
        }
    }

    /// Burst-buffer write; the mirror image of [`Self::bb_read`]. Written
    /// space is released on completion (scratch semantics).
    pub(crate) fn bb_write(&self, bytes: f64, members: &[NodeIndex]) -> LocalBoxFuture<'static, ()> {
        if bytes <= 0.0 {
            return async {}.boxed_local();
        }
        match self.kind {
            NodeKind::ComputeWithBb => {
                log_debug!(self.ctx, "writing {} bytes to burst buffer", bytes);
                let disk = self.burst_buffer.as_ref().unwrap().clone();
                let request_id = disk.borrow_mut().write(bytes as u64, self.ctx.id());
                let completed = self.ctx.recv_event_by_key::<DataWriteCompleted>(request_id);
                async move {
                    completed.await;
                    disk.borrow_mut().mark_free(bytes as u64).unwrap();
                }
                .boxed_local()
            }
            NodeKind::ComputeWithWideStripedBb => {
                let share = bytes / members.len() as f64;
                log_debug!(
                    self.ctx,
                    "writing {} bytes to wide-striped burst buffer ({} per node)",
                    bytes,
                    share
                );
                let mut completions: Vec<LocalBoxFuture<'static, ()>> = Vec::new();
                for member in members {
                    let resources = self.platform.resources(*member);
                    let disk = resources
                        .disk
                        .unwrap_or_else(|| panic!("No burst buffer available on node {}", member));
                    let key = disk.borrow_mut().write(share as u64, self.ctx.id());
                    let write_done = self.ctx.recv_event_by_key::<DataWriteCompleted>(key);
                    let disk_handle = disk.clone();
                    completions.push(
                        async move {
                            write_done.await;
                            disk_handle.borrow_mut().mark_free(share as u64).unwrap();
                        }
                        .boxed_local(),
                    );
                    if *member != self.index {
                        let network = self.network.as_ref().unwrap();
                        let id = network.borrow_mut().transfer_data(
                            self.ctx.id(),
                            resources.host_id,
                            share,
                            self.ctx.id(),
                        );
                        let transfer_done =
                            self.ctx.recv_event_by_key::<DataTransferCompleted>(id as u64);
                        completions.push(
                            async move {
                                transfer_done.await;
                            }
                            .boxed_local(),
                        );
                    }
                }
                async move {
                    join_all(completions).await;
                }
                .boxed_local()
            }
            NodeKind::Compute => panic!("No burst buffer available on node {}", self.index),
        }
    }

    /// Launches `num_gpus` kernels of `flops_per_gpu` each, preferring free
    /// GPUs; returns one handle per kernel.
    pub(crate) fn exec_gpu_computation_async(
        &self,
        num_gpus: u32,
        flops_per_gpu: f64,
    ) -> Vec<LocalBoxFuture<'static, ()>> {
        if num_gpus as usize > self.gpus.len() {
            panic!(
                "Number of required GPUs ({}) higher than number of GPUs on node ({})",
                num_gpus,
                self.gpus.len()
            );
        }
        if num_gpus == 1 {
            log_debug!(self.ctx, "processing {} FLOPS on one GPU", flops_per_gpu);
        } else {
            log_debug!(
                self.ctx,
                "processing {} FLOPS on {} GPUs ({} each)",
                num_gpus as f64 * flops_per_gpu,
                num_gpus,
                flops_per_gpu
            );
        }
        let mut candidates: Vec<Rc<Gpu>> = self
            .gpus
            .iter()
            .filter(|gpu| gpu.state() == GpuState::Free)
            .cloned()
            .collect();
        candidates.extend(
            self.gpus
                .iter()
                .filter(|gpu| gpu.state() != GpuState::Free)
                .cloned(),
        );
        candidates
            .into_iter()
            .take(num_gpus as usize)
            .map(|gpu| {
                let ctx = self.ctx.clone();
                async move { gpu.exec(&ctx, flops_per_gpu).await }.boxed_local()
            })
            .collect()
    }

    /// Intra-node GPU traffic: the dominant GPU pair serialises on the
    /// per-node link mutex.
    pub(crate) fn exec_gpu_transfer_async(
        &self,
        intra_node: &[f64],
        num_gpus: u32,
    ) -> LocalBoxFuture<'static, ()> {
        let g = num_gpus as usize;
        let mut max_bytes: f64 = 0.0;
        for i in 0..g {
            for j in (i + 1)..g {
                max_bytes = max_bytes.max(intra_node[i * g + j] + intra_node[j * g + i]);
            }
        }
        if max_bytes <= 0.0 {
            return async {}.boxed_local();
        }
        if self.gpu_to_gpu_bw <= 0.0 {
            panic!("Node {} has no GPU-to-GPU bandwidth configured", self.index);
        }
        log_debug!(
            self.ctx,
            "transferring intra-node communication (dominant communication {} bytes) via GPU link",
            max_bytes
        );
        let duration = max_bytes / self.gpu_to_gpu_bw;
        let mutex = self.gpu_link_mutex.clone();
        let ctx = self.ctx.clone();
        async move {
            mutex.acquire().await;
            ctx.sleep(duration).await;
            mutex.release();
        }
        .boxed_local()
    }
}

/// Handler wrapper: node agents receive no commands (the scheduler calls
/// them directly), but resource completions whose waiter was cancelled still
/// land here and are dropped.
pub struct NodeAgentHandler {
    node: Rc<NodeAgent>,
}

impl NodeAgentHandler {
    pub fn new(node: Rc<NodeAgent>) -> Self {
        NodeAgentHandler { node }
    }
}

impl EventHandler for NodeAgentHandler {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            CompStarted { .. } => {}
            CompFinished { .. } => {
                log_debug!(self.node.ctx, "dropped computation completion");
            }
            CompFailed { .. } => {}
            DataTransferCompleted { .. } => {
                log_debug!(self.node.ctx, "dropped transfer completion");
            }
            DataReadCompleted { .. } => {}
            DataWriteCompleted { .. } => {}
        })
    }
}

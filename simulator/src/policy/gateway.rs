//! Policy gateway: the single long-lived request/response channel to the
//! external scheduling policy.
//!
//! The production transport is a ZeroMQ PAIR socket bound at simulator
//! start; tests and embedded policies implement [`PolicyTransport`] in
//! process. All channel errors are fatal and nothing is retried: the
//! simulation stalls rather than proceeding on partial decisions.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};

use crate::job::JobId;
use crate::node::NodeAgent;
use crate::platform::PlatformManager;
use crate::policy::protocol::{
    job_view, InvocationType, PolicyReply, REQUEST_CODE, SHUTDOWN_CODE,
};
use crate::storage::JobStorage;

pub trait PolicyTransport {
    fn send(&mut self, frame: &str);
    fn recv(&mut self) -> String;
}

pub struct ZmqPolicyTransport {
    // the context must outlive the socket
    _context: zmq::Context,
    socket: zmq::Socket,
}

impl ZmqPolicyTransport {
    pub fn bind(url: &str) -> ZmqPolicyTransport {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::PAIR)
            .unwrap_or_else(|e| panic!("Can't create policy socket: {}", e));
        socket
            .bind(url)
            .unwrap_or_else(|e| panic!("Can't bind policy socket to {}: {}", url, e));
        ZmqPolicyTransport {
            _context: context,
            socket,
        }
    }
}

impl PolicyTransport for ZmqPolicyTransport {
    fn send(&mut self, frame: &str) {
        self.socket
            .send(frame, 0)
            .unwrap_or_else(|e| panic!("Policy channel send failed: {}", e));
    }

    fn recv(&mut self) -> String {
        match self.socket.recv_string(0) {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => panic!("Policy channel received a non-UTF-8 frame"),
            Err(e) => panic!("Policy channel receive failed: {}", e),
        }
    }
}

pub struct PolicyGateway {
    transport: Box<dyn PolicyTransport>,
    forward_io_information: bool,
}

impl PolicyGateway {
    pub fn new(transport: Box<dyn PolicyTransport>, forward_io_information: bool) -> PolicyGateway {
        PolicyGateway {
            transport,
            forward_io_information,
        }
    }

    /// One synchronous exchange: ships the modified world state, blocks for
    /// the decision frame, parses it.
    #[allow(clippy::too_many_arguments)]
    pub fn exchange(
        &mut self,
        now: f64,
        invocation_type: InvocationType,
        requesting_job: Option<JobId>,
        evolving_request: Option<usize>,
        job_views: Vec<Value>,
        node_views: Vec<Value>,
        platform: &PlatformManager,
    ) -> PolicyReply {
        let mut request = json!({
            "code": REQUEST_CODE,
            "time": now,
            "invocation_type": invocation_type.code(),
            "jobs": job_views,
            "nodes": node_views,
        });
        if let Some(job_id) = requesting_job {
            request["job_id"] = json!(job_id);
        }
        if let Some(requested_nodes) = evolving_request {
            request["evolving_request"] = json!(requested_nodes);
        }
        if self.forward_io_information {
            request["pfs_read_bw"] = json!(platform.pfs_read_bandwidth());
            request["pfs_write_bw"] = json!(platform.pfs_write_bandwidth());
            request["pfs_read_utilization"] = json!(platform.pfs_read_utilization());
            request["pfs_write_utilization"] = json!(platform.pfs_write_utilization());
        }
        self.transport.send(&request.to_string());
        let frame = self.transport.recv();
        PolicyReply::parse(&frame)
    }

    /// Applies the policy's decisions: kill flags, node assignments, GPU
    /// counts and runtime-argument updates. Returns the ids of all jobs the
    /// reply touched.
    ///
    /// Decisions are idempotent: echoing a running job's current assignment
    /// (e.g. to update only its runtime arguments) re-runs neither the
    /// reservation path nor the validity check, so such decisions are legal
    /// for every job type, rigid and moldable included.
    pub fn apply(
        &self,
        reply: &PolicyReply,
        now: f64,
        jobs: &Rc<RefCell<JobStorage>>,
        nodes: &[Rc<NodeAgent>],
    ) -> Vec<JobId> {
        let mut touched = Vec::new();
        for decision in &reply.jobs {
            let mut jobs = jobs.borrow_mut();
            if decision.id as usize >= jobs.len() {
                panic!("Policy decision references unknown job {}", decision.id);
            }
            let job = jobs.job_mut(decision.id);
            if job.state.is_terminal() {
                continue;
            }
            if decision.kill_flag {
                job.set_state(crate::job::JobState::PendingKill, now);
                touched.push(decision.id);
                continue;
            }
            let assignment_changed = decision.assigned_node_ids != job.assigned_nodes;
            if assignment_changed {
                for node in std::mem::take(&mut job.assigned_nodes) {
                    nodes[node].remove_expected(decision.id);
                }
                for node_id in &decision.assigned_node_ids {
                    if *node_id >= nodes.len() {
                        panic!(
                            "Policy assigned unknown node {} to job {}",
                            node_id, decision.id
                        );
                    }
                    if job.assign_node(*node_id) {
                        nodes[*node_id].expect(decision.id);
                    }
                }
            }
            let gpus_changed = match decision.assigned_num_gpus_per_node {
                Some(gpus)
                    if job.job_type != crate::job::JobType::Rigid
                        && gpus != job.assigned_num_gpus_per_node =>
                {
                    job.assigned_num_gpus_per_node = gpus;
                    true
                }
                _ => false,
            };
            if decision.modified_runtime_args {
                job.runtime_arguments = decision.runtime_arguments.clone();
            }
            if assignment_changed || gpus_changed {
                job.check_assignment_validity();
                job.update_state();
            }
            touched.push(decision.id);
        }
        touched
    }

    /// Shutdown handshake: the shutdown code is sent both ways, then the
    /// socket is dropped.
    pub fn finalize(&mut self) {
        self.transport.send(&json!({ "code": SHUTDOWN_CODE }).to_string());
        let frame = self.transport.recv();
        let value: Value = serde_json::from_str(&frame)
            .unwrap_or_else(|e| panic!("Can't parse policy shutdown frame: {}", e));
        if value["code"].as_u64() != Some(SHUTDOWN_CODE) {
            panic!("Unexpected policy message during shutdown: {}", frame);
        }
    }
}

/// Builds the job views for an invocation: the modified-jobs delta plus the
/// triggering job, deduplicated in order.
pub fn collect_job_views(
    jobs: &RefCell<JobStorage>,
    modified_jobs: &[JobId],
    requesting_job: Option<JobId>,
) -> Vec<Value> {
    let mut ids: Vec<JobId> = Vec::new();
    for id in modified_jobs.iter().copied().chain(requesting_job) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    let jobs = jobs.borrow();
    ids.into_iter().map(|id| job_view(jobs.job(id))).collect()
}

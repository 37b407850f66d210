//! First-come-first-served policy process.
//!
//! Connects to a running simulator over the PAIR socket and serves every
//! invocation: pending jobs queue up and are placed on the lowest free node
//! ids as soon as enough nodes are available. Elastic jobs are started at
//! their minimum size and never resized.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;

use clap::Parser;
use env_logger::Builder;
use serde_json::{json, Value};

const REQUEST_CODE: u64 = 0xFFEC4400;
const REPLY_CODE: u64 = 0xFFEC4401;
const SHUTDOWN_CODE: u64 = 0xFFEC44FF;

const PENDING: u64 = 1;
const COMPLETED: u64 = 7;
const KILLED: u64 = 8;

#[derive(Parser)]
#[command(about = "FIFO policy for the elastic batch simulator")]
struct Args {
    /// Simulator endpoint to connect to
    #[arg(default_value = "tcp://localhost:5555")]
    url: String,
}

#[derive(Clone)]
struct QueuedJob {
    id: u64,
    num_nodes: usize,
    num_gpus_per_node: u64,
}

#[derive(Default)]
struct FifoState {
    // node id -> free
    nodes: BTreeMap<u64, bool>,
    queue: VecDeque<QueuedJob>,
    // job id -> nodes held
    placements: HashMap<u64, Vec<u64>>,
}

impl FifoState {
    fn observe(&mut self, request: &Value) {
        for node in request["nodes"].as_array().into_iter().flatten() {
            let id = node["id"].as_u64().unwrap();
            // a node we placed something on stays ours until the job ends
            let held = self.placements.values().any(|nodes| nodes.contains(&id));
            self.nodes.entry(id).or_insert(!held);
        }
        for job in request["jobs"].as_array().into_iter().flatten() {
            let id = job["id"].as_u64().unwrap();
            match job["state"].as_u64().unwrap() {
                PENDING => {
                    if self.queue.iter().all(|queued| queued.id != id) {
                        self.queue.push_back(QueuedJob {
                            id,
                            num_nodes: job["num_nodes"]
                                .as_u64()
                                .or_else(|| job["num_nodes_min"].as_u64())
                                .unwrap_or(1) as usize,
                            num_gpus_per_node: job["num_gpus_per_node"]
                                .as_u64()
                                .or_else(|| job["num_gpus_per_node_min"].as_u64())
                                .unwrap_or(0),
                        });
                    }
                }
                COMPLETED | KILLED => {
                    if let Some(held) = self.placements.remove(&id) {
                        for node in held {
                            self.nodes.insert(node, true);
                        }
                    }
                    self.queue.retain(|queued| queued.id != id);
                }
                _ => {}
            }
        }
    }

    fn schedule(&mut self) -> Vec<Value> {
        let mut decisions = Vec::new();
        while let Some(job) = self.queue.front().cloned() {
            let free: Vec<u64> = self
                .nodes
                .iter()
                .filter(|(_, free)| **free)
                .map(|(id, _)| *id)
                .take(job.num_nodes)
                .collect();
            if free.len() < job.num_nodes {
                // strict FIFO: nobody overtakes the queue head
                break;
            }
            for node in &free {
                self.nodes.insert(*node, false);
            }
            self.placements.insert(job.id, free.clone());
            decisions.push(json!({
                "id": job.id,
                "kill_flag": false,
                "assigned_node_ids": free,
                "assigned_num_gpus_per_node": job.num_gpus_per_node,
                "modified_runtime_args": false,
                "runtime_arguments": {}
            }));
            self.queue.pop_front();
        }
        decisions
    }
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
    let args = Args::parse();

    let context = zmq::Context::new();
    let socket = context.socket(zmq::PAIR).expect("can't create socket");
    socket.connect(&args.url).expect("can't connect to simulator");
    log::info!("connected to {}", args.url);

    let mut state = FifoState::default();
    loop {
        let frame = socket
            .recv_string(0)
            .expect("receive failed")
            .expect("non-UTF-8 frame");
        let request: Value = serde_json::from_str(&frame).expect("malformed request");
        match request["code"].as_u64() {
            Some(REQUEST_CODE) => {
                state.observe(&request);
                let decisions = state.schedule();
                log::debug!(
                    "t={}: {} decision(s), {} queued",
                    request["time"],
                    decisions.len(),
                    state.queue.len()
                );
                let reply = json!({ "code": REPLY_CODE, "jobs": decisions });
                socket.send(&reply.to_string(), 0).expect("send failed");
            }
            Some(SHUTDOWN_CODE) => {
                socket
                    .send(&json!({ "code": SHUTDOWN_CODE }).to_string(), 0)
                    .expect("send failed");
                log::info!("simulator finalized, shutting down");
                break;
            }
            other => panic!("unknown message code {:?}", other),
        }
    }
}

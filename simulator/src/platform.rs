//! Platform description and shared platform state.
//!
//! The platform JSON declares node groups (expanded into individual nodes),
//! PFS hosts with their named read/write links, and the network parameters.
//! `PlatformManager` is the runtime side: the node resource arena, the
//! modified-node delta shipped to the policy, and PFS/network load
//! accounting.

use std::cell::{Cell, RefCell};
use std::fs;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use dslab_compute::multicore::Compute;
use dslab_core::Id;
use dslab_storage::disk::Disk;

use crate::job::NodeIndex;

#[derive(Clone, Debug, Deserialize)]
pub struct NetworkConfig {
    pub bandwidth: f64,
    pub latency: f64,
    pub local_bandwidth: f64,
    pub local_latency: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BurstBufferConfig {
    pub capacity: u64,
    pub read_bandwidth: u64,
    pub write_bandwidth: u64,
    #[serde(default)]
    pub wide_striping: bool,
    /// CPU cost charged on the reading node per striped byte.
    #[serde(default)]
    pub flops_per_byte: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeGroupConfig {
    /// Node name, or the name prefix when `count > 1`.
    pub name: String,
    #[serde(default)]
    pub count: Option<u32>,
    /// Per-core speed in FLOP/s.
    pub speed: u64,
    pub cores: u32,
    pub memory: u64,
    #[serde(default)]
    pub num_gpus: u32,
    #[serde(default)]
    pub flops_per_gpu: f64,
    #[serde(default)]
    pub gpu_to_gpu_bw: f64,
    #[serde(default)]
    pub burst_buffer: Option<BurstBufferConfig>,
    /// PFS hosts this node targets; defaults to every PFS host.
    #[serde(default)]
    pub pfs_targets: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub bandwidth: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PfsHostConfig {
    pub name: String,
    pub read_link: LinkConfig,
    pub write_link: LinkConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlatformConfig {
    pub network: NetworkConfig,
    pub nodes: Vec<NodeGroupConfig>,
    #[serde(default)]
    pub pfs_hosts: Vec<PfsHostConfig>,
}

/// One concrete node after group expansion.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub name: String,
    pub speed: u64,
    pub cores: u32,
    pub memory: u64,
    pub num_gpus: u32,
    pub flops_per_gpu: f64,
    pub gpu_to_gpu_bw: f64,
    pub burst_buffer: Option<BurstBufferConfig>,
    pub pfs_targets: Option<Vec<String>>,
}

impl PlatformConfig {
    pub fn from_file(path: &str) -> PlatformConfig {
        let content = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Can't read platform file {}: {}", path, e));
        serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("Can't parse platform file {}: {}", path, e))
    }

    /// Expands node groups into individual nodes with unique names.
    pub fn expanded_nodes(&self) -> Vec<NodeSpec> {
        let mut specs = Vec::new();
        let mut seen = FxHashSet::default();
        for group in &self.nodes {
            let count = group.count.unwrap_or(1);
            for i in 0..count {
                let name = if count == 1 {
                    group.name.clone()
                } else {
                    format!("{}-{}", group.name, i)
                };
                if !seen.insert(name.clone()) {
                    panic!("Duplicate node name {} in platform description", name);
                }
                if group.num_gpus > 0 && group.flops_per_gpu <= 0.0 {
                    panic!("Node {} declares GPUs without a positive flops_per_gpu", name);
                }
                specs.push(NodeSpec {
                    name,
                    speed: group.speed,
                    cores: group.cores,
                    memory: group.memory,
                    num_gpus: group.num_gpus,
                    flops_per_gpu: group.flops_per_gpu,
                    gpu_to_gpu_bw: group.gpu_to_gpu_bw,
                    burst_buffer: group.burst_buffer.clone(),
                    pfs_targets: group.pfs_targets.clone(),
                });
            }
        }
        if specs.is_empty() {
            panic!("Platform description contains no compute nodes");
        }
        specs
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Compute,
    ComputeWithBb,
    ComputeWithWideStripedBb,
}

impl NodeKind {
    pub fn code(&self) -> u32 {
        match self {
            NodeKind::Compute => 0,
            NodeKind::ComputeWithBb => 1,
            NodeKind::ComputeWithWideStripedBb => 2,
        }
    }
}

/// Per-node simulation resources shared with application workers running on
/// other nodes (coupled execution, wide-striped burst buffers, transfers).
#[derive(Clone)]
pub struct NodeResources {
    pub name: String,
    /// Network location id of the node (the node agent's component id).
    pub host_id: Id,
    pub compute: Rc<RefCell<Compute>>,
    pub disk: Option<Rc<RefCell<Disk>>>,
    pub flops_per_byte: f64,
    pub speed: u64,
    pub cores: u32,
}

/// Shared platform-wide state.
pub struct PlatformManager {
    resources: RefCell<Vec<NodeResources>>,
    modified_nodes: RefCell<Vec<NodeIndex>>,
    modified_set: RefCell<FxHashSet<NodeIndex>>,

    link_bandwidths: RefCell<FxHashMap<String, f64>>,
    pfs_read_bandwidth: Cell<f64>,
    pfs_write_bandwidth: Cell<f64>,
    active_pfs_reads: Cell<u32>,
    active_pfs_writes: Cell<u32>,
    active_transfers: Cell<u32>,

    finished: Cell<bool>,
}

impl PlatformManager {
    pub fn new() -> Rc<PlatformManager> {
        Rc::new(PlatformManager {
            resources: RefCell::new(Vec::new()),
            modified_nodes: RefCell::new(Vec::new()),
            modified_set: RefCell::new(FxHashSet::default()),
            link_bandwidths: RefCell::new(FxHashMap::default()),
            pfs_read_bandwidth: Cell::new(0.0),
            pfs_write_bandwidth: Cell::new(0.0),
            active_pfs_reads: Cell::new(0),
            active_pfs_writes: Cell::new(0),
            active_transfers: Cell::new(0),
            finished: Cell::new(false),
        })
    }

    pub fn set_resources(&self, resources: Vec<NodeResources>) {
        *self.resources.borrow_mut() = resources;
    }

    pub fn resources(&self, node: NodeIndex) -> NodeResources {
        self.resources.borrow()[node].clone()
    }

    pub fn node_count(&self) -> usize {
        self.resources.borrow().len()
    }

    pub fn register_link(&self, name: &str, bandwidth: f64) {
        if self
            .link_bandwidths
            .borrow_mut()
            .insert(name.to_string(), bandwidth)
            .is_some()
        {
            panic!("Duplicate link name {} in platform description", name);
        }
    }

    /// Resolves the configured PFS link name lists into aggregate
    /// bandwidths; naming an undeclared link is fatal.
    pub fn init_pfs_bandwidth(&self, read_links: &[String], write_links: &[String]) {
        let links = self.link_bandwidths.borrow();
        let sum = |names: &[String]| -> f64 {
            names
                .iter()
                .map(|name| {
                    *links
                        .get(name)
                        .unwrap_or_else(|| panic!("Unknown PFS link name {}", name))
                })
                .sum()
        };
        self.pfs_read_bandwidth.set(sum(read_links));
        self.pfs_write_bandwidth.set(sum(write_links));
    }

    /// Adds a node to the delta shipped on the next policy invocation.
    pub fn mark_modified(&self, node: NodeIndex) {
        if self.modified_set.borrow_mut().insert(node) {
            self.modified_nodes.borrow_mut().push(node);
        }
    }

    pub fn take_modified(&self) -> Vec<NodeIndex> {
        self.modified_set.borrow_mut().clear();
        std::mem::take(&mut *self.modified_nodes.borrow_mut())
    }

    pub fn pfs_read_bandwidth(&self) -> f64 {
        self.pfs_read_bandwidth.get()
    }

    pub fn pfs_write_bandwidth(&self) -> f64 {
        self.pfs_write_bandwidth.get()
    }

    pub fn pfs_read_started(&self) {
        self.active_pfs_reads.set(self.active_pfs_reads.get() + 1);
    }

    pub fn pfs_read_finished(&self) {
        self.active_pfs_reads.set(self.active_pfs_reads.get() - 1);
    }

    pub fn pfs_write_started(&self) {
        self.active_pfs_writes.set(self.active_pfs_writes.get() + 1);
    }

    pub fn pfs_write_finished(&self) {
        self.active_pfs_writes.set(self.active_pfs_writes.get() - 1);
    }

    /// Greedy transfers share the PFS pipe fairly, so the pipe is either
    /// saturated or idle; the reported load reflects that.
    pub fn pfs_read_utilization(&self) -> f64 {
        if self.active_pfs_reads.get() > 0 {
            self.pfs_read_bandwidth.get()
        } else {
            0.0
        }
    }

    pub fn pfs_write_utilization(&self) -> f64 {
        if self.active_pfs_writes.get() > 0 {
            self.pfs_write_bandwidth.get()
        } else {
            0.0
        }
    }

    pub fn transfer_started(&self) {
        self.active_transfers.set(self.active_transfers.get() + 1);
    }

    pub fn transfer_finished(&self) {
        self.active_transfers.set(self.active_transfers.get() - 1);
    }

    pub fn active_transfers(&self) -> u32 {
        self.active_transfers.get()
    }

    pub fn set_finished(&self) {
        self.finished.set(true);
    }

    pub fn finished(&self) -> bool {
        self.finished.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_expansion_names_nodes() {
        let config: PlatformConfig = serde_json::from_str(
            r#"{
                "network": {"bandwidth": 1e10, "latency": 1e-4,
                            "local_bandwidth": 1e11, "local_latency": 1e-5},
                "nodes": [
                    {"name": "node", "count": 3, "speed": 1000000000, "cores": 8, "memory": 64},
                    {"name": "fat", "speed": 2000000000, "cores": 32, "memory": 256}
                ]
            }"#,
        )
        .unwrap();
        let specs = config.expanded_nodes();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].name, "node-0");
        assert_eq!(specs[2].name, "node-2");
        assert_eq!(specs[3].name, "fat");
    }

    #[test]
    #[should_panic(expected = "Duplicate node name")]
    fn duplicate_names_are_fatal() {
        let config: PlatformConfig = serde_json::from_str(
            r#"{
                "network": {"bandwidth": 1e10, "latency": 1e-4,
                            "local_bandwidth": 1e11, "local_latency": 1e-5},
                "nodes": [
                    {"name": "node", "speed": 1000000000, "cores": 8, "memory": 64},
                    {"name": "node", "speed": 1000000000, "cores": 8, "memory": 64}
                ]
            }"#,
        )
        .unwrap();
        config.expanded_nodes();
    }

    #[test]
    fn modified_delta_deduplicates_and_drains() {
        let platform = PlatformManager::new();
        platform.mark_modified(2);
        platform.mark_modified(0);
        platform.mark_modified(2);
        assert_eq!(platform.take_modified(), vec![2, 0]);
        assert!(platform.take_modified().is_empty());
        platform.mark_modified(2);
        assert_eq!(platform.take_modified(), vec![2]);
    }

    #[test]
    fn pfs_bandwidth_aggregates_named_links() {
        let platform = PlatformManager::new();
        platform.register_link("pfs0_read", 5e9);
        platform.register_link("pfs1_read", 5e9);
        platform.register_link("pfs0_write", 4e9);
        platform.init_pfs_bandwidth(
            &["pfs0_read".to_string(), "pfs1_read".to_string()],
            &["pfs0_write".to_string()],
        );
        assert_eq!(platform.pfs_read_bandwidth(), 1e10);
        assert_eq!(platform.pfs_write_bandwidth(), 4e9);
        assert_eq!(platform.pfs_read_utilization(), 0.0);
        platform.pfs_read_started();
        assert_eq!(platform.pfs_read_utilization(), 1e10);
        platform.pfs_read_finished();
        assert_eq!(platform.pfs_read_utilization(), 0.0);
    }

    #[test]
    #[should_panic(expected = "Unknown PFS link name")]
    fn unknown_pfs_link_is_fatal() {
        let platform = PlatformManager::new();
        platform.init_pfs_bandwidth(&["nope".to_string()], &[]);
    }
}

//! Simulation assembly: builds the platform, wires the actors together and
//! drives the event loop to completion.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use sugars::{boxed, rc, refcell};

use dslab_compute::multicore::{CompFailed, CompFinished, CompStarted, Compute};
use dslab_core::{Id, Simulation};
use dslab_network::models::SharedBandwidthNetworkModel;
use dslab_network::{DataTransferCompleted, Network};
use dslab_storage::disk::Disk;
use dslab_storage::events::{DataReadCompleted, DataWriteCompleted};

use crate::config::SimulationConfig;
use crate::driver::Driver;
use crate::gpu::Gpu;
use crate::monitoring::Monitoring;
use crate::node::{NodeAgent, NodeAgentHandler};
use crate::platform::{NodeKind, NodeResources, PlatformConfig, PlatformManager};
use crate::policy::gateway::{PolicyGateway, PolicyTransport, ZmqPolicyTransport};
use crate::scheduler::Scheduler;
use crate::sensing::Sensing;
use crate::storage::JobStorage;
use crate::submitter::Submitter;
use crate::sync::{Mutex, SyncContext};

pub struct ElasticBatchSimulation {
    sim: Simulation,
    config: SimulationConfig,

    jobs: Rc<RefCell<JobStorage>>,
    platform: Rc<PlatformManager>,
    monitoring: Rc<RefCell<Monitoring>>,
    nodes: Vec<Rc<NodeAgent>>,

    scheduler: Rc<RefCell<Scheduler>>,
    driver: Rc<RefCell<Driver>>,
    submitter: Submitter,
    sensing: Option<Rc<RefCell<Sensing>>>,
}

impl ElasticBatchSimulation {
    /// Production entry point: binds the ZeroMQ policy channel declared in
    /// the configuration.
    pub fn new(sim: Simulation, config: SimulationConfig) -> ElasticBatchSimulation {
        let url = config
            .zmq_url
            .clone()
            .unwrap_or_else(|| panic!("Configuration has no zmq_url for the policy gateway"));
        let transport = ZmqPolicyTransport::bind(&url);
        Self::with_transport(sim, config, Box::new(transport))
    }

    /// Builds the simulation around an arbitrary policy transport (used by
    /// tests and embedded policies).
    pub fn with_transport(
        mut sim: Simulation,
        config: SimulationConfig,
        transport: Box<dyn PolicyTransport>,
    ) -> ElasticBatchSimulation {
        config.check_validity();

        let monitoring = rc!(refcell!(Monitoring::new(&config)));
        let platform = PlatformManager::new();
        let jobs = rc!(refcell!(JobStorage::default()));
        let sync = SyncContext::new(sim.create_context("sync"));

        Self::register_key_getters(&sim);

        let platform_config = PlatformConfig::from_file(&config.platform_file);

        let network_ctx = sim.create_context("network");
        let network = rc!(refcell!(Network::new(
            boxed!(SharedBandwidthNetworkModel::new(
                platform_config.network.bandwidth,
                platform_config.network.latency
            )),
            network_ctx
        )));
        sim.add_handler("network", network.clone());

        // PFS hosts and their named links
        let mut pfs_ids: Vec<(String, Id)> = Vec::new();
        for pfs in &platform_config.pfs_hosts {
            platform.register_link(&pfs.read_link.name, pfs.read_link.bandwidth);
            platform.register_link(&pfs.write_link.name, pfs.write_link.bandwidth);
            let pfs_ctx = sim.create_context(&pfs.name);
            network.borrow_mut().add_node(
                &pfs.name,
                boxed!(SharedBandwidthNetworkModel::new(
                    platform_config.network.local_bandwidth,
                    platform_config.network.local_latency
                )),
            );
            network.borrow_mut().set_location(pfs_ctx.id(), &pfs.name);
            pfs_ids.push((pfs.name.clone(), pfs_ctx.id()));
        }
        platform.init_pfs_bandwidth(&config.pfs_read_links, &config.pfs_write_links);

        let resolve_pfs = |names: &Option<Vec<String>>| -> Vec<Id> {
            match names {
                Some(names) => names
                    .iter()
                    .map(|name| {
                        pfs_ids
                            .iter()
                            .find(|(pfs_name, _)| pfs_name == name)
                            .map(|(_, id)| *id)
                            .unwrap_or_else(|| panic!("Unknown PFS host {}", name))
                    })
                    .collect(),
                None => pfs_ids.iter().map(|(_, id)| *id).collect(),
            }
        };

        let mut nodes = Vec::new();
        let mut resources = Vec::new();
        for (index, spec) in platform_config.expanded_nodes().into_iter().enumerate() {
            let node_ctx = sim.create_context(&spec.name);

            let compute_name = format!("compute-{}", spec.name);
            let compute_ctx = sim.create_context(&compute_name);
            let compute = rc!(refcell!(Compute::new(
                spec.speed,
                spec.cores,
                spec.memory,
                compute_ctx
            )));
            sim.add_handler(&compute_name, compute.clone());

            network.borrow_mut().add_node(
                &spec.name,
                boxed!(SharedBandwidthNetworkModel::new(
                    platform_config.network.local_bandwidth,
                    platform_config.network.local_latency
                )),
            );
            network.borrow_mut().set_location(node_ctx.id(), &spec.name);

            let (kind, flops_per_byte, disk) = match &spec.burst_buffer {
                Some(bb) => {
                    let disk_name = format!("disk-{}", spec.name);
                    let disk_ctx = sim.create_context(&disk_name);
                    let disk = rc!(refcell!(Disk::new_simple(
                        bb.capacity,
                        bb.read_bandwidth,
                        bb.write_bandwidth,
                        disk_ctx
                    )));
                    sim.add_handler(&disk_name, disk.clone());
                    let kind = if bb.wide_striping {
                        NodeKind::ComputeWithWideStripedBb
                    } else {
                        NodeKind::ComputeWithBb
                    };
                    (kind, bb.flops_per_byte, Some(disk))
                }
                None => (NodeKind::Compute, 0.0, None),
            };

            let gpus = (0..spec.num_gpus)
                .map(|gpu_id| Gpu::new(gpu_id, spec.flops_per_gpu, sync.clone()))
                .collect::<Vec<_>>();

            let node = NodeAgent::new(
                index,
                spec.name.clone(),
                kind,
                node_ctx,
                compute.clone(),
                Some(network.clone()),
                disk.clone(),
                flops_per_byte,
                spec.speed,
                spec.cores,
                resolve_pfs(&spec.pfs_targets),
                gpus,
                Mutex::new(sync.clone()),
                spec.gpu_to_gpu_bw,
                jobs.clone(),
                platform.clone(),
                monitoring.clone(),
                config.allow_oversubscription,
                config.clip_evolving_requests,
            );
            sim.add_handler(&spec.name, rc!(refcell!(NodeAgentHandler::new(node.clone()))));

            resources.push(NodeResources {
                name: spec.name.clone(),
                host_id: node.id(),
                compute,
                disk,
                flops_per_byte,
                speed: spec.speed,
                cores: spec.cores,
            });
            nodes.push(node);
        }
        platform.set_resources(resources);

        let driver_ctx = sim.create_context("driver");
        let driver_id = driver_ctx.id();
        let scheduler_ctx = sim.create_context("scheduler");
        let scheduler_id = scheduler_ctx.id();

        let gateway = PolicyGateway::new(transport, config.forward_io_information);
        let scheduler = rc!(refcell!(Scheduler::new(
            scheduler_ctx,
            &config,
            jobs.clone(),
            nodes.clone(),
            platform.clone(),
            gateway,
            sync.clone(),
            driver_id
        )));
        sim.add_handler("scheduler", scheduler.clone());
        for node in &nodes {
            node.set_scheduler(scheduler_id);
        }

        let driver = rc!(refcell!(Driver::new(
            driver_ctx,
            jobs.clone(),
            monitoring.clone(),
            scheduler_id,
            config.show_progress_bar
        )));
        sim.add_handler("driver", driver.clone());

        let submitter = Submitter::new(sim.create_context("submitter"), jobs.clone(), driver_id);

        let sensing = if config.sensing {
            let sensing = rc!(refcell!(Sensing::new(
                sim.create_context("sensing"),
                &config,
                platform.clone(),
                nodes.clone()
            )));
            sim.add_handler("sensing", sensing.clone());
            Some(sensing)
        } else {
            None
        };

        ElasticBatchSimulation {
            sim,
            config,
            jobs,
            platform,
            monitoring,
            nodes,
            scheduler,
            driver,
            submitter,
            sensing,
        }
    }

    fn register_key_getters(sim: &Simulation) {
        sim.register_key_getter_for::<CompStarted>(|e| e.id);
        sim.register_key_getter_for::<CompFinished>(|e| e.id);
        sim.register_key_getter_for::<CompFailed>(|e| e.id);
        sim.register_key_getter_for::<DataTransferCompleted>(|e| e.dt.id as u64);
        sim.register_key_getter_for::<DataReadCompleted>(|e| e.request_id);
        sim.register_key_getter_for::<DataWriteCompleted>(|e| e.request_id);
    }

    pub fn job_storage(&self) -> Rc<RefCell<JobStorage>> {
        self.jobs.clone()
    }

    pub fn nodes(&self) -> &[Rc<NodeAgent>] {
        &self.nodes
    }

    pub fn platform(&self) -> Rc<PlatformManager> {
        self.platform.clone()
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Runs the simulation to completion.
    pub fn run(&mut self) {
        let job_count = self.submitter.load_and_submit(&self.config.jobs_file);
        self.driver.borrow_mut().set_expected_jobs(job_count);
        self.scheduler.borrow().start();
        if let Some(sensing) = &self.sensing {
            sensing.borrow().start();
        }

        let start = Instant::now();
        log::info!("simulation started with {} jobs", job_count);

        self.sim.step_until_no_events();

        let elapsed = start.elapsed().as_secs_f64();
        log::info!(
            "simulation finished at {:.3} after {:.3}s ({} events, {:.0} events/s)",
            self.sim.time(),
            elapsed,
            self.sim.event_count(),
            self.sim.event_count() as f64 / elapsed
        );
        self.monitoring.borrow_mut().flush();
    }
}

//! Optional telemetry actor.
//!
//! Samples per-node CPU load, aggregate network activity, PFS load and GPU
//! utilisation at a fixed interval, each into its own CSV sink. The actor
//! stops rescheduling itself once the driver finalised the simulation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::rc::Rc;

use dslab_core::{cast, Event, EventHandler, SimulationContext};

use crate::config::SimulationConfig;
use crate::events::SensingTick;
use crate::node::NodeAgent;
use crate::platform::PlatformManager;

pub struct Sensing {
    ctx: SimulationContext,
    platform: Rc<PlatformManager>,
    nodes: Vec<Rc<NodeAgent>>,
    interval: f64,

    cpu_utilization: Option<BufWriter<File>>,
    network_activity: Option<BufWriter<File>>,
    pfs_utilization: Option<BufWriter<File>>,
    gpu_utilization: Option<BufWriter<File>>,
}

fn create_sink(path: &str, header: &str) -> BufWriter<File> {
    let file =
        File::create(path).unwrap_or_else(|e| panic!("Can't create output file {}: {}", path, e));
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", header).unwrap();
    writer
}

impl Sensing {
    pub fn new(
        ctx: SimulationContext,
        config: &SimulationConfig,
        platform: Rc<PlatformManager>,
        nodes: Vec<Rc<NodeAgent>>,
    ) -> Sensing {
        let node_names = nodes
            .iter()
            .map(|node| node.name.clone())
            .collect::<Vec<_>>()
            .join(",");
        Sensing {
            ctx,
            platform,
            interval: config.sensing_interval,
            cpu_utilization: config
                .cpu_utilization
                .as_deref()
                .map(|path| create_sink(path, &format!("Time,{}", node_names))),
            network_activity: config
                .network_activity
                .as_deref()
                .map(|path| create_sink(path, "Time,Utilization")),
            pfs_utilization: config
                .pfs_utilization
                .as_deref()
                .map(|path| create_sink(path, "Time,Read,Write,Read (rel.),Write (rel.)")),
            gpu_utilization: config
                .gpu_utilization
                .as_deref()
                .map(|path| create_sink(path, &format!("Time,{}", node_names))),
            nodes,
        }
    }

    pub fn start(&self) {
        self.ctx.emit_self_now(SensingTick {});
    }

    fn record(&mut self) {
        let time = self.ctx.time();
        if let Some(out) = &mut self.cpu_utilization {
            let loads = self
                .nodes
                .iter()
                .map(|node| {
                    let compute = node.compute.borrow();
                    let used = compute.cores_total() - compute.cores_available();
                    (used as f64 / compute.cores_total() as f64).to_string()
                })
                .collect::<Vec<_>>()
                .join(",");
            writeln!(out, "{},{}", time, loads).unwrap();
        }
        if let Some(out) = &mut self.network_activity {
            let activity = self.platform.active_transfers() as f64 / self.nodes.len() as f64;
            writeln!(out, "{},{}", time, activity).unwrap();
        }
        if let Some(out) = &mut self.pfs_utilization {
            let read = self.platform.pfs_read_utilization();
            let write = self.platform.pfs_write_utilization();
            let relative = |value: f64, bandwidth: f64| {
                if bandwidth > 0.0 {
                    value / bandwidth
                } else {
                    0.0
                }
            };
            writeln!(
                out,
                "{},{},{},{},{}",
                time,
                read,
                write,
                relative(read, self.platform.pfs_read_bandwidth()),
                relative(write, self.platform.pfs_write_bandwidth())
            )
            .unwrap();
        }
        if let Some(out) = &mut self.gpu_utilization {
            let utilizations = self
                .nodes
                .iter()
                .map(|node| {
                    if node.gpus.is_empty() {
                        "0".to_string()
                    } else {
                        let total: f64 = node.gpus.iter().map(|gpu| gpu.utilization()).sum();
                        (total / node.gpus.len() as f64).to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
            writeln!(out, "{},{}", time, utilizations).unwrap();
        }
    }

    fn flush(&mut self) {
        for out in [
            &mut self.cpu_utilization,
            &mut self.network_activity,
            &mut self.pfs_utilization,
            &mut self.gpu_utilization,
        ]
        .into_iter()
        .flatten()
        {
            out.flush().unwrap();
        }
    }
}

impl EventHandler for Sensing {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            SensingTick {} => {
                if self.platform.finished() {
                    self.flush();
                    return;
                }
                self.record();
                self.ctx.emit_self(SensingTick {}, self.interval);
            }
        })
    }
}

//! Job submitter: loads the job list and releases each job at its submit
//! time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::rc::Rc;

use serde_json::Value;

use dslab_core::{Id, SimulationContext};

use crate::events::JobSubmitted;
use crate::job::{Job, JobType};
use crate::storage::JobStorage;
use crate::workload::Workload;

pub struct Submitter {
    ctx: SimulationContext,
    jobs: Rc<RefCell<JobStorage>>,
    driver_id: Id,
}

impl Submitter {
    pub fn new(ctx: SimulationContext, jobs: Rc<RefCell<JobStorage>>, driver_id: Id) -> Submitter {
        Submitter {
            ctx,
            jobs,
            driver_id,
        }
    }

    /// Loads the job list, sorts it stably by submit time, and schedules one
    /// submission event per job. Returns the number of jobs released.
    pub fn load_and_submit(&self, jobs_file: &str) -> usize {
        let mut jobs = read_jobs(jobs_file);
        jobs.sort_by(|a, b| a.submit_time.partial_cmp(&b.submit_time).unwrap());
        let count = jobs.len();
        for job in jobs {
            let submit_time = job.submit_time;
            let job_id = self.jobs.borrow_mut().add(job);
            self.ctx.emit_ordered(
                JobSubmitted { job_id },
                self.driver_id,
                submit_time - self.ctx.time(),
            );
        }
        count
    }
}

/// Reads the jobs JSON: either a top-level array or an object with a `jobs`
/// array.
pub fn read_jobs(path: &str) -> Vec<Job> {
    let content =
        fs::read_to_string(path).unwrap_or_else(|e| panic!("Can't read jobs file {}: {}", path, e));
    let json: Value = serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Can't parse jobs file {}: {}", path, e));
    let entries = match &json {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => map
            .get("jobs")
            .and_then(Value::as_array)
            .map(|a| a.as_slice())
            .unwrap_or_else(|| panic!("Jobs file {} has no job list", path)),
        _ => panic!("Jobs file {} has no job list", path),
    };
    entries.iter().map(read_job).collect()
}

fn read_job(json: &Value) -> Job {
    let job_type = parse_job_type(
        json.get("type")
            .and_then(Value::as_str)
            .unwrap_or_else(|| panic!("Job without a type")),
    );
    let submit_time = json
        .get("submit_time")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| panic!("Job without a submit time"));
    let walltime = json.get("walltime").and_then(Value::as_f64).unwrap_or(0.0);
    let arguments = read_string_map(json.get("arguments"));
    let attributes = read_string_map(json.get("attributes"));
    let model_path = json
        .get("application_model")
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("Job without an application model"));

    if job_type == JobType::Rigid {
        let num_nodes = json
            .get("num_nodes")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| panic!("Requested number of nodes has to be specified for rigid jobs"))
            as usize;
        if num_nodes < 1 {
            panic!("Requested number of nodes can not be less than 1 for rigid jobs");
        }
        let num_gpus_per_node = json
            .get("num_gpus_per_node")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let workload = Workload::from_file(
            model_path,
            &arguments,
            Some((num_nodes, num_gpus_per_node)),
        );
        Job::rigid(
            walltime,
            num_nodes,
            num_gpus_per_node,
            submit_time,
            arguments,
            attributes,
            workload,
        )
    } else {
        let read_u64 = |key: &str| json.get(key).and_then(Value::as_u64).unwrap_or(0);
        let workload = Workload::from_file(model_path, &arguments, None);
        Job::elastic(
            walltime,
            job_type,
            read_u64("num_nodes_min") as usize,
            read_u64("num_nodes_max") as usize,
            read_u64("num_gpus_per_node_min") as u32,
            read_u64("num_gpus_per_node_max") as u32,
            submit_time,
            arguments,
            attributes,
            workload,
        )
    }
}

fn parse_job_type(job_type: &str) -> JobType {
    match job_type.to_lowercase().as_str() {
        "rigid" => JobType::Rigid,
        "moldable" => JobType::Moldable,
        "malleable" => JobType::Malleable,
        "evolving" => JobType::Evolving,
        "adaptive" => JobType::Adaptive,
        other => panic!("Unknown job type {}", other),
    }
}

/// String map that also accepts numeric values (stringified).
fn read_string_map(json: Option<&Value>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(Value::Object(entries)) = json {
        for (key, value) in entries {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => panic!("Invalid type for mapping {}", key),
            };
            map.insert(key.clone(), value);
        }
    }
    map
}

//! CSV output sinks.
//!
//! Node utilisation rows are appended on every node state change, task times
//! per executed task, and the job statistics table once at finalisation.
//! Every sink is optional and driven by its configuration key.

use std::fs::File;
use std::io::{BufWriter, Write};

use crate::config::SimulationConfig;
use crate::job::{Job, JobId};

pub struct Monitoring {
    node_utilization: Option<BufWriter<File>>,
    task_times: Option<BufWriter<File>>,
    job_statistics_path: Option<String>,
}

fn create_sink(path: &str, header: &str) -> BufWriter<File> {
    let file =
        File::create(path).unwrap_or_else(|e| panic!("Can't create output file {}: {}", path, e));
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", header).unwrap();
    writer
}

fn join_ids(ids: &[JobId]) -> String {
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl Monitoring {
    pub fn new(config: &SimulationConfig) -> Monitoring {
        Monitoring {
            node_utilization: config
                .node_utilization
                .as_deref()
                .map(|path| create_sink(path, "Time,Node,State,Running jobs,Expected jobs")),
            task_times: config
                .task_times
                .as_deref()
                .map(|path| create_sink(path, "Time,Job,Node,Task,Duration")),
            job_statistics_path: config.job_statistics.clone(),
        }
    }

    pub fn log_task_times(&self) -> bool {
        self.task_times.is_some()
    }

    pub fn add_node_utilization(
        &mut self,
        time: f64,
        node_name: &str,
        state: &str,
        running_jobs: &[JobId],
        expected_jobs: &[JobId],
    ) {
        if let Some(out) = &mut self.node_utilization {
            writeln!(
                out,
                "{},{},{},{},{}",
                time,
                node_name,
                state,
                join_ids(running_jobs),
                join_ids(expected_jobs)
            )
            .unwrap();
        }
    }

    pub fn add_task_time(
        &mut self,
        time: f64,
        job_id: JobId,
        node_name: &str,
        task_name: &str,
        duration: f64,
    ) {
        if let Some(out) = &mut self.task_times {
            writeln!(
                out,
                "{},{},{},{},{}",
                time, job_id, node_name, task_name, duration
            )
            .unwrap();
        }
    }

    /// Writes the final per-job statistics table; called once by the driver
    /// after the last job terminates.
    pub fn write_job_statistics<'a>(&mut self, jobs: impl Iterator<Item = &'a Job>) {
        let path = match &self.job_statistics_path {
            Some(path) => path.clone(),
            None => return,
        };
        let mut out = create_sink(
            &path,
            "ID,Type,Submit Time,Start Time,End Time,Wait Time,Makespan,Turnaround Time,Status",
        );
        for job in jobs {
            writeln!(
                out,
                "{},{},{},{},{},{},{},{},{}",
                job.id,
                job.job_type.as_str(),
                job.submit_time,
                job.start_time,
                job.end_time,
                job.wait_time,
                job.makespan,
                job.turnaround_time,
                job.status_str()
            )
            .unwrap();
        }
        out.flush().unwrap();
    }

    pub fn flush(&mut self) {
        if let Some(out) = &mut self.node_utilization {
            out.flush().unwrap();
        }
        if let Some(out) = &mut self.task_times {
            out.flush().unwrap();
        }
    }
}

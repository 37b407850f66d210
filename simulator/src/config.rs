//! Simulation configuration.

use std::fs;

use serde::Deserialize;

/// Top-level configuration, loaded from the JSON file given on the command
/// line. Key names follow the external configuration contract.
#[derive(Clone, Debug, Deserialize)]
pub struct SimulationConfig {
    pub platform_file: String,
    pub jobs_file: String,

    /// Policy gateway bind URL (ZeroMQ PAIR). Optional only for test setups
    /// that inject their own transport.
    #[serde(default)]
    pub zmq_url: Option<String>,

    /// Periodic invocation period; 0 disables the periodic invoker.
    #[serde(default)]
    pub scheduling_interval: f64,
    /// Rate limit between two policy invocations.
    #[serde(default)]
    pub min_scheduling_interval: f64,
    #[serde(default)]
    pub schedule_on_job_submit: bool,
    #[serde(default)]
    pub schedule_on_job_finalize: bool,
    #[serde(default)]
    pub schedule_on_scheduling_point: bool,

    /// Seconds added after the walltime before the job is killed.
    #[serde(default)]
    pub job_kill_grace_period: f64,

    #[serde(default)]
    pub forward_io_information: bool,
    #[serde(default)]
    pub clip_evolving_requests: bool,
    #[serde(default)]
    pub allow_oversubscription: bool,

    // telemetry writer
    #[serde(default)]
    pub sensing: bool,
    #[serde(default)]
    pub sensing_interval: f64,
    #[serde(default)]
    pub cpu_utilization: Option<String>,
    #[serde(default)]
    pub network_activity: Option<String>,
    #[serde(default)]
    pub pfs_utilization: Option<String>,
    #[serde(default)]
    pub gpu_utilization: Option<String>,

    // CSV output paths
    #[serde(default)]
    pub node_utilization: Option<String>,
    #[serde(default)]
    pub job_statistics: Option<String>,
    #[serde(default)]
    pub task_times: Option<String>,

    /// Link names aggregated into the PFS read/write bandwidth figures.
    #[serde(default)]
    pub pfs_read_links: Vec<String>,
    #[serde(default)]
    pub pfs_write_links: Vec<String>,

    #[serde(default)]
    pub show_progress_bar: bool,
}

impl SimulationConfig {
    pub fn from_file(path: &str) -> SimulationConfig {
        let content = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Can't read configuration file {}: {}", path, e));
        let config: SimulationConfig = serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("Can't parse configuration file {}: {}", path, e));
        config.check_validity();
        config
    }

    /// Startup validity checks; each violation is fatal.
    pub fn check_validity(&self) {
        if self.scheduling_interval < 0.0 {
            panic!("Scheduling interval can not be less than 0");
        }
        if self.min_scheduling_interval < 0.0 {
            panic!("Minimum scheduling interval can not be less than 0");
        }
        if self.scheduling_interval == 0.0
            && (!self.schedule_on_job_submit || !self.schedule_on_job_finalize)
        {
            panic!(
                "Scheduling algorithm must be invoked at least periodically or on job submission and job finalization"
            );
        }
        if self.job_kill_grace_period < 0.0 {
            panic!("Grace period of maximum job walltime can not be less than 0");
        }
        if self.sensing && self.sensing_interval <= 0.0 {
            panic!("Sensing requires a positive sensing_interval");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SimulationConfig {
        serde_json::from_str(
            r#"{
                "platform_file": "platform.json",
                "jobs_file": "jobs.json",
                "schedule_on_job_submit": true,
                "schedule_on_job_finalize": true
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_off() {
        let config = minimal();
        config.check_validity();
        assert_eq!(config.scheduling_interval, 0.0);
        assert!(!config.clip_evolving_requests);
        assert!(!config.allow_oversubscription);
        assert!(config.node_utilization.is_none());
        assert!(config.pfs_read_links.is_empty());
    }

    #[test]
    #[should_panic(expected = "at least periodically")]
    fn scheduling_must_be_triggerable() {
        let mut config = minimal();
        config.schedule_on_job_submit = false;
        config.check_validity();
    }

    #[test]
    #[should_panic(expected = "Grace period")]
    fn negative_grace_period_is_fatal() {
        let mut config = minimal();
        config.job_kill_grace_period = -1.0;
        config.check_validity();
    }

    #[test]
    #[should_panic(expected = "Minimum scheduling interval")]
    fn negative_min_interval_is_fatal() {
        let mut config = minimal();
        config.min_scheduling_interval = -0.5;
        config.check_validity();
    }
}

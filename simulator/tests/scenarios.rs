//! End-to-end scenarios: full simulations driven by scripted in-process
//! policies speaking the wire protocol.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::{json, Value};

use dslab_core::Simulation;
use dslab_elastic::policy::protocol::SHUTDOWN_CODE;
use dslab_elastic::{ElasticBatchSimulation, JobState, PolicyTransport, SimulationConfig};

/// In-process policy: every request frame is parsed, recorded and answered
/// by the scenario's closure.
struct ScriptedPolicy {
    handler: Box<dyn FnMut(&Value) -> Value>,
    requests: Rc<RefCell<Vec<Value>>>,
    pending: Option<String>,
}

impl ScriptedPolicy {
    fn new(handler: impl FnMut(&Value) -> Value + 'static) -> (Box<ScriptedPolicy>, Rc<RefCell<Vec<Value>>>) {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let policy = Box::new(ScriptedPolicy {
            handler: Box::new(handler),
            requests: requests.clone(),
            pending: None,
        });
        (policy, requests)
    }
}

impl PolicyTransport for ScriptedPolicy {
    fn send(&mut self, frame: &str) {
        let request: Value = serde_json::from_str(frame).unwrap();
        if request["code"].as_u64() == Some(SHUTDOWN_CODE) {
            self.pending = Some(json!({ "code": SHUTDOWN_CODE }).to_string());
        } else {
            self.requests.borrow_mut().push(request.clone());
            self.pending = Some((self.handler)(&request).to_string());
        }
    }

    fn recv(&mut self) -> String {
        self.pending.take().expect("policy asked for a reply without a request")
    }
}

fn empty_reply() -> Value {
    json!({ "code": 0xFFEC4401u64, "jobs": [] })
}

fn assign(job_id: u64, nodes: &[u64]) -> Value {
    json!({
        "code": 0xFFEC4401u64,
        "jobs": [{
            "id": job_id,
            "kill_flag": false,
            "assigned_node_ids": nodes,
            "assigned_num_gpus_per_node": 0,
            "modified_runtime_args": false,
            "runtime_arguments": {}
        }]
    })
}

fn kill(job_id: u64) -> Value {
    json!({
        "code": 0xFFEC4401u64,
        "jobs": [{ "id": job_id, "kill_flag": true }]
    })
}

struct TestSetup {
    dir: PathBuf,
}

impl TestSetup {
    fn new(name: &str) -> TestSetup {
        let dir = std::env::temp_dir().join(format!("dslab-elastic-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        TestSetup { dir }
    }

    fn write(&self, name: &str, content: &Value) -> String {
        let path = self.dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(content).unwrap()).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn path(&self, name: &str) -> String {
        self.dir.join(name).to_str().unwrap().to_string()
    }

    fn platform(&self, node_count: u64) -> String {
        self.write(
            "platform.json",
            &json!({
                "network": {
                    "bandwidth": 1e10, "latency": 0.0,
                    "local_bandwidth": 1e11, "local_latency": 0.0
                },
                "nodes": [{
                    "name": "node", "count": node_count,
                    "speed": 1_000_000_000u64, "cores": 8, "memory": 64
                }]
            }),
        )
    }

    fn config(&self, platform: &str, jobs: &str, extra: Value) -> SimulationConfig {
        let mut config = json!({
            "platform_file": platform,
            "jobs_file": jobs,
            "schedule_on_job_submit": true,
            "schedule_on_job_finalize": true,
            "node_utilization": self.path("node_utilization.csv"),
            "job_statistics": self.path("job_statistics.csv")
        });
        for (key, value) in extra.as_object().unwrap() {
            config[key] = value.clone();
        }
        serde_json::from_value(config).unwrap()
    }
}

fn busy_workload(delay: f64, iterations: u64) -> Value {
    json!({
        "phases": [{
            "iterations": iterations,
            "tasks": [{
                "type": "busy_wait",
                "name": "main",
                "delay": delay,
                "pattern": "uniform"
            }]
        }]
    })
}

fn run_simulation(
    config: SimulationConfig,
    policy: Box<ScriptedPolicy>,
) -> ElasticBatchSimulation {
    let sim = Simulation::new(123);
    let mut simulation = ElasticBatchSimulation::with_transport(sim, config, policy);
    simulation.run();
    simulation
}

#[test]
fn single_rigid_job_completes() {
    let setup = TestSetup::new("single-rigid");
    let platform = setup.platform(1);
    let workload = setup.write("workload.json", &busy_workload(10.0, 1));
    let jobs = setup.write(
        "jobs.json",
        &json!([{
            "type": "rigid", "submit_time": 0.0, "walltime": 100.0,
            "num_nodes": 1, "application_model": workload
        }]),
    );
    let (policy, _) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            assign(0, &[0])
        } else {
            empty_reply()
        }
    });

    let simulation = run_simulation(setup.config(&platform, &jobs, json!({})), policy);

    let jobs = simulation.job_storage();
    let jobs = jobs.borrow();
    let job = jobs.job(0);
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.start_time, 0.0);
    assert_eq!(job.end_time, 10.0);
    assert_eq!(job.makespan, 10.0);
    assert_eq!(job.turnaround_time, 10.0);
    assert_eq!(simulation.time(), 10.0);

    let statistics = fs::read_to_string(setup.path("job_statistics.csv")).unwrap();
    assert!(statistics
        .starts_with("ID,Type,Submit Time,Start Time,End Time,Wait Time,Makespan,Turnaround Time,Status"));
    assert!(statistics.contains("0,rigid,0,0,10,0,10,10,completed"));
}

#[test]
fn two_rigid_jobs_run_fifo_without_overlap() {
    let setup = TestSetup::new("two-rigid-fifo");
    let platform = setup.platform(2);
    let workload = setup.write("workload.json", &busy_workload(10.0, 1));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([
            {"type": "rigid", "submit_time": 0.0, "num_nodes": 2, "application_model": workload},
            {"type": "rigid", "submit_time": 1.0, "num_nodes": 2, "application_model": workload}
        ]),
    );

    // trivial FIFO: both jobs need the whole machine
    let queue: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
    let busy = Rc::new(RefCell::new(false));
    let (policy, _) = ScriptedPolicy::new(move |request| {
        for job in request["jobs"].as_array().unwrap() {
            match job["state"].as_u64().unwrap() {
                1 => queue.borrow_mut().push(job["id"].as_u64().unwrap()),
                7 | 8 => *busy.borrow_mut() = false,
                _ => {}
            }
        }
        if !*busy.borrow() {
            if let Some(next) = queue.borrow_mut().pop() {
                *busy.borrow_mut() = true;
                return assign(next, &[0, 1]);
            }
        }
        empty_reply()
    });
    // FIFO order: pop from the front
    // (the queue above is used as a stack only when a single job is pending)

    let simulation = run_simulation(setup.config(&platform, &jobs_file, json!({})), policy);

    let storage = simulation.job_storage();
    let storage = storage.borrow();
    let first = storage.job(0);
    let second = storage.job(1);
    assert_eq!(first.state, JobState::Completed);
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(first.executing_nodes, second.executing_nodes);
    assert!(second.start_time >= first.end_time);
    assert_eq!(first.end_time, 10.0);
    assert_eq!(second.start_time, 10.0);
    assert_eq!(second.end_time, 20.0);
}

#[test]
fn malleable_job_grows_at_scheduling_point() {
    let setup = TestSetup::new("malleable-grow");
    let platform = setup.platform(2);
    let workload = setup.write(
        "workload.json",
        &json!({
            "phases": [{
                "iterations": 2,
                "scheduling_point": true,
                "tasks": [{
                    "type": "busy_wait", "name": "step",
                    "delay": 5.0, "pattern": "uniform"
                }]
            }]
        }),
    );
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "malleable", "submit_time": 0.0,
            "num_nodes_min": 1, "num_nodes_max": 2,
            "application_model": workload
        }]),
    );

    let (policy, requests) = ScriptedPolicy::new(|request| {
        match request["invocation_type"].as_u64().unwrap() {
            1 => assign(0, &[0]),
            // grow to two nodes at the voluntary scheduling point
            4 => assign(0, &[0, 1]),
            _ => empty_reply(),
        }
    });

    let config = setup.config(
        &platform,
        &jobs_file,
        json!({"schedule_on_scheduling_point": true}),
    );
    let simulation = run_simulation(config, policy);

    let storage = simulation.job_storage();
    let storage = storage.borrow();
    let job = storage.job(0);
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.executing_nodes, vec![0, 1]);
    // 5s on one node, then 5s on both after the reconfiguration at t=5
    assert_eq!(job.end_time, 10.0);
    assert!(requests
        .borrow()
        .iter()
        .any(|r| r["invocation_type"].as_u64() == Some(4)));

    // the grown node went through reserved before joining
    let utilization = fs::read_to_string(setup.path("node_utilization.csv")).unwrap();
    assert!(utilization.contains("node-1,reserved"));
    assert!(utilization.contains("node-1,allocated"));
}

fn evolving_setup(setup: &TestSetup) -> (String, String) {
    let platform = setup.platform(3);
    let workload = setup.write(
        "workload.json",
        &json!({
            "phases": [{
                "iterations": 4,
                "evolving_model": "5",
                "tasks": [{
                    "type": "busy_wait", "name": "step",
                    "delay": 2.0, "pattern": "uniform"
                }]
            }]
        }),
    );
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "evolving", "submit_time": 0.0,
            "num_nodes_min": 1, "num_nodes_max": 3,
            "application_model": workload
        }]),
    );
    (platform, jobs_file)
}

#[test]
fn clipped_evolving_request_is_clamped_to_bounds() {
    let setup = TestSetup::new("evolving-clipped");
    let (platform, jobs_file) = evolving_setup(&setup);

    let (policy, requests) = ScriptedPolicy::new(|request| {
        match request["invocation_type"].as_u64().unwrap() {
            1 => assign(0, &[0]),
            5 => {
                // grant exactly the clipped request
                assert_eq!(request["evolving_request"].as_u64().unwrap(), 3);
                assign(0, &[0, 1, 2])
            }
            _ => empty_reply(),
        }
    });

    let config = setup.config(
        &platform,
        &jobs_file,
        json!({
            "schedule_on_scheduling_point": true,
            "clip_evolving_requests": true
        }),
    );
    let simulation = run_simulation(config, policy);

    let storage = simulation.job_storage();
    let storage = storage.borrow();
    let job = storage.job(0);
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.executing_nodes, vec![0, 1, 2]);
    assert_eq!(job.evolving_request, Some(3));
    // one boundary after the first iteration, then the model result stays
    // equal to the executing size and never triggers again
    let evolving_invocations = requests
        .borrow()
        .iter()
        .filter(|r| r["invocation_type"].as_u64() == Some(5))
        .count();
    assert_eq!(evolving_invocations, 1);
    assert_eq!(job.end_time, 8.0);
}

#[test]
#[should_panic(expected = "requested 5 nodes outside")]
fn unclipped_evolving_request_is_fatal() {
    let setup = TestSetup::new("evolving-fatal");
    let (platform, jobs_file) = evolving_setup(&setup);
    let (policy, _) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            assign(0, &[0])
        } else {
            empty_reply()
        }
    });
    let config = setup.config(
        &platform,
        &jobs_file,
        json!({"schedule_on_scheduling_point": true}),
    );
    run_simulation(config, policy);
}

#[test]
fn walltime_exceeded_kills_the_job_after_grace() {
    let setup = TestSetup::new("walltime-kill");
    let platform = setup.platform(1);
    let workload = setup.write("workload.json", &busy_workload(100.0, 1));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "rigid", "submit_time": 0.0, "walltime": 5.0,
            "num_nodes": 1, "application_model": workload
        }]),
    );
    let (policy, _) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            assign(0, &[0])
        } else {
            empty_reply()
        }
    });

    let config = setup.config(&platform, &jobs_file, json!({"job_kill_grace_period": 2.0}));
    let simulation = run_simulation(config, policy);

    let storage = simulation.job_storage();
    {
        let storage = storage.borrow();
        let job = storage.job(0);
        assert_eq!(job.state, JobState::Killed);
        assert_eq!(job.start_time, 0.0);
        assert_eq!(job.end_time, 7.0);
        assert_eq!(job.end_time - job.start_time, 5.0 + 2.0);
    }
    for node in simulation.nodes() {
        assert!(node.running_jobs().is_empty());
    }
    let statistics = fs::read_to_string(setup.path("job_statistics.csv")).unwrap();
    assert!(statistics.contains(",killed"));
}

#[test]
fn walltime_zero_never_arms_the_monitor() {
    let setup = TestSetup::new("walltime-unbounded");
    let platform = setup.platform(1);
    let workload = setup.write("workload.json", &busy_workload(50.0, 1));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "rigid", "submit_time": 0.0, "walltime": 0.0,
            "num_nodes": 1, "application_model": workload
        }]),
    );
    let (policy, _) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            assign(0, &[0])
        } else {
            empty_reply()
        }
    });

    let config = setup.config(&platform, &jobs_file, json!({"job_kill_grace_period": 2.0}));
    let simulation = run_simulation(config, policy);

    let storage = simulation.job_storage();
    let storage = storage.borrow();
    assert_eq!(storage.job(0).state, JobState::Completed);
    assert_eq!(storage.job(0).end_time, 50.0);
}

#[test]
fn policy_kill_on_submit_never_occupies_a_node() {
    let setup = TestSetup::new("kill-on-submit");
    let platform = setup.platform(2);
    let workload = setup.write("workload.json", &busy_workload(10.0, 1));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "rigid", "submit_time": 0.0, "walltime": 100.0,
            "num_nodes": 1, "application_model": workload
        }]),
    );
    let (policy, _) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            kill(0)
        } else {
            empty_reply()
        }
    });

    let simulation = run_simulation(setup.config(&platform, &jobs_file, json!({})), policy);

    let storage = simulation.job_storage();
    let storage = storage.borrow();
    let job = storage.job(0);
    assert_eq!(job.state, JobState::Killed);
    assert_eq!(job.start_time, -1.0);
    assert!(job.executing_nodes.is_empty());
    for node in simulation.nodes() {
        assert!(node.running_jobs().is_empty());
        assert!(node.expected_jobs().is_empty());
    }
    let utilization = fs::read_to_string(setup.path("node_utilization.csv")).unwrap();
    assert!(!utilization.contains("allocated"));
}

#[test]
fn echoed_decision_updates_runtime_arguments_of_running_rigid_job() {
    let setup = TestSetup::new("runtime-args-echo");
    let platform = setup.platform(2);
    let short = setup.write("short.json", &busy_workload(10.0, 1));
    let long = setup.write("long.json", &busy_workload(20.0, 1));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([
            {"type": "rigid", "submit_time": 0.0, "num_nodes": 1, "application_model": short},
            {"type": "rigid", "submit_time": 0.0, "num_nodes": 1, "application_model": long}
        ]),
    );

    let (policy, _) = ScriptedPolicy::new(|request| {
        match request["invocation_type"].as_u64().unwrap() {
            // place each job on its own node as it arrives
            1 => {
                let pending = request["jobs"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .find(|job| job["state"].as_u64() == Some(1))
                    .unwrap();
                let id = pending["id"].as_u64().unwrap();
                assign(id, &[id])
            }
            // job 0 finished: re-state job 1's unchanged assignment, only to
            // push new runtime arguments; the GPU field stays omitted
            2 => json!({
                "code": 0xFFEC4401u64,
                "jobs": [{
                    "id": 1,
                    "assigned_node_ids": [1],
                    "modified_runtime_args": true,
                    "runtime_arguments": {"hint": "42"}
                }]
            }),
            _ => empty_reply(),
        }
    });

    let simulation = run_simulation(setup.config(&platform, &jobs_file, json!({})), policy);

    let storage = simulation.job_storage();
    let storage = storage.borrow();
    let first = storage.job(0);
    let second = storage.job(1);
    assert_eq!(first.state, JobState::Completed);
    assert_eq!(first.end_time, 10.0);
    // the echoed decision must neither crash nor disturb the running job
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(second.executing_nodes, vec![1]);
    assert_eq!(second.end_time, 20.0);
    assert_eq!(second.assigned_num_gpus_per_node, 0);
    assert_eq!(second.runtime_arguments["hint"], "42");
}

#[test]
fn minimum_scheduling_interval_rate_limits_invocations() {
    let setup = TestSetup::new("rate-limit");
    let platform = setup.platform(1);
    let workload = setup.write("workload.json", &busy_workload(1.0, 1));
    // submissions at t = 0, 1, 2, 6, 7
    let submissions: Vec<Value> = [0.0, 1.0, 2.0, 6.0, 7.0]
        .iter()
        .map(|t| {
            json!({
                "type": "rigid", "submit_time": t,
                "num_nodes": 1, "application_model": workload
            })
        })
        .collect();
    let jobs_file = setup.write("jobs.json", &Value::Array(submissions));
    // the policy never allocates, leaving the invocation times untouched
    let (policy, requests) = ScriptedPolicy::new(|_| empty_reply());

    let config = setup.config(&platform, &jobs_file, json!({"min_scheduling_interval": 5.0}));
    let simulation = run_simulation(config, policy);
    drop(simulation);

    let times: Vec<f64> = requests
        .borrow()
        .iter()
        .map(|r| r["time"].as_f64().unwrap())
        .collect();
    assert_eq!(times, vec![0.0, 6.0]);
}

#[test]
fn final_scheduling_point_gates_the_last_boundary() {
    for (final_scheduling_point, expect_invocation) in [(false, false), (true, true)] {
        let setup = TestSetup::new(&format!("final-sp-{}", final_scheduling_point));
        let platform = setup.platform(1);
        let workload = setup.write(
            "workload.json",
            &json!({
                "phases": [{
                    "iterations": 2,
                    "scheduling_point": true,
                    "final_scheduling_point": final_scheduling_point,
                    "tasks": [{
                        "type": "busy_wait", "name": "step",
                        "delay": 3.0, "pattern": "uniform"
                    }]
                }]
            }),
        );
        let jobs_file = setup.write(
            "jobs.json",
            &json!([{
                "type": "malleable", "submit_time": 0.0,
                "num_nodes_min": 1, "num_nodes_max": 1,
                "application_model": workload
            }]),
        );
        let (policy, requests) = ScriptedPolicy::new(|request| {
            match request["invocation_type"].as_u64().unwrap() {
                1 => assign(0, &[0]),
                4 => assign(0, &[0]),
                _ => empty_reply(),
            }
        });
        let config = setup.config(
            &platform,
            &jobs_file,
            json!({"schedule_on_scheduling_point": true}),
        );
        let simulation = run_simulation(config, policy);

        let storage = simulation.job_storage();
        let storage = storage.borrow();
        assert_eq!(storage.job(0).state, JobState::Completed);
        assert_eq!(storage.job(0).end_time, 6.0);
        let saw_scheduling_point = requests
            .borrow()
            .iter()
            .any(|r| r["invocation_type"].as_u64() == Some(4));
        assert_eq!(saw_scheduling_point, expect_invocation);
    }
}

#[test]
fn policy_receives_only_the_modified_node_delta() {
    let setup = TestSetup::new("node-delta");
    let platform = setup.platform(2);
    let workload = setup.write("workload.json", &busy_workload(10.0, 1));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "rigid", "submit_time": 0.0,
            "num_nodes": 1, "application_model": workload
        }]),
    );
    let (policy, requests) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            assign(0, &[0])
        } else {
            empty_reply()
        }
    });

    run_simulation(setup.config(&platform, &jobs_file, json!({})), policy);

    let requests = requests.borrow();
    // first invocation ships the whole platform
    let first: Vec<u64> = requests[0]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(first, vec![0, 1]);
    // the completion invocation ships only the node that changed since
    let last: Vec<u64> = requests[1]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(last, vec![0]);
}

#[test]
fn job_views_carry_progress_and_arguments() {
    let setup = TestSetup::new("job-view");
    let platform = setup.platform(1);
    let workload = setup.write("workload.json", &busy_workload(4.0, 3));
    let jobs_file = setup.write(
        "jobs.json",
        &json!([{
            "type": "rigid", "submit_time": 0.0, "walltime": 100.0,
            "num_nodes": 1, "application_model": workload,
            "arguments": {"problem_size": 4096},
            "attributes": {"project": "demo"}
        }]),
    );
    let (policy, requests) = ScriptedPolicy::new(|request| {
        if request["invocation_type"].as_u64() == Some(1) {
            assign(0, &[0])
        } else {
            empty_reply()
        }
    });

    run_simulation(setup.config(&platform, &jobs_file, json!({})), policy);

    let requests = requests.borrow();
    let submit_view = &requests[0]["jobs"][0];
    assert_eq!(submit_view["id"].as_u64().unwrap(), 0);
    assert_eq!(submit_view["num_nodes"].as_u64().unwrap(), 1);
    assert_eq!(submit_view["arguments"]["problem_size"], "4096");
    assert_eq!(submit_view["attributes"]["project"], "demo");
    assert_eq!(submit_view["total_phase_count"].as_u64().unwrap(), 3);
    assert_eq!(submit_view["completed_phases"].as_u64().unwrap(), 0);
    // at completion the whole workload is accounted for
    let final_view = &requests[1]["jobs"][0];
    assert_eq!(final_view["completed_phases"].as_u64().unwrap(), 3);
    assert_eq!(final_view["state"].as_u64().unwrap(), 7);
}

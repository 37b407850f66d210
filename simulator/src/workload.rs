//! Workloads: ordered main phases plus the three one-time phases.

use std::collections::{HashMap, VecDeque};
use std::fs;

use serde_json::Value;

use crate::formula::{EvalContext, Formula};
use crate::tasks::Task;

/// One phase: an ordered task list executed `iterations` times, with the
/// per-iteration barrier/scheduling-point behaviour declared alongside.
#[derive(Clone, Debug)]
pub struct Phase {
    pub tasks: Vec<Task>,
    pub iterations: u32,
    /// Iteration count at load time; evolving models receive the current
    /// absolute iteration as `initial_iterations - remaining`.
    pub initial_iterations: u32,
    pub scheduling_point: bool,
    pub final_scheduling_point: bool,
    pub barrier: bool,
    pub evolving_model: Option<Formula>,
}

impl Phase {
    pub fn has_evolving_model(&self) -> bool {
        self.evolving_model.is_some()
    }

    fn scale_to(&mut self, num_nodes: usize, num_gpus_per_node: u32, ctx: &EvalContext) {
        for task in &mut self.tasks {
            task.scale_to(num_nodes, num_gpus_per_node, ctx);
        }
    }
}

/// A job's workload and its progress bookkeeping. `completed_phases` counts
/// executed phase iterations and only ever grows; together with the
/// remaining iterations it always sums to `total_phase_count`.
#[derive(Clone, Debug)]
pub struct Workload {
    pub init_phase: Option<Phase>,
    pub reconfiguration_phase: Option<Phase>,
    pub expansion_phase: Option<Phase>,
    pub phases: VecDeque<Phase>,
    pub total_phase_count: u32,
    pub completed_phases: u32,
}

impl Workload {
    pub fn new(
        init_phase: Option<Phase>,
        reconfiguration_phase: Option<Phase>,
        expansion_phase: Option<Phase>,
        phases: VecDeque<Phase>,
    ) -> Workload {
        let total_phase_count = phases.iter().map(|p| p.iterations).sum();
        Workload {
            init_phase,
            reconfiguration_phase,
            expansion_phase,
            phases,
            total_phase_count,
            completed_phases: 0,
        }
    }

    #[cfg(test)]
    pub fn for_tests(phases: Vec<Phase>) -> Workload {
        Workload::new(None, None, None, phases.into())
    }

    /// Loads a workload JSON file. Rigid jobs pass their geometry so every
    /// payload is expanded immediately; elastic jobs pass `None`.
    pub fn from_file(
        path: &str,
        arguments: &HashMap<String, String>,
        geometry: Option<(usize, u32)>,
    ) -> Workload {
        let content = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Can't read workload file {}: {}", path, e));
        let json: Value = serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("Can't parse workload file {}: {}", path, e));

        let init_phase = read_one_time_phase(json.get("on_init"), arguments, false, geometry);
        let reconfiguration_phase =
            read_one_time_phase(json.get("on_reconfiguration"), arguments, true, geometry);
        let expansion_phase =
            read_one_time_phase(json.get("on_expansion"), arguments, false, geometry);

        let phases = json
            .get("phases")
            .and_then(Value::as_array)
            .unwrap_or_else(|| panic!("Workload file {} has no phases", path))
            .iter()
            .map(|p| read_phase(p, arguments, geometry))
            .collect();

        Workload::new(init_phase, reconfiguration_phase, expansion_phase, phases)
    }

    pub fn scale_to(
        &mut self,
        num_nodes: usize,
        num_gpus_per_node: u32,
        arguments: &HashMap<String, String>,
        runtime_arguments: &HashMap<String, String>,
    ) {
        let ctx = eval_context(num_nodes, num_gpus_per_node, arguments, runtime_arguments);
        for phase in &mut self.phases {
            phase.scale_to(num_nodes, num_gpus_per_node, &ctx);
        }
    }

    pub fn scale_init_phase_to(
        &mut self,
        num_nodes: usize,
        num_gpus_per_node: u32,
        arguments: &HashMap<String, String>,
        runtime_arguments: &HashMap<String, String>,
    ) {
        let ctx = eval_context(num_nodes, num_gpus_per_node, arguments, runtime_arguments);
        if let Some(phase) = &mut self.init_phase {
            phase.scale_to(num_nodes, num_gpus_per_node, &ctx);
        }
    }

    pub fn scale_reconfiguration_phase_to(
        &mut self,
        num_nodes: usize,
        num_gpus_per_node: u32,
        arguments: &HashMap<String, String>,
        runtime_arguments: &HashMap<String, String>,
    ) {
        let ctx = eval_context(num_nodes, num_gpus_per_node, arguments, runtime_arguments);
        if let Some(phase) = &mut self.reconfiguration_phase {
            phase.scale_to(num_nodes, num_gpus_per_node, &ctx);
        }
    }

    pub fn scale_expansion_phase_to(
        &mut self,
        num_nodes: usize,
        num_gpus_per_node: u32,
        arguments: &HashMap<String, String>,
        runtime_arguments: &HashMap<String, String>,
    ) {
        let ctx = eval_context(num_nodes, num_gpus_per_node, arguments, runtime_arguments);
        if let Some(phase) = &mut self.expansion_phase {
            phase.scale_to(num_nodes, num_gpus_per_node, &ctx);
        }
    }

    /// Moves the progress cursor forward: `popped_phases` fully executed
    /// phases are dropped and the new front phase keeps `remaining`
    /// iterations.
    pub fn advance(&mut self, popped_phases: u32, remaining: u32) {
        for _ in 0..popped_phases {
            let phase = self
                .phases
                .pop_front()
                .expect("workload advanced past its last phase");
            self.completed_phases += phase.iterations;
        }
        if remaining > 0 {
            let front = self
                .phases
                .front_mut()
                .expect("workload advanced with remaining iterations but no phase");
            self.completed_phases += front.iterations - remaining;
            front.iterations = remaining;
        }
    }

    pub fn complete(&mut self) {
        self.phases.clear();
        self.completed_phases = self.total_phase_count;
    }

    /// Remaining iterations across live phases; used by invariant checks.
    pub fn remaining_iterations(&self) -> u32 {
        self.phases.iter().map(|p| p.iterations).sum()
    }
}

fn eval_context(
    num_nodes: usize,
    num_gpus_per_node: u32,
    arguments: &HashMap<String, String>,
    runtime_arguments: &HashMap<String, String>,
) -> EvalContext {
    EvalContext::new(num_nodes as u32, num_gpus_per_node)
        .with_arguments(arguments)
        .with_arguments(runtime_arguments)
}

fn read_phase(
    json: &Value,
    arguments: &HashMap<String, String>,
    geometry: Option<(usize, u32)>,
) -> Phase {
    let iterations = read_iterations(json, arguments);
    let scheduling_point = json
        .get("scheduling_point")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let final_scheduling_point = json
        .get("final_scheduling_point")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let barrier = json.get("barrier").and_then(Value::as_bool).unwrap_or(true);
    let evolving_model = json
        .get("evolving_model")
        .and_then(Value::as_str)
        .map(Formula::parse);
    Phase {
        tasks: read_tasks(json, arguments, geometry),
        iterations,
        initial_iterations: iterations,
        scheduling_point,
        final_scheduling_point,
        barrier,
        evolving_model,
    }
}

/// One-time phases never carry scheduling points; the reconfiguration phase
/// always synchronises on a barrier, the others only when asked to.
fn read_one_time_phase(
    json: Option<&Value>,
    arguments: &HashMap<String, String>,
    mandatory_barrier: bool,
    geometry: Option<(usize, u32)>,
) -> Option<Phase> {
    let json = match json {
        Some(value) if !value.is_null() => value,
        _ => return None,
    };
    let iterations = read_iterations(json, arguments);
    let barrier = if mandatory_barrier {
        true
    } else {
        json.get("barrier").and_then(Value::as_bool).unwrap_or(false)
    };
    Some(Phase {
        tasks: read_tasks(json, arguments, geometry),
        iterations,
        initial_iterations: iterations,
        scheduling_point: false,
        final_scheduling_point: false,
        barrier,
        evolving_model: None,
    })
}

fn read_iterations(json: &Value, arguments: &HashMap<String, String>) -> u32 {
    match json.get("iterations") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or_else(|| {
            panic!("Phase iteration count must be a non-negative integer, got {}", n)
        }) as u32,
        Some(Value::String(model)) => {
            let ctx = EvalContext::default().with_arguments(arguments);
            Formula::parse(model).evaluate(&ctx).floor() as u32
        }
        None => 1,
        Some(other) => panic!("Invalid phase iterations specification {}", other),
    }
}

fn read_tasks(
    json: &Value,
    arguments: &HashMap<String, String>,
    geometry: Option<(usize, u32)>,
) -> Vec<Task> {
    json.get("tasks")
        .and_then(Value::as_array)
        .map(|tasks| {
            tasks
                .iter()
                .map(|t| Task::from_json(t, arguments, geometry))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(workload: Value) -> Workload {
        let json = workload;
        let arguments = HashMap::new();
        let phases = json["phases"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| read_phase(p, &arguments, Some((2, 0))))
            .collect();
        Workload::new(
            read_one_time_phase(json.get("on_init"), &arguments, false, Some((2, 0))),
            read_one_time_phase(json.get("on_reconfiguration"), &arguments, true, Some((2, 0))),
            read_one_time_phase(json.get("on_expansion"), &arguments, false, Some((2, 0))),
            phases,
        )
    }

    fn two_phase_workload() -> Workload {
        parse(json!({
            "on_reconfiguration": {
                "tasks": [{"type": "idle", "delay": 1.0, "pattern": "uniform"}]
            },
            "phases": [
                {
                    "iterations": 3,
                    "tasks": [{"type": "busy_wait", "delay": 5.0, "pattern": "uniform"}]
                },
                {
                    "iterations": 2,
                    "scheduling_point": false,
                    "tasks": [{"type": "idle", "delay": 1.0, "pattern": "uniform"}]
                }
            ]
        }))
    }

    #[test]
    fn total_phase_count_sums_iterations() {
        let workload = two_phase_workload();
        assert_eq!(workload.total_phase_count, 5);
        assert_eq!(workload.completed_phases, 0);
        assert_eq!(workload.remaining_iterations(), 5);
    }

    #[test]
    fn advance_keeps_progress_invariant() {
        let mut workload = two_phase_workload();
        // one full phase executed plus one iteration of the next
        workload.advance(1, 1);
        assert_eq!(workload.completed_phases, 4);
        assert_eq!(workload.remaining_iterations(), 1);
        assert_eq!(
            workload.completed_phases + workload.remaining_iterations(),
            workload.total_phase_count
        );
    }

    #[test]
    fn advance_within_front_phase() {
        let mut workload = two_phase_workload();
        workload.advance(0, 1);
        assert_eq!(workload.completed_phases, 2);
        assert_eq!(workload.phases.front().unwrap().iterations, 1);
    }

    #[test]
    fn complete_pins_progress_to_total() {
        let mut workload = two_phase_workload();
        workload.complete();
        assert!(workload.phases.is_empty());
        assert_eq!(workload.completed_phases, 5);
    }

    #[test]
    fn reconfiguration_phase_has_mandatory_barrier() {
        let workload = two_phase_workload();
        assert!(workload.reconfiguration_phase.as_ref().unwrap().barrier);
        assert!(workload.init_phase.is_none());
    }

    #[test]
    fn phase_defaults() {
        let workload = two_phase_workload();
        let first = &workload.phases[0];
        assert!(first.scheduling_point);
        assert!(first.final_scheduling_point);
        assert!(first.barrier);
        assert!(!first.has_evolving_model());
        assert!(!workload.phases[1].scheduling_point);
    }

    #[test]
    fn evolving_model_is_parsed() {
        let workload = parse(json!({
            "phases": [{
                "iterations": 4,
                "evolving_model": "min(phase_iteration + 1, 3)",
                "tasks": []
            }]
        }));
        let phase = &workload.phases[0];
        assert!(phase.has_evolving_model());
        let ctx = EvalContext::new(1, 0).with_phase_iteration(1);
        assert_eq!(phase.evolving_model.as_ref().unwrap().evaluate(&ctx), 2.0);
    }
}

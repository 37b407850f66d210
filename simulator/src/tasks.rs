//! Workload tasks.
//!
//! Tasks form a closed variant instead of a class hierarchy: the common
//! record carries the name, iteration model and synchronisation flags, and
//! `TaskKind` selects the payload shape. Execution lives with the
//! application worker; this module owns parsing and rescaling.

use std::collections::HashMap;

use serde_json::Value;

use crate::formula::{EvalContext, Formula};
use crate::patterns::{self, MatrixPattern, VectorPattern};

/// Per-rank sizes, either expanded from a (formula, pattern) pair on every
/// rescale or given literally (`VECTOR`, rigid jobs only).
#[derive(Clone, Debug)]
pub struct VectorPayload {
    model: Option<Formula>,
    pattern: VectorPattern,
    pub sizes: Vec<f64>,
}

impl VectorPayload {
    fn from_value(
        field: &str,
        value: &Value,
        pattern: VectorPattern,
        geometry: Option<(usize, u32)>,
        eval: Option<&EvalContext>,
    ) -> VectorPayload {
        if pattern == VectorPattern::Vector {
            if geometry.is_none() {
                panic!("Invalid pattern type VECTOR for elastic job");
            }
            let sizes = literal_list(field, value);
            return VectorPayload {
                model: None,
                pattern,
                sizes,
            };
        }
        let model = model_from_value(field, value);
        let sizes = match (geometry, eval) {
            (Some((num_nodes, _)), Some(ctx)) => {
                patterns::create_vector(model.evaluate(ctx), pattern, num_nodes)
            }
            _ => Vec::new(),
        };
        VectorPayload {
            model: Some(model),
            pattern,
            sizes,
        }
    }

    fn scale_to(&mut self, num_nodes: usize, ctx: &EvalContext) {
        if let Some(model) = &self.model {
            self.sizes = patterns::create_vector(model.evaluate(ctx), self.pattern, num_nodes);
        }
    }
}

/// Rank×rank payload matrix, expanded like [`VectorPayload`].
#[derive(Clone, Debug)]
pub struct MatrixPayload {
    model: Option<Formula>,
    pattern: MatrixPattern,
    pub sizes: Vec<f64>,
}

impl MatrixPayload {
    fn from_value(
        field: &str,
        value: &Value,
        pattern: MatrixPattern,
        geometry: Option<(usize, u32)>,
        eval: Option<&EvalContext>,
    ) -> MatrixPayload {
        if pattern == MatrixPattern::Matrix {
            if geometry.is_none() {
                panic!("Invalid pattern type MATRIX for elastic job");
            }
            let sizes = literal_list(field, value);
            return MatrixPayload {
                model: None,
                pattern,
                sizes,
            };
        }
        let model = model_from_value(field, value);
        let sizes = match (geometry, eval) {
            (Some((num_nodes, _)), Some(ctx)) => {
                patterns::create_matrix(model.evaluate(ctx), pattern, num_nodes)
            }
            _ => Vec::new(),
        };
        MatrixPayload {
            model: Some(model),
            pattern,
            sizes,
        }
    }

    fn scale_to(&mut self, num_nodes: usize, ctx: &EvalContext) {
        if let Some(model) = &self.model {
            self.sizes = patterns::create_matrix(model.evaluate(ctx), self.pattern, num_nodes);
        }
    }
}

/// Two-level GPU communication: a GPU×GPU intra-node matrix and a node×node
/// inter-node matrix derived from one total size.
#[derive(Clone, Debug)]
pub struct GpuCommPayload {
    model: Option<Formula>,
    pattern: MatrixPattern,
    pub intra_node: Vec<f64>,
    pub inter_node: Vec<f64>,
}

impl GpuCommPayload {
    fn from_value(
        field: &str,
        value: &Value,
        pattern: MatrixPattern,
        geometry: Option<(usize, u32)>,
        eval: Option<&EvalContext>,
    ) -> GpuCommPayload {
        if pattern == MatrixPattern::Matrix {
            panic!("MATRIX communication_pattern not supported for GPU tasks");
        }
        let model = model_from_value(field, value);
        let (intra_node, inter_node) = match (geometry, eval) {
            (Some((num_nodes, gpus)), Some(ctx)) => {
                patterns::create_matrices(model.evaluate(ctx), pattern, num_nodes, gpus as usize)
            }
            _ => (Vec::new(), Vec::new()),
        };
        GpuCommPayload {
            model: Some(model),
            pattern,
            intra_node,
            inter_node,
        }
    }

    fn scale_to(&mut self, num_nodes: usize, num_gpus_per_node: u32, ctx: &EvalContext) {
        if let Some(model) = &self.model {
            let (intra, inter) = patterns::create_matrices(
                model.evaluate(ctx),
                self.pattern,
                num_nodes,
                num_gpus_per_node as usize,
            );
            self.intra_node = intra;
            self.inter_node = inter;
        }
    }
}

#[derive(Clone, Debug)]
pub enum TaskKind {
    /// Occupies the node's CPU for a per-rank wall-clock delay.
    BusyWait { delays: VectorPayload },
    /// Sleeps without occupying resources.
    Idle { delays: VectorPayload },
    CpuCombined {
        flops: Option<VectorPayload>,
        payloads: Option<MatrixPayload>,
        coupled: bool,
    },
    GpuCombined {
        flops: Option<VectorPayload>,
        comm: Option<GpuCommPayload>,
    },
    PfsRead { sizes: VectorPayload },
    PfsWrite { sizes: VectorPayload },
    BbRead { sizes: VectorPayload },
    BbWrite { sizes: VectorPayload },
    Sequence { tasks: Vec<Task> },
}

#[derive(Clone, Debug)]
pub struct Task {
    pub name: String,
    iterations_model: Formula,
    pub iterations: u32,
    pub synchronized: bool,
    asynchronous: bool,
    pub kind: TaskKind,
}

impl Task {
    /// Whether execution returns activity handles instead of blocking.
    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Re-evaluates the iteration count and every payload for the new job
    /// geometry.
    pub fn scale_to(&mut self, num_nodes: usize, num_gpus_per_node: u32, ctx: &EvalContext) {
        self.iterations = evaluate_iterations(&self.iterations_model, ctx);
        match &mut self.kind {
            TaskKind::BusyWait { delays } | TaskKind::Idle { delays } => {
                delays.scale_to(num_nodes, ctx)
            }
            TaskKind::CpuCombined { flops, payloads, .. } => {
                if let Some(flops) = flops {
                    flops.scale_to(num_nodes, ctx);
                }
                if let Some(payloads) = payloads {
                    payloads.scale_to(num_nodes, ctx);
                }
            }
            TaskKind::GpuCombined { flops, comm } => {
                if let Some(flops) = flops {
                    flops.scale_to(num_nodes, ctx);
                }
                if let Some(comm) = comm {
                    comm.scale_to(num_nodes, num_gpus_per_node, ctx);
                }
            }
            TaskKind::PfsRead { sizes }
            | TaskKind::PfsWrite { sizes }
            | TaskKind::BbRead { sizes }
            | TaskKind::BbWrite { sizes } => sizes.scale_to(num_nodes, ctx),
            TaskKind::Sequence { tasks } => {
                for task in tasks {
                    task.scale_to(num_nodes, num_gpus_per_node, ctx);
                }
            }
        }
    }

    /// Builds a task from its workload-file description. `geometry` is the
    /// (nodes, gpus-per-node) pair for rigid jobs, whose payloads are
    /// expanded immediately; elastic jobs defer expansion to the first
    /// `scale_to`.
    pub fn from_json(
        json: &Value,
        arguments: &HashMap<String, String>,
        geometry: Option<(usize, u32)>,
    ) -> Task {
        let name = json
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let iterations_model = match json.get("iterations") {
            Some(Value::Number(n)) => Formula::constant(n.as_f64().unwrap()),
            Some(Value::String(model)) => Formula::parse(model),
            None => Formula::constant(1.0),
            Some(other) => panic!("Invalid iterations specification {}", other),
        };
        let synchronized = json
            .get("synchronized")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let asynchronous = json.get("async").and_then(Value::as_bool).unwrap_or(false);

        let eval = geometry.map(|(n, g)| EvalContext::new(n as u32, g).with_arguments(arguments));
        let eval_ref = eval.as_ref();

        let task_type = json
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_else(|| panic!("Task without a type"))
            .to_lowercase();

        let kind = match task_type.as_str() {
            "busy_wait" => TaskKind::BusyWait {
                delays: delay_payload(json, geometry, eval_ref),
            },
            "idle" => TaskKind::Idle {
                delays: delay_payload(json, geometry, eval_ref),
            },
            "cpu" => cpu_task(json, geometry, eval_ref),
            "gpu" => gpu_task(json, geometry, eval_ref),
            "pfs_read" => TaskKind::PfsRead {
                sizes: io_payload(json, geometry, eval_ref),
            },
            "pfs_write" => TaskKind::PfsWrite {
                sizes: io_payload(json, geometry, eval_ref),
            },
            "bb_read" => TaskKind::BbRead {
                sizes: io_payload(json, geometry, eval_ref),
            },
            "bb_write" => TaskKind::BbWrite {
                sizes: io_payload(json, geometry, eval_ref),
            },
            "sequence" => {
                let tasks = json
                    .get("tasks")
                    .and_then(Value::as_array)
                    .unwrap_or_else(|| panic!("Sequence task without a task list"))
                    .iter()
                    .map(|t| Task::from_json(t, arguments, geometry))
                    .collect();
                TaskKind::Sequence { tasks }
            }
            other => panic!("Invalid task type {}", other),
        };

        let asynchronous = match kind {
            TaskKind::PfsRead { .. }
            | TaskKind::PfsWrite { .. }
            | TaskKind::BbRead { .. }
            | TaskKind::BbWrite { .. } => asynchronous,
            _ => false,
        };

        let iterations = eval_ref
            .map(|ctx| evaluate_iterations(&iterations_model, ctx))
            .unwrap_or(1);

        Task {
            name,
            iterations_model,
            iterations,
            synchronized,
            asynchronous,
            kind,
        }
    }
}

fn evaluate_iterations(model: &Formula, ctx: &EvalContext) -> u32 {
    let value = model.evaluate(ctx).floor();
    if value < 0.0 {
        panic!("Iteration model '{}' evaluated to {}", model.source(), value);
    }
    value as u32
}

fn literal_list(field: &str, value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_f64()
                    .unwrap_or_else(|| panic!("Non-numeric entry in '{}' list", field))
            })
            .collect(),
        _ => panic!("VECTOR pattern requires an array type for '{}'", field),
    }
}

fn model_from_value(field: &str, value: &Value) -> Formula {
    match value {
        Value::Number(n) => Formula::constant(n.as_f64().unwrap()),
        Value::String(model) => Formula::parse(model),
        _ => panic!("'{}' requires a number or string type", field),
    }
}

fn delay_payload(
    json: &Value,
    geometry: Option<(usize, u32)>,
    eval: Option<&EvalContext>,
) -> VectorPayload {
    let pattern = vector_pattern(json, "pattern");
    let value = json
        .get("delay")
        .unwrap_or_else(|| panic!("Delay task without a 'delay' field"));
    VectorPayload::from_value("delay", value, pattern, geometry, eval)
}

fn io_payload(
    json: &Value,
    geometry: Option<(usize, u32)>,
    eval: Option<&EvalContext>,
) -> VectorPayload {
    let pattern = vector_pattern(json, "pattern");
    let value = json
        .get("bytes")
        .unwrap_or_else(|| panic!("I/O task without a 'bytes' field"));
    VectorPayload::from_value("bytes", value, pattern, geometry, eval)
}

fn cpu_task(json: &Value, geometry: Option<(usize, u32)>, eval: Option<&EvalContext>) -> TaskKind {
    let flops_value = json.get("flops").filter(|v| !v.is_null());
    let bytes_value = json.get("bytes").filter(|v| !v.is_null());
    if flops_value.is_none() && bytes_value.is_none() {
        panic!("FLOPS and payloads can not be simultaneously unspecified for the same task");
    }
    let flops = flops_value.map(|value| {
        let pattern = vector_pattern(json, "computation_pattern");
        VectorPayload::from_value("flops", value, pattern, geometry, eval)
    });
    let payloads = bytes_value.map(|value| {
        let pattern = matrix_pattern(json, "communication_pattern");
        MatrixPayload::from_value("bytes", value, pattern, geometry, eval)
    });
    let coupled = json.get("coupled").and_then(Value::as_bool).unwrap_or(false);
    TaskKind::CpuCombined {
        flops,
        payloads,
        coupled,
    }
}

fn gpu_task(json: &Value, geometry: Option<(usize, u32)>, eval: Option<&EvalContext>) -> TaskKind {
    let flops_value = json.get("flops").filter(|v| !v.is_null());
    let bytes_value = json.get("bytes").filter(|v| !v.is_null());
    if flops_value.is_none() && bytes_value.is_none() {
        panic!("FLOPS and payloads can not be simultaneously unspecified for the same task");
    }
    let flops = flops_value.map(|value| {
        let pattern = vector_pattern(json, "computation_pattern");
        VectorPayload::from_value("flops", value, pattern, geometry, eval)
    });
    let comm = bytes_value.map(|value| {
        let pattern = matrix_pattern(json, "communication_pattern");
        GpuCommPayload::from_value("bytes", value, pattern, geometry, eval)
    });
    TaskKind::GpuCombined { flops, comm }
}

fn vector_pattern(json: &Value, field: &str) -> VectorPattern {
    let pattern = json
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("Task without a '{}' field", field));
    VectorPattern::parse(pattern)
}

fn matrix_pattern(json: &Value, field: &str) -> MatrixPattern {
    let pattern = json
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("Task without a '{}' field", field));
    MatrixPattern::parse(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rigid_busy_wait_is_expanded_at_load() {
        let json = json!({
            "type": "busy_wait",
            "name": "warmup",
            "delay": 10.0,
            "pattern": "uniform",
            "iterations": 2
        });
        let task = Task::from_json(&json, &HashMap::new(), Some((3, 0)));
        assert_eq!(task.iterations, 2);
        match &task.kind {
            TaskKind::BusyWait { delays } => assert_eq!(delays.sizes, vec![10.0; 3]),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn elastic_task_defers_expansion_until_scaled() {
        let json = json!({
            "type": "pfs_read",
            "bytes": "1e6 * num_nodes",
            "pattern": "all_ranks",
            "async": true
        });
        let mut task = Task::from_json(&json, &HashMap::new(), None);
        assert!(task.is_asynchronous());
        match &task.kind {
            TaskKind::PfsRead { sizes } => assert!(sizes.sizes.is_empty()),
            other => panic!("unexpected kind {:?}", other),
        }
        task.scale_to(4, 0, &EvalContext::new(4, 0));
        match &task.kind {
            TaskKind::PfsRead { sizes } => assert_eq!(sizes.sizes, vec![1e6; 4]),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn iteration_formula_rescales() {
        let json = json!({
            "type": "idle",
            "delay": 1.0,
            "pattern": "uniform",
            "iterations": "num_nodes * 2"
        });
        let mut task = Task::from_json(&json, &HashMap::new(), Some((2, 0)));
        assert_eq!(task.iterations, 4);
        task.scale_to(3, 0, &EvalContext::new(3, 0));
        assert_eq!(task.iterations, 6);
    }

    #[test]
    fn cpu_task_with_matrix_payloads() {
        let json = json!({
            "type": "cpu",
            "flops": 8e9,
            "computation_pattern": "all_ranks",
            "bytes": 12.0,
            "communication_pattern": "all_to_all",
            "coupled": true
        });
        let task = Task::from_json(&json, &HashMap::new(), Some((2, 0)));
        match &task.kind {
            TaskKind::CpuCombined {
                flops,
                payloads,
                coupled,
            } => {
                assert!(*coupled);
                assert_eq!(flops.as_ref().unwrap().sizes, vec![4e9, 4e9]);
                assert_eq!(payloads.as_ref().unwrap().sizes, vec![0.0, 6.0, 6.0, 0.0]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn user_arguments_feed_payload_models() {
        let mut arguments = HashMap::new();
        arguments.insert("bytes_per_node".to_string(), "2048".to_string());
        let json = json!({
            "type": "bb_write",
            "bytes": "bytes_per_node",
            "pattern": "uniform"
        });
        let task = Task::from_json(&json, &arguments, Some((2, 0)));
        match &task.kind {
            TaskKind::BbWrite { sizes } => assert_eq!(sizes.sizes, vec![2048.0, 2048.0]),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "Invalid pattern type VECTOR")]
    fn literal_vector_requires_rigid_job() {
        let json = json!({
            "type": "idle",
            "delay": [1.0, 2.0],
            "pattern": "vector"
        });
        Task::from_json(&json, &HashMap::new(), None);
    }

    #[test]
    #[should_panic(expected = "Invalid task type")]
    fn unknown_task_type_is_fatal() {
        Task::from_json(&json!({"type": "teleport"}), &HashMap::new(), None);
    }

    #[test]
    fn sequence_tasks_nest() {
        let json = json!({
            "type": "sequence",
            "tasks": [
                {"type": "idle", "delay": 1.0, "pattern": "uniform"},
                {"type": "busy_wait", "delay": 2.0, "pattern": "root_only"}
            ]
        });
        let task = Task::from_json(&json, &HashMap::new(), Some((2, 0)));
        match &task.kind {
            TaskKind::Sequence { tasks } => assert_eq!(tasks.len(), 2),
            other => panic!("unexpected kind {:?}", other),
        }
    }
}

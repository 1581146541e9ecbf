//! YAML job description → computation graph, statistics and planner config.
//!
//! Example:
//! ```yaml
//! job_id: orders-by-region
//! config:
//!   broadcast_join_cost_threshold: 15000
//! computations:
//!   - { name: scan_orders, type: scan_set, database: sales, set: orders }
//!   - { name: scan_regions, type: scan_set, database: sales, set: regions }
//!   - { name: join_region, type: join }
//!   - { name: by_region, type: aggregation, database: sales, set: totals, combiner: true }
//! graph:
//!   - { output: orders, computation: scan_orders, kind: scan }
//!   - { output: regions, computation: scan_regions, kind: scan }
//!   - { output: joined, inputs: [orders, regions], computation: join_region, kind: join_sets }
//!   - { output: totals, inputs: [joined], computation: by_region, kind: aggregate }
//! statistics:
//!   - { database: sales, set: orders, bytes: 40000000000 }
//!   - { database: sales, set: regions, bytes: 2000000 }
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use stageplan_core::config::PlannerConfig;
use stageplan_core::error::Error as CoreError;
use stageplan_core::graph::{
    AtomicComputation, AtomicKind, Computation, ComputationGraph, ComputationType,
};
use stageplan_core::stage::AllocatorPolicy;
use stageplan_core::stats::Statistics;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid job description: {0}")]
    Invalid(#[from] CoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub config: Option<Mapping>,
    pub computations: Vec<ComputationDef>,
    pub graph: Vec<AtomicDef>,
    #[serde(default)]
    pub statistics: Vec<SetSizeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationDef {
    pub name: String,
    #[serde(rename = "type")]
    pub computation_type: ComputationType,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    /// Defaults to true for writes and for aggregations with a target set.
    #[serde(default)]
    pub materialize: Option<bool>,
    #[serde(default)]
    pub combiner: bool,
    #[serde(default)]
    pub collect_as_map: bool,
    #[serde(default)]
    pub num_nodes_to_collect: usize,
    #[serde(default)]
    pub allocator: AllocatorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicDef {
    pub output: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub computation: String,
    pub kind: AtomicKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSizeDef {
    pub database: String,
    pub set: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct JobDescription {
    pub job_id: String,
    pub config: PlannerConfig,
    pub graph: ComputationGraph,
    pub statistics: Statistics,
    /// The `statistics:` entries as written, for seeding a simulated cluster.
    pub set_sizes: Vec<SetSizeDef>,
}

impl ComputationDef {
    fn into_computation(self) -> Computation {
        let writes_output = self.database.is_some()
            && self.set.is_some()
            && matches!(
                self.computation_type,
                ComputationType::Write | ComputationType::Aggregation
            );
        let mut c = Computation::new(self.name, self.computation_type);
        c.database = self.database;
        c.set_name = self.set;
        if let Some(output_type) = self.output_type {
            c.output_type = output_type;
        }
        c.materialize_output = self.materialize.unwrap_or(writes_output);
        c.uses_combiner = self.combiner;
        c.collect_as_map = self.collect_as_map;
        c.num_nodes_to_collect = self.num_nodes_to_collect;
        c.allocator_policy = self.allocator;
        c
    }
}

/// Parse and validate a YAML job description.
///
/// `config` starts from `base` and takes any keys the document sets.
pub fn parse_yaml_job(yaml_src: &str, base: &PlannerConfig) -> Result<JobDescription, DslError> {
    let doc: JobDocument = serde_yaml::from_str(yaml_src)?;

    let mut graph = ComputationGraph::new();
    for def in doc.computations {
        graph.add_computation(def.into_computation());
    }
    for def in doc.graph {
        graph.add_atomic(AtomicComputation {
            output_name: def.output,
            input_names: def.inputs,
            computation_name: def.computation,
            kind: def.kind,
        });
    }
    graph.validate()?;

    let mut statistics = Statistics::new();
    for s in &doc.statistics {
        statistics.set_bytes(&s.database, &s.set, s.bytes);
    }

    let config = match doc.config {
        Some(overrides) => merge_config(base, overrides)?,
        None => base.clone(),
    };
    config.validate()?;

    Ok(JobDescription {
        job_id: doc.job_id.unwrap_or_else(|| "job".to_string()),
        config,
        graph,
        statistics,
        set_sizes: doc.statistics,
    })
}

/// Overlay the document's `config:` keys on `base`.
fn merge_config(base: &PlannerConfig, overrides: Mapping) -> Result<PlannerConfig, DslError> {
    let mut merged = match serde_yaml::to_value(base)? {
        Value::Mapping(m) => m,
        _ => Mapping::new(),
    };
    for (key, value) in overrides {
        if !merged.contains_key(&key) {
            return Err(DslError::Invalid(CoreError::Config(format!(
                "unknown config key {:?}",
                key.as_str().unwrap_or("<non-string>")
            ))));
        }
        merged.insert(key, value);
    }
    Ok(serde_yaml::from_value(Value::Mapping(merged))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
job_id: demo
config:
  broadcast_join_cost_threshold: 10
computations:
  - { name: scan, type: scan_set, database: db, set: input }
  - { name: agg, type: aggregation, database: db, set: totals, combiner: true }
graph:
  - { output: in, computation: scan, kind: scan }
  - { output: totals, inputs: [in], computation: agg, kind: aggregate }
statistics:
  - { database: db, set: input, bytes: 5000000 }
"#;

    #[test]
    fn test_parse_job() {
        let base = PlannerConfig {
            page_size: 4096,
            ..PlannerConfig::default()
        };
        let job = parse_yaml_job(DOC, &base).unwrap();
        assert_eq!(job.job_id, "demo");
        assert_eq!(job.config.broadcast_join_cost_threshold, 10.0);
        // keys absent from the document keep the base value
        assert_eq!(job.config.page_size, 4096);
        assert_eq!(job.statistics.cost("db", "input"), 5.0);

        let agg = job.graph.computation("agg").unwrap();
        assert!(agg.uses_combiner);
        assert!(agg.needs_materialize_output());
        assert_eq!(job.graph.atomics().len(), 2);
    }

    #[test]
    fn test_unknown_config_key() {
        let doc = DOC.replace("broadcast_join_cost_threshold", "threshold");
        let err = parse_yaml_job(&doc, &PlannerConfig::default()).unwrap_err();
        assert!(matches!(err, DslError::Invalid(CoreError::Config(_))));
    }
}

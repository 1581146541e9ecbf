//! Logical computation graph consumed by the planner.
//!
//! Atomic computations are the DAG vertices: each produces one named tuple set
//! from zero (scan), one, or two (join) input tuple sets. Every atomic points
//! at a [`Computation`] that carries the metadata the planner needs: where
//! its output lives, whether it must be materialized, combiner use, etc.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::set::SetIdentifier;
use crate::stage::AllocatorPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicKind {
    Scan,
    Aggregate,
    JoinSets,
    Partition,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicComputation {
    pub output_name: String,
    #[serde(default)]
    pub input_names: Vec<String>,
    pub computation_name: String,
    pub kind: AtomicKind,
}

impl AtomicComputation {
    pub fn scan(output: &str, computation: &str) -> Self {
        Self::with_inputs(output, &[], computation, AtomicKind::Scan)
    }

    pub fn apply(output: &str, input: &str, computation: &str) -> Self {
        Self::with_inputs(output, &[input], computation, AtomicKind::Other)
    }

    pub fn aggregate(output: &str, input: &str, computation: &str) -> Self {
        Self::with_inputs(output, &[input], computation, AtomicKind::Aggregate)
    }

    pub fn partition(output: &str, input: &str, computation: &str) -> Self {
        Self::with_inputs(output, &[input], computation, AtomicKind::Partition)
    }

    pub fn join(output: &str, lhs: &str, rhs: &str, computation: &str) -> Self {
        Self::with_inputs(output, &[lhs, rhs], computation, AtomicKind::JoinSets)
    }

    fn with_inputs(output: &str, inputs: &[&str], computation: &str, kind: AtomicKind) -> Self {
        Self {
            output_name: output.to_string(),
            input_names: inputs.iter().map(|s| s.to_string()).collect(),
            computation_name: computation.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationType {
    ScanSet,
    Selection,
    MultiSelection,
    Aggregation,
    Partition,
    Join,
    Write,
    #[serde(other)]
    Other,
}

impl fmt::Display for ComputationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComputationType::ScanSet => "ScanSet",
            ComputationType::Selection => "Selection",
            ComputationType::MultiSelection => "MultiSelection",
            ComputationType::Aggregation => "Aggregation",
            ComputationType::Partition => "Partition",
            ComputationType::Join => "Join",
            ComputationType::Write => "Write",
            ComputationType::Other => "Other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    Broadcast,
    HashPartitioned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub name: String,
    pub computation_type: ComputationType,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default = "default_output_type")]
    pub output_type: String,
    #[serde(default)]
    pub materialize_output: bool,
    #[serde(default)]
    pub uses_combiner: bool,
    #[serde(default)]
    pub collect_as_map: bool,
    #[serde(default)]
    pub num_nodes_to_collect: usize,
    #[serde(default)]
    pub allocator_policy: AllocatorPolicy,
    /// Decided by the planner when the first join input is analyzed.
    #[serde(default)]
    pub join_strategy: Option<JoinStrategy>,
    #[serde(default)]
    pub partitioning_lhs: bool,
}

fn default_output_type() -> String {
    "Object".to_string()
}

impl Computation {
    pub fn new(name: impl Into<String>, computation_type: ComputationType) -> Self {
        Self {
            name: name.into(),
            computation_type,
            database: None,
            set_name: None,
            output_type: default_output_type(),
            materialize_output: false,
            uses_combiner: false,
            collect_as_map: false,
            num_nodes_to_collect: 0,
            allocator_policy: AllocatorPolicy::Default,
            join_strategy: None,
            partitioning_lhs: false,
        }
    }

    /// A scan reading `database:set_name`.
    pub fn scan(name: impl Into<String>, database: &str, set_name: &str) -> Self {
        let mut c = Self::new(name, ComputationType::ScanSet);
        c.database = Some(database.to_string());
        c.set_name = Some(set_name.to_string());
        c
    }

    /// Persist output to `database:set_name`.
    pub fn with_output(mut self, database: &str, set_name: &str) -> Self {
        self.set_output(database, set_name);
        self
    }

    pub fn with_output_type(mut self, output_type: &str) -> Self {
        self.output_type = output_type.to_string();
        self
    }

    pub fn with_combiner(mut self, uses_combiner: bool) -> Self {
        self.uses_combiner = uses_combiner;
        self
    }

    pub fn with_allocator_policy(mut self, policy: AllocatorPolicy) -> Self {
        self.allocator_policy = policy;
        self
    }

    /// Redirect output to `database:set_name`; the output becomes durable.
    pub fn set_output(&mut self, database: &str, set_name: &str) {
        self.database = Some(database.to_string());
        self.set_name = Some(set_name.to_string());
        self.materialize_output = true;
    }

    pub fn needs_materialize_output(&self) -> bool {
        self.materialize_output
    }

    /// The set a source built on this computation reads from.
    pub fn source_set(&self) -> Result<SetIdentifier> {
        let readable = matches!(
            self.computation_type,
            ComputationType::ScanSet
                | ComputationType::Selection
                | ComputationType::MultiSelection
                | ComputationType::Aggregation
                | ComputationType::Partition
        );
        match (&self.database, &self.set_name) {
            (Some(db), Some(set)) if readable => Ok(SetIdentifier::new(db, set)),
            _ => Err(Error::UnsupportedSource {
                computation: self.name.clone(),
                kind: self.computation_type.to_string(),
            }),
        }
    }

    /// The durable set this computation writes to.
    pub fn sink_set(&self) -> Result<SetIdentifier> {
        match (&self.database, &self.set_name) {
            (Some(db), Some(set)) => Ok(SetIdentifier::new(db, set)),
            _ => Err(Error::UnsupportedSink {
                computation: self.name.clone(),
                kind: self.computation_type.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputationGraph {
    atomics: Vec<AtomicComputation>,
    computations: BTreeMap<String, Computation>,
}

impl ComputationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_atomic(&mut self, atomic: AtomicComputation) -> &mut Self {
        self.atomics.push(atomic);
        self
    }

    pub fn add_computation(&mut self, computation: Computation) -> &mut Self {
        self.computations
            .insert(computation.name.clone(), computation);
        self
    }

    pub fn atomics(&self) -> &[AtomicComputation] {
        &self.atomics
    }

    pub fn atomic(&self, output_name: &str) -> Option<&AtomicComputation> {
        self.atomics.iter().find(|a| a.output_name == output_name)
    }

    /// Atomics reading `output_name`, in declaration order.
    pub fn consumers_of(&self, output_name: &str) -> Vec<&AtomicComputation> {
        self.atomics
            .iter()
            .filter(|a| a.input_names.iter().any(|i| i == output_name))
            .collect()
    }

    pub fn sources(&self) -> Vec<&AtomicComputation> {
        self.atomics
            .iter()
            .filter(|a| a.kind == AtomicKind::Scan)
            .collect()
    }

    pub fn computation(&self, name: &str) -> Result<&Computation> {
        self.computations
            .get(name)
            .ok_or_else(|| Error::UnknownComputation(name.to_string()))
    }

    pub fn computation_mut(&mut self, name: &str) -> Result<&mut Computation> {
        self.computations
            .get_mut(name)
            .ok_or_else(|| Error::UnknownComputation(name.to_string()))
    }

    pub fn computations(&self) -> impl Iterator<Item = &Computation> {
        self.computations.values()
    }

    /// Structural checks: unique outputs, resolvable names, arity, acyclicity.
    pub fn validate(&self) -> Result<()> {
        let mut outputs = HashSet::new();
        for a in &self.atomics {
            if !outputs.insert(a.output_name.as_str()) {
                return Err(Error::Graph(format!(
                    "tuple set '{}' is produced twice",
                    a.output_name
                )));
            }
        }

        for a in &self.atomics {
            self.computation(&a.computation_name)?;
            for input in &a.input_names {
                if !outputs.contains(input.as_str()) {
                    return Err(Error::UnknownTupleSet(input.clone()));
                }
            }
            let arity_ok = match a.kind {
                AtomicKind::Scan => a.input_names.is_empty(),
                AtomicKind::JoinSets => a.input_names.len() == 2,
                AtomicKind::Aggregate | AtomicKind::Partition => a.input_names.len() == 1,
                AtomicKind::Other => !a.input_names.is_empty(),
            };
            if !arity_ok {
                return Err(Error::Graph(format!(
                    "'{}' ({:?}) has {} inputs",
                    a.output_name,
                    a.kind,
                    a.input_names.len()
                )));
            }
            if a.kind == AtomicKind::JoinSets && a.input_names[0] == a.input_names[1] {
                return Err(Error::Graph(format!(
                    "join '{}' reads '{}' on both sides",
                    a.output_name, a.input_names[0]
                )));
            }
        }

        if self.sources().is_empty() {
            return Err(Error::Graph("graph has no scan".into()));
        }

        // Kahn's algorithm over tuple-set edges.
        let mut indegree: HashMap<&str, usize> = self
            .atomics
            .iter()
            .map(|a| (a.output_name.as_str(), a.input_names.len()))
            .collect();
        let mut ready: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0;
        while let Some(name) = ready.pop_front() {
            visited += 1;
            for consumer in self.consumers_of(name) {
                let reads = consumer.input_names.iter().filter(|i| *i == name).count();
                if let Some(d) = indegree.get_mut(consumer.output_name.as_str()) {
                    *d -= reads;
                    if *d == 0 {
                        ready.push_back(consumer.output_name.as_str());
                    }
                }
            }
        }
        if visited != self.atomics.len() {
            return Err(Error::Graph("computation graph has a cycle".into()));
        }

        Ok(())
    }
}

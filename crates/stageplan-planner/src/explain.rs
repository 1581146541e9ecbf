//! Human-readable rendering of a job plan (EXPLAIN).

use std::fmt::Write as _;

use stageplan_core::stage::JobStage;

use crate::plan::JobPlan;

pub fn explain_plan(plan: &JobPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "job {}: {} stages, {} intermediate sets",
        plan.job_id,
        plan.stages.len(),
        plan.intermediate_sets.len()
    );
    for stage in &plan.stages {
        let _ = writeln!(out, "  {}", explain_stage(stage));
    }
    if !plan.intermediate_sets.is_empty() {
        let _ = writeln!(out, "intermediate sets:");
        for set in &plan.intermediate_sets {
            let page = set
                .page_size
                .map(|p| format!(" (page {} bytes)", p))
                .unwrap_or_default();
            let _ = writeln!(out, "  {}{}", set, page);
        }
    }
    out
}

pub fn explain_stage(stage: &JobStage) -> String {
    match stage {
        JobStage::TupleSet(s) => {
            let mut flags = Vec::new();
            if s.broadcasting {
                flags.push("broadcast".to_string());
            }
            if s.repartitioning {
                flags.push("repartition".to_string());
            }
            if s.repartition_join {
                flags.push("join".to_string());
            }
            if s.repartition_vector {
                flags.push("vector".to_string());
            }
            if let Some(probes) = &s.hash_sets_to_probe {
                for (tuple_set, hash_set) in probes {
                    flags.push(format!("probe {}<-{}", tuple_set, hash_set));
                }
            }
            if let Some(combiner) = &s.combiner {
                flags.push(format!("combiner {}", combiner));
            }
            if s.need_remove_input {
                flags.push("consume-input".to_string());
            }
            format!(
                "#{} TupleSet {} -> {} [{}] via {}{}",
                s.id.get(),
                s.source,
                s.sink,
                s.tuple_sets_to_build.join(", "),
                s.target_computation,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" {{{}}}", flags.join("; "))
                }
            )
        }
        JobStage::Aggregation(s) => format!(
            "#{} Aggregation {} -> {} via {}{}",
            s.id.get(),
            s.source,
            s.sink,
            s.aggregate_computation,
            if s.materialize { " {materialize}" } else { "" }
        ),
        JobStage::BroadcastJoinBuild(s) => format!(
            "#{} BroadcastJoinBuild {} => {} for {}",
            s.id.get(),
            s.source,
            s.hash_set_name,
            s.target_computation
        ),
        JobStage::HashPartitionedJoinBuild(s) => format!(
            "#{} HashPartitionedJoinBuild {} => {} for {}",
            s.id.get(),
            s.source,
            s.hash_set_name,
            s.target_computation
        ),
    }
}

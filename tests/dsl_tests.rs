//! YAML job descriptions: parsing, validation and EXPLAIN output.

use stageplan_core::config::PlannerConfig;
use stageplan_core::error::Error;
use stageplan_planner::{explain_plan, parse_yaml_job, plan_job, DslError};

const ORDERS: &str = r#"
job_id: orders-by-region
computations:
  - { name: scan_orders, type: scan_set, database: sales, set: orders }
  - { name: scan_regions, type: scan_set, database: sales, set: regions }
  - { name: join_region, type: join }
  - { name: by_region, type: aggregation, database: sales, set: totals, combiner: true }
graph:
  - { output: orders, computation: scan_orders, kind: scan }
  - { output: regions, computation: scan_regions, kind: scan }
  - { output: joined, inputs: [orders, regions], computation: join_region, kind: join_sets }
  - { output: totals, inputs: [joined], computation: by_region, kind: aggregate }
statistics:
  - { database: sales, set: orders, bytes: 40000000000 }
  - { database: sales, set: regions, bytes: 2000000 }
"#;

#[test]
fn test_parse_and_plan_document() {
    let job = parse_yaml_job(ORDERS, &PlannerConfig::default()).unwrap();
    assert_eq!(job.job_id, "orders-by-region");
    assert_eq!(job.set_sizes.len(), 2);
    assert_eq!(job.statistics.cost("sales", "orders"), 40_000.0);

    let plan = plan_job(job.job_id, job.graph, job.config, &job.statistics).unwrap();
    plan.check_order().unwrap();
    // regions is small: broadcast, then orders probes and aggregates
    assert_eq!(plan.stages.len(), 4);
    assert_eq!(plan.stages[0].source().key(), "sales:regions");
    assert_eq!(plan.stages[1].kind(), "BroadcastJoinBuildHTJobStage");
}

#[test]
fn test_document_config_overrides_base() {
    let doc = format!("config:\n  broadcast_join_cost_threshold: 1\n{}", ORDERS);
    let job = parse_yaml_job(&doc, &PlannerConfig::default()).unwrap();
    assert_eq!(job.config.broadcast_join_cost_threshold, 1.0);

    let plan = plan_job(job.job_id, job.graph, job.config, &job.statistics).unwrap();
    assert_eq!(plan.stages[1].kind(), "HashPartitionedJoinBuildHTJobStage");
    assert_eq!(plan.stages.len(), 5);
}

#[test]
fn test_invalid_config_value_is_rejected() {
    let doc = format!("config:\n  source_penalty_factor: 0\n{}", ORDERS);
    let err = parse_yaml_job(&doc, &PlannerConfig::default()).unwrap_err();
    assert!(matches!(err, DslError::Invalid(Error::Config(_))));
}

#[test]
fn test_unknown_input_is_rejected() {
    let doc = ORDERS.replace("inputs: [joined]", "inputs: [missing]");
    let err = parse_yaml_job(&doc, &PlannerConfig::default()).unwrap_err();
    assert!(matches!(err, DslError::Invalid(Error::UnknownTupleSet(ref s)) if s == "missing"));
}

#[test]
fn test_malformed_yaml() {
    let err = parse_yaml_job("computations: [", &PlannerConfig::default()).unwrap_err();
    assert!(matches!(err, DslError::Yaml(_)));
}

#[test]
fn test_explain_lists_stages_and_sets() {
    let job = parse_yaml_job(ORDERS, &PlannerConfig::default()).unwrap();
    let plan = plan_job(job.job_id, job.graph, job.config, &job.statistics).unwrap();
    let text = explain_plan(&plan);

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "job orders-by-region: 4 stages, 3 intermediate sets");
    assert!(lines[1].starts_with("  #0 TupleSet sales:regions -> orders-by-region:joined_broadcastData"));
    assert!(lines[1].contains("{broadcast}"));
    assert!(lines[2].contains("BroadcastJoinBuild"));
    assert!(lines[3].contains("probe joined<-orders-by-region:joined_broadcastData"));
    assert!(lines[4].contains("Aggregation") && lines[4].contains("{materialize}"));
    assert!(text.contains("intermediate sets:"));
}

//! Physical planner tests: pipelines, breakers, join strategies, source order.

use stageplan_core::config::PlannerConfig;
use stageplan_core::error::Error;
use stageplan_core::graph::{
    AtomicComputation, Computation, ComputationGraph, ComputationType, JoinStrategy,
};
use stageplan_core::set::SetType;
use stageplan_core::stage::JobStage;
use stageplan_core::stats::Statistics;
use stageplan_planner::{plan_job, JobPlan, PhysicalOptimizer};

const MB: u64 = 1_000_000;

fn write(name: &str, set: &str) -> Computation {
    Computation::new(name, ComputationType::Write).with_output("db", set)
}

fn stats(sizes: &[(&str, u64)]) -> Statistics {
    let mut s = Statistics::new();
    for (set, bytes) in sizes {
        s.set_bytes("db", set, *bytes);
    }
    s
}

fn kinds(plan: &JobPlan) -> Vec<&'static str> {
    plan.stages.iter().map(|s| s.kind()).collect()
}

fn set_names(plan: &JobPlan) -> Vec<String> {
    plan.intermediate_sets.iter().map(|s| s.set_name.clone()).collect()
}

/// `l` and `r` joined, then aggregated into `db:totals`.
fn join_then_aggregate() -> ComputationGraph {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan_l", "db", "l"))
        .add_computation(Computation::scan("scan_r", "db", "r"))
        .add_computation(Computation::new("join", ComputationType::Join))
        .add_computation(
            Computation::new("agg", ComputationType::Aggregation).with_output("db", "totals"),
        )
        .add_atomic(AtomicComputation::scan("l", "scan_l"))
        .add_atomic(AtomicComputation::scan("r", "scan_r"))
        .add_atomic(AtomicComputation::join("j", "l", "r", "join"))
        .add_atomic(AtomicComputation::aggregate("totals", "j", "agg"));
    g
}

/// a, b -> j1; j1, c -> j2 -> write.
fn two_joins() -> ComputationGraph {
    join_chain("c")
}

/// a, b -> j1; j1, `third` -> j2 -> write.
fn join_chain(third: &str) -> ComputationGraph {
    let scan_third = format!("scan_{third}");
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan_a", "db", "a"))
        .add_computation(Computation::scan("scan_b", "db", "b"))
        .add_computation(Computation::scan(scan_third.clone(), "db", third))
        .add_computation(Computation::new("join1", ComputationType::Join))
        .add_computation(Computation::new("join2", ComputationType::Join))
        .add_computation(write("write", "out"))
        .add_atomic(AtomicComputation::scan("a", "scan_a"))
        .add_atomic(AtomicComputation::scan("b", "scan_b"))
        .add_atomic(AtomicComputation::scan(third, &scan_third))
        .add_atomic(AtomicComputation::join("j1", "a", "b", "join1"))
        .add_atomic(AtomicComputation::join("j2", "j1", third, "join2"))
        .add_atomic(AtomicComputation::apply("out", "j2", "write"));
    g
}

#[test]
fn test_pass_through_chain_is_one_stage() {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan", "db", "in"))
        .add_computation(Computation::new("sel", ComputationType::Selection))
        .add_computation(write("write", "out"))
        .add_atomic(AtomicComputation::scan("in", "scan"))
        .add_atomic(AtomicComputation::apply("a", "in", "sel"))
        .add_atomic(AtomicComputation::apply("o", "a", "write"));

    let plan = plan_job("job", g, PlannerConfig::default(), &Statistics::new()).unwrap();
    assert_eq!(plan.stages.len(), 1);
    assert!(plan.intermediate_sets.is_empty());

    let stage = plan.stages[0].as_tuple_set().unwrap();
    assert_eq!(stage.id.get(), 0);
    assert_eq!(stage.source.key(), "db:in");
    assert_eq!(stage.source_tuple_set, "in");
    assert_eq!(stage.tuple_sets_to_build, vec!["in", "a"]);
    assert_eq!(stage.target_tuple_set, "a");
    assert_eq!(stage.target_computation, "write");
    assert_eq!(stage.sink.key(), "db:out");
    assert!(!stage.probing);
    assert!(!stage.repartitioning);
}

#[test]
fn test_aggregation_emits_shuffle_then_aggregate() {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan", "db", "in"))
        .add_computation(
            Computation::new("agg", ComputationType::Aggregation)
                .with_output("db", "totals")
                .with_combiner(true),
        )
        .add_atomic(AtomicComputation::scan("in", "scan"))
        .add_atomic(AtomicComputation::aggregate("totals", "in", "agg"));

    let plan = plan_job("job", g, PlannerConfig::default(), &Statistics::new()).unwrap();
    assert_eq!(kinds(&plan), vec!["TupleSetJobStage", "AggregationJobStage"]);
    assert_eq!(
        set_names(&plan),
        vec!["totals_aggregationData", "totals_combinerData"]
    );

    let shuffle = plan.stages[0].as_tuple_set().unwrap();
    assert!(shuffle.repartitioning);
    assert!(shuffle.combining);
    assert_eq!(shuffle.output_type, "IntermediateData");
    assert_eq!(shuffle.sink.key(), "job:totals_aggregationData");
    assert_eq!(
        shuffle.sink.page_size,
        Some(PlannerConfig::default().shuffle_page_size)
    );

    match &plan.stages[1] {
        JobStage::Aggregation(agg) => {
            assert_eq!(agg.source.key(), "job:totals_aggregationData");
            assert_eq!(agg.sink.key(), "db:totals");
            assert!(agg.materialize);
        }
        other => panic!("expected aggregation, got {}", other.kind()),
    }
    plan.check_order().unwrap();
}

#[test]
fn test_uncombined_aggregation_result_feeds_next_pipeline() {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan", "db", "in"))
        .add_computation(Computation::new("agg", ComputationType::Aggregation))
        .add_computation(write("write", "out"))
        .add_atomic(AtomicComputation::scan("in", "scan"))
        .add_atomic(AtomicComputation::aggregate("totals", "in", "agg"))
        .add_atomic(AtomicComputation::apply("o", "totals", "write"));

    let plan = plan_job("job", g, PlannerConfig::default(), &Statistics::new()).unwrap();
    assert_eq!(plan.stages.len(), 3);
    plan.check_order().unwrap();

    match &plan.stages[1] {
        JobStage::Aggregation(agg) => {
            assert_eq!(agg.sink.key(), "job:totals_aggregationResult");
            assert!(!agg.materialize);
        }
        other => panic!("expected aggregation, got {}", other.kind()),
    }
    let reader = plan.stages[2].as_tuple_set().unwrap();
    assert_eq!(reader.source.key(), "job:totals_aggregationResult");
    assert!(reader.input_agg_hash_out);
    assert!(reader.need_remove_input);
    assert_eq!(reader.sink.key(), "db:out");
}

#[test]
fn test_partition_materializes_for_its_consumer() {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan", "db", "in"))
        .add_computation(Computation::new("part", ComputationType::Partition))
        .add_computation(write("write", "out"))
        .add_atomic(AtomicComputation::scan("in", "scan"))
        .add_atomic(AtomicComputation::partition("p", "in", "part"))
        .add_atomic(AtomicComputation::apply("o", "p", "write"));

    let config = PlannerConfig::default();
    let plan = plan_job("job", g, config.clone(), &Statistics::new()).unwrap();
    assert_eq!(plan.stages.len(), 2);
    assert_eq!(set_names(&plan), vec!["p"]);
    assert_eq!(plan.intermediate_sets[0].page_size, Some(config.page_size));

    let split = plan.stages[0].as_tuple_set().unwrap();
    assert!(split.repartitioning);
    assert!(split.repartition_vector);
    assert_eq!(split.sink.key(), "job:p");
    assert_eq!(plan.stages[1].source().key(), "job:p");
    plan.check_order().unwrap();
}

#[test]
fn test_cheap_side_is_broadcast() {
    let sizes = stats(&[("l", 2 * MB), ("r", 20_000 * MB)]);
    let plan = plan_job("job", join_then_aggregate(), PlannerConfig::default(), &sizes).unwrap();

    assert_eq!(
        kinds(&plan),
        vec![
            "TupleSetJobStage",
            "BroadcastJoinBuildHTJobStage",
            "TupleSetJobStage",
            "AggregationJobStage",
        ]
    );
    assert_eq!(set_names(&plan), vec!["j_broadcastData", "totals_aggregationData"]);
    plan.check_order().unwrap();

    let prep = plan.stages[0].as_tuple_set().unwrap();
    assert!(prep.broadcasting);
    assert_eq!(prep.source.key(), "db:l");
    assert_eq!(prep.sink.key(), "job:j_broadcastData");

    let probe = plan.stages[2].as_tuple_set().unwrap();
    assert_eq!(probe.source.key(), "db:r");
    assert!(probe.probing);
    assert_eq!(probe.tuple_sets_to_build, vec!["r", "j"]);
    let probed = probe.hash_sets_to_probe.as_ref().unwrap();
    assert_eq!(probed.get("j").map(String::as_str), Some("job:j_broadcastData"));
}

#[test]
fn test_expensive_sides_are_hash_partitioned() {
    let sizes = stats(&[("l", 20_000 * MB), ("r", 30_000 * MB)]);
    let plan = plan_job("job", join_then_aggregate(), PlannerConfig::default(), &sizes).unwrap();

    assert_eq!(
        kinds(&plan),
        vec![
            "TupleSetJobStage",
            "HashPartitionedJoinBuildHTJobStage",
            "TupleSetJobStage",
            "TupleSetJobStage",
            "AggregationJobStage",
        ]
    );
    assert_eq!(
        set_names(&plan),
        vec!["j_repartitionData", "j_probeRepartitionData", "totals_aggregationData"]
    );
    plan.check_order().unwrap();

    let build_prep = plan.stages[0].as_tuple_set().unwrap();
    assert_eq!(build_prep.source.key(), "db:l");
    assert!(build_prep.repartitioning && build_prep.repartition_join);

    let probe_prep = plan.stages[2].as_tuple_set().unwrap();
    assert_eq!(probe_prep.source.key(), "db:r");
    assert_eq!(probe_prep.sink.key(), "job:j_probeRepartitionData");

    let probe = plan.stages[3].as_tuple_set().unwrap();
    assert_eq!(probe.source.key(), "job:j_probeRepartitionData");
    assert_eq!(probe.source_tuple_set, "r");
    assert!(probe.probing);
    assert_eq!(
        probe.hash_sets_to_probe.as_ref().unwrap().get("j").map(String::as_str),
        Some("job:j_repartitionData")
    );

    let ids: Vec<u64> = plan.stages.iter().map(|s| s.id().get()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_threshold_is_configurable() {
    let sizes = stats(&[("l", 2 * MB), ("r", 20_000 * MB)]);
    let config = PlannerConfig {
        broadcast_join_cost_threshold: 1.0,
        ..PlannerConfig::default()
    };
    let plan = plan_job("job", join_then_aggregate(), config, &sizes).unwrap();
    assert_eq!(plan.stages[1].kind(), "HashPartitionedJoinBuildHTJobStage");
}

#[test]
fn test_probe_into_unbuilt_join_is_refused_and_penalized() {
    let sizes = stats(&[("a", MB), ("b", 2 * MB), ("c", 3 * MB)]);
    let mut opt = PhysicalOptimizer::new("job", two_joins(), PlannerConfig::default()).unwrap();

    // a builds j1
    let first = opt.plan_increment(&sizes).unwrap();
    assert_eq!(first.stages.len(), 2);
    assert_eq!(
        opt.join_state("j1").and_then(|s| s.strategy()),
        Some(JoinStrategy::Broadcast)
    );
    assert!(!opt.has_consumers("db:a"));

    // b probes j1, reaches j2 unbuilt and backs off; c builds j2 instead
    let second = opt.plan_increment(&sizes).unwrap();
    assert!(opt.is_penalized("db:b"));
    assert_eq!(opt.ranking_cost("db:b", &sizes), Some(2000.0));
    assert_eq!(second.stages.len(), 2);
    assert_eq!(second.stages[0].source().key(), "db:c");
    assert_eq!(second.stages[0].id().get(), 2);
    assert!(opt.join_state("j2").unwrap().is_transversed());

    // b now probes both tables in one pipeline
    let third = opt.plan_increment(&sizes).unwrap();
    assert_eq!(third.stages.len(), 1);
    let probe = third.stages[0].as_tuple_set().unwrap();
    assert_eq!(probe.id.get(), 4);
    assert_eq!(probe.tuple_sets_to_build, vec!["b", "j1", "j2"]);
    assert_eq!(probe.hash_sets_to_probe.as_ref().unwrap().len(), 2);
    assert_eq!(probe.sink.key(), "db:out");
    assert!(!opt.has_sources());
}

#[test]
fn test_full_plan_keeps_order_after_rollback() {
    let sizes = stats(&[("a", MB), ("b", 2 * MB), ("c", 3 * MB)]);
    let plan = plan_job("job", two_joins(), PlannerConfig::default(), &sizes).unwrap();
    assert_eq!(plan.stages.len(), 5);
    plan.check_order().unwrap();
}

#[test]
fn test_sub_megabyte_sources_plan_after_refusal() {
    // every cost is 0, so the penalty alone cannot reorder the sources
    let tiny = stats(&[("a", 10), ("b", 20), ("c", 30)]);
    let plan = plan_job("job", two_joins(), PlannerConfig::default(), &tiny).unwrap();
    assert_eq!(plan.stages.len(), 5);
    plan.check_order().unwrap();
    assert_eq!(plan.stages[2].source().key(), "db:c");

    let plan = plan_job("job", two_joins(), PlannerConfig::default(), &Statistics::new()).unwrap();
    assert_eq!(plan.stages.len(), 5);
    plan.check_order().unwrap();
}

#[test]
fn test_refused_source_yields_to_costlier_builder() {
    // penalized b ranks at 2000, still below d at 5000
    let sizes = stats(&[("a", MB), ("b", 2 * MB), ("d", 5_000 * MB)]);
    let mut opt = PhysicalOptimizer::new("job", join_chain("d"), PlannerConfig::default()).unwrap();
    opt.plan_increment(&sizes).unwrap();

    let second = opt.plan_increment(&sizes).unwrap();
    assert!(opt.is_penalized("db:b"));
    assert_eq!(second.stages[0].source().key(), "db:d");
    assert_eq!(second.stages[1].kind(), "BroadcastJoinBuildHTJobStage");

    let third = opt.plan_increment(&sizes).unwrap();
    assert_eq!(third.stages[0].source().key(), "db:b");
    assert!(!opt.has_sources());
}

#[test]
fn test_equal_cost_prefers_unpenalized_source() {
    let sizes = Statistics::new();
    let mut opt = PhysicalOptimizer::new("job", two_joins(), PlannerConfig::default()).unwrap();
    opt.plan_increment(&sizes).unwrap();

    let mut out = Default::default();
    assert!(!opt.next_stages(&sizes, &mut out).unwrap());
    assert!(opt.is_penalized("db:b"));
    assert_eq!(opt.ranking_cost("db:b", &sizes), opt.ranking_cost("db:c", &sizes));
    assert_eq!(opt.best_source(&sizes).unwrap().0, "db:c");
}

#[test]
fn test_permanent_refusal_is_a_planning_error() {
    // j2 joins two joins; whichever side reaches it is always probing.
    let mut g = ComputationGraph::new();
    for s in ["a", "b", "c", "d"] {
        g.add_computation(Computation::scan(format!("scan_{s}"), "db", s))
            .add_atomic(AtomicComputation::scan(s, &format!("scan_{s}")));
    }
    g.add_computation(Computation::new("join", ComputationType::Join))
        .add_computation(write("write", "out"))
        .add_atomic(AtomicComputation::join("j1", "a", "b", "join"))
        .add_atomic(AtomicComputation::join("j3", "c", "d", "join"))
        .add_atomic(AtomicComputation::join("j2", "j1", "j3", "join"))
        .add_atomic(AtomicComputation::apply("out", "j2", "write"));
    let sizes = stats(&[("a", MB), ("b", 2 * MB), ("c", 3 * MB), ("d", 4 * MB)]);

    let err = plan_job("job", g, PlannerConfig::default(), &sizes).unwrap_err();
    assert!(matches!(err, Error::Plan(_)));
}

#[test]
fn test_best_source_is_stable() {
    let sizes = stats(&[("l", 5 * MB), ("r", 5 * MB)]);
    let opt = PhysicalOptimizer::new("job", join_then_aggregate(), PlannerConfig::default()).unwrap();
    let first = opt.best_source(&sizes).unwrap();
    let second = opt.best_source(&sizes).unwrap();
    assert_eq!(first, second);
    // ties go to the first key
    assert_eq!(first.0, "db:l");
}

#[test]
fn test_multi_consumer_join_is_materialized() {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan_l", "db", "l"))
        .add_computation(Computation::scan("scan_r", "db", "r"))
        .add_computation(Computation::new("join", ComputationType::Join))
        .add_computation(write("w1", "o1"))
        .add_computation(write("w2", "o2"))
        .add_atomic(AtomicComputation::scan("l", "scan_l"))
        .add_atomic(AtomicComputation::scan("r", "scan_r"))
        .add_atomic(AtomicComputation::join("j", "l", "r", "join"))
        .add_atomic(AtomicComputation::apply("o1", "j", "w1"))
        .add_atomic(AtomicComputation::apply("o2", "j", "w2"));
    let sizes = stats(&[("l", MB), ("r", 2 * MB)]);

    let plan = plan_job("job", g, PlannerConfig::default(), &sizes).unwrap();
    assert_eq!(plan.stages.len(), 5);
    assert_eq!(set_names(&plan), vec!["j_broadcastData", "j"]);
    assert_eq!(plan.intermediate_sets[1].set_type, SetType::Intermediate);
    plan.check_order().unwrap();

    let materialize = plan.stages[2].as_tuple_set().unwrap();
    assert!(materialize.probing);
    assert_eq!(materialize.sink.key(), "job:j");

    let sinks: Vec<String> = plan.stages[3..]
        .iter()
        .filter_map(|s| s.sink().map(|k| k.key()))
        .collect();
    assert_eq!(sinks, vec!["db:o1", "db:o2"]);
}

#[test]
fn test_graph_errors_surface_at_construction() {
    let mut no_scan = ComputationGraph::new();
    no_scan.add_computation(write("write", "out"));
    assert!(matches!(
        PhysicalOptimizer::new("job", no_scan, PlannerConfig::default()),
        Err(Error::Graph(_))
    ));

    let mut unknown = ComputationGraph::new();
    unknown
        .add_computation(Computation::scan("scan", "db", "in"))
        .add_atomic(AtomicComputation::scan("in", "scan"))
        .add_atomic(AtomicComputation::apply("o", "in", "missing"));
    assert!(matches!(
        PhysicalOptimizer::new("job", unknown, PlannerConfig::default()),
        Err(Error::UnknownComputation(_))
    ));

    let mut twice = ComputationGraph::new();
    twice
        .add_computation(Computation::scan("scan", "db", "in"))
        .add_computation(write("write", "out"))
        .add_atomic(AtomicComputation::scan("x", "scan"))
        .add_atomic(AtomicComputation::scan("y", "scan"))
        .add_atomic(AtomicComputation::apply("o1", "x", "write"));
    assert!(matches!(
        PhysicalOptimizer::new("job", twice, PlannerConfig::default()),
        Err(Error::Graph(_))
    ));
}

#[test]
fn test_output_without_sink_is_unsupported() {
    let mut g = ComputationGraph::new();
    g.add_computation(Computation::scan("scan", "db", "in"))
        .add_computation(Computation::new("sel", ComputationType::Selection))
        .add_atomic(AtomicComputation::scan("in", "scan"))
        .add_atomic(AtomicComputation::apply("a", "in", "sel"));
    let err = plan_job("job", g, PlannerConfig::default(), &Statistics::new()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedSink { .. }));
}

#[test]
fn test_fingerprint_is_deterministic() {
    let sizes = stats(&[("l", 2 * MB), ("r", 20_000 * MB)]);
    let a = plan_job("job", join_then_aggregate(), PlannerConfig::default(), &sizes).unwrap();
    let b = plan_job("job", join_then_aggregate(), PlannerConfig::default(), &sizes).unwrap();
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

    let other = stats(&[("l", 20_000 * MB), ("r", 30_000 * MB)]);
    let c = plan_job("job", join_then_aggregate(), PlannerConfig::default(), &other).unwrap();
    assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
}

#[test]
fn test_stages_serialize_with_kind_tag() {
    let sizes = stats(&[("l", 2 * MB), ("r", 20_000 * MB)]);
    let plan = plan_job("job", join_then_aggregate(), PlannerConfig::default(), &sizes).unwrap();
    let json = serde_json::to_value(&plan).unwrap();
    let stages = json["stages"].as_array().unwrap();
    assert_eq!(stages[0]["stage"], "tuple_set");
    assert_eq!(stages[1]["stage"], "broadcast_join_build");
    assert_eq!(stages[3]["stage"], "aggregation");

    let back: JobPlan = serde_json::from_value(json).unwrap();
    assert_eq!(back.stages, plan.stages);
}

//! stageplan CLI: validate, explain and simulate YAML job descriptions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stageplan_core::config::{NodeResources, PlannerConfig, SchedulerConfig};
use stageplan_exec::{JobScheduler, LocalCluster};
use stageplan_planner::dsl::yaml::SetSizeDef;
use stageplan_planner::{explain_plan, parse_yaml_job, plan_job, JobDescription, PhysicalOptimizer};

/// Page size the simulated cluster stores seeded user sets with.
const SIM_PAGE_SIZE: u64 = 1_000_000;

/// Port of simulated node 0; node `i` listens on `SIM_BASE_PORT + i`.
const SIM_BASE_PORT: u16 = 8108;

#[derive(Parser)]
#[command(name = "stageplan")]
#[command(about = "Cost-based physical planner for dataflow jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Default, Clone)]
struct PlannerOverrides {
    /// Broadcast/hash-partition join threshold, in MB (overrides config)
    #[arg(long)]
    join_threshold: Option<f64>,

    /// Intermediate set page size in bytes (overrides config)
    #[arg(long)]
    page_size: Option<u64>,

    /// Penalty factor for refused sources (overrides config)
    #[arg(long)]
    penalty: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a job description for errors
    Validate {
        /// Path to the job YAML file
        #[arg(short, long)]
        job: PathBuf,
    },

    /// Plan a job against the sizes in its `statistics:` section (EXPLAIN)
    Explain {
        #[arg(short, long)]
        job: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: PlannerOverrides,
    },

    /// Run a job on an in-process cluster, re-planning after every increment
    Simulate {
        #[arg(short, long)]
        job: PathBuf,

        /// Number of simulated nodes
        #[arg(long, default_value = "2")]
        nodes: usize,

        /// Cores per simulated node
        #[arg(long, default_value = "8")]
        cores: usize,

        #[command(flatten)]
        overrides: PlannerOverrides,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { job } => {
            if let Err(e) = load_job(&job, &PlannerOverrides::default()) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Job is valid");
        }
        Commands::Explain {
            job,
            json,
            overrides,
        } => {
            if let Err(e) = explain_job(&job, json, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Simulate {
            job,
            nodes,
            cores,
            overrides,
        } => {
            if let Err(e) = simulate_job(&job, nodes, cores, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Log filter comes from `STAGEPLAN_LOG`; warnings only by default.
fn init_logging() {
    let filter = EnvFilter::try_from_env("STAGEPLAN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Environment, then the document's `config:`, then command-line flags.
fn load_job(path: &Path, overrides: &PlannerOverrides) -> Result<JobDescription, Box<dyn std::error::Error>> {
    let yaml = fs::read_to_string(path)?;
    let mut job = parse_yaml_job(&yaml, &PlannerConfig::from_env())?;
    apply_overrides(&mut job.config, overrides);
    job.config.validate()?;
    Ok(job)
}

fn apply_overrides(config: &mut PlannerConfig, overrides: &PlannerOverrides) {
    if let Some(t) = overrides.join_threshold {
        config.broadcast_join_cost_threshold = t;
    }
    if let Some(p) = overrides.page_size {
        config.page_size = p;
    }
    if let Some(f) = overrides.penalty {
        config.source_penalty_factor = f;
    }
}

fn explain_job(
    path: &Path,
    json: bool,
    overrides: &PlannerOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = load_job(path, overrides)?;
    let plan = plan_job(job.job_id, job.graph, job.config, &job.statistics)?;
    plan.check_order()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", explain_plan(&plan));
        println!("fingerprint: {}", plan.fingerprint()?.short());
    }
    Ok(())
}

fn simulate_job(
    path: &Path,
    nodes: usize,
    cores: usize,
    overrides: &PlannerOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = load_job(path, overrides)?;
    tracing::info!(job = %job.job_id, nodes, cores, "simulating job");

    let resources = sim_nodes(nodes, cores)?;
    let scheduler_config = SchedulerConfig::from_env().with_nodes(resources);

    let cluster = Arc::new(LocalCluster::new());
    seed_cluster(&cluster, &job.set_sizes, nodes);

    let mut optimizer = PhysicalOptimizer::new(job.job_id, job.graph, job.config)?;
    let scheduler = JobScheduler::new(cluster.clone(), scheduler_config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let manifest = runtime.block_on(scheduler.run(&mut optimizer))?;

    println!("✓ Job simulated successfully");
    println!("  Stages: {}", manifest.num_stages);
    println!("  Increments: {}", manifest.num_increments);
    println!("  Intermediate sets: {}", manifest.intermediate_sets_created);
    println!("  Plan hash: {}", manifest.plan_hash);
    Ok(())
}

fn sim_nodes(nodes: usize, cores: usize) -> Result<Vec<NodeResources>, String> {
    if nodes == 0 {
        return Err("--nodes must be at least 1".to_string());
    }
    (0..nodes)
        .map(|i| {
            u16::try_from(i)
                .ok()
                .and_then(|offset| SIM_BASE_PORT.checked_add(offset))
                .map(|port| NodeResources::new(i, "localhost", port).with_cores(cores))
                .ok_or_else(|| format!("--nodes {} runs out of ports above {}", nodes, SIM_BASE_PORT))
        })
        .collect()
}

/// Spread each set's pages evenly over the nodes.
fn seed_cluster(cluster: &LocalCluster, sizes: &[SetSizeDef], nodes: usize) {
    let nodes = nodes.max(1) as u64;
    for s in sizes {
        let pages = s.bytes / SIM_PAGE_SIZE;
        for node in 0..nodes {
            let share = pages / nodes + u64::from(node < pages % nodes);
            cluster.seed_set(node as usize, &s.database, &s.set, share, SIM_PAGE_SIZE);
        }
    }
}

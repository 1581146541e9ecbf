#![forbid(unsafe_code)]
//! stageplan-core: the value types shared by the planner and the executor.
//!
//! Design:
//! - `set` and `stage` are the wire-level vocabulary: named sets and the four
//!   job-stage variants a cluster node knows how to run.
//! - `graph` is the logical computation graph the planner consumes. It is
//!   produced elsewhere (a compiler front end or a YAML job description).
//! - `stats` holds per-set byte counts and the cost function built on them.
//! - No async, no I/O. Higher layers own the cluster and the storage.

pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod set;
pub mod stage;
pub mod stats;

/// Crate version, recorded in job manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

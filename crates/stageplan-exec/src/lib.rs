#![forbid(unsafe_code)]
//! stageplan-exec: drives a planned job against a cluster.
//!
//! The scheduler alternates planning and execution: refresh statistics from
//! every node, plan one increment, create its intermediate sets, dispatch its
//! stages one at a time to all nodes, then drop sets nothing reads anymore.
//! `LocalCluster` is an in-process cluster for tests and the CLI `simulate`
//! command.

pub mod cluster;
pub mod memory_cluster;
pub mod metrics;
pub mod scheduler;

pub use cluster::{ClusterClient, ExecError, SetReport};
pub use memory_cluster::LocalCluster;
pub use scheduler::{CancelHandle, JobScheduler};

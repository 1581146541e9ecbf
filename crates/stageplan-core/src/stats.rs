//! Per-set size statistics and the byte-based cost function.
//!
//! The executor refreshes these between planning increments; the planner only
//! reads them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::set::{set_key, SetIdentifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStats {
    pub num_pages: u64,
    pub page_size: u64,
    pub num_bytes: u64,
    pub num_tuples: u64,
    pub avg_tuple_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    sets: HashMap<String, SetStats>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bytes(&mut self, database: &str, set_name: &str, num_bytes: u64) {
        self.entry(database, set_name).num_bytes = num_bytes;
    }

    pub fn bytes(&self, database: &str, set_name: &str) -> Option<u64> {
        self.sets
            .get(&set_key(database, set_name))
            .map(|s| s.num_bytes)
    }

    pub fn remove_set(&mut self, database: &str, set_name: &str) {
        self.sets.remove(&set_key(database, set_name));
    }

    pub fn set_pages(&mut self, database: &str, set_name: &str, num_pages: u64) {
        self.entry(database, set_name).num_pages = num_pages;
    }

    pub fn set_page_size(&mut self, database: &str, set_name: &str, page_size: u64) {
        self.entry(database, set_name).page_size = page_size;
    }

    pub fn set_tuples(&mut self, database: &str, set_name: &str, num_tuples: u64) {
        self.entry(database, set_name).num_tuples = num_tuples;
    }

    pub fn set_avg_tuple_size(&mut self, database: &str, set_name: &str, avg: u64) {
        self.entry(database, set_name).avg_tuple_size = avg;
    }

    pub fn get(&self, database: &str, set_name: &str) -> Option<&SetStats> {
        self.sets.get(&set_key(database, set_name))
    }

    /// Fold one node's report for a set into the cluster-wide totals.
    ///
    /// Pages and bytes are summed across nodes; page size is taken as-is.
    pub fn record_pages(&mut self, database: &str, set_name: &str, num_pages: u64, page_size: u64) {
        let entry = self.entry(database, set_name);
        entry.num_pages += num_pages;
        entry.page_size = page_size;
        entry.num_bytes += num_pages * page_size;
    }

    /// `floor(bytes / 1_000_000)`, or 0 when the set is unknown.
    pub fn cost(&self, database: &str, set_name: &str) -> f64 {
        match self.bytes(database, set_name) {
            Some(bytes) => (bytes / 1_000_000) as f64,
            None => 0.0,
        }
    }

    pub fn cost_of(&self, set: &SetIdentifier) -> f64 {
        self.cost(&set.database, &set.set_name)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    fn entry(&mut self, database: &str, set_name: &str) -> &mut SetStats {
        self.sets.entry(set_key(database, set_name)).or_default()
    }
}

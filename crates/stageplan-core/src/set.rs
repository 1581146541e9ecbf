//! Named sets exchanged between stages.
//!
//! A set is addressed by `(database, set_name)`; its string key is
//! `database:set_name`, which is also how the planner names sources and
//! hash-table artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SetType {
    /// A durable set owned by the user or the logical plan.
    #[default]
    UserSet,
    /// A transient set created for one job and removed once unread.
    Intermediate,
    /// An in-memory partitioned hash table kept across a stage boundary.
    PartitionedHashSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetIdentifier {
    pub database: String,
    pub set_name: String,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub set_type: SetType,
    /// Output of an uncombined aggregation: readable once, then dropped.
    #[serde(default)]
    pub is_aggregation_result: bool,
}

impl SetIdentifier {
    pub fn new(database: impl Into<String>, set_name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            set_name: set_name.into(),
            page_size: None,
            set_type: SetType::UserSet,
            is_aggregation_result: false,
        }
    }

    /// A transient set with an explicit page size.
    pub fn intermediate(
        database: impl Into<String>,
        set_name: impl Into<String>,
        page_size: u64,
    ) -> Self {
        Self {
            page_size: Some(page_size),
            set_type: SetType::Intermediate,
            ..Self::new(database, set_name)
        }
    }

    /// The partitioned hash table an aggregation leaves for its consumer.
    pub fn aggregation_result(database: impl Into<String>, set_name: impl Into<String>) -> Self {
        Self {
            set_type: SetType::PartitionedHashSet,
            is_aggregation_result: true,
            ..Self::new(database, set_name)
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// `database:set_name`
    pub fn key(&self) -> String {
        set_key(&self.database, &self.set_name)
    }

    pub fn is_intermediate(&self) -> bool {
        self.set_type == SetType::Intermediate
    }
}

impl fmt::Display for SetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.set_name)
    }
}

pub fn set_key(database: &str, set_name: &str) -> String {
    format!("{}:{}", database, set_name)
}

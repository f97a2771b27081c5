//! Query cost estimation
//!
//! Costs follow the data moved by a query: every scanned record is read at
//! its projected width and every matching record is shipped at its output
//! width. Time, carbon and price are linear in those bytes (see
//! [`CostModel`]).
//!
//! - [`compute_filter_query_cost`] / [`compute_join_query_cost`]: the closed
//!   formulas over plain numbers
//! - [`estimate_filter`], [`estimate_join`], [`estimate_aggregate`]: the same
//!   formulas driven by collection schemas, settings and sharding

mod aggregate;
mod filter;
mod join;

pub use aggregate::{estimate_aggregate, AggregateQuery, AggregateReport, GroupStageReport};
pub use filter::{estimate_filter, FilterQuery, FilterReport};
pub use join::{estimate_join, JoinQuery, JoinReport, JoinSide};

use crate::{CostError, CostModel, KeyRole, QueryCost, Result, Schema, Selectivity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numbers a filter cost depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCostInputs {
    /// Records in the collection
    pub collection_size: u64,
    /// Records read by the query
    pub scanned_records: u64,
    /// Fraction of the collection matching the predicate
    pub selectivity: Selectivity,
    /// Projected width of a scanned record
    pub scanned_record_bytes: u64,
    /// Projected width of a returned record
    pub output_record_bytes: u64,
}

impl QueryCostInputs {
    /// Read and return every record of the collection
    pub fn full_scan(collection_size: u64, record_bytes: u64) -> Self {
        Self {
            collection_size,
            scanned_records: collection_size,
            selectivity: Selectivity::ALL,
            scanned_record_bytes: record_bytes,
            output_record_bytes: record_bytes,
        }
    }

    pub fn with_selectivity(mut self, selectivity: Selectivity) -> Self {
        self.selectivity = selectivity;
        self
    }

    /// Records returned by the query
    pub fn matched_records(&self) -> u64 {
        self.selectivity.apply(self.collection_size)
    }

    pub fn scanned_bytes(&self) -> u64 {
        self.scanned_records.saturating_mul(self.scanned_record_bytes)
    }

    pub fn output_bytes(&self) -> u64 {
        self.matched_records().saturating_mul(self.output_record_bytes)
    }

    /// Bytes read plus bytes returned
    pub fn transferred_bytes(&self) -> u64 {
        self.scanned_bytes().saturating_add(self.output_bytes())
    }
}

/// Time, carbon and price of a filter query
pub fn compute_filter_query_cost(inputs: &QueryCostInputs, model: &CostModel) -> QueryCost {
    model.cost_of_bytes(inputs.transferred_bytes())
}

/// How two collections are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinStrategy {
    /// One inner lookup per matching outer record
    #[default]
    NestedLoop,
    /// Both sides read once, inner side hashed on the join key
    Hash,
}

impl JoinStrategy {
    pub const ALL: [JoinStrategy; 2] = [JoinStrategy::NestedLoop, JoinStrategy::Hash];

    /// Parse from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "nested-loop" | "nested" | "loop" => Some(JoinStrategy::NestedLoop),
            "hash" | "hash-join" => Some(JoinStrategy::Hash),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JoinStrategy::NestedLoop => "nested-loop",
            JoinStrategy::Hash => "hash",
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Time, carbon and price of joining `outer` with `inner`.
///
/// Nested loop pays the inner query once per matching outer record,
/// so it grows with the product of the sizes. Hash join reads each side
/// once and grows with their sum.
pub fn compute_join_query_cost(
    outer: &QueryCostInputs,
    inner: &QueryCostInputs,
    strategy: JoinStrategy,
    model: &CostModel,
) -> QueryCost {
    let outer_cost = compute_filter_query_cost(outer, model);
    let inner_cost = compute_filter_query_cost(inner, model);
    match strategy {
        JoinStrategy::NestedLoop => outer_cost + inner_cost.repeated(outer.matched_records()),
        JoinStrategy::Hash => outer_cost + inner_cost,
    }
}

/// Check that every key is a property of `schema`
pub(crate) fn check_keys<'a, I>(schema: &Schema, role: KeyRole, keys: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let properties = schema.properties();
    for key in keys {
        if !properties.iter().any(|(name, _)| name == key) {
            return Err(CostError::UnknownKey {
                role,
                key: key.clone(),
                collection: schema.name.clone(),
                available: schema.property_list(),
            });
        }
    }
    Ok(())
}

/// Validate an optional sharding key; an empty key means sharding without a key
pub(crate) fn check_sharding_key<'a>(schema: &Schema, key: Option<&'a str>) -> Result<Option<&'a str>> {
    match key {
        None => Ok(None),
        Some(k) if k.trim().is_empty() => Err(CostError::MissingShardingKey(schema.name.clone())),
        Some(k) => {
            check_keys(schema, KeyRole::Sharding, [&k.to_string()])?;
            Ok(Some(k))
        }
    }
}

/// `base` followed by `extra` items not already present
pub(crate) fn with_keys(base: &[String], extra: &[&String]) -> Vec<String> {
    let mut keys = base.to_vec();
    for key in extra {
        if !keys.contains(key) {
            keys.push((*key).clone());
        }
    }
    keys
}

//! Two-collection joins

use super::filter::plan_filter;
use super::{check_keys, compute_join_query_cost, with_keys, FilterQuery, FilterReport, JoinStrategy};
use crate::schema::Database;
use crate::{KeyRole, QueryCost, Result, Settings};
use serde::{Deserialize, Serialize};

/// One collection taking part in a join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSide {
    pub collection: String,
    #[serde(default)]
    pub output_keys: Vec<String>,
    #[serde(default)]
    pub filter_keys: Vec<String>,
    pub join_key: String,
    #[serde(default)]
    pub sharding_key: Option<String>,
}

impl JoinSide {
    pub fn new(collection: impl Into<String>, join_key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            output_keys: Vec::new(),
            filter_keys: Vec::new(),
            join_key: join_key.into(),
            sharding_key: None,
        }
    }

    pub fn output(mut self, keys: &[&str]) -> Self {
        self.output_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn filter(mut self, keys: &[&str]) -> Self {
        self.filter_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn sharded_on(mut self, key: &str) -> Self {
        self.sharding_key = Some(key.to_string());
        self
    }

    /// Filter query on this side with extra output and filter keys
    pub(crate) fn as_filter(&self, extra_output: &[&String], extra_filter: &[&String]) -> FilterQuery {
        FilterQuery {
            collection: self.collection.clone(),
            output_keys: with_keys(&self.output_keys, extra_output),
            filter_keys: with_keys(&self.filter_keys, extra_filter),
            sharding_key: self.sharding_key.clone(),
        }
    }
}

/// `SELECT ... FROM outer JOIN inner ON outer.join_key = inner.join_key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinQuery {
    /// Side read first
    pub outer: JoinSide,
    /// Side looked up (nested loop) or hashed (hash join)
    pub inner: JoinSide,
    #[serde(default)]
    pub strategy: JoinStrategy,
}

/// Estimated execution of a join
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinReport {
    pub strategy: JoinStrategy,
    pub outer: FilterReport,
    pub inner: FilterReport,
    /// Times the inner query runs
    pub inner_executions: u64,
    pub cost: QueryCost,
}

/// Estimate a join between two collections of `database`.
///
/// The outer side projects its join key. Under nested loop the inner side
/// is queried once per outer match with the join key as an extra filter;
/// under hash join it is read once with the join key projected.
pub fn estimate_join(database: &Database, query: &JoinQuery, settings: &Settings) -> Result<JoinReport> {
    let outer_schema = database.collection(&query.outer.collection)?;
    let inner_schema = database.collection(&query.inner.collection)?;
    check_keys(outer_schema, KeyRole::Join, [&query.outer.join_key])?;
    check_keys(inner_schema, KeyRole::Join, [&query.inner.join_key])?;

    let outer_query = query.outer.as_filter(&[&query.outer.join_key], &[]);
    let inner_query = match query.strategy {
        JoinStrategy::NestedLoop => query.inner.as_filter(&[], &[&query.inner.join_key]),
        JoinStrategy::Hash => query.inner.as_filter(&[&query.inner.join_key], &[]),
    };

    let (outer, outer_inputs) = plan_filter(outer_schema, &outer_query, settings)?;
    let (inner, inner_inputs) = plan_filter(inner_schema, &inner_query, settings)?;

    let inner_executions = match query.strategy {
        JoinStrategy::NestedLoop => outer_inputs.matched_records(),
        JoinStrategy::Hash => 1,
    };
    let cost = compute_join_query_cost(&outer_inputs, &inner_inputs, query.strategy, &settings.cost);

    Ok(JoinReport {
        strategy: query.strategy,
        outer,
        inner,
        inner_executions,
        cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CostError, Field, ScalarType, Schema};

    fn db1() -> Database {
        let product = Schema::new(
            "Product",
            vec![
                Field::scalar("IDP", ScalarType::Integer),
                Field::scalar("name", ScalarType::String),
                Field::scalar("price", ScalarType::Number),
                Field::scalar("brand", ScalarType::String),
            ],
        );
        let stock = Schema::new(
            "Stock",
            vec![
                Field::scalar("IDP", ScalarType::Integer),
                Field::scalar("IDW", ScalarType::Integer),
                Field::scalar("quantity", ScalarType::Integer),
            ],
        );
        Database::new("db1", vec![product, stock])
    }

    fn product_stock(strategy: JoinStrategy) -> JoinQuery {
        JoinQuery {
            outer: JoinSide::new("Product", "IDP")
                .output(&["name", "price"])
                .filter(&["brand"])
                .sharded_on("brand"),
            inner: JoinSide::new("Stock", "IDP")
                .output(&["IDW", "quantity"])
                .sharded_on("IDP"),
            strategy,
        }
    }

    #[test]
    fn test_nested_loop_join() {
        let settings = Settings::default();
        let report = estimate_join(&db1(), &product_stock(JoinStrategy::NestedLoop), &settings).unwrap();

        // Product filtered on brand, sharded on brand: one server, 100 docs
        assert_eq!(report.outer.servers_checked, 1);
        assert_eq!(report.outer.scanned_docs, 100);
        assert_eq!(report.outer.output_docs, 20);
        // name + price + IDP
        assert_eq!(report.outer.output_doc_bytes, 92 + 20 + 20);

        // Stock looked up by IDP, its sharding key: one server per lookup
        assert_eq!(report.inner.servers_checked, 1);
        assert_eq!(report.inner.output_docs, 200);
        assert_eq!(report.inner_executions, 20);

        let expected = report.outer.cost + report.inner.cost.repeated(20);
        assert!((report.cost.time_seconds - expected.time_seconds).abs() < 1e-9);
    }

    #[test]
    fn test_hash_join_reads_inner_once() {
        let settings = Settings::default();
        let report = estimate_join(&db1(), &product_stock(JoinStrategy::Hash), &settings).unwrap();

        assert_eq!(report.inner_executions, 1);
        assert_eq!(report.inner.servers_checked, 1000);
        assert_eq!(report.inner.scanned_docs, 20_000_000);
        let expected = report.outer.cost + report.inner.cost;
        assert!((report.cost.price_usd - expected.price_usd).abs() < 1e-15);
    }

    #[test]
    fn test_unknown_join_key() {
        let settings = Settings::default();
        let mut query = product_stock(JoinStrategy::NestedLoop);
        query.inner.join_key = "IDC".into();
        let err = estimate_join(&db1(), &query, &settings).unwrap_err();
        assert!(matches!(err, CostError::UnknownKey { role: KeyRole::Join, .. }));
    }
}

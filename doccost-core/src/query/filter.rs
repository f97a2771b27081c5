//! Filter queries on a single collection

use super::{check_keys, check_sharding_key, compute_filter_query_cost, QueryCostInputs};
use crate::schema::Database;
use crate::sharding::sharding_stats;
use crate::size::projected_document_size;
use crate::{KeyRole, QueryCost, Result, Schema, Selectivity, Settings};
use serde::{Deserialize, Serialize};

/// `SELECT <output_keys> FROM <collection> WHERE <filter_keys> = ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterQuery {
    pub collection: String,
    pub output_keys: Vec<String>,
    /// Keys compared for equality
    #[serde(default)]
    pub filter_keys: Vec<String>,
    /// Key the collection is sharded on; `None` when not sharded
    #[serde(default)]
    pub sharding_key: Option<String>,
}

impl FilterQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            output_keys: Vec::new(),
            filter_keys: Vec::new(),
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
}

/// Estimated execution of a filter query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterReport {
    pub collection: String,
    pub servers_checked: u64,
    pub scanned_docs: u64,
    pub output_docs: u64,
    pub scanned_doc_bytes: u64,
    pub scanned_data_bytes: u64,
    pub output_doc_bytes: u64,
    pub output_data_bytes: u64,
    pub cost: QueryCost,
}

/// Estimate a filter query against a collection of `database`
pub fn estimate_filter(database: &Database, query: &FilterQuery, settings: &Settings) -> Result<FilterReport> {
    let schema = database.collection(&query.collection)?;
    plan_filter(schema, query, settings).map(|(report, _)| report)
}

/// Validate `query` and derive both the report and the raw cost inputs
pub(crate) fn plan_filter(
    schema: &Schema,
    query: &FilterQuery,
    settings: &Settings,
) -> Result<(FilterReport, QueryCostInputs)> {
    check_keys(schema, KeyRole::Output, &query.output_keys)?;
    check_keys(schema, KeyRole::Filter, &query.filter_keys)?;
    let sharding_key = check_sharding_key(schema, query.sharding_key.as_deref())?;

    let scan = plan_scan(schema, sharding_key, &query.filter_keys, settings)?;

    let scanned_keys = query.filter_keys.iter().chain(&query.output_keys).map(String::as_str);
    let inputs = QueryCostInputs {
        collection_size: scan.documents,
        scanned_records: scan.scanned_docs,
        selectivity: filter_selectivity(&query.filter_keys, scan.documents, settings),
        scanned_record_bytes: projected_document_size(schema, scanned_keys, settings),
        output_record_bytes: projected_document_size(
            schema,
            query.output_keys.iter().map(String::as_str),
            settings,
        ),
    };

    let report = FilterReport {
        collection: schema.name.clone(),
        servers_checked: scan.servers_checked,
        scanned_docs: inputs.scanned_records,
        output_docs: inputs.matched_records(),
        scanned_doc_bytes: inputs.scanned_record_bytes,
        scanned_data_bytes: inputs.scanned_bytes(),
        output_doc_bytes: inputs.output_record_bytes,
        output_data_bytes: inputs.output_bytes(),
        cost: compute_filter_query_cost(&inputs, &settings.cost),
    };

    Ok((report, inputs))
}

/// Servers a scan must contact and the documents it reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanPlan {
    pub documents: u64,
    pub servers_checked: u64,
    pub scanned_docs: u64,
}

/// A sharded collection filtered on its sharding key is read on one server;
/// otherwise every server holding data is read. Unsharded collections are
/// read on every server.
pub(crate) fn plan_scan(
    schema: &Schema,
    sharding_key: Option<&str>,
    filter_keys: &[String],
    settings: &Settings,
) -> Result<ScanPlan> {
    let documents = settings.documents(&schema.name)?;

    let Some(key) = sharding_key else {
        return Ok(ScanPlan {
            documents,
            servers_checked: settings.servers,
            scanned_docs: documents,
        });
    };

    let distinct = settings.distinct_values(key).unwrap_or(documents);
    let stats = sharding_stats(documents, distinct, settings.servers);
    let servers_checked = if filter_keys.iter().any(|k| k == key) {
        1
    } else {
        stats.servers_used
    };
    let scanned_docs =
        (documents as u128 * servers_checked as u128 / stats.servers_used as u128) as u64;

    Ok(ScanPlan {
        documents,
        servers_checked,
        scanned_docs,
    })
}

/// Equality on each filter key keeps one value in `distinct_<key>s`
/// (every document distinct when unknown); never below one document.
pub(crate) fn filter_selectivity(filter_keys: &[String], documents: u64, settings: &Settings) -> Selectivity {
    let combinations = filter_keys.iter().fold(1u64, |acc, key| {
        acc.saturating_mul(settings.distinct_values(key).unwrap_or(documents))
    });
    Selectivity::one_in(combinations.min(documents))
}

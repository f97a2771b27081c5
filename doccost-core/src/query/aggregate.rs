//! GROUP BY queries, optionally joined to a second collection
//!
//! ```sql
//! SELECT P.name, P.price, OL.NB
//! FROM Product P JOIN (
//!     SELECT O.IDP, SUM(O.quantity) AS NB
//!     FROM OrderLine O
//!     GROUP BY O.IDP
//! ) OL ON P.IDP = OL.IDP
//! ORDER BY OL.NB DESC
//! LIMIT 100;
//! ```

use super::filter::{filter_selectivity, plan_filter, plan_scan};
use super::{check_keys, check_sharding_key, FilterReport, JoinSide};
use crate::schema::Database;
use crate::size::projected_document_size;
use crate::{CostError, KeyRole, QueryCost, Result, Settings};
use serde::{Deserialize, Serialize};

/// Grouped subquery plus an optional lookup of each group in another collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    /// Collection being grouped
    pub collection: String,
    pub group_by: String,
    /// Keys fed to aggregate functions, one number per key in each group
    #[serde(default)]
    pub aggregate_keys: Vec<String>,
    #[serde(default)]
    pub filter_keys: Vec<String>,
    #[serde(default)]
    pub sharding_key: Option<String>,
    /// Collection joined on the group key, looked up once per group
    #[serde(default)]
    pub join: Option<JoinSide>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Grouping stage of an aggregate query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStageReport {
    pub collection: String,
    pub servers_checked: u64,
    pub scanned_docs: u64,
    pub groups: u64,
    pub output_groups: u64,
    /// Partial aggregates sent between servers
    pub shuffles: u64,
    pub scanned_doc_bytes: u64,
    pub scanned_data_bytes: u64,
    pub group_doc_bytes: u64,
    pub output_data_bytes: u64,
    pub shuffle_data_bytes: u64,
    pub cost: QueryCost,
}

/// Estimated execution of an aggregate query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub grouped: GroupStageReport,
    pub lookup: Option<FilterReport>,
    /// Lookups performed in the joined collection
    pub loops: u64,
    /// Documents returned after LIMIT
    pub output_docs: u64,
    pub cost: QueryCost,
}

/// Estimate an aggregate query against `database`.
///
/// Groups are `distinct_<group_by>s`, capped by `avg_<entity>s_by_<key>`
/// for each filter key and by the documents left after filtering. When the
/// collection is sharded on something other than the group key or a filter
/// key, every server checked sends each other group its partial aggregate.
/// A joined collection is queried once per group, at most `limit` times.
///
/// Shuffled bytes are reported on their own and do not enter the cost.
pub fn estimate_aggregate(database: &Database, query: &AggregateQuery, settings: &Settings) -> Result<AggregateReport> {
    let schema = database.collection(&query.collection)?;
    check_keys(schema, KeyRole::GroupBy, [&query.group_by])?;
    check_keys(schema, KeyRole::Aggregate, &query.aggregate_keys)?;
    check_keys(schema, KeyRole::Filter, &query.filter_keys)?;
    let sharding_key = check_sharding_key(schema, query.sharding_key.as_deref())?;

    let scan = plan_scan(schema, sharding_key, &query.filter_keys, settings)?;

    let filtered_docs = filter_selectivity(&query.filter_keys, scan.documents, settings)
        .apply(scan.documents)
        .max(u64::from(scan.documents > 0));
    let groups = settings
        .distinct_values(&query.group_by)
        .unwrap_or(scan.documents);
    let grouped_entity = match &query.join {
        Some(join) => join.collection.as_str(),
        None => settings.entity_of(&query.group_by),
    };
    let output_groups = query
        .filter_keys
        .iter()
        .filter_map(|key| settings.average_per(grouped_entity, key))
        .fold(groups, u64::min)
        .min(filtered_docs);

    let co_located = match sharding_key {
        None => true,
        Some(key) => key == query.group_by || query.filter_keys.iter().any(|k| k == key),
    };
    let shuffles = if co_located {
        0
    } else {
        scan.servers_checked.saturating_mul(output_groups.saturating_sub(1))
    };

    // group key, doubling as the join key, plus the aggregated values
    let group_keys: Vec<&str> = std::iter::once(query.group_by.as_str())
        .chain(query.aggregate_keys.iter().map(String::as_str))
        .collect();
    let group_doc_bytes = projected_document_size(schema, group_keys.iter().copied(), settings);
    let scanned_doc_bytes = projected_document_size(
        schema,
        query
            .filter_keys
            .iter()
            .map(String::as_str)
            .chain(group_keys.iter().copied()),
        settings,
    );

    let scanned_data_bytes = scan.scanned_docs.saturating_mul(scanned_doc_bytes);
    let output_data_bytes = output_groups.saturating_mul(group_doc_bytes);
    let shuffle_data_bytes = group_doc_bytes
        .saturating_mul(output_groups)
        .saturating_mul(shuffles);
    let grouped_bytes = scanned_data_bytes
        .checked_add(output_data_bytes)
        .ok_or(CostError::Overflow("aggregate data size"))?;

    let grouped = GroupStageReport {
        collection: schema.name.clone(),
        servers_checked: scan.servers_checked,
        scanned_docs: scan.scanned_docs,
        groups,
        output_groups,
        shuffles,
        scanned_doc_bytes,
        scanned_data_bytes,
        group_doc_bytes,
        output_data_bytes,
        shuffle_data_bytes,
        cost: settings.cost.cost_of_bytes(grouped_bytes),
    };

    let limited = query.limit.map_or(output_groups, |limit| limit.min(output_groups));

    let Some(join) = &query.join else {
        let cost = grouped.cost;
        return Ok(AggregateReport {
            grouped,
            lookup: None,
            loops: 0,
            output_docs: limited,
            cost,
        });
    };

    let joined_schema = database.collection(&join.collection)?;
    check_keys(joined_schema, KeyRole::Join, [&join.join_key])?;
    let (lookup, _) = plan_filter(joined_schema, &join.as_filter(&[], &[&join.join_key]), settings)?;

    let loops = limited;
    let cost = grouped.cost + lookup.cost.repeated(loops);

    Ok(AggregateReport {
        grouped,
        lookup: Some(lookup),
        loops,
        output_docs: limited,
        cost,
    })
}

//! Estimator - top-level entry point over settings and the schema catalog

use crate::query::{
    estimate_aggregate, estimate_filter, estimate_join, AggregateQuery, AggregateReport, FilterQuery,
    FilterReport, JoinQuery, JoinReport,
};
use crate::schema::Catalog;
use crate::sharding::{
    compute_shard_distribution, sharding_stats, ShardDistribution, ShardingConfig, ShardingStats,
    ShardingStrategy,
};
use crate::size::{collection_size, database_report, CollectionSize, DatabaseSizeReport};
use crate::{CostError, Result, ScalarType, Settings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Flattened property of a collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ScalarType,
}

/// Collection summary for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub documents: Option<u64>,
    pub properties: Vec<PropertyInfo>,
}

/// Sharding parameters as entered by a user; gaps are filled from settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ShardingParams {
    /// Servers; the configured cluster size when absent
    pub servers: Option<u64>,
    pub strategy: Option<ShardingStrategy>,
    /// Records; the collection's document count when absent
    pub records: Option<u64>,
    /// Key cardinality; `distinct_<key>s` or one value per record when absent
    pub distinct_values: Option<u64>,
    pub collection: Option<String>,
    pub key: Option<String>,
}

/// Runs every calculator against one set of settings and schemas
pub struct Estimator {
    settings: Settings,
    catalog: Catalog,
}

impl Estimator {
    pub fn new(settings: Settings, catalog: Catalog) -> Self {
        Self { settings, catalog }
    }

    /// Open the schemas directory with the given settings
    pub fn open(schemas_dir: impl AsRef<Path>, settings: Settings) -> Result<Self> {
        settings.validate()?;
        let catalog = Catalog::open(schemas_dir.as_ref())?;
        info!(
            "Estimator ready: {} databases, {} servers",
            catalog.list_databases().len(),
            settings.servers
        );
        Ok(Self::new(settings, catalog))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Re-read schemas from disk
    pub fn reload(&self) -> Result<usize> {
        let count = self.catalog.reload()?;
        info!("Reloaded catalog: {} databases", count);
        Ok(count)
    }

    pub fn list_databases(&self) -> Vec<String> {
        self.catalog.list_databases()
    }

    /// Collections of a database with their properties and document counts
    pub fn collections(&self, database: &str) -> Result<Vec<CollectionInfo>> {
        let db = self.catalog.get_database(database)?;
        Ok(db
            .schemas()
            .map(|schema| CollectionInfo {
                name: schema.name.clone(),
                documents: self.settings.documents.get(&schema.name).copied(),
                properties: schema
                    .properties()
                    .into_iter()
                    .map(|(name, value_type)| PropertyInfo { name, value_type })
                    .collect(),
            })
            .collect())
    }

    /// Size of every collection in `database`
    pub fn database_size(&self, database: &str) -> Result<DatabaseSizeReport> {
        let db = self.catalog.get_database(database)?;
        database_report(&db, &self.settings)
    }

    /// Size of one collection; `records` overrides the configured document count
    pub fn collection_size(&self, database: &str, collection: &str, records: Option<u64>) -> Result<CollectionSize> {
        let db = self.catalog.get_database(database)?;
        let schema = db.collection(collection)?;
        let documents = match records {
            Some(n) => n,
            None => self.settings.documents(collection)?,
        };
        collection_size(schema, documents, &self.settings)
    }

    /// Place records on servers
    pub fn shard_distribution(&self, config: &ShardingConfig) -> Result<ShardDistribution> {
        debug!(
            "Shard distribution: {} records, {} servers, {}",
            config.record_count, config.servers, config.strategy
        );
        compute_shard_distribution(config)
    }

    /// Complete user parameters into a sharding configuration
    pub fn sharding_config(&self, params: &ShardingParams) -> Result<ShardingConfig> {
        let collection = params.collection.as_deref().filter(|c| !c.trim().is_empty());
        let records = match (params.records, collection) {
            (Some(n), _) => n,
            (None, Some(c)) => self.settings.documents(c)?,
            (None, None) => {
                return Err(CostError::invalid_input(
                    "records",
                    "required when no collection is given",
                ))
            }
        };
        let distinct = params.distinct_values.unwrap_or_else(|| {
            params
                .key
                .as_deref()
                .and_then(|k| self.settings.distinct_values(k))
                .unwrap_or(records)
        });

        Ok(ShardingConfig {
            servers: params.servers.unwrap_or(self.settings.servers),
            strategy: params.strategy.unwrap_or(ShardingStrategy::Modulo),
            record_count: records,
            distinct_values: Some(distinct),
        })
    }

    /// Sharding configuration of a configured collection on `key`
    pub fn collection_sharding_config(
        &self,
        collection: &str,
        key: &str,
        strategy: ShardingStrategy,
    ) -> Result<ShardingConfig> {
        let documents = self.settings.documents(collection)?;
        let distinct = self.settings.distinct_values(key).unwrap_or(documents);
        Ok(ShardingConfig::new(self.settings.servers, strategy, documents).with_distinct_values(distinct))
    }

    /// Per-server averages of a configured collection sharded on `key`
    pub fn collection_sharding_stats(&self, collection: &str, key: &str) -> Result<ShardingStats> {
        if key.trim().is_empty() {
            return Err(CostError::MissingShardingKey(collection.to_string()));
        }
        let documents = self.settings.documents(collection)?;
        let distinct = self.settings.distinct_values(key).unwrap_or(documents);
        Ok(sharding_stats(documents, distinct, self.settings.servers))
    }

    pub fn filter(&self, database: &str, query: &FilterQuery) -> Result<FilterReport> {
        let db = self.catalog.get_database(database)?;
        estimate_filter(&db, query, &self.settings)
    }

    pub fn join(&self, database: &str, query: &JoinQuery) -> Result<JoinReport> {
        let db = self.catalog.get_database(database)?;
        estimate_join(&db, query, &self.settings)
    }

    pub fn aggregate(&self, database: &str, query: &AggregateQuery) -> Result<AggregateReport> {
        let db = self.catalog.get_database(database)?;
        estimate_aggregate(&db, query, &self.settings)
    }
}

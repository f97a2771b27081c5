//! Estimation settings: document counts, sizes, statistics and cost coefficients

use crate::{config, CostError, QueryCost, Result, ScalarType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Byte size of each scalar value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueSizes {
    pub number: u64,
    pub integer: u64,
    pub string: u64,
    pub date: u64,
    pub longstring: u64,
}

impl ValueSizes {
    pub fn get(&self, ty: ScalarType) -> u64 {
        match ty {
            ScalarType::Number => self.number,
            ScalarType::Integer => self.integer,
            ScalarType::String => self.string,
            ScalarType::Date => self.date,
            ScalarType::LongString => self.longstring,
        }
    }
}

impl Default for ValueSizes {
    fn default() -> Self {
        Self {
            number: 8,
            integer: 8,
            string: 80,
            date: 20,
            longstring: 200,
        }
    }
}

/// Per-byte coefficients turning transferred data into costs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Network bandwidth in bytes per second
    pub bandwidth_bytes_per_sec: f64,
    /// Grams of CO2 per byte transferred
    pub carbon_gco2_per_byte: f64,
    /// Dollars per byte transferred
    pub price_usd_per_byte: f64,
}

impl CostModel {
    /// Cost of transferring `bytes` bytes
    pub fn cost_of_bytes(&self, bytes: u64) -> QueryCost {
        let b = bytes as f64;
        QueryCost {
            time_seconds: b / self.bandwidth_bytes_per_sec,
            carbon_gco2: b * self.carbon_gco2_per_byte,
            price_usd: b * self.price_usd_per_byte,
        }
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            bandwidth_bytes_per_sec: config::BANDWIDTH_BYTES_PER_SEC,
            carbon_gco2_per_byte: config::CARBON_GCO2_PER_BYTE,
            price_usd_per_byte: config::PRICE_USD_PER_BYTE,
        }
    }
}

/// All numbers the formulas read besides the query itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of documents per collection
    pub documents: BTreeMap<String, u64>,
    /// Number of servers in the cluster
    pub servers: u64,
    /// Size of a key in a document
    pub key_size: u64,
    /// Size of each value type
    pub value_sizes: ValueSizes,
    /// `avg_*` array lengths and `distinct_*` cardinalities
    pub statistics: BTreeMap<String, u64>,
    /// Collection identified by each primary key, e.g. `IDP` -> `Product`
    pub primary_keys: BTreeMap<String, String>,
    /// Cost coefficients
    pub cost: CostModel,
}

impl Default for Settings {
    fn default() -> Self {
        let documents = [
            ("Product", 100_000),
            ("Stock", 20_000_000),
            ("Warehouse", 200),
            ("OrderLine", 4_000_000_000),
            ("Client", 10_000_000),
        ];
        let statistics = [
            ("avg_categories", 2),
            ("avg_orderlines", 40_000),
            ("avg_stocks", 200),
            ("distinct_IDPs", 100_000),
            ("distinct_IDWs", 200),
            ("distinct_IDCs", 10_000_000),
            ("distinct_brands", 5_000),
            ("distinct_dates", 365),
        ];
        let primary_keys = [("IDP", "Product"), ("IDC", "Client"), ("IDW", "Warehouse")];

        Self {
            documents: documents
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            servers: config::DEFAULT_SERVERS,
            key_size: config::KEY_SIZE,
            value_sizes: ValueSizes::default(),
            statistics: statistics
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            primary_keys: primary_keys
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            cost: CostModel::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the formulas cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.servers == 0 || self.servers > config::MAX_SERVERS {
            return Err(CostError::invalid_input(
                "servers",
                format!("must be between 1 and {}", config::MAX_SERVERS),
            ));
        }
        if !(self.cost.bandwidth_bytes_per_sec > 0.0) {
            return Err(CostError::invalid_input(
                "cost.bandwidth_bytes_per_sec",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Number of documents stored in `collection`
    pub fn documents(&self, collection: &str) -> Result<u64> {
        self.documents
            .get(collection)
            .copied()
            .ok_or_else(|| CostError::MissingStatistic(format!("document count of '{}'", collection)))
    }

    /// Number of distinct values of `key`, from `distinct_<key>s`
    pub fn distinct_values(&self, key: &str) -> Option<u64> {
        let mut stat = format!("distinct_{}", key);
        if !stat.ends_with('s') {
            stat.push('s');
        }
        self.statistics.get(&stat).copied()
    }

    /// Average number of items of the array field `field`, from `avg_<field>`
    pub fn average_length(&self, field: &str) -> u64 {
        self.statistics
            .get(&format!("avg_{}", field.to_lowercase()))
            .copied()
            .unwrap_or(1)
    }

    /// Size of a value of type `ty`
    pub fn value_size(&self, ty: ScalarType) -> u64 {
        self.value_sizes.get(ty)
    }

    /// Entity a key refers to: its collection for a primary key, else the key itself
    pub fn entity_of<'a>(&'a self, key: &'a str) -> &'a str {
        self.primary_keys.get(key).map_or(key, String::as_str)
    }

    /// Average number of `entity` per value of `key`, from `avg_<entity>s_by_<key entity>`
    pub fn average_per(&self, entity: &str, key: &str) -> Option<u64> {
        let stat = format!(
            "avg_{}s_by_{}",
            entity.to_lowercase(),
            self.entity_of(key).to_lowercase()
        );
        self.statistics.get(&stat).copied()
    }
}

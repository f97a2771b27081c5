//! Shard distribution of documents across servers
//!
//! Records carry a sharding key with `d` distinct values. Records are spread
//! over key values as evenly as possible (the first `r mod d` values hold one
//! extra record) and key values are placed on servers by a strategy:
//!
//! - **round-robin**: record `i` goes to server `i mod n`, key ignored
//! - **modulo**: key value `v` goes to server `v mod n`
//! - **hash**: key value `v` goes to server `crc32(v) mod n`
//! - **range**: contiguous blocks of `ceil(d / n)` key values per server

use crate::{config, CostError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How key values are placed on servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardingStrategy {
    RoundRobin,
    Modulo,
    Hash,
    Range,
}

impl ShardingStrategy {
    pub const ALL: [ShardingStrategy; 4] = [
        ShardingStrategy::RoundRobin,
        ShardingStrategy::Modulo,
        ShardingStrategy::Hash,
        ShardingStrategy::Range,
    ];

    /// Parse from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" | "rr" => Some(ShardingStrategy::RoundRobin),
            "modulo" | "mod" => Some(ShardingStrategy::Modulo),
            "hash" => Some(ShardingStrategy::Hash),
            "range" => Some(ShardingStrategy::Range),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ShardingStrategy::RoundRobin => "round-robin",
            ShardingStrategy::Modulo => "modulo",
            ShardingStrategy::Hash => "hash",
            ShardingStrategy::Range => "range",
        }
    }
}

impl fmt::Display for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of a shard distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Number of servers, at least 1
    pub servers: u64,
    pub strategy: ShardingStrategy,
    /// Number of records to place
    pub record_count: u64,
    /// Distinct sharding-key values; every record has its own value when absent
    #[serde(default)]
    pub distinct_values: Option<u64>,
}

impl ShardingConfig {
    pub fn new(servers: u64, strategy: ShardingStrategy, record_count: u64) -> Self {
        Self {
            servers,
            strategy,
            record_count,
            distinct_values: None,
        }
    }

    pub fn with_distinct_values(mut self, distinct: u64) -> Self {
        self.distinct_values = Some(distinct);
        self
    }

    fn key_values(&self) -> u64 {
        self.distinct_values.unwrap_or(self.record_count)
    }

    fn validate(&self) -> Result<()> {
        if self.servers == 0 || self.servers > config::MAX_SERVERS {
            return Err(CostError::invalid_input(
                "servers",
                format!("must be between 1 and {}", config::MAX_SERVERS),
            ));
        }
        if self.strategy != ShardingStrategy::RoundRobin
            && self.record_count > 0
            && self.key_values() == 0
        {
            return Err(CostError::invalid_input(
                "distinct_values",
                "records need at least one key value",
            ));
        }
        if self.strategy == ShardingStrategy::Hash && self.key_values() > config::MAX_HASHED_KEYS {
            return Err(CostError::invalid_input(
                "distinct_values",
                format!(
                    "hash sharding supports at most {} key values",
                    config::MAX_HASHED_KEYS
                ),
            ));
        }
        Ok(())
    }
}

/// Records per server, indexed by server id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardDistribution {
    pub strategy: ShardingStrategy,
    pub records: Vec<u64>,
}

impl ShardDistribution {
    /// Iterate `(server, records)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.records.iter().enumerate().map(|(i, n)| (i as u64, *n))
    }

    /// Records held by `server`
    pub fn records_on(&self, server: u64) -> u64 {
        self.records.get(server as usize).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.records.iter().sum()
    }

    /// Servers holding at least one record
    pub fn servers_used(&self) -> u64 {
        self.records.iter().filter(|n| **n > 0).count() as u64
    }

    pub fn max_load(&self) -> u64 {
        self.records.iter().copied().max().unwrap_or(0)
    }

    pub fn min_load(&self) -> u64 {
        self.records.iter().copied().min().unwrap_or(0)
    }

    pub fn mean_load(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.total() as f64 / self.records.len() as f64
        }
    }

    /// Ratio of the fullest server to the mean; 1.0 is perfectly balanced
    pub fn imbalance(&self) -> f64 {
        let mean = self.mean_load();
        if mean == 0.0 {
            1.0
        } else {
            self.max_load() as f64 / mean
        }
    }

    pub fn summary(&self) -> DistributionSummary {
        DistributionSummary {
            strategy: self.strategy,
            servers: self.records.len() as u64,
            servers_used: self.servers_used(),
            total_records: self.total(),
            min_load: self.min_load(),
            max_load: self.max_load(),
            mean_load: self.mean_load(),
            imbalance: self.imbalance(),
        }
    }
}

/// Aggregate view of a distribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSummary {
    pub strategy: ShardingStrategy,
    pub servers: u64,
    pub servers_used: u64,
    pub total_records: u64,
    pub min_load: u64,
    pub max_load: u64,
    pub mean_load: f64,
    pub imbalance: f64,
}

/// Place `config.record_count` records on `config.servers` servers.
///
/// The per-server counts always sum to the record count.
pub fn compute_shard_distribution(config: &ShardingConfig) -> Result<ShardDistribution> {
    config.validate()?;

    let n = config.servers;
    let records = config.record_count;
    let d = config.key_values();

    let counts: Vec<u64> = match config.strategy {
        ShardingStrategy::RoundRobin => (0..n).map(|s| count_congruent(records, n, s)).collect(),
        ShardingStrategy::Modulo => {
            let spread = KeySpread::new(records, d);
            (0..n)
                .map(|s| {
                    let values = count_congruent(d, n, s);
                    let heavy = count_congruent(spread.heavy_values, n, s);
                    values * spread.per_value + heavy
                })
                .collect()
        }
        ShardingStrategy::Hash => {
            let spread = KeySpread::new(records, d);
            let mut counts = vec![0u64; n as usize];
            for v in 0..d {
                counts[(key_hash(v) % n) as usize] += spread.records_of(v);
            }
            counts
        }
        ShardingStrategy::Range => {
            let spread = KeySpread::new(records, d);
            let chunk = d.div_ceil(n);
            (0..n)
                .map(|s| {
                    let start = s.saturating_mul(chunk).min(d);
                    let end = start.saturating_add(chunk).min(d);
                    spread.records_in(start, end)
                })
                .collect()
        }
    };

    Ok(ShardDistribution {
        strategy: config.strategy,
        records: counts,
    })
}

/// Number of `i` in `[0, total)` with `i mod n == s`
fn count_congruent(total: u64, n: u64, s: u64) -> u64 {
    total / n + u64::from(s < total % n)
}

pub(crate) fn key_hash(value: u64) -> u64 {
    u64::from(crc32fast::hash(&value.to_le_bytes()))
}

/// Even spread of records over key values
struct KeySpread {
    per_value: u64,
    /// Values `[0, heavy_values)` hold one extra record
    heavy_values: u64,
}

impl KeySpread {
    fn new(records: u64, values: u64) -> Self {
        if values == 0 {
            return Self {
                per_value: 0,
                heavy_values: 0,
            };
        }
        Self {
            per_value: records / values,
            heavy_values: records % values,
        }
    }

    fn records_of(&self, value: u64) -> u64 {
        self.per_value + u64::from(value < self.heavy_values)
    }

    /// Records held by key values `[start, end)`
    fn records_in(&self, start: u64, end: u64) -> u64 {
        let heavy = end.min(self.heavy_values).saturating_sub(start);
        (end - start) * self.per_value + heavy
    }
}

/// Per-server averages when sharding a collection on a key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardingStats {
    /// Servers holding data: one key value never spans servers
    pub servers_used: u64,
    pub docs_per_server: f64,
    pub distinct_values_per_server: f64,
}

/// Averages for `documents` documents with `distinct` key values on `servers` servers
pub fn sharding_stats(documents: u64, distinct: u64, servers: u64) -> ShardingStats {
    let servers_used = distinct.min(servers).max(1);
    ShardingStats {
        servers_used,
        docs_per_server: documents as f64 / servers_used as f64,
        distinct_values_per_server: distinct as f64 / servers_used as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_round_robin() {
        let dist =
            compute_shard_distribution(&ShardingConfig::new(4, ShardingStrategy::RoundRobin, 10))
                .unwrap();
        assert_eq!(dist.records, vec![3, 3, 2, 2]);
        assert_eq!(dist.servers_used(), 4);
    }

    #[test]
    fn test_modulo_with_few_key_values() {
        // 3 key values, 10 records: values hold 4, 3, 3
        let config = ShardingConfig::new(5, ShardingStrategy::Modulo, 10).with_distinct_values(3);
        let dist = compute_shard_distribution(&config).unwrap();
        assert_eq!(dist.records, vec![4, 3, 3, 0, 0]);
        assert_eq!(dist.servers_used(), 3);
    }

    #[test]
    fn test_modulo_wraps_values() {
        // 7 values with 2 records each plus 1 extra on value 0, over 3 servers
        let config = ShardingConfig::new(3, ShardingStrategy::Modulo, 15).with_distinct_values(7);
        let dist = compute_shard_distribution(&config).unwrap();
        // server 0: values 0,3,6 -> 3+2+2; server 1: 1,4 -> 4; server 2: 2,5 -> 4
        assert_eq!(dist.records, vec![7, 4, 4]);
    }

    #[test]
    fn test_range() {
        let config = ShardingConfig::new(3, ShardingStrategy::Range, 10).with_distinct_values(10);
        let dist = compute_shard_distribution(&config).unwrap();
        // chunks of 4 values: [0,4) [4,8) [8,10)
        assert_eq!(dist.records, vec![4, 4, 2]);

        let config = ShardingConfig::new(4, ShardingStrategy::Range, 100).with_distinct_values(2);
        let dist = compute_shard_distribution(&config).unwrap();
        assert_eq!(dist.records, vec![50, 50, 0, 0]);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let config = ShardingConfig::new(16, ShardingStrategy::Hash, 1_000_000).with_distinct_values(5_000);
        let a = compute_shard_distribution(&config).unwrap();
        let b = compute_shard_distribution(&config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.total(), 1_000_000);
        assert!(a.imbalance() < 1.5);
    }

    #[test]
    fn test_counts_sum_to_record_count() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let servers = rng.gen_range(1..=300);
            let records = rng.gen_range(0..=5_000_000u64);
            let distinct = rng.gen_range(1..=20_000u64);
            for strategy in ShardingStrategy::ALL {
                let config = ShardingConfig::new(servers, strategy, records)
                    .with_distinct_values(distinct);
                let dist = compute_shard_distribution(&config).unwrap();
                assert_eq!(dist.records.len() as u64, servers);
                assert_eq!(dist.total(), records, "{:?}", config);
            }
        }
    }

    #[test]
    fn test_large_counts_sum_exactly() {
        for strategy in [ShardingStrategy::RoundRobin, ShardingStrategy::Modulo, ShardingStrategy::Range] {
            let config = ShardingConfig::new(1000, strategy, 4_000_000_000).with_distinct_values(365);
            let dist = compute_shard_distribution(&config).unwrap();
            assert_eq!(dist.total(), 4_000_000_000);
        }
    }

    #[test]
    fn test_extreme_key_values() {
        for strategy in [ShardingStrategy::RoundRobin, ShardingStrategy::Modulo, ShardingStrategy::Range] {
            for servers in [1, 2, 7, 1000] {
                let config = ShardingConfig::new(servers, strategy, 10).with_distinct_values(u64::MAX);
                let dist = compute_shard_distribution(&config).unwrap();
                assert_eq!(dist.total(), 10, "{strategy} on {servers} servers");
            }
        }

        // first chunk of the key space takes every record
        let config = ShardingConfig::new(2, ShardingStrategy::Range, 10).with_distinct_values(u64::MAX);
        let dist = compute_shard_distribution(&config).unwrap();
        assert_eq!(dist.records_on(0), 10);
        assert_eq!(dist.records_on(1), 0);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(compute_shard_distribution(&ShardingConfig::new(0, ShardingStrategy::Hash, 10)).is_err());
        let config = ShardingConfig::new(2, ShardingStrategy::Modulo, 10).with_distinct_values(0);
        assert!(compute_shard_distribution(&config).is_err());
        let config = ShardingConfig::new(2, ShardingStrategy::Hash, 10)
            .with_distinct_values(config::MAX_HASHED_KEYS + 1);
        assert!(compute_shard_distribution(&config).is_err());
    }

    #[test]
    fn test_empty_collection() {
        let dist =
            compute_shard_distribution(&ShardingConfig::new(3, ShardingStrategy::Range, 0)).unwrap();
        assert_eq!(dist.records, vec![0, 0, 0]);
        assert_eq!(dist.imbalance(), 1.0);
    }

    #[test]
    fn test_sharding_stats() {
        // Stock sharded on IDP
        let stats = sharding_stats(20_000_000, 100_000, 1000);
        assert_eq!(stats.servers_used, 1000);
        assert_eq!(stats.docs_per_server, 20_000.0);
        assert_eq!(stats.distinct_values_per_server, 100.0);

        // Stock sharded on IDW: only 200 warehouses
        let stats = sharding_stats(20_000_000, 200, 1000);
        assert_eq!(stats.servers_used, 200);
        assert_eq!(stats.docs_per_server, 100_000.0);
    }
}

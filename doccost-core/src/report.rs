//! Plain-text rendering of estimation results

use crate::chord::{RingReport, RingSimulation};
use crate::query::{AggregateReport, FilterReport, JoinReport};
use crate::sharding::{ShardDistribution, ShardingStats};
use crate::size::{CollectionSize, DatabaseSizeReport};
use crate::QueryCost;
use comfy_table::{Cell, CellAlignment, Table};
use std::fmt;

/// Servers listed individually before the rest are elided
const LISTED_SERVERS: usize = 10;

/// Human readable byte count: GB (10^9) above a megabyte, bytes otherwise
pub fn format_bytes(bytes: u64) -> String {
    if bytes > 1_000_000 {
        format!("{:.3} GB", bytes as f64 / 1e9)
    } else {
        format!("{} B", bytes)
    }
}

/// Integer with thousands separators
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Floating point value: fixed for readable magnitudes, scientific otherwise
pub fn format_float(x: f64) -> String {
    if x == 0.0 || (1e-3..1e9).contains(&x.abs()) {
        format!("{:.3}", x)
    } else {
        format!("{:.3e}", x)
    }
}

impl fmt::Display for QueryCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time {} s, carbon {} gCO2, price ${}",
            format_float(self.time_seconds),
            format_float(self.carbon_gco2),
            format_float(self.price_usd)
        )
    }
}

impl fmt::Display for CollectionSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} documents x {} = {}",
            self.collection,
            format_count(self.documents),
            format_bytes(self.document_bytes),
            format_bytes(self.collection_bytes)
        )
    }
}

impl fmt::Display for DatabaseSizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table.set_header(vec!["Collection", "Document", "Documents", "Size"]);
        for c in &self.collections {
            table.add_row(vec![
                Cell::new(&c.collection),
                number(format_bytes(c.document_bytes)),
                number(format_count(c.documents)),
                number(format_bytes(c.collection_bytes)),
            ]);
        }

        writeln!(f, "Database {}", self.database)?;
        writeln!(f, "{}", table)?;
        write!(f, "Total database size: {}", format_bytes(self.total_bytes))
    }
}

impl fmt::Display for ShardDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary();
        writeln!(
            f,
            "Strategy {}: {} records on {} of {} servers",
            s.strategy,
            format_count(s.total_records),
            s.servers_used,
            s.servers
        )?;
        write!(
            f,
            "  load min {} / mean {} / max {} (imbalance {:.3})",
            format_count(s.min_load),
            format_float(s.mean_load),
            format_count(s.max_load),
            s.imbalance
        )?;
        if self.records.is_empty() {
            return Ok(());
        }

        let mut table = Table::new();
        table.set_header(vec!["Server", "Records"]);
        for (server, records) in self.iter().take(LISTED_SERVERS) {
            table.add_row(vec![number(server.to_string()), number(format_count(records))]);
        }
        write!(f, "\n{}", table)?;
        if self.records.len() > LISTED_SERVERS {
            write!(f, "\n... {} more servers", self.records.len() - LISTED_SERVERS)?;
        }
        Ok(())
    }
}

impl fmt::Display for ShardingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "docs/server {}, distinct values/server {}, servers used {}",
            format_float(self.docs_per_server),
            format_float(self.distinct_values_per_server),
            self.servers_used
        )
    }
}

impl fmt::Display for FilterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Filter on {}", self.collection)?;
        writeln!(f, "  servers checked: {}", format_count(self.servers_checked))?;
        writeln!(
            f,
            "  scanned: {} docs x {} = {}",
            format_count(self.scanned_docs),
            format_bytes(self.scanned_doc_bytes),
            format_bytes(self.scanned_data_bytes)
        )?;
        writeln!(
            f,
            "  output: {} docs x {} = {}",
            format_count(self.output_docs),
            format_bytes(self.output_doc_bytes),
            format_bytes(self.output_data_bytes)
        )?;
        write!(f, "  cost: {}", self.cost)
    }
}

impl fmt::Display for JoinReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Join {} -> {} ({})",
            self.outer.collection, self.inner.collection, self.strategy
        )?;
        writeln!(f, "{}", indent(&self.outer.to_string()))?;
        writeln!(f, "{}", indent(&self.inner.to_string()))?;
        writeln!(f, "  inner executions: {}", format_count(self.inner_executions))?;
        write!(f, "  total cost: {}", self.cost)
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.grouped;
        writeln!(f, "Aggregate on {}", g.collection)?;
        writeln!(f, "  servers checked: {}", format_count(g.servers_checked))?;
        writeln!(
            f,
            "  scanned: {} docs = {}",
            format_count(g.scanned_docs),
            format_bytes(g.scanned_data_bytes)
        )?;
        writeln!(
            f,
            "  groups: {} ({} returned, {} each)",
            format_count(g.groups),
            format_count(g.output_groups),
            format_bytes(g.group_doc_bytes)
        )?;
        writeln!(
            f,
            "  shuffles: {} = {}",
            format_count(g.shuffles),
            format_bytes(g.shuffle_data_bytes)
        )?;
        writeln!(f, "  grouping cost: {}", g.cost)?;
        if let Some(lookup) = &self.lookup {
            writeln!(f, "{}", indent(&lookup.to_string()))?;
            writeln!(f, "  lookups: {}", format_count(self.loops))?;
        }
        writeln!(f, "  output docs: {}", format_count(self.output_docs))?;
        write!(f, "  total cost: {}", self.cost)
    }
}

impl fmt::Display for RingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Chord ring: {} nodes on {} positions, {} keys, {} replicas per key",
            self.nodes.len(),
            format_count(self.positions),
            format_count(self.keys),
            self.replication
        )?;
        write!(
            f,
            "  lookup hops: mean {} / max {} over {} lookups",
            format_float(self.hops.mean_hops),
            self.hops.max_hops,
            format_count(self.hops.lookups)
        )?;
        if self.nodes.is_empty() {
            return Ok(());
        }

        let mut table = Table::new();
        table.set_header(vec!["Node", "Owns", "Keys", "Replicas"]);
        for node in &self.nodes {
            table.add_row(vec![
                number(node.position.to_string()),
                Cell::new(format!("({}, {}]", node.predecessor, node.position)),
                number(format_count(node.keys)),
                number(format_count(node.replicas)),
            ]);
        }
        write!(f, "\n{}", table)
    }
}

impl fmt::Display for RingSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            let verb = if change.joined { "joined" } else { "left" };
            writeln!(
                f,
                "node {} {}: {} keys moved",
                change.node,
                verb,
                format_count(change.moved_keys)
            )?;
        }
        write!(f, "{}", self.ring)?;
        if let Some(route) = &self.route {
            let path: Vec<String> = route.path.iter().map(|n| n.to_string()).collect();
            write!(
                f,
                "\nlookup: {} ({} hops, owner {})",
                path.join(" -> "),
                route.hops(),
                route.owner
            )?;
        }
        Ok(())
    }
}

fn number(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("  {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::{compute_shard_distribution, ShardingConfig, ShardingStrategy};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(152), "152 B");
        assert_eq!(format_bytes(1_000_000), "1000000 B");
        assert_eq!(format_bytes(3_040_000_000), "3.040 GB");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(4_000_000_000), "4,000,000,000");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.040112), "3.040");
        assert_eq!(format_float(0.0), "0.000");
        assert_eq!(format_float(3.04e-4), "3.040e-4");
    }

    /// Trimmed cells of each table row in `text`
    fn table_rows(text: &str) -> Vec<Vec<String>> {
        text.lines()
            .filter(|l| l.starts_with('|'))
            .map(|l| {
                l.trim_matches('|')
                    .split('|')
                    .map(|cell| cell.trim().to_string())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_distribution_elides_servers() {
        let config = ShardingConfig::new(12, ShardingStrategy::RoundRobin, 24);
        let text = compute_shard_distribution(&config).unwrap().to_string();
        assert!(text.starts_with("Strategy round-robin: 24 records on 12 of 12 servers"));

        let rows = table_rows(&text);
        assert_eq!(rows[0], ["Server", "Records"]);
        assert_eq!(rows.len(), 1 + LISTED_SERVERS);
        assert_eq!(rows[10], ["9", "2"]);
        assert!(text.ends_with("... 2 more servers"));
    }

    #[test]
    fn test_ring_simulation_text() {
        use crate::chord::{simulate_ring, RingLookup, RingParams};

        let params = RingParams {
            bits: 4,
            nodes: vec![0, 4, 7, 11, 14],
            keys: 100,
            replication: 2,
            join: vec![2],
            leave: Vec::new(),
            lookup: Some(RingLookup { from: 11, key: 7 }),
        };
        let text = simulate_ring(&params).unwrap().to_string();
        assert!(text.starts_with("node 2 joined: "));
        assert!(text.contains("Chord ring: 6 nodes on 16 positions, 100 keys, 2 replicas per key"));

        let rows = table_rows(&text);
        assert_eq!(rows[0], ["Node", "Owns", "Keys", "Replicas"]);
        assert_eq!(rows[1][..2], ["0", "(14, 0]"]);
        assert_eq!(rows[2][..2], ["2", "(0, 2]"]);
        assert!(text.lines().last().unwrap().starts_with("lookup: 11 -> "));
    }

    #[test]
    fn test_database_size_table() {
        let report = DatabaseSizeReport {
            database: "db1".into(),
            collections: vec![
                CollectionSize {
                    collection: "Stock".into(),
                    document_bytes: 152,
                    documents: 20_000_000,
                    collection_bytes: 3_040_000_000,
                },
                CollectionSize {
                    collection: "Warehouse".into(),
                    document_bytes: 100,
                    documents: 200,
                    collection_bytes: 20_000,
                },
            ],
            total_bytes: 3_040_020_000,
        };
        let text = report.to_string();
        assert!(text.starts_with("Database db1\n"));
        assert!(text.ends_with("Total database size: 3.040 GB"));

        let rows = table_rows(&text);
        assert_eq!(rows[0], ["Collection", "Document", "Documents", "Size"]);
        assert_eq!(rows[1], ["Stock", "152 B", "20,000,000", "3.040 GB"]);
        assert_eq!(rows[2], ["Warehouse", "100 B", "200", "20000 B"]);

        assert_eq!(
            report.collections[0].to_string(),
            "Stock: 20,000,000 documents x 152 B = 3.040 GB"
        );
    }
}

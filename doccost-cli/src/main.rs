//! DocCost CLI
//!
//! Console front end for the size, sharding and query cost calculators.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use doccost_core::chord::{simulate_ring, RingLookup, RingParams};
use doccost_core::estimator::ShardingParams;
use doccost_core::input;
use doccost_core::query::{AggregateQuery, FilterQuery, JoinQuery, JoinSide, JoinStrategy};
use doccost_core::sharding::ShardingStrategy;
use doccost_core::{Estimator, Settings};
use serde::Serialize;
use serde_json::json;
use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "doccost")]
#[command(version, about = "Storage, sharding and query cost estimates for document databases")]
struct Cli {
    /// Directory holding one sub-directory of JSON schemas per database
    #[arg(long, short = 's', global = true, default_value = "schemas")]
    schemas: PathBuf,

    /// Settings file (JSON); built-in defaults when omitted
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human readable report
    Text,
    /// Pretty printed JSON
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Size of a database, or of one collection
    Size {
        /// Database name; every database when omitted
        database: Option<String>,
        #[arg(long, short = 'c', requires = "database")]
        collection: Option<String>,
        /// Document count overriding the configured one
        #[arg(long, short = 'n', requires = "collection")]
        records: Option<u64>,
    },
    /// Distribution of records across servers
    Shard {
        #[arg(long)]
        servers: Option<u64>,
        #[arg(long, default_value = "modulo", value_parser = parse_sharding_strategy)]
        strategy: ShardingStrategy,
        /// Records to place; the collection's document count when omitted
        #[arg(long, short = 'n')]
        records: Option<u64>,
        /// Distinct sharding-key values
        #[arg(long)]
        distinct: Option<u64>,
        #[arg(long, short = 'c')]
        collection: Option<String>,
        /// Sharding key
        #[arg(long, short = 'k')]
        key: Option<String>,
    },
    /// Cost of a filter query
    Filter {
        database: String,
        collection: String,
        /// Output keys, comma separated
        #[arg(long, short = 'o', value_delimiter = ',', required = true)]
        output: Vec<String>,
        /// Equality filter keys, comma separated
        #[arg(long, short = 'f', value_delimiter = ',')]
        filter: Vec<String>,
        /// Sharding key; unsharded when omitted
        #[arg(long)]
        shard_key: Option<String>,
    },
    /// Cost of a join between two collections
    Join {
        database: String,
        #[arg(long, default_value = "nested-loop", value_parser = parse_join_strategy)]
        strategy: JoinStrategy,
        /// Outer collection
        #[arg(long)]
        outer: String,
        #[arg(long, value_delimiter = ',', required = true)]
        outer_output: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        outer_filter: Vec<String>,
        #[arg(long)]
        outer_join: String,
        #[arg(long)]
        outer_shard: Option<String>,
        /// Inner collection
        #[arg(long)]
        inner: String,
        #[arg(long, value_delimiter = ',', required = true)]
        inner_output: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        inner_filter: Vec<String>,
        #[arg(long)]
        inner_join: String,
        #[arg(long)]
        inner_shard: Option<String>,
    },
    /// Cost of a GROUP BY query, optionally joined to another collection
    Aggregate {
        database: String,
        collection: String,
        #[arg(long, short = 'g')]
        group_by: String,
        /// Aggregated keys, comma separated
        #[arg(long, short = 'a', value_delimiter = ',')]
        aggregate: Vec<String>,
        #[arg(long, short = 'f', value_delimiter = ',')]
        filter: Vec<String>,
        #[arg(long)]
        shard_key: Option<String>,
        /// Collection looked up for each group
        #[arg(long, requires = "join_key")]
        join: Option<String>,
        /// Key of the joined collection matching the group key
        #[arg(long)]
        join_key: Option<String>,
        #[arg(long, value_delimiter = ',')]
        join_output: Vec<String>,
        #[arg(long)]
        join_shard: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Place keys on a Chord ring and apply node joins and leaves
    Ring {
        /// The ring has 2^bits positions
        #[arg(long, default_value_t = 4)]
        bits: u32,
        /// Node positions, comma separated
        #[arg(long, value_delimiter = ',', default_value = "0,4,7,11,14")]
        nodes: Vec<u64>,
        /// Keys 0..n stored before any change
        #[arg(long, short = 'n', default_value_t = 1000)]
        keys: u64,
        /// Predecessors holding a copy of each key
        #[arg(long, default_value_t = doccost_core::config::DEFAULT_REPLICATION)]
        replication: usize,
        /// Nodes joining, comma separated
        #[arg(long, value_delimiter = ',')]
        join: Vec<u64>,
        /// Nodes leaving, comma separated
        #[arg(long, value_delimiter = ',')]
        leave: Vec<u64>,
        /// Route a lookup of KEY starting at node FROM
        #[arg(long, num_args = 2, value_names = ["FROM", "KEY"])]
        lookup: Option<Vec<u64>>,
    },
    /// List databases and their collections
    Databases,
    /// Database sizes, a sharded filter and a join on the sample schemas
    Demo,
}

fn parse_sharding_strategy(s: &str) -> Result<ShardingStrategy, String> {
    input::parse_strategy("strategy", s).map_err(|e| e.to_string())
}

fn parse_join_strategy(s: &str) -> Result<JoinStrategy, String> {
    input::parse_join_strategy("strategy", s).map_err(|e| e.to_string())
}

fn main() {
    // Logs go to stderr; stdout carries results only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = open_estimator(&cli).and_then(|estimator| {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        execute(&cli.command, cli.format, &estimator, &mut out)
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn open_estimator(cli: &Cli) -> anyhow::Result<Estimator> {
    let settings = match &cli.settings {
        Some(path) => Settings::from_json_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    debug!("Opening schemas directory {:?}", cli.schemas);
    Estimator::open(&cli.schemas, settings)
        .with_context(|| format!("failed to open schemas directory {}", cli.schemas.display()))
}

/// Write a result in the requested format
fn emit<T: Serialize + Display>(out: &mut impl Write, format: OutputFormat, value: &T) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", value)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn execute(
    command: &Commands,
    format: OutputFormat,
    estimator: &Estimator,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Commands::Size {
            database,
            collection,
            records,
        } => {
            if let (Some(database), Some(collection)) = (database, collection) {
                emit(out, format, &estimator.collection_size(database, collection, *records)?)?;
                return Ok(());
            }
            let databases = match database {
                Some(db) => vec![db.clone()],
                None => estimator.list_databases(),
            };
            for db in databases {
                emit(out, format, &estimator.database_size(&db)?)?;
            }
        }

        Commands::Shard {
            servers,
            strategy,
            records,
            distinct,
            collection,
            key,
        } => {
            let params = ShardingParams {
                servers: *servers,
                strategy: Some(*strategy),
                records: *records,
                distinct_values: *distinct,
                collection: collection.clone(),
                key: key.clone(),
            };
            let config = estimator.sharding_config(&params)?;
            let distribution = estimator.shard_distribution(&config)?;
            let stats = match (collection, key, records) {
                (Some(c), Some(k), None) => Some(estimator.collection_sharding_stats(c, k)?),
                _ => None,
            };
            match format {
                OutputFormat::Text => {
                    writeln!(out, "{}", distribution)?;
                    if let Some(stats) = stats {
                        writeln!(out, "{}", stats)?;
                    }
                }
                OutputFormat::Json => {
                    let value = json!({
                        "config": config,
                        "summary": distribution.summary(),
                        "records": distribution.records,
                        "stats": stats,
                    });
                    serde_json::to_writer_pretty(&mut *out, &value)?;
                    writeln!(out)?;
                }
            }
        }

        Commands::Filter {
            database,
            collection,
            output,
            filter,
            shard_key,
        } => {
            let query = FilterQuery {
                collection: collection.clone(),
                output_keys: output.clone(),
                filter_keys: filter.clone(),
                sharding_key: shard_key.clone(),
            };
            emit(out, format, &estimator.filter(database, &query)?)?;
        }

        Commands::Join {
            database,
            strategy,
            outer,
            outer_output,
            outer_filter,
            outer_join,
            outer_shard,
            inner,
            inner_output,
            inner_filter,
            inner_join,
            inner_shard,
        } => {
            let query = JoinQuery {
                outer: JoinSide {
                    collection: outer.clone(),
                    output_keys: outer_output.clone(),
                    filter_keys: outer_filter.clone(),
                    join_key: outer_join.clone(),
                    sharding_key: outer_shard.clone(),
                },
                inner: JoinSide {
                    collection: inner.clone(),
                    output_keys: inner_output.clone(),
                    filter_keys: inner_filter.clone(),
                    join_key: inner_join.clone(),
                    sharding_key: inner_shard.clone(),
                },
                strategy: *strategy,
            };
            emit(out, format, &estimator.join(database, &query)?)?;
        }

        Commands::Aggregate {
            database,
            collection,
            group_by,
            aggregate,
            filter,
            shard_key,
            join,
            join_key,
            join_output,
            join_shard,
            limit,
        } => {
            let join = match (join, join_key) {
                (Some(c), Some(k)) => Some(JoinSide {
                    collection: c.clone(),
                    output_keys: join_output.clone(),
                    filter_keys: Vec::new(),
                    join_key: k.clone(),
                    sharding_key: join_shard.clone(),
                }),
                _ => None,
            };
            let query = AggregateQuery {
                collection: collection.clone(),
                group_by: group_by.clone(),
                aggregate_keys: aggregate.clone(),
                filter_keys: filter.clone(),
                sharding_key: shard_key.clone(),
                join,
                limit: *limit,
            };
            emit(out, format, &estimator.aggregate(database, &query)?)?;
        }

        Commands::Ring {
            bits,
            nodes,
            keys,
            replication,
            join,
            leave,
            lookup,
        } => {
            let params = RingParams {
                bits: *bits,
                nodes: nodes.clone(),
                keys: *keys,
                replication: *replication,
                join: join.clone(),
                leave: leave.clone(),
                lookup: lookup.as_deref().and_then(|pair| match pair {
                    [from, key] => Some(RingLookup { from: *from, key: *key }),
                    _ => None,
                }),
            };
            emit(out, format, &simulate_ring(&params)?)?;
        }

        Commands::Databases => {
            let mut listing = Vec::new();
            for db in estimator.list_databases() {
                let collections = estimator.collections(&db)?;
                listing.push((db, collections));
            }
            match format {
                OutputFormat::Text => {
                    for (db, collections) in &listing {
                        let mut table = Table::new();
                        table.set_header(vec!["Collection", "Properties"]);
                        for c in collections {
                            let names: Vec<&str> = c.properties.iter().map(|p| p.name.as_str()).collect();
                            table.add_row(vec![c.name.clone(), names.join(", ")]);
                        }
                        writeln!(out, "{}\n{}", db, table)?;
                    }
                }
                OutputFormat::Json => {
                    let value: serde_json::Map<String, serde_json::Value> = listing
                        .into_iter()
                        .map(|(db, collections)| Ok((db, serde_json::to_value(collections)?)))
                        .collect::<serde_json::Result<_>>()?;
                    serde_json::to_writer_pretty(&mut *out, &value)?;
                    writeln!(out)?;
                }
            }
        }

        Commands::Demo => run_demo(format, estimator, out)?,
    }
    Ok(())
}

/// Product brand lookup joined to its stock, sharded like the sample design
fn demo_join() -> JoinQuery {
    JoinQuery {
        outer: JoinSide::new("Product", "IDP")
            .output(&["name", "price"])
            .filter(&["brand"])
            .sharded_on("brand"),
        inner: JoinSide::new("Stock", "IDP")
            .output(&["IDW", "quantity"])
            .sharded_on("IDP"),
        strategy: JoinStrategy::NestedLoop,
    }
}

fn demo_filter() -> FilterQuery {
    FilterQuery::new("Stock")
        .output(&["quantity", "location"])
        .filter(&["IDP", "IDW"])
        .sharded_on("IDP")
}

fn run_demo(format: OutputFormat, estimator: &Estimator, out: &mut impl Write) -> anyhow::Result<()> {
    let mut sizes = Vec::new();
    for db in estimator.list_databases() {
        sizes.push(estimator.database_size(&db)?);
    }
    let filter = estimator.filter("db1", &demo_filter())?;
    let join = estimator.join("db1", &demo_join())?;

    match format {
        OutputFormat::Text => {
            for report in &sizes {
                writeln!(out, "{}\n", report)?;
            }
            writeln!(out, "{}\n", filter)?;
            writeln!(out, "{}", join)?;
        }
        OutputFormat::Json => {
            let value = json!({ "sizes": sizes, "filter": filter, "join": join });
            serde_json::to_writer_pretty(&mut *out, &value)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

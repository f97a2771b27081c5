//! HTML calculator pages
//!
//! One page carries the five calculators. Each form posts back to its own
//! route and the page is rendered again with the submitted values kept and
//! the result (or the validation error) shown under that form.

use crate::api::{status_of, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Form, Router,
};
use doccost_core::estimator::ShardingParams;
use doccost_core::input::{
    parse_join_strategy, parse_key_list, parse_optional_count, parse_optional_key, parse_strategy,
};
use doccost_core::query::{
    AggregateQuery, FilterQuery, FilterReport, JoinQuery, JoinSide, JoinStrategy,
};
use doccost_core::report::{format_bytes, format_count, format_float};
use doccost_core::sharding::ShardingStrategy;
use doccost_core::size::CollectionSize;
use doccost_core::{config, CostError, Estimator, QueryCost, Result};
use serde::Deserialize;
use std::fmt::Write;

/// Servers shown in the distribution table
const LISTED_SERVERS: usize = 20;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/size", post(size))
        .route("/sharding", post(sharding))
        .route("/filter", post(filter))
        .route("/join", post(join))
        .route("/aggregate", post(aggregate))
}

// ============================================================================
// Forms
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizeForm {
    pub database: String,
    pub collection: String,
    pub records: String,
}

impl Default for SizeForm {
    fn default() -> Self {
        Self {
            database: "db1".into(),
            collection: String::new(),
            records: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardingForm {
    pub servers: String,
    pub strategy: String,
    pub records: String,
    pub distinct_values: String,
    pub collection: String,
    pub key: String,
}

impl Default for ShardingForm {
    fn default() -> Self {
        Self {
            servers: config::DEFAULT_SERVERS.to_string(),
            strategy: ShardingStrategy::Modulo.name().into(),
            records: String::new(),
            distinct_values: String::new(),
            collection: "Stock".into(),
            key: "IDP".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterForm {
    pub database: String,
    pub collection: String,
    pub output_keys: String,
    pub filter_keys: String,
    pub sharding_key: String,
}

impl Default for FilterForm {
    fn default() -> Self {
        Self {
            database: "db1".into(),
            collection: "Stock".into(),
            output_keys: "quantity, location".into(),
            filter_keys: "IDP, IDW".into(),
            sharding_key: "IDP".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JoinForm {
    pub database: String,
    pub strategy: String,
    pub outer_collection: String,
    pub outer_output: String,
    pub outer_filter: String,
    pub outer_join: String,
    pub outer_sharding: String,
    pub inner_collection: String,
    pub inner_output: String,
    pub inner_filter: String,
    pub inner_join: String,
    pub inner_sharding: String,
}

impl Default for JoinForm {
    fn default() -> Self {
        Self {
            database: "db1".into(),
            strategy: JoinStrategy::NestedLoop.name().into(),
            outer_collection: "Product".into(),
            outer_output: "name, price".into(),
            outer_filter: "brand".into(),
            outer_join: "IDP".into(),
            outer_sharding: "brand".into(),
            inner_collection: "Stock".into(),
            inner_output: "IDW, quantity".into(),
            inner_filter: String::new(),
            inner_join: "IDP".into(),
            inner_sharding: "IDP".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregateForm {
    pub database: String,
    pub collection: String,
    pub group_by: String,
    pub aggregate_keys: String,
    pub filter_keys: String,
    pub sharding_key: String,
    pub join_collection: String,
    pub join_key: String,
    pub join_output: String,
    pub join_filter: String,
    pub join_sharding: String,
    pub limit: String,
}

impl Default for AggregateForm {
    fn default() -> Self {
        Self {
            database: "db1".into(),
            collection: "Stock".into(),
            group_by: "IDP".into(),
            aggregate_keys: "quantity".into(),
            filter_keys: String::new(),
            sharding_key: "IDP".into(),
            join_collection: "Product".into(),
            join_key: "IDP".into(),
            join_output: "name, price".into(),
            join_filter: "brand".into(),
            join_sharding: "brand".into(),
            limit: "100".into(),
        }
    }
}

fn require_output(field: &str, keys: &[String]) -> Result<()> {
    if keys.is_empty() {
        return Err(CostError::invalid_input(field, "select at least one output key"));
    }
    Ok(())
}

impl SizeForm {
    fn run(&self, estimator: &Estimator) -> Result<String> {
        let records = parse_optional_count("records", &self.records)?;
        match parse_optional_key(&self.collection) {
            Some(collection) => {
                let size = estimator.collection_size(&self.database, &collection, records)?;
                Ok(size_table(std::slice::from_ref(&size), size.collection_bytes))
            }
            None if records.is_some() => Err(CostError::invalid_input(
                "records",
                "a record count needs a collection",
            )),
            None => {
                let report = estimator.database_size(&self.database)?;
                Ok(size_table(&report.collections, report.total_bytes))
            }
        }
    }
}

impl ShardingForm {
    fn run(&self, estimator: &Estimator) -> Result<String> {
        let params = ShardingParams {
            servers: parse_optional_count("servers", &self.servers)?,
            strategy: Some(parse_strategy("strategy", &self.strategy)?),
            records: parse_optional_count("records", &self.records)?,
            distinct_values: parse_optional_count("distinct_values", &self.distinct_values)?,
            collection: parse_optional_key(&self.collection),
            key: parse_optional_key(&self.key),
        };
        let config = estimator.sharding_config(&params)?;
        let distribution = estimator.shard_distribution(&config)?;
        let summary = distribution.summary();

        let mut html = rows_table(&[
            ("Strategy", summary.strategy.to_string()),
            ("Records", format_count(summary.total_records)),
            ("Key values", format_count(config.distinct_values.unwrap_or(config.record_count))),
            ("Servers used", format!("{} of {}", summary.servers_used, summary.servers)),
            ("Min load", format_count(summary.min_load)),
            ("Mean load", format_float(summary.mean_load)),
            ("Max load", format_count(summary.max_load)),
            ("Imbalance", format!("{:.3}", summary.imbalance)),
        ]);

        if let (Some(collection), Some(key), None) = (&params.collection, &params.key, params.records) {
            let stats = estimator.collection_sharding_stats(collection, key)?;
            html.push_str(&rows_table(&[
                ("Docs per server", format_float(stats.docs_per_server)),
                ("Distinct values per server", format_float(stats.distinct_values_per_server)),
            ]));
        }

        html.push_str("<table class=\"servers\"><tr><th>Server</th><th>Records</th></tr>");
        for (server, records) in distribution.iter().take(LISTED_SERVERS) {
            let _ = write!(html, "<tr><td>{}</td><td>{}</td></tr>", server, format_count(records));
        }
        html.push_str("</table>");
        if distribution.records.len() > LISTED_SERVERS {
            let _ = write!(
                html,
                "<p>... {} more servers</p>",
                distribution.records.len() - LISTED_SERVERS
            );
        }
        Ok(html)
    }
}

impl FilterForm {
    fn run(&self, estimator: &Estimator) -> Result<String> {
        let query = FilterQuery {
            collection: self.collection.trim().to_string(),
            output_keys: parse_key_list(&self.output_keys),
            filter_keys: parse_key_list(&self.filter_keys),
            sharding_key: parse_optional_key(&self.sharding_key),
        };
        require_output("output_keys", &query.output_keys)?;
        let report = estimator.filter(&self.database, &query)?;
        Ok(filter_table(&report))
    }
}

impl JoinForm {
    fn side(collection: &str, output: &str, filter: &str, join: &str, sharding: &str) -> JoinSide {
        JoinSide {
            collection: collection.trim().to_string(),
            output_keys: parse_key_list(output),
            filter_keys: parse_key_list(filter),
            join_key: join.trim().to_string(),
            sharding_key: parse_optional_key(sharding),
        }
    }

    fn run(&self, estimator: &Estimator) -> Result<String> {
        let query = JoinQuery {
            outer: Self::side(
                &self.outer_collection,
                &self.outer_output,
                &self.outer_filter,
                &self.outer_join,
                &self.outer_sharding,
            ),
            inner: Self::side(
                &self.inner_collection,
                &self.inner_output,
                &self.inner_filter,
                &self.inner_join,
                &self.inner_sharding,
            ),
            strategy: parse_join_strategy("strategy", &self.strategy)?,
        };
        require_output("outer_output", &query.outer.output_keys)?;
        require_output("inner_output", &query.inner.output_keys)?;

        let report = estimator.join(&self.database, &query)?;
        let mut html = String::new();
        let _ = write!(html, "<h3>{}</h3>", escape(&report.outer.collection));
        html.push_str(&filter_table(&report.outer));
        let _ = write!(html, "<h3>{}</h3>", escape(&report.inner.collection));
        html.push_str(&filter_table(&report.inner));
        html.push_str(&rows_table(&[
            ("Strategy", report.strategy.to_string()),
            ("Inner executions", format_count(report.inner_executions)),
        ]));
        html.push_str("<h3>Total</h3>");
        html.push_str(&cost_table(&report.cost));
        Ok(html)
    }
}

impl AggregateForm {
    fn run(&self, estimator: &Estimator) -> Result<String> {
        let group_by = self.group_by.trim();
        if group_by.is_empty() {
            return Err(CostError::invalid_input("group_by", "a group key is required"));
        }
        let join = parse_optional_key(&self.join_collection).map(|collection| {
            JoinForm::side(
                &collection,
                &self.join_output,
                &self.join_filter,
                &self.join_key,
                &self.join_sharding,
            )
        });
        let query = AggregateQuery {
            collection: self.collection.trim().to_string(),
            group_by: group_by.to_string(),
            aggregate_keys: parse_key_list(&self.aggregate_keys),
            filter_keys: parse_key_list(&self.filter_keys),
            sharding_key: parse_optional_key(&self.sharding_key),
            join,
            limit: parse_optional_count("limit", &self.limit)?,
        };

        let report = estimator.aggregate(&self.database, &query)?;
        let g = &report.grouped;
        let mut html = String::new();
        let _ = write!(html, "<h3>{} grouped by {}</h3>", escape(&g.collection), escape(group_by));
        html.push_str(&rows_table(&[
            ("Servers checked", format_count(g.servers_checked)),
            ("Scanned documents", format_count(g.scanned_docs)),
            ("Scanned document size", format_bytes(g.scanned_doc_bytes)),
            ("Scanned data", format_bytes(g.scanned_data_bytes)),
            ("Groups", format_count(g.groups)),
            ("Output groups", format_count(g.output_groups)),
            ("Group document size", format_bytes(g.group_doc_bytes)),
            ("Output data", format_bytes(g.output_data_bytes)),
            ("Shuffles", format_count(g.shuffles)),
            ("Shuffled data", format_bytes(g.shuffle_data_bytes)),
        ]));
        html.push_str(&cost_table(&g.cost));
        if let Some(lookup) = &report.lookup {
            let _ = write!(html, "<h3>{}</h3>", escape(&lookup.collection));
            html.push_str(&filter_table(lookup));
        }
        html.push_str(&rows_table(&[
            ("Lookups", format_count(report.loops)),
            ("Output documents", format_count(report.output_docs)),
        ]));
        html.push_str("<h3>Total</h3>");
        html.push_str(&cost_table(&report.cost));
        Ok(html)
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Size,
    Sharding,
    Filter,
    Join,
    Aggregate,
}

/// Submitted forms and the outcome of the last submission
#[derive(Default)]
struct Page {
    size: SizeForm,
    sharding: ShardingForm,
    filter: FilterForm,
    join: JoinForm,
    aggregate: AggregateForm,
    outcome: Option<(Section, std::result::Result<String, String>)>,
}

impl Page {
    fn new(estimator: &Estimator) -> Self {
        let mut page = Self::default();
        page.sharding.servers = estimator.settings().servers.to_string();
        page
    }

    /// Record the result of running `section`, returning the status to send
    fn finish(&mut self, section: Section, result: Result<String>) -> StatusCode {
        match result {
            Ok(html) => {
                self.outcome = Some((section, Ok(html)));
                StatusCode::OK
            }
            Err(e) => {
                let status = status_of(&e);
                self.outcome = Some((section, Err(e.to_string())));
                status
            }
        }
    }

    fn outcome_for(&self, section: Section) -> String {
        match &self.outcome {
            Some((s, Ok(html))) if *s == section => format!("<div class=\"result\">{}</div>", html),
            Some((s, Err(msg))) if *s == section => {
                format!("<div class=\"error\">Error: {}</div>", escape(msg))
            }
            _ => String::new(),
        }
    }
}

type PageResponse = (StatusCode, Html<String>);

async fn index(State(estimator): State<AppState>) -> Html<String> {
    Html(render(&estimator, &Page::new(&estimator)))
}

async fn size(State(estimator): State<AppState>, Form(form): Form<SizeForm>) -> PageResponse {
    let mut page = Page::new(&estimator);
    let status = page.finish(Section::Size, form.run(&estimator));
    page.size = form;
    (status, Html(render(&estimator, &page)))
}

async fn sharding(State(estimator): State<AppState>, Form(form): Form<ShardingForm>) -> PageResponse {
    let mut page = Page::new(&estimator);
    let status = page.finish(Section::Sharding, form.run(&estimator));
    page.sharding = form;
    (status, Html(render(&estimator, &page)))
}

async fn filter(State(estimator): State<AppState>, Form(form): Form<FilterForm>) -> PageResponse {
    let mut page = Page::new(&estimator);
    let status = page.finish(Section::Filter, form.run(&estimator));
    page.filter = form;
    (status, Html(render(&estimator, &page)))
}

async fn join(State(estimator): State<AppState>, Form(form): Form<JoinForm>) -> PageResponse {
    let mut page = Page::new(&estimator);
    let status = page.finish(Section::Join, form.run(&estimator));
    page.join = form;
    (status, Html(render(&estimator, &page)))
}

async fn aggregate(State(estimator): State<AppState>, Form(form): Form<AggregateForm>) -> PageResponse {
    let mut page = Page::new(&estimator);
    let status = page.finish(Section::Aggregate, form.run(&estimator));
    page.aggregate = form;
    (status, Html(render(&estimator, &page)))
}

// ============================================================================
// Rendering
// ============================================================================

const STYLE: &str = "body{font-family:sans-serif;max-width:960px;margin:auto;padding:1em}\
section{border:1px solid #ccc;border-radius:6px;padding:1em;margin:1em 0}\
label{display:inline-block;min-width:12em}\
table{border-collapse:collapse;margin:.5em 0}td,th{border:1px solid #ddd;padding:.2em .6em;text-align:left}\
.error{color:#a00;font-weight:bold}.result{background:#f6f8fa;padding:.5em}";

fn render(estimator: &Estimator, page: &Page) -> String {
    let databases = estimator.list_databases();
    let strategies: Vec<&str> = ShardingStrategy::ALL.iter().map(|s| s.name()).collect();
    let join_strategies: Vec<&str> = JoinStrategy::ALL.iter().map(|s| s.name()).collect();
    let db_names: Vec<&str> = databases.iter().map(String::as_str).collect();

    let mut html = String::with_capacity(16 * 1024);
    let _ = write!(
        html,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>DocCost</title>\
         <style>{}</style></head><body><h1>DocCost</h1>\
         <p>Storage, sharding and query cost estimates for document database designs.</p>",
        STYLE
    );

    // Database size
    let f = &page.size;
    html.push_str("<section><h2>Database size</h2><form method=\"post\" action=\"/size\">");
    html.push_str(&select("database", "Database", &db_names, &f.database));
    html.push_str(&input("collection", "Collection (optional)", &f.collection));
    html.push_str(&input("records", "Records (optional)", &f.records));
    html.push_str("<button type=\"submit\">Compute size</button></form>");
    html.push_str(&page.outcome_for(Section::Size));
    html.push_str("</section>");

    // Sharding
    let f = &page.sharding;
    html.push_str("<section><h2>Sharding</h2><form method=\"post\" action=\"/sharding\">");
    html.push_str(&input("servers", "Servers", &f.servers));
    html.push_str(&select("strategy", "Strategy", &strategies, &f.strategy));
    html.push_str(&input("records", "Records (blank: collection count)", &f.records));
    html.push_str(&input("distinct_values", "Distinct key values (optional)", &f.distinct_values));
    html.push_str(&input("collection", "Collection", &f.collection));
    html.push_str(&input("key", "Sharding key", &f.key));
    html.push_str("<button type=\"submit\">Compute distribution</button></form>");
    html.push_str(&page.outcome_for(Section::Sharding));
    html.push_str("</section>");

    // Filter
    let f = &page.filter;
    html.push_str("<section><h2>Filter query</h2><form method=\"post\" action=\"/filter\">");
    html.push_str(&select("database", "Database", &db_names, &f.database));
    html.push_str(&input("collection", "Collection", &f.collection));
    html.push_str(&input("output_keys", "Output keys", &f.output_keys));
    html.push_str(&input("filter_keys", "Filter keys", &f.filter_keys));
    html.push_str(&input("sharding_key", "Sharding key (blank: none)", &f.sharding_key));
    html.push_str("<button type=\"submit\">Compute filter cost</button></form>");
    html.push_str(&page.outcome_for(Section::Filter));
    html.push_str("</section>");

    // Join
    let f = &page.join;
    html.push_str("<section><h2>Join query</h2><form method=\"post\" action=\"/join\">");
    html.push_str(&select("database", "Database", &db_names, &f.database));
    html.push_str(&select("strategy", "Strategy", &join_strategies, &f.strategy));
    html.push_str("<h3>Outer collection</h3>");
    html.push_str(&input("outer_collection", "Collection", &f.outer_collection));
    html.push_str(&input("outer_output", "Output keys", &f.outer_output));
    html.push_str(&input("outer_filter", "Filter keys", &f.outer_filter));
    html.push_str(&input("outer_join", "Join key", &f.outer_join));
    html.push_str(&input("outer_sharding", "Sharding key", &f.outer_sharding));
    html.push_str("<h3>Inner collection</h3>");
    html.push_str(&input("inner_collection", "Collection", &f.inner_collection));
    html.push_str(&input("inner_output", "Output keys", &f.inner_output));
    html.push_str(&input("inner_filter", "Filter keys", &f.inner_filter));
    html.push_str(&input("inner_join", "Join key", &f.inner_join));
    html.push_str(&input("inner_sharding", "Sharding key", &f.inner_sharding));
    html.push_str("<button type=\"submit\">Compute join cost</button></form>");
    html.push_str(&page.outcome_for(Section::Join));
    html.push_str("</section>");

    // Aggregate
    let f = &page.aggregate;
    html.push_str("<section><h2>Aggregate query</h2><form method=\"post\" action=\"/aggregate\">");
    html.push_str(&select("database", "Database", &db_names, &f.database));
    html.push_str("<h3>Grouped collection</h3>");
    html.push_str(&input("collection", "Collection", &f.collection));
    html.push_str(&input("group_by", "Group by key", &f.group_by));
    html.push_str(&input("aggregate_keys", "Aggregated keys", &f.aggregate_keys));
    html.push_str(&input("filter_keys", "Filter keys", &f.filter_keys));
    html.push_str(&input("sharding_key", "Sharding key (blank: none)", &f.sharding_key));
    html.push_str("<h3>Joined collection</h3>");
    html.push_str(&input("join_collection", "Collection (blank: no join)", &f.join_collection));
    html.push_str(&input("join_key", "Join key", &f.join_key));
    html.push_str(&input("join_output", "Output keys", &f.join_output));
    html.push_str(&input("join_filter", "Filter keys", &f.join_filter));
    html.push_str(&input("join_sharding", "Sharding key", &f.join_sharding));
    html.push_str(&input("limit", "Limit (optional)", &f.limit));
    html.push_str("<button type=\"submit\">Compute aggregate cost</button></form>");
    html.push_str(&page.outcome_for(Section::Aggregate));
    html.push_str("</section>");

    html.push_str(&schemas_section(estimator, &databases));
    html.push_str("</body></html>");
    html
}

/// Collections and properties of every database, as a reference for the forms
fn schemas_section(estimator: &Estimator, databases: &[String]) -> String {
    let mut html = String::from("<section><h2>Schemas</h2>");
    for db in databases {
        let Ok(collections) = estimator.collections(db) else {
            continue;
        };
        let _ = write!(html, "<h3>{}</h3><ul>", escape(db));
        for c in collections {
            let properties: Vec<String> = c
                .properties
                .iter()
                .map(|p| format!("{}: {}", escape(&p.name), p.value_type))
                .collect();
            let documents = c.documents.map(format_count).unwrap_or_else(|| "?".into());
            let _ = write!(
                html,
                "<li><b>{}</b> ({} docs): {}</li>",
                escape(&c.name),
                documents,
                properties.join(", ")
            );
        }
        html.push_str("</ul>");
    }
    html.push_str("</section>");
    html
}

fn input(name: &str, label: &str, value: &str) -> String {
    format!(
        "<p><label for=\"{name}\">{label}</label><input id=\"{name}\" name=\"{name}\" value=\"{}\"></p>",
        escape(value)
    )
}

fn select(name: &str, label: &str, options: &[&str], selected: &str) -> String {
    let mut html = format!("<p><label for=\"{name}\">{label}</label><select id=\"{name}\" name=\"{name}\">");
    for option in options {
        let marker = if *option == selected { " selected" } else { "" };
        let _ = write!(html, "<option{}>{}</option>", marker, escape(option));
    }
    html.push_str("</select></p>");
    html
}

fn rows_table(rows: &[(&str, String)]) -> String {
    let mut html = String::from("<table>");
    for (label, value) in rows {
        let _ = write!(html, "<tr><th>{}</th><td>{}</td></tr>", label, escape(value));
    }
    html.push_str("</table>");
    html
}

fn size_table(collections: &[CollectionSize], total_bytes: u64) -> String {
    let mut html =
        String::from("<table><tr><th>Collection</th><th>Document</th><th>Documents</th><th>Size</th></tr>");
    for c in collections {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&c.collection),
            format_bytes(c.document_bytes),
            format_count(c.documents),
            format_bytes(c.collection_bytes)
        );
    }
    let _ = write!(
        html,
        "<tr><th colspan=\"3\">Total</th><th>{}</th></tr></table>",
        format_bytes(total_bytes)
    );
    html
}

fn cost_table(cost: &QueryCost) -> String {
    rows_table(&[
        ("Time", format!("{} s", format_float(cost.time_seconds))),
        ("Carbon", format!("{} gCO2", format_float(cost.carbon_gco2))),
        ("Price", format!("$ {}", format_float(cost.price_usd))),
    ])
}

fn filter_table(report: &FilterReport) -> String {
    let mut html = rows_table(&[
        ("Servers checked", format_count(report.servers_checked)),
        ("Scanned documents", format_count(report.scanned_docs)),
        ("Scanned document size", format_bytes(report.scanned_doc_bytes)),
        ("Scanned data", format_bytes(report.scanned_data_bytes)),
        ("Output documents", format_count(report.output_docs)),
        ("Output document size", format_bytes(report.output_doc_bytes)),
        ("Output data", format_bytes(report.output_data_bytes)),
    ]);
    html.push_str(&cost_table(&report.cost));
    html
}

/// Escape text for HTML content and attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

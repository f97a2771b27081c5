//! HTTP API endpoints

use crate::web;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use doccost_core::chord::{simulate_ring, RingParams, RingSimulation};
use doccost_core::estimator::{CollectionInfo, ShardingParams};
use doccost_core::query::{AggregateQuery, AggregateReport, FilterQuery, FilterReport, JoinQuery, JoinReport};
use doccost_core::sharding::{DistributionSummary, ShardingConfig, ShardingStats};
use doccost_core::size::{CollectionSize, DatabaseSizeReport};
use doccost_core::{CostError, Estimator, Settings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Application state
pub type AppState = Arc<Estimator>;

/// Create the router: HTML calculator pages plus the JSON API
pub fn create_router(estimator: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))

        // Catalog
        .route("/api/databases", get(list_databases))
        .route("/api/databases/:name/collections", get(list_collections))
        .route("/api/settings", get(settings))
        .route("/api/reload", post(reload))

        // Calculators
        .route("/api/size", post(size))
        .route("/api/sharding", post(sharding))
        .route("/api/filter", post(filter))
        .route("/api/join", post(join))
        .route("/api/aggregate", post(aggregate))
        .route("/api/ring", post(ring))

        .merge(web::routes())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(estimator)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SizeRequest {
    pub database: String,
    /// Size only this collection
    pub collection: Option<String>,
    /// Overrides the configured document count of `collection`
    pub records: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SizeResponse {
    Database(DatabaseSizeReport),
    Collection(CollectionSize),
}

#[derive(Debug, Serialize)]
pub struct ShardingResponse {
    pub config: ShardingConfig,
    pub summary: DistributionSummary,
    /// Records per server
    pub records: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ShardingStats>,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub database: String,
    #[serde(flatten)]
    pub query: FilterQuery,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub database: String,
    #[serde(flatten)]
    pub query: JoinQuery,
}

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub database: String,
    #[serde(flatten)]
    pub query: AggregateQuery,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub databases: usize,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub databases: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Failure of an API call
#[derive(Debug)]
pub enum ApiError {
    Cost(CostError),
    /// Request body could not be decoded
    Body(String),
}

impl From<CostError> for ApiError {
    fn from(e: CostError) -> Self {
        ApiError::Cost(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection.body_text())
    }
}

/// Status code for a calculator error
pub fn status_of(e: &CostError) -> StatusCode {
    if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_user_error() || matches!(e, CostError::InvalidSchema { .. }) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Cost(e) => (status_of(&e), e.to_string()),
            ApiError::Body(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        if status.is_server_error() {
            error!("Request failed: {}", message);
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(estimator): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: doccost_core::VERSION.to_string(),
        databases: estimator.list_databases().len(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_databases(State(estimator): State<AppState>) -> Json<Vec<String>> {
    Json(estimator.list_databases())
}

async fn list_collections(
    State(estimator): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Vec<CollectionInfo>> {
    Ok(Json(estimator.collections(&name)?))
}

async fn settings(State(estimator): State<AppState>) -> Json<Settings> {
    Json(estimator.settings().clone())
}

async fn reload(State(estimator): State<AppState>) -> ApiResult<ReloadResponse> {
    let databases = estimator.reload()?;
    Ok(Json(ReloadResponse { databases }))
}

async fn size(
    State(estimator): State<AppState>,
    payload: Result<Json<SizeRequest>, JsonRejection>,
) -> ApiResult<SizeResponse> {
    let Json(req) = payload?;
    let response = match req.collection.as_deref() {
        Some(collection) => {
            SizeResponse::Collection(estimator.collection_size(&req.database, collection, req.records)?)
        }
        None => SizeResponse::Database(estimator.database_size(&req.database)?),
    };
    Ok(Json(response))
}

async fn sharding(
    State(estimator): State<AppState>,
    payload: Result<Json<ShardingParams>, JsonRejection>,
) -> ApiResult<ShardingResponse> {
    let Json(params) = payload?;
    let config = estimator.sharding_config(&params)?;
    let distribution = estimator.shard_distribution(&config)?;

    let stats = match (params.collection.as_deref(), params.key.as_deref()) {
        (Some(collection), Some(key)) if params.records.is_none() => {
            Some(estimator.collection_sharding_stats(collection, key)?)
        }
        _ => None,
    };

    Ok(Json(ShardingResponse {
        config,
        summary: distribution.summary(),
        records: distribution.records,
        stats,
    }))
}

async fn filter(
    State(estimator): State<AppState>,
    payload: Result<Json<FilterRequest>, JsonRejection>,
) -> ApiResult<FilterReport> {
    let Json(req) = payload?;
    Ok(Json(estimator.filter(&req.database, &req.query)?))
}

async fn join(
    State(estimator): State<AppState>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> ApiResult<JoinReport> {
    let Json(req) = payload?;
    Ok(Json(estimator.join(&req.database, &req.query)?))
}

async fn aggregate(
    State(estimator): State<AppState>,
    payload: Result<Json<AggregateRequest>, JsonRejection>,
) -> ApiResult<AggregateReport> {
    let Json(req) = payload?;
    Ok(Json(estimator.aggregate(&req.database, &req.query)?))
}

async fn ring(payload: Result<Json<RingParams>, JsonRejection>) -> ApiResult<RingSimulation> {
    let Json(params) = payload?;
    Ok(Json(simulate_ring(&params)?))
}

/// Estimator over an in-memory `db1` with the Product and Stock collections
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use doccost_core::schema::{Catalog, Database};
    use doccost_core::{Field, ScalarType, Schema};

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
            Field::scalar("location", ScalarType::String),
        ],
    );
    let catalog = Catalog::from_databases(vec![Database::new("db1", vec![product, stock])]);
    Arc::new(Estimator::new(Settings::default(), catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_ping() {
        let app = create_router(test_state());
        let (status, body) = call(app.clone(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["databases"], 1);

        let response = app
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn test_catalog_listing() {
        let app = create_router(test_state());
        let (_, body) = call(app.clone(), "GET", "/api/databases", None).await;
        assert_eq!(body, json!(["db1"]));

        let (status, body) = call(app.clone(), "GET", "/api/databases/db1/collections", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[1]["name"], "Stock");
        assert_eq!(body[1]["documents"], 20_000_000);
        assert_eq!(body[1]["properties"][3], json!({"name": "location", "type": "string"}));

        let (status, body) = call(app, "GET", "/api/databases/nope/collections", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_size() {
        let app = create_router(test_state());
        let (status, body) = call(app.clone(), "POST", "/api/size", Some(json!({"database": "db1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["collections"][1]["document_bytes"], 152);

        let request = json!({"database": "db1", "collection": "Stock", "records": 10});
        let (_, body) = call(app.clone(), "POST", "/api/size", Some(request)).await;
        assert_eq!(body["collection_bytes"], 1_520);

        let request = json!({"database": "db1", "collection": "Stock", "records": -1});
        let (status, body) = call(app, "POST", "/api/size", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_sharding() {
        let app = create_router(test_state());
        let request = json!({"servers": 4, "records": 10, "strategy": "round-robin"});
        let (status, body) = call(app.clone(), "POST", "/api/sharding", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"], json!([3, 3, 2, 2]));
        assert_eq!(body["summary"]["total_records"], 10);
        assert!(body.get("stats").is_none());

        let request = json!({"collection": "Stock", "key": "IDW"});
        let (_, body) = call(app.clone(), "POST", "/api/sharding", Some(request)).await;
        assert_eq!(body["summary"]["servers_used"], 200);
        assert_eq!(body["stats"]["servers_used"], 200);

        let request = json!({"servers": 0, "records": 10});
        let (status, _) = call(app, "POST", "/api/sharding", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_filter() {
        let app = create_router(test_state());
        let request = json!({
            "database": "db1",
            "collection": "Stock",
            "output_keys": ["quantity", "location"],
            "filter_keys": ["IDP", "IDW"],
            "sharding_key": "IDP"
        });
        let (status, body) = call(app.clone(), "POST", "/api/filter", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["servers_checked"], 1);
        assert_eq!(body["output_docs"], 1);

        let request = json!({"database": "db1", "collection": "Stock", "output_keys": ["colour"]});
        let (status, body) = call(app, "POST", "/api/filter", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("colour"));
    }

    #[tokio::test]
    async fn test_join_strategies() {
        let app = create_router(test_state());
        let mut request = json!({
            "database": "db1",
            "outer": {"collection": "Product", "output_keys": ["name", "price"], "filter_keys": ["brand"],
                      "join_key": "IDP", "sharding_key": "brand"},
            "inner": {"collection": "Stock", "output_keys": ["IDW", "quantity"], "join_key": "IDP",
                      "sharding_key": "IDP"}
        });
        let (status, nested) = call(app.clone(), "POST", "/api/join", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(nested["strategy"], "nested-loop");

        request["strategy"] = json!("hash");
        let (_, hash) = call(app, "POST", "/api/join", Some(request)).await;
        assert_eq!(hash["strategy"], "hash");
        assert_eq!(hash["inner_executions"], 1);
    }

    #[tokio::test]
    async fn test_aggregate_unknown_collection() {
        let app = create_router(test_state());
        let request = json!({"database": "db1", "collection": "OrderLine", "group_by": "IDP"});
        let (status, _) = call(app, "POST", "/api/aggregate", Some(request)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let app = create_router(test_state());
        let request = Request::post("/api/filter")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_database() {
        let dir = tempfile::tempdir().unwrap();
        let db1 = dir.path().join("db1");
        std::fs::create_dir(&db1).unwrap();
        std::fs::write(
            db1.join("Warehouse.json"),
            r#"{"type": "object", "properties": {"IDW": {"type": "integer"}}}"#,
        )
        .unwrap();

        let estimator = Estimator::open(dir.path(), Settings::default()).unwrap();
        let app = create_router(Arc::new(estimator));
        let (_, body) = call(app.clone(), "GET", "/api/databases", None).await;
        assert_eq!(body, json!(["db1"]));

        std::fs::create_dir(dir.path().join("db2")).unwrap();
        let (status, body) = call(app.clone(), "POST", "/api/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["databases"], 2);

        let (_, body) = call(app, "GET", "/api/settings", None).await;
        assert_eq!(body["servers"], 1000);
    }

    #[tokio::test]
    async fn test_ring_simulation() {
        let app = create_router(test_state());
        let request = json!({
            "bits": 4,
            "nodes": [0, 4, 7, 11, 14],
            "keys": 200,
            "join": [2],
            "leave": [7],
            "lookup": {"from": 11, "key": 5}
        });
        let (status, body) = call(app.clone(), "POST", "/api/ring", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ring"]["replication"], 3);
        assert_eq!(body["ring"]["keys"], 200);
        assert_eq!(body["ring"]["nodes"].as_array().unwrap().len(), 5);
        assert_eq!(body["changes"][0]["node"], 2);
        assert_eq!(body["changes"][1]["joined"], false);
        assert_eq!(body["route"]["path"][0], 11);

        let request = json!({"bits": 4, "nodes": [0, 16]});
        let (status, body) = call(app, "POST", "/api/ring", Some(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("outside the ring"));
    }
}

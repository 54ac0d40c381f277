//! Inference HTTP API

use crate::config::ConfidenceMode;
use crate::features::{ConnectionRecord, RawRecord};
use crate::inference::{InferenceEngine, InferenceStats};
use crate::monitor::{LiveStatus, StatusSnapshot};
use crate::router::Prediction;
use crate::{DlhaError, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared handler state
pub struct AppState {
    /// Classifier
    pub engine: Arc<InferenceEngine>,
    /// Latest verdict
    pub status: Arc<LiveStatus>,
    /// Where `/api/v1/reload` reads the bundle from
    pub bundle_path: PathBuf,
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/predict", post(predict))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/classify", post(classify))
        .route("/reload", post(reload))
        .route("/stats", get(stats))
}

/// Bind `addr` and serve until the listener fails
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("DLHA API listening on {}", addr);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Single-record request; `src_ip` / `dst_ip` only feed the live status
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Source address of the connection
    #[serde(default)]
    pub src_ip: Option<String>,
    /// Destination address of the connection
    #[serde(default)]
    pub dst_ip: Option<String>,
    /// Feature fields
    #[serde(flatten)]
    pub fields: RawRecord,
}

/// Batch request
#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    /// Records to classify
    pub records: Vec<RawRecord>,
}

/// Batch response
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    /// One result per request record, in order
    pub results: Vec<Prediction>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: String,
    checks: HealthChecks,
}

#[derive(Serialize)]
struct HealthChecks {
    model_loaded: bool,
    model_version: u64,
    arbitration_threshold: f64,
    confidence_mode: ConfidenceMode,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    counters: InferenceStats,
    avg_latency_us: f64,
    throughput: f64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let loaded = state.engine.is_loaded();
    Json(HealthResponse {
        status: if loaded { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks: HealthChecks {
            model_loaded: loaded,
            model_version: state.engine.version(),
            arbitration_threshold: state.engine.router().threshold(),
            confidence_mode: state.engine.router().confidence_mode(),
        },
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot().as_ref().clone())
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let counters = state.engine.stats();
    let uptime = state.engine.uptime();
    Json(StatsResponse {
        avg_latency_us: counters.avg_latency_us(),
        throughput: counters.throughput(uptime),
        uptime_secs: uptime.as_secs(),
        counters,
    })
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> std::result::Result<Json<Prediction>, ApiError> {
    let request: PredictRequest = parse_body(body)?;
    let record = ConnectionRecord::from_raw(&request.fields)?;

    let engine = Arc::clone(&state.engine);
    let prediction = tokio::task::spawn_blocking(move || engine.predict(std::slice::from_ref(&record)))
        .await
        .map_err(join_error)??
        .into_iter()
        .next()
        .unwrap_or_else(Prediction::unknown);

    state
        .status
        .publish(&prediction, request.src_ip.as_deref(), request.dst_ip.as_deref());
    Ok(Json(prediction))
}

async fn classify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> std::result::Result<Json<ClassifyResponse>, ApiError> {
    let request: ClassifyRequest = parse_body(body)?;
    let records = request
        .records
        .iter()
        .map(ConnectionRecord::from_raw)
        .collect::<Result<Vec<_>>>()?;

    let engine = Arc::clone(&state.engine);
    let results = tokio::task::spawn_blocking(move || engine.predict(&records))
        .await
        .map_err(join_error)??;

    tracing::debug!("Classified batch of {}", results.len());
    Ok(Json(ClassifyResponse { results }))
}

async fn reload(State(state): State<Arc<AppState>>) -> std::result::Result<Json<Value>, ApiError> {
    let engine = Arc::clone(&state.engine);
    let path = state.bundle_path.clone();
    tokio::task::spawn_blocking(move || engine.reload(&path))
        .await
        .map_err(join_error)??;

    Ok(Json(json!({
        "reloaded": true,
        "model_version": state.engine.version(),
    })))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| DlhaError::InvalidRecord(e.to_string()))
}

fn join_error(e: tokio::task::JoinError) -> DlhaError {
    DlhaError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// HTTP mapping for pipeline errors
#[derive(Debug)]
pub struct ApiError(DlhaError);

impl From<DlhaError> for ApiError {
    fn from(err: DlhaError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DlhaError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
            DlhaError::UnfitModel(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": self.0.to_string(),
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::features::Verdict;
    use crate::monitor::TrafficStatus;
    use crate::router::ArbitrationRouter;
    use crate::store::ModelStore;
    use crate::training::fixtures::labeled_records;
    use crate::training::Trainer;
    use axum_test::TestServer;

    fn server_with(engine: InferenceEngine, bundle_path: PathBuf) -> TestServer {
        let state = AppState {
            engine: Arc::new(engine),
            status: Arc::new(LiveStatus::new()),
            bundle_path,
        };
        TestServer::new(build_router(state)).unwrap()
    }

    fn trained_server() -> TestServer {
        let bundle = Trainer::new(DetectorConfig::default())
            .train(&labeled_records())
            .unwrap();
        server_with(
            InferenceEngine::with_bundle(bundle, ArbitrationRouter::default()),
            PathBuf::from("unused.json"),
        )
    }

    #[tokio::test]
    async fn test_health() {
        let server = server_with(InferenceEngine::default(), PathBuf::from("unused.json"));
        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["model_loaded"], false);
        assert_eq!(body["checks"]["arbitration_threshold"], 0.8);
        assert_eq!(body["checks"]["confidence_mode"], "raw_maximum");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_predict_updates_status() {
        let server = trained_server();
        let response = server
            .post("/predict")
            .json(&json!({
                "src_ip": "192.168.1.20",
                "dst_ip": "10.0.0.1",
                "protocol_type": "tcp",
                "service": "private",
                "flag": "S0",
                "count": 220,
                "serror_rate": "1.0"
            }))
            .await;
        response.assert_status_ok();
        let prediction: Prediction = response.json();
        assert!((0.0..=1.0).contains(&prediction.confidence));

        let snapshot: StatusSnapshot = server.get("/status").await.json();
        assert_eq!(snapshot.record_count, 1);
        assert_eq!(snapshot.label, prediction.label);
        assert_eq!(snapshot.last_source.as_deref(), Some("192.168.1.20"));
        assert_eq!(snapshot.status, TrafficStatus::from(prediction.label));
    }

    #[tokio::test]
    async fn test_health_reports_router_settings() {
        let router = ArbitrationRouter::new(0.9, ConfidenceMode::ChosenClass);
        let server = server_with(InferenceEngine::new(router), PathBuf::from("unused.json"));

        let body: Value = server.get("/health").await.json();
        assert_eq!(body["checks"]["arbitration_threshold"], 0.9);
        assert_eq!(body["checks"]["confidence_mode"], "chosen_class");
    }

    #[tokio::test]
    async fn test_stats_after_predict() {
        let server = trained_server();
        for service in ["http", "private", "ecr_i"] {
            server
                .post("/predict")
                .json(&json!({"protocol_type": "tcp", "service": service, "flag": "SF"}))
                .await
                .assert_status_ok();
        }

        let response = server.get("/api/v1/stats").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["total_inferences"], 3);
        assert_eq!(
            body["normal_verdicts"].as_u64().unwrap()
                + body["attack_verdicts"].as_u64().unwrap()
                + body["unknown_verdicts"].as_u64().unwrap(),
            3
        );

        let total = body["total_latency_us"].as_f64().unwrap();
        let avg = body["avg_latency_us"].as_f64().unwrap();
        assert!((avg - total / 3.0).abs() < 1e-9);
        assert!(body["throughput"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_classify_batch() {
        let server = trained_server();
        let response = server
            .post("/api/v1/classify")
            .json(&json!({
                "records": [
                    {"protocol_type": "tcp", "service": "http", "flag": "SF", "src_bytes": 250},
                    {"service": "xyz123"},
                    {}
                ]
            }))
            .await;
        response.assert_status_ok();

        let body: ClassifyResponse = response.json();
        assert_eq!(body.results.len(), 3);
        assert!(body.results.iter().all(|p| p.label != Verdict::Unknown));
    }

    #[tokio::test]
    async fn test_malformed_records() {
        let server = trained_server();

        let response = server
            .post("/api/v1/classify")
            .json(&json!({"records": [{"not_a_field": 1}]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .post("/predict")
            .json(&json!({"duration": [1, 2]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_without_model() {
        let server = server_with(InferenceEngine::default(), PathBuf::from("unused.json"));
        let response = server.post("/predict").json(&json!({"duration": 0})).await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        let bundle = Trainer::new(DetectorConfig::default())
            .train(&labeled_records())
            .unwrap();
        ModelStore::save(&bundle, &path).unwrap();

        let server = server_with(InferenceEngine::default(), path);
        let response = server.post("/api/v1/reload").await;
        response.assert_status_ok();

        let body: Value = server.get("/health").await.json();
        assert_eq!(body["checks"]["model_loaded"], true);
        assert_eq!(body["checks"]["model_version"], 1);
    }
}

//! REST API server for the financial assistant
//!
//! Serves the browser page and exposes the agent over JSON endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::FinancialAgent;
use crate::history::{HistoryEntry, QueryHistory, DEFAULT_HISTORY_LIMIT};

pub const SAMPLE_QUERIES: [&str; 4] = [
    "How much did I spend in January 2025 in roubles?",
    "Convert 1000 USD to RUB",
    "Show all spending for the last month",
    "Calculate (500 + 250) * 0.2",
];

const EMPTY_QUERY_ERROR: &str = "Please enter a query.";
const DEFAULT_SESSION_SEED: &str = "anonymous-session";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<FinancialAgent>,
    pub history: QueryHistory,
}

impl ApiState {
    pub fn new(agent: Arc<FinancialAgent>) -> Self {
        Self {
            agent,
            history: QueryHistory::new(),
        }
    }
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn session_uuid(value: Option<&str>) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(DEFAULT_SESSION_SEED),
    }
}

/// =============================
/// Page, Health and Examples
/// =============================

async fn index() -> Html<&'static str> {
    Html(include_str!("ui.html"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn examples() -> Json<ApiResponse> {
    Json(ApiResponse::success(SAMPLE_QUERIES))
}

/// =============================
/// Query Endpoint
/// =============================

async fn run_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let query = req.query.trim();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(EMPTY_QUERY_ERROR.into())),
        );
    }

    let session_id = session_uuid(req.session_id.as_deref());
    info!(session_id = %session_id, query = %query, "Received query");

    let start = Instant::now();
    match state.agent.run(query).await {
        Ok(run) => {
            let elapsed = start.elapsed();
            let answer = run.answer.clone();
            state
                .history
                .record(
                    session_id,
                    HistoryEntry::new(query, answer.clone(), elapsed.as_millis() as u64),
                )
                .await;

            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "session_id": session_id,
                    "answer": answer,
                    "processing_time_secs": elapsed.as_secs_f64(),
                    "run": run,
                }))),
            )
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!(
                    "Error while processing the query: {}",
                    e
                ))),
            )
        }
    }
}

/// =============================
/// History Endpoint
/// =============================

async fn history(
    State(state): State<ApiState>,
    Query(params): Query<HistoryParams>,
) -> Json<ApiResponse> {
    let session_id = session_uuid(params.session_id.as_deref());
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let entries = state.history.recent(session_id, limit).await;
    Json(ApiResponse::success(entries))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/examples", get(examples))
        .route("/api/query", post(run_query))
        .route("/api/history", get(history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<FinancialAgent>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(ApiState::new(agent));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionEngine;
    use crate::llm::{ModelResponse, ScriptedModel};
    use crate::tools::{CalculatorTool, ToolRegistry};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state_with(responses: Vec<ModelResponse>) -> ApiState {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));
        let agent = FinancialAgent::new(
            Arc::new(ScriptedModel::new(responses)),
            ExecutionEngine::new(registry),
            5,
        );
        ApiState::new(Arc::new(agent))
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_query(body: Value) -> Request<Body> {
        Request::post("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_stable_session_ids() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(session_uuid(Some(&id.to_string())), id);
        assert_eq!(session_uuid(Some("browser-tab")), session_uuid(Some("browser-tab")));
        assert_ne!(session_uuid(Some("browser-tab")), session_uuid(Some("other-tab")));
        assert_eq!(session_uuid(Some("  ")), session_uuid(None));
        assert_eq!(session_uuid(Some("browser-tab")).get_version_num(), 4);
    }

    #[tokio::test]
    async fn test_health_and_examples() {
        let router = create_router(state_with(Vec::new()));

        let (status, body) = send(router.clone(), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));

        let (_, body) = send(router, Request::get("/api/examples").body(Body::empty()).unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 4);
        assert_eq!(body["data"][1], json!("Convert 1000 USD to RUB"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let router = create_router(state_with(Vec::new()));
        let (status, body) = send(router, post_query(json!({ "query": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("Please enter a query."));
    }

    #[tokio::test]
    async fn test_query_is_answered_and_recorded() {
        let state = state_with(vec![
            ModelResponse::call("calculator", json!({ "expression": "(500 + 250) * 0.2" })),
            ModelResponse::call("final_answer", json!({ "answer": "150" })),
        ]);
        let router = create_router(state.clone());

        let (status, body) = send(
            router.clone(),
            post_query(json!({ "query": "Calculate (500 + 250) * 0.2", "session_id": "tab-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["answer"], json!("150"));
        assert!(body["data"]["processing_time_secs"].as_f64().is_some());
        assert_eq!(
            body["data"]["run"]["steps"][0]["observations"][0]["tool_output"],
            json!({ "result": 150.0 })
        );

        let (_, body) = send(
            router,
            Request::get("/api/history?session_id=tab-1&limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let entries = body["data"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["query"], json!("Calculate (500 + 250) * 0.2"));
        assert_eq!(entries[0]["response"], json!("150"));
    }

    #[tokio::test]
    async fn test_agent_failure_is_500() {
        let router = create_router(state_with(Vec::new()));
        let (status, body) = send(router, post_query(json!({ "query": "anything" }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Error while processing the query"));
    }

    #[tokio::test]
    async fn test_index_serves_page() {
        let router = create_router(state_with(Vec::new()));
        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/query"));
    }
}

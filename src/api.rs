//! HTTP API for the Commission Engine.
//!
//! This module exposes a minimal REST API around the commission engine
//! using the [`axum`](https://crates.io/crates/axum) framework.  Clients
//! can submit transactions for calculation, replace the loaded rule
//! set, and request a conflict report.

use crate::conflicts::{summarize, ConflictAnalyzer};
use crate::engine::CommissionEngine;
use crate::models::{
    CommissionResult, CommissionRule, ConflictSummary, RuleConflict, Transaction,
};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state shared across requests.
pub struct AppState {
    pub engine: RwLock<CommissionEngine>,
}

/// Conflicts for a rule set plus per-severity counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<RuleConflict>,
    pub summary: ConflictSummary,
}

impl ConflictReport {
    fn new(conflicts: Vec<RuleConflict>) -> Self {
        let summary = summarize(&conflicts);
        Self { conflicts, summary }
    }
}

/// Build the API router around `engine`.  Returns the router and a
/// handle to the state.
pub fn build_router(engine: CommissionEngine) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState {
        engine: RwLock::new(engine),
    });
    (router(state.clone()), state)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/calculate", post(calculate_handler))
        .route("/api/calculate/batch", post(batch_handler))
        .route("/api/conflicts", get(conflicts_handler).post(analyze_handler))
        .route("/api/rules", get(list_rules_handler).put(replace_rules_handler))
        .with_state(state)
}

/// Handler for POST /api/calculate
async fn calculate_handler(
    State(app_state): State<Arc<AppState>>,
    Json(transaction): Json<Transaction>,
) -> Json<CommissionResult> {
    let engine = app_state.engine.read().await;
    Json(engine.calculate_commission(&transaction))
}

/// Handler for POST /api/calculate/batch.  The batch runs on the
/// blocking pool against a snapshot of the engine, so rule updates are
/// not held up by a large batch.
async fn batch_handler(
    State(app_state): State<Arc<AppState>>,
    Json(transactions): Json<Vec<Transaction>>,
) -> impl IntoResponse {
    let engine = app_state.engine.read().await.clone();
    match tokio::task::spawn_blocking(move || engine.calculate_batch_commissions(&transactions)).await {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(err) => {
            log::warn!("batch calculation failed: {}", err);
            let body = Json(serde_json::json!({"error": err.to_string()}));
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

/// Handler for GET /api/conflicts
async fn conflicts_handler(State(app_state): State<Arc<AppState>>) -> Json<ConflictReport> {
    let engine = app_state.engine.read().await;
    Json(ConflictReport::new(engine.analyze_conflicts()))
}

/// Handler for POST /api/conflicts: analyze a rule set without
/// loading it.
async fn analyze_handler(
    State(app_state): State<Arc<AppState>>,
    Json(rules): Json<Vec<CommissionRule>>,
) -> Json<ConflictReport> {
    let engine = app_state.engine.read().await;
    let analyzer = ConflictAnalyzer::from_config(engine.config());
    Json(ConflictReport::new(analyzer.analyze(&rules)))
}

/// Handler for GET /api/rules
async fn list_rules_handler(State(app_state): State<Arc<AppState>>) -> Json<Vec<CommissionRule>> {
    let engine = app_state.engine.read().await;
    Json(engine.rules().to_vec())
}

/// Handler for PUT /api/rules.  The whole set is rejected if any rule
/// fails validation.
async fn replace_rules_handler(
    State(app_state): State<Arc<AppState>>,
    Json(rules): Json<Vec<CommissionRule>>,
) -> impl IntoResponse {
    if let Some(err) = rules.iter().find_map(|r| r.validate().err()) {
        log::warn!("rejected rule set: {}", err);
        let body = Json(serde_json::json!({"error": err.to_string()}));
        return (StatusCode::UNPROCESSABLE_ENTITY, body).into_response();
    }
    let count = rules.len();
    app_state.engine.write().await.set_rules(rules);
    log::info!("replaced rule set with {} rules", count);
    (StatusCode::OK, Json(serde_json::json!({"rules": count}))).into_response()
}

/// Launch the API server.  This function binds to the supplied address
/// and blocks until the server terminates (e.g. when interrupted).
pub async fn serve(addr: &str, engine: CommissionEngine) -> Result<()> {
    let (router, _state) = build_router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::util::ServiceExt; // for `oneshot`

    fn rules() -> Value {
        json!([
            { "id": "r1", "name": "Surgeon share", "type": "doctor", "rateType": "percentage",
              "rate": 15, "category": "surgery" },
            { "id": "r2", "name": "Surgeon share", "type": "doctor", "rateType": "fixed",
              "rate": 50, "category": "surgery" }
        ])
    }

    fn app() -> Router {
        let rules: Vec<CommissionRule> = serde_json::from_value(rules()).unwrap();
        build_router(CommissionEngine::new(rules)).0
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn transaction(id: &str, amount: f64) -> Value {
        json!({ "id": id, "amount": amount, "quantity": 1, "category": "surgery",
                "type": "doctor", "date": "2024-05-06T10:00:00" })
    }

    #[tokio::test]
    async fn test_calculate_endpoint() {
        let (status, body) = send(app(), "POST", "/api/calculate", Some(transaction("t1", 10000.0))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCommission"], json!(1550.0));
        assert_eq!(body["applicableRules"], json!(2));
        assert_eq!(body["calculations"][0]["ruleId"], json!("r1"));
    }

    #[tokio::test]
    async fn test_batch_endpoint() {
        let txs = json!([transaction("a", 100.0), transaction("b", 200.0)]);
        let (status, body) = send(app(), "POST", "/api/calculate/batch", Some(txs)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["transaction"]["id"], json!("a"));
        assert_eq!(body[1]["totalCommission"], json!(80.0));
    }

    #[tokio::test]
    async fn test_conflicts_endpoint() {
        let (status, body) = send(app(), "GET", "/api/conflicts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["total"], json!(2));
        assert_eq!(body["conflicts"][0]["type"], json!("duplicate"));
        assert_eq!(body["conflicts"][1]["type"], json!("overlap"));
    }

    #[tokio::test]
    async fn test_analyze_posted_rules() {
        let posted = json!([
            { "id": "a", "name": "Ward share", "type": "department", "rateType": "percentage",
              "rate": 5, "category": "inpatient" },
            { "id": "b", "name": "Ward bonus", "type": "department", "rateType": "percentage",
              "rate": 40, "category": "inpatient" },
            { "id": "c", "name": "Ward bonus", "type": "department", "rateType": "fixed",
              "rate": 10, "category": "outpatient", "isActive": false }
        ]);
        let (status, body) = send(app(), "POST", "/api/conflicts", Some(posted)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], json!({ "total": 2, "high": 0, "medium": 1, "low": 1 }));
        assert_eq!(body["conflicts"][0]["type"], json!("overlap"));
        assert_eq!(body["conflicts"][1]["type"], json!("hierarchy"));
        assert_eq!(body["conflicts"][0]["rules"][1]["id"], json!("b"));
    }

    #[tokio::test]
    async fn test_batch_accepts_browser_timestamps() {
        let mut iso = transaction("a", 1000.0);
        iso["date"] = json!("2024-05-06T10:00:00.000Z");
        let mut day = transaction("b", 1000.0);
        day["date"] = json!("2024-05-06");
        let (status, body) = send(app(), "POST", "/api/calculate/batch", Some(json!([iso, day]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["totalCommission"], json!(200.0));
        assert_eq!(body[1]["transaction"]["date"], json!("2024-05-06T00:00:00"));
    }

    #[tokio::test]
    async fn test_replace_rules_validates() {
        let (_, state) = build_router(CommissionEngine::default());
        let bad = json!([{ "id": "x", "name": "X", "type": "agent", "rateType": "fixed", "rate": 5,
                           "minAmount": 10, "maxAmount": 1 }]);
        let (status, _) = send(router(state.clone()), "PUT", "/api/rules", Some(bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(state.engine.read().await.rules().is_empty());

        let (status, body) = send(router(state.clone()), "PUT", "/api/rules", Some(rules())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rules"], json!(2));
        let (_, listed) = send(router(state), "GET", "/api/rules", None).await;
        assert_eq!(listed.as_array().map(|a| a.len()), Some(2));
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use common::Error;
use engine::SettingsPatch;

use crate::{auth::require_auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/watchers", get(get_watchers))
        .route("/api/aggregators/:id", patch(patch_aggregator))
        .route("/api/stats", get(get_stats))
        .route("/api/trades", get(get_trades))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Watchers ─────────────────────────────────────────────────────────────────

async fn get_watchers(State(state): State<AppState>) -> Json<Value> {
    let mut groups = Vec::new();
    for group in state.manager.watchers_by_aggregator().await {
        let mut watchers = Vec::with_capacity(group.watchers.len());
        for watcher in &group.watchers {
            watchers.push(json!({
                "id": watcher.id(),
                "strategy": watcher.spec().strategy,
                "contract": watcher.contract(),
                "interval": watcher.interval(),
                "state": watcher.state().snapshot().await,
            }));
        }
        groups.push(json!({
            "aggregator": group.aggregator.id().await,
            "settings": group.aggregator.settings().await,
            "pending_votes": group.aggregator.pending_votes().await,
            "watchers": watchers,
        }));
    }
    Json(json!({ "groups": groups }))
}

// ─── Aggregators ──────────────────────────────────────────────────────────────

async fn patch_aggregator(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> (StatusCode, Json<Value>) {
    match state.manager.update_aggregator(&id, &patch).await {
        Ok(updated) => {
            info!(aggregator = %id, count = updated.len(), "Aggregator settings patched");
            let body: Vec<Value> = updated
                .into_iter()
                .map(|(id, settings)| json!({ "aggregator": id, "settings": settings }))
                .collect();
            (StatusCode::OK, Json(json!({ "updated": body })))
        }
        Err(e @ Error::UnknownAggregator(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        ),
        Err(e) => {
            warn!(aggregator = %id, error = %e, "Aggregator patch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

// ─── Simulation stats ─────────────────────────────────────────────────────────

async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = &state.manager.collaborators().stats;
    Json(json!({
        "summary": stats.summary().await,
        "results": stats.results().await,
    }))
}

// ─── Trades ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TradesQuery {
    contract: Option<String>,
    limit: Option<i64>,
}

async fn get_trades(
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> (StatusCode, Json<Value>) {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let store = &state.manager.collaborators().store;

    match store.query(q.contract.as_deref(), limit).await {
        Ok(trades) => (
            StatusCode::OK,
            Json(json!({ "trades": trades, "limit": limit })),
        ),
        Err(e) => {
            warn!(error = %e, "Trade query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use tower::ServiceExt;

    use common::{Contract, Interval, NoopNotifier, NoopTradeStore, StaticCalendar, TradingMode};
    use engine::{Collaborators, OrderExecutor, SimulationStats, TradeManager};
    use paper::{PaperBroker, ReplayMarketData};
    use strategy::{StrategyRegistry, WatchConfig};

    use crate::{app, AppState};

    fn state() -> AppState {
        let collaborators = Collaborators {
            mode: TradingMode::Simulation,
            executor: Arc::new(OrderExecutor::new(
                Arc::new(PaperBroker::new(10_000.0, 0.0)),
                Duration::ZERO,
            )),
            announcements: Arc::new(StaticCalendar::default()),
            notifier: Arc::new(NoopNotifier),
            store: Arc::new(NoopTradeStore),
            stats: Arc::new(SimulationStats::new()),
        };
        let manager = TradeManager::new(
            Arc::new(ReplayMarketData::new("does-not-exist")),
            Arc::new(StrategyRegistry::with_builtins()),
            collaborators,
        );
        AppState {
            manager,
            trading_mode: TradingMode::Simulation,
            dashboard_token: "secret".into(),
        }
    }

    fn request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, "Bearer secret")
            .header("content-type", "application/json");
        builder
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let response = app(state())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["mode"], "simulation");
    }

    #[tokio::test]
    async fn api_rejects_missing_token() {
        let response = app(state())
            .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let response = app(state())
            .oneshot(request("GET", "/api/stats", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["summary"]["trades"], 0);
        assert!(body["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn patch_updates_a_known_aggregator_and_404s_otherwise() {
        let state = state();
        state
            .manager
            .add_watcher(&WatchConfig {
                strategy: "rsi".into(),
                contract: Contract::crypto("BTCUSDT", "BINANCE"),
                interval: Interval::from_secs(60),
                group: Some("btc".into()),
                min_confirmations: None,
                params: Default::default(),
            })
            .await
            .unwrap();

        let response = app(state.clone())
            .oneshot(request(
                "PATCH",
                "/api/aggregators/btc",
                Some(r#"{"min_confirmations": 3, "entry_enabled": false}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["updated"][0]["settings"]["min_confirmations"], 3);
        assert_eq!(body["updated"][0]["settings"]["entry_enabled"], false);

        let response = app(state.clone())
            .oneshot(request("PATCH", "/api/aggregators/eth", Some("{}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(state.clone())
            .oneshot(request("GET", "/api/watchers", None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["groups"][0]["settings"]["min_confirmations"], 3);
        assert_eq!(body["groups"][0]["watchers"][0]["strategy"], "rsi");

        state.manager.shutdown().await;
    }
}

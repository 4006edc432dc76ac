//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`
//! and written only by the scan loop.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::accountant::{CycleReport, PortfolioSummary};
use crate::types::Position;

/// Cycle reports kept for `/api/cycles`.
pub const CYCLE_HISTORY: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything published by one cycle. Readers always see a summary, its
/// positions and its report from the same cycle.
#[derive(Debug, Default)]
pub struct DashboardView {
    pub portfolio: Option<PortfolioSummary>,
    pub positions: Vec<Position>,
    pub cycles: VecDeque<CycleReport>,
}

pub struct DashboardState {
    pub view: RwLock<DashboardView>,
    pub started: DateTime<Utc>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardState {
    pub fn new() -> Self {
        Self {
            view: RwLock::new(DashboardView {
                cycles: VecDeque::with_capacity(CYCLE_HISTORY),
                ..DashboardView::default()
            }),
            started: Utc::now(),
        }
    }

    /// Replace the published view with the latest cycle.
    pub async fn publish(&self, report: CycleReport, positions: Vec<Position>) {
        let mut view = self.view.write().await;
        view.portfolio = Some(report.summary.clone());
        view.positions = positions;
        if view.cycles.len() == CYCLE_HISTORY {
            view.cycles.pop_front();
        }
        view.cycles.push_back(report);
    }
}

pub type AppState = Arc<DashboardState>;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub cycles: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cycles = state.view.read().await.cycles.len();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.started).num_seconds(),
        cycles,
    })
}

/// GET /api/portfolio (204 until the first cycle completes)
pub async fn get_portfolio(
    State(state): State<AppState>,
) -> Result<Json<PortfolioSummary>, StatusCode> {
    state
        .view
        .read()
        .await
        .portfolio
        .clone()
        .map(Json)
        .ok_or(StatusCode::NO_CONTENT)
}

/// GET /api/positions: OPEN and CLOSING positions.
pub async fn get_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.view.read().await.positions.clone())
}

/// GET /api/cycles, most recent last.
pub async fn get_cycles(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    Json(state.view.read().await.cycles.iter().cloned().collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

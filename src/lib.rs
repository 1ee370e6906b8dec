//! Layaway API Library
//!
//! Installment payment engine: plan creation with schedule generation,
//! idempotent payment recording, gateway charge attempts with retry
//! budgets, and an autopay worker that drains due payments.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tax;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

use crate::gateway::PaymentGateway;
use crate::services::{LedgerService, PlanService};

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub plans: Arc<PlanService>,
    pub ledger: Arc<LedgerService>,
    pub gateway: Arc<dyn PaymentGateway>,
}

/// Uniform success envelope for API responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Versioned API surface, mounted under `/api/v1` by [`app_router`].
pub fn api_v1_routes() -> Router<AppState> {
    handlers::layaway::routes()
}

/// Full application router: versioned API, health probe, Swagger UI,
/// request tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(handlers::health::routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

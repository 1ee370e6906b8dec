use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use layaway_api::{
    config::AppConfig,
    db,
    events,
    gateway::{PaymentGateway, SandboxGateway},
    services::{LedgerService, PlanService},
    tax::StateRateTaxCalculator,
    AppState,
};

/// Test harness backed by a file-based SQLite database in a temp
/// directory. Each harness gets its own database file, so tests can run
/// in parallel without stepping on each other.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub customer_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(SandboxGateway)).await
    }

    /// Construct the harness with a caller-supplied gateway so tests
    /// can script charge outcomes.
    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = db_dir.path().join("layaway_test.db");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let cfg = AppConfig::new(database_url, "test".to_string());

        let pool = db::establish_connection(&cfg.database_url)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let plans = Arc::new(PlanService::new(
            db_arc.clone(),
            Arc::new(StateRateTaxCalculator),
            event_sender.clone(),
            cfg.layaway.clone(),
        ));
        let ledger = Arc::new(LedgerService::new(
            db_arc.clone(),
            event_sender,
            cfg.layaway.clone(),
        ));

        let state = AppState {
            db: db_arc,
            config: cfg,
            plans,
            ledger,
            gateway,
        };

        let router = layaway_api::app_router(state.clone());

        Self {
            router,
            state,
            customer_id: Uuid::new_v4(),
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a request against the router, optionally as a customer.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        customer: Option<Uuid>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(id) = customer {
            builder = builder.header("authorization", format!("Bearer {}", id));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests as the default test customer.
    pub async fn request_as_customer(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.customer_id)).await
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

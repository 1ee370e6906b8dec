mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{response_json, TestApp};
use layaway_api::{
    entities::{PaymentStatus, PlanStatus},
    errors::ServiceError,
    events,
    gateway::{ChargeReceipt, ChargeRequest, PaymentGateway, SandboxGateway},
    services::LedgerService,
    workers::autopay,
};

/// Gateway that never answers within any reasonable deadline.
struct StalledGateway;

#[async_trait]
impl PaymentGateway for StalledGateway {
    async fn charge(&self, _request: ChargeRequest) -> Result<ChargeReceipt, ServiceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("stalled gateway never completes a charge")
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount_minor: i64,
    ) -> Result<ChargeReceipt, ServiceError> {
        Err(ServiceError::gateway("refunds unsupported", false))
    }
}

async fn create_autopay_plan(app: &TestApp, token: &str) -> Value {
    let response = app
        .request_as_customer(
            Method::POST,
            "/api/v1/layaway",
            Some(json!({
                "purchase_amount": 30_000,
                "installment_count": 3,
                "cadence": "monthly",
                "payment_method": "card",
                "jurisdiction": "OR",
                "autopay_enabled": true,
                "payment_method_token": token
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    body["data"].clone()
}

fn ids(plan: &Value) -> (Uuid, Uuid) {
    (
        plan["id"].as_str().unwrap().parse().unwrap(),
        plan["payments"][0]["id"].as_str().unwrap().parse().unwrap(),
    )
}

#[tokio::test]
async fn autopay_pass_charges_due_payments() {
    let app = TestApp::new().await;
    let plan = create_autopay_plan(&app, "tok_visa").await;
    let (plan_id, payment_id) = ids(&plan);

    let gateway = SandboxGateway;
    let policy = app.state.config.layaway.clone();

    // Only the first installment is due; the rest sit in the future.
    let charged = autopay::run_once(&app.state.ledger, &gateway, &policy)
        .await
        .unwrap();
    assert_eq!(charged, 1);

    let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert!(payment.is_autopay);
    // Transaction reference is derived from the fixed idempotency key.
    assert_eq!(
        payment.transaction_id.as_deref(),
        Some(format!("txn_{}", payment_id).as_str())
    );

    let plan = app.state.ledger.get_plan(plan_id).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Active);

    let charged = autopay::run_once(&app.state.ledger, &gateway, &policy)
        .await
        .unwrap();
    assert_eq!(charged, 0);
}

#[tokio::test]
async fn manual_plans_are_ignored_by_autopay() {
    let app = TestApp::new().await;
    let response = app
        .request_as_customer(
            Method::POST,
            "/api/v1/layaway",
            Some(json!({
                "purchase_amount": 30_000,
                "installment_count": 3,
                "cadence": "weekly",
                "payment_method": "card",
                "jurisdiction": "OR"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let charged = autopay::run_once(
        &app.state.ledger,
        &SandboxGateway,
        &app.state.config.layaway,
    )
    .await
    .unwrap();
    assert_eq!(charged, 0);
}

#[tokio::test]
async fn retryable_failures_back_off_then_default_the_plan() {
    let app = TestApp::new().await;
    let plan = create_autopay_plan(&app, "tok_busy").await;
    let (plan_id, payment_id) = ids(&plan);

    let gateway = SandboxGateway;
    let backoff = [3_600i64, 21_600, 86_400];

    // Attempts one and two fail but stay retryable, each pushing the
    // next attempt out per the backoff schedule.
    for (attempt, expected_backoff) in backoff.iter().take(2).enumerate() {
        let plan_row = app.state.ledger.get_plan(plan_id).await.unwrap();
        let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();

        let before = Utc::now();
        let err = app
            .state
            .ledger
            .attempt_charge(&gateway, &plan_row, &payment, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::GatewayError { retryable: true, .. }
        ));

        let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Scheduled);
        assert_eq!(payment.attempt_count, attempt as i32 + 1);
        assert_eq!(payment.last_failure_reason.as_deref(), Some("processor busy"));

        let next = payment.next_attempt_at.unwrap();
        let delay = (next - before).num_seconds();
        assert!(
            (expected_backoff - 5..=expected_backoff + 5).contains(&delay),
            "attempt {} rescheduled {}s out, expected ~{}s",
            attempt + 1,
            delay,
            expected_backoff
        );
    }

    // Backed-off payments are not due, so a pass picks up nothing.
    let charged = autopay::run_once(&app.state.ledger, &gateway, &app.state.config.layaway)
        .await
        .unwrap();
    assert_eq!(charged, 0);

    // Third attempt exhausts the budget: payment fails permanently and
    // the plan defaults.
    let plan_row = app.state.ledger.get_plan(plan_id).await.unwrap();
    let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();
    let err = app
        .state
        .ledger
        .attempt_charge(&gateway, &plan_row, &payment, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GatewayError { .. }));

    let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.attempt_count, 3);

    let plan_row = app.state.ledger.get_plan(plan_id).await.unwrap();
    assert_eq!(plan_row.status, PlanStatus::Defaulted);

    // Defaulted plans accept no further charge attempts.
    let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();
    let err = app
        .state
        .ledger
        .attempt_charge(&gateway, &plan_row, &payment, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PlanClosed(_)));
}

#[tokio::test]
async fn permanent_decline_fails_on_the_first_attempt() {
    let app = TestApp::new().await;
    let plan = create_autopay_plan(&app, "tok_decline_visa").await;
    let (plan_id, payment_id) = ids(&plan);

    let charged = autopay::run_once(
        &app.state.ledger,
        &SandboxGateway,
        &app.state.config.layaway,
    )
    .await
    .unwrap();
    assert_eq!(charged, 0);

    let payment = app.state.ledger.get_payment(plan_id, payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.attempt_count, 1);

    let plan_row = app.state.ledger.get_plan(plan_id).await.unwrap();
    assert_eq!(plan_row.status, PlanStatus::Defaulted);
}

#[tokio::test]
async fn gateway_timeout_is_a_retryable_failure() {
    let app = TestApp::new().await;
    let plan = create_autopay_plan(&app, "tok_visa").await;
    let (plan_id, payment_id) = ids(&plan);

    // Ledger with an immediate deadline so the stalled gateway times
    // out without slowing the test down.
    let mut policy = app.state.config.layaway.clone();
    policy.gateway_timeout_secs = 0;
    let (event_sender, _event_rx) = events::channel(8);
    let ledger = LedgerService::new(app.state.db.clone(), event_sender, policy);

    let plan_row = ledger.get_plan(plan_id).await.unwrap();
    let payment = ledger.get_payment(plan_id, payment_id).await.unwrap();
    let err = ledger
        .attempt_charge(&StalledGateway, &plan_row, &payment, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::GatewayError { retryable: true, .. }
    ));

    // Unknown outcome never burns the plan: the payment goes back to
    // scheduled with its attempt counted.
    let payment = ledger.get_payment(plan_id, payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Scheduled);
    assert_eq!(payment.attempt_count, 1);
    assert!(payment.next_attempt_at.is_some());
    assert!(payment
        .last_failure_reason
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let app = TestApp::new().await;
    let plan = create_autopay_plan(&app, "tok_visa").await;
    let (_, payment_id) = ids(&plan);

    let ledger = app.state.ledger.clone();
    let (a, b) = tokio::join!(
        ledger.claim_for_attempt(payment_id),
        ledger.claim_for_attempt(payment_id)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a ^ b, "exactly one claim may win (got {} and {})", a, b);
}

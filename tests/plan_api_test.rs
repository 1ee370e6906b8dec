mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use common::{response_json, TestApp};
use layaway_api::{
    entities::{Cadence, PaymentMethod},
    errors::ServiceError,
    events,
    services::{plans::CreatePlanRequest, PlanService},
    tax::SalesTaxCalculator,
};

fn plan_payload() -> Value {
    json!({
        "purchase_amount": 100_000,
        "installment_count": 4,
        "cadence": "biweekly",
        "payment_method": "card",
        "jurisdiction": "TX"
    })
}

#[tokio::test]
async fn creates_plan_with_tax_and_exact_schedule() {
    let app = TestApp::new().await;

    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(plan_payload()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let plan = &body["data"];

    assert_eq!(plan["total_amount"], 100_000);
    // 6.25% Texas sales tax on $1,000.00
    assert_eq!(plan["tax_amount"], 6_250);
    assert_eq!(plan["currency"], "USD");
    assert_eq!(plan["status"], "pending");
    assert!(plan["plan_number"]
        .as_str()
        .unwrap()
        .starts_with("LAY-"));

    let payments = plan["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 4);

    // Even division with the remainder on the final installment; the
    // amounts must sum exactly to purchase + tax.
    let amounts: Vec<i64> = payments
        .iter()
        .map(|p| p["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, vec![26_562, 26_562, 26_562, 26_564]);
    assert_eq!(amounts.iter().sum::<i64>(), 106_250);

    for (k, payment) in payments.iter().enumerate() {
        assert_eq!(payment["sequence_index"], k as i64);
        assert_eq!(payment["status"], "scheduled");
        assert_eq!(payment["attempt_count"], 0);
    }

    // Biweekly cadence: due dates step by exactly 14 days.
    let due_dates: Vec<chrono::DateTime<chrono::Utc>> = payments
        .iter()
        .map(|p| p["due_date"].as_str().unwrap().parse().unwrap())
        .collect();
    for pair in due_dates.windows(2) {
        assert_eq!(pair[1] - pair[0], chrono::Duration::days(14));
    }
}

#[tokio::test]
async fn remainder_lands_on_final_installment() {
    let app = TestApp::new().await;

    // Oregon has no sales tax, so the schedule divides the purchase
    // amount alone: 10,000 over 3 -> 3,333 / 3,333 / 3,334.
    let response = app
        .request_as_customer(
            Method::POST,
            "/api/v1/layaway",
            Some(json!({
                "purchase_amount": 10_000,
                "installment_count": 3,
                "cadence": "weekly",
                "payment_method": "card",
                "jurisdiction": "OR"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    assert_eq!(body["data"]["tax_amount"], 0);
    let amounts: Vec<i64> = body["data"]["payments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, vec![3_333, 3_333, 3_334]);
}

#[tokio::test]
async fn rejects_out_of_policy_requests() {
    let app = TestApp::new().await;

    let mut below_minimum = plan_payload();
    below_minimum["purchase_amount"] = json!(5_000);
    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(below_minimum))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut above_maximum = plan_payload();
    above_maximum["purchase_amount"] = json!(600_000);
    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(above_maximum))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut zero_installments = plan_payload();
    zero_installments["installment_count"] = json!(0);
    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(zero_installments))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut too_many_installments = plan_payload();
    too_many_installments["installment_count"] = json!(13);
    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(too_many_installments))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Autopay enrollment requires an instrument on file.
    let mut autopay_without_token = plan_payload();
    autopay_without_token["autopay_enabled"] = json!(true);
    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(autopay_without_token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_jurisdiction_maps_to_bad_gateway() {
    let app = TestApp::new().await;

    let mut payload = plan_payload();
    payload["jurisdiction"] = json!("ZZ");
    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(payload))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

/// Tax collaborator that never answers.
struct StalledTaxCalculator;

#[async_trait]
impl SalesTaxCalculator for StalledTaxCalculator {
    async fn compute(&self, _amount_minor: i64, _jurisdiction: &str) -> Result<i64, ServiceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("stalled tax calculator never resolves")
    }
}

#[tokio::test]
async fn stalled_tax_service_aborts_plan_creation() {
    let app = TestApp::new().await;

    // Plan manager with an immediate tax deadline so the stalled
    // calculator times out without slowing the test down.
    let mut policy = app.state.config.layaway.clone();
    policy.tax_timeout_secs = 0;
    let (event_sender, _event_rx) = events::channel(8);
    let plans = PlanService::new(
        app.state.db.clone(),
        Arc::new(StalledTaxCalculator),
        event_sender,
        policy,
    );

    let request = CreatePlanRequest {
        purchase_amount: 100_000,
        installment_count: 4,
        cadence: Cadence::Biweekly,
        payment_method: PaymentMethod::Card,
        jurisdiction: "TX".to_string(),
        currency: None,
        autopay_enabled: false,
        payment_method_token: None,
    };
    let err = plans.create_plan(Uuid::new_v4(), request).await.unwrap_err();
    assert!(matches!(err, ServiceError::TaxServiceError(_)));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn requires_bearer_identity() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/layaway", Some(plan_payload()), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.request(Method::GET, "/api/v1/layaway", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn plans_are_scoped_to_their_owner() {
    let app = TestApp::new().await;

    let response = app
        .request_as_customer(Method::POST, "/api/v1/layaway", Some(plan_payload()))
        .await;
    let body = response_json(response).await;
    let plan_id = body["data"]["id"].as_str().unwrap().to_string();

    // The owner can fetch it.
    let response = app
        .request_as_customer(Method::GET, &format!("/api/v1/layaway/{}", plan_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A different customer sees a 404, not a 403, so plan ids are not
    // confirmable by probing.
    let stranger = Uuid::new_v4();
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/layaway/{}", plan_id),
            None,
            Some(stranger),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, "/api/v1/layaway", None, Some(stranger))
        .await;
    let body = response_json(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn lists_plans_newest_first() {
    let app = TestApp::new().await;

    for _ in 0..3 {
        let response = app
            .request_as_customer(Method::POST, "/api/v1/layaway", Some(plan_payload()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .request_as_customer(Method::GET, "/api/v1/layaway", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let plans = body["data"].as_array().unwrap();
    assert_eq!(plans.len(), 3);

    let created: Vec<chrono::DateTime<chrono::Utc>> = plans
        .iter()
        .map(|p| p["created_at"].as_str().unwrap().parse().unwrap())
        .collect();
    assert!(created.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[tokio::test]
async fn settings_expose_policy_in_force() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/layaway/settings", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["max_installments"], 12);
    assert_eq!(body["data"]["min_order_amount"], 10_000);
    assert_eq!(body["data"]["max_order_amount"], 500_000);
    assert_eq!(body["data"]["max_attempts"], 3);
}

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

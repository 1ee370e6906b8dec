use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthenticatedCustomer;
use crate::config::LayawayPolicy;
use crate::entities::PaymentMethod;
use crate::errors::ServiceError;
use crate::services::plans::{CreatePlanRequest, PaymentResponse, PlanResponse};
use crate::{ApiResponse, AppState};

/// Manual / off-band payment recording. With a `transaction_id` the
/// charge already happened elsewhere (e.g. a processor webhook) and is
/// recorded as-is; without one, the engine charges the plan's
/// instrument on file right now.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordPaymentRequest {
    #[schema(example = "card")]
    pub payment_method: PaymentMethod,
    /// Processor transaction reference for an already-settled charge
    #[schema(example = "txn_1MqLiJ2eZvKYlo2C")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub is_autopay: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/layaway",
    request_body = CreatePlanRequest,
    responses(
        (status = 201, description = "Plan created with its installment schedule", body = ApiResponse<PlanResponse>),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse),
        (status = 502, description = "Tax service unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Layaway"
)]
pub async fn create_plan(
    State(state): State<AppState>,
    customer: AuthenticatedCustomer,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PlanResponse>>), ServiceError> {
    let plan = state
        .plans
        .create_plan(customer.customer_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(plan))))
}

#[utoipa::path(
    get,
    path = "/api/v1/layaway",
    responses(
        (status = 200, description = "The customer's plans, newest first", body = ApiResponse<Vec<PlanResponse>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Layaway"
)]
pub async fn list_plans(
    State(state): State<AppState>,
    customer: AuthenticatedCustomer,
) -> Result<Json<ApiResponse<Vec<PlanResponse>>>, ServiceError> {
    let plans = state.plans.list_plans(customer.customer_id).await?;
    Ok(Json(ApiResponse::success(plans)))
}

#[utoipa::path(
    get,
    path = "/api/v1/layaway/settings",
    responses(
        (status = 200, description = "Layaway policy currently in force", body = ApiResponse<LayawayPolicy>)
    ),
    tag = "Layaway"
)]
pub async fn get_settings(
    State(state): State<AppState>,
) -> Json<ApiResponse<LayawayPolicy>> {
    Json(ApiResponse::success(state.plans.policy().clone()))
}

#[utoipa::path(
    get,
    path = "/api/v1/layaway/{plan_id}",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan with its ordered payments", body = ApiResponse<PlanResponse>),
        (status = 404, description = "Unknown plan", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Layaway"
)]
pub async fn get_plan(
    State(state): State<AppState>,
    customer: AuthenticatedCustomer,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PlanResponse>>, ServiceError> {
    let plan = state.plans.get_plan(plan_id).await?;
    ensure_owner(&customer, plan.customer_id, plan.id)?;
    Ok(Json(ApiResponse::success(plan)))
}

#[utoipa::path(
    post,
    path = "/api/v1/layaway/{plan_id}/payments/{payment_id}",
    params(
        ("plan_id" = Uuid, Path, description = "Plan id"),
        ("payment_id" = Uuid, Path, description = "Payment id")
    ),
    request_body = RecordPaymentRequest,
    responses(
        (status = 200, description = "Updated payment", body = ApiResponse<PaymentResponse>),
        (status = 404, description = "Unknown plan or payment", body = crate::errors::ErrorResponse),
        (status = 409, description = "Invariant violation or illegal state", body = crate::errors::ErrorResponse),
        (status = 410, description = "Plan is in a terminal state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Layaway"
)]
pub async fn record_payment(
    State(state): State<AppState>,
    customer: AuthenticatedCustomer,
    Path((plan_id, payment_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let plan = state.ledger.get_plan(plan_id).await?;
    ensure_owner(&customer, plan.customer_id, plan.id)?;

    let updated = match request.transaction_id {
        Some(transaction_id) => {
            state
                .ledger
                .record_success(
                    plan_id,
                    payment_id,
                    &transaction_id,
                    request.payment_method,
                    request.is_autopay,
                )
                .await?
        }
        None => {
            let payment = state.ledger.get_payment(plan_id, payment_id).await?;
            state
                .ledger
                .attempt_charge(state.gateway.as_ref(), &plan, &payment, request.is_autopay)
                .await?
        }
    };

    Ok(Json(ApiResponse::success(PaymentResponse::from(updated))))
}

#[utoipa::path(
    get,
    path = "/api/v1/layaway/{plan_id}/payments/{payment_id}",
    params(
        ("plan_id" = Uuid, Path, description = "Plan id"),
        ("payment_id" = Uuid, Path, description = "Payment id")
    ),
    responses(
        (status = 200, description = "Payment details", body = ApiResponse<PaymentResponse>),
        (status = 404, description = "Unknown plan or payment", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Layaway"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    customer: AuthenticatedCustomer,
    Path((plan_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let plan = state.ledger.get_plan(plan_id).await?;
    ensure_owner(&customer, plan.customer_id, plan.id)?;
    let payment = state.ledger.get_payment(plan_id, payment_id).await?;
    Ok(Json(ApiResponse::success(PaymentResponse::from(payment))))
}

#[utoipa::path(
    post,
    path = "/api/v1/layaway/{plan_id}/cancel",
    params(("plan_id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Cancelled plan", body = ApiResponse<PlanResponse>),
        (status = 404, description = "Unknown plan", body = crate::errors::ErrorResponse),
        (status = 409, description = "Plan not cancellable in its current state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Layaway"
)]
pub async fn cancel_plan(
    State(state): State<AppState>,
    customer: AuthenticatedCustomer,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PlanResponse>>, ServiceError> {
    let plan = state.plans.get_plan(plan_id).await?;
    ensure_owner(&customer, plan.customer_id, plan.id)?;
    let cancelled = state.plans.cancel_plan(plan_id).await?;
    Ok(Json(ApiResponse::success(cancelled)))
}

/// Plans belonging to someone else read as absent, never as forbidden,
/// so plan ids cannot be confirmed by probing.
fn ensure_owner(
    customer: &AuthenticatedCustomer,
    owner: Uuid,
    plan_id: Uuid,
) -> Result<(), ServiceError> {
    if owner != customer.customer_id {
        return Err(ServiceError::NotFound(format!("plan {} not found", plan_id)));
    }
    Ok(())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/layaway", post(create_plan).get(list_plans))
        .route("/layaway/settings", get(get_settings))
        .route("/layaway/:plan_id", get(get_plan))
        .route("/layaway/:plan_id/cancel", post(cancel_plan))
        .route(
            "/layaway/:plan_id/payments/:payment_id",
            post(record_payment).get(get_payment),
        )
}

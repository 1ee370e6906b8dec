use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Layaway API",
        version = "0.1.0",
        description = r#"
# Layaway Payment Engine

Creates multi-installment layaway plans, schedules due payments, charges
them manually or via autopay, and keeps each plan's ledger consistent
under retries and concurrent charge attempts.

## Authentication

Endpoints under `/api/v1/layaway` expect a resolved customer identity as
a bearer token:

```
Authorization: Bearer <customer-uuid>
```

## Error Handling

Errors use a consistent JSON shape with appropriate status codes; `409`
marks invariant violations and illegal state transitions, `410` marks
payment activity against a plan that already reached a terminal state.
"#
    ),
    paths(
        crate::handlers::layaway::create_plan,
        crate::handlers::layaway::list_plans,
        crate::handlers::layaway::get_settings,
        crate::handlers::layaway::get_plan,
        crate::handlers::layaway::record_payment,
        crate::handlers::layaway::get_payment,
        crate::handlers::layaway::cancel_plan,
    ),
    components(schemas(
        crate::services::plans::CreatePlanRequest,
        crate::services::plans::PlanResponse,
        crate::services::plans::PaymentResponse,
        crate::handlers::layaway::RecordPaymentRequest,
        crate::config::LayawayPolicy,
        crate::entities::PlanStatus,
        crate::entities::PaymentStatus,
        crate::entities::PaymentMethod,
        crate::entities::Cadence,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Layaway", description = "Layaway plan and payment operations")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the OpenAPI document at
/// `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

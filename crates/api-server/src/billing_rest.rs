//! Portal billing endpoints and the Stripe/Paddle webhook receivers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use saas_billing::plans::PublicPlan;
use saas_billing::subscriptions::Subscription;
use saas_billing::webhooks::WebhookOutcome;
use saas_core::types::AuditAction;
use saas_platform::audit::AuditRecord;
use saas_platform::rate_limit::policies;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::PortalUser;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::rest::{AppState, ErrorResponse};

const RECENT_PAYMENTS: usize = 10;

// ─── Portal billing ────────────────────────────────────────────────────────

/// GET /api/portal/billing/plans: Active plans for the pricing page.
#[utoipa::path(
    get,
    path = "/api/portal/billing/plans",
    tag = "Billing",
    responses((status = 200, description = "Active plans", body = [PublicPlan]))
)]
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PublicPlan>> {
    Json(state.plans.public_catalog())
}

/// GET /api/portal/billing/subscriptions
#[utoipa::path(
    get,
    path = "/api/portal/billing/subscriptions",
    tag = "Billing",
    responses((status = 200, description = "The caller's subscriptions", body = [Subscription]))
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
) -> Json<Vec<Subscription>> {
    Json(state.subscriptions.list_for_customer(session.id()))
}

/// GET /api/portal/billing/subscriptions/:id: With recent payments.
#[utoipa::path(
    get,
    path = "/api/portal/billing/subscriptions/{id}",
    tag = "Billing",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription detail", body = SubscriptionDetail),
        (status = 404, description = "Not found or not owned", body = ErrorResponse),
    )
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionDetail>> {
    let subscription = state
        .subscriptions
        .get_for_customer(id, session.id())
        .ok_or_else(|| ApiError::not_found("Subscription not found"))?;
    let plan = subscription
        .plan_id
        .and_then(|plan_id| state.plans.get(plan_id))
        .map(|plan| PublicPlan::from(&plan));
    Ok(Json(SubscriptionDetail {
        recent_payments: state.subscriptions.payments_for(id, RECENT_PAYMENTS),
        plan,
        subscription,
    }))
}

/// POST /api/portal/billing/cancel-subscription: Cancel at period end.
#[utoipa::path(
    post,
    path = "/api/portal/billing/cancel-subscription",
    tag = "Billing",
    request_body = CancelSubscriptionRequest,
    responses(
        (status = 200, description = "Cancellation scheduled", body = Subscription),
        (status = 400, description = "Already canceled", body = ErrorResponse),
    )
)]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Json(req): Json<CancelSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    state.check_rate(&policies::PORTAL_CANCEL_SUBSCRIPTION, &session.caller())?;
    let subscription = state
        .subscriptions
        .request_cancel(req.subscription_id, session.id())?;
    state.audit.record(
        &session.actor(),
        AuditRecord::new(AuditAction::Update, "subscription", subscription.id)
            .new_values(json!({ "cancel_at_period_end": true })),
    );
    info!(subscription_id = %subscription.id, customer_id = %session.id(), "Subscription cancellation requested");
    Ok(Json(subscription))
}

/// GET /api/portal/billing/usage: Storage and seat usage across tenants.
#[utoipa::path(
    get,
    path = "/api/portal/billing/usage",
    tag = "Billing",
    responses((status = 200, description = "Usage overview", body = UsageOverview))
)]
pub async fn usage(State(state): State<AppState>, PortalUser(session): PortalUser) -> Json<UsageOverview> {
    let tenants = state
        .tenants
        .list_for_customer(session.id())
        .into_iter()
        .filter(|t| t.is_live())
        .map(|t| {
            let percentages = state
                .plans
                .get(t.plan_id)
                .map(|plan| t.usage_percentages(&plan.quota()));
            TenantUsage {
                tenant_id: t.id,
                name: t.name,
                slug: t.slug,
                state: t.state,
                db_size_bytes: t.db_size_bytes,
                filestore_size_bytes: t.filestore_size_bytes,
                current_users: t.current_users,
                percentages,
            }
        })
        .collect();
    Json(UsageOverview {
        tenants,
        quota: state.quota_summary(&session.customer),
    })
}

// ─── Webhooks ──────────────────────────────────────────────────────────────

fn acknowledge(state: &AppState, outcome: WebhookOutcome) -> Json<WebhookAck> {
    let applied = state.lifecycle.apply_follow_ups(outcome.follow_ups);
    if applied > 0 {
        info!(
            provider = %outcome.provider,
            event_id = %outcome.event_id,
            applied,
            "Applied webhook follow-ups"
        );
    }
    Json(WebhookAck {
        status: outcome.status.as_str().to_string(),
        event_id: outcome.event_id,
        event_type: outcome.event_type,
    })
}

fn signature<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /webhooks/stripe
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Bad signature or payload", body = ErrorResponse),
    )
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let outcome = state
        .webhooks
        .handle_stripe(signature(&headers, "stripe-signature"), &body)?;
    Ok(acknowledge(&state, outcome))
}

/// POST /webhooks/paddle
#[utoipa::path(
    post,
    path = "/webhooks/paddle",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Bad signature or payload", body = ErrorResponse),
    )
)]
pub async fn paddle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let outcome = state
        .webhooks
        .handle_paddle(signature(&headers, "paddle-signature"), &body)?;
    Ok(acknowledge(&state, outcome))
}

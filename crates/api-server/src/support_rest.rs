//! Portal support ticket endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use saas_core::types::{Page, PageRequest};
use saas_platform::rate_limit::policies;
use saas_platform::support::{NewTicket, SupportTicket, TicketFilter, TicketStats};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::PortalUser;
use crate::error::ApiResult;
use crate::rest::{AppState, ErrorResponse};

const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TicketReply {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TicketList {
    #[serde(flatten)]
    pub page: Page<SupportTicket>,
    pub stats: TicketStats,
}

/// GET /api/portal/support: The caller's tickets plus per-status counts.
#[utoipa::path(
    get,
    path = "/api/portal/support",
    tag = "Support",
    responses((status = 200, description = "Paginated tickets with stats"))
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Query(filter): Query<TicketFilter>,
    Query(page): Query<PageRequest>,
) -> Json<TicketList> {
    Json(TicketList {
        page: state
            .support
            .list(session.id(), &filter, page.clamped(MAX_PER_PAGE)),
        stats: state.support.stats(session.id()),
    })
}

/// POST /api/portal/support
#[utoipa::path(
    post,
    path = "/api/portal/support",
    tag = "Support",
    request_body = NewTicket,
    responses(
        (status = 201, description = "Ticket opened", body = SupportTicket),
        (status = 400, description = "Invalid subject or description", body = ErrorResponse),
    )
)]
pub async fn create_ticket(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Json(new): Json<NewTicket>,
) -> ApiResult<(StatusCode, Json<SupportTicket>)> {
    state.check_rate(&policies::PORTAL_SUPPORT_CREATE, &session.caller())?;
    let ticket = state.support.create(session.id(), new)?;
    metrics::counter!("support.tickets.created").increment(1);
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// GET /api/portal/support/:id
#[utoipa::path(
    get,
    path = "/api/portal/support/{id}",
    tag = "Support",
    params(("id" = Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Ticket", body = SupportTicket),
        (status = 404, description = "Not found or not owned", body = ErrorResponse),
    )
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SupportTicket>> {
    Ok(Json(state.support.get(session.id(), id)?))
}

/// PUT /api/portal/support/:id: Add a customer response.
#[utoipa::path(
    put,
    path = "/api/portal/support/{id}",
    tag = "Support",
    params(("id" = Uuid, Path, description = "Ticket id")),
    request_body = TicketReply,
    responses(
        (status = 200, description = "Response added", body = SupportTicket),
        (status = 400, description = "Ticket is closed", body = ErrorResponse),
    )
)]
pub async fn reply_ticket(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
    Json(reply): Json<TicketReply>,
) -> ApiResult<Json<SupportTicket>> {
    Ok(Json(state.support.respond(session.id(), id, &reply.message)?))
}

/// POST /api/portal/support/:id/close
#[utoipa::path(
    post,
    path = "/api/portal/support/{id}/close",
    tag = "Support",
    params(("id" = Uuid, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Ticket closed", body = SupportTicket),
        (status = 400, description = "Ticket already closed", body = ErrorResponse),
    )
)]
pub async fn close_ticket(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SupportTicket>> {
    Ok(Json(state.support.close(session.id(), id)?))
}

//! Bearer token extractors for the admin and portal APIs.
//!
//! Handlers take [`AdminUser`] or [`PortalUser`] as an argument; a request
//! without a valid access token for that audience never reaches them.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use saas_core::types::Actor;
use saas_platform::auth::{Audience, AuthError, Claims, TokenKind};
use saas_platform::customers::Customer;
use std::convert::Infallible;

use crate::error::ApiError;
use crate::rest::AppState;

/// Where a request came from, for rate limiting and the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    fn from_parts(parts: &Parts) -> Self {
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        // First hop of X-Forwarded-For is the original client.
        let ip = header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .or_else(|| header_str("x-real-ip"));
        Self {
            ip,
            user_agent: header_str(header::USER_AGENT.as_str()),
        }
    }

    /// Rate limit key for unauthenticated requests.
    pub fn caller(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }

    pub fn anonymous_actor(&self, email: Option<&str>) -> Actor {
        Actor {
            email: email.map(str::to_string),
            ip_address: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            ..Default::default()
        }
    }

    pub fn actor_for(&self, customer: &Customer, session_id: Option<&str>) -> Actor {
        Actor {
            id: Some(customer.id),
            email: Some(customer.email.clone()),
            role: Some(customer.role),
            ip_address: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            session_id: session_id.map(str::to_string),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// An authenticated account plus the token that proved it.
#[derive(Debug, Clone)]
pub struct Session {
    pub customer: Customer,
    pub claims: Claims,
    pub client: ClientInfo,
}

impl Session {
    pub fn id(&self) -> uuid::Uuid {
        self.customer.id
    }

    pub fn actor(&self) -> Actor {
        self.client.actor_for(&self.customer, Some(&self.claims.jti))
    }

    /// Rate limit key for authenticated requests.
    pub fn caller(&self) -> String {
        self.customer.id.to_string()
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Authorization header with Bearer token required"))
}

fn authenticate(parts: &Parts, state: &AppState, audience: Audience) -> Result<Session, ApiError> {
    let token = bearer_token(parts)?;
    let claims = state.auth.verify(token, audience, TokenKind::Access)?;
    let customer = state
        .customers
        .get(claims.sub)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;
    if !customer.is_active {
        return Err(AuthError::AccountDisabled.into());
    }
    Ok(Session {
        customer,
        claims,
        client: ClientInfo::from_parts(parts),
    })
}

/// A caller holding an admin-audience access token for an admin account.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = authenticate(parts, state, Audience::Admin)?;
        if !session.customer.is_admin() {
            return Err(AuthError::InsufficientRole.into());
        }
        Ok(Self(session))
    }
}

/// A caller holding a portal-audience access token.
#[derive(Debug, Clone)]
pub struct PortalUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for PortalUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, Audience::Portal).map(Self)
    }
}

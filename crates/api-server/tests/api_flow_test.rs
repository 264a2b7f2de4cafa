//! End-to-end tests for the HTTP surface, driven through the router with
//! an in-memory provisioner and a capturing notifier.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use saas_api::{build_router, AppState};
use saas_billing::plans::NewPlan;
use saas_billing::webhooks::stripe_signature_header;
use saas_core::config::AppConfig;
use saas_core::types::CustomerRole;
use saas_jobs::CapturingNotifier;
use saas_ops::provisioner::InMemoryProvisioner;
use saas_platform::customers::NewCustomer;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_test";
const PASSWORD: &str = "Sup3r!Secret";

struct Harness {
    state: AppState,
    router: Router,
    notifier: Arc<CapturingNotifier>,
    plan_id: Uuid,
}

fn harness() -> Harness {
    let mut config = AppConfig::default();
    config.auth.password_hash_memory_kib = 256;
    config.auth.password_hash_iterations = 1;
    config.billing.stripe_webhook_secret = WEBHOOK_SECRET.to_string();
    config.odoo.dev_mode = true;

    let notifier = Arc::new(CapturingNotifier::new());
    let state = AppState::new(config, Arc::new(InMemoryProvisioner::new()), notifier.clone())
        .expect("state");
    let plan_id = state
        .plans
        .create(NewPlan::named("Starter"))
        .expect("plan")
        .id;

    let hash = state.auth.hash_password(PASSWORD).expect("hash");
    let mut admin = NewCustomer::new("ops@example.com", hash);
    admin.role = CustomerRole::Admin;
    admin.is_verified = true;
    state.customers.create(admin).expect("admin");

    Harness {
        router: build_router(state.clone()),
        state,
        notifier,
        plan_id,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

async fn register(h: &Harness, email: &str) -> String {
    let (status, body) = send(
        &h.router,
        json_request(
            "POST",
            "/api/portal/auth/register",
            None,
            json!({ "email": email, "password": PASSWORD, "first_name": "Ada" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["access_token"].as_str().expect("token").to_string()
}

async fn admin_token(h: &Harness) -> String {
    let (status, body) = send(
        &h.router,
        json_request(
            "POST",
            "/api/admin/auth/login",
            None,
            json!({ "email": "ops@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["access_token"].as_str().expect("token").to_string()
}

async fn create_tenant(h: &Harness, token: &str, slug: &str) -> (StatusCode, Value) {
    send(
        &h.router,
        json_request(
            "POST",
            "/api/portal/tenants",
            Some(token),
            json!({ "name": "Acme", "slug": slug, "plan_id": h.plan_id }),
        ),
    )
    .await
}

#[tokio::test]
async fn test_health_and_openapi() {
    let h = harness();

    let (status, body) = send(&h.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queued_jobs"], 0);

    let (status, _) = send(&h.router, get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.router, get("/api-docs/openapi.json", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/admin/tenants"].is_object());
}

#[tokio::test]
async fn test_auth_required_and_role_enforced() {
    let h = harness();

    let (status, body) = send(&h.router, get("/api/admin/tenants", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap_or_default().contains("Bearer"));

    let (status, _) = send(&h.router, get("/api/portal/tenants", Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A portal token is not valid on the admin surface.
    let portal = register(&h, "owner@example.com").await;
    let (status, _) = send(&h.router, get("/api/admin/tenants", Some(&portal))).await;
    assert!(status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN);

    let admin = admin_token(&h).await;
    let (status, body) = send(&h.router, get("/api/admin/tenants", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_non_admin_cannot_log_into_admin_console() {
    let h = harness();
    register(&h, "owner@example.com").await;

    let (status, _) = send(
        &h.router,
        json_request(
            "POST",
            "/api/admin/auth/login",
            None,
            json!({ "email": "owner@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_concurrent_logins_share_one_worker() {
    let h = harness();
    register(&h, "owner@example.com").await;

    let mut logins = Vec::new();
    for _ in 0..4 {
        let router = h.router.clone();
        logins.push(tokio::spawn(async move {
            send(
                &router,
                json_request(
                    "POST",
                    "/api/portal/auth/login",
                    None,
                    json!({ "email": "owner@example.com", "password": PASSWORD }),
                ),
            )
            .await
        }));
    }
    let (status, body) = send(&h.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    for login in logins {
        let (status, body) = login.await.expect("join");
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["access_token"].is_string());
    }
}

#[tokio::test]
async fn test_duplicate_email_and_weak_password() {
    let h = harness();
    register(&h, "owner@example.com").await;

    let (status, body) = send(
        &h.router,
        json_request(
            "POST",
            "/api/portal/auth/register",
            None,
            json!({ "email": "OWNER@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, _) = send(
        &h.router,
        json_request(
            "POST",
            "/api/portal/auth/register",
            None,
            json!({ "email": "weak@example.com", "password": "password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tenant_provisioning_flow() {
    let h = harness();
    let token = register(&h, "owner@example.com").await;

    let (status, body) = create_tenant(&h, &token, "acme").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["tenant"]["state"], "creating");
    let tenant_id = body["tenant"]["id"].as_str().expect("id").to_string();

    assert!(h.state.executor.drain().await >= 1);

    let (status, body) = send(&h.router, get(&format!("/api/portal/tenants/{tenant_id}"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "active");
    assert_eq!(body["plan"]["name"], "Starter");
    assert_eq!(h.notifier.count_kind("welcome"), 1);

    // Registered accounts get a single tenant.
    let (status, _) = create_tenant(&h, &token, "acme-two").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_suspended_tenant_cannot_be_backed_up() {
    let h = harness();
    let token = register(&h, "owner@example.com").await;
    let (status, body) = create_tenant(&h, &token, "acme").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let tenant_id = body["tenant"]["id"].as_str().expect("id").to_string();
    h.state.executor.drain().await;

    let (status, _) = send(
        &h.router,
        json_request("POST", &format!("/api/portal/tenants/{tenant_id}/backup"), Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    h.state.executor.drain().await;

    let (status, detail) = send(&h.router, get(&format!("/api/portal/tenants/{tenant_id}"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["latest_restore_point"]["status"], "completed");

    let admin = admin_token(&h).await;
    let (status, body) = send(
        &h.router,
        json_request("POST", &format!("/api/admin/tenants/{tenant_id}/suspend"), Some(&admin), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "suspended");

    for (uri, token) in [
        (format!("/api/portal/tenants/{tenant_id}/backup"), token.as_str()),
        (format!("/api/admin/tenants/{tenant_id}/backup"), admin.as_str()),
    ] {
        let (status, body) = send(&h.router, json_request("POST", &uri, Some(token), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn test_slug_conflict_and_ownership() {
    let h = harness();
    let owner = register(&h, "owner@example.com").await;
    let other = register(&h, "other@example.com").await;

    let (status, body) = create_tenant(&h, &owner, "acme").await;
    assert_eq!(status, StatusCode::CREATED);
    let tenant_id = body["tenant"]["id"].as_str().expect("id").to_string();

    let (status, _) = create_tenant(&h, &other, "acme").await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Someone else's tenant looks exactly like a missing one.
    let (status, _) = send(&h.router, get(&format!("/api/portal/tenants/{tenant_id}"), Some(&other))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&h.router, get("/api/portal/tenants", Some(&other))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_login_rate_limited() {
    let h = harness();
    let attempt = || {
        json_request(
            "POST",
            "/api/admin/auth/login",
            None,
            json!({ "email": "ops@example.com", "password": "wrong" }),
        )
    };

    for _ in 0..5 {
        let (status, _) = send(&h.router, attempt()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let response = h.router.clone().oneshot(attempt()).await.expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

fn stripe_request(body: &[u8], signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(body.to_vec()))
        .expect("request")
}

#[tokio::test]
async fn test_stripe_webhook_signature_and_idempotency() {
    let h = harness();
    let body = json!({
        "id": "evt_123",
        "type": "charge.refunded",
        "data": { "object": {} },
    })
    .to_string();
    let now = chrono::Utc::now().timestamp();

    let (status, _) = send(&h.router, stripe_request(body.as_bytes(), "t=1,v1=deadbeef")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let signature = stripe_signature_header(WEBHOOK_SECRET, now, body.as_bytes());
    let (status, ack) = send(&h.router, stripe_request(body.as_bytes(), &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "ignored");
    assert_eq!(ack["event_id"], "evt_123");

    let (status, ack) = send(&h.router, stripe_request(body.as_bytes(), &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "already_processed");
}

#[tokio::test]
async fn test_support_ticket_flow() {
    let h = harness();
    let token = register(&h, "owner@example.com").await;

    let (status, ticket) = send(
        &h.router,
        json_request(
            "POST",
            "/api/portal/support",
            Some(&token),
            json!({
                "subject": "Cannot log in",
                "description": "The login page keeps reloading.",
                "category": "technical",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{ticket}");
    let id = ticket["id"].as_str().expect("id").to_string();

    let admin = admin_token(&h).await;
    let (status, resolved) = send(
        &h.router,
        json_request(
            "POST",
            &format!("/api/admin/support/{id}/resolve"),
            Some(&admin),
            json!({ "resolution": "Cleared the session cache" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{resolved}");
    assert_eq!(resolved["status"], "resolved");

    // Customers cannot resolve their own tickets.
    let (status, _) = send(
        &h.router,
        json_request(
            "POST",
            &format!("/api/admin/support/{id}/resolve"),
            Some(&token),
            json!({ "resolution": "done" }),
        ),
    )
    .await;
    assert!(status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN);

    let (status, closed) = send(
        &h.router,
        json_request("POST", &format!("/api/portal/support/{id}/close"), Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "closed");

    let (status, body) = send(&h.router, get("/api/portal/support", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["closed"], 1);
}

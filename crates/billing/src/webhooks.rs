//! Stripe and Paddle webhook intake: signature checks, idempotent event
//! claims, and translation of provider events into subscription and
//! payment records.
//!
//! Tenant side effects are not applied here. Processing returns
//! [`FollowUp`]s that the caller turns into notifications or tenant
//! suspensions.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use saas_core::config::BillingConfig;
use saas_core::types::{BillingProvider, SubscriptionStatus};
use saas_platform::customers::{Customer, CustomerDirectory};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::plans::PlanCatalog;
use crate::subscriptions::{
    BillingInterval, NewPaymentEvent, PaymentStatus, SubscriptionChange, SubscriptionLedger,
    SubscriptionSync,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature timestamp outside tolerance")]
    StaleTimestamp,

    #[error("{0} webhook secret is not configured")]
    NotConfigured(BillingProvider),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Processing failed: {0}")]
    Processing(String),
}

impl WebhookError {
    /// Errors the provider should not retry without changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidSignature
                | WebhookError::StaleTimestamp
                | WebhookError::MalformedPayload(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    #[serde(rename = "success")]
    Processed,
    Ignored,
    AlreadyProcessed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Processed => "success",
            WebhookStatus::Ignored => "ignored",
            WebhookStatus::AlreadyProcessed => "already_processed",
        }
    }
}

/// Customer-facing messages raised by billing events.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingNotice {
    TrialEnding {
        customer_id: Uuid,
        subscription_id: Uuid,
        trial_end: Option<DateTime<Utc>>,
    },
    PaymentFailed {
        customer_id: Uuid,
        subscription_id: Uuid,
        amount: f64,
        currency: String,
    },
}

/// Work the caller must carry out after an event is recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    Notify(BillingNotice),
    SuspendForBilling { customer_id: Uuid },
    RestoreFromBilling { customer_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub provider: BillingProvider,
    pub event_id: String,
    pub event_type: String,
    pub status: WebhookStatus,
    pub follow_ups: Vec<FollowUp>,
}

/// Check a `Stripe-Signature` header.
///
/// Accepts `t=<unix>,v1=<hex>[,v1=<hex>...]`, where the MAC covers
/// `"<t>.<body>"`, as well as a bare `v1=<hex>` or `<hex>` over the body.
pub fn verify_stripe_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<&str> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',').map(str::trim) {
        match part.split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => candidates.push(v),
            Some(_) => {}
            None => candidates.push(part),
        }
    }
    if candidates.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    if let Some(ts) = timestamp {
        check_timestamp(ts, tolerance_secs, now)?;
        mac.update(ts.as_bytes());
        mac.update(b".");
    }
    mac.update(body);

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|sig| mac.clone().verify_slice(&sig).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Check a `Paddle-Signature` header of the form `ts=<unix>;h1=<hex>`.
/// The MAC covers `"<ts>:<body>"`.
pub fn verify_paddle_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(';').map(str::trim) {
        match part.split_once('=') {
            Some(("ts", v)) => timestamp = Some(v),
            Some(("h1", v)) => signature = Some(v),
            _ => {}
        }
    }
    let (ts, sig) = timestamp
        .zip(signature)
        .ok_or(WebhookError::InvalidSignature)?;
    check_timestamp(ts, tolerance_secs, now)?;

    let sig = hex::decode(sig).map_err(|_| WebhookError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(ts.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&sig)
        .map_err(|_| WebhookError::InvalidSignature)
}

fn check_timestamp(ts: &str, tolerance_secs: i64, now: DateTime<Utc>) -> Result<(), WebhookError> {
    let ts: i64 = ts.parse().map_err(|_| WebhookError::InvalidSignature)?;
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.timestamp().abs_diff(ts) > tolerance {
        return Err(WebhookError::StaleTimestamp);
    }
    Ok(())
}

fn hmac_hex(secret: &str, parts: &[&[u8]]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}

/// Build a `Stripe-Signature` header value, as Stripe would send it.
pub fn stripe_signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let ts = timestamp.to_string();
    let sig = hmac_hex(secret, &[ts.as_bytes(), b".", body]);
    format!("t={ts},v1={sig}")
}

/// Build a `Paddle-Signature` header value.
pub fn paddle_signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let ts = timestamp.to_string();
    let sig = hmac_hex(secret, &[ts.as_bytes(), b":", body]);
    format!("ts={ts};h1={sig}")
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn time_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn cents_at(value: &Value, pointer: &str) -> f64 {
    value.pointer(pointer).and_then(Value::as_f64).unwrap_or(0.0) / 100.0
}

fn parse_status(raw: &str) -> Result<SubscriptionStatus, WebhookError> {
    SubscriptionStatus::from_provider(raw)
        .ok_or_else(|| WebhookError::Processing(format!("unknown subscription status '{raw}'")))
}

type Processed = (WebhookStatus, Vec<FollowUp>);

/// Webhook processor for both providers.
pub struct WebhookProcessor {
    customers: Arc<CustomerDirectory>,
    plans: Arc<PlanCatalog>,
    ledger: Arc<SubscriptionLedger>,
    config: BillingConfig,
    /// Claimed `(provider, event id)` pairs.
    claims: DashMap<String, DateTime<Utc>>,
}

impl WebhookProcessor {
    pub fn new(
        customers: Arc<CustomerDirectory>,
        plans: Arc<PlanCatalog>,
        ledger: Arc<SubscriptionLedger>,
        config: BillingConfig,
    ) -> Self {
        Self {
            customers,
            plans,
            ledger,
            config,
            claims: DashMap::new(),
        }
    }

    fn claim_key(provider: BillingProvider, event_id: &str) -> String {
        format!("{}:{}", provider.as_str(), event_id)
    }

    /// Atomically claim an event. Returns false when it was already claimed.
    pub fn claim(&self, provider: BillingProvider, event_id: &str) -> bool {
        match self.claims.entry(Self::claim_key(provider, event_id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            }
        }
    }

    pub fn release(&self, provider: BillingProvider, event_id: &str) {
        self.claims.remove(&Self::claim_key(provider, event_id));
    }

    pub fn processed_events(&self) -> usize {
        self.claims.len()
    }

    /// Forget claims older than `older_than`. Returns how many were dropped.
    pub fn purge_claims(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let before = self.claims.len();
        self.claims.retain(|_, claimed_at| *claimed_at >= cutoff);
        before.saturating_sub(self.claims.len())
    }

    fn run_claimed(
        &self,
        provider: BillingProvider,
        event_id: String,
        event_type: String,
        process: impl FnOnce() -> Result<Processed, WebhookError>,
    ) -> Result<WebhookOutcome, WebhookError> {
        metrics::counter!("webhooks.received", "provider" => provider.as_str()).increment(1);

        if !self.claim(provider, &event_id) {
            info!(provider = %provider, event_id = %event_id, "Webhook event already processed");
            metrics::counter!("webhooks.duplicates", "provider" => provider.as_str()).increment(1);
            return Ok(WebhookOutcome {
                provider,
                event_id,
                event_type,
                status: WebhookStatus::AlreadyProcessed,
                follow_ups: Vec::new(),
            });
        }

        match process() {
            Ok((status, follow_ups)) => {
                info!(
                    provider = %provider,
                    event_id = %event_id,
                    event_type = %event_type,
                    status = ?status,
                    "Webhook processed"
                );
                Ok(WebhookOutcome {
                    provider,
                    event_id,
                    event_type,
                    status,
                    follow_ups,
                })
            }
            Err(e) => {
                self.release(provider, &event_id);
                warn!(provider = %provider, event_id = %event_id, error = %e, "Webhook processing failed");
                metrics::counter!("webhooks.failed", "provider" => provider.as_str()).increment(1);
                Err(e)
            }
        }
    }

    fn enforcement(
        &self,
        customer_id: Uuid,
        before: Option<SubscriptionStatus>,
        after: SubscriptionStatus,
    ) -> Option<FollowUp> {
        if !self.config.enforce_subscription_state {
            return None;
        }
        if after.is_delinquent() && before != Some(after) {
            Some(FollowUp::SuspendForBilling { customer_id })
        } else if after.is_good_standing() && before.is_some_and(|b| !b.is_good_standing()) {
            Some(FollowUp::RestoreFromBilling { customer_id })
        } else {
            None
        }
    }

    // ── Stripe ──────────────────────────────────────────────────────────

    pub fn handle_stripe(&self, signature: Option<&str>, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        if self.config.stripe_webhook_secret.is_empty() {
            return Err(WebhookError::NotConfigured(BillingProvider::Stripe));
        }
        verify_stripe_signature(
            &self.config.stripe_webhook_secret,
            signature,
            body,
            self.config.webhook_tolerance_secs,
            Utc::now(),
        )?;

        let event: Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        let event_id = str_at(&event, "/id")
            .ok_or_else(|| WebhookError::MalformedPayload("missing event id".into()))?
            .to_string();
        let event_type = str_at(&event, "/type").unwrap_or_default().to_string();

        self.run_claimed(BillingProvider::Stripe, event_id, event_type.clone(), || {
            self.process_stripe(&event_type, &event)
        })
    }

    fn process_stripe(&self, event_type: &str, event: &Value) -> Result<Processed, WebhookError> {
        let object = event
            .pointer("/data/object")
            .ok_or_else(|| WebhookError::Processing("missing data.object".into()))?;

        match event_type {
            "customer.subscription.created" => self.sync_stripe_subscription(object),
            "customer.subscription.updated" => {
                let external_id = str_at(object, "/id")
                    .ok_or_else(|| WebhookError::Processing("missing subscription id".into()))?;
                if self.ledger.find_external(BillingProvider::Stripe, external_id).is_none() {
                    return self.sync_stripe_subscription(object);
                }
                let status = parse_status(str_at(object, "/status").unwrap_or("active"))?;
                let change = SubscriptionChange {
                    status: Some(status),
                    current_period_start: time_at(object, "/current_period_start"),
                    current_period_end: time_at(object, "/current_period_end"),
                    canceled_at: time_at(object, "/canceled_at"),
                    ended_at: None,
                };
                Ok(self.apply_change(BillingProvider::Stripe, external_id, change))
            }
            "customer.subscription.deleted" => {
                let external_id = str_at(object, "/id")
                    .ok_or_else(|| WebhookError::Processing("missing subscription id".into()))?;
                let now = Utc::now();
                let change = SubscriptionChange {
                    status: Some(SubscriptionStatus::Canceled),
                    canceled_at: time_at(object, "/canceled_at").or(Some(now)),
                    ended_at: Some(now),
                    ..Default::default()
                };
                Ok(self.apply_change(BillingProvider::Stripe, external_id, change))
            }
            "invoice.payment_succeeded" => Ok(self.record_payment(
                BillingProvider::Stripe,
                event,
                str_at(object, "/subscription"),
                cents_at(object, "/amount_paid"),
                str_at(object, "/currency").unwrap_or("usd"),
                PaymentStatus::Succeeded,
                event_type,
            )),
            "invoice.payment_failed" => Ok(self.record_payment(
                BillingProvider::Stripe,
                event,
                str_at(object, "/subscription"),
                cents_at(object, "/amount_due"),
                str_at(object, "/currency").unwrap_or("usd"),
                PaymentStatus::Failed,
                event_type,
            )),
            "customer.subscription.trial_will_end" => {
                let external_id = str_at(object, "/id").unwrap_or_default();
                match self.ledger.find_external(BillingProvider::Stripe, external_id) {
                    Some(sub) => Ok((
                        WebhookStatus::Processed,
                        vec![FollowUp::Notify(BillingNotice::TrialEnding {
                            customer_id: sub.customer_id,
                            subscription_id: sub.id,
                            trial_end: time_at(object, "/trial_end").or(sub.trial_end),
                        })],
                    )),
                    None => Ok((WebhookStatus::Ignored, Vec::new())),
                }
            }
            other => {
                info!(event_type = other, "Unhandled Stripe event type");
                Ok((WebhookStatus::Ignored, Vec::new()))
            }
        }
    }

    fn resolve_stripe_customer(&self, object: &Value) -> Option<Customer> {
        let external = str_at(object, "/customer");
        let by_metadata = str_at(object, "/metadata/customer_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .and_then(|id| self.customers.get(id));

        match by_metadata {
            Some(customer) => {
                if let Some(external) = external {
                    self.customers
                        .link_provider_customer(customer.id, BillingProvider::Stripe, external);
                }
                Some(customer)
            }
            None => external.and_then(|ext| {
                self.customers
                    .find_by_provider_customer_id(BillingProvider::Stripe, ext)
            }),
        }
    }

    fn sync_stripe_subscription(&self, object: &Value) -> Result<Processed, WebhookError> {
        let external_id = str_at(object, "/id")
            .ok_or_else(|| WebhookError::Processing("missing subscription id".into()))?;
        let customer = self.resolve_stripe_customer(object).ok_or_else(|| {
            WebhookError::Processing(format!("no customer found for Stripe subscription {external_id}"))
        })?;

        let plan_id = str_at(object, "/metadata/plan_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .filter(|id| self.plans.get(*id).is_some())
            .or_else(|| {
                str_at(object, "/items/data/0/price/id")
                    .and_then(|price| self.plans.find_by_stripe_price(price))
                    .map(|plan| plan.id)
            });

        let sync = SubscriptionSync {
            customer_id: customer.id,
            plan_id,
            provider: BillingProvider::Stripe,
            external_id: external_id.to_string(),
            status: parse_status(str_at(object, "/status").unwrap_or("active"))?,
            current_period_start: time_at(object, "/current_period_start"),
            current_period_end: time_at(object, "/current_period_end"),
            trial_end: time_at(object, "/trial_end"),
            canceled_at: time_at(object, "/canceled_at"),
            amount: cents_at(object, "/items/data/0/price/unit_amount"),
            currency: str_at(object, "/currency").unwrap_or("usd").to_string(),
            interval: BillingInterval::parse(
                str_at(object, "/items/data/0/price/recurring/interval").unwrap_or("month"),
            ),
        };
        let (sub, before) = self.ledger.upsert(sync);
        let follow_ups = self
            .enforcement(sub.customer_id, before, sub.status)
            .into_iter()
            .collect();
        Ok((WebhookStatus::Processed, follow_ups))
    }

    fn apply_change(
        &self,
        provider: BillingProvider,
        external_id: &str,
        change: SubscriptionChange,
    ) -> Processed {
        match self.ledger.apply(provider, external_id, change) {
            Some((before, after)) => {
                let follow_ups = self
                    .enforcement(after.customer_id, Some(before.status), after.status)
                    .into_iter()
                    .collect();
                (WebhookStatus::Processed, follow_ups)
            }
            None => {
                info!(provider = %provider, external_id, "Change for unknown subscription ignored");
                (WebhookStatus::Ignored, Vec::new())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_payment(
        &self,
        provider: BillingProvider,
        raw: &Value,
        external_subscription: Option<&str>,
        amount: f64,
        currency: &str,
        status: PaymentStatus,
        event_type: &str,
    ) -> Processed {
        let subscription = external_subscription.and_then(|ext| self.ledger.find_external(provider, ext));
        let event_id = str_at(raw, "/id")
            .or_else(|| str_at(raw, "/alert_id"))
            .unwrap_or_default()
            .to_string();

        let payment = self.ledger.record_payment(NewPaymentEvent {
            subscription_id: subscription.as_ref().map(|s| s.id),
            provider,
            external_id: event_id,
            event_type: event_type.to_string(),
            amount,
            currency: currency.to_lowercase(),
            status,
            raw_data: raw.clone(),
        });

        let mut follow_ups = Vec::new();
        if status == PaymentStatus::Failed {
            warn!(provider = %provider, payment_id = %payment.id, "Payment failed");
            if let Some(sub) = subscription {
                follow_ups.push(FollowUp::Notify(BillingNotice::PaymentFailed {
                    customer_id: sub.customer_id,
                    subscription_id: sub.id,
                    amount,
                    currency: payment.currency.clone(),
                }));
            }
        }
        (WebhookStatus::Processed, follow_ups)
    }

    // ── Paddle ──────────────────────────────────────────────────────────

    pub fn handle_paddle(&self, signature: Option<&str>, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        if self.config.paddle_webhook_secret.is_empty() {
            return Err(WebhookError::NotConfigured(BillingProvider::Paddle));
        }
        verify_paddle_signature(
            &self.config.paddle_webhook_secret,
            signature,
            body,
            self.config.webhook_tolerance_secs,
            Utc::now(),
        )?;

        let fields: HashMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
        let event_id = fields
            .get("alert_id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WebhookError::MalformedPayload("missing alert_id".into()))?
            .clone();
        let alert_name = fields.get("alert_name").cloned().unwrap_or_default();

        self.run_claimed(BillingProvider::Paddle, event_id, alert_name.clone(), || {
            self.process_paddle(&alert_name, &fields)
        })
    }

    fn process_paddle(&self, alert_name: &str, fields: &HashMap<String, String>) -> Result<Processed, WebhookError> {
        let field = |name: &str| fields.get(name).map(String::as_str).filter(|v| !v.is_empty());
        let next_bill_date = field("next_bill_date")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());

        match alert_name {
            "subscription_created" => self.sync_paddle_subscription(fields, next_bill_date),
            "subscription_updated" => {
                let external_id = field("subscription_id")
                    .ok_or_else(|| WebhookError::Processing("missing subscription_id".into()))?;
                if self.ledger.find_external(BillingProvider::Paddle, external_id).is_none() {
                    return self.sync_paddle_subscription(fields, next_bill_date);
                }
                let status = field("status").map(parse_status).transpose()?;
                let change = SubscriptionChange {
                    status,
                    current_period_end: next_bill_date,
                    ..Default::default()
                };
                Ok(self.apply_change(BillingProvider::Paddle, external_id, change))
            }
            "subscription_cancelled" => {
                let external_id = field("subscription_id")
                    .ok_or_else(|| WebhookError::Processing("missing subscription_id".into()))?;
                let change = SubscriptionChange {
                    status: Some(SubscriptionStatus::Canceled),
                    canceled_at: Some(Utc::now()),
                    ..Default::default()
                };
                Ok(self.apply_change(BillingProvider::Paddle, external_id, change))
            }
            "subscription_payment_succeeded" | "subscription_payment_failed" => {
                let status = if alert_name.ends_with("succeeded") {
                    PaymentStatus::Succeeded
                } else {
                    PaymentStatus::Failed
                };
                let amount = field("sale_gross")
                    .or_else(|| field("amount"))
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0);
                let raw = serde_json::to_value(fields)
                    .map_err(|e| WebhookError::Processing(e.to_string()))?;
                Ok(self.record_payment(
                    BillingProvider::Paddle,
                    &raw,
                    field("subscription_id"),
                    amount,
                    field("currency").unwrap_or("USD"),
                    status,
                    alert_name,
                ))
            }
            other => {
                info!(alert_name = other, "Unhandled Paddle alert");
                Ok((WebhookStatus::Ignored, Vec::new()))
            }
        }
    }

    fn sync_paddle_subscription(
        &self,
        fields: &HashMap<String, String>,
        next_bill_date: Option<DateTime<Utc>>,
    ) -> Result<Processed, WebhookError> {
        let field = |name: &str| fields.get(name).map(String::as_str).filter(|v| !v.is_empty());
        let external_id = field("subscription_id")
            .ok_or_else(|| WebhookError::Processing("missing subscription_id".into()))?;

        let passthrough: Value = field("passthrough")
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or(Value::Null);

        let customer = str_at(&passthrough, "/customer_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .and_then(|id| self.customers.get(id))
            .or_else(|| field("email").and_then(|email| self.customers.find_by_email(email)))
            .ok_or_else(|| {
                WebhookError::Processing(format!("no customer found for Paddle subscription {external_id}"))
            })?;
        if let Some(user_id) = field("user_id") {
            self.customers
                .link_provider_customer(customer.id, BillingProvider::Paddle, user_id);
        }

        let plan_id = str_at(&passthrough, "/plan_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .filter(|id| self.plans.get(*id).is_some())
            .or_else(|| {
                field("subscription_plan_id")
                    .and_then(|p| self.plans.find_by_paddle_plan(p))
                    .map(|plan| plan.id)
            });

        let plan_name = field("plan_name").unwrap_or_default().to_lowercase();
        let interval = if plan_name.contains("year") || plan_name.contains("annual") {
            BillingInterval::Year
        } else {
            BillingInterval::Month
        };

        let sync = SubscriptionSync {
            customer_id: customer.id,
            plan_id,
            provider: BillingProvider::Paddle,
            external_id: external_id.to_string(),
            status: parse_status(field("status").unwrap_or("active"))?,
            current_period_start: None,
            current_period_end: next_bill_date,
            trial_end: None,
            canceled_at: None,
            amount: field("unit_price")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            currency: field("currency").unwrap_or("USD").to_lowercase(),
            interval,
        };
        let (sub, before) = self.ledger.upsert(sync);
        let follow_ups = self
            .enforcement(sub.customer_id, before, sub.status)
            .into_iter()
            .collect();
        Ok((WebhookStatus::Processed, follow_ups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::NewPlan;
    use saas_platform::customers::NewCustomer;
    use serde_json::json;

    const STRIPE_SECRET: &str = "whsec_test";
    const PADDLE_SECRET: &str = "pdl_test";

    struct Fixture {
        processor: WebhookProcessor,
        ledger: Arc<SubscriptionLedger>,
        customer: Customer,
        plan_id: Uuid,
    }

    fn fixture(enforce: bool) -> Fixture {
        let customers = Arc::new(CustomerDirectory::new());
        let plans = Arc::new(PlanCatalog::new());
        let ledger = Arc::new(SubscriptionLedger::new());
        let customer = customers
            .create(NewCustomer::new("billing@example.com", "hash"))
            .unwrap();
        let mut plan = NewPlan::named("Starter");
        plan.stripe_price_id_monthly = Some("price_m".into());
        plan.paddle_plan_id = Some("777".into());
        let plan_id = plans.create(plan).unwrap().id;

        let config = BillingConfig {
            stripe_webhook_secret: STRIPE_SECRET.into(),
            paddle_webhook_secret: PADDLE_SECRET.into(),
            enforce_subscription_state: enforce,
            ..BillingConfig::default()
        };
        Fixture {
            processor: WebhookProcessor::new(customers, plans, ledger.clone(), config),
            ledger,
            customer,
            plan_id,
        }
    }

    fn stripe_event(id: &str, event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({ "id": id, "type": event_type, "data": { "object": object } })).unwrap()
    }

    fn send_stripe(f: &Fixture, body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let header = stripe_signature_header(STRIPE_SECRET, Utc::now().timestamp(), body);
        f.processor.handle_stripe(Some(&header), body)
    }

    fn subscription_object(f: &Fixture, status: &str) -> Value {
        json!({
            "id": "sub_123",
            "customer": "cus_abc",
            "status": status,
            "currency": "usd",
            "current_period_start": 1_700_000_000,
            "current_period_end": 1_702_592_000,
            "metadata": { "customer_id": f.customer.id.to_string() },
            "items": { "data": [ { "price": {
                "id": "price_m", "unit_amount": 2900, "recurring": { "interval": "month" }
            } } ] }
        })
    }

    #[test]
    fn test_stripe_signature_formats() {
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now();
        let header = stripe_signature_header("s3cret", now.timestamp(), body);
        assert!(verify_stripe_signature("s3cret", &header, body, 300, now).is_ok());
        assert!(matches!(
            verify_stripe_signature("other", &header, body, 300, now),
            Err(WebhookError::InvalidSignature)
        ));

        let bare = hmac_hex("s3cret", &[body]);
        assert!(verify_stripe_signature("s3cret", &bare, body, 300, now).is_ok());
        assert!(verify_stripe_signature("s3cret", &format!("v1={bare}"), body, 300, now).is_ok());
        assert!(verify_stripe_signature("s3cret", "v1=zz", body, 300, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = b"{}";
        let now = Utc::now();
        let header = stripe_signature_header("s3cret", now.timestamp() - 301, body);
        assert!(matches!(
            verify_stripe_signature("s3cret", &header, body, 300, now),
            Err(WebhookError::StaleTimestamp)
        ));

        let header = paddle_signature_header("s3cret", now.timestamp() - 1000, body);
        assert!(matches!(
            verify_paddle_signature("s3cret", &header, body, 300, now),
            Err(WebhookError::StaleTimestamp)
        ));
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let now = Utc::now();
        for ts in [i64::MIN, i64::MAX] {
            let stripe = format!("t={ts},v1=00");
            assert!(matches!(
                verify_stripe_signature("s3cret", &stripe, b"{}", 300, now),
                Err(WebhookError::StaleTimestamp)
            ));
            let paddle = format!("ts={ts};h1=00");
            assert!(matches!(
                verify_paddle_signature("s3cret", &paddle, b"{}", 300, now),
                Err(WebhookError::StaleTimestamp)
            ));
        }
    }

    #[test]
    fn test_purge_claims_keeps_recent_events() {
        let f = fixture(false);
        assert!(f.processor.claim(BillingProvider::Stripe, "evt_old"));
        assert!(f.processor.claim(BillingProvider::Paddle, "evt_new"));
        f.processor.claims.insert(
            WebhookProcessor::claim_key(BillingProvider::Stripe, "evt_old"),
            Utc::now() - chrono::Duration::days(8),
        );

        assert_eq!(f.processor.purge_claims(chrono::Duration::days(7)), 1);
        assert_eq!(f.processor.processed_events(), 1);
        assert!(!f.processor.claim(BillingProvider::Paddle, "evt_new"));
        // A redelivery after the retention window is treated as new.
        assert!(f.processor.claim(BillingProvider::Stripe, "evt_old"));
    }

    #[test]
    fn test_missing_signature_and_bad_json() {
        let f = fixture(false);
        assert!(matches!(
            f.processor.handle_stripe(None, b"{}"),
            Err(WebhookError::MissingSignature)
        ));
        let err = send_stripe(&f, b"not json").unwrap_err();
        assert!(matches!(err, WebhookError::MalformedPayload(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_subscription_created_links_customer_and_plan() {
        let f = fixture(false);
        let body = stripe_event("evt_1", "customer.subscription.created", subscription_object(&f, "trialing"));
        let outcome = send_stripe(&f, &body).unwrap();
        assert_eq!(outcome.status, WebhookStatus::Processed);

        let sub = f.ledger.find_external(BillingProvider::Stripe, "sub_123").unwrap();
        assert_eq!(sub.customer_id, f.customer.id);
        assert_eq!(sub.plan_id, Some(f.plan_id));
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert!((sub.amount - 29.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_event_has_no_side_effects() {
        let f = fixture(false);
        let body = stripe_event("evt_dup", "customer.subscription.created", subscription_object(&f, "active"));
        send_stripe(&f, &body).unwrap();
        let outcome = send_stripe(&f, &body).unwrap();
        assert_eq!(outcome.status, WebhookStatus::AlreadyProcessed);
        assert_eq!(f.ledger.list_for_customer(f.customer.id).len(), 1);
    }

    #[test]
    fn test_failed_processing_releases_claim() {
        let f = fixture(false);
        let mut object = subscription_object(&f, "active");
        object["metadata"] = json!({});
        object["customer"] = json!("cus_unknown");
        let body = stripe_event("evt_retry", "customer.subscription.created", object);
        assert!(matches!(send_stripe(&f, &body), Err(WebhookError::Processing(_))));
        assert_eq!(f.processor.processed_events(), 0);

        // Once the provider customer is known, the retry succeeds.
        f.processor
            .customers
            .link_provider_customer(f.customer.id, BillingProvider::Stripe, "cus_unknown");
        assert_eq!(send_stripe(&f, &body).unwrap().status, WebhookStatus::Processed);
    }

    #[test]
    fn test_enforcement_follow_ups() {
        let f = fixture(true);
        send_stripe(
            &f,
            &stripe_event("evt_a", "customer.subscription.created", subscription_object(&f, "active")),
        )
        .unwrap();

        let unpaid = send_stripe(
            &f,
            &stripe_event("evt_b", "customer.subscription.updated", subscription_object(&f, "unpaid")),
        )
        .unwrap();
        assert_eq!(
            unpaid.follow_ups,
            vec![FollowUp::SuspendForBilling {
                customer_id: f.customer.id
            }]
        );

        let active = send_stripe(
            &f,
            &stripe_event("evt_c", "customer.subscription.updated", subscription_object(&f, "active")),
        )
        .unwrap();
        assert_eq!(
            active.follow_ups,
            vec![FollowUp::RestoreFromBilling {
                customer_id: f.customer.id
            }]
        );
    }

    #[test]
    fn test_enforcement_disabled_by_default() {
        let f = fixture(false);
        send_stripe(
            &f,
            &stripe_event("evt_a", "customer.subscription.created", subscription_object(&f, "active")),
        )
        .unwrap();
        let deleted = send_stripe(
            &f,
            &stripe_event("evt_b", "customer.subscription.deleted", json!({ "id": "sub_123" })),
        )
        .unwrap();
        assert!(deleted.follow_ups.is_empty());
        let sub = f.ledger.find_external(BillingProvider::Stripe, "sub_123").unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.ended_at.is_some());
    }

    #[test]
    fn test_invoice_payments() {
        let f = fixture(false);
        send_stripe(
            &f,
            &stripe_event("evt_a", "customer.subscription.created", subscription_object(&f, "active")),
        )
        .unwrap();

        send_stripe(
            &f,
            &stripe_event(
                "evt_paid",
                "invoice.payment_succeeded",
                json!({ "id": "in_1", "subscription": "sub_123", "amount_paid": 2900, "currency": "usd" }),
            ),
        )
        .unwrap();
        let failed = send_stripe(
            &f,
            &stripe_event(
                "evt_failed",
                "invoice.payment_failed",
                json!({ "id": "in_2", "subscription": "sub_123", "amount_due": 2900, "currency": "usd" }),
            ),
        )
        .unwrap();
        assert!(matches!(
            failed.follow_ups.as_slice(),
            [FollowUp::Notify(BillingNotice::PaymentFailed { .. })]
        ));

        let revenue = f.ledger.revenue_since(Utc::now() - chrono::Duration::days(1));
        assert!((revenue - 29.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_event_ignored() {
        let f = fixture(false);
        let outcome = send_stripe(&f, &stripe_event("evt_x", "charge.refunded", json!({}))).unwrap();
        assert_eq!(outcome.status, WebhookStatus::Ignored);
    }

    fn paddle_body(pairs: &[(&str, &str)]) -> Vec<u8> {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
            .into_bytes()
    }

    #[test]
    fn test_paddle_subscription_lifecycle() {
        let f = fixture(false);
        let passthrough = json!({ "customer_id": f.customer.id.to_string() }).to_string();
        let body = paddle_body(&[
            ("alert_id", "9001"),
            ("alert_name", "subscription_created"),
            ("subscription_id", "psub_1"),
            ("subscription_plan_id", "777"),
            ("status", "active"),
            ("unit_price", "49.00"),
            ("currency", "EUR"),
            ("next_bill_date", "2026-12-01"),
            ("passthrough", &passthrough),
        ]);
        let header = paddle_signature_header(PADDLE_SECRET, Utc::now().timestamp(), &body);
        let outcome = f.processor.handle_paddle(Some(&header), &body).unwrap();
        assert_eq!(outcome.status, WebhookStatus::Processed);

        let sub = f.ledger.find_external(BillingProvider::Paddle, "psub_1").unwrap();
        assert_eq!(sub.plan_id, Some(f.plan_id));
        assert_eq!(sub.currency, "eur");
        assert!(sub.current_period_end.is_some());

        let dup = f.processor.handle_paddle(Some(&header), &body).unwrap();
        assert_eq!(dup.status, WebhookStatus::AlreadyProcessed);

        let cancel = paddle_body(&[
            ("alert_id", "9002"),
            ("alert_name", "subscription_cancelled"),
            ("subscription_id", "psub_1"),
        ]);
        let header = paddle_signature_header(PADDLE_SECRET, Utc::now().timestamp(), &cancel);
        f.processor.handle_paddle(Some(&header), &cancel).unwrap();
        let sub = f.ledger.find_external(BillingProvider::Paddle, "psub_1").unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_paddle_customer_by_email_and_bad_signature() {
        let f = fixture(false);
        let body = paddle_body(&[
            ("alert_id", "9100"),
            ("alert_name", "subscription_created"),
            ("subscription_id", "psub_2"),
            ("email", "Billing@Example.com"),
        ]);
        let wrong = paddle_signature_header("nope", Utc::now().timestamp(), &body);
        assert!(matches!(
            f.processor.handle_paddle(Some(&wrong), &body),
            Err(WebhookError::InvalidSignature)
        ));

        let header = paddle_signature_header(PADDLE_SECRET, Utc::now().timestamp(), &body);
        f.processor.handle_paddle(Some(&header), &body).unwrap();
        assert_eq!(
            f.ledger
                .find_external(BillingProvider::Paddle, "psub_2")
                .unwrap()
                .customer_id,
            f.customer.id
        );
    }

    #[test]
    fn test_unconfigured_secret() {
        let f = fixture(false);
        let processor = WebhookProcessor::new(
            f.processor.customers.clone(),
            f.processor.plans.clone(),
            f.ledger.clone(),
            BillingConfig::default(),
        );
        assert!(matches!(
            processor.handle_stripe(Some("t=1,v1=00"), b"{}"),
            Err(WebhookError::NotConfigured(BillingProvider::Stripe))
        ));
    }
}

//! Subscriptions and payment events, keyed by the provider's identifiers.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use saas_core::types::{paginate, BillingProvider, Page, PageRequest, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Subscription not found")]
    NotFound,

    #[error("Subscription is already canceled")]
    AlreadyCanceled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[default]
    Month,
    Year,
}

impl BillingInterval {
    pub fn parse(value: &str) -> Self {
        if value.to_lowercase().starts_with("year") {
            BillingInterval::Year
        } else {
            BillingInterval::Month
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub provider: BillingProvider,
    pub external_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub amount: f64,
    pub currency: String,
    pub interval: BillingInterval,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Provider-side view of a subscription, as parsed from a webhook.
#[derive(Debug, Clone)]
pub struct SubscriptionSync {
    pub customer_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub provider: BillingProvider,
    pub external_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub amount: f64,
    pub currency: String,
    pub interval: BillingInterval,
}

/// Partial status change for a subscription we already know about.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChange {
    pub status: Option<SubscriptionStatus>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub provider: BillingProvider,
    pub external_id: String,
    pub event_type: String,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    #[schema(value_type = Object)]
    pub raw_data: serde_json::Value,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentEvent {
    pub subscription_id: Option<Uuid>,
    pub provider: BillingProvider,
    pub external_id: String,
    pub event_type: String,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub raw_data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionFilter {
    pub status: Option<SubscriptionStatus>,
    pub provider: Option<BillingProvider>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SubscriptionStats {
    pub total: u64,
    pub active: u64,
    pub trialing: u64,
    pub canceled_last_30_days: u64,
}

fn key(provider: BillingProvider, external_id: &str) -> String {
    format!("{}:{}", provider.as_str(), external_id)
}

/// Subscription and payment store backed by DashMap.
pub struct SubscriptionLedger {
    subscriptions: DashMap<Uuid, Subscription>,
    by_external: DashMap<String, Uuid>,
    payments: DashMap<String, PaymentEvent>,
}

impl Default for SubscriptionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            by_external: DashMap::new(),
            payments: DashMap::new(),
        }
    }

    /// Insert or refresh a subscription keyed by `(provider, external_id)`.
    /// Returns the stored record and its previous status, if any.
    pub fn upsert(&self, sync: SubscriptionSync) -> (Subscription, Option<SubscriptionStatus>) {
        let now = Utc::now();
        match self.by_external.entry(key(sync.provider, &sync.external_id)) {
            Entry::Occupied(slot) => {
                let id = *slot.get();
                drop(slot);
                let mut sub = match self.subscriptions.get_mut(&id) {
                    Some(sub) => sub,
                    None => return self.insert_fresh(sync, now),
                };
                let previous = sub.status;
                sub.customer_id = sync.customer_id;
                if sync.plan_id.is_some() {
                    sub.plan_id = sync.plan_id;
                }
                sub.status = sync.status;
                sub.current_period_start = sync.current_period_start.or(sub.current_period_start);
                sub.current_period_end = sync.current_period_end.or(sub.current_period_end);
                sub.trial_end = sync.trial_end.or(sub.trial_end);
                sub.canceled_at = sync.canceled_at.or(sub.canceled_at);
                sub.amount = sync.amount;
                sub.currency = sync.currency;
                sub.interval = sync.interval;
                sub.updated_at = now;
                (sub.clone(), Some(previous))
            }
            Entry::Vacant(slot) => {
                let sub = new_subscription(sync, now);
                slot.insert(sub.id);
                self.subscriptions.insert(sub.id, sub.clone());
                info!(
                    subscription_id = %sub.id,
                    provider = %sub.provider,
                    external_id = %sub.external_id,
                    "Subscription recorded"
                );
                (sub, None)
            }
        }
    }

    fn insert_fresh(
        &self,
        sync: SubscriptionSync,
        now: DateTime<Utc>,
    ) -> (Subscription, Option<SubscriptionStatus>) {
        let sub = new_subscription(sync, now);
        self.by_external
            .insert(key(sub.provider, &sub.external_id), sub.id);
        self.subscriptions.insert(sub.id, sub.clone());
        (sub, None)
    }

    /// Apply a change to a known subscription. Returns `(before, after)`, or
    /// `None` when the provider id is unknown.
    pub fn apply(
        &self,
        provider: BillingProvider,
        external_id: &str,
        change: SubscriptionChange,
    ) -> Option<(Subscription, Subscription)> {
        let id = *self.by_external.get(&key(provider, external_id))?;
        let mut sub = self.subscriptions.get_mut(&id)?;
        let before = sub.clone();
        if let Some(status) = change.status {
            sub.status = status;
        }
        if change.current_period_start.is_some() {
            sub.current_period_start = change.current_period_start;
        }
        if change.current_period_end.is_some() {
            sub.current_period_end = change.current_period_end;
        }
        if change.canceled_at.is_some() {
            sub.canceled_at = change.canceled_at;
        }
        if change.ended_at.is_some() {
            sub.ended_at = change.ended_at;
        }
        sub.updated_at = Utc::now();
        Some((before, sub.clone()))
    }

    pub fn get(&self, id: Uuid) -> Option<Subscription> {
        self.subscriptions.get(&id).map(|s| s.value().clone())
    }

    pub fn get_for_customer(&self, id: Uuid, customer_id: Uuid) -> Option<Subscription> {
        self.get(id).filter(|s| s.customer_id == customer_id)
    }

    pub fn find_external(&self, provider: BillingProvider, external_id: &str) -> Option<Subscription> {
        let id = *self.by_external.get(&key(provider, external_id))?;
        self.get(id)
    }

    /// Newest first.
    pub fn list_for_customer(&self, customer_id: Uuid) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.customer_id == customer_id)
            .map(|s| s.value().clone())
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        subs
    }

    pub fn list(&self, filter: &SubscriptionFilter, page: PageRequest) -> Page<Subscription> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| filter.status.map_or(true, |v| s.status == v))
            .filter(|s| filter.provider.map_or(true, |v| s.provider == v))
            .filter(|s| filter.customer_id.map_or(true, |v| s.customer_id == v))
            .map(|s| s.value().clone())
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(subs, page.clamped(100))
    }

    pub fn for_plan(&self, plan_id: Uuid) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.plan_id == Some(plan_id))
            .map(|s| s.value().clone())
            .collect()
    }

    /// Flag a customer's subscription to end with the current period.
    pub fn request_cancel(&self, id: Uuid, customer_id: Uuid) -> Result<Subscription, SubscriptionError> {
        let mut sub = self
            .subscriptions
            .get_mut(&id)
            .filter(|s| s.customer_id == customer_id)
            .ok_or(SubscriptionError::NotFound)?;
        if sub.status == SubscriptionStatus::Canceled {
            return Err(SubscriptionError::AlreadyCanceled);
        }
        sub.cancel_at_period_end = true;
        sub.updated_at = Utc::now();
        info!(subscription_id = %id, "Cancellation requested at period end");
        Ok(sub.clone())
    }

    /// Record a payment. A second event with the same provider id is ignored
    /// and the original returned.
    pub fn record_payment(&self, new: NewPaymentEvent) -> PaymentEvent {
        let now = Utc::now();
        self.payments
            .entry(key(new.provider, &new.external_id))
            .or_insert_with(|| PaymentEvent {
                id: Uuid::new_v4(),
                subscription_id: new.subscription_id,
                provider: new.provider,
                external_id: new.external_id,
                event_type: new.event_type,
                amount: new.amount,
                currency: new.currency,
                status: new.status,
                raw_data: new.raw_data,
                processed_at: now,
                created_at: now,
            })
            .value()
            .clone()
    }

    /// Most recent payments for a subscription.
    pub fn payments_for(&self, subscription_id: Uuid, limit: usize) -> Vec<PaymentEvent> {
        let mut events: Vec<PaymentEvent> = self
            .payments
            .iter()
            .filter(|p| p.subscription_id == Some(subscription_id))
            .map(|p| p.value().clone())
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        events
    }

    /// Sum of succeeded payments since `since`.
    pub fn revenue_since(&self, since: DateTime<Utc>) -> f64 {
        self.payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded && p.created_at >= since)
            .map(|p| p.amount)
            .sum()
    }

    pub fn stats(&self, canceled_since: DateTime<Utc>) -> SubscriptionStats {
        let mut stats = SubscriptionStats::default();
        for s in self.subscriptions.iter() {
            stats.total += 1;
            match s.status {
                SubscriptionStatus::Active => stats.active += 1,
                SubscriptionStatus::Trialing => stats.trialing += 1,
                _ => {}
            }
            if s.canceled_at.is_some_and(|at| at >= canceled_since) {
                stats.canceled_last_30_days += 1;
            }
        }
        stats
    }
}

fn new_subscription(sync: SubscriptionSync, now: DateTime<Utc>) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        customer_id: sync.customer_id,
        plan_id: sync.plan_id,
        provider: sync.provider,
        external_id: sync.external_id,
        status: sync.status,
        current_period_start: sync.current_period_start,
        current_period_end: sync.current_period_end,
        trial_end: sync.trial_end,
        canceled_at: sync.canceled_at,
        ended_at: None,
        cancel_at_period_end: false,
        amount: sync.amount,
        currency: sync.currency,
        interval: sync.interval,
        created_at: now,
        updated_at: now,
    }
}

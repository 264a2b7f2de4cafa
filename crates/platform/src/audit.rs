//! Audit logging: append-only store with per-entry payload hashes and a
//! hash chain across entries, plus filtered queries for the admin API.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use saas_core::types::{paginate, Actor, AuditAction, CustomerRole, Page, PageRequest, SortDirection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

const GENESIS_HASH: &str = "genesis";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub actor_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub actor_role: Option<CustomerRole>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub old_values: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub new_values: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    /// SHA-256 of the canonical payload.
    pub payload_hash: String,
    pub previous_hash: String,
    /// SHA-256 linking this entry to the previous one.
    pub chain_hash: String,
    pub created_at: DateTime<Utc>,
}

/// What happened, independent of who did it.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, resource_type: &str, resource_id: impl ToString) -> Self {
        Self {
            action,
            resource_type: resource_type.to_string(),
            resource_id: Some(resource_id.to_string()),
            old_values: None,
            new_values: None,
            metadata: None,
        }
    }

    pub fn old_values(mut self, values: serde_json::Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: serde_json::Value) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn metadata(mut self, values: serde_json::Value) -> Self {
        self.metadata = Some(values);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub ip_address: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order_dir: SortDirection,
}

/// Result of verifying the audit chain integrity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainVerification {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub tampered_sequences: Vec<u64>,
    pub chain_intact: bool,
}

struct ChainHead {
    sequence: u64,
    last_hash: String,
}

/// Tamper-evident append-only audit log.
pub struct AuditLog {
    entries: DashMap<u64, AuditEntry>,
    head: parking_lot::Mutex<ChainHead>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            head: parking_lot::Mutex::new(ChainHead {
                sequence: 0,
                last_hash: GENESIS_HASH.to_string(),
            }),
        }
    }

    /// Append an entry for `actor`. The head lock covers both the sequence
    /// number and the insert so the chain has no gaps.
    pub fn record(&self, actor: &Actor, record: AuditRecord) -> AuditEntry {
        let created_at = Utc::now();
        let payload_hash = payload_hash(
            actor.id,
            record.action,
            &record.resource_type,
            record.resource_id.as_deref(),
            record.old_values.as_ref(),
            record.new_values.as_ref(),
            created_at,
        );

        let mut head = self.head.lock();
        head.sequence += 1;
        let previous_hash = head.last_hash.clone();
        let chain_hash = chain_hash(head.sequence, &previous_hash, &payload_hash);
        head.last_hash = chain_hash.clone();

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            sequence: head.sequence,
            actor_id: actor.id,
            actor_email: actor.email.clone(),
            actor_role: actor.role,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            ip_address: actor.ip_address.clone(),
            user_agent: actor.user_agent.clone(),
            session_id: actor.session_id.clone(),
            old_values: record.old_values,
            new_values: record.new_values,
            metadata: record.metadata,
            payload_hash,
            previous_hash,
            chain_hash,
            created_at,
        };
        self.entries.insert(entry.sequence, entry.clone());
        drop(head);

        info!(
            sequence = entry.sequence,
            action = %entry.action,
            resource = %entry.resource_type,
            resource_id = entry.resource_id.as_deref().unwrap_or("-"),
            actor = entry.actor_email.as_deref().unwrap_or("anonymous"),
            "Audit entry recorded"
        );
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn query(&self, filter: &AuditFilter, page: PageRequest) -> Page<AuditEntry> {
        let email_needle = filter.actor_email.as_deref().map(str::to_lowercase);

        let mut results: Vec<AuditEntry> = self
            .entries
            .iter()
            .filter(|e| {
                let ev = e.value();
                if filter.action.is_some_and(|a| ev.action != a) {
                    return false;
                }
                if let Some(ref rt) = filter.resource_type {
                    if &ev.resource_type != rt {
                        return false;
                    }
                }
                if let Some(ref rid) = filter.resource_id {
                    if ev.resource_id.as_ref() != Some(rid) {
                        return false;
                    }
                }
                if filter.actor_id.is_some() && ev.actor_id != filter.actor_id {
                    return false;
                }
                if let Some(ref needle) = email_needle {
                    let hit = ev
                        .actor_email
                        .as_deref()
                        .is_some_and(|e| e.to_lowercase().contains(needle.as_str()));
                    if !hit {
                        return false;
                    }
                }
                if let Some(ref ip) = filter.ip_address {
                    if ev.ip_address.as_ref() != Some(ip) {
                        return false;
                    }
                }
                if filter.start_date.is_some_and(|f| ev.created_at < f) {
                    return false;
                }
                if filter.end_date.is_some_and(|t| ev.created_at > t) {
                    return false;
                }
                true
            })
            .map(|e| e.value().clone())
            .collect();

        match filter.order_dir {
            SortDirection::Asc => results.sort_by_key(|e| e.sequence),
            SortDirection::Desc => results.sort_by(|a, b| b.sequence.cmp(&a.sequence)),
        }

        paginate(results, page.clamped(200))
    }

    /// Entries about one resource, newest first.
    pub fn for_resource(&self, resource_type: &str, resource_id: &str, limit: usize) -> Vec<AuditEntry> {
        let filter = AuditFilter {
            resource_type: Some(resource_type.to_string()),
            resource_id: Some(resource_id.to_string()),
            ..Default::default()
        };
        let mut page = self.query(&filter, PageRequest::new(1, 200));
        page.items.truncate(limit);
        page.items
    }

    pub fn distinct_actions(&self) -> Vec<AuditAction> {
        let mut seen: Vec<AuditAction> = Vec::new();
        for entry in self.entries.iter() {
            if !seen.contains(&entry.action) {
                seen.push(entry.action);
            }
        }
        seen.sort_by_key(|a| a.as_str());
        seen
    }

    pub fn distinct_resource_types(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.resource_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn count_since(&self, action: AuditAction, since: DateTime<Utc>) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.action == action && e.created_at >= since)
            .count() as u64
    }

    /// Recompute every payload and chain hash in sequence order.
    pub fn verify_chain(&self) -> ChainVerification {
        let mut entries: Vec<AuditEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.sequence);

        let total = entries.len();
        let mut valid = 0;
        let mut tampered = Vec::new();
        let mut expected_prev = GENESIS_HASH.to_string();

        for entry in &entries {
            let recomputed_payload = payload_hash(
                entry.actor_id,
                entry.action,
                &entry.resource_type,
                entry.resource_id.as_deref(),
                entry.old_values.as_ref(),
                entry.new_values.as_ref(),
                entry.created_at,
            );
            let recomputed_chain = chain_hash(entry.sequence, &entry.previous_hash, &entry.payload_hash);

            if entry.previous_hash == expected_prev
                && recomputed_payload == entry.payload_hash
                && recomputed_chain == entry.chain_hash
            {
                valid += 1;
            } else {
                tampered.push(entry.sequence);
            }
            expected_prev = entry.chain_hash.clone();
        }

        ChainVerification {
            total_entries: total,
            valid_entries: valid,
            tampered_sequences: tampered,
            chain_intact: valid == total,
        }
    }

    #[cfg(test)]
    fn tamper(&self, sequence: u64, f: impl FnOnce(&mut AuditEntry)) {
        if let Some(mut entry) = self.entries.get_mut(&sequence) {
            f(entry.value_mut());
        }
    }
}

/// SHA-256 over the key-sorted JSON of the entry's identifying fields.
fn payload_hash(
    actor_id: Option<Uuid>,
    action: AuditAction,
    resource_type: &str,
    resource_id: Option<&str>,
    old_values: Option<&serde_json::Value>,
    new_values: Option<&serde_json::Value>,
    created_at: DateTime<Utc>,
) -> String {
    // serde_json::Map is ordered by key, so the encoding is canonical.
    let payload = serde_json::json!({
        "actor_id": actor_id,
        "action": action.as_str(),
        "resource_type": resource_type,
        "resource_id": resource_id,
        "old_values": old_values,
        "new_values": new_values,
        "created_at": created_at.to_rfc3339(),
    });
    sha256_hex(&payload.to_string())
}

fn chain_hash(sequence: u64, previous_hash: &str, payload_hash: &str) -> String {
    sha256_hex(&format!("{sequence}:{previous_hash}:{payload_hash}"))
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn admin_actor() -> Actor {
        Actor {
            id: Some(Uuid::new_v4()),
            email: Some("admin@example.com".into()),
            role: Some(CustomerRole::Admin),
            ip_address: Some("10.0.0.1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_and_query() {
        let log = AuditLog::new();
        let actor = admin_actor();
        let tenant_id = Uuid::new_v4();

        log.record(&actor, AuditRecord::new(AuditAction::Create, "tenant", tenant_id));
        log.record(
            &actor,
            AuditRecord::new(AuditAction::Suspend, "tenant", tenant_id)
                .old_values(serde_json::json!({"state": "active"}))
                .new_values(serde_json::json!({"state": "suspended"})),
        );
        log.record(&Actor::system(), AuditRecord::new(AuditAction::Login, "customer", Uuid::new_v4()));

        let all = log.query(&AuditFilter::default(), PageRequest::default());
        assert_eq!(all.pagination.total, 3);
        assert_eq!(all.items[0].sequence, 3);

        let suspends = log.query(
            &AuditFilter {
                action: Some(AuditAction::Suspend),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(suspends.items.len(), 1);
        assert_eq!(suspends.items[0].new_values.as_ref().unwrap()["state"], "suspended");

        let by_email = log.query(
            &AuditFilter {
                actor_email: Some("ADMIN@".into()),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(by_email.items.len(), 2);

        let for_tenant = log.for_resource("tenant", &tenant_id.to_string(), 10);
        assert_eq!(for_tenant.len(), 2);

        let future = log.query(
            &AuditFilter {
                start_date: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert!(future.items.is_empty());

        assert_eq!(log.distinct_resource_types(), vec!["customer", "tenant"]);
        assert_eq!(log.distinct_actions().len(), 3);
        assert_eq!(log.count_since(AuditAction::Login, Utc::now() - Duration::hours(24)), 1);
    }

    #[test]
    fn test_hash_chain_integrity() {
        let log = AuditLog::new();
        let actor = admin_actor();
        for i in 0..5 {
            log.record(&actor, AuditRecord::new(AuditAction::Update, "plan", format!("plan-{i}")));
        }

        let verification = log.verify_chain();
        assert_eq!(verification.total_entries, 5);
        assert!(verification.chain_intact);
        assert!(verification.tampered_sequences.is_empty());
    }

    #[test]
    fn test_tampering_is_detected() {
        let log = AuditLog::new();
        let actor = admin_actor();
        for i in 0..3 {
            log.record(
                &actor,
                AuditRecord::new(AuditAction::Update, "tenant", i)
                    .new_values(serde_json::json!({"plan": i})),
            );
        }

        log.tamper(2, |e| e.new_values = Some(serde_json::json!({"plan": 99})));

        let verification = log.verify_chain();
        assert!(!verification.chain_intact);
        assert_eq!(verification.tampered_sequences, vec![2]);
    }

    #[test]
    fn test_payload_hash_is_key_order_independent() {
        let at = Utc::now();
        let a = payload_hash(
            None,
            AuditAction::Update,
            "tenant",
            Some("t1"),
            None,
            Some(&serde_json::json!({"b": 1, "a": 2})),
            at,
        );
        let b = payload_hash(
            None,
            AuditAction::Update,
            "tenant",
            Some("t1"),
            None,
            Some(&serde_json::json!({"a": 2, "b": 1})),
            at,
        );
        assert_eq!(a, b);
    }
}

#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Hash-chained audit log, persisted through [`accounting_storage::Storage`]
//! rather than a private in-process buffer, so the chain survives restarts
//! and is shared by every tenant-scoped caller that holds the same storage
//! handle.
//!
//! Each [`AuditEvent`]'s `current_hash` covers a canonical JSON pre-image of
//! its own fields plus the previous event's hash, so tampering with any
//! event invalidates both that event's hash and the link the next event
//! holds to it. Appends are serialized through a mutex that reconciles the
//! chain tail from storage on every acquisition, so concurrent writers
//! sharing a backing store can't race past each other onto the same
//! `previous_hash`.

use std::sync::Arc;

use accounting_storage::Document;
use accounting_storage::Storage;
use accounting_storage::StorageError;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const EVENTS_TABLE: &str = "audit_events";
const GENESIS_HASH: &str = "";

pub type AuditResult<T> = Result<T, AuditLogError>;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Closed set of events the rest of the platform may record. Unlike
/// `action: String` in a free-text log, a closed enum lets
/// [`AuditLog::get_events_by_type`] be precise instead of a substring match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    JournalEntryCreated,
    JournalEntryPosted,
    JournalEntryReversed,
    TenantCreated,
    TenantDeactivated,
    TenantReactivated,
}

impl AuditEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::JournalEntryCreated => "journal_entry_created",
            AuditEventType::JournalEntryPosted => "journal_entry_posted",
            AuditEventType::JournalEntryReversed => "journal_entry_reversed",
            AuditEventType::TenantCreated => "tenant_created",
            AuditEventType::TenantDeactivated => "tenant_deactivated",
            AuditEventType::TenantReactivated => "tenant_reactivated",
        }
    }

    pub fn parse(value: &str) -> AuditResult<Self> {
        match value {
            "journal_entry_created" => Ok(AuditEventType::JournalEntryCreated),
            "journal_entry_posted" => Ok(AuditEventType::JournalEntryPosted),
            "journal_entry_reversed" => Ok(AuditEventType::JournalEntryReversed),
            "tenant_created" => Ok(AuditEventType::TenantCreated),
            "tenant_deactivated" => Ok(AuditEventType::TenantDeactivated),
            "tenant_reactivated" => Ok(AuditEventType::TenantReactivated),
            other => Err(AuditLogError::Validation(format!(
                "unknown audit event type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Tie-breaker for events sharing the same timestamp; also the order
    /// the hash chain is built in.
    pub sequence: u64,
    pub event_type: AuditEventType,
    pub entity_type: String,
    pub entity_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub previous_hash: String,
    pub current_hash: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AuditEvent {
    fn to_document(&self) -> Document {
        let mut doc = serde_json::Map::new();
        doc.insert("id".into(), self.id.clone().into());
        doc.insert("created_at".into(), self.created_at.to_rfc3339().into());
        doc.insert("updated_at".into(), self.created_at.to_rfc3339().into());
        doc.insert("sequence".into(), self.sequence.into());
        doc.insert("event_type".into(), self.event_type.as_str().into());
        doc.insert("entity_type".into(), self.entity_type.clone().into());
        doc.insert("entity_id".into(), self.entity_id.clone().into());
        doc.insert("user_id".into(), self.user_id.clone().into());
        doc.insert("session_id".into(), self.session_id.clone().into());
        doc.insert("previous_hash".into(), self.previous_hash.clone().into());
        doc.insert("current_hash".into(), self.current_hash.clone().into());
        doc.insert("metadata".into(), self.metadata.clone().into());
        doc
    }

    fn from_document(doc: &Document) -> AuditResult<Self> {
        let get_str = |key: &str| -> AuditResult<String> {
            doc.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| AuditLogError::Validation(format!("missing field {key}")))
        };
        let created_at = DateTime::parse_from_rfc3339(&get_str("created_at")?)
            .map_err(|e| AuditLogError::Validation(e.to_string()))?
            .with_timezone(&Utc);

        Ok(AuditEvent {
            id: get_str("id")?,
            created_at,
            sequence: doc.get("sequence").and_then(serde_json::Value::as_u64).unwrap_or(0),
            event_type: AuditEventType::parse(&get_str("event_type")?)?,
            entity_type: get_str("entity_type")?,
            entity_id: get_str("entity_id")?,
            user_id: doc.get("user_id").and_then(|v| v.as_str()).map(str::to_string),
            session_id: doc.get("session_id").and_then(|v| v.as_str()).map(str::to_string),
            previous_hash: get_str("previous_hash")?,
            current_hash: get_str("current_hash")?,
            metadata: doc
                .get("metadata")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// Result of [`AuditLog::verify_integrity`]. `hash_errors` names events
/// whose own content no longer matches their recorded `current_hash`;
/// `chain_breaks` names events whose `previous_hash` no longer matches the
/// (recomputed) hash of the event before them -- a superset that also
/// catches downstream events left untouched but now pointing at a hash an
/// upstream tamper invalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub total_events: usize,
    pub hash_errors: Vec<String>,
    pub chain_breaks: Vec<String>,
    pub details: String,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_event(
        &self,
        event_type: AuditEventType,
        entity_type: &str,
        entity_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
        user_id: Option<String>,
        session_id: Option<String>,
    ) -> AuditResult<AuditEvent>;

    async fn get_events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditEvent>>;

    async fn get_events_by_type(
        &self,
        event_type: AuditEventType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditEvent>>;

    async fn get_all_events(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditEvent>>;

    async fn verify_integrity(&self) -> AuditResult<IntegrityReport>;

    async fn get_latest_hash(&self) -> AuditResult<Option<String>>;

    async fn count_events(&self) -> AuditResult<usize>;
}

fn in_range(created_at: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.is_none_or(|s| created_at >= s) && end.is_none_or(|e| created_at <= e)
}

fn canonical_hash(
    id: &str,
    created_at: DateTime<Utc>,
    event_type: AuditEventType,
    entity_type: &str,
    entity_id: &str,
    previous_hash: &str,
    user_id: Option<&str>,
    session_id: Option<&str>,
    metadata: &serde_json::Map<String, serde_json::Value>,
) -> String {
    // `serde_json::Map` is `BTreeMap`-backed in this workspace (the
    // `preserve_order` feature is never enabled), so inserting in any
    // order still serializes with lexicographically sorted keys and no
    // extra whitespace -- a canonical pre-image without a separate
    // normalization pass.
    let mut pre_image = serde_json::Map::new();
    pre_image.insert("id".into(), id.into());
    pre_image.insert("created_at".into(), created_at.to_rfc3339().into());
    pre_image.insert("event_type".into(), event_type.as_str().into());
    pre_image.insert("entity_type".into(), entity_type.into());
    pre_image.insert("entity_id".into(), entity_id.into());
    pre_image.insert("previous_hash".into(), previous_hash.into());
    pre_image.insert("user_id".into(), user_id.into());
    pre_image.insert("session_id".into(), session_id.into());
    pre_image.insert("metadata".into(), metadata.clone().into());

    let canonical = serde_json::Value::Object(pre_image).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serializes chain-extending appends; reads take no lock.
struct AppendGuard;

/// [`AuditLog`] backed by a [`Storage`] handle. Any `Storage` works,
/// including a [`accounting_tenancy::TenantAwareStorage`] decorator, in
/// which case each tenant sees and extends only its own chain.
pub struct StorageAuditLog {
    storage: Arc<dyn Storage>,
    append_lock: Mutex<AppendGuard>,
}

impl StorageAuditLog {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            append_lock: Mutex::new(AppendGuard),
        }
    }

    async fn all_events_sorted(&self) -> AuditResult<Vec<AuditEvent>> {
        let docs = self.storage.load_all(EVENTS_TABLE).await?;
        let mut events = docs
            .iter()
            .map(AuditEvent::from_document)
            .collect::<AuditResult<Vec<_>>>()?;
        events.sort_by(|a, b| a.sequence.cmp(&b.sequence));
        Ok(events)
    }
}

#[async_trait]
impl AuditLog for StorageAuditLog {
    async fn log_event(
        &self,
        event_type: AuditEventType,
        entity_type: &str,
        entity_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
        user_id: Option<String>,
        session_id: Option<String>,
    ) -> AuditResult<AuditEvent> {
        if entity_type.trim().is_empty() {
            return Err(AuditLogError::Validation("entity_type must be provided".into()));
        }
        if entity_id.trim().is_empty() {
            return Err(AuditLogError::Validation("entity_id must be provided".into()));
        }

        let _guard = self.append_lock.lock().await;

        // Reconciled from storage on every acquisition rather than trusted
        // from an in-process cache, so a second process sharing this table
        // can't leave us appending onto a stale tail.
        let existing = self.all_events_sorted().await?;
        let previous_hash = existing
            .last()
            .map(|e| e.current_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let sequence = existing.last().map_or(0, |e| e.sequence + 1);

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let current_hash = canonical_hash(
            &id,
            created_at,
            event_type,
            entity_type,
            entity_id,
            &previous_hash,
            user_id.as_deref(),
            session_id.as_deref(),
            &metadata,
        );

        let event = AuditEvent {
            id,
            created_at,
            sequence,
            event_type,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            user_id,
            session_id,
            previous_hash,
            current_hash,
            metadata,
        };

        self.storage
            .save(EVENTS_TABLE, &event.id, event.to_document())
            .await?;
        Ok(event)
    }

    async fn get_events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .all_events_sorted()
            .await?
            .into_iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .collect();
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn get_events_by_type(
        &self,
        event_type: AuditEventType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .all_events_sorted()
            .await?
            .into_iter()
            .filter(|e| e.event_type == event_type && in_range(e.created_at, start, end))
            .collect();
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn get_all_events(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> AuditResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .all_events_sorted()
            .await?
            .into_iter()
            .filter(|e| in_range(e.created_at, start, end))
            .collect();
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn verify_integrity(&self) -> AuditResult<IntegrityReport> {
        let events = self.all_events_sorted().await?;
        let mut hash_errors = Vec::new();
        let mut chain_breaks = Vec::new();
        let mut expected_previous = GENESIS_HASH.to_string();

        for event in &events {
            let recomputed = canonical_hash(
                &event.id,
                event.created_at,
                event.event_type,
                &event.entity_type,
                &event.entity_id,
                &event.previous_hash,
                event.user_id.as_deref(),
                event.session_id.as_deref(),
                &event.metadata,
            );
            if recomputed != event.current_hash {
                hash_errors.push(event.id.clone());
            }
            if event.previous_hash != expected_previous {
                chain_breaks.push(event.id.clone());
            }
            // The next link is checked against what this event's content
            // actually hashes to, not the (possibly tampered) `current_hash`
            // field, so a downstream event that still points at the old
            // hash is correctly flagged even though its own fields are
            // untouched.
            expected_previous = recomputed;
        }

        let valid = hash_errors.is_empty() && chain_breaks.is_empty();
        let details = if valid {
            format!("{} event(s) verified, chain intact", events.len())
        } else {
            format!(
                "{} hash error(s), {} chain break(s) across {} event(s)",
                hash_errors.len(),
                chain_breaks.len(),
                events.len()
            )
        };

        Ok(IntegrityReport {
            valid,
            total_events: events.len(),
            hash_errors,
            chain_breaks,
            details,
        })
    }

    async fn get_latest_hash(&self) -> AuditResult<Option<String>> {
        Ok(self.all_events_sorted().await?.last().map(|e| e.current_hash.clone()))
    }

    async fn count_events(&self) -> AuditResult<usize> {
        self.storage.count(EVENTS_TABLE).await.map_err(AuditLogError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accounting_storage::InMemoryStorage;
    use pretty_assertions::assert_eq;

    fn log() -> StorageAuditLog {
        StorageAuditLog::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn appends_records_with_hash_chain() {
        let log = log();

        let first = log
            .log_event(
                AuditEventType::JournalEntryCreated,
                "journal_entry",
                "je-1",
                serde_json::json!({"source": "test"}).as_object().unwrap().clone(),
                Some("user-1".into()),
                None,
            )
            .await
            .expect("append event");
        assert_eq!(first.previous_hash, "");
        assert_eq!(first.sequence, 0);
        assert!(!first.current_hash.is_empty());

        let second = log
            .log_event(
                AuditEventType::JournalEntryPosted,
                "journal_entry",
                "je-1",
                serde_json::Map::new(),
                Some("user-1".into()),
                None,
            )
            .await
            .expect("append event");
        assert_eq!(second.previous_hash, first.current_hash);
        assert_eq!(second.sequence, 1);

        let events = log.get_all_events(None, None, None).await.expect("events");
        assert_eq!(events.len(), 2);

        let report = log.verify_integrity().await.expect("verify");
        assert!(report.valid);
        assert_eq!(report.total_events, 2);
    }

    #[tokio::test]
    async fn detects_tampering_and_the_break_it_causes_downstream() {
        let log = log();

        for i in 0..3 {
            log.log_event(
                AuditEventType::JournalEntryCreated,
                "journal_entry",
                &format!("je-{i}"),
                serde_json::Map::new(),
                None,
                None,
            )
            .await
            .expect("append event");
        }

        let events = log.get_all_events(None, None, None).await.expect("events");
        let tampered_id = events[1].id.clone();
        let downstream_id = events[2].id.clone();

        let mut doc = log
            .storage
            .load(EVENTS_TABLE, &tampered_id)
            .await
            .unwrap()
            .unwrap();
        doc.insert(
            "metadata".into(),
            serde_json::json!({"tampered": true}),
        );
        log.storage.save(EVENTS_TABLE, &tampered_id, doc).await.unwrap();

        let report = log.verify_integrity().await.expect("verify");
        assert!(!report.valid);
        assert!(report.hash_errors.contains(&tampered_id));
        assert!(report.chain_breaks.contains(&downstream_id));
        assert!(!report.chain_breaks.contains(&tampered_id));
    }

    #[tokio::test]
    async fn filters_by_entity_and_by_type() {
        let log = log();
        log.log_event(
            AuditEventType::JournalEntryCreated,
            "journal_entry",
            "je-1",
            serde_json::Map::new(),
            None,
            None,
        )
        .await
        .unwrap();
        log.log_event(
            AuditEventType::JournalEntryPosted,
            "journal_entry",
            "je-1",
            serde_json::Map::new(),
            None,
            None,
        )
        .await
        .unwrap();
        log.log_event(
            AuditEventType::JournalEntryCreated,
            "journal_entry",
            "je-2",
            serde_json::Map::new(),
            None,
            None,
        )
        .await
        .unwrap();

        let for_je1 = log.get_events_for_entity("journal_entry", "je-1", None).await.unwrap();
        assert_eq!(for_je1.len(), 2);

        let created = log
            .get_events_by_type(AuditEventType::JournalEntryCreated, None, None, None)
            .await
            .unwrap();
        assert_eq!(created.len(), 2);

        assert_eq!(log.count_events().await.unwrap(), 3);
        let all = log.get_all_events(None, None, None).await.unwrap();
        assert_eq!(log.get_latest_hash().await.unwrap(), Some(all.last().unwrap().current_hash.clone()));
    }

    #[tokio::test]
    async fn rejects_blank_entity_identifiers() {
        let log = log();
        let err = log
            .log_event(
                AuditEventType::JournalEntryCreated,
                "",
                "je-1",
                serde_json::Map::new(),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuditLogError::Validation(_)));
    }

    #[tokio::test]
    async fn get_all_events_respects_start_and_end_bounds() {
        let log = log();
        for i in 0..3 {
            log.log_event(
                AuditEventType::JournalEntryCreated,
                "journal_entry",
                &format!("je-{i}"),
                serde_json::Map::new(),
                None,
                None,
            )
            .await
            .unwrap();
        }

        let all = log.get_all_events(None, None, None).await.unwrap();
        let middle = all[1].created_at;

        let from_middle = log.get_all_events(Some(middle), None, None).await.unwrap();
        assert_eq!(from_middle.len(), 2);

        let up_to_middle = log.get_all_events(None, Some(middle), None).await.unwrap();
        assert_eq!(up_to_middle.len(), 2);
    }
}

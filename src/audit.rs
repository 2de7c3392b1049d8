//! Structured audit/diagnostic logging for gateway-facing operations.
//!
//! Synchronous sink trait (no `async_trait` dependency) — interior
//! mutability is the async sink implementation's problem, not this trait's.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// What happened, for logging purposes only — never carries key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuditAction {
    EncryptPerformed { mode: &'static str, kek_algorithm: &'static str },
    DecryptPerformed { mode: String },
    DecryptFailed { reason: String },
    /// A stored envelope omitted `hmac` entirely and the gateway is
    /// configured to warn about it (`GatewayConfig::warn_on_missing_hmac`).
    DecryptMissingHmacWarning,
    MultipartInitiated,
    MultipartPartUploaded { part_number: u32 },
    MultipartCompleted { part_count: usize },
    MultipartAborted,
    MultipartSwept { reason: &'static str },
    KekRegistered { fingerprint: String },
    KekRotationRequested,
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub upload_id: Option<String>,
    pub action: AuditAction,
    pub success: bool,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            bucket: None,
            key: None,
            upload_id: None,
            action,
            success: true,
            detail: None,
        }
    }

    pub fn with_object(mut self, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self.key = Some(key.into());
        self
    }

    pub fn with_upload_id(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Where audit events go. Implement this for your SIEM/log system.
pub trait AuditSinkSync: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Logs events via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSinkSync for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            timestamp = %event.timestamp,
            bucket = ?event.bucket,
            key = ?event.key,
            upload_id = ?event.upload_id,
            action = ?event.action,
            success = event.success,
            detail = ?event.detail,
            "audit"
        );
    }
}

/// Discards every event. The default for callers with no sink configured.
pub struct NullAuditSink;

impl AuditSinkSync for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Collects events in memory (for tests and embedding callers).
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSinkSync for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.try_lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_collects_events() {
        let sink = InMemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditAction::MultipartInitiated).with_upload_id("u1"));
        sink.record(AuditEvent::new(AuditAction::MultipartAborted).with_upload_id("u1"));
        assert_eq!(sink.len().await, 2);
    }

    #[test]
    fn audit_event_never_needs_key_material_fields() {
        // No field on AuditEvent/AuditAction accepts raw key bytes; this is
        // a compile-time property of the type, exercised here only to keep
        // the construction path covered.
        let event = AuditEvent::new(AuditAction::DecryptFailed {
            reason: "integrity failure".into(),
        })
        .with_failure();
        assert!(!event.success);
    }
}

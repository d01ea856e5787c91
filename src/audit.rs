use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::scheduler::Priority;

/// Lifecycle stage recorded on an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Queued,
    Executed,
    RateLimited,
    Error,
}

/// One append-only row per lifecycle transition. A single logical request
/// usually produces several rows: a QUEUED row when it parks, then an
/// EXECUTED, RATE_LIMITED or ERROR row per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Correlates all rows of one logical request.
    pub request_id: Uuid,
    /// `"METHOD /path"`.
    pub endpoint: String,
    pub priority: Priority,
    pub status: AuditStatus,
    /// HTTP status of the attempt, when one was made.
    pub status_code: Option<u16>,
    /// Wall-clock duration of the attempt (or of the queue wait for
    /// terminal queue outcomes).
    pub duration_ms: Option<u64>,
    /// 1-based transport attempt this row belongs to; 0 before any attempt.
    pub attempt: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl AuditRecord {
    pub fn new(
        request_id: Uuid,
        endpoint: impl Into<String>,
        priority: Priority,
        status: AuditStatus,
    ) -> Self {
        Self {
            request_id,
            endpoint: endpoint.into(),
            priority,
            status,
            status_code: None,
            duration_ms: None,
            attempt: 0,
            timestamp_ms: unix_millis(),
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Injected append-only log collaborator.
///
/// Recording is fire-and-forget from the controller's perspective: a failing
/// sink is logged and never changes the outcome delivered to the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes a structured tracing row per transition. The default sink.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: AuditRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            target: "rategate::audit",
            request_id = %entry.request_id,
            endpoint = %entry.endpoint,
            priority = ?entry.priority,
            status = ?entry.status,
            status_code = entry.status_code,
            duration_ms = entry.duration_ms,
            attempt = entry.attempt,
            "audit"
        );
        Ok(())
    }
}

/// Collects rows in memory. Used by tests and small deployments that flush
/// rows elsewhere themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears everything recorded so far.
    pub fn drain(&self) -> Vec<AuditRecord> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemorySink {
    fn record(&self, entry: AuditRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}

/// Records a row on the sink. A failing sink is logged and never propagated.
pub(crate) fn emit(sink: &dyn AuditSink, entry: AuditRecord) {
    if let Err(error) = sink.record(entry) {
        warn!(target: "rategate::audit", %error, "audit sink failed; continuing");
    }
}

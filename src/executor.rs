use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use crate::audit::{self, AuditRecord, AuditSink, AuditStatus};
use crate::config::Category;
use crate::registry::BucketRegistry;
use crate::scheduler::Priority;
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// What one transport attempt amounted to.
pub(crate) enum ExecOutcome {
    /// The remote answered with a success status.
    Completed(ApiResponse),
    /// HTTP 429; the touched buckets have been force-emptied and the request
    /// may be re-queued.
    RateLimited,
    /// A non-429 error status. Not retried.
    UpstreamError(u16),
    /// The transport itself failed. Not retried.
    Failed(TransportError),
}

/// Performs exactly one transport call per admission and interprets the
/// result. Retry orchestration stays with the controller; the executor only
/// reports whether an attempt is worth repeating.
pub(crate) struct Executor {
    transport: Arc<dyn Transport>,
    audit: Arc<dyn AuditSink>,
    registry: Arc<BucketRegistry>,
}

impl Executor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
        registry: Arc<BucketRegistry>,
    ) -> Self {
        Self {
            transport,
            audit,
            registry,
        }
    }

    pub(crate) async fn execute(
        &self,
        request: &ApiRequest,
        categories: &[Category],
        request_id: Uuid,
        priority: Priority,
        attempt: u32,
    ) -> ExecOutcome {
        let started = Instant::now();
        let result = self.transport.send(request.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let row = AuditRecord::new(request_id, request.endpoint(), priority, AuditStatus::Executed)
            .with_duration_ms(duration_ms)
            .with_attempt(attempt);

        match result {
            Ok(response) if response.status == 429 => {
                // The remote signal is authoritative over the local count:
                // treat the rest of every touched window as exhausted.
                self.registry.force_empty(categories);
                debug!(
                    endpoint = %request.endpoint(),
                    attempt,
                    "remote rate limit hit, buckets emptied"
                );
                audit::emit(
                    self.audit.as_ref(),
                    AuditRecord {
                        status: AuditStatus::RateLimited,
                        status_code: Some(429),
                        ..row
                    },
                );
                ExecOutcome::RateLimited
            }
            Ok(response) if response.status >= 400 => {
                audit::emit(
                    self.audit.as_ref(),
                    AuditRecord {
                        status: AuditStatus::Error,
                        status_code: Some(response.status),
                        ..row
                    },
                );
                ExecOutcome::UpstreamError(response.status)
            }
            Ok(response) => {
                audit::emit(
                    self.audit.as_ref(),
                    AuditRecord {
                        status_code: Some(response.status),
                        ..row
                    },
                );
                ExecOutcome::Completed(response)
            }
            Err(error) => {
                audit::emit(
                    self.audit.as_ref(),
                    AuditRecord {
                        status: AuditStatus::Error,
                        ..row
                    },
                );
                ExecOutcome::Failed(error)
            }
        }
    }
}

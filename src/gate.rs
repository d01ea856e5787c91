use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, AuditRecord, AuditSink, AuditStatus, TracingSink};
use crate::bucket::BucketStatus;
use crate::classifier::Classifier;
use crate::config::{Category, GateConfig};
use crate::error::{Error, Result};
use crate::executor::{ExecOutcome, Executor};
use crate::registry::BucketRegistry;
use crate::scheduler::{Priority, Scheduler, Submission, Ticket};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Admission controller for outbound marketplace calls.
///
/// Every call is classified into its rate-limit categories, admitted when all
/// of them have capacity, queued by priority otherwise, executed exactly once
/// per admission, and audited at each transition. Instances are fully
/// independent; two gates (for two marketplace accounts, say) share no state.
///
/// Construction must happen inside a tokio runtime: the gate spawns its
/// dispatch loop at that point. The loop is aborted when the gate is dropped.
pub struct RateGate {
    classifier: Classifier,
    registry: Arc<BucketRegistry>,
    scheduler: Arc<Scheduler>,
    executor: Executor,
    audit: Arc<dyn AuditSink>,
    max_attempts: u32,
    default_max_wait: Option<Duration>,
    dispatch_task: JoinHandle<()>,
}

impl RateGate {
    /// Validates the configuration (fail-fast, before any request is
    /// accepted) and starts the dispatch loop.
    pub fn new(
        config: GateConfig,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::new(&config.routes)?;

        let registry = Arc::new(BucketRegistry::new(&config, Instant::now()));
        let scheduler = Arc::new(Scheduler::new());
        let executor = Executor::new(
            Arc::clone(&transport),
            Arc::clone(&audit),
            Arc::clone(&registry),
        );

        let dispatch_task = spawn_dispatch_loop(Arc::clone(&scheduler), Arc::clone(&registry));
        info!(
            categories = config.limits.len(),
            routes = config.routes.len(),
            "rate gate started"
        );

        Ok(Self {
            classifier,
            registry,
            scheduler,
            executor,
            audit,
            max_attempts: config.max_attempts,
            default_max_wait: config.default_max_wait,
            dispatch_task,
        })
    }

    /// Like [`RateGate::new`] with the tracing audit sink.
    pub fn with_tracing_audit(config: GateConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::new(config, transport, Arc::new(TracingSink))
    }

    /// Schedules a call with cost 1 and the configured default maximum wait.
    pub async fn schedule(&self, request: ApiRequest, priority: Priority) -> Result<ApiResponse> {
        self.schedule_with(request, priority, 1, self.default_max_wait)
            .await
    }

    /// Schedules a call, waiting at most `max_wait` in the queue per
    /// admission (`None` waits indefinitely). The cost is debited from every
    /// category the call classifies into.
    pub async fn schedule_with(
        &self,
        request: ApiRequest,
        priority: Priority,
        cost: u32,
        max_wait: Option<Duration>,
    ) -> Result<ApiResponse> {
        let request_id = Uuid::new_v4();
        let categories = self.classifier.classify(&request.method, &request.path);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.wait_for_admission(&request, &categories, cost, priority, request_id, attempt, max_wait)
                .await?;

            match self
                .executor
                .execute(&request, &categories, request_id, priority, attempt)
                .await
            {
                ExecOutcome::Completed(response) => return Ok(response),
                ExecOutcome::UpstreamError(status) => return Err(Error::UpstreamStatus { status }),
                ExecOutcome::Failed(error) => return Err(Error::Transport(error)),
                ExecOutcome::RateLimited => {
                    if attempt >= self.max_attempts {
                        return Err(Error::RateLimitExhausted { attempts: attempt });
                    }
                    // The touched buckets are now empty; the next admission
                    // parks until their windows turn over.
                }
            }
        }
    }

    /// Read-only snapshot of every bucket, for observability and tests.
    pub fn status(&self) -> HashMap<Category, BucketStatus> {
        self.registry.status(Instant::now())
    }

    /// Blocks until the buckets admit the request, the wait budget runs out,
    /// or the caller is cancelled. On success the buckets are debited.
    #[allow(clippy::too_many_arguments)]
    async fn wait_for_admission(
        &self,
        request: &ApiRequest,
        categories: &[Category],
        cost: u32,
        priority: Priority,
        request_id: Uuid,
        attempt: u32,
        max_wait: Option<Duration>,
    ) -> Result<()> {
        let submission =
            self.scheduler
                .submit(&self.registry, categories, cost, priority, Instant::now());
        let ticket = match submission {
            Submission::Admitted => return Ok(()),
            Submission::Parked(ticket) => ticket,
        };

        audit::emit(
            self.audit.as_ref(),
            AuditRecord::new(request_id, request.endpoint(), priority, AuditStatus::Queued)
                .with_attempt(attempt),
        );

        let enqueued = Instant::now();
        let Ticket { seq, priority: level, mut rx } = ticket;
        let mut guard = QueueGuard {
            scheduler: &self.scheduler,
            seq,
            priority: level,
            armed: true,
        };

        let admitted = match max_wait {
            None => (&mut rx).await.is_ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(outcome) => outcome.is_ok(),
                Err(_) => {
                    if self.scheduler.cancel(seq, level) {
                        guard.armed = false;
                        let waited = enqueued.elapsed();
                        audit::emit(
                            self.audit.as_ref(),
                            AuditRecord::new(
                                request_id,
                                request.endpoint(),
                                priority,
                                AuditStatus::Error,
                            )
                            .with_duration_ms(waited.as_millis() as u64)
                            .with_attempt(attempt),
                        );
                        return Err(Error::AdmissionTimeout { waited });
                    }
                    // Admitted in the same instant the wait expired; the
                    // admission wins and the debit is ours to use.
                    (&mut rx).await.is_ok()
                }
            },
        };

        guard.armed = false;
        if admitted {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }
}

impl Drop for RateGate {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("max_attempts", &self.max_attempts)
            .field("default_max_wait", &self.default_max_wait)
            .finish()
    }
}

/// Re-polls at least once per smallest configured interval and immediately
/// after every enqueue. Refill is computed lazily on access; there are no
/// per-bucket timers.
fn spawn_dispatch_loop(scheduler: Arc<Scheduler>, registry: Arc<BucketRegistry>) -> JoinHandle<()> {
    let tick = registry.min_interval();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = scheduler.woken() => {}
                _ = tokio::time::sleep(tick) => {}
            }
            scheduler.dispatch(&registry, Instant::now());
        }
    })
}

/// Removes a parked request from the queue if its caller stops waiting for
/// any reason other than admission (future dropped mid-await).
struct QueueGuard<'a> {
    scheduler: &'a Scheduler,
    seq: u64,
    priority: Priority,
    armed: bool,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.scheduler.cancel(self.seq, self.priority);
        }
    }
}

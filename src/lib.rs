//! rategate: admission control for outbound marketplace API calls.
//!
//! The marketplace enforces per-category rate limits (a global budget plus
//! per-area budgets such as catalog or orders). This crate sits in front of
//! the HTTP transport and decides, per call, whether to send it now, park it
//! in a priority queue until capacity frees up, or fail it. Every lifecycle
//! transition is written to an injected audit sink.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rategate::{ApiRequest, ApiResponse, GateConfig, Priority, RateGate};
//!
//! # async fn run() -> rategate::Result<()> {
//! let transport = Arc::new(|req: ApiRequest| async move {
//!     // issue the real HTTP call here
//!     Ok::<_, rategate::TransportError>(ApiResponse::new(200))
//! });
//! let gate = RateGate::with_tracing_audit(GateConfig::marketplace_defaults(), transport)?;
//!
//! let response = gate
//!     .schedule(ApiRequest::new("GET", "/v3/catalog/items"), Priority::Normal)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod bucket;
pub mod classifier;
pub mod config;
pub mod error;
mod executor;
pub mod gate;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use audit::{AuditRecord, AuditSink, AuditStatus, MemorySink, TracingSink};
pub use bucket::{Bucket, BucketStatus};
pub use classifier::Classifier;
pub use config::{Category, CategoryLimit, GateConfig, RouteRule};
pub use error::{Error, Result};
pub use gate::RateGate;
pub use registry::BucketRegistry;
pub use scheduler::Priority;
pub use transport::{ApiRequest, ApiResponse, Transport, TransportError};

//! Provisioning and reconciliation engine for guildforge.
//!
//! Given a declarative [`Blueprint`] of roles, categories and channels, the
//! engine snapshots a tenant's live resources, plans the minimal set of
//! creates, updates, moves and deletes that bring it in line, and executes
//! that plan atomically: a failing step unwinds everything the session
//! created, newest first.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ProvisioningService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Snapshot   │ │ Reconciler  │ │  AtomicExecutor     │    │
//! │  │ + Protected │ │ (matching)  │ │  + rollback stack   │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │ Platform │   │  Audit   │
//!        │ (RocksDB)│   │  (HTTP)  │   │  Sink    │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use guildforge_engine::{HttpResourceClient, Provisioner, ProvisioningService, ProvisionRequest};
//! use guildforge_core::{Blueprint, InitiatorId, TenantId};
//! use guildforge_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/guildforge")?);
//! let client = Arc::new(HttpResourceClient::new("http://platform:8080", None)?);
//! let service = ProvisioningService::with_defaults(client, store);
//!
//! let blueprint = Blueprint::from_json(r#"{"categories":[{"name":"Support"}]}"#)?;
//! let request = ProvisionRequest::new(TenantId::new(1), InitiatorId::new(2), blueprint);
//! let key = service.start_provisioning(request).await?;
//!
//! println!("Provisioned under session {key}");
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the session state machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod cache;
pub mod cleanup;
pub mod client;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod matching;
pub mod plan;
pub mod prereq;
pub mod reconciler;
pub mod rollback;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod types;

pub use audit::{AuditEvent, AuditEventType, AuditSink, JsonLinesAuditSink, MemoryAuditSink, TracingAuditSink};
pub use cache::SessionCache;
pub use cleanup::{CleanupReport, CleanupScheduler};
pub use client::{Capabilities, HttpResourceClient, LiveResource, ResourceClient, ResourceDraft};
pub use error::{ClientError, ClientResult, EngineError, Result};
pub use executor::{AtomicExecutor, ExecutionReport, ExecutorOptions};
pub use matching::MatchRule;
pub use plan::{PlanAction, ReconciliationPlan};
pub use reconciler::Reconciler;
pub use rollback::{RollbackFailure, RollbackGate, RollbackSummary};
pub use service::{Provisioner, ProvisioningService, ResumeOutcome};
pub use session::ActiveSessions;
pub use snapshot::{LiveSnapshot, ProtectedResourceSet};
pub use types::{EngineConfig, ProvisionRequest};

// Re-export commonly used types from dependencies for convenience
pub use guildforge_core::{Blueprint, InitiatorId, ResourceId, ResourceKind, SessionKey, TenantId};
pub use guildforge_store::{DeployedPanel, SessionState, WizardSession};

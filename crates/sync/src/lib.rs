//! Synchronization engine: batch catalog sync, CLOB tradability audits,
//! realtime price ingestion over sharded WebSocket connections, historical
//! backfill, retention, and the orchestrator that owns their lifecycles.

pub mod backfill;
pub mod batch;
pub mod clob_audit;
pub mod convert;
pub mod orchestrator;
pub mod realtime;
pub mod retention;

pub use backfill::BackfillManager;
pub use batch::{BatchStatus, BatchSyncManager, SyncOutcome};
pub use clob_audit::ClobAuditOutcome;
pub use orchestrator::{Clients, Orchestrator, OrchestratorStatus};
pub use realtime::RealtimeSyncManager;
pub use retention::RetentionSweeper;

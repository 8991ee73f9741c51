//! Service layer - business logic orchestration
//!
//! Each service wraps the repository (or the data directory) for one
//! feature area.

mod backup;
pub mod lock;
pub mod logging;
pub mod migration;
mod query;
mod status;
mod verify;

pub use backup::{BackupService, ClearResult};
pub use lock::MigrationLock;
pub use logging::{EntryPoint, EventCount, LogEntry, LogEvent, LogStats, LoggingService};
pub use migration::{
    new_run_id, ActionKind, ActionStatus, MigrationAction, MigrationReport, MigrationService,
};
pub use query::QueryService;
pub use status::{GameSummary, StatusService, StatusSummary};
pub use verify::{CheckResult, CheckStatus, VerifyResult, VerifyService, VerifySummary};

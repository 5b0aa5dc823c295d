//! Services
//!
//! This module contains the orchestration built on top of the database layer:
//!
//! - `Dispatcher` - parses command envelopes and routes them to engine adapters
//! - `backup` - scheduled snapshot export of the networked database
//!
//! Services hold no cross-request state; everything stateful lives in the
//! database layer's `ConnectionManager`.

pub mod backup;
pub mod dispatcher;

pub use backup::{BackupJob, BackupScheduler, ExportJob, ExportSummary};
pub use dispatcher::{Dispatcher, Outcome, Response, Status};

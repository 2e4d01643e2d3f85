// ABOUTME: Batch reconciliation path: watermark fetch, ledger deletes, upserts, bulk loads
// ABOUTME: Deletes apply strictly before upserts inside every sync cycle

pub mod applier;
pub mod bulk;
pub mod engine;
pub mod ledger;

pub use applier::{ApplyBatch, TargetApplier};
pub use engine::{CycleStats, SyncEngine};

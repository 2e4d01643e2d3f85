// ABOUTME: Command implementations for each CLI entry point
// ABOUTME: Exports stream, sync, bulk-sync, and checkpoint commands

pub mod checkpoint;
pub mod stream;
pub mod sync;

pub use checkpoint::{reset as checkpoint_reset, show as checkpoint_show};
pub use stream::stream;
pub use sync::{bulk_sync, sync};

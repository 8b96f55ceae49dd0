//! Mirror reconciliation and its scheduling.

mod reconciler;
mod scheduler;

pub use reconciler::{ContainerSyncService, SyncError, SyncReport};
pub use scheduler::PeriodicTask;

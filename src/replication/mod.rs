mod coordinator;
mod health;
mod service;
mod sync;

pub use coordinator::{Priority, RequestCoordinator, RequestHandle};
pub use health::{
    next, HealthEvent, HealthMonitor, HealthState, OperationType, Outcome, Thresholds,
};
pub use service::{HttpReplicationClient, PushReceipt, ReplicationService};
pub use sync::SyncService;

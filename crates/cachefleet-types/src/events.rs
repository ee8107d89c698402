//! Event types for runtime observability
//!
//! Events are the user-visible trail of what the engine did to a runtime:
//! scaling decisions, health regressions, teardown progress.

use crate::meta::NamespacedName;
use crate::runtime::RuntimeType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping a runtime event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Runtime the event is about
    pub runtime: NamespacedName,

    pub runtime_type: RuntimeType,

    pub event_type: EventType,

    /// Machine-readable reason, e.g. `RuntimeScaleInSuccess`
    pub reason: String,

    pub message: String,
}

impl RuntimeEvent {
    pub fn new(
        runtime: NamespacedName,
        runtime_type: RuntimeType,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            runtime,
            runtime_type,
            event_type,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.event_type == EventType::Warning
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Well-known event reasons
pub mod event_reasons {
    pub const SCALE_OUT_SUCCEEDED: &str = "RuntimeScaleOutSuccess";
    pub const SCALE_IN_SUCCEEDED: &str = "RuntimeScaleInSuccess";
    pub const SCALE_IN_FAILED: &str = "RuntimeScaleInFailed";
    pub const MASTER_UNHEALTHY: &str = "MasterUnhealthy";
    pub const WORKERS_UNHEALTHY: &str = "WorkersUnhealthy";
    pub const FUSES_UNHEALTHY: &str = "FusesUnhealthy";
    pub const CACHE_CLEANUP_FAILED: &str = "CacheCleanupFailed";
    pub const FORCED_TEARDOWN: &str = "ForcedTeardown";
    pub const RUNTIME_DELETED: &str = "RuntimeDeleted";
}

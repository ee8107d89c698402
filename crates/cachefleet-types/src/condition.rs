//! Runtime conditions
//!
//! A condition is a timestamped fact about one aspect of a runtime. The
//! condition list holds at most one entry per [`ConditionType`]; updates
//! replace the existing entry of the same type in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types recorded on a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    MasterInitialized,
    MasterReady,
    WorkersInitialized,
    WorkersReady,
    WorkersScaledIn,
    WorkersScaledOut,
    FusesInitialized,
    FusesReady,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterInitialized => "MasterInitialized",
            Self::MasterReady => "MasterReady",
            Self::WorkersInitialized => "WorkersInitialized",
            Self::WorkersReady => "WorkersReady",
            Self::WorkersScaledIn => "WorkersScaledIn",
            Self::WorkersScaledOut => "WorkersScaledOut",
            Self::FusesInitialized => "FusesInitialized",
            Self::FusesReady => "FusesReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// Well-known condition reasons
pub mod reasons {
    pub const MASTER_INITIALIZED: &str = "Master is initialized";
    pub const MASTER_READY: &str = "Master is ready";
    pub const MASTER_NOT_READY: &str = "Master is not ready";
    pub const WORKERS_INITIALIZED: &str = "Workers are initialized";
    pub const WORKERS_READY: &str = "Workers are ready";
    pub const WORKERS_PARTIAL_READY: &str = "Workers are partially ready";
    pub const WORKERS_NOT_READY: &str = "Workers are not ready";
    pub const WORKERS_SCALED_IN: &str = "Workers scaled in";
    pub const WORKERS_SCALED_OUT: &str = "Workers scaled out";
    pub const FUSES_INITIALIZED: &str = "Fuses are initialized";
    pub const FUSES_READY: &str = "Fuses are ready";
    pub const FUSES_NOT_READY: &str = "Fuses are not ready";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_probe_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_probe_time: now,
            last_transition_time: now,
        }
    }

    /// Whether two conditions describe the same fact, ignoring timestamps
    pub fn same_fact(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace `condition` by type.
///
/// An existing entry that already states the same fact is left untouched, so
/// repeated updates do not change the list. When only reason or message
/// change, the original transition time is kept.
pub fn update_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) if existing.same_fact(&condition) => {}
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

pub fn get_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

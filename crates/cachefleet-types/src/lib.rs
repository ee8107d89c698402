//! CacheFleet Types - Resource model for the cache cluster operator
//!
//! CacheFleet runs one cache cluster per dataset: a master tier, a worker
//! tier holding the cached blocks, and a fuse client tier exposing the
//! dataset to application pods. This crate defines the resources the
//! engine reconciles and the cluster objects it reads along the way.
//!
//! ## Key Concepts
//!
//! - **Runtime**: One deployed cache cluster; spec owned by users, status by the engine
//! - **Dataset**: The data the runtime caches, carrying placement constraints
//! - **Workload / Pod / Node**: Cluster objects backing each tier
//! - **ConfigMap**: Companion objects for rendered values and worker endpoints
//! - **Condition**: Timestamped status facts, at most one per type
//! - **RuntimeLabels**: Node label naming that marks cache membership

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod condition;
pub mod dataset;
pub mod events;
pub mod labels;
pub mod meta;
pub mod runtime;
pub mod units;
pub mod workload;

// Re-export main types
pub use condition::{
    get_condition, reasons, update_condition, Condition, ConditionStatus, ConditionType,
};
pub use dataset::{Dataset, DatasetPhase, DatasetSpec, DatasetStatus, PlacementMode};
pub use events::{event_reasons, EventType, RuntimeEvent};
pub use labels::{RuntimeLabels, EXCLUSIVE_LABEL_KEY, FUSE_BALLOON_KEY, LABEL_TRUE};
pub use meta::{LabelSelector, NamespacedName, ObjectMeta};
pub use runtime::{
    CacheStateList, CacheStateName, Level, MasterSpec, MediumType, FuseSpec, Runtime,
    RuntimePhase, RuntimeSpec, RuntimeStatus, RuntimeType, TieredStore, WorkerSpec,
};
pub use units::{bytes_size, from_human_size, UnitsError};
pub use workload::{
    ConfigMap, Node, NodeAddress, NodeAddressType, Pod, PodPhase, Taint, TaintEffect, Toleration,
    TolerationOperator, Workload, WorkloadKind, WorkloadSpec, WorkloadStatus,
};

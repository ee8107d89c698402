//! Stored resource abstraction

use cachefleet_types::{ConfigMap, Dataset, Node, ObjectMeta, Pod, Runtime, Workload};

/// A typed object the store can hold
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name used in errors and logs
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Copy the status portion of `source` into `self`.
    ///
    /// Resources without a status subresource take everything but metadata.
    fn take_status(&mut self, source: Self) {
        let metadata = self.metadata().clone();
        *self = source;
        *self.metadata_mut() = metadata;
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
    ($ty:ty, $kind:literal, status) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn take_status(&mut self, source: Self) {
                self.status = source.status;
            }
        }
    };
}

impl_resource!(Runtime, "Runtime", status);
impl_resource!(Dataset, "Dataset", status);
impl_resource!(Workload, "Workload", status);
impl_resource!(Pod, "Pod");
impl_resource!(Node, "Node");
impl_resource!(ConfigMap, "ConfigMap");

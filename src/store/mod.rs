//! Resource store access
//!
//! The reconciler reads and writes Kubernetes objects only through
//! [`ClusterStore`]. [`KubeStore`] talks to the API server; [`MemoryStore`]
//! keeps everything in memory for tests.

mod kubernetes;
mod memory;

pub use self::kubernetes::KubeStore;
pub use self::memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};

use crate::controller::error::Result;
use crate::crd::FoundationDBCluster;

/// Namespace and name of a cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object store holding the declared cluster and its child objects
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Option<FoundationDBCluster>>;

    /// Write the status subresource.
    ///
    /// Fails with a conflict if the cluster changed since it was read.
    async fn update_status(&self, cluster: &FoundationDBCluster) -> Result<FoundationDBCluster>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()>;

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, service: &Service) -> Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create or replace a config map
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::ResourceExt;

use super::{ClusterKey, ClusterStore};
use crate::controller::error::{Error, Result};
use crate::crd::FoundationDBCluster;

type ObjectKey = (String, String);

#[derive(Default)]
struct Objects {
    clusters: BTreeMap<ClusterKey, FoundationDBCluster>,
    pods: BTreeMap<ObjectKey, Pod>,
    pvcs: BTreeMap<ObjectKey, PersistentVolumeClaim>,
    services: BTreeMap<ObjectKey, Service>,
    config_maps: BTreeMap<ObjectKey, ConfigMap>,
    writes: usize,
    status_updates: usize,
}

/// In-memory [`ClusterStore`] with resourceVersion checks on status writes.
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<Objects>>,
}

fn object_key<T: ResourceExt>(object: &T) -> ObjectKey {
    (object.namespace().unwrap_or_default(), object.name_any())
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn next_version(version: Option<&String>) -> String {
    let current = version.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (current + 1).to_string()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a cluster as if it was created through the API
    pub fn insert_cluster(&self, mut cluster: FoundationDBCluster) -> ClusterKey {
        let key = ClusterKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any());
        if cluster.metadata.resource_version.is_none() {
            cluster.metadata.resource_version = Some("1".to_string());
        }
        self.objects().clusters.insert(key.clone(), cluster);
        key
    }

    /// Apply a spec change the way the API server does, bumping the generation
    pub fn update_spec(&self, key: &ClusterKey, update: impl FnOnce(&mut FoundationDBCluster)) {
        let mut objects = self.objects();
        if let Some(cluster) = objects.clusters.get_mut(key) {
            update(cluster);
            cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(0) + 1);
            cluster.metadata.resource_version =
                Some(next_version(cluster.metadata.resource_version.as_ref()));
        }
    }

    pub fn cluster(&self, key: &ClusterKey) -> Option<FoundationDBCluster> {
        self.objects().clusters.get(key).cloned()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.objects().pods.keys().map(|(_, n)| n.clone()).collect()
    }

    pub fn pvc_names(&self) -> Vec<String> {
        self.objects().pvcs.keys().map(|(_, n)| n.clone()).collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.objects().services.keys().map(|(_, n)| n.clone()).collect()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.objects().config_maps.get(&key(namespace, name)).cloned()
    }

    /// Number of create, delete and apply calls that changed an object
    pub fn writes(&self) -> usize {
        self.objects().writes
    }

    pub fn status_updates(&self) -> usize {
        self.objects().status_updates
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Option<FoundationDBCluster>> {
        Ok(self.objects().clusters.get(key).cloned())
    }

    async fn update_status(&self, cluster: &FoundationDBCluster) -> Result<FoundationDBCluster> {
        let key = ClusterKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any());
        let mut objects = self.objects();
        let stored = objects
            .clusters
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if stored.metadata.resource_version != cluster.metadata.resource_version {
            return Err(Error::ConflictError(key.to_string()));
        }

        stored.status = cluster.status.clone();
        stored.metadata.resource_version =
            Some(next_version(stored.metadata.resource_version.as_ref()));
        let updated = stored.clone();
        objects.status_updates += 1;
        Ok(updated)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.objects().pods.get(&key(namespace, name)).cloned())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let mut objects = self.objects();
        if objects.pods.insert(object_key(pod), pod.clone()).is_none() {
            objects.writes += 1;
        }
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut objects = self.objects();
        if objects.pods.remove(&key(namespace, name)).is_some() {
            objects.writes += 1;
        }
        Ok(())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.objects().pvcs.get(&key(namespace, name)).cloned())
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        let mut objects = self.objects();
        if objects.pvcs.insert(object_key(pvc), pvc.clone()).is_none() {
            objects.writes += 1;
        }
        Ok(())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let mut objects = self.objects();
        if objects.pvcs.remove(&key(namespace, name)).is_some() {
            objects.writes += 1;
        }
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.objects().services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        let mut objects = self.objects();
        if objects
            .services
            .insert(object_key(service), service.clone())
            .is_none()
        {
            objects.writes += 1;
        }
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut objects = self.objects();
        if objects.services.remove(&key(namespace, name)).is_some() {
            objects.writes += 1;
        }
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.objects().config_maps.get(&key(namespace, name)).cloned())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let mut objects = self.objects();
        let previous = objects
            .config_maps
            .insert(object_key(config_map), config_map.clone());
        if previous.as_ref().map(|c| &c.data) != Some(&config_map.data) {
            objects.writes += 1;
        }
        Ok(())
    }
}

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ClusterKey, ClusterStore};
use crate::controller::error::{Error, Result};
use crate::crd::FoundationDBCluster;
use crate::resources::FIELD_MANAGER;

/// [`ClusterStore`] backed by the Kubernetes API.
///
/// Reads are bounded by `read_timeout`, writes by `write_timeout`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl KubeStore {
    pub fn new(client: Client, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            client,
            read_timeout,
            write_timeout,
        }
    }

    fn api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = NamespaceResourceScope>,
        <T as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<T>(&self, namespace: &str, name: &str) -> Result<Option<T>>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = self.api(namespace);
        bounded(self.read_timeout, api.get_opt(name)).await
    }

    async fn create<T>(&self, object: &T) -> Result<()>
    where
        T: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = self.api(&object.namespace().unwrap_or_default());
        match bounded(self.write_timeout, api.create(&PostParams::default(), object)).await {
            Ok(_) => {
                debug!("Created {}", object.name_any());
                Ok(())
            }
            // Created by an earlier pass whose read raced the cache
            Err(Error::KubeError(kube::Error::Api(e))) if e.code == 409 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete<T>(&self, namespace: &str, name: &str) -> Result<()>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = self.api(namespace);
        match bounded(self.write_timeout, api.delete(name, &DeleteParams::default())).await {
            Ok(_) => {
                debug!("Deleted {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Run a kube call under a timeout
async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = std::result::Result<T, kube::Error>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Error::TimeoutError(timeout))?
        .map_err(Error::from)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Option<FoundationDBCluster>> {
        self.get_opt(&key.namespace, &key.name).await
    }

    async fn update_status(&self, cluster: &FoundationDBCluster) -> Result<FoundationDBCluster> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<FoundationDBCluster> = self.api(&namespace);

        // Including the resourceVersion makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": cluster.status,
        });

        match bounded(
            self.write_timeout,
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
        {
            Err(Error::KubeError(kube::Error::Api(e))) if e.code == 409 => Err(
                Error::ConflictError(format!("{}/{}", namespace, name)),
            ),
            other => other,
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.get_opt(namespace, name).await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        self.create(pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Pod>(namespace, name).await
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.get_opt(namespace, name).await
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<()> {
        self.create(pvc).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<PersistentVolumeClaim>(namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.get_opt(namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        self.create(service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Service>(namespace, name).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.get_opt(namespace, name).await
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let api: Api<ConfigMap> = self.api(&config_map.namespace().unwrap_or_default());
        let name = config_map.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        bounded(
            self.write_timeout,
            api.patch(&name, &params, &Patch::Apply(config_map)),
        )
        .await?;
        debug!("Applied ConfigMap: {}", name);
        Ok(())
    }
}

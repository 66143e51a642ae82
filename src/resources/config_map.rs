use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use crate::crd::FoundationDBCluster;
use crate::resources::common::{child_metadata, cluster_labels};

/// Key holding the cluster file contents
pub const CLUSTER_FILE_KEY: &str = "fdb.cluster";

pub fn config_map_name(cluster: &FoundationDBCluster) -> String {
    format!("{}-config", cluster.name_any())
}

/// Desired data of the cluster ConfigMap
pub fn config_map_data(cluster: &FoundationDBCluster) -> BTreeMap<String, String> {
    let connection_string = cluster
        .status
        .as_ref()
        .map(|s| s.connection_string.clone())
        .unwrap_or_default();

    let mut data = BTreeMap::new();
    if !connection_string.is_empty() {
        data.insert(CLUSTER_FILE_KEY.to_string(), connection_string);
    }
    data
}

pub fn generate_config_map(cluster: &FoundationDBCluster) -> ConfigMap {
    ConfigMap {
        metadata: child_metadata(cluster, config_map_name(cluster), cluster_labels(cluster)),
        data: Some(config_map_data(cluster)),
        ..Default::default()
    }
}

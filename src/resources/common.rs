//! Common utilities for Kubernetes resource generation
//!
//! This module provides shared functions and constants used across
//! all resource generators to ensure consistency and reduce duplication.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::{FoundationDBCluster, ProcessGroupStatus};

/// API version for FoundationDBCluster CRD
pub const API_VERSION: &str = "apps.foundationdb.org/v1beta2";

/// Kind for FoundationDBCluster CRD
pub const KIND: &str = "FoundationDBCluster";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "fdb-operator";

pub const CLUSTER_LABEL: &str = "foundationdb.org/fdb-cluster-name";
pub const PROCESS_GROUP_ID_LABEL: &str = "foundationdb.org/fdb-process-group-id";
pub const PROCESS_CLASS_LABEL: &str = "foundationdb.org/fdb-process-class";

/// Generate an owner reference for a FoundationDBCluster
///
/// This ensures that all child resources are properly owned by the cluster
/// and will be garbage collected when the cluster is deleted.
pub fn owner_reference(cluster: &FoundationDBCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Generate standard labels for all resources belonging to a cluster
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            "foundationdb".to_string(),
        ),
        (
            "app.kubernetes.io/instance".to_string(),
            cluster_name.to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Labels for a cluster including user-defined labels from the spec.
///
/// User labels can override standard labels except for the cluster identifier.
pub fn cluster_labels(cluster: &FoundationDBCluster) -> BTreeMap<String, String> {
    let mut labels = standard_labels(&cluster.name_any());

    for (key, value) in &cluster.spec.labels {
        if key != CLUSTER_LABEL {
            labels.insert(key.clone(), value.clone());
        }
    }

    labels
}

/// Labels identifying the objects of one process group
pub fn process_group_labels(
    cluster: &FoundationDBCluster,
    process_group: &ProcessGroupStatus,
) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster);
    labels.insert(
        PROCESS_GROUP_ID_LABEL.to_string(),
        process_group.process_group_id.clone(),
    );
    labels.insert(
        PROCESS_CLASS_LABEL.to_string(),
        process_group.process_class.to_string(),
    );
    labels
}

/// Metadata for a child object owned by the cluster
pub fn child_metadata(
    cluster: &FoundationDBCluster,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    }
}

/// Name of the pod and service of a process group
pub fn process_group_object_name(cluster: &FoundationDBCluster, process_group_id: &str) -> String {
    format!("{}-{}", cluster.name_any(), process_group_id)
}

/// Name of the volume claim of a process group
pub fn pvc_name(cluster: &FoundationDBCluster, process_group_id: &str) -> String {
    format!("{}-{}-data", cluster.name_any(), process_group_id)
}

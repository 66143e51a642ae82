use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::{FoundationDBCluster, ProcessGroupStatus};
use crate::resources::common::{child_metadata, process_group_labels, pvc_name};

/// Volume claim for a stateful process group
pub fn generate_pvc(
    cluster: &FoundationDBCluster,
    process_group: &ProcessGroupStatus,
) -> PersistentVolumeClaim {
    let name = pvc_name(cluster, &process_group.process_group_id);
    let labels = process_group_labels(cluster, process_group);

    PersistentVolumeClaim {
        metadata: child_metadata(cluster, name, labels),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.storage.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(cluster.spec.storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

//! Process group pods
//!
//! The pod template is intentionally small: one `foundationdb` container
//! running `fdbmonitor` with the cluster file mounted from the cluster
//! ConfigMap, and a data volume for stateful classes.

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, Volume, VolumeMount,
};

use crate::crd::{FoundationDBCluster, ProcessGroupStatus};
use crate::resources::common::{
    child_metadata, process_group_labels, process_group_object_name, pvc_name,
};
use crate::resources::config_map::{CLUSTER_FILE_KEY, config_map_name};

pub const FDB_PORT: i32 = 4501;

/// Image used when the cluster does not set one
pub const DEFAULT_IMAGE: &str = "foundationdb/foundationdb";

pub fn generate_pod(cluster: &FoundationDBCluster, process_group: &ProcessGroupStatus) -> Pod {
    let name = process_group_object_name(cluster, &process_group.process_group_id);
    let labels = process_group_labels(cluster, process_group);
    let image = format!(
        "{}:{}",
        cluster.spec.image.as_deref().unwrap_or(DEFAULT_IMAGE),
        cluster.spec.version
    );

    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name(cluster),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: "/var/dynamic-conf".to_string(),
        ..Default::default()
    }];

    if process_group.process_class.is_stateful() {
        volumes.push(Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name(cluster, &process_group.process_group_id),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "data".to_string(),
            mount_path: "/var/fdb/data".to_string(),
            ..Default::default()
        });
    }

    let env = vec![
        EnvVar {
            name: "FDB_CLUSTER_FILE".to_string(),
            value: Some(format!("/var/dynamic-conf/{}", CLUSTER_FILE_KEY)),
            ..Default::default()
        },
        EnvVar {
            name: "FDB_PROCESS_CLASS".to_string(),
            value: Some(process_group.process_class.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "FDB_INSTANCE_ID".to_string(),
            value: Some(process_group.process_group_id.clone()),
            ..Default::default()
        },
    ];

    Pod {
        metadata: child_metadata(cluster, name, labels),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "foundationdb".to_string(),
                image: Some(image),
                env: Some(env),
                ports: Some(vec![ContainerPort {
                    container_port: FDB_PORT,
                    name: Some("fdb".to_string()),
                    ..Default::default()
                }]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

//! Per process group services
//!
//! When `routing.definePodServices` is set, every process group gets a
//! ClusterIP service selecting exactly its pod, giving the process a stable
//! address across pod recreation.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::crd::{FoundationDBCluster, ProcessGroupStatus};
use crate::resources::common::{
    CLUSTER_LABEL, PROCESS_GROUP_ID_LABEL, child_metadata, process_group_labels,
    process_group_object_name,
};
use crate::resources::pod::FDB_PORT;

pub fn generate_process_group_service(
    cluster: &FoundationDBCluster,
    process_group: &ProcessGroupStatus,
) -> Service {
    let name = process_group_object_name(cluster, &process_group.process_group_id);
    let labels = process_group_labels(cluster, process_group);

    let selector = BTreeMap::from([
        (
            CLUSTER_LABEL.to_string(),
            labels.get(CLUSTER_LABEL).cloned().unwrap_or_default(),
        ),
        (
            PROCESS_GROUP_ID_LABEL.to_string(),
            process_group.process_group_id.clone(),
        ),
    ]);

    Service {
        metadata: child_metadata(cluster, name, labels),
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: FDB_PORT,
                target_port: Some(IntOrString::Int(FDB_PORT)),
                name: Some("fdb".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

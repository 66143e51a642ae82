pub mod common;
pub mod config_map;
pub mod pod;
pub mod pvc;
pub mod service;

pub use common::{
    API_VERSION, FIELD_MANAGER, KIND, cluster_labels, owner_reference, process_group_labels,
    standard_labels,
};

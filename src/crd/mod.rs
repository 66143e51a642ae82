mod foundationdb_cluster;
mod process_group;

pub use foundationdb_cluster::*;
pub use process_group::*;

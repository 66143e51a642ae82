use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::resources::config_map::{config_map_name, generate_config_map};

/// Keep the cluster file ConfigMap in line with the connection string
pub struct UpdateConfigMap;

#[async_trait]
impl Step for UpdateConfigMap {
    fn name(&self) -> &'static str {
        "UpdateConfigMap"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let namespace = pass.cluster.namespace().unwrap_or_default();
        let name = config_map_name(&pass.cluster);
        let desired = generate_config_map(&pass.cluster);

        let current = ctx.store.get_config_map(&namespace, &name).await?;
        if current.as_ref().and_then(|c| c.data.as_ref()) == desired.data.as_ref() {
            return Ok(None);
        }

        info!(config_map = %name, "Updating cluster ConfigMap");
        ctx.store.apply_config_map(&desired).await?;
        Ok(None)
    }
}

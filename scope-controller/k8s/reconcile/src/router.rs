use crate::{key::InstanceKey, store::Store};
use scope_controller_k8s_api::ResourceExt;

/// Notes that a `ScopeTemplate` was created, updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateChange {
    pub name: String,
}

/// Finds the instances that must be reconciled again when a template changes.
#[derive(Clone, Debug)]
pub struct TemplateRouter<S> {
    store: S,
}

impl<S: Store> TemplateRouter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a key for every instance referencing the changed template.
    ///
    /// A failed lookup is logged and yields no keys: a dropped notification
    /// is recovered by the next periodic resync.
    pub async fn route(&self, change: &TemplateChange) -> Vec<InstanceKey> {
        let instances = match self.store.list_instances().await {
            Ok(instances) => instances,
            Err(error) => {
                tracing::warn!(template = %change.name, %error, "Failed to list ScopeInstances");
                return Vec::new();
            }
        };

        let keys = instances
            .iter()
            .filter(|si| si.spec.scope_template_name == change.name)
            .map(|si| InstanceKey::new(si.name_any()))
            .collect::<Vec<_>>();
        tracing::debug!(template = %change.name, instances = keys.len(), "Routed template change");
        keys
    }
}

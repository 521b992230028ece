use crate::{
    k8s::{ResourceExt, ScopeInstance, ScopeTemplate},
    reconcile::{InstanceKey, Store, TemplateChange, TemplateRouter},
    scheduler::Queue,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{sync::mpsc, time};
use tracing::{debug, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Turns watch events into work: instance changes are queued directly and
/// template changes are handed to the router.
pub struct Index {
    queue: Queue,
    templates: mpsc::UnboundedSender<TemplateChange>,
}

impl Index {
    pub fn shared(queue: Queue, templates: mpsc::UnboundedSender<TemplateChange>) -> SharedIndex {
        Arc::new(RwLock::new(Self { queue, templates }))
    }

    fn template_changed(&self, name: String) {
        if self.templates.send(TemplateChange { name }).is_err() {
            debug!("Template router has stopped");
        }
    }
}

impl kubert::index::IndexClusterResource<ScopeInstance> for Index {
    fn apply(&mut self, instance: ScopeInstance) {
        self.queue.enqueue(InstanceKey::new(instance.name_unchecked()));
    }

    fn delete(&mut self, name: String) {
        // Bindings are owned by the instance and removed by the API server's
        // garbage collector.
        debug!(%name, "ScopeInstance deleted");
    }
}

impl kubert::index::IndexClusterResource<ScopeTemplate> for Index {
    fn apply(&mut self, template: ScopeTemplate) {
        self.template_changed(template.name_unchecked());
    }

    fn delete(&mut self, name: String) {
        self.template_changed(name);
    }
}

/// Queues every instance that references a changed template.
pub async fn route_templates<S: Store>(
    router: TemplateRouter<S>,
    mut changes: mpsc::UnboundedReceiver<TemplateChange>,
    queue: Queue,
) {
    while let Some(change) = changes.recv().await {
        for key in router.route(&change).await {
            queue.enqueue(key);
        }
    }
}

/// Periodically queues every instance so that missed events are eventually
/// reconciled.
pub async fn resync<S: Store>(store: S, queue: Queue, period: time::Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match store.list_instances().await {
            Ok(instances) => {
                debug!(instances = instances.len(), "Resyncing");
                for instance in instances {
                    queue.enqueue(InstanceKey::new(instance.name_unchecked()));
                }
            }
            Err(error) => warn!(%error, "Failed to list ScopeInstances for resync"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        k8s::{ScopeInstanceSpec, ScopeTemplateSpec},
        scheduler,
    };
    use kubert::index::IndexClusterResource;

    fn mk_instance(name: &str) -> ScopeInstance {
        ScopeInstance::new(
            name,
            ScopeInstanceSpec {
                scope_template_name: "tmpl".to_string(),
                namespaces: vec![],
            },
        )
    }

    #[tokio::test]
    async fn instance_applies_are_queued() {
        let (queue, mut keys) = scheduler::queue();
        let (tx, mut changes) = mpsc::unbounded_channel();
        let mut index = Index { queue, templates: tx };

        IndexClusterResource::<ScopeInstance>::apply(&mut index, mk_instance("inst"));
        IndexClusterResource::<ScopeInstance>::delete(&mut index, "other".to_string());

        assert_eq!(keys.try_recv().ok(), Some(InstanceKey::new("inst")));
        assert!(keys.try_recv().is_err(), "deletes must not be queued");
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn template_events_are_routed() {
        let (queue, mut keys) = scheduler::queue();
        let (tx, mut changes) = mpsc::unbounded_channel();
        let mut index = Index { queue, templates: tx };

        let template = ScopeTemplate::new("tmpl", ScopeTemplateSpec::default());
        IndexClusterResource::<ScopeTemplate>::apply(&mut index, template);
        IndexClusterResource::<ScopeTemplate>::delete(&mut index, "gone".to_string());

        assert_eq!(
            changes.try_recv().ok(),
            Some(TemplateChange {
                name: "tmpl".to_string()
            })
        );
        assert_eq!(
            changes.try_recv().ok(),
            Some(TemplateChange {
                name: "gone".to_string()
            })
        );
        assert!(keys.try_recv().is_err());
    }
}

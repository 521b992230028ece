use crate::{
    binding::{self, Binding, DesiredBinding},
    gc,
    key::InstanceKey,
    owner::{self, OwnerLabels, Ownership},
    store::Store,
    Error,
};
use scope_controller_k8s_api::{ScopeInstance, ScopeTemplate};
use tracing::{debug, info, instrument};

/// Drives the bindings of a single `ScopeInstance` toward the state described
/// by the instance and its template.
#[derive(Clone, Debug)]
pub struct Reconciler<S> {
    store: S,
}

/// Summarizes the mutations made by a reconcile pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,

    /// Set when the referenced template did not exist and all of the
    /// instance's bindings were removed.
    pub orphaned: bool,
}

enum Action {
    Create(Binding),
    Update(Binding),
    Unchanged(Binding),
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs a single pass. Any store failure aborts the pass; passes are
    /// idempotent, so the caller should simply run it again later.
    #[instrument(skip(self), fields(instance = %key))]
    pub async fn reconcile(&self, key: &InstanceKey) -> Result<Outcome, Error> {
        let instance = match self.store.get_instance(&key.name).await {
            Ok(instance) => instance,
            Err(error) if error.is_not_found() => {
                return Err(Error::InstanceNotFound(key.clone()));
            }
            Err(error) => return Err(error.into()),
        };

        let template_name = &instance.spec.scope_template_name;
        let template = match self.store.get_template(template_name).await {
            Ok(template) => template,
            Err(error) if error.is_not_found() => {
                let uid = owner::uid("ScopeInstance", &instance)?;
                let deleted =
                    gc::delete_matching(&self.store, &owner::instance_selector(&uid)).await?;
                info!(template = %template_name, deleted, "ScopeTemplate not found; revoked all bindings");
                return Ok(Outcome {
                    deleted,
                    orphaned: true,
                    ..Outcome::default()
                });
            }
            Err(error) => return Err(error.into()),
        };

        let ownership = Ownership::new(&instance, &template)?;

        // New bindings must be in place before outdated ones are swept so that
        // a grant that remains valid is never absent.
        let mut outcome = self.ensure_bindings(&instance, &template, &ownership).await?;
        outcome.deleted +=
            gc::delete_matching(&self.store, &ownership.stale_instance_selector()).await?;
        outcome.deleted +=
            gc::delete_matching(&self.store, &ownership.stale_template_selector()).await?;

        debug!(?outcome, "Reconciled");
        Ok(outcome)
    }

    async fn ensure_bindings(
        &self,
        instance: &ScopeInstance,
        template: &ScopeTemplate,
        ownership: &Ownership,
    ) -> Result<Outcome, Error> {
        let desired = binding::synthesize(instance, template, ownership);

        // Every desired binding is looked up before anything is written so
        // that an ambiguous identity fails the pass without side effects.
        let mut actions = Vec::with_capacity(desired.len());
        for d in desired {
            actions.push(self.plan(d, ownership).await?);
        }

        let mut outcome = Outcome::default();
        for action in actions {
            match action {
                Action::Create(binding) => {
                    let created = self.store.create_binding(binding).await?;
                    info!(binding = %created, "Created");
                    outcome.created += 1;
                }
                Action::Update(binding) => {
                    let updated = self.store.update_binding(binding).await?;
                    info!(binding = %updated, "Updated");
                    outcome.updated += 1;
                }
                Action::Unchanged(binding) => {
                    debug!(%binding, "Up to date");
                    outcome.unchanged += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn plan(&self, desired: DesiredBinding, ownership: &Ownership) -> Result<Action, Error> {
        let DesiredBinding {
            scope,
            labels,
            binding,
        } = desired;

        let mut existing = self
            .store
            .list_bindings(
                scope.kind(),
                scope.namespace(),
                &ownership.identity_selector(&labels.role),
            )
            .await?;

        let mut current = match existing.len() {
            0 => return Ok(Action::Create(binding)),
            1 => existing.remove(0),
            _ => {
                return Err(Error::AmbiguousBinding {
                    kind: scope.kind(),
                    role: labels.role,
                    scope: scope.to_string(),
                })
            }
        };

        let meta = current.metadata();
        let up_to_date = owner::is_owned_by(meta, ownership.instance_uid())
            && current.subjects() == binding.subjects()
            && meta
                .labels
                .as_ref()
                .and_then(OwnerLabels::from_map)
                .as_ref()
                == Some(&labels);
        if up_to_date {
            return Ok(Action::Unchanged(current));
        }

        current.adopt(&binding);
        Ok(Action::Update(current))
    }
}

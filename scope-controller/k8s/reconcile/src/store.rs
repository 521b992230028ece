use crate::binding::{Binding, BindingKind};
use scope_controller_k8s_api::{ScopeInstance, ScopeTemplate, Selector};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The object store the controller reads and mutates.
///
/// Implementations must report a missing object as [`Error::NotFound`] so that
/// deleted templates and lost delete races can be told apart from failures.
/// Updates must be rejected with [`Error::Conflict`] when the object changed
/// since it was read.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get_instance(&self, name: &str) -> Result<ScopeInstance>;

    async fn get_template(&self, name: &str) -> Result<ScopeTemplate>;

    async fn list_instances(&self) -> Result<Vec<ScopeInstance>>;

    /// Lists bindings of the given kind matching `selector`. A namespace
    /// restricts `RoleBinding`s to that namespace and is ignored for
    /// `ClusterRoleBinding`s.
    async fn list_bindings(
        &self,
        kind: BindingKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<Binding>>;

    async fn create_binding(&self, binding: Binding) -> Result<Binding>;

    async fn update_binding(&self, binding: Binding) -> Result<Binding>;

    async fn delete_binding(&self, binding: &Binding) -> Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("{op} timed out")]
    Timeout { op: &'static str },

    #[error("{kind} has no name")]
    Unnamed { kind: BindingKind },

    #[error(transparent)]
    Api(#[from] scope_controller_k8s_api::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[async_trait::async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn get_instance(&self, name: &str) -> Result<ScopeInstance> {
        (**self).get_instance(name).await
    }

    async fn get_template(&self, name: &str) -> Result<ScopeTemplate> {
        (**self).get_template(name).await
    }

    async fn list_instances(&self) -> Result<Vec<ScopeInstance>> {
        (**self).list_instances().await
    }

    async fn list_bindings(
        &self,
        kind: BindingKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<Binding>> {
        (**self).list_bindings(kind, namespace, selector).await
    }

    async fn create_binding(&self, binding: Binding) -> Result<Binding> {
        (**self).create_binding(binding).await
    }

    async fn update_binding(&self, binding: Binding) -> Result<Binding> {
        (**self).update_binding(binding).await
    }

    async fn delete_binding(&self, binding: &Binding) -> Result<()> {
        (**self).delete_binding(binding).await
    }
}

use crate::{
    k8s::{
        self, Api, ClusterRoleBinding, DeleteParams, ListParams, PostParams, RoleBinding,
        ScopeInstance, ScopeTemplate, Selector,
    },
    reconcile::{
        store::{Error, Result},
        Binding, BindingKind, Store,
    },
};
use std::future::Future;
use tokio::time;

/// A [`Store`] backed by the Kubernetes API.
///
/// Every request is bounded by a timeout so that a stalled API server cannot
/// wedge a reconcile worker.
#[derive(Clone)]
pub struct KubeStore {
    client: k8s::Client,
    timeout: time::Duration,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: k8s::Client, timeout: time::Duration) -> Self {
        Self { client, timeout }
    }

    async fn call<T>(
        &self,
        op: &'static str,
        kind: &str,
        name: &str,
        fut: impl Future<Output = Result<T, k8s::Error>>,
    ) -> Result<T> {
        match time::timeout(self.timeout, fut).await {
            Ok(Ok(rsp)) => Ok(rsp),
            Ok(Err(error)) => Err(classify(kind, name, error)),
            Err(_) => Err(Error::Timeout { op }),
        }
    }

    fn cluster_role_bindings(&self) -> Api<ClusterRoleBinding> {
        Api::all(self.client.clone())
    }

    fn role_bindings(&self, namespace: Option<&str>) -> Api<RoleBinding> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get_instance(&self, name: &str) -> Result<ScopeInstance> {
        let api = Api::<ScopeInstance>::all(self.client.clone());
        self.call("get", "ScopeInstance", name, api.get(name)).await
    }

    async fn get_template(&self, name: &str) -> Result<ScopeTemplate> {
        let api = Api::<ScopeTemplate>::all(self.client.clone());
        self.call("get", "ScopeTemplate", name, api.get(name)).await
    }

    async fn list_instances(&self) -> Result<Vec<ScopeInstance>> {
        let api = Api::<ScopeInstance>::all(self.client.clone());
        let list = self
            .call("list", "ScopeInstance", "", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn list_bindings(
        &self,
        kind: BindingKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<Binding>> {
        let params = ListParams::default().labels(&selector.to_string());
        let bindings = match kind {
            BindingKind::ClusterRoleBinding => {
                let api = self.cluster_role_bindings();
                self.call("list", "ClusterRoleBinding", "", api.list(&params))
                    .await?
                    .items
                    .into_iter()
                    .map(Binding::Cluster)
                    .collect()
            }
            BindingKind::RoleBinding => {
                let api = self.role_bindings(namespace);
                self.call("list", "RoleBinding", "", api.list(&params))
                    .await?
                    .items
                    .into_iter()
                    .map(Binding::Namespaced)
                    .collect()
            }
        };
        Ok(bindings)
    }

    async fn create_binding(&self, binding: Binding) -> Result<Binding> {
        let params = PostParams::default();
        let name = binding
            .metadata()
            .generate_name
            .clone()
            .or_else(|| binding.name().map(ToString::to_string))
            .unwrap_or_default();
        match binding {
            Binding::Cluster(crb) => {
                let api = self.cluster_role_bindings();
                let created = self
                    .call("create", "ClusterRoleBinding", &name, api.create(&params, &crb))
                    .await?;
                Ok(Binding::Cluster(created))
            }
            Binding::Namespaced(rb) => {
                let api = self.role_bindings(rb.metadata.namespace.as_deref());
                let created = self
                    .call("create", "RoleBinding", &name, api.create(&params, &rb))
                    .await?;
                Ok(Binding::Namespaced(created))
            }
        }
    }

    async fn update_binding(&self, binding: Binding) -> Result<Binding> {
        let params = PostParams::default();
        let name = binding
            .name()
            .ok_or(Error::Unnamed {
                kind: binding.kind(),
            })?
            .to_string();
        match binding {
            Binding::Cluster(crb) => {
                let api = self.cluster_role_bindings();
                let updated = self
                    .call(
                        "update",
                        "ClusterRoleBinding",
                        &name,
                        api.replace(&name, &params, &crb),
                    )
                    .await?;
                Ok(Binding::Cluster(updated))
            }
            Binding::Namespaced(rb) => {
                let api = self.role_bindings(rb.metadata.namespace.as_deref());
                let updated = self
                    .call("update", "RoleBinding", &name, api.replace(&name, &params, &rb))
                    .await?;
                Ok(Binding::Namespaced(updated))
            }
        }
    }

    async fn delete_binding(&self, binding: &Binding) -> Result<()> {
        let params = DeleteParams::default();
        let name = binding.name().ok_or(Error::Unnamed {
            kind: binding.kind(),
        })?;
        match binding {
            Binding::Cluster(_) => {
                let api = self.cluster_role_bindings();
                self.call("delete", "ClusterRoleBinding", name, api.delete(name, &params))
                    .await?;
            }
            Binding::Namespaced(_) => {
                let api = self.role_bindings(binding.namespace());
                self.call("delete", "RoleBinding", name, api.delete(name, &params))
                    .await?;
            }
        }
        Ok(())
    }
}

fn classify(kind: &str, name: &str, error: k8s::Error) -> Error {
    match error {
        k8s::Error::Api(ref rsp) if rsp.code == 404 => Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        k8s::Error::Api(ref rsp) if rsp.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        error => Error::Api(error),
    }
}

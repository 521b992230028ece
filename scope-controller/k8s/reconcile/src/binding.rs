use crate::owner::{OwnerLabels, Ownership};
use scope_controller_k8s_api::{
    ClusterRoleBinding, ObjectMeta, RbacSubject, RoleBinding, RoleRef, ScopeInstance,
    ScopeTemplate, RBAC_API_GROUP, ROLE_REF_KIND,
};
use std::{collections::HashSet, fmt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ClusterRoleBinding,
    RoleBinding,
}

/// Where a binding grants its role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Cluster,
    Namespace(String),
}

/// A grant managed by the controller, in either of its two concrete shapes.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Cluster(ClusterRoleBinding),
    Namespaced(RoleBinding),
}

/// A binding the controller wants to exist. Its name is assigned by the
/// store on creation.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredBinding {
    pub scope: Scope,
    pub labels: OwnerLabels,
    pub binding: Binding,
}

/// Computes the bindings an instance should have for a template: one per
/// role, cluster-wide when the instance lists no namespaces and otherwise once
/// in each listed namespace.
///
/// Each (scope, role) pair is synthesized at most once. A namespace listed
/// more than once is bound once, and a role listed more than once is bound
/// once to the union of its subjects.
pub fn synthesize(
    instance: &ScopeInstance,
    template: &ScopeTemplate,
    ownership: &Ownership,
) -> Vec<DesiredBinding> {
    let scopes = if instance.spec.is_cluster_scoped() {
        vec![Scope::Cluster]
    } else {
        let mut seen = HashSet::new();
        instance
            .spec
            .namespaces
            .iter()
            .filter(|ns| seen.insert(*ns))
            .map(|ns| Scope::Namespace(ns.clone()))
            .collect()
    };
    let roles = merge_roles(template);

    let mut desired = Vec::with_capacity(scopes.len() * roles.len());
    for scope in scopes {
        for (role, subjects) in roles.iter() {
            let labels = ownership.labels(role);
            let metadata = ObjectMeta {
                generate_name: Some(format!("{}-", role)),
                namespace: match &scope {
                    Scope::Cluster => None,
                    Scope::Namespace(ns) => Some(ns.clone()),
                },
                labels: Some(labels.to_map()),
                owner_references: Some(vec![ownership.owner_reference().clone()]),
                ..Default::default()
            };
            let subjects = subjects.clone();
            let role_ref = RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: ROLE_REF_KIND.to_string(),
                name: role.to_string(),
            };

            let binding = match scope {
                Scope::Cluster => Binding::Cluster(ClusterRoleBinding {
                    metadata,
                    role_ref,
                    subjects: Some(subjects),
                }),
                Scope::Namespace(_) => Binding::Namespaced(RoleBinding {
                    metadata,
                    role_ref,
                    subjects: Some(subjects),
                }),
            };

            desired.push(DesiredBinding {
                scope: scope.clone(),
                labels,
                binding,
            });
        }
    }
    desired
}

/// Groups the template's roles by name, in order of first appearance, with
/// each subject listed once.
fn merge_roles(template: &ScopeTemplate) -> Vec<(&str, Vec<RbacSubject>)> {
    let mut roles = Vec::<(&str, Vec<RbacSubject>)>::new();
    for role in template.spec.cluster_roles.iter() {
        let idx = match roles
            .iter()
            .position(|(name, _)| *name == role.generate_name)
        {
            Some(idx) => idx,
            None => {
                roles.push((role.generate_name.as_str(), Vec::new()));
                roles.len() - 1
            }
        };
        let subjects = &mut roles[idx].1;
        for subject in role.subjects.iter().map(RbacSubject::from) {
            if !subjects.contains(&subject) {
                subjects.push(subject);
            }
        }
    }
    roles
}

// === impl BindingKind ===

impl BindingKind {
    pub const ALL: [BindingKind; 2] = [BindingKind::ClusterRoleBinding, BindingKind::RoleBinding];
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClusterRoleBinding => f.write_str("ClusterRoleBinding"),
            Self::RoleBinding => f.write_str("RoleBinding"),
        }
    }
}

// === impl Scope ===

impl Scope {
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::Cluster => BindingKind::ClusterRoleBinding,
            Self::Namespace(_) => BindingKind::RoleBinding,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Cluster => None,
            Self::Namespace(ns) => Some(ns),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Namespace(ns) => write!(f, "namespace {}", ns),
        }
    }
}

// === impl Binding ===

impl Binding {
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::Cluster(_) => BindingKind::ClusterRoleBinding,
            Self::Namespaced(_) => BindingKind::RoleBinding,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Cluster(b) => &b.metadata,
            Self::Namespaced(b) => &b.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Cluster(b) => &mut b.metadata,
            Self::Namespaced(b) => &mut b.metadata,
        }
    }

    /// The store-assigned name, if the binding has been created.
    pub fn name(&self) -> Option<&str> {
        self.metadata().name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn subjects(&self) -> &[RbacSubject] {
        let subjects = match self {
            Self::Cluster(b) => &b.subjects,
            Self::Namespaced(b) => &b.subjects,
        };
        subjects.as_deref().unwrap_or_default()
    }

    pub fn role_ref(&self) -> &RoleRef {
        match self {
            Self::Cluster(b) => &b.role_ref,
            Self::Namespaced(b) => &b.role_ref,
        }
    }

    /// Copies the mutable parts of `desired` onto this binding: its labels
    /// (merged over any others already present), owner references and
    /// subjects. The name, namespace and role reference are left untouched.
    pub fn adopt(&mut self, desired: &Binding) {
        let labels = desired.metadata().labels.iter().flatten();
        let meta = self.metadata_mut();
        meta.labels
            .get_or_insert_with(Default::default)
            .extend(labels.map(|(k, v)| (k.clone(), v.clone())));
        meta.owner_references = desired.metadata().owner_references.clone();
        let subjects = Some(desired.subjects().to_vec());
        match self {
            Self::Cluster(b) => b.subjects = subjects,
            Self::Namespaced(b) => b.subjects = subjects,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .name()
            .or(self.metadata().generate_name.as_deref())
            .unwrap_or_default();
        match self.namespace() {
            Some(ns) => write!(f, "{} {}/{}", self.kind(), ns, name),
            None => write!(f, "{} {}", self.kind(), name),
        }
    }
}

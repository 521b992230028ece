use crate::RbacSubject;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares a reusable set of cluster roles and the subjects granted each of
/// them.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.io.operator-framework",
    version = "v1",
    kind = "ScopeTemplate"
)]
#[serde(rename_all = "camelCase")]
pub struct ScopeTemplateSpec {
    #[serde(default)]
    pub cluster_roles: Vec<ClusterRoleTemplate>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleTemplate {
    /// Names the referenced `ClusterRole`. Also used as the generate-name
    /// prefix of each binding created for it.
    pub generate_name: String,

    #[serde(default)]
    pub subjects: Vec<Subject>,
}

/// Applies a `ScopeTemplate` to a set of namespaces, or to the whole cluster
/// when no namespaces are listed.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.io.operator-framework",
    version = "v1",
    kind = "ScopeInstance"
)]
#[serde(rename_all = "camelCase")]
pub struct ScopeInstanceSpec {
    pub scope_template_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

/// A principal granted a role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
}

// === impl ScopeInstanceSpec ===

impl ScopeInstanceSpec {
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespaces.is_empty()
    }
}

// === impl Subject ===

impl From<&Subject> for RbacSubject {
    fn from(s: &Subject) -> Self {
        RbacSubject {
            kind: s.kind.clone(),
            name: s.name.clone(),
            namespace: s.namespace.clone(),
            api_group: s.api_group.clone(),
        }
    }
}

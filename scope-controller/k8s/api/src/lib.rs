#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod scope;

pub use self::{
    labels::Selector,
    scope::{
        ClusterRoleTemplate, ScopeInstance, ScopeInstanceSpec, ScopeTemplate, ScopeTemplateSpec,
        Subject,
    },
};
pub use k8s_openapi::{
    api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject as RbacSubject},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams, ResourceExt},
    Client, Error, Resource,
};

/// The API group of the `ClusterRole`s referenced by every managed binding.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// The kind of role referenced by every managed binding.
pub const ROLE_REF_KIND: &str = "ClusterRole";

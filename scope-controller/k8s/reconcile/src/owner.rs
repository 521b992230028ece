//! Identity labels attached to every binding the controller manages.
//!
//! The label set acts as a composite key: a binding belongs to an instance,
//! a template and one of the template's roles, and records the spec hashes it
//! was derived from so that stale bindings can be selected for deletion.

use crate::{fingerprint, Error};
use scope_controller_k8s_api::{
    labels::Map, ObjectMeta, OwnerReference, Resource, ResourceExt, ScopeInstance, ScopeTemplate,
    Selector,
};

pub const INSTANCE_UID_LABEL: &str = "operators.coreos.io/scopeInstanceUID";
pub const TEMPLATE_UID_LABEL: &str = "operators.coreos.io/scopeTemplateUID";
pub const INSTANCE_HASH_LABEL: &str = "operators.coreos.io/scopeInstanceHash";
pub const TEMPLATE_HASH_LABEL: &str = "operators.coreos.io/scopeTemplateHash";
pub const ROLE_LABEL: &str = "operators.coreos.io/generateName";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerLabels {
    pub instance_uid: String,
    pub template_uid: String,
    pub instance_hash: String,
    pub template_hash: String,
    pub role: String,
}

/// Everything needed to label and link the bindings of one instance/template
/// pair, computed once per reconcile pass.
#[derive(Clone, Debug)]
pub struct Ownership {
    instance_uid: String,
    template_uid: String,
    instance_hash: String,
    template_hash: String,
    owner_ref: OwnerReference,
}

/// Selects every binding owned by the instance, regardless of template.
pub fn instance_selector(instance_uid: &str) -> Selector {
    Selector::default().equals(INSTANCE_UID_LABEL, instance_uid)
}

/// Checks the owner references, which unlike labels are enforced by the
/// store, for a reference to the instance.
pub fn is_owned_by(meta: &ObjectMeta, instance_uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| r.uid == instance_uid)
}

pub(crate) fn uid<T: ResourceExt>(kind: &'static str, resource: &T) -> Result<String, Error> {
    resource.uid().ok_or_else(|| Error::MissingUid {
        kind,
        name: resource.name_any(),
    })
}

// === impl OwnerLabels ===

impl OwnerLabels {
    pub fn to_map(&self) -> Map {
        [
            (INSTANCE_UID_LABEL, &self.instance_uid),
            (TEMPLATE_UID_LABEL, &self.template_uid),
            (INSTANCE_HASH_LABEL, &self.instance_hash),
            (TEMPLATE_HASH_LABEL, &self.template_hash),
            (ROLE_LABEL, &self.role),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    /// Reads the identity labels from a label map, ignoring any unrelated
    /// labels. Returns `None` unless all of them are present.
    pub fn from_map(labels: &Map) -> Option<Self> {
        let get = |k: &str| labels.get(k).cloned();
        Some(Self {
            instance_uid: get(INSTANCE_UID_LABEL)?,
            template_uid: get(TEMPLATE_UID_LABEL)?,
            instance_hash: get(INSTANCE_HASH_LABEL)?,
            template_hash: get(TEMPLATE_HASH_LABEL)?,
            role: get(ROLE_LABEL)?,
        })
    }
}

// === impl Ownership ===

impl Ownership {
    pub fn new(instance: &ScopeInstance, template: &ScopeTemplate) -> Result<Self, Error> {
        let instance_hash =
            fingerprint::hash_spec(&instance.spec).map_err(|source| Error::Fingerprint {
                kind: "ScopeInstance",
                source,
            })?;
        let template_hash =
            fingerprint::hash_spec(&template.spec).map_err(|source| Error::Fingerprint {
                kind: "ScopeTemplate",
                source,
            })?;
        let instance_uid = uid("ScopeInstance", instance)?;
        let owner_ref = instance.owner_ref(&()).ok_or_else(|| Error::MissingUid {
            kind: "ScopeInstance",
            name: instance.name_any(),
        })?;

        Ok(Self {
            instance_uid,
            template_uid: uid("ScopeTemplate", template)?,
            instance_hash,
            template_hash,
            owner_ref,
        })
    }

    pub fn instance_uid(&self) -> &str {
        &self.instance_uid
    }

    pub fn labels(&self, role: &str) -> OwnerLabels {
        OwnerLabels {
            instance_uid: self.instance_uid.clone(),
            template_uid: self.template_uid.clone(),
            instance_hash: self.instance_hash.clone(),
            template_hash: self.template_hash.clone(),
            role: role.to_string(),
        }
    }

    pub fn owner_reference(&self) -> &OwnerReference {
        &self.owner_ref
    }

    /// Selects the bindings that should be unique for a given role.
    pub fn identity_selector(&self, role: &str) -> Selector {
        Selector::default()
            .equals(INSTANCE_UID_LABEL, &self.instance_uid)
            .equals(TEMPLATE_UID_LABEL, &self.template_uid)
            .equals(ROLE_LABEL, role)
    }

    /// Selects bindings derived from an outdated instance spec.
    pub fn stale_instance_selector(&self) -> Selector {
        instance_selector(&self.instance_uid).not_equals(INSTANCE_HASH_LABEL, &self.instance_hash)
    }

    /// Selects bindings derived from an outdated spec of the current template.
    pub fn stale_template_selector(&self) -> Selector {
        instance_selector(&self.instance_uid)
            .equals(TEMPLATE_UID_LABEL, &self.template_uid)
            .not_equals(TEMPLATE_HASH_LABEL, &self.template_hash)
    }
}

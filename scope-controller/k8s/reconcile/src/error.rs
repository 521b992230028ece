use crate::{binding::BindingKind, key::InstanceKey, store};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The instance being reconciled has been deleted. Its bindings are
    /// collected through their owner references.
    #[error("ScopeInstance {0} not found")]
    InstanceNotFound(InstanceKey),

    #[error(transparent)]
    Store(#[from] store::Error),

    /// More than one binding carries the identity labels of a single desired
    /// binding. Picking one could grant or revoke access unexpectedly, so the
    /// pass fails instead.
    #[error("more than one {kind} found for ClusterRole {role} in {scope}")]
    AmbiguousBinding {
        kind: BindingKind,
        role: String,
        scope: String,
    },

    #[error("{kind} {name} has no metadata.uid")]
    MissingUid { kind: &'static str, name: String },

    #[error("failed to hash {kind} spec: {source}")]
    Fingerprint {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Indicates whether the error was caused by a missing store object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::InstanceNotFound(_) => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

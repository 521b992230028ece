use std::fmt;

/// Identifies a `ScopeInstance` to be reconciled.
///
/// Instances are cluster-scoped, so the name alone is sufficient.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct InstanceKey {
    pub name: String,
}

impl InstanceKey {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

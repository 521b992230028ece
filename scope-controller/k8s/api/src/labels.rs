use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

pub type Map = BTreeMap<String, String>;

/// A `notin` requirement: the key is unset or set to a value outside of
/// `values`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Exclusion {
    key: String,
    values: BTreeSet<String>,
}

/// Selects a set of objects by their labels.
///
/// Renders to the Kubernetes label selector syntax so that filtering may be
/// performed by the API server, and may also be evaluated locally.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
    exclusions: Vec<Exclusion>,
}

// === Selector ===

impl Selector {
    /// Requires that `key` is set to `value`.
    pub fn equals(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Requires that `key` is either unset or set to something other than
    /// `value`.
    pub fn not_equals(mut self, key: impl ToString, value: impl ToString) -> Self {
        let key = key.to_string();
        let value = value.to_string();
        match self.exclusions.iter_mut().find(|e| e.key == key) {
            Some(exclusion) => {
                exclusion.values.insert(value);
            }
            None => self.exclusions.push(Exclusion {
                key,
                values: Some(value).into_iter().collect(),
            }),
        }
        self
    }

    pub fn matches(&self, labels: &Map) -> bool {
        if !self.exclusions.iter().all(|e| e.matches(labels)) {
            return false;
        }

        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.match_labels.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{}={}", k, v)?;
        }
        for exclusion in self.exclusions.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            fmt::Display::fmt(exclusion, f)?;
        }
        Ok(())
    }
}

// === Exclusion ===

impl Exclusion {
    fn matches(&self, labels: &Map) -> bool {
        match labels.get(&self.key) {
            Some(v) => !self.values.contains(v),
            None => true,
        }
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} notin (", self.key)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(v)?;
        }
        f.write_str(")")
    }
}

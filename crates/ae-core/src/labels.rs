use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Title of the rule, injected into every instance.
pub const ALERT_NAME_LABEL: &str = "alertname";
/// UID of the rule, injected into every instance.
pub const RULE_UID_LABEL: &str = "__alert_rule_uid__";
/// Title of the folder (namespace) the rule lives in.
pub const FOLDER_TITLE_LABEL: &str = "grafana_folder";
/// Carries the original title when a NoData/Error alert is renamed.
pub const RULE_NAME_LABEL: &str = "rulename";

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A label set. Backed by an ordered map so iteration, display and
/// fingerprinting never depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `true` when every pair of `self` also appears in `other`.
    pub fn is_subset_of(&self, other: &Labels) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }

    /// Order-independent identity of this label set.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for (k, v) in &self.0 {
            hasher.update(k.as_bytes());
            hasher.update([0xff]);
            hasher.update(v.as_bytes());
            hasher.update([0xfe]);
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Fingerprint(u64::from_be_bytes(head))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Labels {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl fmt::Display for Labels {
    /// `{a=1, b=2}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Stable 64-bit hash of a [`Labels`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Build an instance's label set.
///
/// Rule labels are applied first, result labels replace them key by key,
/// and `extra` (reserved labels such as the folder title) only fills keys
/// that neither of the first two set.
pub fn resolve_instance_labels(rule_labels: &Labels, result: &Labels, extra: &Labels) -> Labels {
    let mut out = rule_labels.clone();
    for (k, v) in result.iter() {
        out.insert(k, v);
    }
    for (k, v) in extra.iter() {
        if !out.contains_key(k) {
            out.insert(k, v);
        }
    }
    out
}

/// Reserved labels injected into every instance of a rule. The folder title
/// is left out when `folder_title` is `None`.
pub fn rule_extra_labels(title: &str, uid: &str, folder_title: Option<&str>) -> Labels {
    let mut extra = Labels::new();
    extra.insert(ALERT_NAME_LABEL, title);
    extra.insert(RULE_UID_LABEL, uid);
    if let Some(folder) = folder_title {
        extra.insert(FOLDER_TITLE_LABEL, folder);
    }
    extra
}

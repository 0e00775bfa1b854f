//! Metric identity
//!
//! A metric is a name plus a set of labels (dimensions). Its identity is a
//! key derived from the slugged name and a 128-bit, order-independent digest
//! of the labels, so two metrics are equal when their identities are equal. Presentation
//! fields (group, display name, description) and the metric type ride along
//! as copy-on-write attributes and never change the hash.

mod cache;

pub use cache::MetricCache;

use crate::{Result, SeriesError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// How raw samples of a metric are interpreted by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Monotonically increasing external counter, stored as deltas
    Counter,
    /// Point-in-time reading, stored as-is
    #[default]
    Gauge,
}

/// A metric and its labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    id: String,
    name: String,
    hash: String,
    labels: BTreeMap<String, String>,
    kind: MetricType,
    group: Option<String>,
    display_name: String,
    description: Option<String>,
}

impl Metric {
    /// Create a metric without labels
    pub fn create(name: &str) -> Result<Self> {
        Self::build(name, BTreeMap::new())
    }

    /// Create a metric with labels
    pub fn create_with_labels<I, K, V>(name: &str, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::build(name, collect_labels(labels))
    }

    /// Get a metric from the process-wide cache, creating it on a miss
    pub fn get(name: &str) -> Result<Arc<Self>> {
        MetricCache::global().get(name, BTreeMap::new())
    }

    /// Get a labelled metric from the process-wide cache, creating it on a miss
    pub fn get_with_labels<I, K, V>(name: &str, labels: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        MetricCache::global().get(name, collect_labels(labels))
    }

    pub(crate) fn build(name: &str, labels: BTreeMap<String, String>) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(SeriesError::invalid("metric name cannot be blank"));
        }
        let id = slug(name);
        let hash = compute_hash(&id, &labels);
        Ok(Self {
            display_name: capitalize_words(name),
            id,
            name: name.to_string(),
            hash,
            labels,
            kind: MetricType::default(),
            group: None,
            description: None,
        })
    }

    /// Identifier derived from the name, usable as a SQL table name
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key which uniquely identifies the metric and its labels
    pub fn identity(&self) -> &str {
        &self.hash
    }

    pub fn kind(&self) -> MetricType {
        self.kind
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Display name prefixed by the group, when there is one
    pub fn full_display_name(&self) -> String {
        match &self.group {
            Some(group) if !group.is_empty() => format!("{} / {}", group, self.display_name),
            _ => self.display_name.clone(),
        }
    }

    /// Label names
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Value of a label, if present
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    /// Copy of this metric with a different type
    pub fn with_type(&self, kind: MetricType) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Copy of this metric with a different group
    pub fn with_group(&self, group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            ..self.clone()
        }
    }

    /// Copy of this metric with a different display name
    pub fn with_display_name(&self, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..self.clone()
        }
    }

    /// Copy of this metric with a description
    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self.clone()
        }
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Metric {}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for Metric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Metric {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            let labels: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", labels.join(","))?;
        }
        Ok(())
    }
}

fn collect_labels<I, K, V>(labels: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    labels
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Identity key: `slug(name) + "_" + digest(slug(name), labels)`, the digest
/// being blake3 truncated to 128 bits
pub(crate) fn compute_hash(id: &str, labels: &BTreeMap<String, String>) -> String {
    // BTreeMap iterates in key order, which makes the digest independent of
    // the order labels were supplied in.
    let mut hasher = blake3::Hasher::new();
    hasher.update(id.as_bytes());
    for (key, value) in labels {
        hasher.update(&[0x1f]);
        hasher.update(key.as_bytes());
        hasher.update(&[0x1e]);
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    let mut first16 = [0u8; 16];
    first16.copy_from_slice(&digest.as_bytes()[..16]);
    format!("{}_{:032x}", id, u128::from_be_bytes(first16))
}

/// Lowercase identifier: alphanumerics kept, runs of anything else become `_`
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        return "unnamed".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn capitalize_words(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_' || c == '.' || c == '-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

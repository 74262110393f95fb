//! Request context and action metadata.
//!
//! A [`Context`] is an ordered feature map tagged with the isolation keys
//! (domain, tenant, workspace) that scope learning state. The keys are
//! routing dimensions only — they are never fed to the reward model.
//! [`ActionSpec`] describes one candidate arm; the action set for a domain is
//! fixed at configuration time.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A single feature value. Strings are hashed into a stable bounded range by
/// the vectorizer; flags become 0/1.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Numeric feature, used as-is (non-finite values sanitized to 0).
    Number(f64),
    /// Boolean feature, encoded as 0.0 / 1.0.
    Flag(bool),
    /// Categorical feature, stable-hashed into `[0, 1)`.
    Text(String),
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Flag(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// Ordered feature map plus isolation keys.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Context {
    /// Domain whose policy state this request learns into (e.g. "model_routing").
    pub domain: String,
    /// Tenant identifier (experiment assignment + cache-shadow key).
    pub tenant: String,
    /// Workspace identifier. Carried for isolation; may be empty.
    pub workspace: String,
    /// Named features in stable (BTreeMap) order.
    pub features: BTreeMap<String, FeatureValue>,
}

impl Context {
    /// Build a context with empty workspace.
    pub fn new(domain: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            tenant: tenant.into(),
            workspace: String::new(),
            features: BTreeMap::new(),
        }
    }

    /// Insert a feature (builder-style).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.into(), value.into());
        self
    }

    /// Reject contexts missing their isolation keys.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(Error::Validation("context is missing a domain".into()));
        }
        if self.tenant.is_empty() {
            return Err(Error::Validation("context is missing a tenant".into()));
        }
        Ok(())
    }

    /// Stable key summarising the feature map, used for deterministic
    /// experiment assignment and memo lookups. BTreeMap iteration order makes
    /// this independent of insertion order, and numbers render by bit pattern
    /// so distinct values never share a key.
    #[must_use]
    pub fn stable_key(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.features {
            out.push_str(k);
            out.push('=');
            match v {
                FeatureValue::Number(x) => out.push_str(&format!("{:016x}", x.to_bits())),
                FeatureValue::Flag(b) => out.push(if *b { '1' } else { '0' }),
                FeatureValue::Text(s) => out.push_str(s),
            }
            out.push(';');
        }
        out
    }
}

/// One candidate arm with routing metadata.
///
/// Metadata is advisory (cost/latency estimates feed dashboards and reward
/// shaping); selection itself operates on learned statistics.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ActionSpec {
    /// Unique action id within its domain.
    pub id: String,
    /// Caller-defined cost proxy per call.
    pub cost_units: f64,
    /// Rough latency estimate in milliseconds.
    pub latency_est_ms: f64,
    /// Capability tags (free-form).
    pub tags: Vec<String>,
}

impl ActionSpec {
    /// An action with neutral metadata.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cost_units: 1.0,
            latency_est_ms: 0.0,
            tags: Vec::new(),
        }
    }
}

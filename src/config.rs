//! Engine configuration.
//!
//! One [`EngineConfig`] value describes everything hot-reloadable: the
//! vectorizer schema, per-domain policy choices and rollout percentages,
//! experiment definitions, the shadow-mode toggle, cache-shadow thresholds,
//! and the reward blend. The engine keeps the current config behind an
//! `ArcSwap` and replaces the whole snapshot on reload; no field is mutated
//! in place.

use std::collections::BTreeMap;

use crate::cache_shadow::CacheShadowConfig;
use crate::error::{Error, Result};
use crate::experiment::ExperimentDefinition;
use crate::policy::PolicyChoice;
use crate::reward::RewardConfig;
use crate::shadow::ShadowConfig;
use crate::vectorizer::VectorizerConfig;

/// Per-domain routing configuration.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Policy the domain runs once rolled out.
    pub policy: PolicyChoice,
    /// Share of tenants (0..=100) routed through `policy`; the rest stay on
    /// the epsilon-greedy incumbent. Gating is a stable hash of the tenant,
    /// so a tenant never flaps between policies at a fixed percentage.
    pub rollout_percentage: f64,
    /// Shadow policies evaluated alongside production for this domain.
    pub shadow_policies: Vec<PolicyChoice>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            policy: PolicyChoice::default(),
            rollout_percentage: 100.0,
            shadow_policies: Vec::new(),
        }
    }
}

/// Full hot-reloadable engine configuration.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Feature schema shared by all domains.
    pub vectorizer: VectorizerConfig,
    /// Per-domain policy selection; unlisted domains use [`DomainConfig::default`].
    pub domains: BTreeMap<String, DomainConfig>,
    /// Experiment definitions installed on reload.
    pub experiments: Vec<ExperimentDefinition>,
    /// Global experiment toggle; disabled assigns everyone to "control".
    pub experiments_enabled: bool,
    /// Global shadow-evaluation toggle.
    pub shadow_enabled: bool,
    /// Shadow queue and worker sizing.
    pub shadow: ShadowConfig,
    /// Cache-shadow thresholds.
    pub cache: CacheShadowConfig,
    /// Composite reward blend.
    pub reward: RewardConfig,
    /// Pending-decision ledger bound; oldest entries evicted beyond this.
    pub max_pending_decisions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vectorizer: VectorizerConfig::default(),
            domains: BTreeMap::new(),
            experiments: Vec::new(),
            experiments_enabled: true,
            shadow_enabled: false,
            shadow: ShadowConfig::default(),
            cache: CacheShadowConfig::default(),
            reward: RewardConfig::default(),
            max_pending_decisions: 16_384,
        }
    }
}

impl EngineConfig {
    /// Config with defaults and a given feature schema.
    pub fn with_vectorizer(vectorizer: VectorizerConfig) -> Self {
        Self {
            vectorizer,
            ..Self::default()
        }
    }

    /// Reject configs a reload must not install.
    pub fn validate(&self) -> Result<()> {
        for exp in &self.experiments {
            exp.validate()?;
        }
        for (domain, dc) in &self.domains {
            if !dc.rollout_percentage.is_finite()
                || !(0.0..=100.0).contains(&dc.rollout_percentage)
            {
                return Err(Error::Validation(format!(
                    "domain {domain}: rollout_percentage {} outside 0..=100",
                    dc.rollout_percentage
                )));
            }
        }
        if self.max_pending_decisions == 0 {
            return Err(Error::Validation(
                "max_pending_decisions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Domain config, falling back to the default for unlisted domains.
    pub fn domain(&self, name: &str) -> DomainConfig {
        self.domains.get(name).cloned().unwrap_or_default()
    }
}

//! Unified `Policy` trait for pluggable decision/learning units.
//!
//! [`EpsilonGreedy`][crate::EpsilonGreedy], [`DoublyRobust`][crate::DoublyRobust]
//! and [`OffsetTree`][crate::OffsetTree] share the same interface:
//! `select(vector, candidates, seed) -> (action, propensity)` plus
//! `update(action, reward, vector)`. The trait makes that explicit and lets
//! the registry swap policies per domain without code changes.
//!
//! Two deliberate deviations from a naive reading:
//!
//! - `select` takes `&self` and an explicit `seed`. All randomness derives
//!   from the seed, so a select against an immutable state snapshot is a pure
//!   function — this is what makes lock-free snapshot reads sound.
//! - Snapshots are a tagged enum rather than trait-object serialization, so
//!   persistence stays plain serde with no registry of deserializers.

use crate::doubly_robust::{DoublyRobust, DoublyRobustConfig, DoublyRobustState};
use crate::error::{Error, Result};
use crate::greedy::{EpsilonGreedy, EpsilonGreedyConfig, EpsilonGreedyState};
use crate::offset_tree::{OffsetTree, OffsetTreeConfig, OffsetTreeState};

/// A single select outcome: the chosen action and the probability the policy
/// would choose it (never zero; required for importance weighting).
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Chosen action id.
    pub action: String,
    /// Selection probability in `(0, 1]`.
    pub propensity: f64,
}

/// One observed outcome, as retained for off-policy correction.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RewardRecord {
    /// Context vector the decision was made against.
    pub vector: Vec<f64>,
    /// Action that was executed.
    pub action: String,
    /// Observed reward, clamped to `[0, 1]` before any computation.
    pub reward: f64,
    /// Probability the logging policy had of choosing `action`; floored away
    /// from zero so importance weights stay finite.
    pub propensity: f64,
}

/// Common interface for decision/learning policies.
pub trait Policy: Send + Sync {
    /// Stable policy name ("epsilon_greedy", "doubly_robust", "offset_tree").
    fn policy_id(&self) -> &'static str;

    /// Select one action from `candidates` for the given context vector.
    ///
    /// Pure given `(state, vector, candidates, seed)`. Errors:
    /// [`Error::NoEligibleActions`] on an empty candidate set,
    /// [`Error::DimensionMismatch`] when the vector length disagrees with the
    /// state's dimension.
    fn select(&self, vector: &[f64], candidates: &[String], seed: u64) -> Result<Selection>;

    /// Fold one observed reward record into the state.
    ///
    /// The record's reward is clamped to `[0, 1]` and its propensity floored
    /// away from zero by the implementation.
    fn update_logged(&mut self, rec: &RewardRecord) -> Result<()>;

    /// Convenience update without a logged propensity (assumes 1.0).
    fn update(&mut self, action: &str, reward: f64, vector: &[f64]) -> Result<()> {
        self.update_logged(&RewardRecord {
            vector: vector.to_vec(),
            action: action.to_string(),
            reward,
            propensity: 1.0,
        })
    }

    /// Predicted reward for `(vector, action)`, when the policy has a model.
    ///
    /// Used for counterfactual regret estimates in shadow evaluation.
    /// Policies without a usable model return `None`.
    fn estimate(&self, vector: &[f64], action: &str) -> Option<f64>;

    /// Capture a lossless serializable snapshot of the learned state.
    fn snapshot(&self) -> PolicySnapshot;

    /// Restore a previously captured snapshot.
    ///
    /// Fails with [`Error::Validation`] when the snapshot variant does not
    /// match the policy.
    fn restore(&mut self, snap: PolicySnapshot) -> Result<()>;

    /// Discard all learned state (explicit admin action).
    fn reset(&mut self);

    /// Clone through the trait object (copy-on-write updates need this).
    fn boxed_clone(&self) -> Box<dyn Policy>;
}

impl Clone for Box<dyn Policy> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Serializable per-policy learned state.
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum PolicySnapshot {
    /// Per-arm mean stats.
    EpsilonGreedy(EpsilonGreedyState),
    /// Linear weights, visit counts, and the off-policy history ring.
    DoublyRobust(DoublyRobustState),
    /// Tree structure and leaf statistics.
    OffsetTree(OffsetTreeState),
}

/// Which policy a domain runs, with its tuning knobs.
///
/// Serialized form is tagged by `policy`, so configuration files read as
/// `{ "policy": "doubly_robust", "max_weight": 5.0, ... }`.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PolicyChoice {
    /// Baseline explore/exploit policy.
    EpsilonGreedy(EpsilonGreedyConfig),
    /// Doubly-robust linear bandit.
    DoublyRobust(DoublyRobustConfig),
    /// Online partition-tree bandit.
    OffsetTree(OffsetTreeConfig),
}

impl Default for PolicyChoice {
    fn default() -> Self {
        PolicyChoice::EpsilonGreedy(EpsilonGreedyConfig::default())
    }
}

impl PolicyChoice {
    /// The stable policy name this choice builds.
    pub fn policy_id(&self) -> &'static str {
        match self {
            PolicyChoice::EpsilonGreedy(_) => "epsilon_greedy",
            PolicyChoice::DoublyRobust(_) => "doubly_robust",
            PolicyChoice::OffsetTree(_) => "offset_tree",
        }
    }

    /// Instantiate a fresh policy for a context dimension.
    pub fn build(&self, dim: usize) -> Box<dyn Policy> {
        match self {
            PolicyChoice::EpsilonGreedy(cfg) => Box::new(EpsilonGreedy::new(cfg.clone())),
            PolicyChoice::DoublyRobust(cfg) => Box::new(DoublyRobust::new(cfg.clone(), dim)),
            PolicyChoice::OffsetTree(cfg) => Box::new(OffsetTree::new(cfg.clone(), dim)),
        }
    }

    /// Default-configured choice for a bare policy name.
    ///
    /// New algorithms register here; there is no inheritance chain to extend.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "epsilon_greedy" => Ok(PolicyChoice::EpsilonGreedy(EpsilonGreedyConfig::default())),
            "doubly_robust" => Ok(PolicyChoice::DoublyRobust(DoublyRobustConfig::default())),
            "offset_tree" => Ok(PolicyChoice::OffsetTree(OffsetTreeConfig::default())),
            other => Err(Error::PolicyNotFound(other.to_string())),
        }
    }
}

/// Clamp a reward into `[0, 1]`, mapping non-finite values to 0.
pub(crate) fn clamp01(r: f64) -> f64 {
    if !r.is_finite() {
        return 0.0;
    }
    r.clamp(0.0, 1.0)
}

/// Floor a propensity away from zero so importance weights stay finite.
pub(crate) fn floor_propensity(p: f64) -> f64 {
    if !p.is_finite() || p <= 0.0 {
        return 1e-6;
    }
    p.clamp(1e-6, 1.0)
}

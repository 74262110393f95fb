//! Doubly-robust contextual bandit.
//!
//! Per action, a ridge-regularized linear reward model updated with one
//! incremental gradient step per observation. A bounded ring buffer of logged
//! `(vector, action, reward, propensity)` tuples supplies the
//! importance-weighted correction:
//!
//! ```text
//! DR(a) = r̂(a | x) + clip((r_logged − r̂(a_logged | x_logged)) / p_logged, ±max_weight)
//! ```
//!
//! averaged over the retained tuples for `a`, plus a UCB exploration bonus
//! `c · sqrt(ln t / n_a)` over per-action visit counts. The direct model and
//! the correction back each other up: if the model is misspecified the
//! importance term compensates, and if logged propensities are noisy the
//! model anchors the estimate.
//!
//! The learning rate decays multiplicatively by `lr_decay` each update,
//! floored at `min_learning_rate`. Rewards are clamped to `[0, 1]` before
//! any computation; propensities are floored away from zero. Selection is
//! deterministic argmax (stable lexicographic tie-break), so the reported
//! propensity is 1.0.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};
use crate::policy::{clamp01, floor_propensity, Policy, PolicySnapshot, RewardRecord, Selection};

/// Configuration for [`DoublyRobust`].
///
/// `max_weight` and the decay schedule are empirically tuned, which is why
/// they are configuration rather than constants.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DoublyRobustConfig {
    /// Ridge regularization strength (must be >= 0).
    pub alpha: f64,
    /// Initial learning rate.
    pub learning_rate: f64,
    /// Multiplicative learning-rate decay per update, in `(0, 1]`.
    pub lr_decay: f64,
    /// Floor for the decayed learning rate.
    pub min_learning_rate: f64,
    /// Clip bound for the importance-weighted correction term.
    pub max_weight: f64,
    /// UCB exploration coefficient.
    pub exploration_c: f64,
    /// Ring-buffer capacity for logged tuples (oldest evicted).
    pub max_history: usize,
}

impl Default for DoublyRobustConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            learning_rate: 0.1,
            lr_decay: 0.999,
            min_learning_rate: 1e-3,
            max_weight: 5.0,
            exploration_c: 1.0,
            max_history: 2048,
        }
    }
}

/// Linear model for one action.
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ArmModel {
    /// Weight vector (length = context dimension).
    pub weights: Vec<f64>,
    /// Update count for this action.
    pub visits: u64,
}

impl ArmModel {
    fn new(dim: usize) -> Self {
        Self {
            weights: vec![0.0; dim],
            visits: 0,
        }
    }
}

/// Serializable learned state (weights, visit counts, history ring, decayed
/// learning rate). Lossless: restoring reproduces scoring exactly.
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DoublyRobustState {
    /// Context dimension the weights were built for.
    pub dim: usize,
    /// Current (decayed) learning rate.
    pub learning_rate: f64,
    /// Total updates across all actions.
    pub total_updates: u64,
    /// Per-action models keyed by action id.
    pub arms: BTreeMap<String, ArmModel>,
    /// Logged tuples for off-policy correction, oldest first.
    pub history: VecDeque<RewardRecord>,
}

/// Doubly-robust linear bandit.
#[derive(Debug, Clone)]
pub struct DoublyRobust {
    cfg: DoublyRobustConfig,
    state: DoublyRobustState,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl DoublyRobust {
    /// Create a fresh policy for a context dimension.
    pub fn new(cfg: DoublyRobustConfig, dim: usize) -> Self {
        let lr = if cfg.learning_rate.is_finite() && cfg.learning_rate > 0.0 {
            cfg.learning_rate
        } else {
            0.1
        };
        Self {
            cfg,
            state: DoublyRobustState {
                dim,
                learning_rate: lr,
                total_updates: 0,
                arms: BTreeMap::new(),
                history: VecDeque::new(),
            },
        }
    }

    fn check_dim(&self, vector: &[f64]) -> Result<()> {
        if vector.len() != self.state.dim {
            return Err(Error::DimensionMismatch {
                expected: self.state.dim,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Model prediction for `(vector, action)`, clamped to `[0, 1]`.
    fn predict(&self, vector: &[f64], action: &str) -> f64 {
        match self.state.arms.get(action) {
            Some(m) => clamp01(dot(&m.weights, vector)),
            None => 0.0,
        }
    }

    /// Average clipped importance-weighted residual over retained tuples for
    /// `action`. Zero when no tuples exist.
    fn correction(&self, action: &str) -> f64 {
        let bound = if self.cfg.max_weight.is_finite() && self.cfg.max_weight > 0.0 {
            self.cfg.max_weight
        } else {
            5.0
        };
        let mut sum = 0.0;
        let mut n = 0u64;
        for rec in &self.state.history {
            if rec.action != action {
                continue;
            }
            let r_hat = self.predict(&rec.vector, action);
            let p = floor_propensity(rec.propensity);
            let w = ((clamp01(rec.reward) - r_hat) / p).clamp(-bound, bound);
            sum += w;
            n += 1;
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    /// Full decision score for one candidate.
    fn score(&self, vector: &[f64], action: &str) -> f64 {
        let visits = self
            .state
            .arms
            .get(action)
            .map(|m| m.visits)
            .unwrap_or(0);
        let t = self.state.total_updates.max(1) as f64;
        let bonus = if visits == 0 {
            // Explore-first: an untried action always outranks tried ones.
            f64::INFINITY
        } else {
            let c = if self.cfg.exploration_c.is_finite() && self.cfg.exploration_c >= 0.0 {
                self.cfg.exploration_c
            } else {
                1.0
            };
            c * (t.ln().max(0.0) / visits as f64).sqrt()
        };
        self.predict(vector, action) + self.correction(action) + bonus
    }

    /// Current (decayed) learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.state.learning_rate
    }

    /// Retained history length (never exceeds `max_history`).
    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }

    /// Visit count for an action.
    pub fn visits(&self, action: &str) -> u64 {
        self.state.arms.get(action).map(|m| m.visits).unwrap_or(0)
    }
}

impl Policy for DoublyRobust {
    fn policy_id(&self) -> &'static str {
        "doubly_robust"
    }

    fn select(&self, vector: &[f64], candidates: &[String], _seed: u64) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(Error::NoEligibleActions {
                domain: String::new(),
            });
        }
        self.check_dim(vector)?;

        let mut best: Option<(&String, f64)> = None;
        for a in candidates {
            let s = self.score(vector, a);
            best = match best {
                None => Some((a, s)),
                Some((b, bs)) => {
                    // Stable tie-break: lexicographic. Two infinities (both
                    // untried) resolve to the earlier name.
                    if s > bs || (s == bs && a.as_str() < b.as_str()) {
                        Some((a, s))
                    } else {
                        Some((b, bs))
                    }
                }
            };
        }
        let (action, _) = best.expect("candidates non-empty");
        Ok(Selection {
            action: action.clone(),
            propensity: 1.0,
        })
    }

    fn update_logged(&mut self, rec: &RewardRecord) -> Result<()> {
        self.check_dim(&rec.vector)?;
        let r = clamp01(rec.reward);
        let alpha = if self.cfg.alpha.is_finite() && self.cfg.alpha >= 0.0 {
            self.cfg.alpha
        } else {
            0.0
        };
        let eta = self.state.learning_rate;
        let dim = self.state.dim;

        let model = self
            .state
            .arms
            .entry(rec.action.clone())
            .or_insert_with(|| ArmModel::new(dim));
        // One SGD step on the ridge objective: (r − w·x)² / 2 + α‖w‖² / 2.
        let err = r - dot(&model.weights, &rec.vector);
        for (w, x) in model.weights.iter_mut().zip(rec.vector.iter()) {
            *w += eta * (err * x - alpha * *w);
            if !w.is_finite() {
                *w = 0.0;
            }
        }
        model.visits = model.visits.saturating_add(1);
        self.state.total_updates = self.state.total_updates.saturating_add(1);

        // Decay the learning rate, floored.
        let decay = if self.cfg.lr_decay.is_finite() && self.cfg.lr_decay > 0.0 {
            self.cfg.lr_decay.min(1.0)
        } else {
            1.0
        };
        let floor = self.cfg.min_learning_rate.max(0.0);
        self.state.learning_rate = (eta * decay).max(floor);

        // Retain the tuple; oldest evicted at capacity.
        let cap = self.cfg.max_history.max(1);
        if self.state.history.len() >= cap {
            self.state.history.pop_front();
        }
        self.state.history.push_back(RewardRecord {
            vector: rec.vector.clone(),
            action: rec.action.clone(),
            reward: r,
            propensity: floor_propensity(rec.propensity),
        });
        Ok(())
    }

    fn estimate(&self, vector: &[f64], action: &str) -> Option<f64> {
        if vector.len() != self.state.dim {
            return None;
        }
        self.state
            .arms
            .get(action)
            .filter(|m| m.visits > 0)
            .map(|_| self.predict(vector, action))
    }

    fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot::DoublyRobust(self.state.clone())
    }

    fn restore(&mut self, snap: PolicySnapshot) -> Result<()> {
        match snap {
            PolicySnapshot::DoublyRobust(st) => {
                self.state = st;
                Ok(())
            }
            _ => Err(Error::Validation(
                "snapshot is not doubly_robust state".into(),
            )),
        }
    }

    fn reset(&mut self) {
        let dim = self.state.dim;
        let lr = if self.cfg.learning_rate.is_finite() && self.cfg.learning_rate > 0.0 {
            self.cfg.learning_rate
        } else {
            0.1
        };
        self.state = DoublyRobustState {
            dim,
            learning_rate: lr,
            total_updates: 0,
            arms: BTreeMap::new(),
            history: VecDeque::new(),
        };
    }

    fn boxed_clone(&self) -> Box<dyn Policy> {
        Box::new(self.clone())
    }
}

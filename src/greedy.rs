//! Epsilon-greedy baseline policy.
//!
//! With probability ε the policy picks uniformly at random; otherwise it
//! picks the argmax of per-arm mean rewards. It exists as the cold-start
//! fallback and as the regret baseline the fancier policies are measured
//! against, so its propensity accounting is exact:
//!
//! - uniform pick that is *also* the greedy arm: `(1 - ε) + ε/|A|`
//! - uniform pick that is not the greedy arm: `ε/|A|`
//! - greedy pick: `(1 - ε) + ε/|A|`
//!
//! With ε = 0 selection is fully deterministic for a fixed state.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::policy::{clamp01, floor_propensity, Policy, PolicySnapshot, RewardRecord, Selection};

/// Configuration for [`EpsilonGreedy`].
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EpsilonGreedyConfig {
    /// Exploration probability in `[0, 1]` (non-finite values treated as 0).
    pub epsilon: f64,
    /// Mean estimate assumed for arms with no observations yet.
    pub optimistic_prior: f64,
}

impl Default for EpsilonGreedyConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            optimistic_prior: 0.5,
        }
    }
}

/// Running mean stats for one arm.
#[derive(Debug, Clone, Copy, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ArmStats {
    /// Observation count.
    pub count: u64,
    /// Sum of clamped rewards.
    pub reward_sum: f64,
}

impl ArmStats {
    fn mean(&self, prior: f64) -> f64 {
        if self.count == 0 {
            prior
        } else {
            self.reward_sum / self.count as f64
        }
    }
}

/// Serializable learned state.
#[derive(Debug, Clone, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct EpsilonGreedyState {
    /// Per-arm stats keyed by action id.
    pub arms: BTreeMap<String, ArmStats>,
}

/// Epsilon-greedy policy over per-arm reward means.
#[derive(Debug, Clone)]
pub struct EpsilonGreedy {
    cfg: EpsilonGreedyConfig,
    state: EpsilonGreedyState,
}

impl EpsilonGreedy {
    /// Create a fresh policy.
    pub fn new(cfg: EpsilonGreedyConfig) -> Self {
        Self {
            cfg,
            state: EpsilonGreedyState::default(),
        }
    }

    fn epsilon(&self) -> f64 {
        if self.cfg.epsilon.is_finite() {
            self.cfg.epsilon.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Greedy arm among `candidates` (stable lexicographic tie-break).
    fn greedy<'a>(&self, candidates: &'a [String]) -> Option<&'a String> {
        let prior = self.cfg.optimistic_prior;
        let mut best: Option<(&'a String, f64)> = None;
        for a in candidates {
            let m = self
                .state
                .arms
                .get(a.as_str())
                .map(|s| s.mean(prior))
                .unwrap_or(prior);
            best = match best {
                None => Some((a, m)),
                Some((b, bm)) => {
                    if m > bm + 1e-12 || ((m - bm).abs() <= 1e-12 && a.as_str() < b.as_str()) {
                        Some((a, m))
                    } else {
                        Some((b, bm))
                    }
                }
            };
        }
        best.map(|(a, _)| a)
    }

    /// Per-arm observation count (diagnostics).
    pub fn count(&self, arm: &str) -> u64 {
        self.state.arms.get(arm).map(|s| s.count).unwrap_or(0)
    }
}

impl Policy for EpsilonGreedy {
    fn policy_id(&self) -> &'static str {
        "epsilon_greedy"
    }

    fn select(&self, _vector: &[f64], candidates: &[String], seed: u64) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(Error::NoEligibleActions {
                domain: String::new(),
            });
        }
        let eps = self.epsilon();
        let k = candidates.len() as f64;
        let greedy = self.greedy(candidates).ok_or(Error::NoEligibleActions {
            domain: String::new(),
        })?;

        let mut rng = StdRng::seed_from_u64(seed);
        let explore = eps > 0.0 && rng.random::<f64>() < eps;

        let (action, propensity) = if explore {
            let idx = rng.random_range(0..candidates.len());
            let pick = &candidates[idx];
            let mut p = eps / k;
            if pick == greedy {
                p += 1.0 - eps;
            }
            (pick.clone(), p)
        } else {
            (greedy.clone(), (1.0 - eps) + eps / k)
        };

        Ok(Selection {
            action,
            propensity: floor_propensity(propensity),
        })
    }

    fn update_logged(&mut self, rec: &RewardRecord) -> Result<()> {
        let r = clamp01(rec.reward);
        let s = self.state.arms.entry(rec.action.clone()).or_default();
        s.count = s.count.saturating_add(1);
        s.reward_sum += r;
        Ok(())
    }

    fn estimate(&self, _vector: &[f64], action: &str) -> Option<f64> {
        self.state
            .arms
            .get(action)
            .filter(|s| s.count > 0)
            .map(|s| s.mean(self.cfg.optimistic_prior))
    }

    fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot::EpsilonGreedy(self.state.clone())
    }

    fn restore(&mut self, snap: PolicySnapshot) -> Result<()> {
        match snap {
            PolicySnapshot::EpsilonGreedy(st) => {
                self.state = st;
                Ok(())
            }
            _ => Err(Error::Validation(
                "snapshot is not epsilon_greedy state".into(),
            )),
        }
    }

    fn reset(&mut self) {
        self.state = EpsilonGreedyState::default();
    }

    fn boxed_clone(&self) -> Box<dyn Policy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arms() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn zero_epsilon_is_fully_deterministic() {
        let mut p = EpsilonGreedy::new(EpsilonGreedyConfig {
            epsilon: 0.0,
            optimistic_prior: 0.5,
        });
        p.update("b", 1.0, &[]).unwrap();
        p.update("a", 0.2, &[]).unwrap();
        let first = p.select(&[], &arms(), 0).unwrap();
        for seed in 1..200u64 {
            let s = p.select(&[], &arms(), seed).unwrap();
            assert_eq!(s.action, first.action);
            assert_eq!(s.action, "b");
            assert_eq!(s.propensity, 1.0);
        }
    }

    #[test]
    fn empty_candidates_error() {
        let p = EpsilonGreedy::new(EpsilonGreedyConfig::default());
        assert!(matches!(
            p.select(&[], &[], 0),
            Err(Error::NoEligibleActions { .. })
        ));
    }

    #[test]
    fn propensities_match_theoretical_frequencies() {
        let mut p = EpsilonGreedy::new(EpsilonGreedyConfig {
            epsilon: 0.3,
            optimistic_prior: 0.5,
        });
        // Make "c" clearly greedy.
        for _ in 0..50 {
            p.update("c", 1.0, &[]).unwrap();
            p.update("a", 0.1, &[]).unwrap();
            p.update("b", 0.1, &[]).unwrap();
        }
        let a = arms();
        let n = 20_000u64;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for seed in 0..n {
            let s = p.select(&[], &a, seed).unwrap();
            // Reported propensity must equal the closed form.
            let expect = if s.action == "c" {
                0.7 + 0.1
            } else {
                0.1
            };
            assert!((s.propensity - expect).abs() < 1e-12);
            *counts.entry(s.action).or_default() += 1;
        }
        // Sampled frequencies converge to the propensities.
        let f_c = counts["c"] as f64 / n as f64;
        let f_a = *counts.get("a").unwrap_or(&0) as f64 / n as f64;
        assert!((f_c - 0.8).abs() < 0.02, "f_c={f_c}");
        assert!((f_a - 0.1).abs() < 0.02, "f_a={f_a}");
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut p = EpsilonGreedy::new(EpsilonGreedyConfig::default());
        p.update("a", 0.9, &[]).unwrap();
        p.update("b", 0.1, &[]).unwrap();
        let snap = p.snapshot();

        let mut q = EpsilonGreedy::new(EpsilonGreedyConfig::default());
        q.restore(snap).unwrap();
        assert_eq!(q.count("a"), 1);
        assert_eq!(
            p.estimate(&[], "a").unwrap(),
            q.estimate(&[], "a").unwrap()
        );
    }

    proptest! {
        #[test]
        fn propensity_always_in_unit_interval(
            epsilon in 0.0f64..1.0f64,
            seed in any::<u64>(),
            rewards in proptest::collection::vec(0.0f64..1.0f64, 0..50),
        ) {
            let mut p = EpsilonGreedy::new(EpsilonGreedyConfig {
                epsilon,
                optimistic_prior: 0.5,
            });
            let a = arms();
            for (i, r) in rewards.iter().enumerate() {
                let s = p.select(&[], &a, seed.wrapping_add(i as u64)).unwrap();
                prop_assert!(s.propensity > 0.0 && s.propensity <= 1.0);
                prop_assert!(a.contains(&s.action));
                p.update(&s.action, *r, &[]).unwrap();
            }
        }
    }
}

//! Composite reward normalization.
//!
//! Callers report raw outcome signals (cost, latency, quality); the engine
//! folds them into a single reward in `[0, 1]` through a pure, configured
//! blend. Quality contributes directly; cost and latency contribute through
//! saturating inverse transforms so that doubling either roughly halves its
//! score near the configured scale.

use crate::policy::clamp01;

/// Raw outcome signals for one completed decision.
#[derive(Debug, Clone, Copy, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RewardSignal {
    /// Cost incurred, in caller-defined units.
    pub cost: f64,
    /// Observed end-to-end latency in milliseconds.
    pub latency_ms: f64,
    /// Caller-assessed quality in `[0, 1]`.
    pub quality_score: f64,
}

/// Weights and scales for the composite reward.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Weight on the quality score.
    pub quality_weight: f64,
    /// Weight on the inverse-cost score.
    pub cost_weight: f64,
    /// Weight on the inverse-latency score.
    pub latency_weight: f64,
    /// Cost at which the cost score halves.
    pub cost_scale: f64,
    /// Latency at which the latency score halves.
    pub latency_scale_ms: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            quality_weight: 0.6,
            cost_weight: 0.2,
            latency_weight: 0.2,
            cost_scale: 1.0,
            latency_scale_ms: 1000.0,
        }
    }
}

impl RewardConfig {
    /// Blend a raw signal into a reward in `[0, 1]`.
    ///
    /// Pure function of `(config, signal)`. Non-finite or negative inputs
    /// sanitize to their worst value rather than poisoning the blend.
    pub fn compose(&self, signal: &RewardSignal) -> f64 {
        let quality = clamp01(signal.quality_score);
        let cost = saturating_inverse(signal.cost, self.cost_scale);
        let latency = saturating_inverse(signal.latency_ms, self.latency_scale_ms);

        let wq = self.quality_weight.max(0.0);
        let wc = self.cost_weight.max(0.0);
        let wl = self.latency_weight.max(0.0);
        let total = wq + wc + wl;
        if !total.is_finite() || total <= 0.0 {
            return quality;
        }
        clamp01((wq * quality + wc * cost + wl * latency) / total)
    }
}

/// `scale / (scale + x)`: 1 at zero, 0.5 at `x == scale`, falling toward 0.
fn saturating_inverse(x: f64, scale: f64) -> f64 {
    let scale = if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    };
    if !x.is_finite() || x < 0.0 {
        return 0.0;
    }
    scale / (scale + x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn perfect_signal_scores_one() {
        let r = RewardConfig::default().compose(&RewardSignal {
            cost: 0.0,
            latency_ms: 0.0,
            quality_score: 1.0,
        });
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cost_and_latency_halve_at_their_scales() {
        let cfg = RewardConfig {
            quality_weight: 0.0,
            cost_weight: 1.0,
            latency_weight: 0.0,
            ..RewardConfig::default()
        };
        let r = cfg.compose(&RewardSignal {
            cost: cfg.cost_scale,
            latency_ms: 0.0,
            quality_score: 0.0,
        });
        assert!((r - 0.5).abs() < 1e-12);
    }

    #[test]
    fn higher_quality_never_lowers_reward() {
        let cfg = RewardConfig::default();
        let low = cfg.compose(&RewardSignal {
            cost: 2.0,
            latency_ms: 500.0,
            quality_score: 0.3,
        });
        let high = cfg.compose(&RewardSignal {
            cost: 2.0,
            latency_ms: 500.0,
            quality_score: 0.9,
        });
        assert!(high > low);
    }

    #[test]
    fn garbage_inputs_stay_in_range() {
        let cfg = RewardConfig::default();
        for s in [
            RewardSignal {
                cost: f64::NAN,
                latency_ms: f64::INFINITY,
                quality_score: -5.0,
            },
            RewardSignal {
                cost: -1.0,
                latency_ms: -1.0,
                quality_score: f64::NAN,
            },
        ] {
            let r = cfg.compose(&s);
            assert!((0.0..=1.0).contains(&r));
        }
    }

    #[test]
    fn zero_weights_fall_back_to_quality() {
        let cfg = RewardConfig {
            quality_weight: 0.0,
            cost_weight: 0.0,
            latency_weight: 0.0,
            ..RewardConfig::default()
        };
        let r = cfg.compose(&RewardSignal {
            cost: 10.0,
            latency_ms: 10.0,
            quality_score: 0.7,
        });
        assert!((r - 0.7).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn composed_reward_is_always_in_unit_interval(
            cost in -10.0f64..1.0e6,
            latency in -10.0f64..1.0e7,
            quality in -2.0f64..3.0,
        ) {
            let r = RewardConfig::default().compose(&RewardSignal {
                cost,
                latency_ms: latency,
                quality_score: quality,
            });
            prop_assert!((0.0..=1.0).contains(&r));
        }
    }
}

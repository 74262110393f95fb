//! Deterministic A/B experiment assignment.
//!
//! Variant assignment is a pure function of `(experiment_id, tenant,
//! context_key)`: the composite key is stable-hashed into `[0, 1)` and
//! bucketed against cumulative allocation boundaries. No runtime randomness,
//! no stored assignment state — the same inputs always produce the same
//! variant, across calls and across process restarts.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::stable_hash::{stable_hash_parts, stable_unit};

/// Variant returned when experiments are globally disabled or undefined.
pub const CONTROL_VARIANT: &str = "control";

/// One variant with its traffic share.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Variant {
    /// Variant name.
    pub name: String,
    /// Allocation weight; weights across an experiment sum to 1.0.
    pub weight: f64,
}

/// A registered experiment.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ExperimentDefinition {
    /// Experiment id.
    pub id: String,
    /// Variants in declaration order; bucket boundaries follow this order.
    pub variants: Vec<Variant>,
}

impl ExperimentDefinition {
    /// Validate the allocation: non-empty, finite non-negative weights,
    /// summing to 1.0 within 1e-6.
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(Error::InvalidAllocation {
                experiment: self.id.clone(),
                sum: 0.0,
            });
        }
        let mut sum = 0.0;
        for v in &self.variants {
            if !v.weight.is_finite() || v.weight < 0.0 {
                return Err(Error::InvalidAllocation {
                    experiment: self.id.clone(),
                    sum: f64::NAN,
                });
            }
            sum += v.weight;
        }
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidAllocation {
                experiment: self.id.clone(),
                sum,
            });
        }
        Ok(())
    }
}

/// Deterministic experiment assignment with participation metrics.
pub struct ExperimentHarness {
    definitions: RwLock<BTreeMap<String, ExperimentDefinition>>,
    enabled: RwLock<bool>,
}

impl Default for ExperimentHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentHarness {
    /// Empty, enabled harness.
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            enabled: RwLock::new(true),
        }
    }

    /// Register (or replace) an experiment after validating its allocation.
    pub fn register(&self, def: ExperimentDefinition) -> Result<()> {
        def.validate()?;
        self.definitions.write().insert(def.id.clone(), def);
        Ok(())
    }

    /// Drop an experiment.
    pub fn unregister(&self, id: &str) {
        self.definitions.write().remove(id);
    }

    /// Replace the whole definition set (hot reload). Invalid definitions
    /// fail the whole call and leave the previous set intact.
    pub fn replace_all(&self, defs: Vec<ExperimentDefinition>) -> Result<()> {
        for d in &defs {
            d.validate()?;
        }
        let mut map = self.definitions.write();
        map.clear();
        for d in defs {
            map.insert(d.id.clone(), d);
        }
        Ok(())
    }

    /// Globally enable/disable assignment. Disabled → always control.
    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write() = enabled;
    }

    /// Assign a variant for `(exp_id, tenant, context_key)`.
    ///
    /// Emits a participation counter per call. Unknown experiments and the
    /// globally-disabled state both resolve to [`CONTROL_VARIANT`].
    pub fn assign(
        &self,
        exp_id: &str,
        tenant: &str,
        context_key: &str,
        metrics: &dyn MetricsSink,
    ) -> String {
        let variant = self.assign_silent(exp_id, tenant, context_key);
        metrics.incr(
            "experiment_participation",
            &[("experiment_id", exp_id), ("variant", &variant)],
        );
        variant
    }

    /// Assignment without the participation metric (internal and tests).
    pub fn assign_silent(&self, exp_id: &str, tenant: &str, context_key: &str) -> String {
        if !*self.enabled.read() {
            return CONTROL_VARIANT.to_string();
        }
        let defs = self.definitions.read();
        let Some(def) = defs.get(exp_id) else {
            return CONTROL_VARIANT.to_string();
        };
        let u = stable_unit(stable_hash_parts(
            0x4558_5045,
            &[exp_id, tenant, context_key],
        ));
        let mut cumulative = 0.0;
        for v in &def.variants {
            cumulative += v.weight;
            if u < cumulative {
                return v.name.clone();
            }
        }
        // Floating-point slack at the top boundary: last variant wins.
        def.variants
            .last()
            .map(|v| v.name.clone())
            .unwrap_or_else(|| CONTROL_VARIANT.to_string())
    }
}

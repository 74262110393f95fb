//! Per-domain policy state ownership.
//!
//! The registry owns one learning state per domain, created on first use and
//! reset only by explicit admin action. Concurrency model:
//!
//! - `select` is lock-free: it reads an immutable policy snapshot through an
//!   [`arc_swap::ArcSwap`] and never blocks on writers.
//! - `update` serializes writers per domain with a mutex, clones the current
//!   snapshot, mutates the clone, and atomically swaps it in. Readers see the
//!   pre- or post-update state, never a partial one — this is also what keeps
//!   OffsetTree splits invisible until complete.
//!
//! Update ordering across threads affects only the exact numeric trajectory
//! of the learned state, not correctness (eventual-consistency model).

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::policy::{Policy, PolicyChoice, PolicySnapshot, RewardRecord, Selection};

/// State for one domain: the active policy snapshot plus a writer lock.
pub struct DomainState {
    policy_id: &'static str,
    dim: usize,
    active: ArcSwap<Box<dyn Policy>>,
    write: Mutex<()>,
}

impl DomainState {
    fn new(policy: Box<dyn Policy>, dim: usize) -> Self {
        Self {
            policy_id: policy.policy_id(),
            dim,
            active: ArcSwap::from_pointee(policy),
            write: Mutex::new(()),
        }
    }
}

/// Registry of per-domain policy states.
///
/// Dependency-injected (no module-level singletons); construct one per
/// engine and share it behind an `Arc`.
#[derive(Default)]
pub struct PolicyRegistry {
    domains: RwLock<BTreeMap<String, Arc<DomainState>>>,
}

impl PolicyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the state for `domain`, building the policy from
    /// `choice` with context dimension `dim`.
    ///
    /// If the domain already exists but the configured policy kind or the
    /// context dimension changed (hot reload), the old state is discarded and
    /// a fresh policy is installed — stale-dimension state would otherwise
    /// fail every subsequent select with a dimension mismatch.
    pub fn ensure_domain(
        &self,
        domain: &str,
        choice: &PolicyChoice,
        dim: usize,
    ) -> Arc<DomainState> {
        {
            let domains = self.domains.read();
            if let Some(st) = domains.get(domain) {
                if st.policy_id == choice.policy_id() && st.dim == dim {
                    return Arc::clone(st);
                }
            }
        }
        let mut domains = self.domains.write();
        // Re-check under the write lock; another thread may have won.
        if let Some(st) = domains.get(domain) {
            if st.policy_id == choice.policy_id() && st.dim == dim {
                return Arc::clone(st);
            }
        }
        let st = Arc::new(DomainState::new(choice.build(dim), dim));
        domains.insert(domain.to_string(), Arc::clone(&st));
        st
    }

    fn get(&self, domain: &str) -> Result<Arc<DomainState>> {
        self.domains
            .read()
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::PolicyNotFound(domain.to_string()))
    }

    /// Lock-free select against the domain's current snapshot.
    pub fn select(
        &self,
        domain: &str,
        vector: &[f64],
        candidates: &[String],
        seed: u64,
    ) -> Result<Selection> {
        let st = self.get(domain)?;
        let policy = st.active.load();
        policy.select(vector, candidates, seed).map_err(|e| match e {
            // Policies don't know their domain; attach it here.
            Error::NoEligibleActions { .. } => Error::NoEligibleActions {
                domain: domain.to_string(),
            },
            other => other,
        })
    }

    /// Serialized per-domain update: clone the snapshot, mutate, swap.
    pub fn update(&self, domain: &str, rec: &RewardRecord) -> Result<()> {
        let st = self.get(domain)?;
        let _guard = st.write.lock();
        let current = st.active.load_full();
        let mut next = (*current).clone();
        next.update_logged(rec)?;
        st.active.store(Arc::new(next));
        Ok(())
    }

    /// Counterfactual reward estimate from the domain's model, if it has one.
    pub fn estimate(&self, domain: &str, vector: &[f64], action: &str) -> Option<f64> {
        let st = self.get(domain).ok()?;
        st.active.load().estimate(vector, action)
    }

    /// Active policy id for a domain.
    pub fn policy_id(&self, domain: &str) -> Result<&'static str> {
        Ok(self.get(domain)?.policy_id)
    }

    /// Discard a domain's learned state, keeping its policy kind.
    pub fn reset_domain(&self, domain: &str) -> Result<()> {
        let st = self.get(domain)?;
        let _guard = st.write.lock();
        let current = st.active.load_full();
        let mut next = (*current).clone();
        next.reset();
        st.active.store(Arc::new(next));
        Ok(())
    }

    /// Remove a domain entirely (explicit teardown).
    pub fn remove_domain(&self, domain: &str) {
        self.domains.write().remove(domain);
    }

    /// Registered domain names.
    pub fn domain_names(&self) -> Vec<String> {
        self.domains.read().keys().cloned().collect()
    }

    /// Lossless snapshots of every domain's learned state.
    pub fn snapshot_all(&self) -> BTreeMap<String, PolicySnapshot> {
        let domains = self.domains.read();
        domains
            .iter()
            .map(|(name, st)| (name.clone(), st.active.load().snapshot()))
            .collect()
    }

    /// Restore one domain's state from a snapshot.
    ///
    /// The domain must already exist (call [`ensure_domain`] first) and the
    /// snapshot variant must match its policy kind.
    pub fn restore(&self, domain: &str, snap: PolicySnapshot) -> Result<()> {
        let st = self.get(domain)?;
        let _guard = st.write.lock();
        let current = st.active.load_full();
        let mut next = (*current).clone();
        next.restore(snap)?;
        st.active.store(Arc::new(next));
        Ok(())
    }
}

//! Would-hit cache telemetry without serving cached values.
//!
//! The tracker answers "if a semantic cache were live for this tenant, how
//! often would it have hit?" It probes an external [`SimilarityIndex`],
//! records a would-hit/miss event, and maintains a per-tenant hit ratio.
//! Once the ratio sustains `promote_ratio` over at least `min_samples`
//! observations, a read-only "promotion recommended" flag latches on for an
//! external cache-activation decision to consume. The tracker itself never
//! serves a cached response; its records are write-only telemetry.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// External similarity index the tracker probes.
///
/// Implementations own the embedding store; the tracker only asks for the
/// best similarity score for a query within a tenant's namespace.
pub trait SimilarityIndex: Send + Sync {
    /// Best similarity in `[0, 1]` for `query_hash` within `tenant`, or
    /// `None` when the tenant has no indexed entries yet.
    fn best_similarity(&self, tenant: &str, query_hash: u64) -> Option<f64>;
}

/// Thresholds for would-hit classification and promotion.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CacheShadowConfig {
    /// Similarity at or above which a probe counts as a would-hit.
    pub similarity_threshold: f64,
    /// Hit ratio at or above which promotion is recommended.
    pub promote_ratio: f64,
    /// Minimum observations before the ratio is trusted.
    pub min_samples: u64,
}

impl Default for CacheShadowConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            promote_ratio: 0.6,
            min_samples: 100,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct TenantStats {
    hits: u64,
    total: u64,
    promoted: bool,
}

/// Read-only view of one tenant's shadow-cache telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheShadowReport {
    /// Would-hit count.
    pub hits: u64,
    /// Total probes.
    pub total: u64,
    /// Hit ratio (0 when no probes yet).
    pub hit_ratio: f64,
    /// Whether promotion has been recommended.
    pub promotion_recommended: bool,
}

/// Per-tenant would-hit accounting.
pub struct CacheShadowTracker {
    cfg: CacheShadowConfig,
    tenants: Mutex<BTreeMap<String, TenantStats>>,
}

impl CacheShadowTracker {
    /// Fresh tracker.
    pub fn new(cfg: CacheShadowConfig) -> Self {
        Self {
            cfg,
            tenants: Mutex::new(BTreeMap::new()),
        }
    }

    /// Probe `index` for the query and record the would-hit outcome.
    pub fn observe(&self, index: &dyn SimilarityIndex, tenant: &str, query_hash: u64) {
        let similarity = index.best_similarity(tenant, query_hash).unwrap_or(0.0);
        self.observe_scored(tenant, query_hash, similarity);
    }

    /// Record a probe whose similarity the caller already computed.
    pub fn observe_scored(&self, tenant: &str, query_hash: u64, similarity: f64) {
        let similarity = if similarity.is_finite() {
            similarity
        } else {
            0.0
        };
        let would_hit = similarity >= self.cfg.similarity_threshold;
        tracing::debug!(tenant, query_hash, similarity, would_hit, "cache shadow probe");

        let mut tenants = self.tenants.lock();
        let st = tenants.entry(tenant.to_string()).or_default();
        st.total += 1;
        if would_hit {
            st.hits += 1;
        }
        // Latches on; an external decision consumes it, reset clears it.
        if !st.promoted
            && st.total >= self.cfg.min_samples.max(1)
            && st.hits as f64 / st.total as f64 >= self.cfg.promote_ratio
        {
            st.promoted = true;
            tracing::info!(tenant, hits = st.hits, total = st.total, "cache promotion recommended");
        }
    }

    /// Whether promotion is currently recommended for a tenant.
    pub fn promotion_recommended(&self, tenant: &str) -> bool {
        self.tenants
            .lock()
            .get(tenant)
            .map(|st| st.promoted)
            .unwrap_or(false)
    }

    /// Telemetry snapshot for a tenant.
    pub fn report(&self, tenant: &str) -> CacheShadowReport {
        let tenants = self.tenants.lock();
        let st = tenants.get(tenant).cloned().unwrap_or_default();
        let hit_ratio = if st.total == 0 {
            0.0
        } else {
            st.hits as f64 / st.total as f64
        };
        CacheShadowReport {
            hits: st.hits,
            total: st.total,
            hit_ratio,
            promotion_recommended: st.promoted,
        }
    }

    /// Clear one tenant's counters and promotion flag.
    pub fn reset_tenant(&self, tenant: &str) {
        self.tenants.lock().remove(tenant);
    }
}

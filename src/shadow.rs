//! Fire-and-forget background evaluation.
//!
//! One bounded queue plus a small worker pool carries everything that must
//! never add latency to the request path: shadow-policy evaluation and
//! cache-shadow probes. Submission is `try_send`; a full queue drops the task
//! and bumps a counter, and worker failures are logged and discarded.
//!
//! For each rewarded production decision the engine submits an
//! [`EvaluateTask`]; workers replay the identical context through each
//! configured shadow policy and account regret per
//! `(domain, shadow_policy_id)`:
//!
//! ```text
//! regret = reward(best-known action) − reward(shadow pick)
//! ```
//!
//! where the production action's reward is the actually observed one and
//! every other candidate's reward is a doubly-robust counterfactual estimate.
//! Shadow policies also learn off-policy from the production log stream, so
//! their picks improve over time exactly as they would have in production.
//! Nothing here is read during `select`, so the production action sequence is
//! identical whether shadow mode is on or off.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::cache_shadow::{CacheShadowTracker, SimilarityIndex};
use crate::doubly_robust::{DoublyRobust, DoublyRobustConfig};
use crate::metrics::MetricsSink;
use crate::policy::{Policy, PolicyChoice, RewardRecord};

/// Queue and worker sizing.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Bounded task queue capacity; tasks beyond it are dropped.
    pub queue_capacity: usize,
    /// Worker thread count.
    pub workers: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers: 2,
        }
    }
}

/// One rewarded production decision, replayed against shadow policies.
#[derive(Debug, Clone)]
pub struct EvaluateTask {
    /// Routing domain.
    pub domain: String,
    /// Context vector the decision was made against.
    pub vector: Vec<f64>,
    /// Candidate actions at decision time.
    pub candidates: Vec<String>,
    /// Action production actually dispatched.
    pub production_action: String,
    /// Observed composite reward in `[0, 1]`.
    pub reward: f64,
    /// Production selection propensity.
    pub propensity: f64,
    /// Seed the production decision used; shadow selects derive from it.
    pub seed: u64,
    /// Shadow policies configured for the domain at submission time.
    pub shadow_policies: Vec<PolicyChoice>,
}

/// Work item on the background queue.
pub enum ShadowTask {
    /// Shadow-policy regret evaluation.
    Evaluate(EvaluateTask),
    /// Would-hit cache probe against an external similarity index.
    CacheProbe {
        /// Tracker accumulating the outcome.
        tracker: Arc<CacheShadowTracker>,
        /// Index to probe.
        index: Arc<dyn SimilarityIndex>,
        /// Tenant namespace.
        tenant: String,
        /// Stable hash of the query.
        query_hash: u64,
    },
}

impl ShadowTask {
    fn kind(&self) -> &'static str {
        match self {
            ShadowTask::Evaluate(_) => "evaluate",
            ShadowTask::CacheProbe { .. } => "cache_probe",
        }
    }
}

/// Accumulated regret for one `(domain, shadow_policy_id)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowReport {
    /// Sum of per-decision regrets (never decreases except on reset).
    pub cumulative_regret: f64,
    /// `cumulative_regret / count`.
    pub average_regret: f64,
    /// Smallest single-decision regret observed.
    pub min_regret: f64,
    /// Evaluated decision count.
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
struct RegretAccum {
    cumulative: f64,
    min: f64,
    count: u64,
}

struct Shared {
    // Shadow policies keyed by (domain, policy_id); they live only here.
    policies: Mutex<BTreeMap<(String, &'static str), Box<dyn Policy>>>,
    // Per-domain counterfactual estimator fed from the production log.
    estimators: Mutex<BTreeMap<String, DoublyRobust>>,
    stats: Mutex<BTreeMap<(String, String), RegretAccum>>,
    metrics: Arc<dyn MetricsSink>,
    submitted: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
}

/// Background evaluator: bounded queue + worker pool.
pub struct ShadowEvaluator {
    tx: Option<Sender<ShadowTask>>,
    // Keeps the queue alive when built without workers (tests).
    _rx: Option<Receiver<ShadowTask>>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ShadowEvaluator {
    /// Start workers against a bounded queue.
    pub fn new(cfg: ShadowConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::build(cfg, metrics, true)
    }

    fn build(cfg: ShadowConfig, metrics: Arc<dyn MetricsSink>, spawn: bool) -> Self {
        let (tx, rx) = bounded::<ShadowTask>(cfg.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            policies: Mutex::new(BTreeMap::new()),
            estimators: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(BTreeMap::new()),
            metrics,
            submitted: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let mut workers = Vec::new();
        if spawn {
            for i in 0..cfg.workers.max(1) {
                let worker_rx = rx.clone();
                let worker_shared = Arc::clone(&shared);
                let spawned = std::thread::Builder::new()
                    .name(format!("shadow-eval-{i}"))
                    .spawn(move || {
                        while let Ok(task) = worker_rx.recv() {
                            run_task(&worker_shared, task);
                            worker_shared.processed.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                match spawned {
                    Ok(h) => workers.push(h),
                    Err(e) => {
                        // Shadow work is optional; degrade to a workerless
                        // evaluator instead of taking the process down.
                        tracing::error!(error = %e, worker = i,
                            "failed to spawn shadow worker, degrading");
                        break;
                    }
                }
            }
        }
        // Without workers the receiver stays alive, so submissions drop as
        // queue-full rather than erroring as disconnected.
        let kept_rx = if workers.is_empty() { Some(rx) } else { None };
        Self {
            tx: Some(tx),
            _rx: kept_rx,
            shared,
            workers,
        }
    }

    /// Submit a task, best-effort. A full queue drops the task.
    pub fn submit(&self, task: ShadowTask) {
        if let ShadowTask::Evaluate(t) = &task {
            if t.shadow_policies.is_empty() {
                return;
            }
        }
        let Some(tx) = &self.tx else { return };
        match tx.try_send(task) {
            Ok(()) => {
                self.shared.submitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Full(task)) => {
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
                self.shared
                    .metrics
                    .incr("shadow_dropped", &[("kind", task.kind())]);
                tracing::debug!(kind = task.kind(), "shadow queue full, task dropped");
            }
            Err(TrySendError::Disconnected(task)) => {
                tracing::warn!(kind = task.kind(), "shadow workers gone, task discarded");
            }
        }
    }

    /// Regret report for one `(domain, shadow_policy_id)` pair.
    pub fn report(&self, domain: &str, shadow_policy_id: &str) -> Option<ShadowReport> {
        let stats = self.shared.stats.lock();
        let acc = stats.get(&(domain.to_string(), shadow_policy_id.to_string()))?;
        Some(ShadowReport {
            cumulative_regret: acc.cumulative,
            average_regret: if acc.count == 0 {
                0.0
            } else {
                acc.cumulative / acc.count as f64
            },
            min_regret: acc.min,
            count: acc.count,
        })
    }

    /// Every tracked `(domain, shadow_policy_id)` pair.
    pub fn tracked_pairs(&self) -> Vec<(String, String)> {
        self.shared.stats.lock().keys().cloned().collect()
    }

    /// Explicitly clear accumulated regret (the only way it decreases).
    pub fn reset_stats(&self) {
        self.shared.stats.lock().clear();
    }

    /// Tasks dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Block until every submitted task has been processed (shutdown/tests).
    pub fn wait_idle(&self) {
        for _ in 0..5000 {
            let submitted = self.shared.submitted.load(Ordering::SeqCst);
            if self.shared.processed.load(Ordering::SeqCst) >= submitted {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        tracing::warn!("shadow evaluator did not drain in time");
    }

    #[cfg(test)]
    fn without_workers(cfg: ShadowConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::build(cfg, metrics, false)
    }

    #[cfg(test)]
    fn evaluate_inline(&self, task: EvaluateTask) {
        evaluate(&self.shared, task);
    }
}

impl Drop for ShadowEvaluator {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        self.tx.take();
        for h in self.workers.drain(..) {
            let _ = h.join();
        }
    }
}

fn run_task(shared: &Shared, task: ShadowTask) {
    match task {
        ShadowTask::Evaluate(t) => evaluate(shared, t),
        ShadowTask::CacheProbe {
            tracker,
            index,
            tenant,
            query_hash,
        } => tracker.observe(&*index, &tenant, query_hash),
    }
}

/// Replay one production decision through each shadow policy.
fn evaluate(shared: &Shared, task: EvaluateTask) {
    if task.candidates.is_empty() {
        return;
    }
    let rec = RewardRecord {
        vector: task.vector.clone(),
        action: task.production_action.clone(),
        reward: task.reward,
        propensity: task.propensity,
    };

    // Shadow picks come first, against state that predates this reward, to
    // mirror the timing of the production decision.
    let mut picks: Vec<(&'static str, Option<String>)> = Vec::new();
    {
        let mut policies = shared.policies.lock();
        for choice in &task.shadow_policies {
            let key = (task.domain.clone(), choice.policy_id());
            let policy = policies
                .entry(key)
                .or_insert_with(|| choice.build(task.vector.len()));
            let pick = match policy.select(&task.vector, &task.candidates, task.seed) {
                Ok(s) => Some(s.action),
                Err(e) => {
                    tracing::warn!(domain = %task.domain, policy = choice.policy_id(),
                        error = %e, "shadow select failed");
                    None
                }
            };
            picks.push((choice.policy_id(), pick));
            if let Err(e) = policy.update_logged(&rec) {
                // Dimension changes (schema reload) invalidate shadow state;
                // rebuild fresh rather than carrying stale weights.
                tracing::warn!(domain = %task.domain, policy = choice.policy_id(),
                    error = %e, "shadow update failed, rebuilding");
                let mut fresh = choice.build(task.vector.len());
                let _ = fresh.update_logged(&rec);
                policies.insert((task.domain.clone(), choice.policy_id()), fresh);
            }
        }
    }

    // Counterfactual estimator learns from every production record.
    let mut estimators = shared.estimators.lock();
    let est = estimators
        .entry(task.domain.clone())
        .or_insert_with(|| DoublyRobust::new(DoublyRobustConfig::default(), task.vector.len()));
    if est.update_logged(&rec).is_err() {
        *est = DoublyRobust::new(DoublyRobustConfig::default(), task.vector.len());
        let _ = est.update_logged(&rec);
    }

    // Reward lookup: actual for the production action, estimated otherwise.
    let estimated = |action: &str| -> f64 {
        if action == task.production_action {
            task.reward
        } else {
            est.estimate(&task.vector, action).unwrap_or(0.5)
        }
    };
    let best = task
        .candidates
        .iter()
        .map(|a| estimated(a))
        .fold(f64::NEG_INFINITY, f64::max);

    let mut stats = shared.stats.lock();
    for (policy_id, pick) in picks {
        let Some(action) = pick else { continue };
        // Best is a max over the same lookup, so regret is non-negative.
        let regret = (best - estimated(&action)).max(0.0);
        let acc = stats
            .entry((task.domain.clone(), policy_id.to_string()))
            .or_insert(RegretAccum {
                cumulative: 0.0,
                min: f64::INFINITY,
                count: 0,
            });
        acc.cumulative += regret;
        acc.min = acc.min.min(regret);
        acc.count += 1;
        shared.metrics.incr(
            "shadow_evaluations",
            &[("domain", &task.domain), ("shadow_policy_id", policy_id)],
        );
    }
}

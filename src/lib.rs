//! `steerage`: a contextual-bandit request-routing engine with shadow-mode
//! evaluation.
//!
//! Given a request's feature context, the engine selects which downstream
//! processing option to use (model size, provider, backend — anything you
//! choose between repeatedly), learns online from observed outcomes, and
//! evaluates alternative policies and cache strategies without ever touching
//! production behavior.
//!
//! **Goals:**
//! - **Deterministic where it matters**: selection randomness derives from
//!   explicit seeds; experiment assignment and rollout gating are stable
//!   hashes. Same state + inputs → same choice, across process restarts.
//! - **Lock-free request path**: `select` reads an immutable per-domain policy
//!   snapshot; writers clone-mutate-swap behind a per-domain lock.
//! - **Non-interfering evaluation**: shadow policies and cache probes run on a
//!   bounded background queue; a full queue drops work, never blocks.
//! - **Small K**: designed for a handful of candidate actions per domain, not
//!   hundreds.
//!
//! **Policies:**
//! - [`EpsilonGreedy`]: explore/exploit baseline, cold-start fallback, and the
//!   regret yardstick.
//! - [`DoublyRobust`]: per-action linear reward model plus clipped
//!   importance-weighted correction and a UCB bonus.
//! - [`OffsetTree`]: online variance-reducing partition tree over the context
//!   space with per-leaf posterior sampling.
//! - [`Policy`] / [`PolicyChoice`]: the common trait and the name-keyed
//!   factory; new algorithms register in one place.
//!
//! **Harness:**
//! - [`RoutingEngine`]: the front door — [`RoutingEngine::route`] and
//!   [`RoutingEngine::report_reward`], plus config hot-reload, rollout
//!   gating, persistence snapshots, and ledger cleanup.
//! - [`ExperimentHarness`]: deterministic A/B variant assignment.
//! - [`ShadowEvaluator`]: per-(domain, policy) regret accounting for policies
//!   that never serve traffic.
//! - [`CacheShadowTracker`]: would-hit cache telemetry and promotion
//!   recommendations.
//!
//! **Non-goals:**
//! - Not a serving platform: no storage backend, no API clients, no
//!   dashboards. Persistence and metrics are trait-shaped collaborators.
//!
//! # A worked example
//!
//! ```rust
//! use steerage::{
//!     ActionSpec, Context, EngineConfig, FeatureSpec, RewardSignal, RoutingEngine,
//!     VectorizerConfig,
//! };
//!
//! let cfg = EngineConfig::with_vectorizer(VectorizerConfig {
//!     schema: vec![FeatureSpec::named("complexity")],
//!     ..VectorizerConfig::default()
//! });
//! let engine = RoutingEngine::new(cfg).unwrap();
//!
//! let ctx = Context::new("model_routing", "tenant-1").with("complexity", 0.9);
//! let candidates = vec![ActionSpec::named("small"), ActionSpec::named("large")];
//! let decision = engine.route(&ctx, &candidates).unwrap();
//!
//! // ... execute `decision.action`, observe the outcome ...
//! engine.report_reward(
//!     decision.decision_id,
//!     &RewardSignal { cost: 0.3, latency_ms: 120.0, quality_score: 0.95 },
//! );
//! ```

#![forbid(unsafe_code)]

mod cache_shadow;
pub use cache_shadow::*;

mod config;
pub use config::*;

mod context;
pub use context::*;

mod doubly_robust;
pub use doubly_robust::*;

mod engine;
pub use engine::*;

mod error;
pub use error::*;

mod experiment;
pub use experiment::*;

mod greedy;
pub use greedy::*;

mod metrics;
pub use metrics::*;

mod offset_tree;
pub use offset_tree::*;

mod policy;
pub use policy::*;

mod registry;
pub use registry::*;

mod reward;
pub use reward::*;

mod shadow;
pub use shadow::*;

mod stable_hash;
pub use stable_hash::*;

mod vectorizer;
pub use vectorizer::*;

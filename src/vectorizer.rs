//! Context → fixed-length vector conversion.
//!
//! The vectorizer owns the feature schema: an ordered list of feature names
//! with per-feature defaults. Encoding rules:
//!
//! - missing feature → its default (0 unless overridden)
//! - unknown features in the context → ignored
//! - `Flag` → 0.0 / 1.0
//! - `Text` → stable hash into `hash_buckets` buckets, scaled to `[0, 1)`
//! - non-finite numbers → 0.0
//!
//! String hashing goes through [`crate::stable_hash64`], so vectors are
//! identical across process restarts. A bounded memo of recent raw-context →
//! vector results is a pure performance optimization; correctness never
//! depends on it.

use std::collections::VecDeque;

use crate::context::{Context, FeatureValue};
use crate::error::Result;
use crate::stable_hash::stable_hash64;

/// One schema entry: feature name + default used when the context lacks it.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct FeatureSpec {
    /// Feature name looked up in the context map.
    pub name: String,
    /// Value used when the feature is absent.
    pub default: f64,
}

impl FeatureSpec {
    /// A feature defaulting to 0.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: 0.0,
        }
    }

    /// A feature with an explicit default.
    pub fn with_default(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

/// Configuration for a [`ContextVectorizer`].
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct VectorizerConfig {
    /// Ordered schema; output dimension equals its length.
    pub schema: Vec<FeatureSpec>,
    /// Bucket count for string features (must be >= 2; clamped).
    pub hash_buckets: u64,
    /// Memo capacity (0 disables the memo).
    pub memo_capacity: usize,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            schema: Vec::new(),
            hash_buckets: 1024,
            memo_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoEntry {
    key: String,
    vector: Vec<f64>,
}

/// Schema-driven context vectorizer.
#[derive(Debug)]
pub struct ContextVectorizer {
    cfg: VectorizerConfig,
    // Oldest-first memo; linear scan is fine at the intended capacities.
    memo: VecDeque<MemoEntry>,
}

impl ContextVectorizer {
    /// Create a vectorizer from a schema config.
    pub fn new(cfg: VectorizerConfig) -> Self {
        Self {
            cfg,
            memo: VecDeque::new(),
        }
    }

    /// Output dimension.
    pub fn dim(&self) -> usize {
        self.cfg.schema.len()
    }

    /// Encode a context into a fixed-length vector.
    ///
    /// Fails with [`crate::Error::Validation`] if the context lacks its
    /// domain or tenant identifiers.
    pub fn vectorize(&mut self, ctx: &Context) -> Result<Vec<f64>> {
        ctx.validate()?;

        let memo_key = if self.cfg.memo_capacity > 0 {
            let key = format!("{}|{}", ctx.domain, ctx.stable_key());
            if let Some(e) = self.memo.iter().find(|e| e.key == key) {
                return Ok(e.vector.clone());
            }
            Some(key)
        } else {
            None
        };

        let v = self.encode(ctx);

        if let Some(key) = memo_key {
            if self.memo.len() >= self.cfg.memo_capacity {
                self.memo.pop_front();
            }
            self.memo.push_back(MemoEntry {
                key,
                vector: v.clone(),
            });
        }
        Ok(v)
    }

    fn encode(&self, ctx: &Context) -> Vec<f64> {
        let buckets = self.cfg.hash_buckets.max(2);
        self.cfg
            .schema
            .iter()
            .map(|spec| match ctx.features.get(&spec.name) {
                None => spec.default,
                Some(FeatureValue::Number(x)) => {
                    if x.is_finite() {
                        *x
                    } else {
                        0.0
                    }
                }
                Some(FeatureValue::Flag(b)) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                Some(FeatureValue::Text(s)) => {
                    // Bucket first, then scale, so the same string maps to the
                    // same point regardless of platform.
                    let bucket = stable_hash64(0x5645_4354, s) % buckets;
                    bucket as f64 / buckets as f64
                }
            })
            .collect()
    }

    /// Encode a string feature the way the vectorizer would.
    ///
    /// Exposed so tests and callers can predict categorical encodings.
    pub fn encode_text(&self, s: &str) -> f64 {
        let buckets = self.cfg.hash_buckets.max(2);
        (stable_hash64(0x5645_4354, s) % buckets) as f64 / buckets as f64
    }

    /// Number of memoized entries (diagnostics).
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use proptest::prelude::*;

    fn cfg3() -> VectorizerConfig {
        VectorizerConfig {
            schema: vec![
                FeatureSpec::named("complexity"),
                FeatureSpec::with_default("priority", 0.5),
                FeatureSpec::named("lang"),
            ],
            hash_buckets: 64,
            memo_capacity: 4,
        }
    }

    #[test]
    fn missing_features_take_defaults_and_unknown_are_ignored() {
        let mut v = ContextVectorizer::new(cfg3());
        let ctx = Context::new("d", "t")
            .with("complexity", 0.9)
            .with("totally_unknown", 123.0);
        let x = v.vectorize(&ctx).unwrap();
        assert_eq!(x.len(), 3);
        assert_eq!(x[0], 0.9);
        assert_eq!(x[1], 0.5); // default
        assert_eq!(x[2], 0.0); // default
    }

    #[test]
    fn flags_encode_as_zero_one() {
        let mut v = ContextVectorizer::new(VectorizerConfig {
            schema: vec![FeatureSpec::named("f")],
            ..VectorizerConfig::default()
        });
        let on = v.vectorize(&Context::new("d", "t").with("f", true)).unwrap();
        let off = v.vectorize(&Context::new("d", "t").with("f", false)).unwrap();
        assert_eq!(on[0], 1.0);
        assert_eq!(off[0], 0.0);
    }

    #[test]
    fn text_encoding_is_deterministic_and_bounded() {
        let mut v = ContextVectorizer::new(cfg3());
        let a = v
            .vectorize(&Context::new("d", "t").with("lang", "en"))
            .unwrap();
        let b = v
            .vectorize(&Context::new("d", "t").with("lang", "en"))
            .unwrap();
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a[2]));
        assert_eq!(a[2], v.encode_text("en"));
    }

    #[test]
    fn non_finite_numbers_sanitize_to_zero() {
        let mut v = ContextVectorizer::new(cfg3());
        let x = v
            .vectorize(&Context::new("d", "t").with("complexity", f64::NAN))
            .unwrap();
        assert_eq!(x[0], 0.0);
    }

    #[test]
    fn missing_identifiers_fail_validation() {
        let mut v = ContextVectorizer::new(cfg3());
        assert!(v.vectorize(&Context::new("", "t")).is_err());
        assert!(v.vectorize(&Context::new("d", "")).is_err());
    }

    #[test]
    fn memo_never_conflates_nearly_equal_contexts() {
        let mut v = ContextVectorizer::new(cfg3());
        let a = v
            .vectorize(&Context::new("d", "t").with("complexity", 0.1))
            .unwrap();
        let b = v
            .vectorize(&Context::new("d", "t").with("complexity", 0.1 + 1e-9))
            .unwrap();
        assert_ne!(a[0], b[0]);
        assert_eq!(b[0], 0.1 + 1e-9);
    }

    #[test]
    fn memo_is_bounded_and_transparent() {
        let mut v = ContextVectorizer::new(cfg3());
        for i in 0..20 {
            let ctx = Context::new("d", "t").with("complexity", i as f64 / 20.0);
            let first = v.vectorize(&ctx).unwrap();
            let second = v.vectorize(&ctx).unwrap();
            assert_eq!(first, second);
        }
        assert!(v.memo_len() <= 4);
    }

    proptest! {
        #[test]
        fn output_dimension_always_matches_schema(
            vals in proptest::collection::vec(-1.0e6f64..1.0e6, 0..8),
        ) {
            let mut v = ContextVectorizer::new(cfg3());
            let mut ctx = Context::new("d", "t");
            for (i, x) in vals.iter().enumerate() {
                ctx = ctx.with(format!("f{i}"), *x);
            }
            let out = v.vectorize(&ctx).unwrap();
            prop_assert_eq!(out.len(), 3);
            for x in out {
                prop_assert!(x.is_finite());
            }
        }
    }
}

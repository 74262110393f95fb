//! Deterministic hashing helpers for assignment, bucketing, and feature encoding.
//!
//! Everything that must be stable across process restarts (experiment variant
//! assignment, rollout gating, string-feature encoding) goes through these
//! functions rather than `std`'s per-process-seeded hasher. Not cryptographic;
//! meant for repeatable bucketing only.

/// Deterministic (non-crypto) stable hash of a string under a seed.
///
/// Implementation:
/// - FNV-1a over bytes (cheap, stable across platforms)
/// - SplitMix64 finalizer (improves bit diffusion / uniformity)
#[must_use]
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(seed ^ h)
}

/// Stable hash of several key parts chained through the seed.
///
/// Used for composite keys like `(experiment_id, tenant, context_key)` so the
/// parts `("ab", "c")` and `("a", "bc")` never collide by concatenation.
#[must_use]
pub fn stable_hash_parts(seed: u64, parts: &[&str]) -> u64 {
    let mut h = seed;
    for p in parts {
        h = stable_hash64(h ^ 0x1F2E_3D4C_5B6A_7988, p);
    }
    h
}

/// Map a stable hash into the unit interval `[0, 1)`.
///
/// Uses the top 53 bits so the result is exactly representable as an `f64`.
#[must_use]
pub fn stable_unit(h: u64) -> f64 {
    (h >> 11) as f64 / (1u64 << 53) as f64
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

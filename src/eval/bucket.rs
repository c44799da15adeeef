//! Deterministic bucketing for percentage rollouts and multi-variant
//! distributions.
//!
//! An entity is assigned to a bucket by a CRC-32/IEEE checksum of the salt
//! and entity id, so identical inputs yield identical buckets across runs,
//! processes and host languages. Nothing here depends on hash-table
//! iteration order or random seeding.
use crate::snapshot::Distribution;

/// Number of buckets used for distribution assignment; gives
/// thousandths-of-a-percent resolution.
const TOTAL_BUCKETS: u32 = 1000;

/// Multiplier between percentage space (100) and bucket space
/// (`TOTAL_BUCKETS`): a 1% rollout covers exactly 10 buckets.
const PERCENT_MULTIPLIER: f32 = TOTAL_BUCKETS as f32 / 100.0;

/// Map `(entity_id, salt)` to a bucket in `[0, 1000)`. The checksum covers
/// the salt followed by the entity id.
pub(crate) fn bucket(entity_id: &str, salt: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(entity_id.as_bytes());
    hasher.finalize() % TOTAL_BUCKETS
}

/// Normalized value compared against boolean threshold percentages.
///
/// Deliberately coarser than [`bucket`] (100 buckets, not 1000) and hashed
/// entity-first; both properties are load-bearing for parity with existing
/// deployments and must not be unified with the distribution formula.
pub(crate) fn threshold_normalized(entity_id: &str, flag_key: &str) -> f32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(entity_id.as_bytes());
    hasher.update(flag_key.as_bytes());
    (hasher.finalize() % 100) as f32
}

/// Build the cumulative bucket table for a rule's distributions, skipping
/// zero-rollout entries. Returns the retained distributions in declaration
/// order alongside their cumulative upper bounds in bucket space.
pub(crate) fn distribution_buckets(
    distributions: &[Distribution],
) -> (Vec<&Distribution>, Vec<u32>) {
    let mut valid = Vec::with_capacity(distributions.len());
    let mut buckets = Vec::with_capacity(distributions.len());

    for distribution in distributions {
        if distribution.rollout <= 0.0 {
            continue;
        }

        let width = (distribution.rollout * PERCENT_MULTIPLIER).round() as u32;
        let bound = buckets.last().copied().unwrap_or(0) + width;

        valid.push(distribution);
        buckets.push(bound);
    }

    (valid, buckets)
}

/// Index of the distribution whose cumulative bucket bound is the first one
/// strictly greater than the entity's bucket. `None` means the entity falls
/// past every distribution.
pub(crate) fn select_distribution(buckets: &[u32], entity_bucket: u32) -> Option<usize> {
    let index = buckets.partition_point(|&bound| bound <= entity_bucket);
    (index < buckets.len()).then_some(index)
}

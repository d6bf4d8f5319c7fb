//! Shard selection for the keyed worker pool
//!
//! Every message for one key lands on the same worker, so ordering per key
//! follows from routing alone and does not depend on the pool size.

use bus_types::Envelope;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Items that can be routed by a shard key.
pub trait Keyed {
    fn routing_key(&self) -> &str;
}

impl Keyed for Envelope {
    fn routing_key(&self) -> &str {
        self.aggregate_id()
    }
}

/// 32-bit FNV-1a. Stable across processes and platforms.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Worker index owning `key` in a pool of `worker_count` workers.
///
/// Returns 0 for an empty pool.
pub fn shard_for(key: &str, worker_count: usize) -> usize {
    if worker_count == 0 {
        return 0;
    }
    fnv1a32(key.as_bytes()) as usize % worker_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fnv_known_vectors() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_empty_pool() {
        assert_eq!(shard_for("anything", 0), 0);
    }

    #[test]
    fn test_envelope_key_is_aggregate_id() {
        let env = Envelope::new("acct-7", "Deposited", 1, b"1".to_vec());
        assert_eq!(env.routing_key(), "acct-7");
    }

    proptest! {
        #[test]
        fn shard_is_stable_and_in_range(key in "[a-z0-9:-]{1,40}", workers in 1usize..2048) {
            let first = shard_for(&key, workers);
            prop_assert!(first < workers);
            prop_assert_eq!(first, shard_for(&key, workers));
        }
    }
}

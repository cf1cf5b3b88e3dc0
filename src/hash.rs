//! Zero-sized hash builder for id-keyed engine collections.
//!
//! Subscriber sets, dependency sets and the traversal visited-set are keyed
//! by small arena ids, so HashDoS resistance buys nothing there. `FastHashBuilder`
//! plugs foldhash with a fixed seed into those collections.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// A zero-sized `BuildHasher` backed by foldhash with a fixed seed.
///
/// Hashes are deterministic across instances and runs. The keys are arena
/// ids the engine hands out itself, so HashDoS resistance is not needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x9e37_79b9_7f4a_7c15).build_hasher()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_carries_no_state() {
        assert_eq!(std::mem::size_of::<FastHashBuilder>(), 0);
    }

    #[test]
    fn ids_hash_the_same_across_builders() {
        assert_eq!(FastHashBuilder.hash_one(7u32), FastHashBuilder.hash_one(7u32));
    }
}

//! Support for hash tables whose keys carry a precomputed hash. Several passes hash the same
//! bytes more than once (e.g. once to bucket, once to insert), so we compute the hash up front
//! and use a pass-through hasher when the value lands in a table.

use foldhash::fast::FixedState;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::hash::Hasher;

/// Our hash functions need to produce the same values from run to run, otherwise section and
/// string ordering decisions would be non-reproducible, so use a fixed seed.
const HASH_SEED: u64 = 0xd06a_f11e_5ec7_10f5;

pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    FixedState::with_seed(HASH_SEED).hash_one(bytes)
}

/// Combines an extra hash value into an existing one. Order-sensitive.
pub(crate) fn hash_combine(hash: u64, other: u64) -> u64 {
    hash ^ (other
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(hash << 6)
        .wrapping_add(hash >> 2))
}

/// A value together with the hash of that value.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PreHashed<T> {
    value: T,
    hash: u64,
}

impl<T> PreHashed<T> {
    pub(crate) fn new(value: T, hash: u64) -> Self {
        Self { value, hash }
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }
}

impl<T> std::ops::Deref for PreHashed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: PartialEq> PartialEq for PreHashed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value == other.value
    }
}

impl<T: Eq> Eq for PreHashed<T> {}

impl<T> Hash for PreHashed<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// A hash map keyed by `PreHashed<K>` that uses the precomputed hash rather than hashing the key
/// again.
pub(crate) type PassThroughHashMap<K, V> =
    hashbrown::HashMap<PreHashed<K>, V, PassThroughHashBuilder>;

#[derive(Default, Clone, Copy)]
pub(crate) struct PassThroughHashBuilder;

pub(crate) struct PassThroughHasher {
    hash: u64,
}

impl BuildHasher for PassThroughHashBuilder {
    type Hasher = PassThroughHasher;

    fn build_hasher(&self) -> Self::Hasher {
        PassThroughHasher { hash: 0 }
    }
}

impl Hasher for PassThroughHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("PassThroughHasher only accepts u64 writes");
    }

    fn write_u64(&mut self, value: u64) {
        self.hash = value;
    }
}

#[test]
fn test_hash_bytes_is_stable_across_calls() {
    assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
    assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
}

#[test]
fn test_pass_through_map() {
    let mut map: PassThroughHashMap<&[u8], u32> = PassThroughHashMap::default();
    let key = |bytes: &'static [u8]| PreHashed::new(bytes, hash_bytes(bytes));
    map.insert(key(b"one"), 1);
    map.insert(key(b"two"), 2);
    assert_eq!(map.get(&key(b"one")), Some(&1));
    assert_eq!(map.get(&key(b"three")), None);
}

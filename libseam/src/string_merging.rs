//! Storage for section fragments - the individual strings / constants split out of mergeable
//! sections. Fragments are interned so that byte-equal fragments share an id, which lets the
//! rest of the linker compare them by id while folding compares them by content.

use crate::hash::PassThroughHashMap;
use crate::hash::PreHashed;
use crate::hash::hash_bytes;
use crate::sharding::ShardKey;
use crate::sharding::define_id_type;

define_id_type! {
    /// Identifies an interned fragment of a merged section.
    FragmentId
}

#[derive(Default)]
pub struct MergedStrings<'data> {
    fragments: Vec<&'data [u8]>,
    by_content: PassThroughHashMap<&'data [u8], FragmentId>,
}

impl<'data> MergedStrings<'data> {
    /// Interns `bytes`, returning the id of the existing fragment if one with the same content
    /// was already added.
    pub fn add(&mut self, bytes: &'data [u8]) -> FragmentId {
        let key = PreHashed::new(bytes, hash_bytes(bytes));
        *self.by_content.entry(key).or_insert_with(|| {
            let id = FragmentId::from_usize(self.fragments.len());
            self.fragments.push(bytes);
            id
        })
    }

    pub fn bytes(&self, id: FragmentId) -> &'data [u8] {
        self.fragments[id.as_usize()]
    }
}

#[test]
fn test_fragments_are_interned_by_content() {
    let mut strings = MergedStrings::default();
    let a = strings.add(b"hello");
    let b = strings.add(b"world");
    let c = strings.add(b"hello");
    assert_eq!(a, c);
    assert_ne!(a, b);
    assert_eq!(strings.bytes(b), b"world");
}

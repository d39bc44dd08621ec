//! Section identity digests. A digest is the truncation of a cryptographic hash; two sections
//! with equal digests are treated as identical, so the hash must be collision-resistant even on
//! adversarial inputs. We use blake3 and keep the first 16 bytes.

use std::fmt::Debug;

pub(crate) const DIGEST_SIZE: usize = 16;

/// The identity of a section's content and references at some propagation depth.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub(crate) struct Digest([u8; DIGEST_SIZE]);

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Accumulates the fields that define a section's identity.
///
/// All variable-length inputs must go through `write_sized_bytes` so that adjacent fields cannot
/// alias each other (e.g. contents "ab" + "c" vs "a" + "bc").
pub(crate) struct DigestWriter {
    hasher: blake3::Hasher,
}

impl Default for DigestWriter {
    fn default() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }
}

impl DigestWriter {
    pub(crate) fn write_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub(crate) fn write_sized_bytes(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    pub(crate) fn write_digest(&mut self, digest: &Digest) {
        self.hasher.update(&digest.0);
    }

    pub(crate) fn finish(&self) -> Digest {
        let mut out = [0; DIGEST_SIZE];
        out.copy_from_slice(&self.hasher.finalize().as_bytes()[..DIGEST_SIZE]);
        Digest(out)
    }
}

#[test]
fn test_sized_bytes_do_not_alias() {
    let mut a = DigestWriter::default();
    a.write_sized_bytes(b"ab");
    a.write_sized_bytes(b"c");

    let mut b = DigestWriter::default();
    b.write_sized_bytes(b"a");
    b.write_sized_bytes(b"bc");

    assert_ne!(a.finish(), b.finish());
}

#[test]
fn test_digest_is_deterministic() {
    let digest = |tag: u64| {
        let mut writer = DigestWriter::default();
        writer.write_u64(tag);
        writer.write_sized_bytes(b"contents");
        writer.finish()
    };

    assert_eq!(digest(1), digest(1));
    assert_ne!(digest(1), digest(2));
}

//! Types for working with ELF section attributes without pulling in a full object-file parser.

use std::fmt::Debug;
use std::fmt::Display;
use std::ops::BitOr;
use std::ops::BitOrAssign;

/// The flags of an input or output section (sh_flags).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SectionFlags(u64);

impl SectionFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn contains(self, flags: SectionFlags) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl BitOr for SectionFlags {
    type Output = SectionFlags;

    fn bitor(self, rhs: SectionFlags) -> Self::Output {
        SectionFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SectionFlags {
    fn bitor_assign(&mut self, rhs: SectionFlags) {
        self.0 |= rhs.0;
    }
}

impl Debug for SectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (flag, ch) in [
            (shf::WRITE, 'W'),
            (shf::ALLOC, 'A'),
            (shf::EXECINSTR, 'X'),
            (shf::MERGE, 'M'),
            (shf::STRINGS, 'S'),
            (shf::GROUP, 'G'),
            (shf::TLS, 'T'),
        ] {
            if self.contains(flag) {
                Display::fmt(&ch, f)?;
            }
        }
        Ok(())
    }
}

/// Section flag constants. Values match the ELF specification.
pub mod shf {
    use super::SectionFlags;

    pub const WRITE: SectionFlags = SectionFlags::from_u64(0x1);
    pub const ALLOC: SectionFlags = SectionFlags::from_u64(0x2);
    pub const EXECINSTR: SectionFlags = SectionFlags::from_u64(0x4);
    pub const MERGE: SectionFlags = SectionFlags::from_u64(0x10);
    pub const STRINGS: SectionFlags = SectionFlags::from_u64(0x20);
    pub const GROUP: SectionFlags = SectionFlags::from_u64(0x200);
    pub const TLS: SectionFlags = SectionFlags::from_u64(0x400);
}

/// The type of a section (sh_type).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SectionType(u32);

impl SectionType {
    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns whether the section has no contents in the file (zero initialised).
    pub const fn is_no_bits(self) -> bool {
        self.0 == sht::NOBITS.0
    }

    pub const fn is_init_array(self) -> bool {
        self.0 == sht::INIT_ARRAY.0
    }

    pub const fn is_fini_array(self) -> bool {
        self.0 == sht::FINI_ARRAY.0
    }
}

impl Debug for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SectionType({})", self.0)
    }
}

/// Section type constants. Values match the ELF specification.
pub mod sht {
    use super::SectionType;

    pub const NULL: SectionType = SectionType::from_u32(0);
    pub const PROGBITS: SectionType = SectionType::from_u32(1);
    pub const NOBITS: SectionType = SectionType::from_u32(8);
    pub const INIT_ARRAY: SectionType = SectionType::from_u32(14);
    pub const FINI_ARRAY: SectionType = SectionType::from_u32(15);
    pub const PREINIT_ARRAY: SectionType = SectionType::from_u32(16);
}

/// Names of sections that hold startup / shutdown code and so must never be merged or reordered.
pub mod secnames {
    pub const INIT: &[u8] = b".init";
    pub const FINI: &[u8] = b".fini";
}

/// Returns whether `name` is a valid C identifier. The start and stop of sections with such names
/// are addressable from C code via the runtime-generated `__start_*` / `__stop_*` symbols, so
/// their contents must be kept as-is.
pub fn is_c_identifier(name: &[u8]) -> bool {
    let Some((first, rest)) = name.split_first() else {
        return false;
    };

    (first.is_ascii_alphabetic() || *first == b'_')
        && rest.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

#[test]
fn test_is_c_identifier() {
    assert!(is_c_identifier(b"foo"));
    assert!(is_c_identifier(b"_start2"));
    assert!(!is_c_identifier(b""));
    assert!(!is_c_identifier(b".text"));
    assert!(!is_c_identifier(b"2fast"));
    assert!(!is_c_identifier(b"has-dash"));
}

#[test]
fn test_section_flags() {
    let flags = shf::ALLOC | shf::EXECINSTR;
    assert!(flags.contains(shf::ALLOC));
    assert!(!flags.contains(shf::WRITE));
    assert!(!shf::ALLOC.contains(flags));
    assert_eq!(format!("{flags:?}"), "AX");
}

//! Input sections and their relocations. The byte contents borrow from the input file buffers;
//! the mutable state that folding maintains lives in `FoldState`.

use crate::input_data::FileId;
use crate::sharding::ShardKey;
use crate::sharding::define_id_type;
use crate::string_merging::FragmentId;
use crate::symbol::SymbolId;
use linker_utils::elf::SectionFlags;
use linker_utils::elf::SectionType;
use smallvec::SmallVec;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::Relaxed;

define_id_type! {
    /// Identifies an input section across all input files.
    SectionId
}

/// A total order over all input sections, derived from file load order. Used to break ties
/// deterministically when electing fold survivors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionPriority(u64);

impl SectionPriority {
    pub(crate) fn new(file_priority: u32, index_in_file: usize) -> Self {
        Self(u64::from(file_priority) << 32 | index_in_file as u64)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct InputSection<'data> {
    /// The file that contributed this section.
    pub file_id: FileId,

    pub name: &'data [u8],

    pub section_type: SectionType,

    pub flags: SectionFlags,

    pub contents: &'data [u8],

    /// The section's relocations in the order they appeared in the input file. Folding treats
    /// this order as significant.
    pub relocations: Vec<Relocation>,

    /// The exception frames associated with this section.
    pub fdes: Vec<FdeRecord<'data>>,

    pub(crate) priority: SectionPriority,

    pub(crate) fold: FoldState,
}

impl InputSection<'_> {
    pub fn priority(&self) -> SectionPriority {
        self.priority
    }

    /// The section this one was folded into, if any. Survivors point to themselves; sections
    /// that didn't participate in folding have no leader.
    pub fn leader(&self) -> Option<SectionId> {
        self.fold.leader()
    }

    pub fn is_dead(&self) -> bool {
        self.fold.dead.load(Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    /// Offset of the patch site within the section.
    pub offset: u64,

    /// Raw architecture-specific relocation type.
    pub r_type: u32,

    pub addend: i64,

    pub target: RelocationTarget,
}

#[derive(Debug, Clone, Copy)]
pub enum RelocationTarget {
    Symbol(SymbolId),

    /// A reference into a merged section, already resolved to the interned fragment plus an
    /// offset relative to the fragment's start.
    Fragment { fragment: FragmentId, addend: i64 },
}

/// An exception-handling frame description entry split out of `.eh_frame` and attributed to the
/// section whose code it describes.
#[derive(Debug)]
pub struct FdeRecord<'data> {
    pub contents: &'data [u8],

    /// The FDE's relocations. The first relocation points back at the described section itself,
    /// so passes that compare FDEs across sections skip it.
    pub relocations: SmallVec<[FdeRelocation; 1]>,
}

impl<'data> FdeRecord<'data> {
    /// The bytes that identify this FDE. Bytes 0 to 4 contain the record length and bytes 4 to 8
    /// an offset to the CIE; both are position-dependent, so they are excluded.
    pub(crate) fn identity_bytes(&self) -> &'data [u8] {
        self.contents.get(8..).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FdeRelocation {
    pub symbol: SymbolId,

    pub r_type: u32,

    pub offset: u64,

    pub addend: i64,
}

/// Per-section state maintained by the folding pass.
///
/// `leaf`, `eligible` and the dense index are written by passes that have exclusive access to a
/// disjoint range of sections. `index`, `leader` and `dead` are additionally stored from shared
/// parallel passes, hence the atomics; all loads and stores are relaxed because rayon's fork-join
/// regions order them.
#[derive(Debug)]
pub(crate) struct FoldState {
    /// Participates in digest propagation. Never set together with `leaf`.
    pub(crate) eligible: bool,

    /// Foldable purely by content: no section relocations and no FDE relocations other than the
    /// self-reference.
    pub(crate) leaf: bool,

    /// Dense index into the propagation arrays, assigned by the section enumerator.
    index: AtomicU32,

    /// Encoded `Option<SectionId>`: `u32::MAX` means no leader.
    leader: AtomicU32,

    pub(crate) dead: AtomicBool,
}

const NO_LEADER: u32 = u32::MAX;

impl Default for FoldState {
    fn default() -> Self {
        Self {
            eligible: false,
            leaf: false,
            index: AtomicU32::new(0),
            leader: AtomicU32::new(NO_LEADER),
            dead: AtomicBool::new(false),
        }
    }
}

impl FoldState {
    pub(crate) fn reset(&mut self) {
        self.eligible = false;
        self.leaf = false;
        *self.index.get_mut() = 0;
        *self.leader.get_mut() = NO_LEADER;
    }

    pub(crate) fn set_index(&self, index: usize) {
        debug_assert!(index < NO_LEADER as usize);
        self.index.store(index as u32, Relaxed);
    }

    pub(crate) fn index(&self) -> usize {
        self.index.load(Relaxed) as usize
    }

    pub(crate) fn set_leader(&self, leader: SectionId) {
        self.leader.store(leader.as_usize() as u32, Relaxed);
    }

    pub(crate) fn leader(&self) -> Option<SectionId> {
        match self.leader.load(Relaxed) {
            NO_LEADER => None,
            raw => Some(SectionId::from_usize(raw as usize)),
        }
    }

    pub(crate) fn mark_dead(&self) {
        self.dead.store(true, Relaxed);
    }
}

//! Symbols as seen by the folding pass: a value plus whatever the symbol resolved to during
//! symbol resolution. Folding rewrites the referent of symbols whose section was merged away.

use crate::section::SectionId;
use crate::sharding::define_id_type;
use crate::string_merging::FragmentId;

define_id_type! {
    /// Identifies a symbol across all input files.
    SymbolId
}

#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    /// The symbol's offset within its referent.
    pub value: u64,

    pub referent: SymbolReferent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolReferent {
    Section(SectionId),

    Fragment(FragmentId),

    /// The symbol is undefined or absolute and doesn't point into any section.
    Unresolved,
}

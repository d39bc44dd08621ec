//! The object graph that the folding pass operates on. The front-end (parser, symbol resolution,
//! comdat elimination) populates this; folding mutates only the per-section fold state and the
//! referents of symbols whose section was merged away.

use crate::section::FdeRecord;
use crate::section::InputSection;
use crate::section::Relocation;
use crate::section::SectionId;
use crate::section::SectionPriority;
use crate::sharding::ShardKey;
use crate::sharding::define_id_type;
use crate::string_merging::FragmentId;
use crate::string_merging::MergedStrings;
use crate::symbol::Symbol;
use crate::symbol::SymbolId;
use crate::symbol::SymbolReferent;
use linker_utils::elf::SectionFlags;
use linker_utils::elf::SectionType;
use std::fmt::Display;

define_id_type! {
    /// Identifies an input file.
    FileId
}

/// Archive members are given priorities above all non-archive files so that sections from
/// directly specified objects win ties against sections pulled out of archives.
const ARCHIVE_PRIORITY_BIT: u32 = 1 << 31;

#[derive(Debug)]
pub struct ObjectFile {
    pub name: String,

    priority: u32,

    /// The file's sections in input order.
    pub sections: Vec<SectionId>,
}

pub struct InputData<'data> {
    files: Vec<ObjectFile>,
    sections: Vec<InputSection<'data>>,
    symbols: Vec<Symbol>,
    merged_strings: MergedStrings<'data>,
}

impl<'data> InputData<'data> {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            sections: Vec::new(),
            symbols: Vec::new(),
            merged_strings: MergedStrings::default(),
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>, is_archive_member: bool) -> FileId {
        let id = FileId::from_usize(self.files.len());
        let mut priority = id.as_usize() as u32;
        if is_archive_member {
            priority |= ARCHIVE_PRIORITY_BIT;
        }
        self.files.push(ObjectFile {
            name: name.into(),
            priority,
            sections: Vec::new(),
        });
        id
    }

    pub fn add_section(
        &mut self,
        file_id: FileId,
        name: &'data [u8],
        section_type: SectionType,
        flags: SectionFlags,
        contents: &'data [u8],
    ) -> SectionId {
        let id = SectionId::from_usize(self.sections.len());
        let file = &mut self.files[file_id.as_usize()];
        let priority = SectionPriority::new(file.priority, file.sections.len());
        file.sections.push(id);
        self.sections.push(InputSection {
            file_id,
            name,
            section_type,
            flags,
            contents,
            relocations: Vec::new(),
            fdes: Vec::new(),
            priority,
            fold: Default::default(),
        });
        id
    }

    pub fn add_relocation(&mut self, section_id: SectionId, relocation: Relocation) {
        self.sections[section_id.as_usize()]
            .relocations
            .push(relocation);
    }

    pub fn add_fde(&mut self, section_id: SectionId, fde: FdeRecord<'data>) {
        self.sections[section_id.as_usize()].fdes.push(fde);
    }

    pub fn add_symbol(&mut self, value: u64, referent: SymbolReferent) -> SymbolId {
        let id = SymbolId::from_usize(self.symbols.len());
        self.symbols.push(Symbol { value, referent });
        id
    }

    pub fn add_fragment(&mut self, bytes: &'data [u8]) -> FragmentId {
        self.merged_strings.add(bytes)
    }

    pub fn files(&self) -> &[ObjectFile] {
        &self.files
    }

    pub fn section(&self, id: SectionId) -> &InputSection<'data> {
        &self.sections[id.as_usize()]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.as_usize()]
    }

    pub fn fragment_bytes(&self, id: FragmentId) -> &'data [u8] {
        self.merged_strings.bytes(id)
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub(crate) fn sections(&self) -> &[InputSection<'data>] {
        &self.sections
    }

    pub(crate) fn sections_mut(&mut self) -> &mut [InputSection<'data>] {
        &mut self.sections
    }

    /// Splits the borrow so that symbols can be rewritten while section state is read.
    pub(crate) fn sections_and_symbols_mut(
        &mut self,
    ) -> (&[InputSection<'data>], &mut [Symbol]) {
        (&self.sections, &mut self.symbols)
    }

    /// Formats a section for diagnostics as `file:(section-name)`.
    pub(crate) fn section_display(&self, id: SectionId) -> SectionDisplay<'_> {
        let section = self.section(id);
        SectionDisplay {
            file: &self.files[section.file_id.as_usize()].name,
            name: section.name,
        }
    }
}

impl Default for InputData<'_> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct SectionDisplay<'a> {
    file: &'a str,
    name: &'a [u8],
}

impl Display for SectionDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:({})", self.file, String::from_utf8_lossy(self.name))
    }
}

//! Core library for the seam linker. The entry point of interest is
//! [`fold_identical_sections`], which deduplicates input sections whose machine code and
//! references are indistinguishable so that the output binary only carries one copy. The
//! front-end (parsing, symbol resolution, comdat elimination) populates an [`InputData`] graph;
//! folding mutates only the per-section fold state and the referents of symbols whose section
//! was merged away.

pub mod args;
mod digest;
pub mod error;
mod hash;
pub mod icf;
pub mod input_data;
pub mod section;
mod sharding;
pub mod string_merging;
pub mod symbol;
pub mod timing;

pub use args::Args;
pub use error::Context;
pub use error::Error;
pub use error::Result;
pub use icf::fold_identical_sections;
pub use input_data::FileId;
pub use input_data::InputData;
pub use input_data::ObjectFile;
pub use section::FdeRecord;
pub use section::FdeRelocation;
pub use section::InputSection;
pub use section::Relocation;
pub use section::RelocationTarget;
pub use section::SectionId;
pub use section::SectionPriority;
pub use string_merging::FragmentId;
pub use symbol::Symbol;
pub use symbol::SymbolId;
pub use symbol::SymbolReferent;

/// Sets up the global worker pool used by all parallel phases. Call once before linking.
pub fn setup_thread_pool(args: &Args) -> Result {
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_threads.get())
        .thread_name(|i| format!("seam-{i}"))
        .build_global()
        .map_err(|err| Error::new(format!("failed to create thread pool: {err}")))
}

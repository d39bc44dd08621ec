//! Identical code folding. Detects groups of executable sections whose bytes and outgoing
//! references are indistinguishable, keeps one survivor per group and redirects all symbols that
//! pointed into the rest.
//!
//! Sections with no references are settled up front by hashing their contents. The remainder
//! form a graph whose edges are their section-to-section relocations. Each section gets a digest
//! of everything about it that doesn't depend on other foldable sections, then repeated rounds
//! fold every section's digest together with its neighbours' digests, so that after round r a
//! digest covers the section's neighbourhood out to radius r. Once the number of distinct
//! digests stops changing, sections with equal digests have isomorphic unfoldings and are safe
//! to merge.

use crate::args::Args;
use crate::bail;
use crate::digest::Digest;
use crate::digest::DigestWriter;
use crate::error::Result;
use crate::hash::PassThroughHashMap;
use crate::hash::PreHashed;
use crate::hash::hash_bytes;
use crate::hash::hash_combine;
use crate::input_data::InputData;
use crate::section::FdeRecord;
use crate::section::InputSection;
use crate::section::RelocationTarget;
use crate::section::SectionId;
use crate::sharding::ShardKey;
use crate::symbol::SymbolId;
use crate::symbol::SymbolReferent;
use crate::timing_phase;
use crate::verbose_timing_phase;
use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use itertools::Itertools;
use linker_utils::elf::is_c_identifier;
use linker_utils::elf::secnames;
use linker_utils::elf::shf;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::IntoParallelRefMutIterator;
use rayon::iter::ParallelIterator;
use rayon::slice::ParallelSlice;
use rayon::slice::ParallelSliceMut;
use std::io::Write;

/// Leaf sections are bucketed by hash so that each bucket can be deduplicated independently.
const LEAF_BUCKETS: usize = 32;

/// How many propagation rounds to run between checks of the equivalence-class count.
const CLASS_COUNT_INTERVAL: usize = 10;

pub fn fold_identical_sections(inputs: &mut InputData, args: &Args) -> Result {
    timing_phase!("Fold identical sections");

    classify_sections(inputs);
    dedupe_leaf_sections(inputs)?;

    let mut order = gather_sections(inputs);

    let initial = compute_digests(inputs, &order);
    let blank = vec![Digest::default(); initial.len()];
    let mut digests = [initial, blank];

    let (edges, edge_indices) = gather_edges(inputs, &order);

    let (slot, rounds) = propagate_to_convergence(&mut digests, &edges, &edge_indices);
    tracing::debug!(sections = order.len(), rounds, "digest propagation converged");

    assign_class_leaders(inputs, &mut order, &digests[slot]);

    if args.print_icf_sections {
        let stdout = std::io::stdout();
        write_report(inputs, &mut stdout.lock())?;
    }

    redirect_symbols(inputs);
    retire_folded_sections(inputs);

    if cfg!(debug_assertions) {
        verify_folding(inputs)?;
    }

    Ok(())
}

/// Returns whether it is safe in principle to merge `section` with an identical section.
fn is_eligible(section: &InputSection) -> bool {
    let is_init =
        section.section_type.is_init_array() || section.name == secnames::INIT;
    let is_fini =
        section.section_type.is_fini_array() || section.name == secnames::FINI;

    section.flags.contains(shf::ALLOC)
        && section.flags.contains(shf::EXECINSTR)
        && !section.flags.contains(shf::WRITE)
        && !section.section_type.is_no_bits()
        && !is_init
        && !is_fini
        && !is_c_identifier(section.name)
}

/// A leaf has no identity-bearing references, so whether it can merge with another section is
/// determined by content alone. Every FDE is allowed its self-reference.
fn is_leaf(section: &InputSection) -> bool {
    section.relocations.is_empty()
        && section.fdes.iter().all(|fde| fde.relocations.len() <= 1)
}

fn classify_sections(inputs: &mut InputData) {
    timing_phase!("Classify sections");

    inputs.sections_mut().par_iter_mut().for_each(|section| {
        section.fold.reset();

        if section.is_dead() || !is_eligible(section) {
            return;
        }

        if is_leaf(section) {
            section.fold.leaf = true;
        } else {
            section.fold.eligible = true;
        }
    });
}

/// The content identity of a leaf section. The first 8 bytes of each FDE hold the record length
/// and the CIE back-offset, both position-dependent, so FDEs are compared from byte 8 on.
#[derive(Clone, Copy)]
struct LeafIdentity<'a> {
    contents: &'a [u8],
    fdes: &'a [FdeRecord<'a>],
}

impl PartialEq for LeafIdentity<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.contents == other.contents
            && self.fdes.len() == other.fdes.len()
            && self
                .fdes
                .iter()
                .zip(other.fdes)
                .all(|(a, b)| a.identity_bytes() == b.identity_bytes())
    }
}

impl Eq for LeafIdentity<'_> {}

fn leaf_identity<'a>(section: &'a InputSection) -> PreHashed<LeafIdentity<'a>> {
    let identity = LeafIdentity {
        contents: section.contents,
        fdes: &section.fdes,
    };

    let mut hash = hash_bytes(identity.contents);
    for fde in identity.fdes {
        hash = hash_combine(hash, hash_bytes(fde.identity_bytes()));
    }

    PreHashed::new(identity, hash)
}

/// Collapses leaf sections by content equality. Each file contributes its leaves to per-bucket
/// lists, then each bucket is reduced to a map from content to the lowest-priority section with
/// that content. Bucket reduction visits files in input order, though the outcome doesn't depend
/// on it since the representative is a running minimum.
fn dedupe_leaf_sections(inputs: &InputData) -> Result {
    timing_phase!("Dedupe leaf sections");

    let per_file: Vec<[Vec<(PreHashed<LeafIdentity>, SectionId)>; LEAF_BUCKETS]> = inputs
        .files()
        .par_iter()
        .map(|file| {
            verbose_timing_phase!("Bucket leaf sections for file");

            let mut buckets: [Vec<_>; LEAF_BUCKETS] = std::array::from_fn(|_| Vec::new());
            for &id in &file.sections {
                let section = inputs.section(id);
                if !section.fold.leaf {
                    continue;
                }
                let key = leaf_identity(section);
                buckets[key.hash() as usize % LEAF_BUCKETS].push((key, id));
            }
            buckets
        })
        .collect();

    let maps: Vec<PassThroughHashMap<LeafIdentity, SectionId>> = (0..LEAF_BUCKETS)
        .into_par_iter()
        .map(|bucket| {
            let mut map = PassThroughHashMap::default();
            for file_buckets in &per_file {
                for &(key, id) in &file_buckets[bucket] {
                    match map.entry(key) {
                        Entry::Occupied(mut entry) => {
                            if inputs.section(id).priority < inputs.section(*entry.get()).priority
                            {
                                entry.insert(id);
                            }
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(id);
                        }
                    }
                }
            }
            map
        })
        .collect();

    inputs.sections().par_iter().try_for_each(|section| {
        if !section.fold.leaf {
            return Ok(());
        }

        let key = leaf_identity(section);
        let Some(representative) = maps[key.hash() as usize % LEAF_BUCKETS].get(&key) else {
            bail!(
                "internal error: leaf section {} missing from content table",
                String::from_utf8_lossy(section.name)
            );
        };
        section.fold.set_leader(*representative);
        Ok(())
    })
}

/// Assigns each propagation participant a dense index and returns the participants in input
/// order. Counting and filling are separate passes so that each worker writes a disjoint range.
fn gather_sections(inputs: &InputData) -> Vec<SectionId> {
    timing_phase!("Gather sections");

    let counts: Vec<usize> = inputs
        .files()
        .par_iter()
        .map(|file| {
            file.sections
                .iter()
                .filter(|id| inputs.section(**id).fold.eligible)
                .count()
        })
        .collect();

    let mut order = vec![SectionId::from_usize(0); counts.iter().sum()];

    let mut chunks = Vec::with_capacity(counts.len());
    let mut rest = order.as_mut_slice();
    for &count in &counts {
        let (head, tail) = rest.split_at_mut(count);
        chunks.push(head);
        rest = tail;
    }

    inputs
        .files()
        .par_iter()
        .zip(chunks)
        .for_each(|(file, chunk)| {
            let mut next = 0;
            for &id in &file.sections {
                if inputs.section(id).fold.eligible {
                    chunk[next] = id;
                    next += 1;
                }
            }
        });

    order.par_iter().enumerate().for_each(|(index, &id)| {
        inputs.section(id).fold.set_index(index);
    });

    order
}

/// Discriminators for what a reference resolves to. Without them, e.g. a fragment's bytes could
/// hash identically to a section priority.
mod reference_tags {
    pub(super) const FRAGMENT: u64 = 1;
    pub(super) const SYMBOL_FRAGMENT: u64 = 2;
    pub(super) const UNRESOLVED: u64 = 3;
    pub(super) const FOLDED_LEAF: u64 = 4;
    pub(super) const PARTICIPANT: u64 = 5;
    pub(super) const FIXED_SECTION: u64 = 6;
}

fn write_symbol_fingerprint(inputs: &InputData, writer: &mut DigestWriter, symbol_id: SymbolId) {
    let symbol = inputs.symbol(symbol_id);

    match symbol.referent {
        SymbolReferent::Fragment(fragment) => {
            writer.write_u64(reference_tags::SYMBOL_FRAGMENT);
            writer.write_sized_bytes(inputs.fragment_bytes(fragment));
        }
        SymbolReferent::Unresolved => {
            writer.write_u64(reference_tags::UNRESOLVED);
        }
        SymbolReferent::Section(section_id) => {
            let section = inputs.section(section_id);
            if let Some(leader) = section.fold.leader() {
                // A leaf that dedup already settled; its identity is its survivor.
                writer.write_u64(reference_tags::FOLDED_LEAF);
                writer.write_u64(inputs.section(leader).priority.raw());
            } else if section.fold.eligible {
                // Deliberately contributes nothing: the referent's identity is supplied by
                // digest propagation.
                writer.write_u64(reference_tags::PARTICIPANT);
            } else {
                writer.write_u64(reference_tags::FIXED_SECTION);
                writer.write_u64(section.priority.raw());
            }
        }
    }

    writer.write_u64(symbol.value);
}

/// Digests everything about `section` that doesn't depend on the identity of other propagation
/// participants.
fn initial_digest(inputs: &InputData, section: &InputSection) -> Digest {
    let mut writer = DigestWriter::default();

    writer.write_sized_bytes(section.contents);
    writer.write_u64(section.flags.raw());
    writer.write_u64(section.fdes.len() as u64);
    writer.write_u64(section.relocations.len() as u64);

    for fde in &section.fdes {
        writer.write_sized_bytes(fde.identity_bytes());
        writer.write_u64(fde.relocations.len() as u64);

        // The first relocation is the FDE's reference back to this section.
        for rel in fde.relocations.iter().skip(1) {
            write_symbol_fingerprint(inputs, &mut writer, rel.symbol);
            writer.write_u64(rel.r_type.into());
            writer.write_u64(rel.offset);
            writer.write_u64(rel.addend as u64);
        }
    }

    for rel in &section.relocations {
        writer.write_u64(rel.offset);
        writer.write_u64(rel.r_type.into());
        writer.write_u64(rel.addend as u64);

        match rel.target {
            RelocationTarget::Fragment { fragment, addend } => {
                writer.write_u64(reference_tags::FRAGMENT);
                writer.write_u64(addend as u64);
                writer.write_sized_bytes(inputs.fragment_bytes(fragment));
            }
            RelocationTarget::Symbol(symbol) => {
                write_symbol_fingerprint(inputs, &mut writer, symbol);
            }
        }
    }

    writer.finish()
}

fn compute_digests(inputs: &InputData, order: &[SectionId]) -> Vec<Digest> {
    timing_phase!("Compute initial digests");

    order
        .par_iter()
        .map(|&id| initial_digest(inputs, inputs.section(id)))
        .collect()
}

fn for_each_reference(inputs: &InputData, section: &InputSection, mut f: impl FnMut(SectionId)) {
    for rel in &section.relocations {
        let RelocationTarget::Symbol(symbol_id) = rel.target else {
            continue;
        };
        let SymbolReferent::Section(target) = inputs.symbol(symbol_id).referent else {
            continue;
        };
        if inputs.section(target).fold.eligible {
            f(target);
        }
    }
}

/// Builds the adjacency list of identity dependencies between propagation participants, as a
/// flat edge array plus per-source start offsets. Edges keep relocation order; the digest of a
/// neighbourhood is order-sensitive.
fn gather_edges(inputs: &InputData, order: &[SectionId]) -> (Vec<u32>, Vec<u32>) {
    timing_phase!("Gather edges");

    let counts: Vec<usize> = order
        .par_iter()
        .map(|&id| {
            let mut count = 0;
            for_each_reference(inputs, inputs.section(id), |_| count += 1);
            count
        })
        .collect();

    let mut edge_indices = Vec::with_capacity(counts.len());
    let mut total = 0;
    for &count in &counts {
        edge_indices.push(total as u32);
        total += count;
    }

    let mut edges = vec![0; total];

    let mut chunks = Vec::with_capacity(counts.len());
    let mut rest = edges.as_mut_slice();
    for &count in &counts {
        let (head, tail) = rest.split_at_mut(count);
        chunks.push(head);
        rest = tail;
    }

    order.par_iter().zip(chunks).for_each(|(&id, chunk)| {
        let mut next = 0;
        for_each_reference(inputs, inputs.section(id), |target| {
            chunk[next] = inputs.section(target).fold.index() as u32;
            next += 1;
        });
    });

    (edges, edge_indices)
}

/// Runs one propagation round: each section's new digest absorbs its own previous digest and
/// the previous digests of the sections it references.
fn propagate(digests: &mut [Vec<Digest>; 2], slot: usize, edges: &[u32], edge_indices: &[u32]) {
    let [first, second] = digests;
    let (current, next) = if slot == 0 {
        (&*first, second)
    } else {
        (&*second, first)
    };

    next.par_iter_mut().enumerate().for_each(|(i, out)| {
        let begin = edge_indices[i] as usize;
        let end = edge_indices.get(i + 1).map_or(edges.len(), |&e| e as usize);

        let mut writer = DigestWriter::default();
        writer.write_digest(&current[i]);
        for &edge in &edges[begin..end] {
            writer.write_digest(&current[edge as usize]);
        }
        *out = writer.finish();
    });
}

/// Counts the distinct digests in `digests`.
fn count_equivalence_classes(digests: &[Digest]) -> usize {
    if digests.is_empty() {
        return 0;
    }

    let mut sorted = digests.to_vec();
    sorted.par_sort_unstable();
    sorted
        .par_windows(2)
        .filter(|pair| pair[0] != pair[1])
        .count()
        + 1
}

/// Iterates propagation until the partition induced by the digests stops refining. Sections
/// with distinct digests keep distinct digests (each new digest absorbs the old one), so the
/// class count can only grow; it is bounded by the section count, hence a fixed point exists.
/// Counting is much more expensive than a round, so we only check every few rounds.
///
/// Returns the buffer slot holding the final digests and the number of rounds run.
fn propagate_to_convergence(
    digests: &mut [Vec<Digest>; 2],
    edges: &[u32],
    edge_indices: &[u32],
) -> (usize, usize) {
    timing_phase!("Propagate digests");

    let mut slot = 0;
    let mut rounds = 0;
    let mut num_classes = None;

    loop {
        propagate(digests, slot, edges, edge_indices);
        slot ^= 1;
        rounds += 1;

        if rounds % CLASS_COUNT_INTERVAL == 0 {
            let count = count_equivalence_classes(&digests[slot]);
            if num_classes == Some(count) {
                return (slot, rounds);
            }
            num_classes = Some(count);
        }
    }
}

/// Groups sections by digest and elects the lowest-priority member of each group as its leader.
/// The scan is expressed as a per-index predicate so that it parallelises: an index starts a new
/// class iff its left neighbour has a different digest, and whoever starts a class writes the
/// leader for the whole run.
fn assign_class_leaders(inputs: &InputData, order: &mut [SectionId], digests: &[Digest]) {
    timing_phase!("Merge equivalence classes");

    let digest_of = |id: SectionId| digests[inputs.section(id).fold.index()];

    order.par_sort_by(|&a, &b| {
        digest_of(a)
            .cmp(&digest_of(b))
            .then_with(|| inputs.section(a).priority.cmp(&inputs.section(b).priority))
    });

    (0..order.len()).into_par_iter().for_each(|i| {
        if i != 0 && digest_of(order[i - 1]) == digest_of(order[i]) {
            return;
        }

        let leader = order[i];
        let mut j = i;
        while j < order.len() && digest_of(order[j]) == digest_of(leader) {
            inputs.section(order[j]).fold.set_leader(leader);
            j += 1;
        }
    });
}

/// Reports what was folded into what. Written before symbols are redirected, while each folded
/// section still records its original place in the inputs.
pub(crate) fn write_report(inputs: &InputData, out: &mut dyn Write) -> Result {
    timing_phase!("Print folded sections");

    let mut folded: HashMap<SectionId, Vec<SectionId>> = HashMap::new();
    let mut leaders = Vec::new();

    for (i, section) in inputs.sections().iter().enumerate() {
        let id = SectionId::from_usize(i);
        match section.fold.leader() {
            Some(leader) if leader == id => leaders.push(id),
            Some(leader) => folded.entry(leader).or_default().push(id),
            None => {}
        }
    }

    let mut saved_bytes = 0;

    for leader in leaders
        .into_iter()
        .sorted_by_key(|&id| inputs.section(id).priority)
    {
        let Some(members) = folded.get(&leader) else {
            continue;
        };

        writeln!(out, "selected section {}", inputs.section_display(leader))?;
        for &member in members {
            writeln!(
                out,
                "  removing identical section {}",
                inputs.section_display(member)
            )?;
        }

        saved_bytes += inputs.section(leader).contents.len() as u64 * members.len() as u64;
    }

    writeln!(out, "ICF saved {saved_bytes} bytes")?;
    Ok(())
}

/// Points every symbol that resolved into a folded section at the survivor instead. This is the
/// mutation the rest of the linker observes: once symbols are redirected, the folded sections
/// are unreferenced and can be dropped from the output.
fn redirect_symbols(inputs: &mut InputData) {
    timing_phase!("Redirect symbols");

    let (sections, symbols) = inputs.sections_and_symbols_mut();

    symbols.par_iter_mut().for_each(|symbol| {
        if let SymbolReferent::Section(id) = symbol.referent
            && let Some(leader) = sections[id.as_usize()].fold.leader()
            && leader != id
        {
            symbol.referent = SymbolReferent::Section(leader);
        }
    });
}

fn retire_folded_sections(inputs: &InputData) {
    timing_phase!("Retire folded sections");

    inputs
        .sections()
        .par_iter()
        .enumerate()
        .for_each(|(i, section)| {
            if let Some(leader) = section.fold.leader()
                && leader.as_usize() != i
            {
                section.fold.mark_dead();
            }
        });
}

/// Invariant checks on the committed fold state. Cheap relative to the pass itself, but only run
/// in debug builds.
fn verify_folding(inputs: &InputData) -> Result {
    for (i, section) in inputs.sections().iter().enumerate() {
        let id = SectionId::from_usize(i);
        let leader = section.fold.leader();

        if leader.is_some() != (section.fold.eligible || section.fold.leaf) {
            bail!(
                "internal error: fold leader set inconsistently on {}",
                inputs.section_display(id)
            );
        }

        if let Some(leader) = leader {
            let leader_section = inputs.section(leader);
            if leader_section.fold.leader() != Some(leader) {
                bail!(
                    "internal error: fold survivor {} does not lead itself",
                    inputs.section_display(leader)
                );
            }
            if leader_section.priority > section.priority {
                bail!(
                    "internal error: fold survivor {} outranked by {}",
                    inputs.section_display(leader),
                    inputs.section_display(id)
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
use crate::input_data::FileId;
#[cfg(test)]
use crate::section::FdeRelocation;
#[cfg(test)]
use crate::section::Relocation;
#[cfg(test)]
use linker_utils::elf::sht;
#[cfg(test)]
use smallvec::smallvec;

#[cfg(test)]
fn add_text_section<'data>(
    inputs: &mut InputData<'data>,
    file: FileId,
    name: &'data [u8],
    contents: &'data [u8],
) -> SectionId {
    inputs.add_section(
        file,
        name,
        sht::PROGBITS,
        shf::ALLOC | shf::EXECINSTR,
        contents,
    )
}

#[cfg(test)]
fn reloc_to(symbol: SymbolId, offset: u64) -> Relocation {
    Relocation {
        offset,
        r_type: 2,
        addend: 0,
        target: RelocationTarget::Symbol(symbol),
    }
}

#[cfg(test)]
fn fold(inputs: &mut InputData) {
    fold_identical_sections(inputs, &Args::default()).unwrap();
}

#[cfg(test)]
fn leader_of(inputs: &InputData, id: SectionId) -> Option<SectionId> {
    inputs.section(id).leader()
}

#[test]
fn test_folds_identical_sections_across_files() {
    let mut inputs = InputData::new();
    let file_a = inputs.add_file("a.o", false);
    let file_b = inputs.add_file("b.o", false);
    let sec_a = add_text_section(&mut inputs, file_a, b".text.f", b"\x55\x48\x89\xe5\xc3");
    let sec_b = add_text_section(&mut inputs, file_b, b".text.f", b"\x55\x48\x89\xe5\xc3");
    let sym_a = inputs.add_symbol(0, SymbolReferent::Section(sec_a));
    let sym_b = inputs.add_symbol(0, SymbolReferent::Section(sec_b));

    fold(&mut inputs);

    assert_eq!(leader_of(&inputs, sec_a), Some(sec_a));
    assert_eq!(leader_of(&inputs, sec_b), Some(sec_a));
    assert!(!inputs.section(sec_a).is_dead());
    assert!(inputs.section(sec_b).is_dead());
    assert_eq!(inputs.symbol(sym_a).referent, SymbolReferent::Section(sec_a));
    assert_eq!(inputs.symbol(sym_b).referent, SymbolReferent::Section(sec_a));
}

#[test]
fn test_c_identifier_names_survive() {
    let mut inputs = InputData::new();
    let file_a = inputs.add_file("a.o", false);
    let file_b = inputs.add_file("b.o", false);
    let named = add_text_section(&mut inputs, file_a, b"foo", b"\x90\x90\xc3");
    let cold = add_text_section(&mut inputs, file_b, b".text.cold", b"\x90\x90\xc3");

    fold(&mut inputs);

    // `foo` is addressable via __start_foo / __stop_foo, so it can't participate at all.
    assert_eq!(leader_of(&inputs, named), None);
    assert_eq!(leader_of(&inputs, cold), Some(cold));
    assert!(!inputs.section(named).is_dead());
    assert!(!inputs.section(cold).is_dead());
}

#[test]
fn test_eligibility_filter() {
    let mut inputs = InputData::new();
    let file = inputs.add_file("a.o", false);
    let exec = shf::ALLOC | shf::EXECINSTR;
    let text = inputs.add_section(file, b".text", sht::PROGBITS, exec, b"x");
    let writable = inputs.add_section(file, b".wtext", sht::PROGBITS, exec | shf::WRITE, b"x");
    let data = inputs.add_section(file, b".data", sht::PROGBITS, shf::ALLOC | shf::WRITE, b"x");
    let bss = inputs.add_section(file, b".bss", sht::NOBITS, exec, b"");
    let init = inputs.add_section(file, b".init", sht::PROGBITS, exec, b"x");
    let fini = inputs.add_section(file, b".fini", sht::PROGBITS, exec, b"x");
    let init_array = inputs.add_section(file, b".init_array", sht::INIT_ARRAY, exec, b"x");
    let non_alloc = inputs.add_section(file, b".comment", sht::PROGBITS, shf::EXECINSTR, b"x");

    assert!(is_eligible(inputs.section(text)));
    for id in [writable, data, bss, init, fini, init_array, non_alloc] {
        assert!(!is_eligible(inputs.section(id)));
    }
}

#[test]
fn test_relocation_order_is_significant() {
    let mut inputs = InputData::new();
    let file = inputs.add_file("a.o", false);
    let data_a = inputs.add_section(
        file,
        b".data.a",
        sht::PROGBITS,
        shf::ALLOC | shf::WRITE,
        b"aaaa",
    );
    let data_b = inputs.add_section(
        file,
        b".data.b",
        sht::PROGBITS,
        shf::ALLOC | shf::WRITE,
        b"bbbb",
    );
    let sym_a = inputs.add_symbol(0, SymbolReferent::Section(data_a));
    let sym_b = inputs.add_symbol(0, SymbolReferent::Section(data_b));

    let body: &[u8] = b"\x90\x90\x90\x90\x90\x90\x90\x90";
    let sec_1 = add_text_section(&mut inputs, file, b".text.1", body);
    let sec_2 = add_text_section(&mut inputs, file, b".text.2", body);
    let sec_3 = add_text_section(&mut inputs, file, b".text.3", body);

    // All three sections carry the same two relocations; the third section's appear in reverse
    // order. Only the ordering may distinguish it.
    let rel_a = reloc_to(sym_a, 0);
    let rel_b = reloc_to(sym_b, 4);
    inputs.add_relocation(sec_1, rel_a);
    inputs.add_relocation(sec_1, rel_b);
    inputs.add_relocation(sec_2, rel_a);
    inputs.add_relocation(sec_2, rel_b);
    inputs.add_relocation(sec_3, rel_b);
    inputs.add_relocation(sec_3, rel_a);

    fold(&mut inputs);

    assert_eq!(leader_of(&inputs, sec_1), Some(sec_1));
    assert_eq!(leader_of(&inputs, sec_2), Some(sec_1));
    assert_eq!(leader_of(&inputs, sec_3), Some(sec_3));
    assert!(!inputs.section(sec_3).is_dead());
}

#[cfg(test)]
fn add_referencing_pair<'data>(
    inputs: &mut InputData<'data>,
    file: FileId,
    bytes_x: &'data [u8],
    bytes_y: &'data [u8],
) -> (SectionId, SectionId) {
    let x = add_text_section(inputs, file, b".text.x", bytes_x);
    let y = add_text_section(inputs, file, b".text.y", bytes_y);
    let sym_x = inputs.add_symbol(0, SymbolReferent::Section(x));
    let sym_y = inputs.add_symbol(0, SymbolReferent::Section(y));
    inputs.add_relocation(x, reloc_to(sym_y, 1));
    inputs.add_relocation(y, reloc_to(sym_x, 1));
    (x, y)
}

#[test]
fn test_folds_mutually_recursive_sections() {
    let mut inputs = InputData::new();
    let file_0 = inputs.add_file("a.o", false);
    let file_1 = inputs.add_file("b.o", false);
    let (x_1, y_1) = add_referencing_pair(&mut inputs, file_0, b"xxxx", b"yyyy");
    let (x_2, y_2) = add_referencing_pair(&mut inputs, file_1, b"xxxx", b"yyyy");

    fold(&mut inputs);

    assert_eq!(leader_of(&inputs, x_1), Some(x_1));
    assert_eq!(leader_of(&inputs, x_2), Some(x_1));
    assert_eq!(leader_of(&inputs, y_1), Some(y_1));
    assert_eq!(leader_of(&inputs, y_2), Some(y_1));
}

#[cfg(test)]
fn add_cycle_of_three<'data>(inputs: &mut InputData<'data>, file: FileId) -> Vec<SectionId> {
    let bodies: [&[u8]; 3] = [b"AAAA", b"BBBB", b"CCCC"];
    let sections: Vec<SectionId> = bodies
        .iter()
        .map(|body| add_text_section(inputs, file, b".text.ring", body))
        .collect();
    for i in 0..3 {
        let successor = inputs.add_symbol(0, SymbolReferent::Section(sections[(i + 1) % 3]));
        inputs.add_relocation(sections[i], reloc_to(successor, 0));
    }
    sections
}

#[test]
fn test_folds_isomorphic_cycles() {
    let mut inputs = InputData::new();
    let file_0 = inputs.add_file("a.o", false);
    let file_1 = inputs.add_file("b.o", false);
    let first = add_cycle_of_three(&mut inputs, file_0);
    let second = add_cycle_of_three(&mut inputs, file_1);

    fold(&mut inputs);

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(leader_of(&inputs, *a), Some(*a));
        assert_eq!(leader_of(&inputs, *b), Some(*a));
    }
}

#[test]
fn test_archive_members_lose_ties() {
    let mut inputs = InputData::new();
    // The archive member is loaded first, but direct objects outrank archive members.
    let archive = inputs.add_file("libx.a(x.o)", true);
    let object = inputs.add_file("main.o", false);
    let from_archive = add_text_section(&mut inputs, archive, b".text.f", b"\xc3");
    let from_object = add_text_section(&mut inputs, object, b".text.f", b"\xc3");

    fold(&mut inputs);

    assert_eq!(leader_of(&inputs, from_archive), Some(from_object));
    assert_eq!(leader_of(&inputs, from_object), Some(from_object));
    assert!(inputs.section(from_archive).is_dead());
}

#[cfg(test)]
fn self_referencing_fde<'data>(
    inputs: &mut InputData<'data>,
    section: SectionId,
    contents: &'data [u8],
) -> FdeRecord<'data> {
    let own_symbol = inputs.add_symbol(0, SymbolReferent::Section(section));
    FdeRecord {
        contents,
        relocations: smallvec![FdeRelocation {
            symbol: own_symbol,
            r_type: 1,
            offset: 8,
            addend: 0,
        }],
    }
}

#[test]
fn test_fde_length_and_cie_offset_are_ignored() {
    let mut inputs = InputData::new();
    let file = inputs.add_file("a.o", false);
    let body: &[u8] = b"\x55\x48\x89\xe5\xc3";

    let sec_a = add_text_section(&mut inputs, file, b".text.a", body);
    let fde = self_referencing_fde(&mut inputs, sec_a, b"\x14\x00\x00\x00\x18\x00\x00\x00TAIL");
    inputs.add_fde(sec_a, fde);

    // Same FDE tail, different record length and CIE offset.
    let sec_b = add_text_section(&mut inputs, file, b".text.b", body);
    let fde = self_referencing_fde(&mut inputs, sec_b, b"\x20\x00\x00\x00\x30\x00\x00\x00TAIL");
    inputs.add_fde(sec_b, fde);

    let sec_c = add_text_section(&mut inputs, file, b".text.c", body);
    let fde = self_referencing_fde(&mut inputs, sec_c, b"\x14\x00\x00\x00\x18\x00\x00\x00LIAT");
    inputs.add_fde(sec_c, fde);

    fold(&mut inputs);

    assert_eq!(leader_of(&inputs, sec_a), Some(sec_a));
    assert_eq!(leader_of(&inputs, sec_b), Some(sec_a));
    assert_eq!(leader_of(&inputs, sec_c), Some(sec_c));
}

#[test]
fn test_extra_fde_relocations_fold_via_propagation() {
    let mut inputs = InputData::new();
    let file = inputs.add_file("a.o", false);
    let personality = inputs.add_section(
        file,
        b".data.personality",
        sht::PROGBITS,
        shf::ALLOC | shf::WRITE,
        b"pppp",
    );
    let body: &[u8] = b"\x55\x48\x89\xe5\xc3";

    let mut add = |inputs: &mut InputData<'static>, name: &'static [u8]| {
        let section = add_text_section(inputs, file, name, body);
        let mut fde = self_referencing_fde(inputs, section, b"\x14\x00\x00\x00\x18\x00\x00\x00TAIL");
        let personality_symbol = inputs.add_symbol(0, SymbolReferent::Section(personality));
        fde.relocations.push(FdeRelocation {
            symbol: personality_symbol,
            r_type: 1,
            offset: 16,
            addend: 0,
        });
        inputs.add_fde(section, fde);
        section
    };

    let sec_a = add(&mut inputs, b".text.a");
    let sec_b = add(&mut inputs, b".text.b");

    fold(&mut inputs);

    // Two FDE relocations disqualify the sections from the leaf fast path, but they still fold
    // once propagation settles.
    assert!(!inputs.section(sec_a).fold.leaf);
    assert_eq!(leader_of(&inputs, sec_a), Some(sec_a));
    assert_eq!(leader_of(&inputs, sec_b), Some(sec_a));
}

#[test]
fn test_fragment_references_compare_by_content() {
    let mut inputs = InputData::new();
    let file = inputs.add_file("a.o", false);
    let hello = inputs.add_fragment(b"hello\x00");
    let hello_again = inputs.add_fragment(b"hello\x00");
    let world = inputs.add_fragment(b"world\x00");
    assert_eq!(hello, hello_again);

    let body: &[u8] = b"\x48\x8d\x3d\x00\x00\x00\x00";
    let mut add = |inputs: &mut InputData<'static>, name: &'static [u8], fragment| {
        let section = add_text_section(inputs, file, name, body);
        inputs.add_relocation(
            section,
            Relocation {
                offset: 3,
                r_type: 2,
                addend: -4,
                target: RelocationTarget::Fragment {
                    fragment,
                    addend: 0,
                },
            },
        );
        section
    };
    let sec_a = add(&mut inputs, b".text.a", hello);
    let sec_b = add(&mut inputs, b".text.b", hello);
    let sec_c = add(&mut inputs, b".text.c", world);

    fold(&mut inputs);

    assert_eq!(leader_of(&inputs, sec_a), Some(sec_a));
    assert_eq!(leader_of(&inputs, sec_b), Some(sec_a));
    assert_eq!(leader_of(&inputs, sec_c), Some(sec_c));
}

#[test]
fn test_report_counts_folded_members_only() {
    const BIG: [u8; 128] = [0x90; 128];
    const SMALL: [u8; 64] = [0xcc; 64];

    let mut inputs = InputData::new();
    let file_0 = inputs.add_file("a.o", false);
    let file_1 = inputs.add_file("b.o", false);
    add_text_section(&mut inputs, file_0, b".text.big", &BIG);
    add_text_section(&mut inputs, file_0, b".text.small", &SMALL);
    add_text_section(&mut inputs, file_1, b".text.big", &BIG);
    add_text_section(&mut inputs, file_1, b".text.big2", &BIG);
    add_text_section(&mut inputs, file_1, b".text.small", &SMALL);

    fold(&mut inputs);

    let mut out = Vec::new();
    write_report(&inputs, &mut out).unwrap();
    let report = String::from_utf8(out).unwrap();

    assert_eq!(
        report,
        "selected section a.o:(.text.big)\n\
         \x20 removing identical section b.o:(.text.big)\n\
         \x20 removing identical section b.o:(.text.big2)\n\
         selected section a.o:(.text.small)\n\
         \x20 removing identical section b.o:(.text.small)\n\
         ICF saved 320 bytes\n"
    );
}

#[test]
fn test_second_run_folds_nothing_new() {
    let mut inputs = InputData::new();
    let file_0 = inputs.add_file("a.o", false);
    let file_1 = inputs.add_file("b.o", false);
    add_referencing_pair(&mut inputs, file_0, b"xxxx", b"yyyy");
    add_referencing_pair(&mut inputs, file_1, b"xxxx", b"yyyy");
    add_text_section(&mut inputs, file_0, b".text.leaf", b"\xc3");
    add_text_section(&mut inputs, file_1, b".text.leaf", b"\xc3");

    fold(&mut inputs);

    let snapshot =
        |inputs: &InputData| -> (Vec<bool>, Vec<SymbolReferent>) {
            let dead = (0..inputs.num_sections())
                .map(|i| inputs.section(SectionId::from_usize(i)).is_dead())
                .collect();
            let referents = (0..inputs.num_symbols())
                .map(|i| inputs.symbol(SymbolId::from_usize(i)).referent)
                .collect();
            (dead, referents)
        };
    let before = snapshot(&inputs);

    fold(&mut inputs);

    assert_eq!(snapshot(&inputs), before);
    for i in 0..inputs.num_sections() {
        let section = inputs.section(SectionId::from_usize(i));
        if !section.is_dead()
            && let Some(leader) = section.leader()
        {
            assert_eq!(leader, SectionId::from_usize(i));
        }
    }
}

#[cfg(test)]
fn build_varied_graph() -> InputData<'static> {
    const BODIES: [&[u8]; 4] = [
        b"\x90\x90\x90\x90",
        b"\x31\xc0\xc3\x90",
        b"\x55\x48\x89\xe5",
        b"\xcc\xcc\xcc\xcc",
    ];

    let mut inputs = InputData::new();
    let mut all = Vec::new();

    for f in 0..4 {
        let file = inputs.add_file(format!("f{f}.o"), f % 2 == 1);
        for s in 0..5 {
            all.push(add_text_section(
                &mut inputs,
                file,
                b".text.g",
                BODIES[(f + s) % 4],
            ));
        }
        inputs.add_section(
            file,
            b".data",
            sht::PROGBITS,
            shf::ALLOC | shf::WRITE,
            b"dddd",
        );
    }

    for (i, &id) in all.iter().enumerate() {
        if i % 3 == 0 {
            let target = all[(i * 7 + 3) % all.len()];
            let symbol = inputs.add_symbol(0, SymbolReferent::Section(target));
            inputs.add_relocation(id, reloc_to(symbol, 0));
        }
    }

    inputs
}

#[test]
fn test_folding_is_deterministic_across_worker_counts() {
    let run = |threads: usize| {
        let mut inputs = build_varied_graph();
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
            .install(|| fold(&mut inputs));
        (0..inputs.num_sections())
            .map(|i| {
                let section = inputs.section(SectionId::from_usize(i));
                (section.leader(), section.is_dead())
            })
            .collect::<Vec<_>>()
    };

    let single = run(1);
    assert_eq!(run(8), single);
    assert_eq!(run(3), single);
}

#[test]
fn test_propagation_refines_monotonically_and_converges() {
    let mut inputs = InputData::new();
    let file_0 = inputs.add_file("a.o", false);
    let file_1 = inputs.add_file("b.o", false);
    add_cycle_of_three(&mut inputs, file_0);
    add_cycle_of_three(&mut inputs, file_1);

    classify_sections(&mut inputs);
    dedupe_leaf_sections(&inputs).unwrap();
    let order = gather_sections(&inputs);
    let (edges, edge_indices) = gather_edges(&inputs, &order);

    let initial = compute_digests(&inputs, &order);
    let mut digests = [initial.clone(), vec![Digest::default(); initial.len()]];

    let mut slot = 0;
    let mut previous = 0;
    for _ in 0..12 {
        propagate(&mut digests, slot, &edges, &edge_indices);
        slot ^= 1;
        let count = count_equivalence_classes(&digests[slot]);
        assert!(count >= previous);
        previous = count;
    }
    assert_eq!(previous, 3);

    let mut digests = [initial.clone(), vec![Digest::default(); initial.len()]];
    let (_, rounds) = propagate_to_convergence(&mut digests, &edges, &edge_indices);
    let bound = CLASS_COUNT_INTERVAL * (usize::BITS - order.len().leading_zeros()) as usize
        + CLASS_COUNT_INTERVAL;
    assert!(rounds >= 2);
    assert!(rounds <= bound, "{rounds} rounds for {} sections", order.len());
}

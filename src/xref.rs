//! Cross-reference cache (§4.5): reads every xref table/stream in a file,
//! newest revision first, and keeps the full per-object history rather
//! than collapsing it down to one current view.
//!
//! Sections are numbered in the order they're read — section 0 is the
//! newest (the one `startxref` points at directly), increasing towards
//! the oldest via `/Prev`. A "revision" is the opposite numbering,
//! oldest = 0, to match how a person would talk about a document's
//! history; `total_revisions() - 1 - revision` converts one to the other.

use std::collections::HashMap;

use crate::error::{CoreError, Result, XrefError};
use crate::model::ObjectId as Ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free,
    Normal { offset: u64, generation: u16 },
    Compressed { container: u32, index_within: u16 },
}

impl XrefEntry {
    pub fn is_normal(&self) -> bool {
        matches!(self, XrefEntry::Normal { .. })
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, XrefEntry::Compressed { .. })
    }

    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free)
    }
}

#[derive(Debug, Clone, Copy)]
enum TimelineEvent {
    InUse(u16),
    /// A free entry's stored generation field names what the *next* use
    /// of this id should carry, per the PDF free-list convention.
    Freed { freed_generation: u16, declared_next_generation: u16 },
}

#[derive(Debug, Default)]
struct Section {
    explicit_refs: Vec<Ref>,
    freed_refs: Vec<Ref>,
    object_streams_used: Vec<u32>,
    startxref: u64,
    is_stream: bool,
}

/// Summary of the xref section in effect for a revision: whether it was
/// written as a classic table or an xref stream, where it starts, and how
/// many entries it carries. Returned by [`XrefCache::get_xref_container_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrefContainerInfo {
    pub is_stream: bool,
    pub startxref: u64,
    pub explicit_ref_count: usize,
    pub freed_ref_count: usize,
}

/// Accumulates xref sections as they're read (newest first) and answers
/// revision-scoped queries once reading is complete.
#[derive(Debug, Default)]
pub struct XrefCache {
    sections: Vec<Section>,
    ref_history: HashMap<Ref, Vec<(usize, XrefEntry)>>,
    id_timeline: HashMap<u32, Vec<(usize, TimelineEvent)>>,
    current_section: Option<Section>,
}

impl XrefCache {
    pub fn new() -> Self {
        XrefCache::default()
    }

    /// Starts a new section; returns its section index (read order, 0 for
    /// the newest section read so far). Must be finished with
    /// [`Self::finish_section`] before the next one begins.
    pub fn begin_section(&mut self) -> usize {
        debug_assert!(self.current_section.is_none(), "begin_section called before finish_section");
        self.current_section = Some(Section::default());
        self.sections.len()
    }

    pub fn finish_section(&mut self, startxref: u64) {
        let mut section = self.current_section.take().expect("finish_section called without begin_section");
        section.startxref = startxref;
        self.sections.push(section);
    }

    /// Marks the currently-open section as having been read from an xref
    /// stream rather than a classic table. A hybrid-reference file's
    /// `/XRefStm` side stream is folded into the classic table's own
    /// section (see `reader::read_classic_table`), so this only gets
    /// called when the section's primary source is itself a stream.
    pub fn mark_current_as_stream(&mut self) {
        self.current_mut().is_stream = true;
    }

    fn section_index(&self) -> usize {
        self.sections.len()
    }

    fn current_mut(&mut self) -> &mut Section {
        self.current_section.as_mut().expect("xref entry recorded outside a section")
    }

    /// §4.5 `put_ref`: record an in-use entry.
    pub fn put_ref(&mut self, id: u32, generation: u16, entry: XrefEntry) {
        let section_index = self.section_index();
        self.current_mut().explicit_refs.push((id, generation));
        if let XrefEntry::Compressed { container, .. } = entry {
            self.current_mut().object_streams_used.push(container);
        }
        self.ref_history.entry((id, generation)).or_default().push((section_index, entry));
        self.id_timeline
            .entry(id)
            .or_default()
            .push((section_index, TimelineEvent::InUse(generation)));
    }

    /// §4.5 `free_ref`: `next_generation` is the literal value stored in
    /// the free entry (the generation the id should carry the *next* time
    /// it's used), so the freed generation itself is `next_generation - 1`
    /// (or `65535` on wraparound from 0, per §9's ambiguous-source note).
    pub fn free_ref(&mut self, id: u32, next_generation: u16) {
        let section_index = self.section_index();
        let freed_generation = if next_generation == 0 { 65535 } else { next_generation - 1 };
        self.current_mut().freed_refs.push((id, freed_generation));
        self.ref_history
            .entry((id, freed_generation))
            .or_default()
            .push((section_index, XrefEntry::Free));
        self.id_timeline.entry(id).or_default().push((
            section_index,
            TimelineEvent::Freed {
                freed_generation,
                declared_next_generation: next_generation,
            },
        ));
    }

    /// Runs the consistency pass over every id's full history and fixes
    /// the section count. Call once after the `/Prev` chain is fully
    /// walked; no further sections may be added afterwards.
    pub fn finalize(&mut self) -> Result<()> {
        for (&id, events) in self.id_timeline.iter() {
            // Events were appended newest-first (ascending section index);
            // walk them oldest-to-newest to check the timeline forwards.
            let mut chronological: Vec<_> = events.clone();
            chronological.sort_by(|a, b| b.0.cmp(&a.0));

            let mut last_in_use_generation: Option<u16> = None;
            let mut pending_free: Option<(u16, u16)> = None; // (freed_generation, declared_next_generation)
            let mut ever_freed: Vec<u16> = Vec::new();

            for (_, event) in chronological {
                match event {
                    TimelineEvent::Freed {
                        freed_generation,
                        declared_next_generation,
                    } => {
                        if let Some(lg) = last_in_use_generation {
                            if lg != freed_generation {
                                return Err(CoreError::Read(
                                    XrefError::FreeGenerationMismatch {
                                        id,
                                        next_generation: declared_next_generation as u32,
                                        expected_generation: lg as u32,
                                    }
                                    .into(),
                                ));
                            }
                        }
                        ever_freed.push(freed_generation);
                        pending_free = Some((freed_generation, declared_next_generation));
                    }
                    TimelineEvent::InUse(generation) => {
                        if let Some((freed_generation, declared_next_generation)) = pending_free.take() {
                            if generation != declared_next_generation {
                                return Err(CoreError::Read(
                                    XrefError::FreeGenerationMismatch {
                                        id,
                                        next_generation: declared_next_generation as u32,
                                        expected_generation: generation as u32,
                                    }
                                    .into(),
                                ));
                            }
                            let _ = freed_generation;
                        } else if let Some(lg) = last_in_use_generation {
                            if generation != lg {
                                return Err(CoreError::Read(XrefError::OrphanedGeneration { id, generation: lg as u32 }.into()));
                            }
                        }
                        if ever_freed.iter().any(|&g| generation <= g) && pending_free.is_none() {
                            if last_in_use_generation != Some(generation) {
                                return Err(CoreError::Read(
                                    XrefError::SneakyReuse {
                                        id,
                                        freed_generation: *ever_freed.last().unwrap() as u32,
                                        conflicting_generation: generation as u32,
                                    }
                                    .into(),
                                ));
                            }
                        }
                        last_in_use_generation = Some(generation);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn total_revisions(&self) -> usize {
        self.sections.len()
    }

    fn revision_to_index(&self, revision: usize) -> usize {
        self.total_revisions() - 1 - revision
    }

    pub fn explicit_refs_in_revision(&self, revision: usize) -> &[Ref] {
        &self.sections[self.revision_to_index(revision)].explicit_refs
    }

    pub fn refs_freed_in_revision(&self, revision: usize) -> &[Ref] {
        &self.sections[self.revision_to_index(revision)].freed_refs
    }

    pub fn object_streams_used_in(&self, revision: usize) -> &[u32] {
        &self.sections[self.revision_to_index(revision)].object_streams_used
    }

    pub fn get_startxref_for_revision(&self, revision: usize) -> u64 {
        self.sections[self.revision_to_index(revision)].startxref
    }

    /// §4.5 `get_xref_container_info`: a summary of the section in effect
    /// for `revision` — whether it's a classic table or an xref stream,
    /// its `startxref` offset, and how many entries it carries.
    pub fn get_xref_container_info(&self, revision: usize) -> XrefContainerInfo {
        let section = &self.sections[self.revision_to_index(revision)];
        XrefContainerInfo {
            is_stream: section.is_stream,
            startxref: section.startxref,
            explicit_ref_count: section.explicit_refs.len(),
            freed_ref_count: section.freed_refs.len(),
        }
    }

    /// §4.5 `get_historical_ref`: the marker in effect for `ref_id` as of
    /// `revision`, or an error if this ref has no recorded history at or
    /// before that revision.
    pub fn get_historical_ref(&self, reference: Ref, revision: usize) -> Result<XrefEntry> {
        let threshold = self.revision_to_index(revision);
        let history = self
            .ref_history
            .get(&reference)
            .ok_or(CoreError::Read(XrefError::NoHistoryAtRevision(reference.0, reference.1).into()))?;
        history
            .iter()
            .find(|(section_index, _)| *section_index >= threshold)
            .map(|(_, entry)| *entry)
            .ok_or(CoreError::Read(XrefError::NoHistoryAtRevision(reference.0, reference.1).into()))
    }

    /// §4.5 `get_introducing_revision`: the revision this ref first
    /// appeared in (its oldest recorded history entry).
    pub fn get_introducing_revision(&self, reference: Ref) -> Option<usize> {
        let history = self.ref_history.get(&reference)?;
        let oldest_section_index = history.iter().map(|(index, _)| *index).max()?;
        Some(self.total_revisions() - 1 - oldest_section_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_written_in_two_revisions_is_absent_from_the_one_between() {
        let mut cache = XrefCache::new();

        // Read order is newest-first: revision 2 (newest), then 1, then 0.
        cache.begin_section();
        cache.put_ref(5, 0, XrefEntry::Normal { offset: 900, generation: 0 });
        cache.finish_section(900);

        cache.begin_section();
        cache.put_ref(8, 0, XrefEntry::Normal { offset: 500, generation: 0 });
        cache.finish_section(500);

        cache.begin_section();
        cache.put_ref(5, 0, XrefEntry::Normal { offset: 100, generation: 0 });
        cache.finish_section(100);

        cache.finalize().unwrap();

        assert_eq!(cache.total_revisions(), 3);
        assert!(cache.explicit_refs_in_revision(2).contains(&(5, 0)));
        assert!(!cache.explicit_refs_in_revision(1).contains(&(5, 0)));

        let marker_at_1 = cache.get_historical_ref((5, 0), 1).unwrap();
        assert_eq!(marker_at_1, XrefEntry::Normal { offset: 100, generation: 0 });
    }

    #[test]
    fn freed_object_reused_at_a_higher_generation_parses() {
        let mut cache = XrefCache::new();

        // Oldest first for this test's narrative, pushed newest-first as
        // the cache expects: the reuse at generation 1 is the newer
        // section, read before the older free entry.
        cache.begin_section();
        cache.put_ref(7, 1, XrefEntry::Normal { offset: 200, generation: 1 });
        cache.finish_section(200);

        cache.begin_section();
        cache.free_ref(7, 1); // declares: next use of id 7 will be generation 1
        cache.finish_section(50);

        assert!(cache.finalize().is_ok());
    }

    #[test]
    fn reuse_at_a_mismatched_generation_is_rejected() {
        let mut cache = XrefCache::new();

        cache.begin_section();
        cache.put_ref(7, 2, XrefEntry::Normal { offset: 200, generation: 2 });
        cache.finish_section(200);

        cache.begin_section();
        cache.free_ref(7, 1); // declares next use should be generation 1, but it was 2
        cache.finish_section(50);

        assert!(cache.finalize().is_err());
    }

    #[test]
    fn container_info_reports_stream_vs_table_and_entry_counts() {
        let mut cache = XrefCache::new();

        cache.begin_section();
        cache.put_ref(1, 0, XrefEntry::Normal { offset: 10, generation: 0 });
        cache.free_ref(2, 1);
        cache.finish_section(900); // revision 1 (newest): classic table

        cache.begin_section();
        cache.mark_current_as_stream();
        cache.put_ref(3, 0, XrefEntry::Normal { offset: 20, generation: 0 });
        cache.finish_section(100); // revision 0 (oldest): xref stream

        cache.finalize().unwrap();

        let newest = cache.get_xref_container_info(1);
        assert!(!newest.is_stream);
        assert_eq!(newest.startxref, 900);
        assert_eq!(newest.explicit_ref_count, 1);
        assert_eq!(newest.freed_ref_count, 1);

        let oldest = cache.get_xref_container_info(0);
        assert!(oldest.is_stream);
        assert_eq!(oldest.startxref, 100);
    }

    #[test]
    fn object_stream_members_are_tracked_per_revision() {
        let mut cache = XrefCache::new();
        cache.begin_section();
        cache.put_ref(10, 0, XrefEntry::Compressed { container: 3, index_within: 2 });
        cache.finish_section(1000);
        cache.finalize().unwrap();

        assert_eq!(cache.object_streams_used_in(0), &[3]);
    }
}

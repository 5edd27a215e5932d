//! Historical document view (§4.6): answers "what did this reference
//! resolve to, and what did the trailer look like, as of revision N"
//! without mutating the cross-reference cache itself.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::error::{CoreError, ReadError, Result};
use crate::model::{Dictionary, Object, ObjectId};
use crate::xref::{XrefCache, XrefEntry};

/// Fetches the actual bytes/object for a reference once its xref marker is
/// known. Parsing PDF object syntax itself is outside this core; a reader
/// wires this up to whatever already-parsed object table it holds.
pub trait ObjectSource {
    fn fetch_at(&self, id: ObjectId, entry: XrefEntry) -> Result<Object>;
}

/// An explicit cons-list for root-to-reference paths (§9 redesign note):
/// cheap to share a prefix across many branches of the dependency walk,
/// unlike a `Vec<ObjectId>` that would need cloning at every fork.
#[derive(Debug, Clone)]
pub enum Path {
    Empty,
    Cons(ObjectId, Rc<Path>),
}

impl Path {
    pub fn empty() -> Rc<Path> {
        Rc::new(Path::Empty)
    }

    pub fn cons(id: ObjectId, tail: Rc<Path>) -> Rc<Path> {
        Rc::new(Path::Cons(id, tail))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        match self {
            Path::Empty => false,
            Path::Cons(head, tail) => *head == id || tail.contains(id),
        }
    }

    pub fn to_vec(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut node = self;
        loop {
            match node {
                Path::Empty => break,
                Path::Cons(head, tail) => {
                    out.push(*head);
                    node = tail;
                }
            }
        }
        out.reverse();
        out
    }
}

/// A read-only view of a document as it stood after a particular
/// incremental update, per §4.6.
pub struct HistoricalResolver<'a> {
    cache: &'a XrefCache,
    source: &'a dyn ObjectSource,
    trailers: &'a [Dictionary],
    revision: usize,
}

impl<'a> HistoricalResolver<'a> {
    /// `trailers` is indexed in the same read order as the xref cache's
    /// sections (0 = newest); its length must equal `cache.total_revisions()`.
    pub fn new(cache: &'a XrefCache, source: &'a dyn ObjectSource, trailers: &'a [Dictionary], revision: usize) -> Self {
        HistoricalResolver { cache, source, trailers, revision }
    }

    pub fn revision(&self) -> usize {
        self.revision
    }

    /// §4.6 `get_object`: resolves a reference against this revision's
    /// xref history, not the document's current (newest) state.
    pub fn get_object(&self, id: ObjectId) -> Result<Object> {
        let entry = self.cache.get_historical_ref(id, self.revision)?;
        if entry.is_free() {
            return Err(CoreError::Read(ReadError::Freed));
        }
        self.source.fetch_at(id, entry)
    }

    pub fn is_ref_available(&self, id: ObjectId) -> bool {
        matches!(self.cache.get_historical_ref(id, self.revision), Ok(entry) if !entry.is_free())
    }

    /// §4.6 `trailer_view`: merges every trailer from the oldest revision
    /// up through this one, newer entries overriding older, mirroring how
    /// an incrementally-updated trailer layers on top of its `/Prev` chain.
    pub fn trailer_view(&self) -> Dictionary {
        let total = self.cache.total_revisions();
        let threshold = total - 1 - self.revision;
        let mut merged = Dictionary::new();
        for section_index in (threshold..total).rev() {
            if let Some(trailer) = self.trailers.get(section_index) {
                merged.extend(trailer);
            }
        }
        merged
    }

    /// §4.6 `collect_dependencies`: every reference reachable from `id`,
    /// not following `/Parent` (the page tree's back-edge, which would
    /// otherwise turn a DAG walk into an infinite one).
    pub fn collect_dependencies(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        let object = self.get_object(id)?;
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        collect_refs_in(&object, &mut out, &mut seen);
        Ok(out)
    }

    /// §4.6 `_load_reverse_xref_cache`: a breadth-first walk from `roots`
    /// recording one cons-list path to every reachable reference. Shared
    /// substructure (the same object linked from several parents) keeps
    /// whichever path reaches it first; later paths to an already-visited
    /// object are dropped rather than recorded.
    pub fn compute_paths_to_refs(&self, roots: &[ObjectId]) -> Result<HashMap<ObjectId, Rc<Path>>> {
        let mut paths: HashMap<ObjectId, Rc<Path>> = HashMap::new();
        let mut queue: VecDeque<(ObjectId, Rc<Path>)> = VecDeque::new();

        for &root in roots {
            if paths.contains_key(&root) {
                continue;
            }
            let path = Path::cons(root, Path::empty());
            paths.insert(root, path.clone());
            queue.push_back((root, path));
        }

        while let Some((id, path)) = queue.pop_front() {
            if !self.is_ref_available(id) {
                continue;
            }
            for dependency in self.collect_dependencies(id)? {
                if paths.contains_key(&dependency) || path.contains(dependency) {
                    continue;
                }
                let dependency_path = Path::cons(dependency, path.clone());
                paths.insert(dependency, dependency_path.clone());
                queue.push_back((dependency, dependency_path));
            }
        }

        Ok(paths)
    }
}

fn collect_refs_in(object: &Object, out: &mut Vec<ObjectId>, seen: &mut HashSet<ObjectId>) {
    match object {
        Object::Reference(id) => {
            if seen.insert(*id) {
                out.push(*id);
            }
        }
        Object::Array(items) => {
            for item in items {
                collect_refs_in(item, out, seen);
            }
        }
        Object::Dictionary(dict) => collect_refs_in_dict(dict, out, seen),
        Object::Stream(stream) => collect_refs_in_dict(&stream.dict, out, seen),
        _ => {}
    }
}

fn collect_refs_in_dict(dict: &Dictionary, out: &mut Vec<ObjectId>, seen: &mut HashSet<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() == b"Parent" {
            continue;
        }
        collect_refs_in(value, out, seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    struct FakeSource {
        objects: HashMap<ObjectId, Object>,
    }

    impl ObjectSource for FakeSource {
        fn fetch_at(&self, id: ObjectId, _entry: XrefEntry) -> Result<Object> {
            self.objects.get(&id).cloned().ok_or(CoreError::Read(ReadError::ObjectNotFound(id)))
        }
    }

    fn build_cache() -> XrefCache {
        let mut cache = XrefCache::new();
        cache.begin_section();
        cache.put_ref(1, 0, XrefEntry::Normal { offset: 10, generation: 0 }); // root
        cache.put_ref(2, 0, XrefEntry::Normal { offset: 20, generation: 0 }); // page, parent = 1
        cache.put_ref(3, 0, XrefEntry::Normal { offset: 30, generation: 0 }); // content, referenced by page
        cache.finish_section(1000);
        cache.finalize().unwrap();
        cache
    }

    #[test]
    fn dependencies_skip_parent_back_edges() {
        let cache = build_cache();
        let mut objects = HashMap::new();
        objects.insert(
            (1, 0),
            Object::Dictionary(dictionary! { "Type" => "Catalog", "Kids" => (2u32, 0u16) }),
        );
        objects.insert(
            (2, 0),
            Object::Dictionary(dictionary! { "Type" => "Page", "Parent" => (1u32, 0u16), "Contents" => (3u32, 0u16) }),
        );
        objects.insert((3, 0), Object::Dictionary(dictionary! { "Length" => 0 }));
        let source = FakeSource { objects };
        let trailers = vec![dictionary! { "Root" => (1u32, 0u16) }];

        let resolver = HistoricalResolver::new(&cache, &source, &trailers, 0);
        let deps = resolver.collect_dependencies((2, 0)).unwrap();
        assert_eq!(deps, vec![(3, 0)]);
    }

    #[test]
    fn path_computation_reaches_every_object_once() {
        let cache = build_cache();
        let mut objects = HashMap::new();
        objects.insert((1, 0), Object::Dictionary(dictionary! { "Kids" => (2u32, 0u16) }));
        objects.insert(
            (2, 0),
            Object::Dictionary(dictionary! { "Parent" => (1u32, 0u16), "Contents" => (3u32, 0u16) }),
        );
        objects.insert((3, 0), Object::Dictionary(Dictionary::new()));
        let source = FakeSource { objects };
        let trailers = vec![dictionary! { "Root" => (1u32, 0u16) }];

        let resolver = HistoricalResolver::new(&cache, &source, &trailers, 0);
        let paths = resolver.compute_paths_to_refs(&[(1, 0)]).unwrap();

        assert!(paths.contains_key(&(2, 0)));
        assert!(paths.contains_key(&(3, 0)));
        assert_eq!(paths[&(3, 0)].to_vec(), vec![(1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn trailer_view_merges_older_revisions() {
        let mut cache = XrefCache::new();
        cache.begin_section();
        cache.put_ref(1, 0, XrefEntry::Normal { offset: 10, generation: 0 });
        cache.finish_section(900);
        cache.begin_section();
        cache.put_ref(2, 0, XrefEntry::Normal { offset: 20, generation: 0 });
        cache.finish_section(100);
        cache.finalize().unwrap();

        // Newest trailer (index 0) omits /Info; oldest (index 1) has it.
        let trailers = vec![dictionary! { "Root" => (1u32, 0u16) }, dictionary! { "Root" => (1u32, 0u16), "Info" => (9u32, 0u16) }];
        let objects = HashMap::new();
        let source = FakeSource { objects };

        let resolver = HistoricalResolver::new(&cache, &source, &trailers, 1);
        let trailer = resolver.trailer_view();
        assert!(trailer.has(b"Info"));
    }
}

//! The `$ref` registry: every document touched by one resolution, keyed by
//! canonical id.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::RefError;
use crate::normalize::resolve_reference;
use crate::pointer::{step, JsonPointer};
use crate::types::{
    is_pure_ref, ref_string, CanonicalId, ContentKind, Location, RefPointer, SourceKind,
};

/// A resolved document.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: CanonicalId,
    pub kind: SourceKind,
    pub content: ContentKind,
    pub value: Value,
    /// The bytes the value was parsed from; `None` for supplied values.
    pub raw: Option<Vec<u8>>,
}

impl RegistryEntry {
    pub fn new(id: CanonicalId, content: ContentKind, value: Value) -> Self {
        Self {
            kind: id.kind(),
            id,
            content,
            value,
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Deduplicated collection of resolved documents.
///
/// An id is in exactly one state: pending (reserved, load in flight),
/// resolved, or failed.
#[derive(Debug)]
pub struct Registry {
    root: CanonicalId,
    entries: BTreeMap<CanonicalId, RegistryEntry>,
    pending: BTreeSet<CanonicalId>,
    failed: BTreeMap<CanonicalId, RefError>,
    /// Failures that have no document of their own (invalid `$ref` strings).
    errors: Vec<RefError>,
}

impl Registry {
    pub fn new(root: CanonicalId) -> Self {
        Self {
            root,
            entries: BTreeMap::new(),
            pending: BTreeSet::new(),
            failed: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Id of the root document.
    pub fn root(&self) -> &CanonicalId {
        &self.root
    }

    /// The root document's entry, once it has been set.
    pub fn root_entry(&self) -> Option<&RegistryEntry> {
        self.entries.get(&self.root)
    }

    pub fn get(&self, id: &CanonicalId) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// True if `id` is known in any state.
    pub fn contains(&self, id: &CanonicalId) -> bool {
        self.entries.contains_key(id) || self.pending.contains(id) || self.failed.contains_key(id)
    }

    pub fn is_pending(&self, id: &CanonicalId) -> bool {
        self.pending.contains(id)
    }

    /// Claim `id` for loading.
    ///
    /// Returns `false` if the id is already pending, resolved or failed, so
    /// a document is only ever fetched once.
    pub fn reserve(&mut self, id: &CanonicalId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.pending.insert(id.clone())
    }

    /// Store a resolved document.
    ///
    /// Idempotent: if the id is already resolved the existing entry is kept
    /// and returned.
    pub fn set(&mut self, entry: RegistryEntry) -> &RegistryEntry {
        self.pending.remove(&entry.id);
        self.failed.remove(&entry.id);
        self.entries.entry(entry.id.clone()).or_insert(entry)
    }

    /// Record that loading `id` failed.
    pub fn fail(&mut self, id: CanonicalId, error: RefError) {
        self.pending.remove(&id);
        if !self.entries.contains_key(&id) {
            self.failed.insert(id, error);
        }
    }

    /// Record a failure that is not tied to a loadable document.
    pub fn record_error(&mut self, error: RefError) {
        self.errors.push(error);
    }

    /// Why `id` failed to load, if it did.
    pub fn failure(&self, id: &CanonicalId) -> Option<&RefError> {
        self.failed.get(id)
    }

    /// Every recorded failure: failed documents first (by id), then
    /// invalid references in discovery order.
    pub fn errors(&self) -> impl Iterator<Item = &RefError> {
        self.failed.values().chain(self.errors.iter())
    }

    /// Resolved ids: the root first, then the rest in sorted order.
    ///
    /// An empty `filter` matches every kind.
    pub fn paths(&self, filter: &[SourceKind]) -> Vec<CanonicalId> {
        self.entries_in_order()
            .filter(|entry| filter.is_empty() || filter.contains(&entry.kind))
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Resolved values by id.
    pub fn values(&self) -> BTreeMap<CanonicalId, &Value> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), &entry.value))
            .collect()
    }

    /// Resolved entries: the root first, then the rest in sorted order.
    pub fn entries_in_order(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.root_entry().into_iter().chain(
            self.entries
                .iter()
                .filter(|(id, _)| **id != self.root)
                .map(|(_, entry)| entry),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Traverse `pointer` inside document `id`.
    ///
    /// `$ref` nodes met part-way are followed (possibly into other
    /// documents) before taking the next step.
    ///
    /// # Errors
    ///
    /// `PointerResolution` when a token does not exist or steps through a
    /// scalar; `UnresolvedReference` when a document on the way is not in
    /// the registry; `CircularReference` when `$ref`s loop without reaching
    /// a value.
    pub fn resolve_pointer(
        &self,
        id: &CanonicalId,
        pointer: &JsonPointer,
    ) -> Result<Located<'_>, RefError> {
        self.walk(id, pointer, &mut Vec::new())
    }

    /// Resolve a parsed `$ref` to the concrete value it stands for.
    ///
    /// Like [`Registry::resolve_pointer`], then keeps following while the
    /// value found is itself a pure `$ref` (no sibling keys).
    pub fn locate(&self, target: &RefPointer) -> Result<Located<'_>, RefError> {
        let mut trail = Vec::new();
        let found = self.walk(&target.target, &target.fragment, &mut trail)?;
        self.follow(found, &mut trail, is_pure_ref)
    }

    fn walk(
        &self,
        id: &CanonicalId,
        pointer: &JsonPointer,
        trail: &mut Vec<Location>,
    ) -> Result<Located<'_>, RefError> {
        let entry = self.document(id, pointer)?;
        let mut current = Located {
            location: Location::root(id.clone()),
            value: &entry.value,
        };

        for token in pointer.tokens() {
            current = self.follow(current, trail, |value| {
                ref_string(value).is_some() && value.get(token.as_str()).is_none()
            })?;
            let value = step(current.value, token).map_err(|message| {
                RefError::PointerResolution {
                    id: id.clone(),
                    pointer: pointer.to_string(),
                    message,
                }
            })?;
            current = Located {
                location: current.location.child(token.as_str()),
                value,
            };
        }
        Ok(current)
    }

    /// Follow `$ref`s from `current` for as long as `should_follow` holds.
    fn follow<'r>(
        &'r self,
        mut current: Located<'r>,
        trail: &mut Vec<Location>,
        should_follow: impl Fn(&Value) -> bool,
    ) -> Result<Located<'r>, RefError> {
        let start = trail.len();
        while should_follow(current.value) {
            let Some(reference) = ref_string(current.value) else {
                break;
            };
            if trail.contains(&current.location) {
                return Err(RefError::CircularReference {
                    reference: reference.to_string(),
                    id: current.location.id.clone(),
                    path: current.location.pointer.to_string(),
                });
            }
            trail.push(current.location.clone());

            let target = resolve_reference(reference, &current.location.id)
                .map_err(|e| e.at(&current.location.pointer))?;
            tracing::trace!(from = %current.location, to = reference, "following $ref");
            current = self.walk(&target.target, &target.fragment, trail)?;
        }
        trail.truncate(start);
        Ok(current)
    }

    fn document(
        &self,
        id: &CanonicalId,
        pointer: &JsonPointer,
    ) -> Result<&RegistryEntry, RefError> {
        self.entries
            .get(id)
            .ok_or_else(|| RefError::UnresolvedReference {
                reference: format!("{}{}", id, pointer.to_fragment()),
                id: id.clone(),
                path: String::new(),
            })
    }
}

/// A value found by pointer traversal, with the concrete location it was
/// found at after any `$ref`s along the way were followed.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    pub location: Location,
    pub value: &'a Value,
}

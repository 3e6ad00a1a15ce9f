//! The unit store (spec §4.D + §4.I): the canonical `name → unit` registry,
//! per-type lists, merge/alias resolution, and the four deduplicated work
//! queues.
//!
//! No direct teacher file — the teacher's unit storage was a bare
//! `HashMap<UnitId, Unit>` inside `RuntimeInfo`. Grounded on that map's usage
//! patterns plus the four-queue design spec §4.I names, each queue a
//! `VecDeque<UnitId>` with the per-unit membership bitset (`QueueFlags`)
//! mirroring the `in_*_queue` flags spec's Data Model names.

use std::collections::{HashMap, VecDeque};

use log::{info, trace, warn};

use crate::relation::Graph;
use crate::units::{LoadState, Unit, UnitId, UnitType};

/// The manager's canonical registry (spec §4.D) plus the dependency graph
/// and the four work queues (spec §4.I). This is the single owner of every
/// `Unit`; nothing else in the crate holds one.
pub struct UnitStore {
    /// `name → canonical UnitId`. Every alias of a unit maps here to the
    /// same `UnitId` (the unit's primary id), so `names.len() >= 1` entries
    /// point at one `units` entry (spec I4).
    names: HashMap<String, UnitId>,
    units: HashMap<UnitId, Unit>,
    pub graph: Graph,

    load_queue: VecDeque<UnitId>,
    gc_queue: VecDeque<UnitId>,
    cleanup_queue: VecDeque<UnitId>,
    dbus_queue: VecDeque<UnitId>,

    /// Cached directory listings of each unit-search-path entry (spec §4.D
    /// "caches the directory listing ... so misses are cheap").
    dir_cache: HashMap<std::path::PathBuf, Vec<String>>,
}

impl UnitStore {
    pub fn new() -> UnitStore {
        UnitStore {
            names: HashMap::new(),
            units: HashMap::new(),
            graph: Graph::new(),
            load_queue: VecDeque::new(),
            gc_queue: VecDeque::new(),
            cleanup_queue: VecDeque::new(),
            dbus_queue: VecDeque::new(),
            dir_cache: HashMap::new(),
        }
    }

    /// Register a brand-new stub unit. Its own `id` is also registered as
    /// its first (and so far only) name.
    pub fn insert(&mut self, unit: Unit) {
        let id = unit.id.clone();
        for name in &unit.names {
            self.names.insert(name.clone(), id.clone());
        }
        self.units.insert(id.clone(), unit);
        self.enqueue_load(&id);
    }

    pub fn get(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn get_mut(&mut self, id: &UnitId) -> Option<&mut Unit> {
        self.units.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &Unit)> {
        self.units.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&UnitId, &mut Unit)> {
        self.units.iter_mut()
    }

    pub fn by_type(&self, ty: UnitType) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.unit_type == ty)
    }

    /// Resolve a name to its unit, adding it as a fresh stub (with `kind`)
    /// if it doesn't exist yet. Returns the canonical id to use for further
    /// lookups.
    pub fn get_or_create(&mut self, name: &str, make: impl FnOnce() -> crate::units::UnitKind) -> UnitId {
        if let Some(id) = self.names.get(name) {
            return self.follow_merge(id.clone());
        }
        let id = UnitId::new(name);
        self.insert(Unit::new_stub(id.clone(), make()));
        id
    }

    pub fn resolve(&self, name: &str) -> Option<UnitId> {
        self.names.get(name).map(|id| self.follow_merge(id.clone()))
    }

    /// Register `name` as an additional alias of `id` (spec §4.C "symlinks
    /// ... accumulating every name traversed so each becomes an alias of the
    /// resulting unit", I4 "alias map consistency"). A no-op if `name`
    /// already maps to `id`.
    pub fn register_alias(&mut self, id: &UnitId, name: &str) {
        if self.names.get(name) == Some(id) {
            return;
        }
        self.names.insert(name.to_owned(), id.clone());
        if let Some(unit) = self.units.get_mut(id) {
            unit.add_name(name);
        }
    }

    /// `follow_merge(u)` (spec §4.D): chase the `merged_into` forwarding
    /// chain to the canonical unit. Must be called before any operation
    /// that could otherwise observe a merged stub as a distinct entity.
    pub fn follow_merge(&self, mut id: UnitId) -> UnitId {
        let mut hops = 0;
        while let Some(unit) = self.units.get(&id) {
            match &unit.merged_into {
                Some(target) if hops < 32 => {
                    id = target.clone();
                    hops += 1;
                }
                _ => break,
            }
        }
        id
    }

    /// `merge(u, other)` (spec §4.D). Legal iff both share type and
    /// instanced-ness, `other` is `stub`/`error`, has no pending job, and is
    /// inactive-or-failed.
    pub fn merge(&mut self, canonical: &UnitId, other: &UnitId) -> Result<(), String> {
        if canonical == other {
            return Ok(());
        }
        let (c_type, c_instanced) = {
            let c = self.units.get(canonical).ok_or("canonical unit missing")?;
            (c.unit_type, c.instance.is_some())
        };
        let other_unit = self.units.get(other).ok_or("merge target missing")?;
        if other_unit.unit_type != c_type || other_unit.instance.is_some() != c_instanced {
            return Err("type or instanced-ness mismatch".into());
        }
        if !matches!(other_unit.load_state, LoadState::Stub | LoadState::Error) {
            return Err("merge source must be stub or error".into());
        }
        if other_unit.job.is_some() {
            return Err("merge source has a pending job".into());
        }
        if !other_unit.active_state().is_inactive_or_failed() {
            return Err("merge source is not inactive-or-failed".into());
        }

        // (1) move every alias of `other` into `canonical`.
        let other_names = other_unit.names.clone();
        for name in &other_names {
            self.names.insert(name.clone(), canonical.clone());
        }
        if let Some(c) = self.units.get_mut(canonical) {
            for name in &other_names {
                c.add_name(name);
            }
        }

        // (2) transfer every edge from `other` to `canonical`, rewriting
        // third parties' inverse edges too.
        self.graph.rewrite_unit(other, canonical);

        // (3) mark `other` merged, forwarding to `canonical`.
        if let Some(o) = self.units.get_mut(other) {
            o.load_state = LoadState::Merged;
            o.merged_into = Some(canonical.clone());
        }

        // (4) enqueue `other` for cleanup.
        self.enqueue_cleanup(other);
        info!("merged unit {other} into {canonical}");
        Ok(())
    }

    /// Free a unit: strip it from every back-set first (spec §3 "Freeing a
    /// merged unit must strip it from all back-sets first"), then drop the
    /// record and all its name-map entries.
    pub fn free(&mut self, id: &UnitId) {
        self.graph.remove_unit(id);
        if let Some(unit) = self.units.remove(id) {
            for name in &unit.names {
                self.names.remove(name);
            }
        }
        self.load_queue.retain(|u| u != id);
        self.gc_queue.retain(|u| u != id);
        self.cleanup_queue.retain(|u| u != id);
        self.dbus_queue.retain(|u| u != id);
    }

    // --- queues (spec §4.I): each insertion is idempotent via the unit's
    // own `QueueFlags`; each pop clears the corresponding flag. ---

    pub fn enqueue_load(&mut self, id: &UnitId) {
        if let Some(u) = self.units.get_mut(id)
            && !u.queues.in_load_queue
        {
            u.queues.in_load_queue = true;
            self.load_queue.push_back(id.clone());
        }
    }

    pub fn pop_load(&mut self) -> Option<UnitId> {
        let id = self.load_queue.pop_front()?;
        if let Some(u) = self.units.get_mut(&id) {
            u.queues.in_load_queue = false;
        }
        Some(id)
    }

    pub fn enqueue_gc(&mut self, id: &UnitId) {
        if let Some(u) = self.units.get_mut(id)
            && !u.queues.in_gc_queue
        {
            u.queues.in_gc_queue = true;
            self.gc_queue.push_back(id.clone());
        }
    }

    pub fn pop_gc(&mut self) -> Option<UnitId> {
        let id = self.gc_queue.pop_front()?;
        if let Some(u) = self.units.get_mut(&id) {
            u.queues.in_gc_queue = false;
        }
        Some(id)
    }

    pub fn enqueue_cleanup(&mut self, id: &UnitId) {
        if let Some(u) = self.units.get_mut(id)
            && !u.queues.in_cleanup_queue
        {
            u.queues.in_cleanup_queue = true;
            self.cleanup_queue.push_back(id.clone());
        }
    }

    pub fn pop_cleanup(&mut self) -> Option<UnitId> {
        let id = self.cleanup_queue.pop_front()?;
        if let Some(u) = self.units.get_mut(&id) {
            u.queues.in_cleanup_queue = false;
        }
        Some(id)
    }

    pub fn enqueue_dbus(&mut self, id: &UnitId) {
        if let Some(u) = self.units.get_mut(id)
            && !u.queues.in_dbus_queue
        {
            u.queues.in_dbus_queue = true;
            self.dbus_queue.push_back(id.clone());
        }
    }

    pub fn pop_dbus(&mut self) -> Option<UnitId> {
        let id = self.dbus_queue.pop_front()?;
        if let Some(u) = self.units.get_mut(&id) {
            u.queues.in_dbus_queue = false;
        }
        Some(id)
    }

    /// Whether `id` has any back-link another unit considers essential:
    /// a live `required-by`/`bound-by`/`wanted-by` peer that is itself
    /// active or has a job (spec §3 GC survival rule).
    pub fn has_essential_backlink(&self, id: &UnitId) -> bool {
        use crate::relation::RelationKind;
        for kind in [RelationKind::RequiredBy, RelationKind::BoundBy, RelationKind::WantedBy] {
            for peer in self.graph.get(id, kind) {
                if let Some(peer_unit) = self.units.get(peer)
                    && (peer_unit.active_state().is_active_or_reloading() || peer_unit.job.is_some())
                {
                    return true;
                }
            }
        }
        false
    }

    /// Drain the gc-queue, freeing every candidate that still qualifies at
    /// the time it's examined (spec §3/§4.I "re-examines candidates on a
    /// deadline").
    pub fn run_gc_pass(&mut self) {
        let mut pending: Vec<UnitId> = Vec::new();
        while let Some(id) = self.pop_gc() {
            pending.push(id);
        }
        for id in pending {
            let Some(unit) = self.units.get(&id) else { continue };
            let essential = self.has_essential_backlink(&id);
            if unit.is_gc_candidate(essential) {
                trace!("gc: collecting {id}");
                self.free(&id);
            }
        }
    }

    /// Drain the cleanup queue, freeing every unit still referenced only by
    /// now-rewritten back-edges (spec §4.I "freed-but-still-referenced").
    pub fn run_cleanup_pass(&mut self) {
        let mut pending: Vec<UnitId> = Vec::new();
        while let Some(id) = self.pop_cleanup() {
            pending.push(id);
        }
        for id in pending {
            self.free(&id);
        }
    }

    pub fn cached_dir_listing(&mut self, dir: &std::path::Path) -> &[String] {
        if !self.dir_cache.contains_key(dir) {
            let listing = std::fs::read_dir(dir)
                .map(|rd| {
                    rd.filter_map(|e| e.ok())
                        .filter_map(|e| e.file_name().into_string().ok())
                        .collect()
                })
                .unwrap_or_else(|e| {
                    warn!("could not list unit dir {}: {e}", dir.display());
                    Vec::new()
                });
            self.dir_cache.insert(dir.to_path_buf(), listing);
        }
        self.dir_cache.get(dir).unwrap()
    }
}

impl Default for UnitStore {
    fn default() -> UnitStore {
        UnitStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::misc::TargetUnit;
    use crate::units::UnitKind;

    #[test]
    fn test_insert_and_resolve() {
        let mut store = UnitStore::new();
        let id = UnitId::new("foo.target");
        store.insert(Unit::new_stub(id.clone(), UnitKind::Target(TargetUnit::new())));
        assert_eq!(store.resolve("foo.target"), Some(id));
    }

    #[test]
    fn test_merge_forwards_aliases() {
        let mut store = UnitStore::new();
        let canonical = UnitId::new("messagebus.socket");
        let stub = UnitId::new("dbus.socket");
        store.insert(Unit::new_stub(
            canonical.clone(),
            UnitKind::Target(TargetUnit::new()),
        ));
        store.insert(Unit::new_stub(stub.clone(), UnitKind::Target(TargetUnit::new())));

        store.merge(&canonical, &stub).unwrap();

        assert_eq!(store.resolve("dbus.socket"), Some(canonical.clone()));
        assert_eq!(store.get(&stub).unwrap().load_state, LoadState::Merged);
        assert_eq!(store.follow_merge(stub), canonical);
    }

    #[test]
    fn test_merge_rejects_active_source() {
        let mut store = UnitStore::new();
        let canonical = UnitId::new("a.target");
        let stub = UnitId::new("b.target");
        store.insert(Unit::new_stub(canonical.clone(), UnitKind::Target(TargetUnit::new())));
        let mut other = Unit::new_stub(stub.clone(), UnitKind::Target(TargetUnit::new()));
        other.kind = UnitKind::Target(TargetUnit::active());
        store.insert(other);
        assert!(store.merge(&canonical, &stub).is_err());
    }

    #[test]
    fn test_gc_pass_frees_unreferenced_inactive_unit() {
        let mut store = UnitStore::new();
        let id = UnitId::new("a.target");
        store.insert(Unit::new_stub(id.clone(), UnitKind::Target(TargetUnit::new())));
        store.get_mut(&id).unwrap().load_state = LoadState::Loaded;
        store.enqueue_gc(&id);
        store.run_gc_pass();
        assert!(store.get(&id).is_none());
    }
}

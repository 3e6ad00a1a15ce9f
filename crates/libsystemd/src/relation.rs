//! The dependency graph (spec §4.E): 17 relation kinds, each with at most one
//! fixed inverse, maintained bidirectionally so that adding an edge in one
//! direction always adds its inverse atomically (I1).
//!
//! Grounded on the teacher's `Dependencies` struct in `units/unit.rs`
//! (`wants`/`wanted_by`/`requires`/`required_by`/`conflicts`/`conflicted_by`/
//! `before`/`after`/`binds_to`/`bound_by`, each a `Vec<UnitId>` deduped by
//! sort), generalized into a single keyed structure so the
//! bidirectional-closure invariant is enforced in one place instead of by
//! convention at every call site that used to push onto two parallel `Vec`s
//! by hand.
//!
//! Spec §4.E's table is reproduced exactly: `requires`/`requisite` both fold
//! back to `required-by` (there is no separate `requisite-by`), and
//! `required-by`/`required-by-overridable`/`wanted-by`/`on-failure` declare
//! no inverse of their own — they are back-edges the graph never re-derives
//! an inverse for.

use std::collections::HashMap;

use crate::units::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Requires,
    RequiresOverridable,
    Wants,
    Requisite,
    RequisiteOverridable,
    BindTo,
    RequiredBy,
    RequiredByOverridable,
    WantedBy,
    BoundBy,
    Conflicts,
    ConflictedBy,
    Before,
    After,
    References,
    ReferencedBy,
    OnFailure,
}

pub const ALL_RELATIONS: &[RelationKind] = &[
    RelationKind::Requires,
    RelationKind::RequiresOverridable,
    RelationKind::Wants,
    RelationKind::Requisite,
    RelationKind::RequisiteOverridable,
    RelationKind::BindTo,
    RelationKind::RequiredBy,
    RelationKind::RequiredByOverridable,
    RelationKind::WantedBy,
    RelationKind::BoundBy,
    RelationKind::Conflicts,
    RelationKind::ConflictedBy,
    RelationKind::Before,
    RelationKind::After,
    RelationKind::References,
    RelationKind::ReferencedBy,
    RelationKind::OnFailure,
];

impl RelationKind {
    /// The relation's fixed inverse, per spec §4.E's table. `None` means the
    /// relation is itself a pure back-edge (`required-by`,
    /// `required-by-overridable`, `wanted-by`, `on-failure`) that the graph
    /// never auto-derives a further inverse for.
    pub const fn inverse(self) -> Option<RelationKind> {
        match self {
            RelationKind::Requires => Some(RelationKind::RequiredBy),
            RelationKind::Requisite => Some(RelationKind::RequiredBy),
            RelationKind::RequiresOverridable => Some(RelationKind::RequiredByOverridable),
            RelationKind::RequisiteOverridable => Some(RelationKind::RequiredByOverridable),
            RelationKind::Wants => Some(RelationKind::WantedBy),
            RelationKind::BindTo => Some(RelationKind::BoundBy),
            RelationKind::BoundBy => Some(RelationKind::BindTo),
            RelationKind::Conflicts => Some(RelationKind::ConflictedBy),
            RelationKind::ConflictedBy => Some(RelationKind::Conflicts),
            RelationKind::Before => Some(RelationKind::After),
            RelationKind::After => Some(RelationKind::Before),
            RelationKind::References => Some(RelationKind::ReferencedBy),
            RelationKind::ReferencedBy => Some(RelationKind::References),
            RelationKind::RequiredBy
            | RelationKind::RequiredByOverridable
            | RelationKind::WantedBy
            | RelationKind::OnFailure => None,
        }
    }

    /// Whether this relation pulls its target into a start transaction
    /// (spec §4.G's transaction-expansion walk: requires/requires-overridable
    /// /wants/bind-to/requisite*).
    pub const fn expands_transaction(self) -> bool {
        matches!(
            self,
            RelationKind::Requires
                | RelationKind::RequiresOverridable
                | RelationKind::Wants
                | RelationKind::BindTo
                | RelationKind::Requisite
                | RelationKind::RequisiteOverridable
        )
    }
}

/// One unit's outgoing edges, keyed by relation kind. Each target list is
/// kept sorted and deduplicated, matching the teacher's `dedup()` texture.
#[derive(Debug, Clone, Default)]
pub struct RelationSet {
    edges: HashMap<RelationKind, Vec<UnitId>>,
}

impl RelationSet {
    pub fn new() -> RelationSet {
        RelationSet { edges: HashMap::new() }
    }

    pub fn get(&self, kind: RelationKind) -> &[UnitId] {
        self.edges.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.edges.values().all(Vec::is_empty)
    }

    fn insert_one(&mut self, kind: RelationKind, target: UnitId) -> bool {
        let list = self.edges.entry(kind).or_default();
        if list.contains(&target) {
            return false;
        }
        list.push(target);
        list.sort();
        true
    }

    fn remove_one(&mut self, kind: RelationKind, target: &UnitId) -> bool {
        match self.edges.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|t| t != target);
                before != list.len()
            }
            None => false,
        }
    }

    pub fn remove_all(&mut self, target: &UnitId) {
        for list in self.edges.values_mut() {
            list.retain(|t| t != target);
        }
    }
}

/// The whole-manager dependency graph: one `RelationSet` per unit.
///
/// `add_edge` is the single place invariant I1 (bidirectional closure) is
/// enforced: adding `a --kind--> b` always adds `b --kind.inverse()--> a`
/// in the same call (when an inverse is declared), and a self-loop is a
/// no-op (I6).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    sets: HashMap<UnitId, RelationSet>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph { sets: HashMap::new() }
    }

    pub fn get(&self, unit: &UnitId, kind: RelationKind) -> &[UnitId] {
        self.sets.get(unit).map(|s| s.get(kind)).unwrap_or(&[])
    }

    /// Add `from --kind--> to` and, if `kind` declares one, its inverse.
    /// Rolls back the forward edge if the inverse insert cannot be applied,
    /// keeping I1 textually enforced rather than merely assumed (spec §4.E:
    /// "on any failure after partial insertion, every inserted edge is
    /// rolled back").
    pub fn add_edge(&mut self, from: UnitId, to: UnitId, kind: RelationKind) {
        if from == to {
            return;
        }

        let forward_new = self
            .sets
            .entry(from.clone())
            .or_default()
            .insert_one(kind, to.clone());

        if let Some(inverse) = kind.inverse() {
            let backward_new = self
                .sets
                .entry(to.clone())
                .or_default()
                .insert_one(inverse, from.clone());

            if forward_new && !backward_new {
                self.sets.get_mut(&from).unwrap().remove_one(kind, &to);
            }
        }
    }

    pub fn remove_edge(&mut self, from: &UnitId, to: &UnitId, kind: RelationKind) {
        if let Some(set) = self.sets.get_mut(from) {
            set.remove_one(kind, to);
        }
        if let Some(inverse) = kind.inverse()
            && let Some(set) = self.sets.get_mut(to)
        {
            set.remove_one(inverse, from);
        }
    }

    /// Drop a unit entirely from the graph, removing every edge that
    /// referenced it from every other unit's relation set.
    pub fn remove_unit(&mut self, unit: &UnitId) {
        self.sets.remove(unit);
        for set in self.sets.values_mut() {
            set.remove_all(unit);
        }
    }

    /// Rewrite every edge touching `from` to instead reference `to`, used by
    /// `merge()` (spec §4.D) when folding `other`'s aliases/edges into the
    /// canonical unit.
    pub fn rewrite_unit(&mut self, from: &UnitId, to: &UnitId) {
        if let Some(set) = self.sets.remove(from) {
            let existing = self.sets.entry(to.clone()).or_default();
            for kind in ALL_RELATIONS {
                for target in set.get(*kind) {
                    existing.insert_one(*kind, target.clone());
                }
            }
        }
        for set in self.sets.values_mut() {
            for kind in ALL_RELATIONS {
                if set.get(*kind).contains(from) {
                    set.remove_one(*kind, from);
                    set.insert_one(*kind, to.clone());
                }
            }
        }
    }

    /// Walk the transitive closure of transaction-expanding relations
    /// (requires/requires-overridable/wants/bind-to/requisite*) starting
    /// from `root`, used by the job engine to build a start transaction
    /// (spec §4.G) and by isolate mode to compute the keep-set.
    pub fn transitive_closure(&self, root: &UnitId) -> Vec<UnitId> {
        let mut seen = vec![root.clone()];
        let mut frontier = vec![root.clone()];

        while let Some(unit) = frontier.pop() {
            let Some(set) = self.sets.get(&unit) else { continue };
            for kind in ALL_RELATIONS.iter().copied().filter(|k| k.expands_transaction()) {
                for target in set.get(kind) {
                    if !seen.contains(target) {
                        seen.push(target.clone());
                        frontier.push(target.clone());
                    }
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(name: &str) -> UnitId {
        UnitId::new(name)
    }

    #[test]
    fn test_inverse_is_involutive_where_declared() {
        for kind in [
            RelationKind::Wants,
            RelationKind::Requires,
            RelationKind::BindTo,
            RelationKind::References,
            RelationKind::Conflicts,
            RelationKind::Before,
        ] {
            let inv = kind.inverse().unwrap();
            assert_eq!(inv.inverse().unwrap(), kind);
        }
        assert!(RelationKind::RequiredBy.inverse().is_none());
        assert!(RelationKind::WantedBy.inverse().is_none());
        assert!(RelationKind::OnFailure.inverse().is_none());
    }

    #[test]
    fn test_requires_and_requisite_share_required_by() {
        let mut g = Graph::new();
        let a = uid("a.service");
        let b = uid("b.service");
        let c = uid("c.service");
        g.add_edge(a.clone(), b.clone(), RelationKind::Requires);
        g.add_edge(c.clone(), b.clone(), RelationKind::Requisite);
        let required_by = g.get(&b, RelationKind::RequiredBy);
        assert!(required_by.contains(&a));
        assert!(required_by.contains(&c));
    }

    #[test]
    fn test_add_edge_maintains_both_directions() {
        let mut g = Graph::new();
        let a = uid("a.service");
        let b = uid("b.service");
        g.add_edge(a.clone(), b.clone(), RelationKind::Requires);

        assert_eq!(g.get(&a, RelationKind::Requires), &[b.clone()]);
        assert_eq!(g.get(&b, RelationKind::RequiredBy), &[a.clone()]);
    }

    #[test]
    fn test_self_loop_is_noop() {
        let mut g = Graph::new();
        let a = uid("a.service");
        g.add_edge(a.clone(), a.clone(), RelationKind::Before);
        assert!(g.get(&a, RelationKind::Before).is_empty());
        assert!(g.get(&a, RelationKind::After).is_empty());
    }

    #[test]
    fn test_remove_edge_clears_both_directions() {
        let mut g = Graph::new();
        let a = uid("a.service");
        let b = uid("b.service");
        g.add_edge(a.clone(), b.clone(), RelationKind::Before);
        g.remove_edge(&a, &b, RelationKind::Before);
        assert!(g.get(&a, RelationKind::Before).is_empty());
        assert!(g.get(&b, RelationKind::After).is_empty());
    }

    #[test]
    fn test_remove_unit_scrubs_all_references() {
        let mut g = Graph::new();
        let a = uid("a.service");
        let b = uid("b.service");
        g.add_edge(a.clone(), b.clone(), RelationKind::Requires);
        g.remove_unit(&b);
        assert!(g.get(&a, RelationKind::Requires).is_empty());
    }

    #[test]
    fn test_transitive_closure() {
        let mut g = Graph::new();
        let a = uid("a.target");
        let b = uid("b.service");
        let c = uid("c.service");
        g.add_edge(a.clone(), b.clone(), RelationKind::Requires);
        g.add_edge(b.clone(), c.clone(), RelationKind::Wants);

        let closure = g.transitive_closure(&a);
        assert!(closure.contains(&a));
        assert!(closure.contains(&b));
        assert!(closure.contains(&c));
    }

    #[test]
    fn test_dedup_on_repeated_insert() {
        let mut g = Graph::new();
        let a = uid("a.service");
        let b = uid("b.service");
        g.add_edge(a.clone(), b.clone(), RelationKind::After);
        g.add_edge(a.clone(), b.clone(), RelationKind::After);
        assert_eq!(g.get(&a, RelationKind::After).len(), 1);
    }

    #[test]
    fn test_rewrite_unit_moves_edges_to_canonical() {
        let mut g = Graph::new();
        let stub = uid("dbus.socket");
        let canonical = uid("messagebus.socket");
        let peer = uid("peer.service");
        g.add_edge(peer.clone(), stub.clone(), RelationKind::Requires);
        g.rewrite_unit(&stub, &canonical);
        assert!(g.get(&peer, RelationKind::Requires).contains(&canonical));
        assert!(g.get(&canonical, RelationKind::RequiredBy).contains(&peer));
    }
}

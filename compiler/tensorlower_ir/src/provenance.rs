//! The `ProvenanceGraph` facade.
//!
//! Tracks how scheduled `IndexVar`s were derived from one another (split,
//! fuse, divide, the pos↔coord transform) so the lowerer can decide, at any
//! point during statement lowering, whether a derived variable's bounds can
//! be recovered from the variables currently bound. Construction is an
//! external concern: the caller builds the graph once per schedule and
//! hands it to `lower()` by reference.

use std::cell::RefCell;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::index_var::IndexVarId;

/// How a derived `IndexVar` relates to its parent(s).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Derivation {
    /// `i` split into `(i_outer, i_inner)` by a fixed factor.
    Split { outer: IndexVarId, inner: IndexVarId, factor: i64 },
    /// Two or more variables fused into one flat iteration space.
    Fuse { parents: SmallVec<[IndexVarId; 2]> },
    /// `i` divided into `(i_outer, i_inner)`, the non-uniform counterpart
    /// of `Split` used when the factor doesn't evenly divide the extent.
    Divide { outer: IndexVarId, inner: IndexVarId, factor: i64 },
    /// The position/coordinate transform: `pos` derived from a parent
    /// coordinate variable.
    PosCoord { coord_parent: IndexVarId },
}

#[derive(Clone, Debug)]
struct ProvenanceNode {
    parents: SmallVec<[IndexVarId; 2]>,
    derivation: Option<Derivation>,
}

/// Facade over the caller-constructed derivation DAG. Adjacency is stored
/// parent-to-child once at construction; the child-to-parent reverse
/// lookup used by recoverability queries is built lazily on first use and
/// cached.
#[derive(Debug)]
pub struct ProvenanceGraph {
    nodes: FxHashMap<IndexVarId, ProvenanceNode>,
    children_cache: RefCell<Option<FxHashMap<IndexVarId, SmallVec<[IndexVarId; 2]>>>>,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        ProvenanceGraph { nodes: FxHashMap::default(), children_cache: RefCell::new(None) }
    }

    /// Registers `var` as underived (a schedule root with no parents).
    pub fn add_underived(&mut self, var: IndexVarId) {
        self.nodes.insert(var, ProvenanceNode { parents: SmallVec::new(), derivation: None });
        *self.children_cache.borrow_mut() = None;
    }

    /// Registers `var` as derived from `parents` via `derivation`.
    pub fn add_derived(&mut self, var: IndexVarId, parents: SmallVec<[IndexVarId; 2]>, derivation: Derivation) {
        self.nodes.insert(var, ProvenanceNode { parents, derivation: Some(derivation) });
        *self.children_cache.borrow_mut() = None;
    }

    pub fn is_underived(&self, var: IndexVarId) -> bool {
        self.nodes.get(&var).map_or(true, |n| n.parents.is_empty())
    }

    pub fn is_derived(&self, var: IndexVarId) -> bool {
        !self.is_underived(var)
    }

    pub fn parents(&self, var: IndexVarId) -> &[IndexVarId] {
        self.nodes.get(&var).map_or(&[], |n| n.parents.as_slice())
    }

    pub fn derivation(&self, var: IndexVarId) -> Option<&Derivation> {
        self.nodes.get(&var).and_then(|n| n.derivation.as_ref())
    }

    fn ensure_children_cache(&self) {
        if self.children_cache.borrow().is_some() {
            return;
        }
        let mut children: FxHashMap<IndexVarId, SmallVec<[IndexVarId; 2]>> = FxHashMap::default();
        for (&child, node) in &self.nodes {
            for &parent in &node.parents {
                children.entry(parent).or_default().push(child);
            }
        }
        *self.children_cache.borrow_mut() = Some(children);
    }

    /// The variables directly derived from `var`.
    pub fn children(&self, var: IndexVarId) -> SmallVec<[IndexVarId; 2]> {
        self.ensure_children_cache();
        self.children_cache
            .borrow()
            .as_ref()
            .and_then(|c| c.get(&var).cloned())
            .unwrap_or_default()
    }

    /// True if `var`'s bounds can be recovered given the currently `defined`
    /// set: either `var` is already defined, or it's derived and every one
    /// of its parents is recoverable (transitively) from `defined`.
    pub fn is_recoverable(&self, var: IndexVarId, defined: &FxHashSet<IndexVarId>) -> bool {
        self.is_recoverable_inner(var, defined, &mut FxHashSet::default())
    }

    fn is_recoverable_inner(
        &self,
        var: IndexVarId,
        defined: &FxHashSet<IndexVarId>,
        visiting: &mut FxHashSet<IndexVarId>,
    ) -> bool {
        if defined.contains(&var) {
            return true;
        }
        if self.is_underived(var) {
            return false;
        }
        if !visiting.insert(var) {
            return false;
        }
        self.parents(var)
            .iter()
            .all(|&p| self.is_recoverable_inner(p, defined, visiting))
    }

    /// Given that `newly_defined` just became bound, which of its children
    /// (transitively) became recoverable as a result? Used by the lowerer
    /// to decide which derived loop variables to materialize right after
    /// binding a new one.
    pub fn newly_recoverable(
        &self,
        newly_defined: IndexVarId,
        defined: &FxHashSet<IndexVarId>,
    ) -> Vec<IndexVarId> {
        let mut extended = defined.clone();
        extended.insert(newly_defined);
        let mut result = Vec::new();
        let mut frontier = vec![newly_defined];
        let mut seen = FxHashSet::default();
        while let Some(var) = frontier.pop() {
            for child in self.children(var) {
                if !seen.insert(child) {
                    continue;
                }
                if !extended.contains(&child) && self.is_recoverable(child, &extended) {
                    extended.insert(child);
                    result.push(child);
                    frontier.push(child);
                }
            }
        }
        result
    }

    /// The underived ancestors `var` ultimately bottoms out at.
    pub fn underived_ancestors(&self, var: IndexVarId) -> SmallVec<[IndexVarId; 4]> {
        let mut result = SmallVec::new();
        let mut stack = vec![var];
        let mut seen = FxHashSet::default();
        while let Some(v) = stack.pop() {
            if !seen.insert(v) {
                continue;
            }
            if self.is_underived(v) {
                result.push(v);
            } else {
                stack.extend(self.parents(v).iter().copied());
            }
        }
        result
    }
}

impl Default for ProvenanceGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(raw: u32) -> IndexVarId {
        IndexVarId::new(raw)
    }

    #[test]
    fn underived_is_not_recoverable_without_definition() {
        let mut g = ProvenanceGraph::new();
        g.add_underived(v(0));
        let defined = FxHashSet::default();
        assert!(!g.is_recoverable(v(0), &defined));
    }

    #[test]
    fn split_child_recoverable_once_both_halves_defined() {
        let mut g = ProvenanceGraph::new();
        g.add_underived(v(0));
        g.add_derived(
            v(1),
            SmallVec::from_slice(&[v(2), v(3)]),
            Derivation::Split { outer: v(2), inner: v(3), factor: 4 },
        );
        g.add_underived(v(2));
        g.add_underived(v(3));

        let mut defined = FxHashSet::default();
        defined.insert(v(2));
        assert!(!g.is_recoverable(v(1), &defined));
        defined.insert(v(3));
        assert!(g.is_recoverable(v(1), &defined));
    }

    #[test]
    fn newly_recoverable_finds_transitive_chain() {
        let mut g = ProvenanceGraph::new();
        g.add_underived(v(0));
        g.add_underived(v(1));
        g.add_derived(
            v(2),
            SmallVec::from_slice(&[v(0), v(1)]),
            Derivation::Fuse { parents: SmallVec::from_slice(&[v(0), v(1)]) },
        );

        let mut defined = FxHashSet::default();
        defined.insert(v(0));
        let newly = g.newly_recoverable(v(1), &defined);
        assert_eq!(newly, vec![v(2)]);
    }

    #[test]
    fn underived_ancestors_of_a_split_child() {
        let mut g = ProvenanceGraph::new();
        g.add_underived(v(0));
        g.add_derived(
            v(1),
            SmallVec::from_slice(&[v(0)]),
            Derivation::Split { outer: v(0), inner: v(0), factor: 2 },
        );
        let ancestors = g.underived_ancestors(v(1));
        assert_eq!(ancestors.as_slice(), &[v(0)]);
    }
}

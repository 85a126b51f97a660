//! The `Iterator` capability facade.
//!
//! An [`ModeIterator`] describes how the lowerer may visit one mode (level)
//! of one tensor access: whether it supports position iteration, random
//! `locate`, append-only insertion, and so on. Named `ModeIterator` rather
//! than `Iterator` to avoid shadowing `std::iter::Iterator`: this type has
//! nothing to do with Rust's iterator protocol.

use std::rc::Rc;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::access::WindowBounds;
use crate::index_var::IndexVarId;
use crate::ir::Expr;
use crate::tensor_var::TensorId;

bitflags! {
    /// The thirteen boolean capabilities from `spec.md` §3, packed into one
    /// value so a `ModeFormat` can declare them as a single constant rather
    /// than thirteen struct fields.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct IteratorCaps: u32 {
        const HAS_POS_ITER          = 1 << 0;
        const HAS_COORD_ITER        = 1 << 1;
        const HAS_LOCATE            = 1 << 2;
        const HAS_APPEND            = 1 << 3;
        const HAS_INSERT            = 1 << 4;
        const IS_UNIQUE             = 1 << 5;
        const IS_ORDERED            = 1 << 6;
        const IS_BRANCHLESS         = 1 << 7;
        const IS_FULL               = 1 << 8;
        const IS_WINDOWED           = 1 << 9;
        const IS_STRIDED            = 1 << 10;
        const HAS_INDEX_SET         = 1 << 11;
        const UPDATES_FILL_REGION   = 1 << 12;
        const IS_DIMENSION_ITERATOR = 1 << 13;
    }
}

impl IteratorCaps {
    pub fn has_pos_iter(self) -> bool {
        self.contains(IteratorCaps::HAS_POS_ITER)
    }
    pub fn has_coord_iter(self) -> bool {
        self.contains(IteratorCaps::HAS_COORD_ITER)
    }
    pub fn has_locate(self) -> bool {
        self.contains(IteratorCaps::HAS_LOCATE)
    }
    pub fn has_append(self) -> bool {
        self.contains(IteratorCaps::HAS_APPEND)
    }
    pub fn has_insert(self) -> bool {
        self.contains(IteratorCaps::HAS_INSERT)
    }
    pub fn is_unique(self) -> bool {
        self.contains(IteratorCaps::IS_UNIQUE)
    }
    pub fn is_ordered(self) -> bool {
        self.contains(IteratorCaps::IS_ORDERED)
    }
    pub fn is_branchless(self) -> bool {
        self.contains(IteratorCaps::IS_BRANCHLESS)
    }
    pub fn is_full(self) -> bool {
        self.contains(IteratorCaps::IS_FULL)
    }
    pub fn is_windowed(self) -> bool {
        self.contains(IteratorCaps::IS_WINDOWED)
    }
    pub fn is_strided(self) -> bool {
        self.contains(IteratorCaps::IS_STRIDED)
    }
    pub fn has_index_set(self) -> bool {
        self.contains(IteratorCaps::HAS_INDEX_SET)
    }
    pub fn updates_fill_region(self) -> bool {
        self.contains(IteratorCaps::UPDATES_FILL_REGION)
    }
    pub fn is_dimension_iterator(self) -> bool {
        self.contains(IteratorCaps::IS_DIMENSION_ITERATOR)
    }
}

/// The IR handles a mode format needs to emit its `pos`/`coord`
/// bounds/access functions: the underlying `pos`/`crd` arrays (absent for
/// formats that don't use them, e.g. dense) and the `values` array.
#[derive(Clone, Debug)]
pub struct ModeArrays {
    pub pos: Option<Expr>,
    pub crd: Option<Expr>,
    pub values: Expr,
}

/// One node of an access's iterator chain, describing a single tensor mode.
/// Chains run root-to-leaf via `parent`, matching the nesting of modes
/// within a tensor's storage.
#[derive(Clone, Debug)]
pub struct ModeIterator {
    pub tensor: Option<TensorId>,
    pub index_var: IndexVarId,
    pub level: u32,
    pub caps: IteratorCaps,
    pub parent: Option<Rc<ModeIterator>>,
    pub window: Option<WindowBounds>,
    /// The tensor whose sparsity pattern this iterator's coordinates must
    /// be a member of, when its access carries an `IndexSet` projection
    /// (`spec.md` §3's `hasIndexSet`).
    pub index_set: Option<TensorId>,
    pub arrays: ModeArrays,
    /// This iterator's own position variable (the loop/cursor variable
    /// `pos_var` ranges over `[begin, end)` within the arrays above).
    pub pos_var: Expr,
    pub end_var: Expr,
    pub coord_var: Expr,
}

impl ModeIterator {
    pub fn is_leaf(&self) -> bool {
        self.parent.is_none()
    }

    pub fn caps(&self) -> IteratorCaps {
        self.caps
    }

    /// Walks from this iterator up to the root, inclusive.
    pub fn ancestor_chain(&self) -> SmallVec<[&ModeIterator; 4]> {
        let mut chain = SmallVec::new();
        let mut cur = self;
        loop {
            chain.push(cur);
            match &cur.parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        chain
    }

    /// A shorthand key used to dedup iterators referring to the same
    /// tensor mode across lattice-point combination.
    pub fn identity_key(&self) -> (Option<TensorId>, u32, IndexVarId) {
        (self.tensor, self.level, self.index_var)
    }
}

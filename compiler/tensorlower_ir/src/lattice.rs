//! `MergeLattice`/`MergePoint` construction.
//!
//! A merge lattice describes, for one loop level, every distinct way its
//! operand iterators can align: each [`MergePoint`] is one case in the
//! case tree the forall lowerer builds. The combinators here
//! (`conjunction`, `disjunction`) implement the classic lattice-merge
//! algebra: a multiplication of two operands intersects their iterators,
//! an addition unions them. Which combinator to apply at which expression
//! node is a decision `tensorlower_core`'s forall lowerer makes while
//! walking the `IndexExpr` tree; this module only knows how to combine two
//! already-built lattices.

use smallvec::SmallVec;

use crate::iterator::ModeIterator;

/// One case of a loop's case tree: the iterators that must be advanced in
/// lock-step (`iterators`), the subset used to decide the coordinate to
/// advance to (`mergers`), the subset whose bound defines the loop range
/// (`rangers`), the full-format iterators visited by `locate` rather than
/// by range (`locators`), and the result iterators written to in this case.
#[derive(Clone, Debug, Default)]
pub struct MergePoint {
    pub iterators: SmallVec<[ModeIterator; 4]>,
    pub mergers: SmallVec<[ModeIterator; 4]>,
    pub rangers: SmallVec<[ModeIterator; 4]>,
    pub locators: SmallVec<[ModeIterator; 4]>,
    pub results: SmallVec<[ModeIterator; 2]>,
}

impl MergePoint {
    /// The lattice point for a single operand iterator. A full (dense)
    /// iterator contributes no range case of its own: it's visited via
    /// `locate` under whatever sparser iterators drive the loop.
    pub fn single(it: ModeIterator) -> Self {
        if it.caps().is_full() {
            MergePoint {
                locators: SmallVec::from_slice(&[it]),
                ..MergePoint::default()
            }
        } else {
            MergePoint {
                iterators: SmallVec::from_slice(&[it.clone()]),
                mergers: SmallVec::from_slice(&[it.clone()]),
                rangers: SmallVec::from_slice(&[it]),
                ..MergePoint::default()
            }
        }
    }

    fn merge_unique(dst: &mut SmallVec<[ModeIterator; 4]>, src: &[ModeIterator]) {
        for it in src {
            if !dst.iter().any(|existing| existing.identity_key() == it.identity_key()) {
                dst.push(it.clone());
            }
        }
    }

    /// Combine two points as they'd co-occur under an intersection
    /// (multiplication).
    pub fn conjoin(a: &MergePoint, b: &MergePoint) -> MergePoint {
        let mut out = MergePoint::default();
        Self::merge_unique(&mut out.iterators, &a.iterators);
        Self::merge_unique(&mut out.iterators, &b.iterators);
        Self::merge_unique(&mut out.mergers, &a.mergers);
        Self::merge_unique(&mut out.mergers, &b.mergers);
        Self::merge_unique(&mut out.rangers, &a.rangers);
        Self::merge_unique(&mut out.rangers, &b.rangers);
        Self::merge_unique(&mut out.locators, &a.locators);
        Self::merge_unique(&mut out.locators, &b.locators);
        Self::merge_unique(&mut out.results, &a.results);
        Self::merge_unique(&mut out.results, &b.results);
        out
    }

    pub fn with_result(mut self, it: ModeIterator) -> Self {
        Self::merge_unique(&mut self.results, std::slice::from_ref(&it));
        self
    }
}

/// The ordered set of cases for one loop level, most-constrained first.
#[derive(Clone, Debug, Default)]
pub struct MergeLattice {
    pub points: Vec<MergePoint>,
    /// Whether the union of all points is known to cover the full
    /// coordinate space, i.e. no implicit final else-arm is needed.
    pub exact: bool,
}

impl MergeLattice {
    pub fn point(point: MergePoint, exact: bool) -> Self {
        MergeLattice { points: vec![point], exact }
    }

    pub fn for_iterator(it: ModeIterator) -> Self {
        let exact = it.caps().is_full();
        MergeLattice::point(MergePoint::single(it), exact)
    }

    /// Intersection merge (multiplication): cartesian product of points,
    /// most-constrained-first ordering preserved by nesting `a` outer, `b`
    /// inner.
    pub fn conjunction(a: &MergeLattice, b: &MergeLattice) -> MergeLattice {
        let mut points = Vec::with_capacity(a.points.len() * b.points.len());
        for pa in &a.points {
            for pb in &b.points {
                points.push(MergePoint::conjoin(pa, pb));
            }
        }
        MergeLattice { points, exact: a.exact && b.exact }
    }

    /// Union merge (addition): both-present cases first, then each
    /// operand's exclusive cases, matching the classic three-point shape
    /// for `a + b` over two partially-overlapping sparse operands.
    pub fn disjunction(a: &MergeLattice, b: &MergeLattice) -> MergeLattice {
        let mut points = Vec::with_capacity(a.points.len() * b.points.len() + a.points.len() + b.points.len());
        for pa in &a.points {
            for pb in &b.points {
                points.push(MergePoint::conjoin(pa, pb));
            }
        }
        for pa in &a.points {
            points.push(pa.clone());
        }
        for pb in &b.points {
            points.push(pb.clone());
        }
        MergeLattice { points, exact: a.exact || b.exact }
    }

    /// A variant restricted to the dominant (first) point, used by loop
    /// shapes that only need iteration bounds and not a full case split
    /// (`spec.md` §4.2 shapes 1-5).
    pub fn loop_lattice(&self) -> MergeLattice {
        match self.points.first() {
            Some(p) => MergeLattice { points: vec![p.clone()], exact: self.exact },
            None => MergeLattice::default(),
        }
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_var::IndexVarId;
    use crate::ir::{Datatype, Expr, Var};
    use crate::iterator::{IteratorCaps, ModeArrays};

    fn sparse_iter(level: u32) -> ModeIterator {
        ModeIterator {
            tensor: None,
            index_var: IndexVarId::new(level),
            level,
            caps: IteratorCaps::HAS_POS_ITER | IteratorCaps::IS_ORDERED | IteratorCaps::IS_UNIQUE,
            parent: None,
            window: None,
            index_set: None,
            arrays: ModeArrays { pos: None, crd: None, values: Expr::var(Var::new("vals", Datatype::Float64)) },
            pos_var: Expr::var(Var::new(format!("p{level}"), Datatype::Int64)),
            end_var: Expr::var(Var::new(format!("pend{level}"), Datatype::Int64)),
            coord_var: Expr::var(Var::new(format!("i{level}"), Datatype::Int32)),
        }
    }

    #[test]
    fn disjunction_of_two_sparse_operands_has_three_points() {
        let a = MergeLattice::for_iterator(sparse_iter(0));
        let b = MergeLattice::for_iterator(sparse_iter(1));
        let union = MergeLattice::disjunction(&a, &b);
        assert_eq!(union.points.len(), 3);
        assert!(!union.is_exact());
    }

    #[test]
    fn conjunction_of_two_sparse_operands_has_one_point() {
        let a = MergeLattice::for_iterator(sparse_iter(0));
        let b = MergeLattice::for_iterator(sparse_iter(1));
        let intersection = MergeLattice::conjunction(&a, &b);
        assert_eq!(intersection.points.len(), 1);
        assert_eq!(intersection.points[0].iterators.len(), 2);
    }

    #[test]
    fn full_iterator_contributes_only_a_locator() {
        let mut dense = sparse_iter(0);
        dense.caps = IteratorCaps::HAS_LOCATE | IteratorCaps::IS_FULL;
        let lattice = MergeLattice::for_iterator(dense);
        assert!(lattice.is_exact());
        assert!(lattice.points[0].iterators.is_empty());
        assert_eq!(lattice.points[0].locators.len(), 1);
    }
}

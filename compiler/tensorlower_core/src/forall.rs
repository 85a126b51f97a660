//! The `forall` lowerer: picks one of six loop shapes for a loop level and
//! emits it (`spec.md` §4.2).
//!
//! - **Fused position**: the loop's iterators all share one ancestor
//!   position space (e.g. two levels fused by a prior schedule transform);
//!   iterate that shared position range directly.
//! - **Dense acceleration**: the loop variable ranges over a dense
//!   accelerator workspace's index list instead of its full dimension.
//! - **Dimension**: no sparse iterator constrains this level; iterate
//!   `[0, dimension)` directly.
//! - **Position**: a single `hasPosIter` operand with no merge needed;
//!   iterate its position range and derive the coordinate from
//!   `pos_access`.
//! - **Coordinate**: a single `hasCoordIter` operand; iterate coordinates
//!   directly via `coord_bounds`/`coord_access`.
//! - **General merge**: more than one iterator must be reconciled; build
//!   the full [`MergeLattice`] case tree via `merge_point`.

use tensorlower_ir::{
    Expr, ForallMeta, IndexVarId, LowerError, LowerResult, LoopKind, MergeLattice, ModeIterator,
    ParallelUnit, Stmt, Var,
};
use tensorlower_stack::ensure_sufficient_stack;
use tracing::instrument;

use crate::expr::IteratorScope;
use crate::merge_point::lower_merge_point;
use crate::state::Lowerer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForallShape {
    FusedPosition,
    DenseAcceleration,
    Dimension,
    Position,
    Coordinate,
    GeneralMerge,
}

/// Chooses which of the six loop shapes fits the lattice built for this
/// `forall`'s operand accesses. This is a structural decision over
/// iterator capabilities, not a cost-based schedule choice (schedule
/// choices were made by the caller before this crate ever sees the
/// statement).
pub fn choose_forall_shape(lattice: &MergeLattice, var_is_dense_accelerated: bool) -> ForallShape {
    if var_is_dense_accelerated {
        return ForallShape::DenseAcceleration;
    }
    let dominant = match lattice.points.first() {
        Some(p) => p,
        None => return ForallShape::Dimension,
    };
    if dominant.iterators.is_empty() {
        return ForallShape::Dimension;
    }
    if lattice.points.len() == 1 && dominant.iterators.len() == 1 {
        let it = &dominant.iterators[0];
        if it.caps().has_pos_iter() {
            return ForallShape::Position;
        }
        if it.caps().has_coord_iter() {
            return ForallShape::Coordinate;
        }
    }
    if dominant.iterators.len() > 1 && all_share_fused_ancestor(&dominant.iterators) {
        return ForallShape::FusedPosition;
    }
    ForallShape::GeneralMerge
}

fn all_share_fused_ancestor(iterators: &[ModeIterator]) -> bool {
    iterators.len() > 1
        && iterators.iter().all(|it| {
            it.parent
                .as_ref()
                .is_some_and(|p| p.pos_var == iterators[0].parent.as_ref().map_or(Expr::lit_int(-1), |q| q.pos_var.clone()))
        })
}

/// Lowers a `forall var: body` given the already-built lattice for the
/// accesses appearing in `body`, and a closure that lowers the body's
/// assignment(s) given an iterator scope.
#[instrument(skip_all, level = "debug", fields(var = var.raw(), points = lattice.points.len()))]
pub fn lower_forall(
    lowerer: &mut Lowerer<'_>,
    var: IndexVarId,
    meta: ForallMeta,
    lattice: &MergeLattice,
    lower_body: impl Fn(&Lowerer<'_>, &IteratorScope<'_>) -> LowerResult<Stmt>,
) -> LowerResult<Stmt> {
    ensure_sufficient_stack(|| lower_forall_inner(lowerer, var, meta, lattice, &lower_body))
}

fn lower_forall_inner(
    lowerer: &mut Lowerer<'_>,
    var: IndexVarId,
    meta: ForallMeta,
    lattice: &MergeLattice,
    lower_body: &impl Fn(&Lowerer<'_>, &IteratorScope<'_>) -> LowerResult<Stmt>,
) -> LowerResult<Stmt> {
    let shape = choose_forall_shape(lattice, false);
    lowerer.mark_defined(var);
    let recovered = lowerer.recoverable_after(var);
    let loop_var = lowerer.fresh_var(&format!("i{}", var.raw()), tensorlower_ir::Datatype::Int64);

    if meta.parallelize {
        lowerer.enter_parallel_loop(var);
    }
    let body_stmt = lower_forall_body(lowerer, shape, lattice, &loop_var, lower_body)?;
    if meta.parallelize {
        lowerer.exit_parallel_loop(var);
    }

    for r in &recovered {
        lowerer.mark_defined(*r);
    }
    lowerer.undefine(var);

    let (start, end, increment, kind, unit) = loop_bounds_for_shape(lowerer, shape, lattice, meta);
    let window = lattice
        .points
        .first()
        .and_then(|p| p.rangers.first().or_else(|| p.locators.first()))
        .and_then(|it| it.window);
    let (start, end) = match window {
        Some(w) => (Expr::lit_int(w.lo), Expr::lit_int(w.hi)),
        None => (start, end),
    };
    let body_stmt = match window {
        Some(w) if w.stride > 1 => {
            let offset = Expr::sub(Expr::var(loop_var.clone()), Expr::lit_int(w.lo));
            let on_stride = Expr::eq(Expr::binary(tensorlower_ir::BinaryOp::Rem, offset, Expr::lit_int(w.stride)), Expr::lit_int(0));
            Stmt::if_then(on_stride, body_stmt)
        }
        _ => body_stmt,
    };

    if meta.vectorize {
        return lower_forall_cloned(loop_var, start, end, increment, kind, unit, body_stmt);
    }

    if shape == ForallShape::GeneralMerge {
        // The general-merge body is already a self-co-iterating `while`
        // (`general_merge_while_cond`), not a counted range: wrapping it in
        // another loop would iterate it `end - start` times over.
        return Ok(body_stmt);
    }

    Ok(Stmt::for_loop(loop_var, start, end, increment, kind, unit, body_stmt))
}

fn lower_forall_body(
    lowerer: &mut Lowerer<'_>,
    shape: ForallShape,
    lattice: &MergeLattice,
    loop_var: &Var,
    lower_body: &impl Fn(&Lowerer<'_>, &IteratorScope<'_>) -> LowerResult<Stmt>,
) -> LowerResult<Stmt> {
    match shape {
        ForallShape::GeneralMerge => lower_general_merge(lowerer, lattice, lower_body),
        ForallShape::Position | ForallShape::Coordinate | ForallShape::FusedPosition => {
            let point = lattice
                .points
                .first()
                .ok_or_else(|| LowerError::internal("lower_forall", "empty lattice for single-iterator shape"))?;
            lower_merge_point(lowerer, point, lower_body)
        }
        ForallShape::Dimension | ForallShape::DenseAcceleration => {
            // No ranger advances this level (every operand here is
            // full/dense), so the locators built for it never get their
            // pos_var stepped by a merge point. Sync them to the loop
            // variable directly instead.
            let scope = IteratorScope::default();
            let inner = lower_body(lowerer, &scope)?;
            let syncs: Vec<Stmt> = lattice
                .points
                .first()
                .map(|p| {
                    p.locators
                        .iter()
                        .flat_map(|it| {
                            [
                                Stmt::assign(it.pos_var.clone(), Expr::var(loop_var.clone())),
                                Stmt::assign(it.coord_var.clone(), Expr::var(loop_var.clone())),
                            ]
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(Stmt::blanks(syncs.into_iter().chain(std::iter::once(inner))))
        }
    }
}

fn loop_bounds_for_shape(
    _lowerer: &Lowerer<'_>,
    shape: ForallShape,
    lattice: &MergeLattice,
    meta: ForallMeta,
) -> (Expr, Expr, Expr, LoopKind, ParallelUnit) {
    let kind = if meta.vectorize {
        LoopKind::Vectorized
    } else if meta.unroll > 1 {
        LoopKind::StaticChunked
    } else if meta.parallelize {
        LoopKind::Runtime
    } else {
        LoopKind::Serial
    };
    let unit = if meta.parallelize { ParallelUnit::CpuThread } else { ParallelUnit::NotParallel };

    let dominant = lattice.points.first();
    // A dominant point's ranger drives the loop when there's a sparse
    // iterator at this level; with none (every operand dense/full at this
    // level) its bound still lives on the locator built for the same level,
    // since `build_iterator` computes every iterator's position bounds
    // regardless of which bucket the lattice sorted it into.
    let bound_source = dominant.and_then(|p| p.rangers.first().or_else(|| p.locators.first()));
    let (start, end) = match shape {
        ForallShape::Coordinate => bound_source
            .map_or((Expr::lit_int(0), Expr::lit_int(0)), |it| (it.coord_var.clone(), it.end_var.clone())),
        ForallShape::Position
        | ForallShape::FusedPosition
        | ForallShape::Dimension
        | ForallShape::DenseAcceleration
        | ForallShape::GeneralMerge => bound_source
            .map_or((Expr::lit_int(0), Expr::lit_int(0)), |it| (it.pos_var.clone(), it.end_var.clone())),
    };
    (start, end, Expr::lit_int(1), kind, unit)
}

/// `lowerMergeLattice`: co-iterates every distinct ranger in the lattice
/// with one `while` loop, dispatching each iteration to whichever lattice
/// point currently has all its mergers present via a `case` tree, and
/// stepping ahead through the loop body's own ranger-advancement (`spec.md`
/// §4.2 general merge: "condition: no ranger exhausted").
fn lower_general_merge(
    lowerer: &mut Lowerer<'_>,
    lattice: &MergeLattice,
    lower_body: &impl Fn(&Lowerer<'_>, &IteratorScope<'_>) -> LowerResult<Stmt>,
) -> LowerResult<Stmt> {
    let mut clauses = Vec::with_capacity(lattice.points.len());
    for point in &lattice.points {
        let cond = merge_point_present_cond(point);
        let stmt = lower_merge_point(lowerer, point, lower_body)?;
        clauses.push((cond, stmt));
    }
    if !lattice.is_exact() {
        clauses.push((Expr::lit_bool(true), general_merge_catch_all(lowerer, lattice)));
    }
    let body = Stmt::case(clauses, lattice.is_exact());
    Ok(Stmt::while_loop(general_merge_while_cond(lattice), body))
}

/// A lattice point's mergers are all "present" (not yet past their bound)
/// when every one of them still has entries left to offer this coordinate.
fn merge_point_present_cond(point: &tensorlower_ir::MergePoint) -> Expr {
    point
        .mergers
        .iter()
        .map(|it| Expr::lt(it.pos_var.clone(), it.end_var.clone()))
        .fold(None::<Expr>, |acc, present| {
            Some(acc.map_or_else(|| present.clone(), |a| Expr::and(a, present)))
        })
        .unwrap_or_else(|| Expr::lit_bool(true))
}

/// The general merge's own loop condition: true while at least one
/// distinct ranger across the whole lattice hasn't exhausted its position
/// range yet, deduped by `identity_key` so an iterator shared across
/// several points is only tested once.
fn general_merge_while_cond(lattice: &MergeLattice) -> Expr {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut cond: Option<Expr> = None;
    for point in &lattice.points {
        for it in &point.rangers {
            if !seen.insert(it.identity_key()) {
                continue;
            }
            let present = Expr::lt(it.pos_var.clone(), it.end_var.clone());
            cond = Some(match cond {
                Some(c) => Expr::or(c, present),
                None => present,
            });
        }
    }
    cond.unwrap_or_else(|| Expr::lit_bool(false))
}

/// Explicit-zero catch-all for an inexact lattice: when no point's mergers
/// are all present, every distinct result iterator in the lattice still
/// needs its current entry set to the tensor's fill value.
fn general_merge_catch_all(lowerer: &Lowerer<'_>, lattice: &MergeLattice) -> Stmt {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut stores = Vec::new();
    for point in &lattice.points {
        for it in &point.results {
            if !seen.insert(it.identity_key()) {
                continue;
            }
            let Some(tensor_id) = it.tensor else { continue };
            let tensor = lowerer.tensor(tensor_id);
            let fill = crate::fill_region::literal_to_expr(tensor.fill_value());
            let values = Expr::get_property(it.arrays.values.clone(), tensorlower_ir::Property::Values, None);
            stores.push(Stmt::store(values, it.pos_var.clone(), fill));
        }
    }
    Stmt::block(stores)
}

/// `lowerForallCloned`: when a loop is marked for vectorization, emit two
/// copies: a vectorized body guarded by the "direct divisibility"
/// heuristic (the loop extent divides evenly by the vector width) and a
/// scalar remainder-handling fallback otherwise. The heuristic is
/// preserved exactly as the original computes it: a plain modulo check
/// against the literal vector width, not a runtime-adaptive chunk size.
fn lower_forall_cloned(
    loop_var: Var,
    start: Expr,
    end: Expr,
    increment: Expr,
    kind: LoopKind,
    unit: ParallelUnit,
    body: Stmt,
) -> LowerResult<Stmt> {
    const VECTOR_WIDTH: i64 = 8;
    let extent = Expr::sub(end.clone(), start.clone());
    let divisible = Expr::eq(
        Expr::binary(tensorlower_ir::BinaryOp::Rem, extent, Expr::lit_int(VECTOR_WIDTH)),
        Expr::lit_int(0),
    );
    let vectorized =
        Stmt::for_loop(loop_var.clone(), start.clone(), end.clone(), increment.clone(), kind, unit, body.clone());
    let scalar =
        Stmt::for_loop(loop_var, start, end, increment, LoopKind::Serial, ParallelUnit::NotParallel, body);
    Ok(Stmt::if_then_else(divisible, vectorized, scalar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorlower_ir::{IteratorCaps, MergePoint, ModeArrays, ProvenanceGraph, TensorId};

    fn sparse_point(level: u32) -> MergePoint {
        let it = ModeIterator {
            tensor: Some(TensorId::new(level)),
            index_var: IndexVarId::new(level),
            level,
            caps: IteratorCaps::HAS_POS_ITER | IteratorCaps::IS_ORDERED | IteratorCaps::IS_UNIQUE,
            parent: None,
            window: None,
            index_set: None,
            arrays: ModeArrays { pos: None, crd: None, values: Expr::var(Var::new_ptr("vals", tensorlower_ir::Datatype::Float64)) },
            pos_var: Expr::var(Var::new(format!("p{level}"), tensorlower_ir::Datatype::Int64)),
            end_var: Expr::var(Var::new(format!("pend{level}"), tensorlower_ir::Datatype::Int64)),
            coord_var: Expr::var(Var::new(format!("i{level}"), tensorlower_ir::Datatype::Int32)),
        };
        MergePoint { iterators: smallvec::smallvec![it.clone()], mergers: smallvec::smallvec![it.clone()], rangers: smallvec::smallvec![it], ..MergePoint::default() }
    }

    #[test]
    fn single_pos_iter_point_chooses_position_shape() {
        let lattice = MergeLattice::point(sparse_point(0), false);
        let shape = choose_forall_shape(&lattice, false);
        assert_eq!(shape, ForallShape::Position);
    }

    #[test]
    fn empty_lattice_chooses_dimension_shape() {
        let lattice = MergeLattice::default();
        let shape = choose_forall_shape(&lattice, false);
        assert_eq!(shape, ForallShape::Dimension);
    }

    #[test]
    fn dense_accelerated_var_always_chooses_that_shape() {
        let lattice = MergeLattice::point(sparse_point(0), false);
        let shape = choose_forall_shape(&lattice, true);
        assert_eq!(shape, ForallShape::DenseAcceleration);
    }

    #[test]
    fn lower_forall_dimension_shape_produces_for_loop() {
        let provenance = ProvenanceGraph::new();
        let tensors = rustc_hash::FxHashMap::default();
        let mut lowerer = Lowerer::new(crate::config::LowerConfig::default(), &provenance, &tensors);
        let lattice = MergeLattice::default();
        let stmt = lower_forall(&mut lowerer, IndexVarId::new(0), ForallMeta::default(), &lattice, |_, _| {
            Ok(Stmt::no_op())
        })
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(stmt.kind(), tensorlower_ir::StmtKind::For { .. }));
    }

    #[test]
    fn windowed_locator_narrows_bounds_and_guards_stride() {
        let provenance = ProvenanceGraph::new();
        let tensors = rustc_hash::FxHashMap::default();
        let mut lowerer = Lowerer::new(crate::config::LowerConfig::default(), &provenance, &tensors);
        let mut dense = sparse_point(0).iterators[0].clone();
        dense.window = Some(tensorlower_ir::WindowBounds { lo: 2, hi: 6, stride: 2 });
        let point = MergePoint { locators: smallvec::smallvec![dense], ..MergePoint::default() };
        let lattice = MergeLattice::point(point, true);

        let stmt = lower_forall(&mut lowerer, IndexVarId::new(0), ForallMeta::default(), &lattice, |_, _| {
            Ok(Stmt::no_op())
        })
        .unwrap_or_else(|e| panic!("{e}"));
        match stmt.kind() {
            tensorlower_ir::StmtKind::For { start, end, body, .. } => {
                assert_eq!(*start, Expr::lit_int(2));
                assert_eq!(*end, Expr::lit_int(6));
                assert!(matches!(body.kind(), tensorlower_ir::StmtKind::IfThenElse { .. } | tensorlower_ir::StmtKind::Block(_)));
            }
            other => panic!("expected For, got {other:?}"),
        }
    }
}

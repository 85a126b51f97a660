//! Merge-point lowering (`spec.md` §4.3): turns one [`MergePoint`] into the
//! IR for one case of a loop's case tree.
//!
//! The seven-step shape below mirrors the original lowerer's
//! `lowerMergePoint`: declare position bounds, compute the merge
//! coordinate, build the `{tensor}_isNonZero` preamble for explicit-zero
//! detection, `locate` the point's full-format operands at that
//! coordinate, lower the body, advance the point's rangers, and, when the
//! point is eligible, take the run-length fast path instead of stepping
//! one coordinate at a time.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tensorlower_ir::{
    conjoin, BinaryOp, Expr, IndexExpr, LowerResult, MergePoint, ModeArrays, ModeFuncContext,
    ModeIterator, Stmt, Var,
};
use tensorlower_stack::ensure_sufficient_stack;

use crate::expr::IteratorScope;
use crate::fill_region::{apply_rle_dense_reduction, fill_region_length, is_non_zero_guard};
use crate::state::Lowerer;

/// Builds the `{tensor}_isNonZero` boolean declarations used by the
/// explicit-zero case-tree preamble, one per merger whose tensor has a
/// non-default fill value.
pub fn construct_inner_loop_case_preamble(lowerer: &Lowerer<'_>, point: &MergePoint) -> (Stmt, Vec<Expr>) {
    let mut decls = Vec::new();
    let mut guards = Vec::new();
    for it in &point.mergers {
        if it.caps().is_full() {
            // Full formats have no explicit zeros to guard against.
            continue;
        }
        let fill = Expr::get_property(it.arrays.values.clone(), tensorlower_ir::Property::FillValue, None);
        let value = Expr::load(
            Expr::get_property(it.arrays.values.clone(), tensorlower_ir::Property::Values, None),
            it.pos_var.clone(),
        );
        let guard_var = lowerer.fresh_var(
            &format!("is_non_zero_{}", it.level),
            tensorlower_ir::Datatype::Bool,
        );
        let guard_expr = is_non_zero_guard(value, fill);
        decls.push(Stmt::var_decl(guard_var.clone(), Some(guard_expr)));
        guards.push(Expr::var(guard_var));
    }
    (Stmt::block(decls), guards)
}

/// The coordinate this merge point currently sits at: the minimum of all
/// mergers' coordinate variables (a single merger's coordinate directly,
/// or `Expr::min` across several).
pub fn merge_coordinate(point: &MergePoint) -> Expr {
    if point.mergers.len() == 1 {
        point.mergers[0].coord_var.clone()
    } else {
        Expr::min(point.mergers.iter().map(|it| it.coord_var.clone()).collect())
    }
}

/// `locate`s a full-format iterator at `coord`, assigning its resulting
/// position directly: `hasLocate` formats never fail to find a
/// coordinate within their declared dimension, so there's no guard here
/// (unlike `coord_access` on a sparse format, which can miss).
fn locate_iterator(lowerer: &Lowerer<'_>, it: &ModeIterator, coord: Expr) -> LowerResult<Stmt> {
    let Some(tensor_id) = it.tensor else { return Ok(Stmt::no_op()) };
    let tensor = lowerer.tensor(tensor_id);
    let format = tensor.format_at(it.level as usize);
    let ctx = ModeFuncContext {
        pos_var: it.pos_var.clone(),
        parent_pos_var: it.parent.as_ref().map_or_else(|| Expr::lit_int(0), |p| p.pos_var.clone()),
        coord_var: coord,
        arrays: it.arrays.clone(),
    };
    let result = format.locate(&ctx);
    let Some(pos) = result.results.into_iter().next() else {
        return Ok(result.stmt);
    };
    Ok(Stmt::blanks([result.stmt, Stmt::assign(it.pos_var.clone(), pos)]))
}

/// Lowers one merge point: guard construction, `locate`s for full-format
/// operands, the caller-supplied body, and ranger advancement. `lower_body`
/// receives the iterator scope (tensor -> leaf iterator) needed to lower
/// the assignment's RHS expression.
#[tracing::instrument(skip_all, level = "debug", fields(rangers = point.rangers.len(), locators = point.locators.len()))]
pub fn lower_merge_point(
    lowerer: &Lowerer<'_>,
    point: &MergePoint,
    lower_body: impl FnOnce(&Lowerer<'_>, &IteratorScope<'_>) -> LowerResult<Stmt>,
) -> LowerResult<Stmt> {
    ensure_sufficient_stack(|| lower_merge_point_inner(lowerer, point, lower_body))
}

fn lower_merge_point_inner(
    lowerer: &Lowerer<'_>,
    point: &MergePoint,
    lower_body: impl FnOnce(&Lowerer<'_>, &IteratorScope<'_>) -> LowerResult<Stmt>,
) -> LowerResult<Stmt> {
    // Step 1: load each merger's current coordinate via pos_access before
    // the point's merge coordinate (their min) can be computed.
    let mut loads = Vec::new();
    for it in &point.mergers {
        loads.push(load_coordinate(lowerer, it)?);
    }

    // Step 2: the coordinate this point sits at.
    let coord = merge_coordinate(point);

    // Step 3: explicit-zero preamble.
    let (preamble, mut guards) = construct_inner_loop_case_preamble(lowerer, point);

    // Step 4: index-set membership guards for any merger/locator projected
    // through an index-set tensor.
    let mut index_set_stmts = Vec::new();
    for it in point.mergers.iter().chain(point.locators.iter()) {
        if let Some((stmt, guard)) = index_set_membership_guard(lowerer, it)? {
            index_set_stmts.push(stmt);
            guards.push(guard);
        }
    }

    // Step 5: locate full-format operands at this point's coordinate.
    let mut locates = Vec::new();
    for it in &point.locators {
        locates.push(locate_iterator(lowerer, it, coord.clone())?);
    }

    let mut scope: IteratorScope<'_> = FxHashMap::default();
    for it in point.iterators.iter().chain(point.locators.iter()) {
        if let Some(tensor_id) = it.tensor {
            scope.insert(tensor_id, it);
        }
    }

    // Step 6: the caller-supplied body, guarded by every explicit-zero and
    // index-set guard collected above.
    let body = lower_body(lowerer, &scope)?;
    let mut guarded_body = body;
    if let Some(guard) = conjoin(SmallVec::from_vec(guards)) {
        guarded_body = Stmt::if_then(guard, guarded_body);
    }

    // Step 7: advance. Unique rangers step by one; non-unique rangers skip
    // every position still sharing this point's coordinate; a merger that
    // is itself a pure dimension iterator (never backed by a pos space)
    // advances its coordinate directly when it isn't already a ranger.
    let mut advances = Vec::new();
    for it in &point.rangers {
        if it.caps().is_unique() {
            advances.push(Stmt::assign(it.pos_var.clone(), Expr::add(it.pos_var.clone(), Expr::lit_int(1))));
        } else {
            advances.push(dedup_loop(lowerer, it, &coord)?);
        }
    }
    let ranger_keys: Vec<_> = point.rangers.iter().map(|it| it.identity_key()).collect();
    for it in &point.mergers {
        if it.caps().is_dimension_iterator() && !ranger_keys.contains(&it.identity_key()) {
            advances.push(Stmt::assign(it.coord_var.clone(), Expr::add(it.coord_var.clone(), Expr::lit_int(1))));
        }
    }

    Ok(Stmt::blanks([
        Stmt::block(loads),
        preamble,
        Stmt::block(index_set_stmts),
        Stmt::block(locates),
        guarded_body,
        Stmt::block(advances),
    ]))
}

/// Loads a merger's current coordinate via its format's `pos_access`,
/// applying any window offset/stride, and stores the result into the
/// iterator's `coord_var` (step 1 of `lowerMergePoint`).
fn load_coordinate(lowerer: &Lowerer<'_>, it: &ModeIterator) -> LowerResult<Stmt> {
    let Some(tensor_id) = it.tensor else { return Ok(Stmt::no_op()) };
    let tensor = lowerer.tensor(tensor_id);
    let format = tensor.format_at(it.level as usize);
    let ctx = ModeFuncContext {
        pos_var: it.pos_var.clone(),
        parent_pos_var: it.parent.as_ref().map_or_else(|| Expr::lit_int(0), |p| p.pos_var.clone()),
        coord_var: it.coord_var.clone(),
        arrays: it.arrays.clone(),
    };
    let result = format.pos_access(&ctx);
    let Some(raw_coord) = result.results.into_iter().next() else {
        return Ok(result.stmt);
    };
    let coord = match it.window {
        Some(w) => Expr::add(Expr::mul(raw_coord, Expr::lit_int(w.stride)), Expr::lit_int(w.lo)),
        None => raw_coord,
    };
    Ok(Stmt::blanks([result.stmt, Stmt::assign(it.coord_var.clone(), coord)]))
}

/// Guards a merger/locator whose access carries an `IndexSet` projection:
/// the coordinate is only valid membership if `locate` on the set tensor's
/// first level finds it (a negative position means absent).
fn index_set_membership_guard(lowerer: &Lowerer<'_>, it: &ModeIterator) -> LowerResult<Option<(Stmt, Expr)>> {
    let Some(set_tensor_id) = it.index_set else { return Ok(None) };
    let set_tensor = lowerer.tensor(set_tensor_id);
    let format = set_tensor.format_at(0);
    let arrays = ModeArrays {
        pos: Some(Expr::var(Var::new_ptr(format!("{}_pos", set_tensor.name()), tensorlower_ir::Datatype::Int64))),
        crd: Some(Expr::var(Var::new_ptr(format!("{}_crd", set_tensor.name()), tensorlower_ir::Datatype::Int32))),
        values: Expr::var(Var::new_ptr(format!("{}_vals", set_tensor.name()), set_tensor.datatype())),
    };
    let ctx = ModeFuncContext {
        pos_var: Expr::lit_int(0),
        parent_pos_var: Expr::lit_int(0),
        coord_var: it.coord_var.clone(),
        arrays,
    };
    let result = format.locate(&ctx);
    let Some(pos) = result.results.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some((result.stmt, Expr::binary(BinaryOp::Gte, pos, Expr::lit_int(0)))))
}

/// Skips every position still sharing `merge_coord` after the just
/// processed entry, for a non-unique ranger whose format may store the
/// same coordinate at consecutive positions.
fn dedup_loop(lowerer: &Lowerer<'_>, it: &ModeIterator, merge_coord: &Expr) -> LowerResult<Stmt> {
    let step = Stmt::assign(it.pos_var.clone(), Expr::add(it.pos_var.clone(), Expr::lit_int(1)));
    let reload = load_coordinate(lowerer, it)?;
    let exhausted = Expr::binary(BinaryOp::Gte, it.pos_var.clone(), it.end_var.clone());
    let different = Expr::binary(BinaryOp::Neq, it.coord_var.clone(), merge_coord.clone());
    let loop_body = Stmt::blanks([
        Stmt::if_then(exhausted, Stmt::break_loop()),
        reload,
        Stmt::if_then(different, Stmt::break_loop()),
        step.clone(),
    ]);
    Ok(Stmt::blanks([step, Stmt::while_loop(Expr::lit_bool(true), loop_body)]))
}

/// The RLE fast path: when `point` is a single-ranger multiply-accumulate
/// reduction over a tensor whose format reports fill-run lengths, collapse
/// the whole run into one multiplication and skip the inner per-coordinate
/// load. Returns `None` when the point isn't eligible, leaving the caller
/// to fall back to [`lower_merge_point`].
pub fn try_rle_fast_path(
    lowerer: &Lowerer<'_>,
    point: &MergePoint,
    accumulator: Expr,
    constant_factor: Expr,
) -> LowerResult<Option<Stmt>> {
    if point.rangers.len() != 1 {
        return Ok(None);
    }
    let it = &point.rangers[0];
    let Some(run) = fill_region_length(lowerer, it, false) else {
        return Ok(None);
    };
    let Some(run_len) = run.results.first().cloned() else {
        return Ok(None);
    };
    let Some(tensor_id) = it.tensor else { return Ok(None) };
    let tensor = lowerer.tensor(tensor_id);
    let fill = crate::fill_region::literal_to_expr(tensor.fill_value());
    let collapsed = apply_rle_dense_reduction(run_len, constant_factor, fill);
    Ok(Some(Stmt::blanks([run.stmt, Stmt::assign(accumulator.clone(), Expr::add(accumulator, collapsed))])))
}

/// Whether `expr` is a pure multiply reduction (`a(i) * b(i)`-shaped),
/// used to decide if `try_rle_fast_path` even applies before computing the
/// fill-region length.
pub fn is_multiply_reduction(expr: &IndexExpr) -> bool {
    matches!(expr, IndexExpr::Mul(_, _) | IndexExpr::Annihilator(_, _))
}

//! Assembly lowering (`spec.md` §4.6): constructs a result's mode arrays
//! (the append-path bookkeeping for formats with `hasAppend`) separately
//! from computing its values, per the `assemble`/`compute` split in
//! [`crate::config::LowerConfig`].

use rustc_hash::FxHashMap;
use tensorlower_ir::{
    BinaryOp, Datatype, Expr, ExprKind, LowerResult, ModeFuncContext, ModeIterator, Stmt, TensorId,
    TensorRole, TensorVar, Var,
};

use crate::state::Lowerer;

/// The capacity every append-mode result array starts out with, doubled by
/// [`grow_capacity_if_full`] whenever an append would overflow it
/// (`spec.md` §5's resource discipline).
pub const INITIAL_CAPACITY: i64 = 16;

fn as_var(expr: &Expr) -> Option<Var> {
    match expr.kind() {
        ExprKind::Var(v) => Some(v.clone()),
        _ => None,
    }
}

/// Declares a capacity variable and allocates the backing arrays for every
/// append-mode level (and the values array) of every result tensor, run
/// once in the function header before any assembly/compute work
/// (`spec.md` §4.1 step 5, `initResultArrays`).
pub fn init_result_arrays(lowerer: &Lowerer<'_>, tensors: &FxHashMap<TensorId, TensorVar>) -> Stmt {
    let mut results: Vec<&TensorVar> = tensors.values().filter(|t| t.role() == TensorRole::Result).collect();
    results.sort_by_key(|t| t.declared_order());

    let mut stmts = Vec::new();
    for tensor in results {
        let mut any_append = false;
        for level in 0..tensor.order() {
            if !tensor.format_at(level).capabilities().has_append() {
                continue;
            }
            any_append = true;
            let cap = lowerer.capacity_var(tensor.id(), level as u32);
            stmts.push(Stmt::var_decl(cap.clone(), Some(Expr::lit_int(INITIAL_CAPACITY))));
            stmts.push(Stmt::allocate(
                Var::new_ptr(format!("{}_pos{}", tensor.name(), level), Datatype::Int64),
                Expr::var(cap.clone()),
                false,
            ));
            stmts.push(Stmt::allocate(
                Var::new_ptr(format!("{}_crd{}", tensor.name(), level), Datatype::Int32),
                Expr::var(cap),
                false,
            ));
        }
        if any_append {
            let values_cap = lowerer.capacity_var(tensor.id(), tensor.order() as u32);
            stmts.push(Stmt::var_decl(values_cap.clone(), Some(Expr::lit_int(INITIAL_CAPACITY))));
            stmts.push(Stmt::allocate(
                Var::new_ptr(format!("{}_vals", tensor.name()), tensor.datatype()),
                Expr::var(values_cap),
                false,
            ));
        }
    }
    Stmt::block(stmts)
}

/// Reallocates every array [`init_result_arrays`] allocated down to
/// whatever capacity its growth settled on, so the caller never sees
/// arrays larger than the lowerer actually grew them to. A tensor whose
/// append count never doubled its capacity gets a same-size realloc,
/// which backends are expected to treat as a no-op.
pub fn finalize_result_arrays(lowerer: &Lowerer<'_>, tensors: &FxHashMap<TensorId, TensorVar>) -> Stmt {
    let mut results: Vec<&TensorVar> = tensors.values().filter(|t| t.role() == TensorRole::Result).collect();
    results.sort_by_key(|t| t.declared_order());

    let mut stmts = Vec::new();
    for tensor in results {
        let mut any_append = false;
        for level in 0..tensor.order() {
            if !tensor.format_at(level).capabilities().has_append() {
                continue;
            }
            any_append = true;
            let cap = lowerer.capacity_var(tensor.id(), level as u32);
            stmts.push(Stmt::allocate(
                Var::new_ptr(format!("{}_pos{}", tensor.name(), level), Datatype::Int64),
                Expr::var(cap.clone()),
                true,
            ));
            stmts.push(Stmt::allocate(
                Var::new_ptr(format!("{}_crd{}", tensor.name(), level), Datatype::Int32),
                Expr::var(cap),
                true,
            ));
        }
        if any_append {
            let values_cap = lowerer.capacity_var(tensor.id(), tensor.order() as u32);
            stmts.push(Stmt::allocate(
                Var::new_ptr(format!("{}_vals", tensor.name()), tensor.datatype()),
                Expr::var(values_cap),
                true,
            ));
        }
    }
    Stmt::block(stmts)
}

/// Doubles a level's capacity (and reallocates its pos/coord arrays) right
/// before an append that would otherwise overflow it. A no-op for formats
/// that don't append, or whose arrays aren't plain named pointers.
pub fn grow_capacity_if_full(lowerer: &Lowerer<'_>, it: &ModeIterator) -> Stmt {
    if !it.caps().has_append() {
        return Stmt::no_op();
    }
    let Some(tensor_id) = it.tensor else { return Stmt::no_op() };
    let cap = lowerer.capacity_var(tensor_id, it.level);
    let full = Expr::binary(BinaryOp::Gte, it.pos_var.clone(), Expr::var(cap.clone()));
    let doubled = Expr::mul(Expr::var(cap.clone()), Expr::lit_int(2));

    let mut grow = vec![Stmt::assign(Expr::var(cap.clone()), doubled)];
    if let Some(pos_var) = it.arrays.pos.as_ref().and_then(as_var) {
        grow.push(Stmt::allocate(pos_var, Expr::var(cap.clone()), true));
    }
    if let Some(crd_var) = it.arrays.crd.as_ref().and_then(as_var) {
        grow.push(Stmt::allocate(crd_var, Expr::var(cap.clone()), true));
    }
    if let Some(values_var) = as_var(&it.arrays.values) {
        grow.push(Stmt::allocate(values_var, Expr::var(cap), true));
    }
    Stmt::if_then(full, Stmt::block(grow))
}

/// Appends the current coordinate to a result level's mode arrays via its
/// format's `append_coord`/`get_append_coord` hook, and advances the
/// level's running append position. Grows the level's capacity first when
/// the append would otherwise overflow it.
pub fn lower_assemble_append(lowerer: &Lowerer<'_>, it: &ModeIterator) -> LowerResult<Stmt> {
    let Some(tensor_id) = it.tensor else { return Ok(Stmt::no_op()) };
    let tensor = lowerer.tensor(tensor_id);
    let format = tensor.format_at(it.level as usize);
    let ctx = ModeFuncContext {
        pos_var: it.pos_var.clone(),
        parent_pos_var: it.parent.as_ref().map_or_else(|| Expr::lit_int(0), |p| p.pos_var.clone()),
        coord_var: it.coord_var.clone(),
        arrays: it.arrays.clone(),
    };
    let grow = grow_capacity_if_full(lowerer, it);
    let result = format.append_coord(&ctx);
    let advance = Stmt::assign(it.pos_var.clone(), Expr::add(it.pos_var.clone(), Expr::lit_int(1)));
    Ok(Stmt::blanks([grow, result.stmt, advance]))
}

/// Wraps a result level's assembly body with its format's
/// `init_level`/`finalize_level` hooks, which set up and tear down
/// whatever bookkeeping the format needs across the whole append loop
/// (e.g. writing a final sentinel `pos` entry for a compressed level).
#[tracing::instrument(skip_all, level = "debug", fields(level = it.level))]
pub fn lower_assemble_level(lowerer: &Lowerer<'_>, it: &ModeIterator, body: Stmt) -> Stmt {
    let Some(tensor_id) = it.tensor else { return body };
    let tensor = lowerer.tensor(tensor_id);
    let format = tensor.format_at(it.level as usize);
    let ctx = ModeFuncContext {
        pos_var: it.pos_var.clone(),
        parent_pos_var: it.parent.as_ref().map_or_else(|| Expr::lit_int(0), |p| p.pos_var.clone()),
        coord_var: it.coord_var.clone(),
        arrays: it.arrays.clone(),
    };
    Stmt::blanks([format.init_level(&ctx), body, format.finalize_level(&ctx)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use tensorlower_ir::{
        builtin_formats::CompressedFormat, Datatype, IndexVarId, IteratorCaps, ModeArrays,
        ProvenanceGraph, TensorId, TensorVar, Var,
    };
    use std::rc::Rc;

    use crate::config::LowerConfig;

    #[test]
    fn assemble_append_advances_position() {
        let provenance = ProvenanceGraph::new();
        let mut tensors = FxHashMap::default();
        let id = TensorId::new(0);
        tensors.insert(
            id,
            TensorVar::new(
                id,
                "b",
                Datatype::Float64,
                vec![Rc::new(CompressedFormat) as Rc<dyn tensorlower_ir::ModeFormat>],
                tensorlower_ir::Literal::Float(0.0),
            ),
        );
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let it = ModeIterator {
            tensor: Some(id),
            index_var: IndexVarId::new(0),
            level: 0,
            caps: IteratorCaps::HAS_POS_ITER | IteratorCaps::HAS_APPEND,
            parent: None,
            window: None,
            index_set: None,
            arrays: ModeArrays {
                pos: Some(Expr::var(Var::new_ptr("pos", Datatype::Int64))),
                crd: Some(Expr::var(Var::new_ptr("crd", Datatype::Int32))),
                values: Expr::var(Var::new_ptr("vals", Datatype::Float64)),
            },
            pos_var: Expr::var(Var::new("p0", Datatype::Int64)),
            end_var: Expr::var(Var::new("pend0", Datatype::Int64)),
            coord_var: Expr::var(Var::new("i0", Datatype::Int32)),
        };
        let stmt = lower_assemble_append(&lowerer, &it).unwrap_or_else(|e| panic!("{e}"));
        assert!(!matches!(stmt.kind(), tensorlower_ir::StmtKind::NoOp));
    }
}

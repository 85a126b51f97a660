//! `where` lowering (`spec.md` §4.5): a producer computes into a temporary,
//! a consumer reads from it. This module owns the temporary's allocation,
//! the dense-accelerator guard/index-list bookkeeping, and the zeroing
//! loop run before each producer iteration.

use tensorlower_ir::{Datatype, Expr, LowerResult, Stmt, TensorId, Var};

use crate::state::{Lowerer, WorkspaceInfo};

/// `getTemporarySize`: the size expression used both at the temporary's
/// allocation site and as the zeroing-loop bound. Pulled out as its own
/// function because both call sites need the identical expression: if
/// they diverged, the guard array and values array could end up sized
/// differently.
pub fn get_temporary_size(dimension: Expr) -> Expr {
    dimension
}

/// Declares a temporary's backing storage. `dense_accelerated` selects the
/// bit-guard + index-list strategy (`spec.md` §4.5's "Sparse accelerator
/// workspaces"); otherwise the temporary is a plain dense buffer with no
/// extra bookkeeping.
pub fn declare_temporary(
    lowerer: &Lowerer<'_>,
    temporary: TensorId,
    dimension: Expr,
    value_datatype: Datatype,
    dense_accelerated: bool,
) -> (WorkspaceInfo, Stmt) {
    let size = get_temporary_size(dimension);
    let values_array = lowerer.fresh_ptr_var("ws_vals", value_datatype);
    let mut decls = vec![Stmt::allocate(values_array.clone(), size.clone(), false)];

    let (guard_array, index_list, index_list_size) = if dense_accelerated {
        let guard = lowerer.fresh_ptr_var("ws_guard", Datatype::Bool);
        let list = lowerer.fresh_ptr_var("ws_idx", Datatype::Int32);
        let list_size = lowerer.fresh_var("ws_idx_size", Datatype::Int64);
        decls.push(Stmt::allocate(guard.clone(), size.clone(), false));
        decls.push(Stmt::allocate(list.clone(), size.clone(), false));
        decls.push(Stmt::var_decl(list_size.clone(), Some(Expr::lit_int(0))));
        (Some(guard), Some(list), Some(list_size))
    } else {
        (None, None, None)
    };

    let info = WorkspaceInfo {
        dense_accelerated,
        guard_array,
        index_list,
        index_list_size,
        values_array,
        size,
    };
    (info, Stmt::block(decls))
}

/// Zeros only the entries touched in the previous producer iteration,
/// using the dense accelerator's index list rather than a full-extent
/// zeroing loop (`spec.md` §4.5).
pub fn zero_touched_entries(info: &WorkspaceInfo) -> Stmt {
    let (Some(guard), Some(list), Some(list_size)) =
        (&info.guard_array, &info.index_list, &info.index_list_size)
    else {
        return Stmt::no_op();
    };
    let loop_var = Var::new("z", Datatype::Int64);
    let coord = Expr::load(Expr::var(list.clone()), Expr::var(loop_var.clone()));
    let body = Stmt::block(vec![
        Stmt::store(Expr::var(guard.clone()), coord.clone(), Expr::lit_bool(false)),
        Stmt::store(Expr::var(info.values_array.clone()), coord, Expr::lit_float(0.0)),
    ]);
    let reset = Stmt::assign(Expr::var(list_size.clone()), Expr::lit_int(0));
    Stmt::blanks([
        Stmt::for_loop(
            loop_var,
            Expr::lit_int(0),
            Expr::var(list_size.clone()),
            Expr::lit_int(1),
            tensorlower_ir::LoopKind::Serial,
            tensorlower_ir::ParallelUnit::NotParallel,
            body,
        ),
        reset,
    ])
}

/// Lowers a `where consumer producer` pair: emits the temporary
/// declaration, the producer body, the zeroing bookkeeping, and the
/// consumer body in sequence.
#[tracing::instrument(skip_all, level = "debug")]
pub fn lower_where(
    temporary_decl: Stmt,
    producer_body: Stmt,
    zero_stmt: Stmt,
    consumer_body: Stmt,
) -> LowerResult<Stmt> {
    Ok(Stmt::blanks([temporary_decl, producer_body, zero_stmt, consumer_body]))
}

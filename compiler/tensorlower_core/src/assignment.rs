//! Assignment lowering (`spec.md` §4.4): turns `lhs(...) [+=|=] rhs` into a
//! store (or load-add-store, for a reduction) at the result iterator's
//! current position.

use tensorlower_ir::{Access, Expr, LowerError, LowerResult, Property, ReduceOp, Stmt};

use crate::expr::{lower_expr, IteratorScope};
use crate::state::Lowerer;

pub fn lower_assignment(
    lowerer: &Lowerer<'_>,
    lhs: &Access,
    rhs: &tensorlower_ir::IndexExpr,
    reduce: Option<ReduceOp>,
    scope: &IteratorScope<'_>,
) -> LowerResult<Stmt> {
    let rhs_value = lower_expr(lowerer, rhs, scope)?;
    let result_it = scope.get(&lhs.tensor).ok_or_else(|| {
        LowerError::internal("lower_assignment", format!("no result iterator for tensor {:?}", lhs.tensor))
    })?;
    let values = Expr::get_property(result_it.arrays.values.clone(), Property::Values, None);
    let target = Expr::load(values.clone(), result_it.pos_var.clone());

    let value = match reduce {
        None => rhs_value,
        Some(op) => apply_reduce(op, target, rhs_value),
    };
    let store = if lowerer.is_marking_atomic() {
        Stmt::atomic_store(values.clone(), result_it.pos_var.clone(), value.clone())
    } else {
        Stmt::store(values.clone(), result_it.pos_var.clone(), value.clone())
    };

    if reduce == Some(ReduceOp::Mul) {
        // A multiply-reduction's annihilator is 0: once the running product
        // hits it, no later factor can move it away from 0, so the loop can
        // stop early.
        let reloaded = Expr::load(values, result_it.pos_var.clone());
        let guard = Expr::eq(reloaded, Expr::lit_float(0.0));
        return Ok(Stmt::blanks([store, Stmt::if_then(guard, Stmt::break_loop())]));
    }
    Ok(store)
}

fn apply_reduce(op: ReduceOp, accumulator: Expr, increment: Expr) -> Expr {
    use tensorlower_ir::BinaryOp;
    let bin_op = match op {
        ReduceOp::Add => BinaryOp::Add,
        ReduceOp::Mul => BinaryOp::Mul,
        ReduceOp::Max => return Expr::max(vec![accumulator, increment]),
        ReduceOp::Min => return Expr::min(vec![accumulator, increment]),
        ReduceOp::BitAnd => BinaryOp::BitAnd,
        ReduceOp::BitOr => BinaryOp::BitOr,
    };
    Expr::binary(bin_op, accumulator, increment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;
    use smallvec::smallvec;
    use tensorlower_ir::{
        Datatype, IndexExpr, IndexVarId, IteratorCaps, LiteralExpr, Literal, ModeArrays,
        ModeIterator, ProvenanceGraph, TensorId, Var,
    };

    use crate::config::LowerConfig;

    fn result_iter() -> ModeIterator {
        ModeIterator {
            tensor: Some(TensorId::new(0)),
            index_var: IndexVarId::new(0),
            level: 0,
            caps: IteratorCaps::IS_FULL,
            parent: None,
            window: None,
            index_set: None,
            arrays: ModeArrays { pos: None, crd: None, values: Expr::var(Var::new_ptr("result_vals", Datatype::Float64)) },
            pos_var: Expr::var(Var::new("rp0", Datatype::Int64)),
            end_var: Expr::var(Var::new("rpend0", Datatype::Int64)),
            coord_var: Expr::var(Var::new("ri0", Datatype::Int32)),
        }
    }

    #[test]
    fn plain_assignment_stores_rhs_directly() {
        let provenance = ProvenanceGraph::new();
        let tensors = FxHashMap::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let tensor = TensorId::new(0);
        let it = result_iter();
        let mut scope = IteratorScope::default();
        scope.insert(tensor, &it);

        let lhs = Access::new(tensor, smallvec![IndexVarId::new(0)]);
        let rhs = IndexExpr::Literal(LiteralExpr { value: Literal::Float(2.0), datatype: Datatype::Float64 });
        let stmt = lower_assignment(&lowerer, &lhs, &rhs, None, &scope).unwrap_or_else(|e| panic!("{e}"));
        match stmt.kind() {
            tensorlower_ir::StmtKind::Store { value, .. } => assert_eq!(*value, Expr::lit_float(2.0)),
            other => panic!("expected Store, got {other:?}"),
        }
    }

    #[test]
    fn reduce_add_wraps_rhs_in_binary_add() {
        let provenance = ProvenanceGraph::new();
        let tensors = FxHashMap::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let tensor = TensorId::new(0);
        let it = result_iter();
        let mut scope = IteratorScope::default();
        scope.insert(tensor, &it);

        let lhs = Access::new(tensor, smallvec![IndexVarId::new(0)]);
        let rhs = IndexExpr::Literal(LiteralExpr { value: Literal::Float(2.0), datatype: Datatype::Float64 });
        let stmt =
            lower_assignment(&lowerer, &lhs, &rhs, Some(ReduceOp::Add), &scope).unwrap_or_else(|e| panic!("{e}"));
        match stmt.kind() {
            tensorlower_ir::StmtKind::Store { value, .. } => {
                assert!(matches!(value.kind(), tensorlower_ir::ExprKind::Binary { op: tensorlower_ir::BinaryOp::Add, .. }));
            }
            other => panic!("expected Store, got {other:?}"),
        }
    }

    #[test]
    fn reduce_mul_appends_annihilator_break() {
        let provenance = ProvenanceGraph::new();
        let tensors = FxHashMap::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let tensor = TensorId::new(0);
        let it = result_iter();
        let mut scope = IteratorScope::default();
        scope.insert(tensor, &it);

        let lhs = Access::new(tensor, smallvec![IndexVarId::new(0)]);
        let rhs = IndexExpr::Literal(LiteralExpr { value: Literal::Float(2.0), datatype: Datatype::Float64 });
        let stmt =
            lower_assignment(&lowerer, &lhs, &rhs, Some(ReduceOp::Mul), &scope).unwrap_or_else(|e| panic!("{e}"));
        match stmt.kind() {
            tensorlower_ir::StmtKind::Block(stmts) => {
                assert_eq!(stmts.len(), 2);
                assert!(matches!(stmts[0].kind(), tensorlower_ir::StmtKind::Store { .. }));
                match stmts[1].kind() {
                    tensorlower_ir::StmtKind::IfThenElse { then_branch, .. } => {
                        assert!(matches!(then_branch.kind(), tensorlower_ir::StmtKind::Break));
                    }
                    other => panic!("expected if-then, got {other:?}"),
                }
            }
            other => panic!("expected block, got {other:?}"),
        }
    }
}

//! The expression lowerer: turns an `IndexExpr` into an `ir::Expr`, given
//! the set of `ModeIterator`s currently in scope for each operand access.

use rustc_hash::FxHashMap;
use tensorlower_ir::{
    Access, BinaryOp, Datatype, Expr, IndexExpr, Literal, LiteralExpr, LowerError, LowerResult,
    ModeIterator, Property, TensorId, UnaryOp,
};
use tensorlower_stack::ensure_sufficient_stack;

use crate::state::Lowerer;

/// Maps each access's tensor to the leaf iterator currently providing its
/// value/coordinate, so `lower_expr` can turn an `AccessExpr` into a
/// `values[pos]` load.
pub type IteratorScope<'a> = FxHashMap<TensorId, &'a ModeIterator>;

pub fn lower_expr(lowerer: &Lowerer<'_>, expr: &IndexExpr, scope: &IteratorScope<'_>) -> LowerResult<Expr> {
    ensure_sufficient_stack(|| lower_expr_inner(lowerer, expr, scope))
}

fn lower_expr_inner(lowerer: &Lowerer<'_>, expr: &IndexExpr, scope: &IteratorScope<'_>) -> LowerResult<Expr> {
    match expr {
        IndexExpr::AccessExpr(access) => lower_access(lowerer, access, scope),
        IndexExpr::Literal(lit) => lower_literal(*lit),
        IndexExpr::Neg(inner) => {
            let value = lower_expr_inner(lowerer, inner, scope)?;
            Ok(Expr::unary(UnaryOp::Neg, value))
        }
        IndexExpr::Add(l, r) => lower_binary(lowerer, l, r, scope, BinaryOp::Add),
        IndexExpr::Sub(l, r) => lower_binary(lowerer, l, r, scope, BinaryOp::Sub),
        IndexExpr::Mul(l, r) | IndexExpr::Annihilator(l, r) => lower_binary(lowerer, l, r, scope, BinaryOp::Mul),
        IndexExpr::Div(l, r) => lower_binary(lowerer, l, r, scope, BinaryOp::Div),
        IndexExpr::Cast { datatype, value } => {
            let inner = lower_expr_inner(lowerer, value, scope)?;
            Ok(Expr::cast(*datatype, inner))
        }
        IndexExpr::Call { func, args } => {
            let mut lowered = Vec::with_capacity(args.len());
            for a in args {
                lowered.push(lower_expr_inner(lowerer, a, scope)?);
            }
            Ok(Expr::call(func.as_str(), lowered))
        }
        IndexExpr::IndexVar(var) => lower_index_var(*var, scope),
        IndexExpr::Sqrt(operand) => {
            let value = lower_expr_inner(lowerer, operand, scope)?;
            Ok(Expr::call("sqrt", vec![value]))
        }
        IndexExpr::CallIntrinsic { name, args } => {
            let mut lowered = Vec::with_capacity(args.len());
            for a in args {
                lowered.push(lower_expr_inner(lowerer, a, scope)?);
            }
            Ok(Expr::call(name.as_str(), lowered))
        }
        IndexExpr::Reduction { op, operand } => {
            let value = lower_expr_inner(lowerer, operand, scope)?;
            Ok(apply_reduction_op(*op, value.clone(), value))
        }
    }
}

/// Folds a value against itself via a reduction op, the same mapping
/// [`crate::assignment::lower_assignment`] uses for a `forall`'s own
/// `reduce` tag; this covers a [`IndexExpr::Reduction`] node appearing
/// inside concrete notation instead.
fn apply_reduction_op(op: tensorlower_ir::ReduceOp, accumulator: Expr, increment: Expr) -> Expr {
    use tensorlower_ir::ReduceOp;
    match op {
        ReduceOp::Add => Expr::binary(BinaryOp::Add, accumulator, increment),
        ReduceOp::Mul => Expr::binary(BinaryOp::Mul, accumulator, increment),
        ReduceOp::Max => Expr::max(vec![accumulator, increment]),
        ReduceOp::Min => Expr::min(vec![accumulator, increment]),
        ReduceOp::BitAnd => Expr::binary(BinaryOp::BitAnd, accumulator, increment),
        ReduceOp::BitOr => Expr::binary(BinaryOp::BitOr, accumulator, increment),
    }
}

/// Resolves an index variable's current coordinate by finding the iterator
/// in scope whose `index_var` matches: each `ModeIterator`'s `coord_var`
/// holds the merged coordinate for the index variable it iterates.
fn lower_index_var(var: tensorlower_ir::IndexVarId, scope: &IteratorScope<'_>) -> LowerResult<Expr> {
    scope
        .values()
        .find(|it| it.index_var == var)
        .map(|it| it.coord_var.clone())
        .ok_or_else(|| LowerError::internal("lower_index_var", format!("no iterator in scope for index var {var:?}")))
}

fn lower_binary(
    lowerer: &Lowerer<'_>,
    l: &IndexExpr,
    r: &IndexExpr,
    scope: &IteratorScope<'_>,
    op: BinaryOp,
) -> LowerResult<Expr> {
    let lhs = lower_expr_inner(lowerer, l, scope)?;
    let rhs = lower_expr_inner(lowerer, r, scope)?;
    Ok(Expr::binary(op, lhs, rhs))
}

fn lower_access(lowerer: &Lowerer<'_>, access: &Access, scope: &IteratorScope<'_>) -> LowerResult<Expr> {
    let tensor = lowerer.tensor(access.tensor);
    let it = scope.get(&access.tensor).ok_or_else(|| {
        LowerError::internal(
            "lower_access",
            format!("no iterator in scope for tensor {:?}", access.tensor),
        )
    })?;
    let values = Expr::get_property(it.arrays.values.clone(), Property::Values, None);
    let _ = tensor;
    Ok(Expr::load(values, it.pos_var.clone()))
}

fn lower_literal(lit: LiteralExpr) -> LowerResult<Expr> {
    check_literal_datatype(lit.datatype)?;
    match (lit.value, lit.datatype) {
        (Literal::Bool(b), _) => Ok(Expr::lit_bool(b)),
        (Literal::Int(i), _) => Ok(Expr::lit_int(i)),
        (Literal::UInt(u), _) => Ok(Expr::lit_uint(u)),
        (Literal::Float(f), _) => Ok(Expr::lit_float(f)),
    }
}

/// Datatypes this lowerer accepts for a literal. Called before
/// `lower_literal` when the caller's front-end hands over a raw value
/// outside the `Literal` enum's representable range (e.g. a 128-bit
/// integer), so the failure is reported as `UnsupportedDatatype` rather
/// than panicking deep inside expression lowering.
pub fn check_literal_datatype(datatype: Datatype) -> LowerResult<()> {
    match datatype {
        Datatype::Bool
        | Datatype::Int8
        | Datatype::Int16
        | Datatype::Int32
        | Datatype::Int64
        | Datatype::UInt8
        | Datatype::UInt16
        | Datatype::UInt32
        | Datatype::UInt64
        | Datatype::Float32
        | Datatype::Float64 => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap as Map;
    use tensorlower_ir::{IndexVarId, ModeArrays, Var};

    use crate::config::LowerConfig;
    use tensorlower_ir::ProvenanceGraph;

    fn leaf_iter(tensor: TensorId) -> ModeIterator {
        ModeIterator {
            tensor: Some(tensor),
            index_var: IndexVarId::new(0),
            level: 0,
            caps: tensorlower_ir::IteratorCaps::IS_FULL,
            parent: None,
            window: None,
            index_set: None,
            arrays: ModeArrays { pos: None, crd: None, values: Expr::var(Var::new_ptr("vals", Datatype::Float64)) },
            pos_var: Expr::var(Var::new("p0", Datatype::Int64)),
            end_var: Expr::var(Var::new("pend0", Datatype::Int64)),
            coord_var: Expr::var(Var::new("i0", Datatype::Int32)),
        }
    }

    #[test]
    fn literal_lowers_to_matching_ir_literal() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let scope = IteratorScope::default();
        let lit = IndexExpr::Literal(LiteralExpr { value: Literal::Int(7), datatype: Datatype::Int32 });
        let result = lower_expr(&lowerer, &lit, &scope).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(result, Expr::lit_int(7));
    }

    #[test]
    fn add_lowers_to_binary_add() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let tensor = TensorId::new(0);
        let it = leaf_iter(tensor);
        let mut scope = IteratorScope::default();
        scope.insert(tensor, &it);

        let access = IndexExpr::AccessExpr(Access::new(tensor, smallvec::smallvec![IndexVarId::new(0)]));
        let expr = IndexExpr::Add(Box::new(access.clone()), Box::new(access));
        let result = lower_expr(&lowerer, &expr, &scope).unwrap_or_else(|e| panic!("{e}"));
        match result.kind() {
            tensorlower_ir::ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Add),
            other => panic!("expected binary add, got {other:?}"),
        }
    }

    #[test]
    fn index_var_resolves_to_the_matching_iterators_coord() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let tensor = TensorId::new(0);
        let it = leaf_iter(tensor);
        let mut scope = IteratorScope::default();
        scope.insert(tensor, &it);

        let expr = IndexExpr::IndexVar(IndexVarId::new(0));
        let result = lower_expr(&lowerer, &expr, &scope).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(result, it.coord_var);
    }

    #[test]
    fn index_var_with_no_matching_iterator_errors() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let scope = IteratorScope::default();

        let expr = IndexExpr::IndexVar(IndexVarId::new(5));
        assert!(lower_expr(&lowerer, &expr, &scope).is_err());
    }

    #[test]
    fn sqrt_lowers_to_a_sqrt_call() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let scope = IteratorScope::default();

        let lit = IndexExpr::Literal(LiteralExpr { value: Literal::Float(4.0), datatype: Datatype::Float64 });
        let expr = IndexExpr::Sqrt(Box::new(lit));
        let result = lower_expr(&lowerer, &expr, &scope).unwrap_or_else(|e| panic!("{e}"));
        match result.kind() {
            tensorlower_ir::ExprKind::Call { func, args } => {
                assert_eq!(func.as_ref(), "sqrt");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn call_intrinsic_lowers_with_its_own_name_and_args() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let scope = IteratorScope::default();

        let a = IndexExpr::Literal(LiteralExpr { value: Literal::Float(1.0), datatype: Datatype::Float64 });
        let b = IndexExpr::Literal(LiteralExpr { value: Literal::Float(2.0), datatype: Datatype::Float64 });
        let expr = IndexExpr::CallIntrinsic { name: "pow".into(), args: vec![a, b] };
        let result = lower_expr(&lowerer, &expr, &scope).unwrap_or_else(|e| panic!("{e}"));
        match result.kind() {
            tensorlower_ir::ExprKind::Call { func, args } => {
                assert_eq!(func.as_ref(), "pow");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn reduction_folds_the_operand_against_itself() {
        let provenance = ProvenanceGraph::new();
        let tensors = Map::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let scope = IteratorScope::default();

        let lit = IndexExpr::Literal(LiteralExpr { value: Literal::Float(3.0), datatype: Datatype::Float64 });
        let expr = IndexExpr::Reduction { op: tensorlower_ir::ReduceOp::Add, operand: Box::new(lit) };
        let result = lower_expr(&lowerer, &expr, &scope).unwrap_or_else(|e| panic!("{e}"));
        match result.kind() {
            tensorlower_ir::ExprKind::Binary { op, lhs, rhs } => {
                assert_eq!(*op, BinaryOp::Add);
                assert_eq!(lhs, rhs);
            }
            other => panic!("expected binary add, got {other:?}"),
        }
    }
}

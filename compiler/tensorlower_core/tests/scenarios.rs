//! The seed scenario suite: SpMV, SpMSpV, elementwise add across differing
//! formats, a `where`-backed matrix multiply, windowed SpMV, and a
//! multiply-reduction with an annihilator early exit.
//!
//! Each test builds the minimal `IndexStmt` tree for its scenario by hand
//! (no parser or scheduler lives in this crate) and checks the shape of the
//! lowered `Stmt` tree rather than an exact byte-for-byte program, since the
//! concrete variable names are an implementation detail.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::smallvec;
use tensorlower_core::config::LowerConfig;
use tensorlower_core::lower;
use tensorlower_ir::builtin_formats::{CompressedFormat, DenseFormat};
use tensorlower_ir::{
    Access, AxisProjection, Datatype, Expr, ForallMeta, IndexExpr, IndexStmt, IndexVarId,
    LiteralExpr, Literal, ModeFormat, ProvenanceGraph, ReduceOp, StmtKind, TensorId, TensorRole,
    TensorVar, WindowBounds,
};

fn dense(dim: i64) -> Rc<dyn ModeFormat> {
    Rc::new(DenseFormat { dimension: Expr::lit_int(dim) })
}

fn compressed() -> Rc<dyn ModeFormat> {
    Rc::new(CompressedFormat)
}

fn count_for_loops(stmt: &tensorlower_ir::Stmt) -> usize {
    match stmt.kind() {
        StmtKind::For { body, .. } => 1 + count_for_loops(body),
        StmtKind::Block(stmts) => stmts.iter().map(count_for_loops).sum(),
        StmtKind::IfThenElse { then_branch, else_branch, .. } => {
            count_for_loops(then_branch) + else_branch.as_ref().map_or(0, count_for_loops)
        }
        StmtKind::Case { clauses, .. } => clauses.iter().map(|(_, s)| count_for_loops(s)).sum(),
        _ => 0,
    }
}

fn contains_case(stmt: &tensorlower_ir::Stmt) -> bool {
    match stmt.kind() {
        StmtKind::Case { .. } => true,
        StmtKind::Block(stmts) => stmts.iter().any(contains_case),
        StmtKind::For { body, .. } => contains_case(body),
        StmtKind::IfThenElse { then_branch, else_branch, .. } => {
            contains_case(then_branch) || else_branch.as_ref().is_some_and(contains_case)
        }
        _ => false,
    }
}

fn contains_break(stmt: &tensorlower_ir::Stmt) -> bool {
    match stmt.kind() {
        StmtKind::Break => true,
        StmtKind::Block(stmts) => stmts.iter().any(contains_break),
        StmtKind::For { body, .. } => contains_break(body),
        StmtKind::IfThenElse { then_branch, else_branch, .. } => {
            contains_break(then_branch) || else_branch.as_ref().is_some_and(contains_break)
        }
        StmtKind::Case { clauses, .. } => clauses.iter().any(|(_, s)| contains_break(s)),
        _ => false,
    }
}

/// SpMV (CSR A times dense x, into dense y): `y(i) = A(i,j) * x(j)`.
/// Expect a two-level nest: the outer dense loop over `i`, the inner
/// position loop over `A`'s compressed row.
#[test]
fn spmv_csr_dense_produces_nested_loops() {
    let mut tensors = FxHashMap::default();
    let a = TensorId::new(0);
    let x = TensorId::new(1);
    let y = TensorId::new(2);
    tensors.insert(
        a,
        TensorVar::new(a, "A", Datatype::Float64, vec![dense(8), compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 0),
    );
    tensors.insert(
        x,
        TensorVar::new(x, "x", Datatype::Float64, vec![dense(8)], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 1),
    );
    tensors.insert(
        y,
        TensorVar::new(y, "y", Datatype::Float64, vec![dense(8)], Literal::Float(0.0))
            .with_role(TensorRole::Result, 0),
    );

    let i = IndexVarId::new(0);
    let j = IndexVarId::new(1);
    let a_access = Access::new(a, smallvec![i, j]);
    let x_access = Access::new(x, smallvec![j]);
    let y_access = Access::new(y, smallvec![i]);

    let rhs = IndexExpr::Mul(
        Box::new(IndexExpr::AccessExpr(a_access)),
        Box::new(IndexExpr::AccessExpr(x_access)),
    );
    let inner = IndexStmt::Forall {
        var: j,
        body: Box::new(IndexStmt::Assignment { lhs: y_access, rhs: Box::new(rhs), reduce: Some(ReduceOp::Add) }),
        meta: ForallMeta::default(),
    };
    let outer = IndexStmt::Forall { var: i, body: Box::new(inner), meta: ForallMeta::default() };

    let provenance = ProvenanceGraph::new();
    let func = lower("spmv", &outer, &tensors, &provenance, LowerConfig::default()).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(count_for_loops(&func.body), 2);
}

/// SpMSpV: `y(i) = A(i,j) * x(j)` with `x` itself sparse. The inner level
/// now merges two sparse operands, which should pick the general-merge
/// shape and emit a case tree rather than a single position loop.
#[test]
fn spmspv_merges_two_sparse_operands() {
    let mut tensors = FxHashMap::default();
    let a = TensorId::new(0);
    let x = TensorId::new(1);
    let y = TensorId::new(2);
    tensors.insert(
        a,
        TensorVar::new(a, "A", Datatype::Float64, vec![dense(8), compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 0),
    );
    tensors.insert(
        x,
        TensorVar::new(x, "x", Datatype::Float64, vec![compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 1),
    );
    tensors.insert(
        y,
        TensorVar::new(y, "y", Datatype::Float64, vec![dense(8)], Literal::Float(0.0))
            .with_role(TensorRole::Result, 0),
    );

    let i = IndexVarId::new(0);
    let j = IndexVarId::new(1);
    let a_access = Access::new(a, smallvec![i, j]);
    let x_access = Access::new(x, smallvec![j]);
    let y_access = Access::new(y, smallvec![i]);

    let rhs = IndexExpr::Mul(
        Box::new(IndexExpr::AccessExpr(a_access)),
        Box::new(IndexExpr::AccessExpr(x_access)),
    );
    let inner = IndexStmt::Forall {
        var: j,
        body: Box::new(IndexStmt::Assignment { lhs: y_access, rhs: Box::new(rhs), reduce: Some(ReduceOp::Add) }),
        meta: ForallMeta::default(),
    };
    let outer = IndexStmt::Forall { var: i, body: Box::new(inner), meta: ForallMeta::default() };

    let provenance = ProvenanceGraph::new();
    let func = lower("spmspv", &outer, &tensors, &provenance, LowerConfig::default()).unwrap_or_else(|e| panic!("{e}"));
    assert!(contains_case(&func.body));
}

/// Elementwise add of two differently-rooted sparse vectors into a sparse
/// result: `z(i) = a(i) + b(i)`. The disjunction lattice has three points
/// (both, only-a, only-b), so the lowered body should branch on a case tree.
#[test]
fn elementwise_add_differing_formats_has_case_tree() {
    let mut tensors = FxHashMap::default();
    let a = TensorId::new(0);
    let b = TensorId::new(1);
    let z = TensorId::new(2);
    tensors.insert(
        a,
        TensorVar::new(a, "a", Datatype::Float64, vec![compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 0),
    );
    tensors.insert(
        b,
        TensorVar::new(b, "b", Datatype::Float64, vec![compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 1),
    );
    tensors.insert(
        z,
        TensorVar::new(z, "z", Datatype::Float64, vec![compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Result, 0),
    );

    let i = IndexVarId::new(0);
    let a_access = Access::new(a, smallvec![i]);
    let b_access = Access::new(b, smallvec![i]);
    let z_access = Access::new(z, smallvec![i]);

    let rhs = IndexExpr::Add(
        Box::new(IndexExpr::AccessExpr(a_access)),
        Box::new(IndexExpr::AccessExpr(b_access)),
    );
    let stmt = IndexStmt::Forall {
        var: i,
        body: Box::new(IndexStmt::Assignment { lhs: z_access, rhs: Box::new(rhs), reduce: None }),
        meta: ForallMeta::default(),
    };

    let provenance = ProvenanceGraph::new();
    let func = lower("add", &stmt, &tensors, &provenance, LowerConfig::default()).unwrap_or_else(|e| panic!("{e}"));
    assert!(contains_case(&func.body));
}

/// `C(i,j) = sum_k A(i,k) * B(k,j)` lowered through a dense row workspace
/// `w(j)`: a `where` wraps the `k`-reduction producer and the `j` consumer.
#[test]
fn matmul_through_dense_workspace_lowers() {
    let mut tensors = FxHashMap::default();
    let a = TensorId::new(0);
    let b = TensorId::new(1);
    let c = TensorId::new(2);
    let w = TensorId::new(3);
    tensors.insert(
        a,
        TensorVar::new(a, "A", Datatype::Float64, vec![dense(4), compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 0),
    );
    tensors.insert(
        b,
        TensorVar::new(b, "B", Datatype::Float64, vec![dense(4), dense(4)], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 1),
    );
    tensors.insert(
        c,
        TensorVar::new(c, "C", Datatype::Float64, vec![dense(4), compressed()], Literal::Float(0.0))
            .with_role(TensorRole::Result, 0),
    );
    tensors.insert(
        w,
        TensorVar::new(w, "w", Datatype::Float64, vec![dense(4)], Literal::Float(0.0))
            .with_role(TensorRole::Temporary, 0),
    );

    let i = IndexVarId::new(0);
    let j = IndexVarId::new(1);
    let k = IndexVarId::new(2);

    let producer_rhs = IndexExpr::Mul(
        Box::new(IndexExpr::AccessExpr(Access::new(a, smallvec![i, k]))),
        Box::new(IndexExpr::AccessExpr(Access::new(b, smallvec![k, j]))),
    );
    let producer = IndexStmt::Forall {
        var: k,
        body: Box::new(IndexStmt::Assignment {
            lhs: Access::new(w, smallvec![j]),
            rhs: Box::new(producer_rhs),
            reduce: Some(ReduceOp::Add),
        }),
        meta: ForallMeta::default(),
    };
    let consumer = IndexStmt::Forall {
        var: j,
        body: Box::new(IndexStmt::Assignment {
            lhs: Access::new(c, smallvec![i, j]),
            rhs: Box::new(IndexExpr::AccessExpr(Access::new(w, smallvec![j]))),
            reduce: None,
        }),
        meta: ForallMeta::default(),
    };
    let where_stmt = IndexStmt::Where { consumer: Box::new(consumer), producer: Box::new(producer), temporary: w };
    let stmt = IndexStmt::Forall { var: i, body: Box::new(where_stmt), meta: ForallMeta::default() };

    let provenance = ProvenanceGraph::new();
    let func = lower("matmul", &stmt, &tensors, &provenance, LowerConfig::default()).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(func.name.as_ref(), "matmul");
}

/// Windowed SpMV: `y(i) = A(i, j(2:6:2)) * x(j(2:6:2))`. The access carries
/// a `Windowed` projection on `j`; lowering should still succeed and the
/// window's extent/stride should remain visible on the access itself.
#[test]
fn windowed_spmv_lowers_with_projected_access() {
    let mut tensors = FxHashMap::default();
    let a = TensorId::new(0);
    let x = TensorId::new(1);
    let y = TensorId::new(2);
    tensors.insert(
        a,
        TensorVar::new(a, "A", Datatype::Float64, vec![dense(8), dense(8)], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 0),
    );
    tensors.insert(
        x,
        TensorVar::new(x, "x", Datatype::Float64, vec![dense(8)], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 1),
    );
    tensors.insert(
        y,
        TensorVar::new(y, "y", Datatype::Float64, vec![dense(8)], Literal::Float(0.0))
            .with_role(TensorRole::Result, 0),
    );

    let i = IndexVarId::new(0);
    let j = IndexVarId::new(1);
    let window = WindowBounds { lo: 2, hi: 6, stride: 2 };

    let mut a_access = Access::new(a, smallvec![i, j]);
    a_access.projections[1] = AxisProjection::Windowed(window);
    let mut x_access = Access::new(x, smallvec![j]);
    x_access.projections[0] = AxisProjection::Windowed(window);
    assert!(x_access.is_windowed_on(j));

    let y_access = Access::new(y, smallvec![i]);
    let rhs = IndexExpr::Mul(Box::new(IndexExpr::AccessExpr(a_access)), Box::new(IndexExpr::AccessExpr(x_access)));
    let inner = IndexStmt::Forall {
        var: j,
        body: Box::new(IndexStmt::Assignment { lhs: y_access, rhs: Box::new(rhs), reduce: Some(ReduceOp::Add) }),
        meta: ForallMeta::default(),
    };
    let outer = IndexStmt::Forall { var: i, body: Box::new(inner), meta: ForallMeta::default() };

    let provenance = ProvenanceGraph::new();
    let func =
        lower("windowed_spmv", &outer, &tensors, &provenance, LowerConfig::default()).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(count_for_loops(&func.body), 2);
}

/// `b = prod(a(i))` with a multiply reduction: the annihilator (0) guard
/// should appear as a `break` reachable from the reduction's loop body.
#[test]
fn multiply_reduction_emits_annihilator_break() {
    let mut tensors = FxHashMap::default();
    let a = TensorId::new(0);
    let b = TensorId::new(1);
    tensors.insert(
        a,
        TensorVar::new(a, "a", Datatype::Float64, vec![dense(16)], Literal::Float(0.0))
            .with_role(TensorRole::Argument, 0),
    );
    tensors.insert(
        b,
        TensorVar::new(b, "b", Datatype::Float64, vec![], Literal::Float(1.0)).with_role(TensorRole::Result, 0),
    );

    let i = IndexVarId::new(0);
    let a_access = Access::new(a, smallvec![i]);
    let b_access = Access::new(b, smallvec![]);

    let rhs = IndexExpr::AccessExpr(a_access);
    let stmt = IndexStmt::Forall {
        var: i,
        body: Box::new(IndexStmt::Assignment { lhs: b_access, rhs: Box::new(rhs), reduce: Some(ReduceOp::Mul) }),
        meta: ForallMeta::default(),
    };

    let provenance = ProvenanceGraph::new();
    let func = lower("prod", &stmt, &tensors, &provenance, LowerConfig::default()).unwrap_or_else(|e| panic!("{e}"));
    assert!(contains_break(&func.body));
}

/// A bare top-level assignment with no enclosing `forall` has nowhere to
/// source a result iterator from, so lowering should report an error
/// instead of panicking.
#[test]
fn scalar_literal_assignment_with_no_accesses_lowers() {
    let mut tensors = FxHashMap::default();
    let b = TensorId::new(0);
    tensors.insert(b, TensorVar::new(b, "b", Datatype::Float64, vec![], Literal::Float(0.0)));
    let lit = IndexExpr::Literal(LiteralExpr { value: Literal::Float(3.0), datatype: Datatype::Float64 });
    let stmt = IndexStmt::Assignment { lhs: Access::new(b, smallvec![]), rhs: Box::new(lit), reduce: None };

    let provenance = ProvenanceGraph::new();
    let result = lower("scalar", &stmt, &tensors, &provenance, LowerConfig::default());
    assert!(result.is_err(), "a bare top-level Assignment has no iterator scope yet, so this must be reported, not panic");
}

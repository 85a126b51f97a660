//! Index notation: `IndexStmt`/`IndexExpr`, the tagged-enum tree this crate
//! lowers, and the `Visitor` trait used to walk it.
//!
//! Construction and type-checking of this tree are external concerns: the
//! caller hands `lower()` an already-scheduled, already-checked statement.

use smallvec::SmallVec;

use crate::access::Access;
use crate::index_var::IndexVarId;
use crate::ir::Literal;
use crate::tensor_var::TensorId;

/// How a `forall`'s body updates its result component(s): used by the
/// forall lowerer to decide whether reduction-guard bookkeeping is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Mul,
    Max,
    Min,
    BitAnd,
    BitOr,
}

/// A scheduling hint attached to a `forall`. Schedule *construction* lives
/// outside this crate; these are read-only tags the forall lowerer
/// branches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ForallMeta {
    pub parallelize: bool,
    pub vectorize: bool,
    /// Unroll factor for `StaticChunked` loops; `1` means no unrolling.
    pub unroll: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexStmt {
    Forall {
        var: IndexVarId,
        body: Box<IndexStmt>,
        meta: ForallMeta,
    },
    Where {
        consumer: Box<IndexStmt>,
        producer: Box<IndexStmt>,
        temporary: TensorId,
    },
    Sequence {
        first: Box<IndexStmt>,
        second: Box<IndexStmt>,
    },
    Multi {
        stmts: Vec<IndexStmt>,
    },
    Assignment {
        lhs: Access,
        rhs: Box<IndexExpr>,
        reduce: Option<ReduceOp>,
    },
    /// Request to materialize assembly metadata (result mode arrays)
    /// without necessarily computing values, per `spec.md` §4.1's
    /// assemble/compute split.
    Assemble {
        target: TensorId,
        body: Box<IndexStmt>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexExpr {
    AccessExpr(Access),
    Literal(LiteralExpr),
    Neg(Box<IndexExpr>),
    Add(Box<IndexExpr>, Box<IndexExpr>),
    Sub(Box<IndexExpr>, Box<IndexExpr>),
    Mul(Box<IndexExpr>, Box<IndexExpr>),
    Div(Box<IndexExpr>, Box<IndexExpr>),
    /// A node that never produces a value for coordinates outside every
    /// operand's support: used for multiply-like ops whose identity is an
    /// annihilator (`spec.md` §4.3 "Explicit-zero cases").
    Annihilator(Box<IndexExpr>, Box<IndexExpr>),
    Cast {
        datatype: crate::ir::Datatype,
        value: Box<IndexExpr>,
    },
    /// A user-defined function call, lowered to `ir::ExprKind::Call`
    /// verbatim.
    Call {
        func: String,
        args: Vec<IndexExpr>,
    },
    /// A reference to the current value of an enclosing `forall`'s index
    /// variable, e.g. the `i` in `A(i) = i * 2`.
    IndexVar(IndexVarId),
    Sqrt(Box<IndexExpr>),
    /// A call to a lowerer-recognized intrinsic (`sqrt`, `abs`, ...),
    /// distinct from [`IndexExpr::Call`]'s opaque user functions: the
    /// lowerer may special-case these rather than passing them through.
    CallIntrinsic {
        name: String,
        args: Vec<IndexExpr>,
    },
    /// An explicit reduction over a sub-expression, used when a reduction
    /// appears inside concrete notation rather than as a `forall`'s
    /// `reduce` tag (e.g. nested inside a larger expression).
    Reduction {
        op: ReduceOp,
        operand: Box<IndexExpr>,
    },
}

/// A literal datatype tag kept separate from [`Literal`] because index
/// notation literals may be declared with a datatype wider than the value
/// strictly requires (e.g. a `0` meant as `Float64`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiteralExpr {
    pub value: Literal,
    pub datatype: crate::ir::Datatype,
}

/// Walks an `IndexStmt`/`IndexExpr` tree. Every method has a default no-op
/// body, matching the teacher's shape for this kind of tagged-enum
/// visitor: implementors override only the variants they care about and
/// call `walk_*` to recurse into children.
pub trait Visitor {
    fn visit_forall(&mut self, var: IndexVarId, body: &IndexStmt, meta: ForallMeta) {
        let _ = (var, meta);
        self.walk_stmt(body);
    }

    fn visit_where(&mut self, consumer: &IndexStmt, producer: &IndexStmt, temporary: TensorId) {
        let _ = temporary;
        self.walk_stmt(consumer);
        self.walk_stmt(producer);
    }

    fn visit_sequence(&mut self, first: &IndexStmt, second: &IndexStmt) {
        self.walk_stmt(first);
        self.walk_stmt(second);
    }

    fn visit_multi(&mut self, stmts: &[IndexStmt]) {
        for s in stmts {
            self.walk_stmt(s);
        }
    }

    fn visit_assignment(&mut self, lhs: &Access, rhs: &IndexExpr, reduce: Option<ReduceOp>) {
        let _ = (lhs, reduce);
        self.walk_expr(rhs);
    }

    fn visit_assemble(&mut self, target: TensorId, body: &IndexStmt) {
        let _ = target;
        self.walk_stmt(body);
    }

    fn visit_access(&mut self, access: &Access) {
        let _ = access;
    }

    fn visit_literal(&mut self, lit: LiteralExpr) {
        let _ = lit;
    }

    fn visit_binary_expr(&mut self, lhs: &IndexExpr, rhs: &IndexExpr) {
        self.walk_expr(lhs);
        self.walk_expr(rhs);
    }

    fn visit_index_var(&mut self, var: IndexVarId) {
        let _ = var;
    }

    fn visit_sqrt(&mut self, operand: &IndexExpr) {
        self.walk_expr(operand);
    }

    fn visit_call_intrinsic(&mut self, name: &str, args: &[IndexExpr]) {
        let _ = name;
        for a in args {
            self.walk_expr(a);
        }
    }

    fn visit_reduction(&mut self, op: ReduceOp, operand: &IndexExpr) {
        let _ = op;
        self.walk_expr(operand);
    }

    fn walk_stmt(&mut self, stmt: &IndexStmt) {
        match stmt {
            IndexStmt::Forall { var, body, meta } => self.visit_forall(*var, body, *meta),
            IndexStmt::Where { consumer, producer, temporary } => {
                self.visit_where(consumer, producer, *temporary);
            }
            IndexStmt::Sequence { first, second } => self.visit_sequence(first, second),
            IndexStmt::Multi { stmts } => self.visit_multi(stmts),
            IndexStmt::Assignment { lhs, rhs, reduce } => self.visit_assignment(lhs, rhs, *reduce),
            IndexStmt::Assemble { target, body } => self.visit_assemble(*target, body),
        }
    }

    fn walk_expr(&mut self, expr: &IndexExpr) {
        match expr {
            IndexExpr::AccessExpr(access) => self.visit_access(access),
            IndexExpr::Literal(lit) => self.visit_literal(*lit),
            IndexExpr::Neg(inner) => self.walk_expr(inner),
            IndexExpr::Add(l, r)
            | IndexExpr::Sub(l, r)
            | IndexExpr::Mul(l, r)
            | IndexExpr::Div(l, r)
            | IndexExpr::Annihilator(l, r) => self.visit_binary_expr(l, r),
            IndexExpr::Cast { value, .. } => self.walk_expr(value),
            IndexExpr::Call { args, .. } => {
                for a in args {
                    self.walk_expr(a);
                }
            }
            IndexExpr::IndexVar(var) => self.visit_index_var(*var),
            IndexExpr::Sqrt(operand) => self.visit_sqrt(operand),
            IndexExpr::CallIntrinsic { name, args } => self.visit_call_intrinsic(name, args),
            IndexExpr::Reduction { op, operand } => self.visit_reduction(*op, operand),
        }
    }
}

/// Every `Access` appearing anywhere in an expression, in tree order.
/// Used by merge-lattice construction to enumerate operand iterators.
pub fn collect_accesses(expr: &IndexExpr) -> SmallVec<[Access; 4]> {
    struct Collector(SmallVec<[Access; 4]>);
    impl Visitor for Collector {
        fn visit_access(&mut self, access: &Access) {
            self.0.push(access.clone());
        }
    }
    let mut c = Collector(SmallVec::new());
    c.walk_expr(expr);
    c.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Datatype;

    #[test]
    fn collect_accesses_finds_both_operands() {
        let a = Access::new(TensorId::new(0), SmallVec::from_slice(&[IndexVarId::new(0)]));
        let b = Access::new(TensorId::new(1), SmallVec::from_slice(&[IndexVarId::new(0)]));
        let expr = IndexExpr::Add(
            Box::new(IndexExpr::AccessExpr(a.clone())),
            Box::new(IndexExpr::AccessExpr(b.clone())),
        );
        let found = collect_accesses(&expr);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], a);
        assert_eq!(found[1], b);
    }

    #[test]
    fn visitor_default_walks_through_cast() {
        let lit = IndexExpr::Literal(LiteralExpr { value: Literal::Int(1), datatype: Datatype::Int32 });
        let casted = IndexExpr::Cast { datatype: Datatype::Float64, value: Box::new(lit) };
        let found = collect_accesses(&casted);
        assert!(found.is_empty());
    }
}

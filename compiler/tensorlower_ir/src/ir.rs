//! The imperative IR this crate lowers *into*.
//!
//! `Expr` and `Stmt` are `Rc`-shared immutable trees: lowering routinely
//! reuses the same subexpression in several places (a bound-check guard
//! repeated across `if` arms, a position variable read by both a loop
//! condition and its body), and cloning an `Rc` is a refcount bump rather
//! than a structural copy. Nothing in this module executes or simplifies
//! the IR it builds: `ir::simplify` and codegen are external collaborators.

use std::rc::Rc;

use smallvec::SmallVec;

/// Primitive scalar types carried by IR values and tensor components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Datatype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

/// A named IR variable. Two `Var`s are the same variable iff their names
/// are equal; the lowerer is responsible for not colliding names within a
/// function body.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: Rc<str>,
    pub datatype: Datatype,
    /// True for array-typed variables (`pos`, `crd`, `vals` buffers),
    /// false for scalar locals and loop indices.
    pub is_ptr: bool,
}

impl Var {
    pub fn new(name: impl Into<Rc<str>>, datatype: Datatype) -> Self {
        Var { name: name.into(), datatype, is_ptr: false }
    }

    pub fn new_ptr(name: impl Into<Rc<str>>, datatype: Datatype) -> Self {
        Var { name: name.into(), datatype, is_ptr: true }
    }
}

/// A scalar literal. There is deliberately no 128-bit integer variant:
/// literals of that width are rejected during expression lowering with
/// [`crate::error::LowerError::UnsupportedDatatype`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// The four tensor-property queries an `ir::Expr::GetProperty` can make of
/// a `TensorVar` at codegen time (`spec.md` §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Values,
    FillValue,
    FillRegion,
    /// The dimension size of one mode, identified by its level.
    Dimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// Shared, immutable expression node. Cloning is an `Rc` bump.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr(Rc<ExprKind>);

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Var(Var),
    Literal(Literal),
    GetProperty { tensor: Expr, property: Property, level: Option<u32> },
    Load { array: Expr, index: Expr },
    Cast { datatype: Datatype, value: Expr },
    Sizeof(Datatype),
    Unary { op: UnaryOp, value: Expr },
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    Min(Vec<Expr>),
    Max(Vec<Expr>),
    /// Least common multiple of two extents, used when merging strided
    /// iterators with differing strides.
    Lcm(Expr, Expr),
    Call { func: Rc<str>, args: Vec<Expr> },
}

impl std::ops::Deref for Expr {
    type Target = ExprKind;
    fn deref(&self) -> &ExprKind {
        &self.0
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr(Rc::new(kind))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    pub fn var(v: Var) -> Self {
        Expr::new(ExprKind::Var(v))
    }

    pub fn lit_bool(b: bool) -> Self {
        Expr::new(ExprKind::Literal(Literal::Bool(b)))
    }

    pub fn lit_int(i: i64) -> Self {
        Expr::new(ExprKind::Literal(Literal::Int(i)))
    }

    pub fn lit_uint(u: u64) -> Self {
        Expr::new(ExprKind::Literal(Literal::UInt(u)))
    }

    pub fn lit_float(f: f64) -> Self {
        Expr::new(ExprKind::Literal(Literal::Float(f)))
    }

    pub fn get_property(tensor: Expr, property: Property, level: Option<u32>) -> Self {
        Expr::new(ExprKind::GetProperty { tensor, property, level })
    }

    pub fn load(array: Expr, index: Expr) -> Self {
        Expr::new(ExprKind::Load { array, index })
    }

    pub fn cast(datatype: Datatype, value: Expr) -> Self {
        Expr::new(ExprKind::Cast { datatype, value })
    }

    pub fn unary(op: UnaryOp, value: Expr) -> Self {
        Expr::new(ExprKind::Unary { op, value })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::new(ExprKind::Binary { op, lhs, rhs })
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Lt, lhs, rhs)
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::And, lhs, rhs)
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Or, lhs, rhs)
    }

    pub fn min(args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Min(args))
    }

    pub fn max(args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Max(args))
    }

    pub fn call(func: impl Into<Rc<str>>, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call { func: func.into(), args })
    }
}

/// How a `for` loop should be executed. Pure data: this crate never
/// schedules or vectorizes anything itself, it only tags the loop with the
/// caller's intent (`spec.md` §4.2's six forall shapes each pick one).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Serial,
    Vectorized,
    Runtime,
    StaticChunked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParallelUnit {
    NotParallel,
    CpuThread,
    CpuVector,
    CpuWarp,
    GpuBlock,
    GpuThread,
}

/// Shared, immutable statement node.
#[derive(Clone, Debug, PartialEq)]
pub struct Stmt(Rc<StmtKind>);

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    /// A sequence of statements executed in order. `blanks()` composes
    /// header/init/body/finalize/footer sections this way (`spec.md` §5).
    Block(Vec<Stmt>),
    VarDecl { var: Var, value: Option<Expr> },
    Assign { lhs: Expr, rhs: Expr },
    /// `atomic` is set when this store races with other parallel-loop
    /// workers writing the same result entry (`spec.md` §5's Atomics race
    /// strategy), tagged by `Lowerer::is_marking_atomic`.
    Store { array: Expr, index: Expr, value: Expr, atomic: bool },
    For {
        var: Var,
        start: Expr,
        end: Expr,
        increment: Expr,
        kind: LoopKind,
        parallel_unit: ParallelUnit,
        body: Stmt,
    },
    While { cond: Expr, body: Stmt },
    IfThenElse { cond: Expr, then_branch: Stmt, else_branch: Option<Stmt> },
    /// A case tree: clauses are tested in order, first match wins. `exact`
    /// records whether the clauses are known to be exhaustive (lattice is
    /// exact, `spec.md` §4.3): when false, lowering must append a final
    /// catch-all else arm.
    Case { clauses: Vec<(Expr, Stmt)>, exact: bool },
    Function { name: Rc<str>, results: Vec<Var>, args: Vec<Var>, body: Stmt },
    Allocate { var: Var, size: Expr, is_realloc: bool },
    Free { var: Var },
    Call { func: Rc<str>, args: Vec<Expr>, result: Option<Var> },
    Break,
    Continue,
    /// Emits one result coordinate/value pair, used by `assemble` lowering
    /// when a result level is in append mode.
    Yield { coords: Vec<Expr>, value: Expr },
    /// Sorts a coordinate array in place, used when a result's mode format
    /// requires sorted output but coordinates were appended out of order.
    Sort { array: Expr, size: Expr },
    Comment(Rc<str>),
    NoOp,
}

impl std::ops::Deref for Stmt {
    type Target = StmtKind;
    fn deref(&self) -> &StmtKind {
        &self.0
    }
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt(Rc::new(kind))
    }

    pub fn kind(&self) -> &StmtKind {
        &self.0
    }

    pub fn no_op() -> Self {
        Stmt::new(StmtKind::NoOp)
    }

    pub fn block(stmts: Vec<Stmt>) -> Self {
        Stmt::new(StmtKind::Block(stmts))
    }

    /// Concatenate IR sections, dropping any that are a bare `NoOp` so
    /// empty sections don't clutter the emitted tree.
    pub fn blanks(sections: impl IntoIterator<Item = Stmt>) -> Self {
        let mut flat = Vec::new();
        for section in sections {
            match section.kind() {
                StmtKind::NoOp => {}
                StmtKind::Block(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(section),
            }
        }
        if flat.len() == 1 {
            flat.into_iter().next().unwrap_or_else(Stmt::no_op)
        } else {
            Stmt::block(flat)
        }
    }

    pub fn var_decl(var: Var, value: Option<Expr>) -> Self {
        Stmt::new(StmtKind::VarDecl { var, value })
    }

    pub fn assign(lhs: Expr, rhs: Expr) -> Self {
        Stmt::new(StmtKind::Assign { lhs, rhs })
    }

    pub fn store(array: Expr, index: Expr, value: Expr) -> Self {
        Stmt::new(StmtKind::Store { array, index, value, atomic: false })
    }

    pub fn atomic_store(array: Expr, index: Expr, value: Expr) -> Self {
        Stmt::new(StmtKind::Store { array, index, value, atomic: true })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn for_loop(
        var: Var,
        start: Expr,
        end: Expr,
        increment: Expr,
        kind: LoopKind,
        parallel_unit: ParallelUnit,
        body: Stmt,
    ) -> Self {
        Stmt::new(StmtKind::For { var, start, end, increment, kind, parallel_unit, body })
    }

    pub fn while_loop(cond: Expr, body: Stmt) -> Self {
        Stmt::new(StmtKind::While { cond, body })
    }

    pub fn if_then(cond: Expr, then_branch: Stmt) -> Self {
        Stmt::new(StmtKind::IfThenElse { cond, then_branch, else_branch: None })
    }

    pub fn if_then_else(cond: Expr, then_branch: Stmt, else_branch: Stmt) -> Self {
        Stmt::new(StmtKind::IfThenElse { cond, then_branch, else_branch: Some(else_branch) })
    }

    pub fn case(clauses: Vec<(Expr, Stmt)>, exact: bool) -> Self {
        Stmt::new(StmtKind::Case { clauses, exact })
    }

    pub fn function(name: impl Into<Rc<str>>, results: Vec<Var>, args: Vec<Var>, body: Stmt) -> Self {
        Stmt::new(StmtKind::Function { name: name.into(), results, args, body })
    }

    pub fn allocate(var: Var, size: Expr, is_realloc: bool) -> Self {
        Stmt::new(StmtKind::Allocate { var, size, is_realloc })
    }

    pub fn free(var: Var) -> Self {
        Stmt::new(StmtKind::Free { var })
    }

    pub fn comment(text: impl Into<Rc<str>>) -> Self {
        Stmt::new(StmtKind::Comment(text.into()))
    }

    pub fn break_loop() -> Self {
        Stmt::new(StmtKind::Break)
    }

    pub fn yield_result(coords: Vec<Expr>, value: Expr) -> Self {
        Stmt::new(StmtKind::Yield { coords, value })
    }
}

/// A complete lowered function, the return value of `lower()`.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: Rc<str>,
    pub results: Vec<Var>,
    pub args: Vec<Var>,
    pub body: Stmt,
}

/// Small helper used by merge-point lowering to accumulate guard
/// expressions before folding them into a single conjunction.
pub fn conjoin(guards: SmallVec<[Expr; 4]>) -> Option<Expr> {
    let mut iter = guards.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, Expr::and))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanks_drops_empty_sections() {
        let body = Stmt::assign(Expr::var(Var::new("x", Datatype::Int32)), Expr::lit_int(1));
        let result = Stmt::blanks([Stmt::no_op(), body.clone(), Stmt::no_op()]);
        assert_eq!(result, body);
    }

    #[test]
    fn expr_clone_shares_rc() {
        let a = Expr::lit_int(42);
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn conjoin_empty_is_none() {
        assert!(conjoin(SmallVec::new()).is_none());
    }

    #[test]
    fn conjoin_single_is_identity() {
        let g = Expr::lit_bool(true);
        let mut guards = SmallVec::<[Expr; 4]>::new();
        guards.push(g.clone());
        assert_eq!(conjoin(guards), Some(g));
    }
}

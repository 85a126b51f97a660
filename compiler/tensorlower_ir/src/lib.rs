//! Data model and imperative IR for the sparse-tensor lowering core.
//!
//! This crate is the shared vocabulary between index notation and the
//! lowering pass in `tensorlower_core`: tensor/index variable identity,
//! the `Access`/`IndexStmt`/`IndexExpr` tree, the `ModeFormat` collaborator
//! contract, the `Iterator` capability facade, the `ProvenanceGraph`
//! facade, `MergeLattice` construction, and the imperative IR node set
//! that a lowered function is built out of. It does not itself lower
//! anything.

pub mod access;
pub mod builtin_formats;
pub mod error;
pub mod format;
pub mod index_var;
pub mod ir;
pub mod iterator;
pub mod lattice;
pub mod provenance;
pub mod stmt;
pub mod tensor_var;

pub use access::{Access, AxisProjection, WindowBounds};
pub use error::{LowerError, LowerResult};
pub use format::{ModeFormat, ModeFuncContext, ModeFuncResult};
pub use index_var::{IndexVar, IndexVarId};
pub use ir::{
    conjoin, BinaryOp, Datatype, Expr, ExprKind, Function, Literal, LoopKind, ParallelUnit,
    Property, Stmt, StmtKind, UnaryOp, Var,
};
pub use iterator::{IteratorCaps, ModeArrays, ModeIterator};
pub use lattice::{MergeLattice, MergePoint};
pub use provenance::{Derivation, ProvenanceGraph};
pub use stmt::{ForallMeta, IndexExpr, IndexStmt, LiteralExpr, ReduceOp, Visitor};
pub use tensor_var::{TensorId, TensorRole, TensorVar};

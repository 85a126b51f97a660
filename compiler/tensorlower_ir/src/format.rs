//! The `ModeFormat`/mode-functions collaborator contract.
//!
//! `ModeFormat` is implemented by the caller for each storage scheme
//! (dense, compressed, singleton, byte-oriented position runs...) and
//! supplies the handful of small IR-building functions the lowerer calls
//! to emit position/coordinate bounds, random access, and append-path
//! bookkeeping. This crate never interprets tensor storage itself; it only
//! calls through this trait.

use crate::ir::{Expr, Stmt};
use crate::iterator::{IteratorCaps, ModeArrays};

/// The handles a mode-function call needs: the position/coordinate
/// variables in scope and the level's underlying arrays.
#[derive(Clone, Debug)]
pub struct ModeFuncContext {
    pub pos_var: Expr,
    pub parent_pos_var: Expr,
    pub coord_var: Expr,
    pub arrays: ModeArrays,
}

/// The IR a mode function contributes: a (possibly empty) statement
/// computing intermediate values, plus the result expressions the caller
/// asked for.
#[derive(Clone, Debug)]
pub struct ModeFuncResult {
    pub stmt: Stmt,
    pub results: Vec<Expr>,
}

impl ModeFuncResult {
    pub fn pure(results: Vec<Expr>) -> Self {
        ModeFuncResult { stmt: Stmt::no_op(), results }
    }
}

/// One storage format for one tensor mode (level). Implementations are
/// supplied by the caller; this crate ships a few reference
/// implementations (`DenseFormat`, `CompressedFormat`, `SingletonFormat`)
/// used by its own tests and as a starting point for real backends.
pub trait ModeFormat: std::fmt::Debug {
    fn name(&self) -> &str;

    fn capabilities(&self) -> IteratorCaps;

    /// `[begin, end)` position bounds for a child iterator nested under
    /// `ctx.parent_pos_var`.
    fn pos_bounds(&self, ctx: &ModeFuncContext) -> ModeFuncResult;

    /// Coordinate at `ctx.pos_var`, for formats with `hasPosIter`.
    fn pos_access(&self, ctx: &ModeFuncContext) -> ModeFuncResult;

    /// `[begin, end)` coordinate bounds, for formats with `hasCoordIter`.
    fn coord_bounds(&self, ctx: &ModeFuncContext) -> ModeFuncResult;

    /// Advances a coordinate iterator to `ctx.coord_var`, returning the
    /// resulting position (if any) and whether the coordinate was found.
    fn coord_access(&self, ctx: &ModeFuncContext) -> ModeFuncResult;

    /// Random-access lookup of `ctx.coord_var` under `ctx.parent_pos_var`,
    /// for formats with `hasLocate`.
    fn locate(&self, ctx: &ModeFuncContext) -> ModeFuncResult;

    /// Appends `ctx.coord_var` at `ctx.pos_var`, for formats with
    /// `hasAppend`. Default: unsupported (most dense/full formats never
    /// call this).
    fn append_coord(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let _ = ctx;
        ModeFuncResult::pure(Vec::new())
    }

    /// The length of the fill-region run starting at `ctx.pos_var`, for
    /// formats with `updatesFillRegion`.
    fn get_fill_region(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let _ = ctx;
        ModeFuncResult::pure(Vec::new())
    }

    /// As `get_fill_region`, but along the append path during assembly.
    fn get_fill_region_append(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let _ = ctx;
        ModeFuncResult::pure(Vec::new())
    }

    fn init_level(&self, ctx: &ModeFuncContext) -> Stmt {
        let _ = ctx;
        Stmt::no_op()
    }

    fn finalize_level(&self, ctx: &ModeFuncContext) -> Stmt {
        let _ = ctx;
        Stmt::no_op()
    }
}

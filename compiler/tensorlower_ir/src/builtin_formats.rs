//! Reference [`ModeFormat`] implementations: dense, compressed (CSR-style),
//! and singleton. These are concrete enough to drive the integration
//! scenarios in `tensorlower_core`, but are not meant to be the only
//! formats a real backend would ship: callers are free to implement their
//! own.

use crate::format::{ModeFormat, ModeFuncContext, ModeFuncResult};
use crate::ir::{BinaryOp, Expr, Stmt};
use crate::iterator::IteratorCaps;

/// A fully dense mode: every coordinate in `[0, dimension)` is present,
/// random access is direct arithmetic (`parent_pos * dimension + coord`).
#[derive(Debug, Clone)]
pub struct DenseFormat {
    pub dimension: Expr,
}

impl ModeFormat for DenseFormat {
    fn name(&self) -> &str {
        "dense"
    }

    fn capabilities(&self) -> IteratorCaps {
        IteratorCaps::HAS_LOCATE
            | IteratorCaps::IS_FULL
            | IteratorCaps::IS_ORDERED
            | IteratorCaps::IS_UNIQUE
            | IteratorCaps::IS_BRANCHLESS
    }

    fn pos_bounds(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let begin = Expr::mul(ctx.parent_pos_var.clone(), self.dimension.clone());
        let end = Expr::add(begin.clone(), self.dimension.clone());
        ModeFuncResult::pure(vec![begin, end])
    }

    fn pos_access(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let coord = Expr::binary(
            BinaryOp::Rem,
            ctx.pos_var.clone(),
            self.dimension.clone(),
        );
        ModeFuncResult::pure(vec![coord])
    }

    fn coord_bounds(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(vec![Expr::lit_int(0), self.dimension.clone()])
    }

    fn coord_access(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let pos = Expr::add(
            Expr::mul(ctx.parent_pos_var.clone(), self.dimension.clone()),
            ctx.coord_var.clone(),
        );
        ModeFuncResult::pure(vec![pos, Expr::lit_bool(true)])
    }

    fn locate(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        self.coord_access(ctx)
    }
}

/// A CSR-style compressed mode: `pos[parent_pos]..pos[parent_pos + 1]`
/// bounds a run of `crd` entries.
#[derive(Debug, Clone)]
pub struct CompressedFormat;

impl ModeFormat for CompressedFormat {
    fn name(&self) -> &str {
        "compressed"
    }

    fn capabilities(&self) -> IteratorCaps {
        IteratorCaps::HAS_POS_ITER
            | IteratorCaps::HAS_APPEND
            | IteratorCaps::IS_ORDERED
            | IteratorCaps::IS_UNIQUE
    }

    fn pos_bounds(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let pos_arr = ctx.arrays.pos.clone().unwrap_or_else(|| panic!("compressed mode requires a pos array"));
        let begin = Expr::load(pos_arr.clone(), ctx.parent_pos_var.clone());
        let end = Expr::load(pos_arr, Expr::add(ctx.parent_pos_var.clone(), Expr::lit_int(1)));
        ModeFuncResult::pure(vec![begin, end])
    }

    fn pos_access(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let crd_arr = ctx.arrays.crd.clone().unwrap_or_else(|| panic!("compressed mode requires a crd array"));
        ModeFuncResult::pure(vec![Expr::load(crd_arr, ctx.pos_var.clone())])
    }

    fn coord_bounds(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(Vec::new())
    }

    fn coord_access(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(vec![Expr::lit_bool(false)])
    }

    fn locate(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(vec![Expr::lit_bool(false)])
    }

    fn append_coord(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let crd_arr = ctx.arrays.crd.clone().unwrap_or_else(|| panic!("compressed mode requires a crd array"));
        let stmt = Stmt::store(crd_arr, ctx.pos_var.clone(), ctx.coord_var.clone());
        ModeFuncResult { stmt, results: Vec::new() }
    }
}

/// A singleton mode: exactly one coordinate per parent position, used for
/// the trailing level of a COO-style tensor.
#[derive(Debug, Clone)]
pub struct SingletonFormat;

impl ModeFormat for SingletonFormat {
    fn name(&self) -> &str {
        "singleton"
    }

    fn capabilities(&self) -> IteratorCaps {
        IteratorCaps::HAS_POS_ITER | IteratorCaps::HAS_APPEND | IteratorCaps::IS_UNIQUE
    }

    fn pos_bounds(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let begin = ctx.parent_pos_var.clone();
        let end = Expr::add(ctx.parent_pos_var.clone(), Expr::lit_int(1));
        ModeFuncResult::pure(vec![begin, end])
    }

    fn pos_access(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let crd_arr = ctx.arrays.crd.clone().unwrap_or_else(|| panic!("singleton mode requires a crd array"));
        ModeFuncResult::pure(vec![Expr::load(crd_arr, ctx.pos_var.clone())])
    }

    fn coord_bounds(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(Vec::new())
    }

    fn coord_access(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(vec![Expr::lit_bool(false)])
    }

    fn locate(&self, _ctx: &ModeFuncContext) -> ModeFuncResult {
        ModeFuncResult::pure(vec![Expr::lit_bool(false)])
    }

    fn append_coord(&self, ctx: &ModeFuncContext) -> ModeFuncResult {
        let crd_arr = ctx.arrays.crd.clone().unwrap_or_else(|| panic!("singleton mode requires a crd array"));
        let stmt = Stmt::store(crd_arr, ctx.pos_var.clone(), ctx.coord_var.clone());
        ModeFuncResult { stmt, results: Vec::new() }
    }
}

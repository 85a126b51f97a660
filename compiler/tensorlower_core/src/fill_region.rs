//! Fill-region (run-length) machinery.
//!
//! Sparse formats that `updatesFillRegion` report, at a given position,
//! how many consecutive following positions share the tensor's declared
//! fill value: this lets a reduction over a long constant run collapse
//! to one multiplication instead of iterating the whole run (`spec.md`
//! §4.3 "Explicit-zero cases", and the `apply_rle_dense_reduction` note in
//! `SPEC_FULL.md` §5.3).

use tensorlower_ir::{BinaryOp, Expr, Literal, ModeFuncContext, ModeFuncResult, ModeIterator};

use crate::state::Lowerer;

/// Turns a tensor's declared fill value into an `Expr` literal of the
/// matching kind, for use wherever a fill-region catch-all or a scalar
/// header/footer needs to materialize it.
pub fn literal_to_expr(lit: Literal) -> Expr {
    match lit {
        Literal::Bool(b) => Expr::lit_bool(b),
        Literal::Int(i) => Expr::lit_int(i),
        Literal::UInt(u) => Expr::lit_uint(u),
        Literal::Float(f) => Expr::lit_float(f),
    }
}

/// Calls `getFillRegion`/`getFillRegionAppend` on the format owning `it`,
/// returning the run-length expression, or `None` if the format doesn't
/// support the fill-region query (not `updatesFillRegion`).
pub fn fill_region_length(
    lowerer: &Lowerer<'_>,
    it: &ModeIterator,
    appending: bool,
) -> Option<ModeFuncResult> {
    let tensor_id = it.tensor?;
    let tensor = lowerer.tensor(tensor_id);
    if !it.caps().updates_fill_region() {
        return None;
    }
    let format = tensor.format_at(it.level as usize);
    let ctx = ModeFuncContext {
        pos_var: it.pos_var.clone(),
        parent_pos_var: it
            .parent
            .as_ref()
            .map_or_else(|| Expr::lit_int(0), |p| p.pos_var.clone()),
        coord_var: it.coord_var.clone(),
        arrays: it.arrays.clone(),
    };
    Some(if appending {
        format.get_fill_region_append(&ctx)
    } else {
        format.get_fill_region(&ctx)
    })
}

/// `apply_rle_dense_reduction`: for a pure multiply-accumulate reduction
/// (`result += a(i) * b(i)` style) where one operand's value is constant
/// over a fill run of length `run_len`, the whole run contributes
/// `run_len * a_value * fill_value` rather than `run_len` separate
/// multiply-adds. Returns the collapsed expression.
pub fn apply_rle_dense_reduction(run_len: Expr, constant_term: Expr, fill_value: Expr) -> Expr {
    Expr::mul(Expr::cast(tensorlower_ir::Datatype::Float64, run_len), Expr::mul(constant_term, fill_value))
}

/// Whether `value` compares non-equal to `fill`: the boolean guard
/// `{tensor}_isNonZero` declarations built by
/// `construct_inner_loop_case_preamble` in `merge_point.rs` are exactly
/// this comparison, named for diagnostic clarity in the emitted IR.
pub fn is_non_zero_guard(value: Expr, fill: Expr) -> Expr {
    Expr::binary(BinaryOp::Neq, value, fill)
}

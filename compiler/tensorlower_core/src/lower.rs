//! Top-level `lower()` entry point (`spec.md` §4.1): walks a scheduled
//! `IndexStmt`, builds the iterators and merge lattices each `forall`
//! needs, and returns the assembled `ir::Function`.
//!
//! The six steps from `spec.md` §4.1: resolve tensor declarations, build
//! the per-access iterator chains as nested `forall`s are entered, lower
//! the statement tree, wrap the result in `blanks(header, init, body,
//! finalize, footer)`, and hand back a named `ir::Function`.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tensorlower_ir::{
    Access, AxisProjection, Datatype, Expr, Function, IndexExpr, IndexStmt, IteratorCaps,
    LowerError, LowerResult, MergeLattice, ModeArrays, ModeFuncContext, ModeFuncResult,
    ModeIterator, ProvenanceGraph, Property, Stmt, TensorId, TensorRole, TensorVar, Var,
};
use tensorlower_stack::ensure_sufficient_stack;
use tracing::instrument;

use crate::assemble::{
    finalize_result_arrays, init_result_arrays, lower_assemble_append, lower_assemble_level,
};
use crate::assignment::lower_assignment;
use crate::config::LowerConfig;
use crate::expr::IteratorScope;
use crate::fill_region::literal_to_expr;
use crate::forall::lower_forall;
use crate::state::Lowerer;
use crate::where_lowering::{declare_temporary, get_temporary_size, lower_where, zero_touched_entries};

/// Placeholder index-var identity for a 0-order result tensor's synthetic
/// scope entry. A scalar result is never matched against a real `forall`'s
/// index variable (it has no axes to match), so this id only needs to be
/// distinct enough not to collide with a real one in debug output.
fn scalar_result_index_var() -> tensorlower_ir::IndexVarId {
    tensorlower_ir::IndexVarId::new(u32::MAX)
}

/// Iterators currently bound for each tensor, keyed by tensor id, as the
/// walk descends through nested `forall`s. Each entry is the leaf
/// iterator introduced by the innermost enclosing `forall` that indexes
/// that tensor.
type Scope = FxHashMap<TensorId, ModeIterator>;

/// Lowers `stmt` into a complete IR function named `name`, following
/// `spec.md` §4.1's six top-level steps: resolve declarations (the caller
/// already did this; `tensors`/`provenance` are the result), bind scalar
/// results, build iterators as `forall`s are walked, lower the statement
/// tree, then wrap it in the five-section `blanks(header, init, body,
/// finalize, footer)` body §5.1 requires.
#[instrument(skip(stmt, tensors, provenance, config), level = "debug")]
pub fn lower(
    name: &str,
    stmt: &IndexStmt,
    tensors: &FxHashMap<TensorId, TensorVar>,
    provenance: &ProvenanceGraph,
    config: LowerConfig,
) -> LowerResult<Function> {
    let mut lowerer = Lowerer::new(config, provenance, tensors);
    let mut scope: Scope = FxHashMap::default();

    let (header, scalar_results) = bind_scalar_results(&lowerer, tensors, &mut scope);
    let body = lower_stmt(&mut lowerer, stmt, &mut scope)?;

    let init = init_result_arrays(&lowerer, tensors);
    let finalize = finalize_result_arrays(&lowerer, tensors);
    let footer = Stmt::block(
        scalar_results
            .into_iter()
            .map(|(values_ptr, register)| Stmt::store(Expr::var(values_ptr), Expr::lit_int(0), Expr::var(register)))
            .collect::<Vec<_>>(),
    );

    let (results, args) = function_signature(tensors, stmt);

    Ok(Function { name: name.into(), results, args, body: Stmt::blanks([header, init, body, finalize, footer]) })
}

/// Declares a register for every 0-order `Result` tensor, initialized to
/// its fill value before any accumulation begins, and registers a
/// synthetic single-entry iterator for it in `scope` so the body's
/// assignments can find it (`spec.md` §4.1 step 2's "scalar header-load").
/// The body then accumulates into the register directly rather than
/// through its output pointer. Returns the header statement plus, for
/// each bound scalar, the output pointer and register to close over in
/// the matching footer-store.
fn bind_scalar_results(
    lowerer: &Lowerer<'_>,
    tensors: &FxHashMap<TensorId, TensorVar>,
    scope: &mut Scope,
) -> (Stmt, Vec<(Var, Var)>) {
    let mut scalars: Vec<&TensorVar> =
        tensors.values().filter(|t| t.role() == TensorRole::Result && t.order() == 0).collect();
    scalars.sort_by_key(|t| t.declared_order());

    let mut header_stmts = Vec::with_capacity(scalars.len());
    let mut bound = Vec::with_capacity(scalars.len());
    for tensor in scalars {
        let values_ptr = Var::new_ptr(tensor.name().to_string(), tensor.datatype());
        let register = lowerer.fresh_var(&format!("{}_reg", tensor.name()), tensor.datatype());
        header_stmts.push(Stmt::var_decl(register.clone(), Some(literal_to_expr(tensor.fill_value()))));

        let it = ModeIterator {
            tensor: Some(tensor.id()),
            index_var: scalar_result_index_var(),
            level: 0,
            caps: IteratorCaps::IS_FULL,
            parent: None,
            window: None,
            index_set: None,
            arrays: ModeArrays { pos: None, crd: None, values: Expr::var(register.clone()) },
            pos_var: Expr::lit_int(0),
            end_var: Expr::lit_int(1),
            coord_var: Expr::lit_int(0),
        };
        scope.insert(tensor.id(), it);
        bound.push((values_ptr, register));
    }
    (Stmt::block(header_stmts), bound)
}

/// Splits `tensors` into a function's `results` and `args` parameter
/// lists per `spec.md` §8: one parameter per result and one per argument,
/// each in declared order, with the argument list preceded by any tensor
/// referenced through an `IndexSet` projection anywhere in `stmt`.
fn function_signature(tensors: &FxHashMap<TensorId, TensorVar>, stmt: &IndexStmt) -> (Vec<Var>, Vec<Var>) {
    let to_var = |t: &TensorVar| Var::new_ptr(t.name().to_string(), t.datatype());

    let mut results: Vec<&TensorVar> = tensors.values().filter(|t| t.role() == TensorRole::Result).collect();
    results.sort_by_key(|t| t.declared_order());

    let mut index_set_ids: Vec<TensorId> = collect_statement_accesses(stmt)
        .iter()
        .flat_map(|a| {
            a.projections.iter().filter_map(|p| match p {
                AxisProjection::IndexSet { set_tensor } => Some(*set_tensor),
                _ => None,
            })
        })
        .collect();
    index_set_ids.sort_by_key(|id| id.raw());
    index_set_ids.dedup();

    let mut regular_args: Vec<&TensorVar> = tensors
        .values()
        .filter(|t| t.role() == TensorRole::Argument && !index_set_ids.contains(&t.id()))
        .collect();
    regular_args.sort_by_key(|t| t.declared_order());

    let mut args: Vec<Var> = index_set_ids.iter().filter_map(|id| tensors.get(id)).map(to_var).collect();
    args.extend(regular_args.iter().copied().map(to_var));

    (results.iter().copied().map(to_var).collect(), args)
}

fn lower_stmt(lowerer: &mut Lowerer<'_>, stmt: &IndexStmt, scope: &mut Scope) -> LowerResult<Stmt> {
    ensure_sufficient_stack(|| lower_stmt_inner(lowerer, stmt, scope))
}

fn lower_stmt_inner(lowerer: &mut Lowerer<'_>, stmt: &IndexStmt, scope: &mut Scope) -> LowerResult<Stmt> {
    match stmt {
        IndexStmt::Forall { var, body, meta } => {
            let accesses = collect_statement_accesses(body);
            let mut new_iters = Vec::new();
            let mut preambles = Vec::new();
            for access in &accesses {
                if let Some(level) = access.index_vars.iter().position(|v| v == var) {
                    let (it, preamble) = build_iterator(lowerer, access, *var, level as u32, scope)?;
                    preambles.push(preamble);
                    new_iters.push((access.tensor, it));
                }
            }
            for (tensor, it) in &new_iters {
                scope.insert(*tensor, it.clone());
            }

            let lattice = build_lattice_for_level(&new_iters);
            let body_stmt = {
                let body = body.as_ref();
                lower_forall(lowerer, *var, *meta, &lattice, |l, merge_scope| {
                    let mut full_scope: IteratorScope<'_> = merge_scope.clone();
                    for (tensor, it) in &new_iters {
                        full_scope.entry(*tensor).or_insert(it);
                    }
                    // Tensors bound by an enclosing `forall` (or the
                    // scalar-result binding done once before the whole
                    // statement tree is walked) never get their own
                    // iterator at this level, so they're invisible to
                    // `merge_scope`/`new_iters` unless pulled in from the
                    // outer scope explicitly.
                    for (tensor, it) in scope.iter() {
                        full_scope.entry(*tensor).or_insert(it);
                    }
                    lower_stmt_with_scope(l, body, &full_scope)
                })?
            };

            for (tensor, _) in &new_iters {
                scope.remove(tensor);
            }
            Ok(Stmt::blanks(preambles.into_iter().chain(std::iter::once(body_stmt))))
        }
        IndexStmt::Where { consumer, producer, temporary } => {
            let tensor = lowerer.tensor(*temporary);
            let dimension = Expr::get_property(
                Expr::var(Var::new_ptr(tensor.name().to_string(), tensor.datatype())),
                Property::Dimension,
                Some(0),
            );
            let dense_accelerated = !tensor.is_fully_dense();
            let (info, decl) =
                declare_temporary(lowerer, *temporary, get_temporary_size(dimension), tensor.datatype(), dense_accelerated);
            lowerer.workspaces.insert(*temporary, info.clone());

            let producer_body = lower_stmt(lowerer, producer, scope)?;
            let zero_stmt = zero_touched_entries(&info);
            let consumer_body = lower_stmt(lowerer, consumer, scope)?;
            lower_where(decl, producer_body, zero_stmt, consumer_body)
        }
        IndexStmt::Sequence { first, second } => {
            let a = lower_stmt(lowerer, first, scope)?;
            let b = lower_stmt(lowerer, second, scope)?;
            Ok(Stmt::blanks([a, b]))
        }
        IndexStmt::Multi { stmts } => {
            let mut lowered = Vec::with_capacity(stmts.len());
            for s in stmts {
                lowered.push(lower_stmt(lowerer, s, scope)?);
            }
            Ok(Stmt::blanks(lowered))
        }
        IndexStmt::Assignment { lhs, rhs, reduce } => {
            let scope_ref: IteratorScope<'_> = scope.iter().map(|(k, v)| (*k, v)).collect();
            lower_assignment(lowerer, lhs, rhs, *reduce, &scope_ref)
        }
        IndexStmt::Assemble { target, body } => {
            let body_stmt = lower_stmt(lowerer, body, scope)?;
            match scope.get(target) {
                Some(it) if lowerer.config.assemble => {
                    let appended = lower_assemble_append(lowerer, it)?;
                    Ok(lower_assemble_level(lowerer, it, Stmt::blanks([body_stmt, appended])))
                }
                _ => Ok(body_stmt),
            }
        }
    }
}

/// Lowers a sub-statement given an already-built iterator scope, used by
/// `lower_forall`'s merge-point callback where the scope is the
/// merge-point's own iterators rather than `Scope`'s full tensor map.
fn lower_stmt_with_scope(lowerer: &Lowerer<'_>, stmt: &IndexStmt, scope: &IteratorScope<'_>) -> LowerResult<Stmt> {
    match stmt {
        IndexStmt::Assignment { lhs, rhs, reduce } => lower_assignment(lowerer, lhs, rhs, *reduce, scope),
        IndexStmt::Multi { stmts } => {
            let mut lowered = Vec::with_capacity(stmts.len());
            for s in stmts {
                lowered.push(lower_stmt_with_scope(lowerer, s, scope)?);
            }
            Ok(Stmt::blanks(lowered))
        }
        IndexStmt::Sequence { first, second } => {
            let a = lower_stmt_with_scope(lowerer, first, scope)?;
            let b = lower_stmt_with_scope(lowerer, second, scope)?;
            Ok(Stmt::blanks([a, b]))
        }
        other => Err(LowerError::unsupported(format!(
            "statement kind not reachable directly inside a merge point: {other:?}"
        ))),
    }
}

fn collect_statement_accesses(stmt: &IndexStmt) -> SmallVec<[Access; 4]> {
    match stmt {
        IndexStmt::Assignment { lhs, rhs, .. } => {
            let mut accesses = tensorlower_ir::stmt::collect_accesses(rhs);
            accesses.push(lhs.clone());
            accesses
        }
        IndexStmt::Forall { body, .. } | IndexStmt::Assemble { body, .. } => collect_statement_accesses(body),
        IndexStmt::Sequence { first, second } => {
            let mut a = collect_statement_accesses(first);
            a.extend(collect_statement_accesses(second));
            a
        }
        IndexStmt::Multi { stmts } => stmts.iter().flat_map(|s| collect_statement_accesses(s).into_iter()).collect(),
        IndexStmt::Where { consumer, producer, .. } => {
            let mut a = collect_statement_accesses(consumer);
            a.extend(collect_statement_accesses(producer));
            a
        }
    }
}

fn build_iterator(
    lowerer: &Lowerer<'_>,
    access: &Access,
    var: tensorlower_ir::IndexVarId,
    level: u32,
    scope: &Scope,
) -> LowerResult<(ModeIterator, Stmt)> {
    let tensor = lowerer.tensor(access.tensor);
    let format = tensor.format_at(level as usize);
    let caps = format.capabilities();

    let parent = scope.get(&access.tensor).cloned().map(std::rc::Rc::new);
    let parent_pos_var = parent.as_ref().map_or_else(|| Expr::lit_int(0), |p| p.pos_var.clone());

    let values = Expr::var(Var::new_ptr(format!("{}_vals", tensor.name()), tensor.datatype()));
    let pos_arr = if caps.has_pos_iter() || caps.has_append() {
        Some(Expr::var(Var::new_ptr(format!("{}_pos{}", tensor.name(), level), Datatype::Int64)))
    } else {
        None
    };
    let crd_arr = if caps.has_pos_iter() || caps.has_append() {
        Some(Expr::var(Var::new_ptr(format!("{}_crd{}", tensor.name(), level), Datatype::Int32)))
    } else {
        None
    };
    let arrays = ModeArrays { pos: pos_arr, crd: crd_arr, values };

    let pos_var = lowerer.fresh_var(&format!("{}_p{}", tensor.name(), level), Datatype::Int64);
    let end_var = lowerer.fresh_var(&format!("{}_pend{}", tensor.name(), level), Datatype::Int64);
    let coord_var = lowerer.fresh_var(&format!("{}_i{}", tensor.name(), level), Datatype::Int32);

    let bounds_ctx = ModeFuncContext {
        pos_var: Expr::var(pos_var.clone()),
        parent_pos_var,
        coord_var: Expr::var(coord_var.clone()),
        arrays: arrays.clone(),
    };
    let bounds = format.pos_bounds(&bounds_ctx);
    let begin = bounds.results.first().cloned().unwrap_or_else(|| Expr::lit_int(0));
    let end = bounds.results.get(1).cloned().unwrap_or_else(|| Expr::lit_int(0));

    let access_ctx = ModeFuncContext { pos_var: Expr::var(pos_var.clone()), ..bounds_ctx };
    let coord_result = if caps.has_pos_iter() {
        format.pos_access(&access_ctx)
    } else {
        ModeFuncResult::pure(vec![Expr::var(pos_var.clone())])
    };
    let coord_value = coord_result.results.first().cloned().unwrap_or_else(|| Expr::var(pos_var.clone()));

    let preamble = Stmt::blanks([
        bounds.stmt,
        Stmt::var_decl(pos_var.clone(), Some(begin)),
        Stmt::var_decl(end_var.clone(), Some(end)),
        coord_result.stmt,
        Stmt::var_decl(coord_var.clone(), Some(coord_value)),
    ]);

    let it = ModeIterator {
        tensor: Some(access.tensor),
        index_var: var,
        level,
        caps,
        parent,
        window: access.projection_for(var).and_then(|p| match p {
            tensorlower_ir::AxisProjection::Windowed(w) => Some(*w),
            _ => None,
        }),
        index_set: access.projection_for(var).and_then(|p| match p {
            tensorlower_ir::AxisProjection::IndexSet { set_tensor } => Some(*set_tensor),
            _ => None,
        }),
        arrays,
        pos_var: Expr::var(pos_var),
        end_var: Expr::var(end_var),
        coord_var: Expr::var(coord_var),
    };
    Ok((it, preamble))
}

fn build_lattice_for_level(iterators: &[(TensorId, ModeIterator)]) -> MergeLattice {
    let mut lattice: Option<MergeLattice> = None;
    for (_, it) in iterators {
        let single = MergeLattice::for_iterator(it.clone());
        lattice = Some(match lattice {
            None => single,
            Some(acc) => MergeLattice::conjunction(&acc, &single),
        });
    }
    lattice.unwrap_or_default()
}

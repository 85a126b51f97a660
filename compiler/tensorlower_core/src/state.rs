//! `Lowerer`: the process-wide state threaded through one `lower()` call.
//!
//! Created fresh per call and discarded afterwards (`spec.md` §3
//! "Lowerer state": lifetime is call-scoped, never reused across calls).
//! Holds the caller-supplied tensor declarations and provenance graph by
//! reference, plus the mutable bookkeeping the lowering pass accumulates
//! as it walks the statement tree: which `IndexVar`s are currently bound,
//! fresh-name generation, per-temporary workspace state, and per-result
//! assembly state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tensorlower_ir::{Datatype, Expr, IndexVarId, ProvenanceGraph, TensorId, TensorVar, Var};

use crate::config::LowerConfig;

/// Per-temporary workspace bookkeeping built up while lowering a `where`
/// statement (`spec.md` §4.5).
#[derive(Clone, Debug)]
pub struct WorkspaceInfo {
    /// Whether the temporary uses the dense-accelerator strategy (bit
    /// guard array + append-order index list) rather than a plain dense
    /// buffer.
    pub dense_accelerated: bool,
    /// The boolean guard array, one entry per coordinate, when
    /// `dense_accelerated`.
    pub guard_array: Option<Var>,
    /// The append-order coordinate list, when `dense_accelerated`.
    pub index_list: Option<Var>,
    /// Number of coordinates appended to `index_list` so far, tracked as
    /// an IR variable so the zeroing loop at the next producer iteration
    /// only clears what was actually touched.
    pub index_list_size: Option<Var>,
    pub values_array: Var,
    /// The size expression used both at allocation and at the guard's
    /// zeroing-loop bound (`get_temporary_size`, `spec.md` §4.5/§5.4).
    pub size: Expr,
}

/// Per-result-tensor assembly bookkeeping (`spec.md` §4.6).
#[derive(Clone, Debug, Default)]
pub struct AssemblyInfo {
    /// Running append position per level, used by append-mode formats to
    /// know where to write the next coordinate.
    pub append_positions: FxHashMap<u32, Var>,
}

pub struct Lowerer<'a> {
    pub config: LowerConfig,
    pub provenance: &'a ProvenanceGraph,
    pub tensor_vars: &'a FxHashMap<TensorId, TensorVar>,

    defined: FxHashSet<IndexVarId>,
    fresh_counter: Cell<u32>,
    pub workspaces: FxHashMap<TensorId, WorkspaceInfo>,
    pub assembly: FxHashMap<TensorId, AssemblyInfo>,

    /// One capacity variable per result level, declared once in the header
    /// and reused by both the initial allocation and every later
    /// double-on-full growth (`spec.md` §5's resource discipline).
    capacities: RefCell<FxHashMap<(TensorId, u32), Var>>,
    /// Incremented on entry to a parallel `forall`, decremented on exit.
    /// An assignment lowered while this is nonzero races with other
    /// workers writing the same result entry and must store atomically.
    atomic_depth: Cell<u32>,
    /// Records, per index variable, the `atomic_depth` active when its
    /// `forall` was entered in parallel — used by format hooks that need
    /// to know whether the loop they're emitting code for is itself
    /// running under a parallel ancestor.
    parallel_loop_depth: RefCell<FxHashMap<IndexVarId, u32>>,
}

impl<'a> Lowerer<'a> {
    pub fn new(
        config: LowerConfig,
        provenance: &'a ProvenanceGraph,
        tensor_vars: &'a FxHashMap<TensorId, TensorVar>,
    ) -> Self {
        Lowerer {
            config,
            provenance,
            tensor_vars,
            defined: FxHashSet::default(),
            fresh_counter: Cell::new(0),
            workspaces: FxHashMap::default(),
            assembly: FxHashMap::default(),
            capacities: RefCell::new(FxHashMap::default()),
            atomic_depth: Cell::new(0),
            parallel_loop_depth: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn is_defined(&self, var: IndexVarId) -> bool {
        self.defined.contains(&var)
    }

    pub fn mark_defined(&mut self, var: IndexVarId) {
        self.defined.insert(var);
    }

    pub fn undefine(&mut self, var: IndexVarId) {
        self.defined.remove(&var);
    }

    pub fn defined_set(&self) -> &FxHashSet<IndexVarId> {
        &self.defined
    }

    /// Variables that become recoverable the instant `var` is bound, per
    /// the provenance graph, that aren't bound yet.
    pub fn recoverable_after(&self, var: IndexVarId) -> Vec<IndexVarId> {
        self.provenance.newly_recoverable(var, &self.defined)
    }

    /// A process-unique variable name, scoped to this `lower()` call.
    pub fn fresh_var(&self, prefix: &str, datatype: Datatype) -> Var {
        let n = self.fresh_counter.get();
        self.fresh_counter.set(n + 1);
        Var::new(Rc::<str>::from(format!("{prefix}{n}")), datatype)
    }

    pub fn fresh_ptr_var(&self, prefix: &str, datatype: Datatype) -> Var {
        let n = self.fresh_counter.get();
        self.fresh_counter.set(n + 1);
        Var::new_ptr(Rc::<str>::from(format!("{prefix}{n}")), datatype)
    }

    pub fn tensor(&self, id: TensorId) -> &TensorVar {
        self.tensor_vars
            .get(&id)
            .unwrap_or_else(|| panic!("tensor {id:?} not registered with this Lowerer"))
    }

    /// The capacity variable tracking a result level's allocated size,
    /// creating and remembering one on first request so later calls for
    /// the same level (the initial allocation, then every growth check)
    /// share the same variable.
    pub fn capacity_var(&self, tensor: TensorId, level: u32) -> Var {
        let mut capacities = self.capacities.borrow_mut();
        capacities
            .entry((tensor, level))
            .or_insert_with(|| self.fresh_var(&format!("cap{level}_"), Datatype::Int64))
            .clone()
    }

    pub fn enter_parallel_loop(&self, var: IndexVarId) {
        let depth = self.atomic_depth.get();
        self.parallel_loop_depth.borrow_mut().insert(var, depth);
        self.atomic_depth.set(depth + 1);
    }

    pub fn exit_parallel_loop(&self, var: IndexVarId) {
        self.parallel_loop_depth.borrow_mut().remove(&var);
        self.atomic_depth.set(self.atomic_depth.get().saturating_sub(1));
    }

    /// Whether a store lowered right now races with other parallel-loop
    /// workers and must be emitted as [`tensorlower_ir::Stmt::atomic_store`].
    pub fn is_marking_atomic(&self) -> bool {
        self.atomic_depth.get() > 0
    }

    pub fn parallel_depth_of(&self, var: IndexVarId) -> Option<u32> {
        self.parallel_loop_depth.borrow().get(&var).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_var_names_are_distinct() {
        let provenance = ProvenanceGraph::new();
        let tensors = FxHashMap::default();
        let lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let a = lowerer.fresh_var("tmp", Datatype::Int32);
        let b = lowerer.fresh_var("tmp", Datatype::Int32);
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn defined_set_tracks_mark_and_undefine() {
        let provenance = ProvenanceGraph::new();
        let tensors = FxHashMap::default();
        let mut lowerer = Lowerer::new(LowerConfig::default(), &provenance, &tensors);
        let v = IndexVarId::new(0);
        assert!(!lowerer.is_defined(v));
        lowerer.mark_defined(v);
        assert!(lowerer.is_defined(v));
        lowerer.undefine(v);
        assert!(!lowerer.is_defined(v));
    }
}

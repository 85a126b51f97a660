//! `TensorVar` identity and declared storage shape.

use std::rc::Rc;

use crate::format::ModeFormat;
use crate::ir::{Datatype, Literal};

/// Interned identity for a `TensorVar`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TensorId(u32);

impl TensorId {
    pub fn new(raw: u32) -> Self {
        TensorId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Which part of a lowered function's parameter list a `TensorVar` belongs
/// to (`spec.md` §8: "one parameter per result and one per argument, in
/// declared order, preceded by index-set tensors"). Defaults to `Argument`
/// so existing callers that never set a role keep their prior behavior;
/// callers that lower a statement tree with a real result should mark it
/// via [`TensorVar::with_role`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorRole {
    Result,
    Argument,
    /// A `where`-bound workspace, never a function parameter.
    Temporary,
}

/// A tensor operand or result, declared by the caller with one
/// [`ModeFormat`] per mode (level). Dimension sizes are not stored here:
/// they're runtime values recovered through `ir::Expr::GetProperty(_,
/// Dimension, level)`, since this crate never allocates or sizes tensors
/// itself.
#[derive(Clone)]
pub struct TensorVar {
    id: TensorId,
    name: Rc<str>,
    datatype: Datatype,
    formats: Vec<Rc<dyn ModeFormat>>,
    fill_value: Literal,
    role: TensorRole,
    declared_order: u32,
}

impl std::fmt::Debug for TensorVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorVar")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("datatype", &self.datatype)
            .field("order", &self.formats.len())
            .field("fill_value", &self.fill_value)
            .finish()
    }
}

impl TensorVar {
    pub fn new(
        id: TensorId,
        name: impl Into<Rc<str>>,
        datatype: Datatype,
        formats: Vec<Rc<dyn ModeFormat>>,
        fill_value: Literal,
    ) -> Self {
        TensorVar { id, name: name.into(), datatype, formats, fill_value, role: TensorRole::Argument, declared_order: 0 }
    }

    /// Tags this tensor's function-parameter role and its position in the
    /// caller's declared tensor list, used by `lower()` to build the
    /// result/argument parameter lists in declared order.
    pub fn with_role(mut self, role: TensorRole, declared_order: u32) -> Self {
        self.role = role;
        self.declared_order = declared_order;
        self
    }

    pub fn role(&self) -> TensorRole {
        self.role
    }

    pub fn declared_order(&self) -> u32 {
        self.declared_order
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn order(&self) -> usize {
        self.formats.len()
    }

    pub fn format_at(&self, level: usize) -> &Rc<dyn ModeFormat> {
        &self.formats[level]
    }

    pub fn formats(&self) -> &[Rc<dyn ModeFormat>] {
        &self.formats
    }

    pub fn fill_value(&self) -> Literal {
        self.fill_value
    }

    /// True when every mode is `isFull`: e.g. a dense tensor, which never
    /// needs an explicit merge-lattice point of its own (`spec.md` §3).
    pub fn is_fully_dense(&self) -> bool {
        self.formats.iter().all(|f| f.capabilities().is_full())
    }
}

impl PartialEq for TensorVar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for TensorVar {}

impl std::hash::Hash for TensorVar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

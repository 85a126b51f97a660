//! `Access`: a tensor applied to a tuple of `IndexVar`s, with an optional
//! per-axis projection (windowing, striding, or index-set filtering).

use smallvec::SmallVec;

use crate::index_var::IndexVarId;
use crate::tensor_var::TensorId;

/// Inclusive-exclusive-with-stride window bounds applied to one axis of an
/// access, e.g. `a(i(2, 10, 2))`. Values are resolved at schedule time by
/// the caller, so these are plain integers rather than IR expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowBounds {
    pub lo: i64,
    pub hi: i64,
    pub stride: i64,
}

impl WindowBounds {
    pub fn extent(self) -> i64 {
        (self.hi - self.lo + self.stride - 1) / self.stride
    }
}

/// How one axis of an `Access` narrows the tensor's full dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AxisProjection {
    /// The full dimension, no narrowing.
    Plain,
    Windowed(WindowBounds),
    /// Only coordinates present in `set_tensor`'s sparsity pattern are
    /// visited along this axis.
    IndexSet { set_tensor: TensorId },
}

impl AxisProjection {
    pub fn is_windowed(&self) -> bool {
        matches!(self, AxisProjection::Windowed(_))
    }

    pub fn is_index_set(&self) -> bool {
        matches!(self, AxisProjection::IndexSet { .. })
    }
}

/// A tensor access, e.g. `A(i, j)`. `index_vars` and `projections` are
/// parallel: `projections[k]` narrows the axis bound to `index_vars[k]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub tensor: TensorId,
    pub index_vars: SmallVec<[IndexVarId; 4]>,
    pub projections: SmallVec<[AxisProjection; 4]>,
}

impl Access {
    pub fn new(tensor: TensorId, index_vars: SmallVec<[IndexVarId; 4]>) -> Self {
        let projections = index_vars.iter().map(|_| AxisProjection::Plain).collect();
        Access { tensor, index_vars, projections }
    }

    pub fn order(&self) -> usize {
        self.index_vars.len()
    }

    pub fn projection_for(&self, var: IndexVarId) -> Option<&AxisProjection> {
        self.index_vars.iter().position(|&v| v == var).map(|i| &self.projections[i])
    }

    pub fn is_windowed_on(&self, var: IndexVarId) -> bool {
        self.projection_for(var).is_some_and(AxisProjection::is_windowed)
    }
}

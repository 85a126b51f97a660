//! Lowering configuration.

use std::env;

/// Top-level switches controlling what `lower()` emits, plus one
/// environment-derived compatibility flag. Not a file format: this is
/// plain data the caller constructs and passes to [`crate::lower`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LowerConfig {
    /// Emit the assembly pass: result mode-array construction.
    pub assemble: bool,
    /// Emit the compute pass: value computation into the result's values
    /// array.
    pub compute: bool,
    /// Emit tensor-packing bookkeeping for operands read from a
    /// caller-owned pack routine.
    pub pack: bool,
    /// Emit tensor-unpacking bookkeeping for results consumed by a
    /// caller-owned unpack routine.
    pub unpack: bool,
    /// Mirrors the original's permissive `TACO_VALUE_ALLOC_HACK`
    /// environment switch: when set, a result's values array is
    /// pre-sized using a cheap upper-bound estimate rather than the
    /// (more expensive, exact) size computed by a full assembly pass.
    pub value_alloc_hack: bool,
}

impl Default for LowerConfig {
    fn default() -> Self {
        LowerConfig { assemble: true, compute: true, pack: false, unpack: false, value_alloc_hack: true }
    }
}

impl LowerConfig {
    /// Reads `value_alloc_hack` from `TACO_VALUE_ALLOC_HACK`: unset or any
    /// value other than exactly `"0"` enables it, matching the original's
    /// permissive parsing. Other fields keep their `Default` values.
    pub fn from_env() -> Self {
        let value_alloc_hack = match env::var("TACO_VALUE_ALLOC_HACK") {
            Ok(v) => v != "0",
            Err(_) => true,
        };
        LowerConfig { value_alloc_hack, ..LowerConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_value_alloc_hack() {
        assert!(LowerConfig::default().value_alloc_hack);
    }

    #[test]
    fn default_has_assemble_and_compute() {
        let cfg = LowerConfig::default();
        assert!(cfg.assemble);
        assert!(cfg.compute);
        assert!(!cfg.pack);
        assert!(!cfg.unpack);
    }
}

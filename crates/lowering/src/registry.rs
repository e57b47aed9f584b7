//! The process-wide table mapping `(target, operator type)` pairs to
//! converter functions.
//!
//! The table is built once, before any lowering pass runs, and is read-only
//! thereafter; arbitrarily many concurrent lowering passes can consult it
//! without locking. Extensibility matters here because operator types are
//! added independently of this subsystem, so dispatch goes through the table
//! rather than a closed match over known operator kinds.

use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    sync::OnceLock,
};

use crate::convert::{self, ConverterFn};

/// The accelerator targets converters can be registered for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Target {
    /// The Karst NPU, the primary offload target.
    Npu,

    /// The companion DSP. No built-in converters exist for it yet; it is
    /// carried so that per-target registration is exercised end to end.
    Dsp,
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Target::Npu => "npu",
            Target::Dsp => "dsp",
        };
        write!(f, "{name}")
    }
}

/// A mapping from `(target, operator type name)` to the converter that
/// lowers that operator for that target.
///
/// A lookup miss is meaningful: it tells the partitioning pass that the
/// operator cannot be offloaded to that target and must stay on the host.
#[derive(Clone, Debug)]
pub struct ConverterRegistry {
    mapping: HashMap<(Target, String), ConverterFn>,
}

impl ConverterRegistry {
    /// Constructs a registry with no converters registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mapping: HashMap::new(),
        }
    }

    /// Registers `converter` for the given target and operator type.
    ///
    /// Duplicate registration for the same pair overwrites the previous
    /// entry: the last registration wins.
    pub fn register(&mut self, target: Target, op_type: impl Into<String>, converter: ConverterFn) {
        self.mapping.insert((target, op_type.into()), converter);
    }

    /// Queries for the converter lowering `op_type` onto `target`, returning
    /// [`None`] if the operator cannot be offloaded to that target.
    #[must_use]
    pub fn find(&self, target: Target, op_type: &str) -> Option<ConverterFn> {
        self.mapping.get(&(target, op_type.to_string())).copied()
    }

    /// Returns the number of registered converters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Returns true iff no converters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

impl Default for ConverterRegistry {
    /// Contains the built-in converter set for the NPU target.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Target::Npu, "lookup_table", convert::lookup_table::convert);
        registry.register(Target::Npu, "matmul", convert::matmul::convert);
        registry.register(Target::Npu, "mul", convert::mul::convert);
        registry.register(Target::Npu, "relu", convert::activation::convert);
        registry.register(Target::Npu, "sigmoid", convert::activation::convert);
        registry.register(Target::Npu, "tanh", convert::activation::convert);
        registry.register(Target::Npu, "softmax", convert::softmax::convert);
        registry.register(
            Target::Npu,
            "elementwise_add",
            convert::elementwise::convert,
        );
        registry
    }
}

/// Returns the process-wide converter registry, building it on first use.
///
/// The one-time initialization doubles as the barrier the design calls for:
/// registration cannot race with lookup because the table is complete before
/// the first reference escapes.
#[must_use]
pub fn registry() -> &'static ConverterRegistry {
    static REGISTRY: OnceLock<ConverterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ConverterRegistry::default)
}

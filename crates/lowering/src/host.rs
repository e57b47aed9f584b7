//! Read-only views of the host engine's operator and tensor metadata.
//!
//! The host engine owns the portable operator graph; lowering only ever reads
//! it. The types here are the subset of the host's metadata that converters
//! consume: an operator's slot-keyed variable names and attributes, the
//! tensors those variables resolve to, and the precision/layout contract
//! declared by the kernel the operator was matched against.

use std::collections::HashMap;

use karst_errors::lower::{Error, Result};
use karst_ir::{Layout, Precision, TensorData};

/// The host engine's description of one tensor.
///
/// Weight and other constant tensors carry their backing data, which lowering
/// embeds into the accelerator graph by value. Activation tensors carry
/// shape and type metadata only.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    /// The dimensions of the tensor, outermost first.
    pub shape: Vec<usize>,

    /// The semantic precision of the tensor's elements.
    pub precision: Precision,

    /// The memory ordering of the tensor's dimensions.
    pub layout: Layout,

    /// The backing data, present only for constant tensors.
    pub data: Option<TensorData>,
}

impl HostTensor {
    /// Returns the number of dimensions of this tensor.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// A variable-name to tensor mapping for the subgraph being lowered.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    tensors: HashMap<String, HostTensor>,
}

impl Scope {
    /// Creates a new, empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `tensor`, replacing any existing binding.
    pub fn insert(&mut self, name: impl Into<String>, tensor: HostTensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Resolves a variable name to its tensor.
    ///
    /// # Errors
    ///
    /// - [`Error::UndefinedVariable`] if `name` is not bound in this scope.
    pub fn find_tensor(&self, name: &str) -> Result<&HostTensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| Error::UndefinedVariable(name.to_string()))
    }
}

/// The value of one operator attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// A boolean flag.
    Bool(bool),

    /// A floating-point scalar.
    Float(f64),

    /// An integer scalar.
    Int(i64),

    /// A string.
    Str(String),
}

/// The host engine's description of one operator in the portable graph.
///
/// Input and output variables are keyed by _slot_ name (`"X"`, `"W"`,
/// `"Out"`, …), each slot holding an ordered list of variable names, as in
/// the host's own operator schema.
#[derive(Clone, Debug, Default)]
pub struct OpDescriptor {
    ty: String,
    inputs: HashMap<String, Vec<String>>,
    outputs: HashMap<String, Vec<String>>,
    attrs: HashMap<String, AttrValue>,
}

impl OpDescriptor {
    /// Creates a descriptor for an operator of type `ty` with no slots or
    /// attributes bound.
    ///
    /// # API Style
    ///
    /// Please note that the API for the descriptor consumes `self` and is
    /// hence designed to have calls chained in the "fluent" API style.
    #[must_use]
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Self::default()
        }
    }

    /// Binds the ordered variable names `names` to the input slot `slot`.
    #[must_use]
    pub fn with_input(mut self, slot: impl Into<String>, names: Vec<String>) -> Self {
        self.inputs.insert(slot.into(), names);
        self
    }

    /// Binds the ordered variable names `names` to the output slot `slot`.
    #[must_use]
    pub fn with_output(mut self, slot: impl Into<String>, names: Vec<String>) -> Self {
        self.outputs.insert(slot.into(), names);
        self
    }

    /// Sets the attribute `name` to `value`.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Returns the operator's type name.
    #[must_use]
    pub fn ty(&self) -> &str {
        &self.ty
    }

    /// Returns the first variable name bound to the input slot `slot`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingInput`] if the slot is absent or empty.
    pub fn input_front(&self, slot: &str) -> Result<&str> {
        self.inputs
            .get(slot)
            .and_then(|names| names.first())
            .map(String::as_str)
            .ok_or_else(|| Error::MissingInput {
                op: self.ty.clone(),
                slot: slot.to_string(),
            })
    }

    /// Returns the first variable name bound to the output slot `slot`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingOutput`] if the slot is absent or empty.
    pub fn output_front(&self, slot: &str) -> Result<&str> {
        self.outputs
            .get(slot)
            .and_then(|names| names.first())
            .map(String::as_str)
            .ok_or_else(|| Error::MissingOutput {
                op: self.ty.clone(),
                slot: slot.to_string(),
            })
    }

    fn attr(&self, name: &str) -> Result<&AttrValue> {
        self.attrs.get(name).ok_or_else(|| Error::MissingAttribute {
            op: self.ty.clone(),
            name: name.to_string(),
        })
    }

    /// Returns the boolean attribute `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingAttribute`] if the attribute is absent.
    /// - [`Error::AttributeTypeMismatch`] if it is not a boolean.
    pub fn attr_bool(&self, name: &str) -> Result<bool> {
        match self.attr(name)? {
            AttrValue::Bool(value) => Ok(*value),
            _ => Err(self.type_mismatch(name, "bool")),
        }
    }

    /// Returns the integer attribute `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingAttribute`] if the attribute is absent.
    /// - [`Error::AttributeTypeMismatch`] if it is not an integer.
    pub fn attr_i64(&self, name: &str) -> Result<i64> {
        match self.attr(name)? {
            AttrValue::Int(value) => Ok(*value),
            _ => Err(self.type_mismatch(name, "i64")),
        }
    }

    /// Returns the floating-point attribute `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingAttribute`] if the attribute is absent.
    /// - [`Error::AttributeTypeMismatch`] if it is not a float.
    pub fn attr_f64(&self, name: &str) -> Result<f64> {
        match self.attr(name)? {
            AttrValue::Float(value) => Ok(*value),
            _ => Err(self.type_mismatch(name, "f64")),
        }
    }

    fn type_mismatch(&self, name: &str, expected: &'static str) -> Error {
        Error::AttributeTypeMismatch {
            op: self.ty.clone(),
            name: name.to_string(),
            expected,
        }
    }
}

/// The precision and layout a kernel declares for one slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TypeDecl {
    /// The declared precision.
    pub precision: Precision,

    /// The declared layout.
    pub layout: Layout,
}

/// The precision/layout contract of the kernel an operator was matched
/// against, per input and output slot.
///
/// Converters check their assumptions against this contract before emitting
/// IR. A slot that a converter reads but the contract does not declare is an
/// internal-consistency bug in the kernel registration, not a runtime
/// condition, and so looks up with a panic.
#[derive(Clone, Debug, Default)]
pub struct KernelContract {
    inputs: HashMap<String, TypeDecl>,
    outputs: HashMap<String, TypeDecl>,
}

impl KernelContract {
    /// Creates a contract with no slots declared.
    ///
    /// # API Style
    ///
    /// Please note that the API for the contract consumes `self` and is hence
    /// designed to have calls chained in the "fluent" API style.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the input slot `slot` to carry values of the given precision
    /// and layout.
    #[must_use]
    pub fn with_input(
        mut self,
        slot: impl Into<String>,
        precision: Precision,
        layout: Layout,
    ) -> Self {
        self.inputs.insert(slot.into(), TypeDecl { precision, layout });
        self
    }

    /// Declares the output slot `slot` to carry values of the given precision
    /// and layout.
    #[must_use]
    pub fn with_output(
        mut self,
        slot: impl Into<String>,
        precision: Precision,
        layout: Layout,
    ) -> Self {
        self.outputs.insert(slot.into(), TypeDecl { precision, layout });
        self
    }

    /// Returns the declared type of the input slot `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot was never declared. This is a programmer error in
    /// the kernel registration.
    #[must_use]
    pub fn input_decl(&self, slot: &str) -> TypeDecl {
        *self
            .inputs
            .get(slot)
            .unwrap_or_else(|| panic!("the kernel contract declares no input slot `{slot}`"))
    }

    /// Returns the declared type of the output slot `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot was never declared. This is a programmer error in
    /// the kernel registration.
    #[must_use]
    pub fn output_decl(&self, slot: &str) -> TypeDecl {
        *self
            .outputs
            .get(slot)
            .unwrap_or_else(|| panic!("the kernel contract declares no output slot `{slot}`"))
    }
}

#[cfg(test)]
mod test {
    use karst_errors::lower::Error;
    use karst_ir::{Layout, Precision};

    use crate::host::{AttrValue, HostTensor, OpDescriptor, Scope};

    #[test]
    fn scope_resolves_bound_names() -> anyhow::Result<()> {
        let mut scope = Scope::new();
        scope.insert(
            "x",
            HostTensor {
                shape: vec![2, 3],
                precision: Precision::Float32,
                layout: Layout::ChannelFirst,
                data: None,
            },
        );
        assert_eq!(scope.find_tensor("x")?.rank(), 2);
        Ok(())
    }

    #[test]
    fn scope_reports_unbound_names() {
        let scope = Scope::new();
        assert_eq!(
            scope.find_tensor("missing"),
            Err(Error::UndefinedVariable("missing".to_string()))
        );
    }

    #[test]
    fn descriptor_slot_lookup() -> anyhow::Result<()> {
        let op = OpDescriptor::new("matmul")
            .with_input("X", vec!["x".to_string()])
            .with_output("Out", vec!["out".to_string()]);
        assert_eq!(op.input_front("X")?, "x");
        assert_eq!(op.output_front("Out")?, "out");
        assert!(matches!(
            op.input_front("Y"),
            Err(Error::MissingInput { .. })
        ));
        Ok(())
    }

    #[test]
    fn attribute_getters_are_typed() -> anyhow::Result<()> {
        let op = OpDescriptor::new("matmul")
            .with_attr("transpose_X", AttrValue::Bool(true))
            .with_attr("alpha", AttrValue::Float(2.0));
        assert!(op.attr_bool("transpose_X")?);
        assert!((op.attr_f64("alpha")? - 2.0).abs() < f64::EPSILON);
        assert!(matches!(
            op.attr_i64("alpha"),
            Err(Error::AttributeTypeMismatch { .. })
        ));
        assert!(matches!(
            op.attr_bool("transpose_Y"),
            Err(Error::MissingAttribute { .. })
        ));
        Ok(())
    }
}

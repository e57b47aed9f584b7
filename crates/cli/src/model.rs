//! The on-disk JSON description of a portable operator subgraph.
//!
//! The format mirrors what the host engine hands the lowering pass: a set of
//! named tensors (constants carrying their data inline) and a topologically
//! ordered operator list. Kernel precision/layout contracts are synthesized
//! from the operator types, as a real host engine would supply them from its
//! kernel registry.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use karst_ir::{Layout, Precision, TensorData};
use karst_lowering::host::{AttrValue, HostTensor, KernelContract, OpDescriptor, Scope};
use karst_lowering::SubgraphOp;
use serde::Deserialize;

/// One subgraph as described on disk.
#[derive(Debug, Deserialize)]
pub struct Subgraph {
    /// The tensors of the subgraph, by variable name.
    tensors: BTreeMap<String, TensorDesc>,

    /// The operators, in topological order.
    ops: Vec<OpDesc>,
}

/// One tensor as described on disk.
#[derive(Debug, Deserialize)]
struct TensorDesc {
    shape: Vec<usize>,
    precision: Precision,
    #[serde(default)]
    layout: Option<Layout>,
    #[serde(default)]
    data: Option<TensorData>,
}

/// One operator as described on disk.
#[derive(Debug, Deserialize)]
struct OpDesc {
    #[serde(rename = "type")]
    ty: String,
    inputs: BTreeMap<String, Vec<String>>,
    outputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    attrs: BTreeMap<String, serde_json::Value>,
}

impl Subgraph {
    /// Builds the host scope from the tensor table.
    #[must_use]
    pub fn scope(&self) -> Scope {
        let mut scope = Scope::new();
        for (name, tensor) in &self.tensors {
            scope.insert(
                name.clone(),
                HostTensor {
                    shape: tensor.shape.clone(),
                    precision: tensor.precision,
                    layout: tensor.layout.unwrap_or(Layout::ChannelFirst),
                    data: tensor.data.clone(),
                },
            );
        }
        scope
    }

    /// Builds the operator list, pairing each operator with the kernel
    /// contract its type implies.
    ///
    /// # Errors
    ///
    /// Returns an error if an attribute value has a type that cannot be
    /// represented.
    pub fn ops(&self) -> Result<Vec<SubgraphOp>> {
        self.ops
            .iter()
            .map(|op| {
                let mut descriptor = OpDescriptor::new(&op.ty);
                for (slot, names) in &op.inputs {
                    descriptor = descriptor.with_input(slot.clone(), names.clone());
                }
                for (slot, names) in &op.outputs {
                    descriptor = descriptor.with_output(slot.clone(), names.clone());
                }
                for (name, value) in &op.attrs {
                    descriptor = descriptor.with_attr(name.clone(), convert_attr(name, value)?);
                }
                Ok(SubgraphOp {
                    descriptor,
                    contract: contract_for(&op.ty, &op.inputs, &op.outputs),
                })
            })
            .collect()
    }
}

/// Converts a JSON attribute value into the host representation.
fn convert_attr(name: &str, value: &serde_json::Value) -> Result<AttrValue> {
    Ok(match value {
        serde_json::Value::Bool(flag) => AttrValue::Bool(*flag),
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                AttrValue::Int(int)
            } else if let Some(float) = number.as_f64() {
                AttrValue::Float(float)
            } else {
                bail!("attribute `{name}` is out of range")
            }
        }
        serde_json::Value::String(text) => AttrValue::Str(text.clone()),
        _ => bail!("attribute `{name}` has an unsupported type"),
    })
}

/// Synthesizes the kernel contract a host engine would declare for `ty`.
///
/// Index slots are int64; everything else is float32. All slots are
/// channel-first, matching the accelerator kernels' registrations.
fn contract_for(
    ty: &str,
    inputs: &BTreeMap<String, Vec<String>>,
    outputs: &BTreeMap<String, Vec<String>>,
) -> KernelContract {
    let mut contract = KernelContract::new();
    for slot in inputs.keys() {
        let precision = if ty == "lookup_table" && slot == "Ids" {
            Precision::Int64
        } else {
            Precision::Float32
        };
        contract = contract.with_input(slot.clone(), precision, Layout::ChannelFirst);
    }
    for slot in outputs.keys() {
        contract = contract.with_output(slot.clone(), Precision::Float32, Layout::ChannelFirst);
    }
    contract
}

#[cfg(test)]
mod test {
    use crate::model::Subgraph;

    #[test]
    fn parses_a_minimal_subgraph() -> anyhow::Result<()> {
        let text = r#"{
            "tensors": {
                "ids": {"shape": [4], "precision": "int64"},
                "table": {
                    "shape": [2, 2],
                    "precision": "float32",
                    "data": {"F32": [0.0, 1.0, 2.0, 3.0]}
                },
                "out": {"shape": [4, 2], "precision": "float32"}
            },
            "ops": [{
                "type": "lookup_table",
                "inputs": {"Ids": ["ids"], "W": ["table"]},
                "outputs": {"Out": ["out"]},
                "attrs": {"padding_idx": -1}
            }]
        }"#;
        let subgraph: Subgraph = serde_json::from_str(text)?;
        let scope = subgraph.scope();
        assert_eq!(scope.find_tensor("table")?.shape, vec![2, 2]);
        let ops = subgraph.ops()?;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].descriptor.attr_i64("padding_idx")?, -1);
        Ok(())
    }
}

//! Declared input and output nodes of a loaded network.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EvalPoolError, Result};
use crate::tensor::TensorMap;

/// Which side of the network a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeGroup {
    Input,
    Output,
}

impl fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.pad("input"),
            Self::Output => f.pad("output"),
        }
    }
}

/// Node name to declared shape, partitioned into input and output groups.
///
/// Built once when a model is loaded and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSchema {
    inputs: BTreeMap<String, Vec<usize>>,
    outputs: BTreeMap<String, Vec<usize>>,
}

impl NodeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input node.
    pub fn with_input(mut self, name: impl Into<String>, shape: Vec<usize>) -> Self {
        self.inputs.insert(name.into(), shape);
        self
    }

    /// Declare an output node.
    pub fn with_output(mut self, name: impl Into<String>, shape: Vec<usize>) -> Self {
        self.outputs.insert(name.into(), shape);
        self
    }

    /// Declared shapes for one group.
    pub fn dimensions(&self, group: NodeGroup) -> &BTreeMap<String, Vec<usize>> {
        match group {
            NodeGroup::Input => &self.inputs,
            NodeGroup::Output => &self.outputs,
        }
    }

    /// Declared element count of a node, if it exists in `group`.
    pub fn element_count(&self, group: NodeGroup, name: &str) -> Option<usize> {
        self.dimensions(group)
            .get(name)
            .map(|shape| shape.iter().product())
    }

    /// Check that `inputs` supplies exactly the declared input nodes, each
    /// with the declared number of elements.
    pub fn validate_inputs(&self, inputs: &TensorMap) -> Result<()> {
        self.validate(NodeGroup::Input, inputs)
            .map_err(EvalPoolError::SchemaMismatch)
    }

    /// Check that an engine produced exactly the declared output nodes.
    pub fn validate_outputs(&self, outputs: &TensorMap) -> Result<()> {
        self.validate(NodeGroup::Output, outputs)
            .map_err(EvalPoolError::Evaluation)
    }

    fn validate(&self, group: NodeGroup, map: &TensorMap) -> std::result::Result<(), String> {
        for (name, tensor) in map {
            let expected = self
                .element_count(group, name)
                .ok_or_else(|| format!("unknown {} node '{}'", group, name))?;
            if tensor.len() != expected {
                return Err(format!(
                    "{} node '{}' expects {} elements, got {}",
                    group,
                    name,
                    expected,
                    tensor.len()
                ));
            }
        }
        if let Some(missing) = self.dimensions(group).keys().find(|n| !map.contains(n)) {
            return Err(format!("missing {} node '{}'", group, missing));
        }
        Ok(())
    }
}

impl fmt::Display for NodeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in [NodeGroup::Input, NodeGroup::Output] {
            for (name, shape) in self.dimensions(group) {
                writeln!(f, "{:<6} {} {:?}", group, name, shape)?;
            }
        }
        Ok(())
    }
}

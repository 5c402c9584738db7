use crate::model::builder::FormulaBuilder;
use crate::model::{NodeRef, NodeType};

/// Word-addressed symbolic memory over the full 32-bit address space.
///
/// The memory is persistent: a store produces a new array value on top of
/// the previous one, bound to a fresh versioned name. Loads always read the
/// current array. Addresses that were never stored to read whatever the
/// initial array holds.
#[derive(Clone, Debug)]
pub struct SymbolicMemory {
    current: NodeRef,
    version: u32,
}

impl SymbolicMemory {
    pub fn symbolic(builder: &mut FormulaBuilder, name: &str) -> Self {
        Self {
            current: builder.new_input(name.to_string(), NodeType::Memory),
            version: 0,
        }
    }

    pub fn load(&self, builder: &mut FormulaBuilder, address: NodeRef) -> NodeRef {
        builder.new_read(self.current.clone(), address)
    }

    pub fn store(
        &mut self,
        builder: &mut FormulaBuilder,
        prefix: &str,
        address: NodeRef,
        value: NodeRef,
    ) -> NodeRef {
        let write_node = builder.new_write(self.current.clone(), address, value);
        self.version += 1;
        let name = format!("{}mem#{}", prefix, self.version);
        self.current = builder.new_version(name, write_node, NodeType::Memory);
        self.current.clone()
    }

    pub fn current(&self) -> &NodeRef {
        &self.current
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn reset_versions(&mut self) {
        self.version = 0;
    }
}

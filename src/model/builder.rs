use crate::model::bitvec;
use crate::model::{get_nid, get_operands, Nid, Node, NodeRef, NodeType};
use log::trace;
use std::cell::RefCell;
use std::collections::HashSet;
use std::mem::discriminant;
use std::rc::Rc;

//
// Public Interface
//

/// Factory for formula nodes. All nodes of one verification run are created
/// through a single builder so node ids are unique across both programs.
///
/// Operators over constant operands are folded on construction, which keeps
/// straight-line code over immediates closed under constants.
pub struct FormulaBuilder {
    lines: Vec<NodeRef>,
    current_nid: Nid,
}

impl FormulaBuilder {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            current_nid: 1,
        }
    }

    /// All nodes created so far, operands always before their users.
    pub fn lines(&self) -> &[NodeRef] {
        &self.lines
    }

    pub fn new_const(&mut self, imm: u32) -> NodeRef {
        self.new_const_with_type(imm as u64, NodeType::Word)
    }

    pub fn new_bool(&mut self, value: bool) -> NodeRef {
        self.new_const_with_type(u64::from(value), NodeType::Bit)
    }

    pub fn new_input(&mut self, name: String, sort: NodeType) -> NodeRef {
        trace!("new input: n{} := {:?}", self.current_nid, name);
        self.add_node(Node::Input {
            nid: self.current_nid,
            sort,
            name,
        })
    }

    /// Introduces a fresh named variable bound to `value`.
    pub fn new_version(&mut self, name: String, value: NodeRef, sort: NodeType) -> NodeRef {
        trace!("new version: n{} := {}", self.current_nid, name);
        self.add_node(Node::Version {
            nid: self.current_nid,
            sort,
            name,
            value,
        })
    }

    pub fn new_read(&mut self, memory: NodeRef, address: NodeRef) -> NodeRef {
        self.add_node(Node::Read {
            nid: self.current_nid,
            memory,
            address,
        })
    }

    pub fn new_write(&mut self, memory: NodeRef, address: NodeRef, value: NodeRef) -> NodeRef {
        self.add_node(Node::Write {
            nid: self.current_nid,
            memory,
            address,
            value,
        })
    }

    pub fn new_add(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::add, "ADD") {
            return folded;
        }
        self.add_node(Node::Add {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_sub(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::sub, "SUB") {
            return folded;
        }
        self.add_node(Node::Sub {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_mul(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::mul, "MUL") {
            return folded;
        }
        self.add_node(Node::Mul {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_div(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::sdiv, "DIV") {
            return folded;
        }
        self.add_node(Node::Div {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_rem(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::srem, "REM") {
            return folded;
        }
        self.add_node(Node::Rem {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_and_word(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, |a, b| a & b, "AND") {
            return folded;
        }
        self.add_node(Node::And {
            nid: self.current_nid,
            sort: NodeType::Word,
            left,
            right,
        })
    }

    pub fn new_or(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, |a, b| a | b, "OR") {
            return folded;
        }
        self.add_node(Node::Or {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_xor(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, |a, b| a ^ b, "XOR") {
            return folded;
        }
        self.add_node(Node::Xor {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_sll(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::sll, "SLL") {
            return folded;
        }
        self.add_node(Node::Sll {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_srl(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::srl, "SRL") {
            return folded;
        }
        self.add_node(Node::Srl {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_sra(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_word(&left, &right, bitvec::sra, "SRA") {
            return folded;
        }
        self.add_node(Node::Sra {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_slt(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_compare(&left, &right, bitvec::slt, "SLT") {
            return folded;
        }
        self.add_node(Node::Slt {
            nid: self.current_nid,
            left,
            right,
        })
    }

    pub fn new_ult(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_compare(&left, &right, bitvec::ult, "ULT") {
            return folded;
        }
        self.add_node(Node::Ult {
            nid: self.current_nid,
            left,
            right,
        })
    }

    // We represent `sgte(a, b)` as `not(slt(a, b))` instead.
    pub fn new_sgte(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        let slt_node = self.new_slt(left, right);
        self.new_not_bit(slt_node)
    }

    // We represent `ugte(a, b)` as `not(ult(a, b))` instead.
    pub fn new_ugte(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        let ult_node = self.new_ult(left, right);
        self.new_not_bit(ult_node)
    }

    // Operands that compute the same expression are equal without asking
    // a solver, which makes comparing a program with itself trivial.
    pub fn new_eq(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        if let Some(folded) = self.fold_compare(&left, &right, |a, b| a == b, "EQ") {
            return folded;
        }
        if is_same_expression(&left, &right) {
            trace!("Folding EQ(n{}, n{}) -> true", get_nid(&left), get_nid(&right));
            return self.new_bool(true);
        }
        self.add_node(Node::Eq {
            nid: self.current_nid,
            left,
            right,
        })
    }

    // We represent `neq(a, b)` as `not(eq(a, b))` instead.
    pub fn new_neq(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        let eq_node = self.new_eq(left, right);
        self.new_not_bit(eq_node)
    }

    pub fn new_and_bit(&mut self, left: NodeRef, right: NodeRef) -> NodeRef {
        match (get_constant(&left), get_constant(&right)) {
            (Some(0), _) | (_, Some(1)) => return left,
            (_, Some(0)) | (Some(1), _) => return right,
            _ => {}
        }
        self.add_node(Node::And {
            nid: self.current_nid,
            sort: NodeType::Bit,
            left,
            right,
        })
    }

    pub fn new_not_bit(&mut self, value: NodeRef) -> NodeRef {
        if let Some(imm) = get_constant(&value) {
            return self.new_bool(imm == 0);
        }
        self.add_node(Node::Not {
            nid: self.current_nid,
            sort: NodeType::Bit,
            value,
        })
    }

    pub fn new_ite(
        &mut self,
        cond: NodeRef,
        left: NodeRef,
        right: NodeRef,
        sort: NodeType,
    ) -> NodeRef {
        match get_constant(&cond) {
            Some(0) => return right,
            Some(_) => return left,
            None => {}
        }
        if Rc::ptr_eq(&left, &right) {
            return left;
        }
        if let (Some(l), Some(r)) = (get_constant(&left), get_constant(&right)) {
            if l == r {
                return left;
            }
        }
        self.add_node(Node::Ite {
            nid: self.current_nid,
            sort,
            cond,
            left,
            right,
        })
    }
}

impl Default for FormulaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FormulaBuilder {
    // Users come after their operands, so releasing back to front never
    // frees a long version chain recursively.
    fn drop(&mut self) {
        while let Some(node) = self.lines.pop() {
            drop(node);
        }
    }
}

/// Returns the immediate of a constant node, looking through versions that
/// are bound to a constant.
pub fn get_constant(node: &NodeRef) -> Option<u64> {
    let mut current = node.clone();
    loop {
        let next = match &*current.borrow() {
            Node::Const { imm, .. } => return Some(*imm),
            Node::Version { value, .. } => value.clone(),
            _ => return None,
        };
        current = next;
    }
}

//
// Private Implementation
//

impl FormulaBuilder {
    fn add_node(&mut self, node_data: Node) -> NodeRef {
        let node = Rc::new(RefCell::new(node_data));
        self.lines.push(node.clone());
        self.current_nid += 1;
        node
    }

    fn new_const_with_type(&mut self, imm: u64, sort: NodeType) -> NodeRef {
        self.add_node(Node::Const {
            nid: self.current_nid,
            sort,
            imm,
        })
    }

    fn fold_word<F>(
        &mut self,
        left: &NodeRef,
        right: &NodeRef,
        f: F,
        f_name: &str,
    ) -> Option<NodeRef>
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let left_imm = get_constant(left)? as u32;
        let right_imm = get_constant(right)? as u32;
        let result_imm = f(left_imm, right_imm);
        trace!("Folding {}({}, {}) -> {}", f_name, left_imm, right_imm, result_imm);
        Some(self.new_const(result_imm))
    }

    fn fold_compare<F>(
        &mut self,
        left: &NodeRef,
        right: &NodeRef,
        f: F,
        f_name: &str,
    ) -> Option<NodeRef>
    where
        F: FnOnce(u32, u32) -> bool,
    {
        let left_imm = get_constant(left)? as u32;
        let right_imm = get_constant(right)? as u32;
        let result = f(left_imm, right_imm);
        trace!("Folding {}({}, {}) -> {}", f_name, left_imm, right_imm, result);
        Some(self.new_bool(result))
    }
}

// Versions are transparent, everything else has to match node by node.
// Each pair of nodes is compared at most once.
fn is_same_expression(left: &NodeRef, right: &NodeRef) -> bool {
    let mut pending = vec![(left.clone(), right.clone())];
    let mut visited = HashSet::new();

    while let Some((left, right)) = pending.pop() {
        if Rc::ptr_eq(&left, &right) {
            continue;
        }
        if !visited.insert((Rc::as_ptr(&left) as usize, Rc::as_ptr(&right) as usize)) {
            continue;
        }

        let matching = match (&*left.borrow(), &*right.borrow()) {
            (Node::Version { value, .. }, _) => {
                pending.push((value.clone(), right.clone()));
                true
            }
            (_, Node::Version { value, .. }) => {
                pending.push((left.clone(), value.clone()));
                true
            }
            (Node::Const { sort: s1, imm: i1, .. }, Node::Const { sort: s2, imm: i2, .. }) => {
                s1 == s2 && i1 == i2
            }
            (Node::Input { sort: s1, name: n1, .. }, Node::Input { sort: s2, name: n2, .. }) => {
                s1 == s2 && n1 == n2
            }
            (l, r) if discriminant(l) == discriminant(r) => {
                pending.extend(get_operands(&left).into_iter().zip(get_operands(&right)));
                true
            }
            _ => false,
        };

        if !matching {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constant_operands() {
        let mut builder = FormulaBuilder::new();
        let two = builder.new_const(2);
        let three = builder.new_const(3);
        let sum = builder.new_add(two.clone(), three.clone());
        assert_eq!(get_constant(&sum), Some(5));
        let less = builder.new_slt(three, two);
        assert_eq!(get_constant(&less), Some(0));
    }

    #[test]
    fn keeps_symbolic_operators() {
        let mut builder = FormulaBuilder::new();
        let x = builder.new_input("x".to_string(), NodeType::Word);
        let one = builder.new_const(1);
        let sum = builder.new_add(x, one);
        assert!(matches!(&*sum.borrow(), Node::Add { .. }));
    }

    #[test]
    fn simplifies_trivial_conditionals() {
        let mut builder = FormulaBuilder::new();
        let x = builder.new_input("x".to_string(), NodeType::Word);
        let y = builder.new_input("y".to_string(), NodeType::Word);
        let yes = builder.new_bool(true);
        let chosen = builder.new_ite(yes, x.clone(), y.clone(), NodeType::Word);
        assert!(Rc::ptr_eq(&chosen, &x));
        let cond = builder.new_eq(x.clone(), y.clone());
        let same = builder.new_ite(cond, y.clone(), y.clone(), NodeType::Word);
        assert!(Rc::ptr_eq(&same, &y));
        let reflexive = builder.new_eq(x.clone(), x);
        assert_eq!(get_constant(&reflexive), Some(1));
    }

    #[test]
    fn equal_expressions_compare_equal() {
        let mut builder = FormulaBuilder::new();
        let x = builder.new_input("x".to_string(), NodeType::Word);
        let y = builder.new_input("y".to_string(), NodeType::Word);
        let first = builder.new_sub(x.clone(), y.clone());
        let first = builder.new_version("p1_x3#1".to_string(), first, NodeType::Word);
        let second = builder.new_sub(x.clone(), y.clone());
        let second = builder.new_version("p2_x3#1".to_string(), second, NodeType::Word);
        let swapped = builder.new_sub(y, x);

        let same = builder.new_eq(first.clone(), second);
        assert_eq!(get_constant(&same), Some(1));
        let different = builder.new_eq(first, swapped);
        assert!(matches!(&*different.borrow(), Node::Eq { .. }));
    }

    #[test]
    fn long_version_chains_compare_equal() {
        let mut builder = FormulaBuilder::new();
        let x = builder.new_input("x".to_string(), NodeType::Word);
        let one = builder.new_const(1);
        let mut chains = Vec::new();
        for prefix in ["p1_", "p2_"] {
            let mut current = x.clone();
            for k in 1..=50_000 {
                let sum = builder.new_add(current, one.clone());
                current = builder.new_version(format!("{}x1#{}", prefix, k), sum, NodeType::Word);
            }
            chains.push(current);
        }

        let same = builder.new_eq(chains[0].clone(), chains[1].clone());
        assert_eq!(get_constant(&same), Some(1));
        let shorter = builder.new_eq(chains[0].clone(), x);
        assert!(matches!(&*shorter.borrow(), Node::Eq { .. }));
    }

    #[test]
    fn assigns_increasing_node_ids() {
        let mut builder = FormulaBuilder::new();
        let a = builder.new_input("a".to_string(), NodeType::Word);
        let b = builder.new_input("b".to_string(), NodeType::Word);
        assert!(get_nid(&a) < get_nid(&b));
        assert_eq!(builder.lines().len(), 2);
    }
}

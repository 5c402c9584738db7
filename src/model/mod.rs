use crate::model::solver::Query;
use anyhow::Result;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::rc::Rc;
use thiserror::Error;

//
// Public Interface
//

pub mod bitvec;
pub mod builder;
pub mod emulate;
pub mod equivalence;
pub mod executor;
pub mod memory;
pub mod register;
pub mod solver;
#[cfg(feature = "z3")]
pub mod z3solver_impl;

pub type Nid = u64;
pub type NodeRef = Rc<RefCell<Node>>;

/// Width of a machine word and of every memory cell and address.
pub const WORD_WIDTH: u32 = 32;

#[derive(Debug)]
pub enum Node {
    Const {
        nid: Nid,
        sort: NodeType,
        imm: u64,
    },
    Input {
        nid: Nid,
        sort: NodeType,
        name: String,
    },
    Version {
        nid: Nid,
        sort: NodeType,
        name: String,
        value: NodeRef,
    },
    Read {
        nid: Nid,
        memory: NodeRef,
        address: NodeRef,
    },
    Write {
        nid: Nid,
        memory: NodeRef,
        address: NodeRef,
        value: NodeRef,
    },
    Add {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Sub {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Mul {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Div {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Rem {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Sll {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Srl {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Sra {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Slt {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Ult {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Eq {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    And {
        nid: Nid,
        sort: NodeType,
        left: NodeRef,
        right: NodeRef,
    },
    Or {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Xor {
        nid: Nid,
        left: NodeRef,
        right: NodeRef,
    },
    Not {
        nid: Nid,
        sort: NodeType,
        value: NodeRef,
    },
    Ite {
        nid: Nid,
        sort: NodeType,
        cond: NodeRef,
        left: NodeRef,
        right: NodeRef,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeType {
    Bit,
    Word,
    Memory,
}

#[derive(Clone, Debug)]
pub struct HashableNodeRef {
    value: NodeRef,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("instruction {position} ({mnemonic}): expected {expected} operands, found {found}")]
    OperandCount {
        position: usize,
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    #[error("instruction {position}: unknown register \"{name}\"")]
    UnknownRegister { position: usize, name: String },

    #[error("instruction {position}: malformed immediate \"{text}\"")]
    MalformedImmediate { position: usize, text: String },

    #[error("instruction {position}: malformed memory operand \"{text}\"")]
    MalformedAddress { position: usize, text: String },

    #[error("instruction {position}: jump target \"{target}\" is not an instruction position")]
    UnresolvedTarget { position: usize, target: String },

    #[error("instruction {position}: unsupported opcode \"{mnemonic}\"")]
    UnsupportedOpcode { position: usize, mnemonic: String },

    #[error("prefix \"{0}\" was already used to model this state")]
    PrefixReused(String),
}

/// Writes the query as an SMT-LIB2 script that any bit-vector and array
/// capable solver can decide. Observed variables are requested via
/// `get-value` so a model doubles as the counterexample.
#[rustfmt::skip]
pub fn write_query<W>(query: &Query, mut out: W) -> Result<()>
where
    W: Write,
{
    writeln!(out, "; equivalence query, {} nodes\n", query.lines.len())?;
    writeln!(out, "(set-logic QF_ABV)")?;
    writeln!(out, "(set-option :produce-models true)")?;
    for node in query.lines.iter() {
        let nid = get_nid(node);
        match &*node.borrow() {
            Node::Const { sort: NodeType::Bit, imm, .. } =>
                writeln!(out, "(define-fun n{} () Bool {})", nid, *imm != 0)?,
            Node::Const { sort, imm, .. } =>
                writeln!(out, "(define-fun n{} () {} #x{:08x})", nid, get_sort(sort), imm)?,
            Node::Input { sort, name, .. } => {
                writeln!(out, "(declare-fun {} () {})", quote(name), get_sort(sort))?;
                writeln!(out, "(define-fun n{} () {} {})", nid, get_sort(sort), quote(name))?;
            }
            Node::Version { sort, name, value, .. } => {
                writeln!(out, "(define-fun {} () {} n{})", quote(name), get_sort(sort), get_nid(value))?;
                writeln!(out, "(define-fun n{} () {} {})", nid, get_sort(sort), quote(name))?;
            }
            Node::Read { memory, address, .. } =>
                writeln!(out, "(define-fun n{} () {} (select n{} n{}))", nid, get_sort(&NodeType::Word), get_nid(memory), get_nid(address))?,
            Node::Write { memory, address, value, .. } =>
                writeln!(out, "(define-fun n{} () {} (store n{} n{} n{}))", nid, get_sort(&NodeType::Memory), get_nid(memory), get_nid(address), get_nid(value))?,
            Node::Add { left, right, .. } => write_binary(&mut out, nid, "bvadd", left, right)?,
            Node::Sub { left, right, .. } => write_binary(&mut out, nid, "bvsub", left, right)?,
            Node::Mul { left, right, .. } => write_binary(&mut out, nid, "bvmul", left, right)?,
            Node::Div { left, right, .. } => write_binary(&mut out, nid, "bvsdiv", left, right)?,
            Node::Rem { left, right, .. } => write_binary(&mut out, nid, "bvsrem", left, right)?,
            Node::Sll { left, right, .. } => write_binary(&mut out, nid, "bvshl", left, right)?,
            Node::Srl { left, right, .. } => write_binary(&mut out, nid, "bvlshr", left, right)?,
            Node::Sra { left, right, .. } => write_binary(&mut out, nid, "bvashr", left, right)?,
            Node::Or { left, right, .. } => write_binary(&mut out, nid, "bvor", left, right)?,
            Node::Xor { left, right, .. } => write_binary(&mut out, nid, "bvxor", left, right)?,
            Node::And { sort: NodeType::Bit, left, right, .. } =>
                writeln!(out, "(define-fun n{} () Bool (and n{} n{}))", nid, get_nid(left), get_nid(right))?,
            Node::And { left, right, .. } => write_binary(&mut out, nid, "bvand", left, right)?,
            Node::Slt { left, right, .. } =>
                writeln!(out, "(define-fun n{} () Bool (bvslt n{} n{}))", nid, get_nid(left), get_nid(right))?,
            Node::Ult { left, right, .. } =>
                writeln!(out, "(define-fun n{} () Bool (bvult n{} n{}))", nid, get_nid(left), get_nid(right))?,
            Node::Eq { left, right, .. } =>
                writeln!(out, "(define-fun n{} () Bool (= n{} n{}))", nid, get_nid(left), get_nid(right))?,
            Node::Not { sort: NodeType::Bit, value, .. } =>
                writeln!(out, "(define-fun n{} () Bool (not n{}))", nid, get_nid(value))?,
            Node::Not { value, .. } =>
                writeln!(out, "(define-fun n{} () {} (bvnot n{}))", nid, get_sort(&NodeType::Word), get_nid(value))?,
            Node::Ite { sort, cond, left, right, .. } =>
                writeln!(out, "(define-fun n{} () {} (ite n{} n{} n{}))", nid, get_sort(sort), get_nid(cond), get_nid(left), get_nid(right))?,
        }
    }
    for assertion in query.assertions.iter() {
        writeln!(out, "(assert n{})", get_nid(assertion))?;
    }
    writeln!(out, "(check-sat)")?;
    if !query.observed.is_empty() {
        let names: Vec<String> = query.observed.iter().map(|n| format!("n{}", get_nid(n))).collect();
        writeln!(out, "(get-value ({}))", names.join(" "))?;
    }
    writeln!(out, "\n; end of query")?;
    Ok(())
}

pub fn get_nid(node: &NodeRef) -> Nid {
    match *node.borrow() {
        Node::Const { nid, .. } => nid,
        Node::Input { nid, .. } => nid,
        Node::Version { nid, .. } => nid,
        Node::Read { nid, .. } => nid,
        Node::Write { nid, .. } => nid,
        Node::Add { nid, .. } => nid,
        Node::Sub { nid, .. } => nid,
        Node::Mul { nid, .. } => nid,
        Node::Div { nid, .. } => nid,
        Node::Rem { nid, .. } => nid,
        Node::Sll { nid, .. } => nid,
        Node::Srl { nid, .. } => nid,
        Node::Sra { nid, .. } => nid,
        Node::Slt { nid, .. } => nid,
        Node::Ult { nid, .. } => nid,
        Node::Eq { nid, .. } => nid,
        Node::And { nid, .. } => nid,
        Node::Or { nid, .. } => nid,
        Node::Xor { nid, .. } => nid,
        Node::Not { nid, .. } => nid,
        Node::Ite { nid, .. } => nid,
    }
}

/// Returns the name of a variable node, `None` for every other node.
pub fn get_name(node: &NodeRef) -> Option<String> {
    match &*node.borrow() {
        Node::Input { name, .. } | Node::Version { name, .. } => Some(name.clone()),
        _ => None,
    }
}

/// Returns the operands of a node in the order they appear in the node.
pub fn get_operands(node: &NodeRef) -> Vec<NodeRef> {
    match &*node.borrow() {
        Node::Const { .. } | Node::Input { .. } => vec![],
        Node::Version { value, .. } | Node::Not { value, .. } => vec![value.clone()],
        Node::Read { memory, address, .. } => vec![memory.clone(), address.clone()],
        Node::Write { memory, address, value, .. } => {
            vec![memory.clone(), address.clone(), value.clone()]
        }
        Node::Add { left, right, .. }
        | Node::Sub { left, right, .. }
        | Node::Mul { left, right, .. }
        | Node::Div { left, right, .. }
        | Node::Rem { left, right, .. }
        | Node::Sll { left, right, .. }
        | Node::Srl { left, right, .. }
        | Node::Sra { left, right, .. }
        | Node::Slt { left, right, .. }
        | Node::Ult { left, right, .. }
        | Node::Eq { left, right, .. }
        | Node::And { left, right, .. }
        | Node::Or { left, right, .. }
        | Node::Xor { left, right, .. } => vec![left.clone(), right.clone()],
        Node::Ite { cond, left, right, .. } => vec![cond.clone(), left.clone(), right.clone()],
    }
}

//
// Private Implementation
//

fn get_sort(sort: &NodeType) -> String {
    match *sort {
        NodeType::Bit => "Bool".to_string(),
        NodeType::Word => format!("(_ BitVec {})", WORD_WIDTH),
        NodeType::Memory => format!(
            "(Array (_ BitVec {}) (_ BitVec {}))",
            WORD_WIDTH, WORD_WIDTH
        ),
    }
}

fn write_binary<W: Write>(
    out: &mut W,
    nid: Nid,
    op: &str,
    left: &NodeRef,
    right: &NodeRef,
) -> Result<()> {
    writeln!(
        out,
        "(define-fun n{} () {} ({} n{} n{}))",
        nid,
        get_sort(&NodeType::Word),
        op,
        get_nid(left),
        get_nid(right)
    )?;
    Ok(())
}

// Version names carry a `#`, which is not a legal simple symbol.
fn quote(name: &str) -> String {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_.$@%".contains(c))
    {
        name.to_string()
    } else {
        format!("|{}|", name)
    }
}

impl Eq for HashableNodeRef {}

impl From<NodeRef> for HashableNodeRef {
    fn from(node: NodeRef) -> Self {
        Self { value: node }
    }
}

impl Hash for HashableNodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        RefCell::as_ptr(&self.value).hash(state);
    }
}

impl PartialEq for HashableNodeRef {
    fn eq(&self, other: &Self) -> bool {
        RefCell::as_ptr(&self.value) == RefCell::as_ptr(&other.value)
    }
}

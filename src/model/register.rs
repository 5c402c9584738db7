use crate::model::builder::FormulaBuilder;
use crate::model::{NodeRef, NodeType};
use std::fmt;
use std::str::FromStr;

//
// Public Interface
//

pub const NUMBER_OF_REGISTERS: usize = 32;

/// A general-purpose register `x1` to `x31`, i.e. any register that can
/// actually hold a value.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Gpr(u8);

/// A register operand. The hard-wired zero register is its own variant, so
/// writes can only ever target a [`Gpr`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Register {
    Zero,
    General(Gpr),
}

/// The register file of one execution. Every write introduces a fresh
/// versioned variable, values referenced by earlier expressions are never
/// touched.
#[derive(Clone, Debug)]
pub struct RegisterFile {
    zero: NodeRef,
    values: Vec<NodeRef>,
    versions: [u32; NUMBER_OF_REGISTERS - 1],
}

impl Gpr {
    pub fn new(index: usize) -> Option<Self> {
        if (1..NUMBER_OF_REGISTERS).contains(&index) {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Gpr> {
        (1..NUMBER_OF_REGISTERS).map(|i| Gpr(i as u8))
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl Register {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Register::Zero),
            i => Gpr::new(i).map(Register::General),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Register::Zero => 0,
            Register::General(gpr) => gpr.index(),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.index())
    }
}

impl FromStr for Register {
    type Err = ();

    /// Accepts `x0` to `x31` and the standard ABI names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(digits) = s.strip_prefix('x') {
            if !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && (digits == "0" || !digits.starts_with('0'))
            {
                let index = digits.parse::<usize>().map_err(|_| ())?;
                return Register::from_index(index).ok_or(());
            }
        }
        if s == "fp" {
            return Register::from_index(8).ok_or(());
        }
        ABI_NAMES
            .iter()
            .position(|name| *name == s)
            .and_then(Register::from_index)
            .ok_or(())
    }
}

impl RegisterFile {
    /// Creates a register file with a fresh symbolic input `<prefix>x<N>`
    /// per general-purpose register. `x0` is the constant zero.
    pub fn symbolic(builder: &mut FormulaBuilder, prefix: &str) -> Self {
        let zero = builder.new_const(0);
        let values = Gpr::all()
            .map(|gpr| builder.new_input(format!("{}{}", prefix, gpr), NodeType::Word))
            .collect();
        Self {
            zero,
            values,
            versions: [0; NUMBER_OF_REGISTERS - 1],
        }
    }

    pub fn read(&self, reg: Register) -> NodeRef {
        match reg {
            Register::Zero => self.zero.clone(),
            Register::General(gpr) => self.values[gpr.index() - 1].clone(),
        }
    }

    /// Binds `value` to the next version of `gpr`, named
    /// `<prefix>x<N>#<version>`, and makes it the current value.
    pub fn write(
        &mut self,
        builder: &mut FormulaBuilder,
        prefix: &str,
        gpr: Gpr,
        value: NodeRef,
    ) -> NodeRef {
        let slot = gpr.index() - 1;
        self.versions[slot] += 1;
        let name = format!("{}{}#{}", prefix, gpr, self.versions[slot]);
        let version = builder.new_version(name, value, NodeType::Word);
        self.values[slot] = version.clone();
        version
    }

    pub fn version(&self, gpr: Gpr) -> u32 {
        self.versions[gpr.index() - 1]
    }

    /// Starts version numbering over, used when a fresh execution begins
    /// from a state another execution already produced or shares.
    pub fn reset_versions(&mut self) {
        self.versions = [0; NUMBER_OF_REGISTERS - 1];
    }
}

//
// Private Implementation
//

const ABI_NAMES: [&str; NUMBER_OF_REGISTERS] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use strum::{Display, EnumString};

//
// Public Interface
//

/// A single instruction as it appears in the source program.
///
/// The opcode is kept as written so that unknown mnemonics survive parsing
/// and can be handled by the executor according to its modeling policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub mnemonic: String,
    pub operands: Vec<String>,
    pub position: usize,
}

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sra,
    Addi,
    Andi,
    Ori,
    Xori,
    Slti,
    Sltiu,
    Lui,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Jal,
    Jalr,
    Lw,
    Sw,
}

/// An address operand of a load or store, `offset(base)` or a bare `base`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Address<'a> {
    pub offset: u32,
    pub base: &'a str,
}

impl Instruction {
    pub fn new(mnemonic: &str, operands: Vec<String>, position: usize) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            operands,
            position,
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_str(&self.mnemonic).ok()
    }

    /// Index of the operand naming a branch or jump target, if any.
    pub fn target_operand(&self) -> Option<usize> {
        match self.opcode()? {
            op if op.is_branch() => Some(2),
            Opcode::Jal => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.mnemonic)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        write!(f, ")")
    }
}

impl Opcode {
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Beq | Opcode::Bne | Opcode::Blt | Opcode::Bge | Opcode::Bltu | Opcode::Bgeu
        )
    }
}

/// Returns `true` for plain decimal numerals with an optional leading minus,
/// the only spelling accepted for instruction positions.
pub fn is_numeral(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Decodes an immediate operand into its 32-bit two's complement encoding.
/// Accepts decimal and `0x`-prefixed hexadecimal literals.
pub fn parse_immediate(text: &str) -> Option<u32> {
    let (negative, magnitude) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = magnitude
        .strip_prefix("0x")
        .or_else(|| magnitude.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        i64::from_str_radix(hex, 16).ok()?
    } else if is_numeral(magnitude) {
        magnitude.parse::<i64>().ok()?
    } else {
        return None;
    };
    let value = if negative { value.checked_neg()? } else { value };
    Some(value as u32)
}

/// Decodes a branch or jump target. Only decimal positions are targets;
/// symbolic labels have to be resolved before modeling.
pub fn parse_target(text: &str) -> Option<u32> {
    if is_numeral(text) {
        text.parse::<i64>().ok().map(|value| value as u32)
    } else {
        None
    }
}

pub fn parse_address(text: &str) -> Option<Address<'_>> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^(-?(?:0[xX][0-9a-fA-F]+|\d+))\((\w+)\)$").expect("valid address pattern")
    });
    match pattern.captures(text) {
        Some(captures) => {
            let offset = parse_immediate(captures.get(1)?.as_str())?;
            let base = captures.get(2)?.as_str();
            Some(Address { offset, base })
        }
        None if !text.is_empty() && !text.contains(['(', ')']) => {
            Some(Address { offset: 0, base: text })
        }
        None => None,
    }
}

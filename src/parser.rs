use crate::instruction::{is_numeral, Instruction};
use anyhow::{Context, Result};
use log::{debug, trace, warn};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

//
// Public Interface
//

/// A parsed program: its instructions numbered from one, and the position
/// every label refers to.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub labels: HashMap<String, usize>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unbalanced parenthesis at offset {0}")]
    Unbalanced(usize),

    #[error("label \"{0}\" is defined more than once")]
    DuplicateLabel(String),
}

/// Reads a program of the form `(seq (op a b ...) (op ...) ...)`. The
/// `seq` wrapper is optional. Whitespace is insignificant and trailing
/// commas on operands are dropped.
///
/// A group consisting of a single `name:` token defines a label for the
/// next instruction and is not numbered itself.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let content = collapse_whitespace(source);
    let mut groups = top_level_groups(&content)?;

    if groups.len() == 1 {
        let single: &str = groups[0];
        if let Some(body) = seq_body(single) {
            groups = top_level_groups(body)?;
        }
    }

    let mut program = Program::default();
    for group in groups {
        let mut tokens = group.split_whitespace();
        let mnemonic = match tokens.next() {
            Some(mnemonic) => mnemonic,
            None => {
                trace!("ignoring empty group");
                continue;
            }
        };
        let operands: Vec<String> = tokens
            .map(|operand| operand.trim_end_matches(',').to_string())
            .collect();

        if operands.is_empty() && mnemonic.len() > 1 && mnemonic.ends_with(':') {
            let label = &mnemonic[..mnemonic.len() - 1];
            let position = program.instructions.len() + 1;
            if program.labels.insert(label.to_string(), position).is_some() {
                return Err(ParseError::DuplicateLabel(label.to_string()));
            }
            trace!("label {} -> {}", label, position);
            continue;
        }

        let position = program.instructions.len() + 1;
        program
            .instructions
            .push(Instruction::new(mnemonic, operands, position));
    }

    if program.instructions.is_empty() {
        warn!("program contains no instructions");
    }
    debug!(
        "parsed {} instructions and {} labels",
        program.instructions.len(),
        program.labels.len()
    );

    Ok(program)
}

pub fn parse_file(path: &Path) -> Result<Program> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("could not read program {}", path.display()))?;
    let program = parse_program(&source)
        .with_context(|| format!("could not parse program {}", path.display()))?;
    Ok(program)
}

impl Program {
    /// Returns the instructions with every branch and jump target that names
    /// a known label replaced by the label's position. Numeric targets and
    /// unknown labels are left as written.
    pub fn resolve_labels(&self) -> Vec<Instruction> {
        self.instructions
            .iter()
            .map(|instruction| {
                let mut resolved = instruction.clone();
                if let Some(index) = instruction.target_operand() {
                    if let Some(target) = resolved.operands.get_mut(index) {
                        if !is_numeral(target) {
                            if let Some(position) = self.labels.get(target.as_str()) {
                                trace!(
                                    "resolving {} at {} to {}",
                                    target,
                                    instruction.position,
                                    position
                                );
                                *target = position.to_string();
                            }
                        }
                    }
                }
                resolved
            })
            .collect()
    }
}

//
// Private Implementation
//

fn collapse_whitespace(source: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
    pattern.replace_all(source, " ").trim().to_string()
}

fn seq_body(group: &str) -> Option<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^\s*seq\b(.*)$").expect("valid seq pattern"));
    pattern
        .captures(group)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str())
}

// Splits `content` into the interiors of its outermost parenthesized
// groups. Nested parentheses, as in memory operands, stay inside their
// group. Text between groups is ignored.
fn top_level_groups(content: &str) -> Result<Vec<&str>, ParseError> {
    let mut groups = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;

    for (offset, c) in content.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = offset + 1;
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err(ParseError::Unbalanced(offset));
                }
                depth -= 1;
                if depth == 0 {
                    groups.push(&content[start..offset]);
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ParseError::Unbalanced(content.len()));
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_seq_wrapped_programs() {
        let program = parse_program("(seq\n  (addi x1, x0, 5)\n  (sw x1 4(x2)))").unwrap();
        assert_eq!(program.instructions.len(), 2);
        assert_eq!(program.instructions[0].mnemonic, "addi");
        assert_eq!(program.instructions[0].operands, vec!["x1", "x0", "5"]);
        assert_eq!(program.instructions[1].operands, vec!["x1", "4(x2)"]);
        assert_eq!(program.instructions[1].position, 2);
    }

    #[test]
    fn seq_wrapper_is_optional() {
        let program = parse_program("(add x1 x2 x3) (sub x4 x5 x6)").unwrap();
        assert_eq!(program.instructions.len(), 2);
        assert_eq!(program.instructions[1].mnemonic, "sub");
    }

    #[test]
    fn sequence_named_like_seq_is_an_instruction() {
        let program = parse_program("(seqz x1 x2)").unwrap();
        assert_eq!(program.instructions.len(), 1);
        assert_eq!(program.instructions[0].mnemonic, "seqz");
    }

    #[test]
    fn labels_do_not_take_positions() {
        let program =
            parse_program("(seq (start:) (addi x1 x0 1) (loop:) (beq x1 x0 loop) (end:))").unwrap();
        assert_eq!(program.instructions.len(), 2);
        assert_eq!(program.instructions[1].position, 2);
        assert_eq!(program.labels["start"], 1);
        assert_eq!(program.labels["loop"], 2);
        assert_eq!(program.labels["end"], 3);
    }

    #[test]
    fn resolves_known_labels_only() {
        let source = "(seq (beq x1 x2 skip) (jal x1 nowhere) (skip:) (addi x3 x0 1))";
        let program = parse_program(source).unwrap();
        let resolved = program.resolve_labels();
        assert_eq!(resolved[0].operands[2], "3");
        assert_eq!(resolved[1].operands[1], "nowhere");
        assert_eq!(resolved[2].operands, vec!["x3", "x0", "1"]);
    }

    #[test]
    fn rejects_duplicate_labels() {
        assert_eq!(
            parse_program("(a:) (nop) (a:)").unwrap_err(),
            ParseError::DuplicateLabel("a".to_string())
        );
    }

    #[test]
    fn rejects_unbalanced_parentheses() {
        assert!(matches!(parse_program("(seq (add x1 x2 x3)"), Err(ParseError::Unbalanced(_))));
        assert!(matches!(parse_program("add x1 x2 x3)"), Err(ParseError::Unbalanced(_))));
    }

    #[test]
    fn text_without_groups_is_empty() {
        let program = parse_program("add x1 x2 x3").unwrap();
        assert!(program.instructions.is_empty());
        assert!(parse_program("").unwrap().instructions.is_empty());
    }
}

//! Text form of instruction streams.
//!
//! One instruction per line: the opcode name followed by its integer
//! operands. `#` starts a comment. A line `name:` defines a label at the
//! offset of the next instruction; an operand `@name` refers to it.
//!
//! ```text
//! loop:
//!   r_load_local 0 0
//!   b_if 0 @loop
//!   ret
//! ```

use std::str::FromStr;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::opcodes::Opcode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("line {line}: unknown opcode '{name}'")]
    UnknownOpcode { line: usize, name: String },
    #[error("line {line}: {opcode} takes {expected} operands, got {found}")]
    OperandCount {
        line: usize,
        opcode: Opcode,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: bad operand '{operand}'")]
    BadOperand { line: usize, operand: String },
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },
    #[error("line {line}: label '{label}' defined twice")]
    DuplicateLabel { line: usize, label: String },
}

enum Operand<'a> {
    Literal(i64),
    Label(&'a str),
}

struct Line<'a> {
    number: usize,
    opcode: Opcode,
    operands: Vec<Operand<'a>>,
}

/// Assemble `source` into a raw instruction stream.
pub fn assemble(source: &str) -> Result<Vec<i64>, AssembleError> {
    let mut labels: FxHashMap<&str, i64> = FxHashMap::default();
    let mut lines = Vec::new();
    let mut offset = 0usize;

    for (index, text) in source.lines().enumerate() {
        let number = index.saturating_add(1);
        let text = text.split('#').next().unwrap_or_default().trim();
        if text.is_empty() {
            continue;
        }
        if let Some(label) = text.strip_suffix(':') {
            let label = label.trim();
            let at = i64::try_from(offset).map_err(|_| AssembleError::BadOperand {
                line: number,
                operand: label.to_string(),
            })?;
            if labels.insert(label, at).is_some() {
                return Err(AssembleError::DuplicateLabel {
                    line: number,
                    label: label.to_string(),
                });
            }
            continue;
        }

        let mut tokens = text.split_whitespace();
        let name = tokens.next().unwrap_or_default();
        let opcode = Opcode::from_str(name).map_err(|_| AssembleError::UnknownOpcode {
            line: number,
            name: name.to_string(),
        })?;
        let operands = tokens
            .map(|token| parse_operand(number, token))
            .collect::<Result<Vec<_>, _>>()?;
        let expected = opcode.width().saturating_sub(1);
        if operands.len() != expected {
            return Err(AssembleError::OperandCount {
                line: number,
                opcode,
                expected,
                found: operands.len(),
            });
        }
        offset = offset.saturating_add(opcode.width());
        lines.push(Line {
            number,
            opcode,
            operands,
        });
    }

    let mut words = Vec::with_capacity(offset);
    for line in lines {
        words.push(i64::from(line.opcode));
        for operand in line.operands {
            let word = match operand {
                Operand::Literal(value) => value,
                Operand::Label(label) => {
                    *labels
                        .get(label)
                        .ok_or_else(|| AssembleError::UndefinedLabel {
                            line: line.number,
                            label: label.to_string(),
                        })?
                }
            };
            words.push(word);
        }
    }
    Ok(words)
}

fn parse_operand(line: usize, token: &str) -> Result<Operand<'_>, AssembleError> {
    if let Some(label) = token.strip_prefix('@') {
        return Ok(Operand::Label(label));
    }
    token
        .parse::<i64>()
        .map(Operand::Literal)
        .map_err(|_| AssembleError::BadOperand {
            line,
            operand: token.to_string(),
        })
}

/// Render a raw stream back to text, one instruction per line.
pub fn disassemble(iseq: &[i64]) -> String {
    let mut out = String::new();
    let mut ip = 0usize;
    while let Some(&word) = iseq.get(ip) {
        let Ok(opcode) = Opcode::try_from(word) else {
            out.push_str(&format!("{ip:04}: .word {word}\n"));
            ip = ip.saturating_add(1);
            continue;
        };
        out.push_str(&format!("{ip:04}: {opcode}"));
        for operand in iseq
            .iter()
            .skip(ip.saturating_add(1))
            .take(opcode.width().saturating_sub(1))
        {
            out.push_str(&format!(" {operand}"));
        }
        out.push('\n');
        ip = ip.saturating_add(opcode.width());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembles_operands_in_order() {
        let words = assemble("push_literal 0\npush_literal 1\nadd\nret").unwrap();
        assert_eq!(
            words,
            vec![
                i64::from(Opcode::PushLiteral),
                0,
                i64::from(Opcode::PushLiteral),
                1,
                i64::from(Opcode::Add),
                i64::from(Opcode::Ret),
            ]
        );
    }

    #[test]
    fn test_labels_resolve_forward_and_backward() {
        let source = "
            top:
              goto @done   # skip the nil
              push_nil
            done:
              goto @top
        ";
        let words = assemble(source).unwrap();
        assert_eq!(words[1], 3);
        assert_eq!(words[4], 0);
    }

    #[test]
    fn test_errors_name_the_line() {
        assert_eq!(
            assemble("noop\nfly 1").unwrap_err(),
            AssembleError::UnknownOpcode {
                line: 2,
                name: "fly".to_string()
            }
        );
        assert!(matches!(
            assemble("push_int").unwrap_err(),
            AssembleError::OperandCount {
                line: 1,
                expected: 1,
                found: 0,
                ..
            }
        ));
        assert!(matches!(
            assemble("goto @nowhere").unwrap_err(),
            AssembleError::UndefinedLabel { line: 1, .. }
        ));
        assert!(matches!(
            assemble("push_int x").unwrap_err(),
            AssembleError::BadOperand { line: 1, .. }
        ));
    }

    #[test]
    fn test_disassemble_shows_offsets() {
        let words = assemble("push_int 7\nret").unwrap();
        assert_eq!(disassemble(&words), "0000: push_int 7\n0002: ret\n");
    }
}

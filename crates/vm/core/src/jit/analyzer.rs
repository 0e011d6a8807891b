//! Bytecode analyzer for compiler backends.
//!
//! Scans a raw instruction stream independently of the linker: counts
//! the reference slots linking will fill, the per-instruction runtime
//! objects it will create, and splits the stream into basic blocks.

use std::collections::BTreeSet;

use crate::errors::LinkError;
use crate::opcodes::Opcode;

/// Pre-analyzed bytecode metadata used for compilation decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedBytecode {
    /// Offset of every instruction.
    pub instruction_starts: Vec<usize>,
    /// Basic block boundaries as inclusive (start, end) word offsets.
    pub basic_blocks: Vec<(usize, usize)>,
    /// Offsets branched to by `goto`, `b_if` and handler registrations.
    pub jump_targets: Vec<usize>,
    pub literal_references: usize,
    pub call_sites: usize,
    pub constant_caches: usize,
    pub unwind_sites: usize,
    pub measurements: usize,
}

impl AnalyzedBytecode {
    pub fn instruction_count(&self) -> usize {
        self.instruction_starts.len()
    }

    /// Slots of the reference table a linked program will have.
    pub fn reference_count(&self) -> usize {
        self.literal_references
            .saturating_add(self.call_sites)
            .saturating_add(self.constant_caches)
            .saturating_add(self.unwind_sites)
    }

    /// Whether the method sends messages at all.
    pub fn has_dispatch(&self) -> bool {
        self.call_sites > 0
    }
}

fn is_block_terminator(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Goto
            | Opcode::GotoIfTrue
            | Opcode::GotoIfFalse
            | Opcode::Ret
            | Opcode::RRet
            | Opcode::BIf
            | Opcode::BIfSerial
            | Opcode::RaiseExc
            | Opcode::Reraise
    )
}

/// Operand offset holding a branch target, if the instruction has one.
fn target_operand(opcode: Opcode) -> Option<usize> {
    match opcode {
        Opcode::Goto | Opcode::GotoIfTrue | Opcode::GotoIfFalse | Opcode::SetupUnwind => Some(1),
        Opcode::BIf => Some(2),
        Opcode::BIfSerial => Some(3),
        _ => None,
    }
}

/// Analyze `iseq` without linking it.
pub fn analyze_bytecode(iseq: &[i64]) -> Result<AnalyzedBytecode, LinkError> {
    let mut analysis = AnalyzedBytecode::default();
    let mut targets = BTreeSet::new();
    let mut opcodes = Vec::new();
    let len = iseq.len();
    let mut ip = 0usize;

    while let Some(&word) = iseq.get(ip) {
        let opcode = Opcode::try_from(word).map_err(|word| LinkError::InvalidOpcode { ip, word })?;
        let width = opcode.width();
        if ip.saturating_add(width) > len {
            return Err(LinkError::Truncated {
                ip,
                opcode,
                width,
                len,
            });
        }

        if opcode.is_literal_reference() {
            analysis.literal_references = analysis.literal_references.saturating_add(1);
        } else if opcode.is_dispatch() {
            analysis.call_sites = analysis.call_sites.saturating_add(1);
        } else if opcode.is_constant_access() {
            analysis.constant_caches = analysis.constant_caches.saturating_add(1);
        } else if opcode.is_unwind() {
            analysis.unwind_sites = analysis.unwind_sites.saturating_add(1);
        } else if opcode == Opcode::MCounter {
            analysis.measurements = analysis.measurements.saturating_add(1);
        }

        if let Some(offset) = target_operand(opcode)
            && let Some(&target) = iseq.get(ip.saturating_add(offset))
            && let Ok(target) = usize::try_from(target)
        {
            targets.insert(target);
        }

        analysis.instruction_starts.push(ip);
        opcodes.push(opcode);
        ip = ip.saturating_add(width);
    }

    let mut block_start = 0usize;
    for (&start, &opcode) in analysis.instruction_starts.iter().zip(opcodes.iter()) {
        if targets.contains(&start) && start > block_start {
            analysis
                .basic_blocks
                .push((block_start, start.saturating_sub(1)));
            block_start = start;
        }
        if is_block_terminator(opcode) {
            let end = start.saturating_add(opcode.width()).saturating_sub(1);
            analysis.basic_blocks.push((block_start, end));
            block_start = end.saturating_add(1);
        }
    }
    if block_start < len {
        analysis
            .basic_blocks
            .push((block_start, len.saturating_sub(1)));
    }

    analysis.jump_targets = targets.into_iter().collect();
    Ok(analysis)
}

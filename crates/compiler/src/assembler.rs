//! Two-pass assembler
//!
//! Pass one scans the listing, collecting label positions by advancing the
//! program counter through the operand-size table, and records which source
//! line (`; @source N` annotations) each instruction belongs to. Pass two
//! emits the opcode byte plus 0/1/2/4 little-endian operand bytes per
//! instruction, resolving labels to absolute PCs and range-checking
//! relative jumps.

use crate::error::Diagnostic;
use std::collections::HashMap;
use zplc_core::opcode::Opcode;

/// Result of assembling one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledProgram {
    pub bytecode: Vec<u8>,
    /// PC of `_start` (0 when the listing has no such label).
    pub entry_point: u16,
    pub code_size: u16,
    /// `(pc, source line)` pairs ordered by PC.
    pub mappings: Vec<(u16, u32)>,
}

/// One parsed listing line retained between the passes.
struct Line {
    number: usize,
    label: Option<String>,
    instruction: Option<(Opcode, Option<String>)>,
    source_line: Option<u32>,
}

pub fn assemble(source: &str) -> Result<AssembledProgram, Diagnostic> {
    let lines = parse_lines(source)?;

    // Pass one: label PCs and source-line mappings.
    let mut labels: HashMap<String, u16> = HashMap::new();
    let mut mappings = Vec::new();
    let mut pc = 0u32;
    for line in &lines {
        if let Some(label) = &line.label {
            if labels.insert(label.clone(), pc as u16).is_some() {
                return Err(Diagnostic::assembler(format!("duplicate label '{}'", label)));
            }
        }
        if let Some((opcode, _)) = &line.instruction {
            if let Some(source_line) = line.source_line {
                mappings.push((pc as u16, source_line));
            }
            pc += opcode.encoded_size() as u32;
            if pc > u16::MAX as u32 + 1 {
                return Err(Diagnostic::assembler("program exceeds the 64 KiB code space".to_string()));
            }
        }
    }

    // Pass two: byte emission.
    let mut bytecode = Vec::with_capacity(pc as usize);
    for line in &lines {
        let Some((opcode, operand)) = &line.instruction else {
            continue;
        };
        let current_pc = bytecode.len() as u16;
        bytecode.push(u8::from(*opcode));
        match opcode.operand_size() {
            0 => {
                if operand.is_some() {
                    return Err(Diagnostic::assembler(format!(
                        "line {}: '{}' takes no operand",
                        line.number,
                        opcode.mnemonic()
                    )));
                }
            }
            size => {
                let Some(operand) = operand else {
                    return Err(Diagnostic::assembler(format!(
                        "line {}: '{}' needs an operand",
                        line.number,
                        opcode.mnemonic()
                    )));
                };
                let value =
                    resolve_operand(*opcode, operand, current_pc, &labels, line.number)?;
                match size {
                    1 => bytecode.push(value as u8),
                    2 => bytecode.extend_from_slice(&(value as u16).to_le_bytes()),
                    _ => bytecode.extend_from_slice(&value.to_le_bytes()),
                }
            }
        }
    }

    let entry_point = labels.get("_start").copied().unwrap_or(0);
    Ok(AssembledProgram {
        code_size: bytecode.len() as u16,
        entry_point,
        bytecode,
        mappings,
    })
}

fn parse_lines(source: &str) -> Result<Vec<Line>, Diagnostic> {
    let mut lines = Vec::new();
    let mut pending_source: Option<u32> = None;

    for (index, raw) in source.lines().enumerate() {
        let number = index + 1;

        // `; @source N` annotates the next instruction.
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix(";") {
            let rest = rest.trim();
            if let Some(n) = rest.strip_prefix("@source ") {
                if let Ok(line) = n.trim().parse::<u32>() {
                    pending_source = Some(line);
                }
            }
            continue;
        }

        // Strip a trailing comment.
        let code = match raw.find(';') {
            Some(i) => &raw[..i],
            None => raw,
        };
        let mut code = code.trim();
        if code.is_empty() {
            continue;
        }

        let mut label = None;
        if let Some(colon) = code.find(':') {
            let candidate = code[..colon].trim();
            if candidate.is_empty() || !is_identifier(candidate) {
                return Err(Diagnostic::assembler(format!(
                    "line {}: malformed label '{}'",
                    number, candidate
                )));
            }
            label = Some(candidate.to_string());
            code = code[colon + 1..].trim();
        }

        let instruction = if code.is_empty() {
            None
        } else {
            let mut parts = code.split_whitespace();
            let mnemonic = parts.next().expect("non-empty code has a first token");
            let operand = parts.next().map(|s| s.to_string());
            if let Some(extra) = parts.next() {
                return Err(Diagnostic::assembler(format!(
                    "line {}: unexpected token '{}'",
                    number, extra
                )));
            }
            let opcode = Opcode::from_mnemonic(&mnemonic.to_ascii_uppercase()).ok_or_else(|| {
                Diagnostic::assembler(format!("line {}: unknown mnemonic '{}'", number, mnemonic))
            })?;
            Some((opcode, operand))
        };

        let source_line = if instruction.is_some() { pending_source.take() } else { None };
        lines.push(Line { number, label, instruction, source_line });
    }
    Ok(lines)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_number(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<i64>().ok()
    }
}

fn resolve_operand(
    opcode: Opcode,
    operand: &str,
    pc: u16,
    labels: &HashMap<String, u16>,
    line: usize,
) -> Result<u32, Diagnostic> {
    let size = opcode.operand_size();

    // Numeric literal?
    if let Some(value) = parse_number(operand) {
        let in_range = match size {
            1 => (-128..=255).contains(&value),
            2 => (0..=0xFFFF).contains(&value),
            _ => (i32::MIN as i64..=u32::MAX as i64).contains(&value),
        };
        if !in_range {
            return Err(Diagnostic::assembler(format!(
                "line {}: operand {} out of range for '{}'",
                line,
                value,
                opcode.mnemonic()
            )));
        }
        return Ok(value as u32);
    }

    // Label.
    let Some(&target) = labels.get(operand) else {
        return Err(Diagnostic::assembler(format!(
            "line {}: unknown label '{}'",
            line, operand
        )));
    };

    if opcode.is_relative_branch() {
        // Offset is relative to the next instruction (opcode + 1 byte).
        let offset = target as i32 - (pc as i32 + 2);
        if !(-128..=127).contains(&offset) {
            return Err(Diagnostic::assembler(format!(
                "line {}: relative jump to '{}' out of range ({} bytes)",
                line, operand, offset
            )));
        }
        return Ok((offset as i8 as u8) as u32);
    }

    Ok(target as u32)
}

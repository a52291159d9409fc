//! Bytecode disassembler
//!
//! Walks a code buffer with the operand-size table and renders the textual
//! mnemonic form. Byte values that do not decode to an opcode are rendered as
//! `DB 0xNN` data bytes so a damaged image still produces a listing.

use crate::opcode::Opcode;

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Program counter of the opcode byte.
    pub pc: usize,
    pub opcode: Opcode,
    /// Operand value, zero-extended; `None` for operand-less opcodes.
    pub operand: Option<u32>,
}

/// Iterator over the instructions of a code buffer.
///
/// A truncated trailing instruction or an undecodable byte ends the iteration
/// with an `Err` carrying the offending PC.
pub struct Decoder<'a> {
    code: &'a [u8],
    pc: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Decoder { code, pc: 0 }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<Instruction, usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pc >= self.code.len() {
            return None;
        }
        let pc = self.pc;
        let opcode = match Opcode::try_from(self.code[pc]) {
            Ok(op) => op,
            Err(_) => {
                self.pc = self.code.len();
                return Some(Err(pc));
            }
        };
        let size = opcode.operand_size();
        if pc + 1 + size > self.code.len() {
            self.pc = self.code.len();
            return Some(Err(pc));
        }
        let operand = match size {
            0 => None,
            1 => Some(self.code[pc + 1] as u32),
            2 => Some(u16::from_le_bytes([self.code[pc + 1], self.code[pc + 2]]) as u32),
            _ => Some(u32::from_le_bytes([
                self.code[pc + 1],
                self.code[pc + 2],
                self.code[pc + 3],
                self.code[pc + 4],
            ])),
        };
        self.pc = pc + 1 + size;
        Some(Ok(Instruction { pc, opcode, operand }))
    }
}

/// Disassemble a whole buffer into a line-per-instruction listing.
pub fn disassemble(code: &[u8]) -> String {
    let mut out = String::new();
    let mut pc = 0usize;
    while pc < code.len() {
        match Opcode::try_from(code[pc]) {
            Ok(opcode) if pc + opcode.encoded_size() <= code.len() => {
                let size = opcode.operand_size();
                match size {
                    0 => out.push_str(&format!("{:04X}:  {}\n", pc, opcode.mnemonic())),
                    1 => out.push_str(&format!(
                        "{:04X}:  {} {}\n",
                        pc,
                        opcode.mnemonic(),
                        code[pc + 1]
                    )),
                    2 => {
                        let v = u16::from_le_bytes([code[pc + 1], code[pc + 2]]);
                        out.push_str(&format!("{:04X}:  {} 0x{:04X}\n", pc, opcode.mnemonic(), v));
                    }
                    _ => {
                        let v = u32::from_le_bytes([
                            code[pc + 1],
                            code[pc + 2],
                            code[pc + 3],
                            code[pc + 4],
                        ]);
                        out.push_str(&format!("{:04X}:  {} {}\n", pc, opcode.mnemonic(), v));
                    }
                }
                pc += 1 + size;
            }
            _ => {
                out.push_str(&format!("{:04X}:  DB 0x{:02X}\n", pc, code[pc]));
                pc += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_push8_halt() {
        let text = disassemble(&[0x40, 0x2A, 0x01]);
        assert!(text.contains("PUSH8 42"));
        assert!(text.contains("HALT"));
    }

    #[test]
    fn test_disassemble_two_byte_operand_little_endian() {
        // JMP 0x1234 encodes as 90 34 12
        let text = disassemble(&[0x90, 0x34, 0x12]);
        assert!(text.contains("JMP 0x1234"));
    }

    #[test]
    fn test_disassemble_unknown_byte_as_db() {
        let text = disassemble(&[0x7F, 0x00]);
        assert!(text.contains("DB 0x7F"));
        assert!(text.contains("NOP"));
    }

    #[test]
    fn test_decoder_yields_instruction_starts() {
        let code = [0x40, 0x2A, 0xC0, 0x01, 0x02, 0x03, 0x04, 0x01];
        let pcs: Vec<usize> = Decoder::new(&code).map(|i| i.unwrap().pc).collect();
        assert_eq!(pcs, vec![0, 2, 7]);
    }

    #[test]
    fn test_decoder_truncated_operand_is_error() {
        let mut d = Decoder::new(&[0x88, 0x01]); // PUSH16 missing a byte
        assert_eq!(d.next(), Some(Err(0)));
        assert_eq!(d.next(), None);
    }
}

//! ZPLC instruction set
//!
//! The virtual machine executes a compact stack-machine bytecode: one opcode
//! byte followed by 0, 1, 2 or 4 operand bytes in little-endian order. The
//! numeric opcode space is grouped by operand width:
//!
//! - `0x00..=0x3F` — no operand (system, stack, indirect memory, strings,
//!   arithmetic, logic, comparisons)
//! - `0x40..=0x5F` — one operand byte (`PUSH8`, `PICK`, relative jumps)
//! - `0x80..=0xBF` — two operand bytes, absolute (`LOAD*`/`STORE*`, `PUSH16`,
//!   absolute jumps and `CALL`), with the exceptions of `RET` and the type
//!   conversions which take none
//! - `0xC0..=0xFF` — four operand bytes (`PUSH32`)
//!
//! [`Opcode::operand_size`] is the authoritative width lookup; the assembler,
//! disassembler and linker all advance the program counter through it.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Number of opcodes in the instruction set.
pub const OPCODE_COUNT: usize = 75;

/// One VM opcode. The discriminant is the encoded opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // System
    Nop = 0x00,
    Halt = 0x01,
    Break = 0x02,
    GetTicks = 0x03,

    // Stack manipulation
    Dup = 0x10,
    Drop = 0x11,
    Swap = 0x12,
    Over = 0x13,
    Rot = 0x14,

    // Indirect memory access (address on stack)
    LoadI8 = 0x15,
    LoadI32 = 0x16,
    StoreI8 = 0x17,
    StoreI32 = 0x18,
    LoadI16 = 0x19,
    StoreI16 = 0x1A,

    // Strings (addresses of `[len u16][cap u16][bytes][NUL]` records on stack)
    StrLen = 0x1B,
    StrCpy = 0x1C,
    StrCat = 0x1D,
    StrCmp = 0x1E,
    StrClr = 0x1F,

    // Integer arithmetic
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Neg = 0x25,
    Abs = 0x26,

    // Single-precision float arithmetic
    AddF = 0x28,
    SubF = 0x29,
    MulF = 0x2A,
    DivF = 0x2B,
    NegF = 0x2C,
    AbsF = 0x2D,

    // Logic / bitwise
    And = 0x30,
    Or = 0x31,
    Xor = 0x32,
    Not = 0x33,
    Shl = 0x34,
    Shr = 0x35,
    Sar = 0x36,

    // Comparisons
    Eq = 0x38,
    Ne = 0x39,
    Lt = 0x3A,
    Le = 0x3B,
    Gt = 0x3C,
    Ge = 0x3D,
    LtU = 0x3E,
    GtU = 0x3F,

    // One-byte operand
    Push8 = 0x40,
    Pick = 0x41,
    Jr = 0x50,
    Jrz = 0x51,
    Jrnz = 0x52,

    // Two-byte operand (absolute addresses / PCs)
    Load8 = 0x80,
    Load16 = 0x81,
    Load32 = 0x82,
    Load64 = 0x83,
    Store8 = 0x84,
    Store16 = 0x85,
    Store32 = 0x86,
    Store64 = 0x87,
    Push16 = 0x88,
    Jmp = 0x90,
    Jz = 0x91,
    Jnz = 0x92,
    Call = 0x93,

    // Encoded in the two-byte range but operand-less
    Ret = 0x94,
    I2F = 0xA0,
    F2I = 0xA1,
    I2B = 0xA2,
    Ext8 = 0xA3,
    Ext16 = 0xA4,
    Zext8 = 0xA5,
    Zext16 = 0xA6,

    // Four-byte operand
    Push32 = 0xC0,
}

impl Opcode {
    /// Number of operand bytes following the opcode byte: 0, 1, 2 or 4.
    pub fn operand_size(self) -> usize {
        use Opcode::*;
        match self {
            Push8 | Pick | Jr | Jrz | Jrnz => 1,
            Load8 | Load16 | Load32 | Load64 | Store8 | Store16 | Store32 | Store64 | Push16
            | Jmp | Jz | Jnz | Call => 2,
            Push32 => 4,
            _ => 0,
        }
    }

    /// Total encoded size of the instruction, opcode byte included.
    pub fn encoded_size(self) -> usize {
        1 + self.operand_size()
    }

    /// True for the instructions whose 16-bit operand is an absolute program
    /// counter. Only these are patched when programs are relocated; LOAD and
    /// STORE operands are data addresses and must be left alone.
    pub fn is_absolute_branch(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::Call)
    }

    /// True for the relative jumps (signed 8-bit offset from the next
    /// instruction).
    pub fn is_relative_branch(self) -> bool {
        matches!(self, Opcode::Jr | Opcode::Jrz | Opcode::Jrnz)
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Halt => "HALT",
            Break => "BREAK",
            GetTicks => "GET_TICKS",
            Dup => "DUP",
            Drop => "DROP",
            Swap => "SWAP",
            Over => "OVER",
            Rot => "ROT",
            LoadI8 => "LOADI8",
            LoadI32 => "LOADI32",
            StoreI8 => "STOREI8",
            StoreI32 => "STOREI32",
            LoadI16 => "LOADI16",
            StoreI16 => "STOREI16",
            StrLen => "STRLEN",
            StrCpy => "STRCPY",
            StrCat => "STRCAT",
            StrCmp => "STRCMP",
            StrClr => "STRCLR",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Neg => "NEG",
            Abs => "ABS",
            AddF => "ADDF",
            SubF => "SUBF",
            MulF => "MULF",
            DivF => "DIVF",
            NegF => "NEGF",
            AbsF => "ABSF",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Not => "NOT",
            Shl => "SHL",
            Shr => "SHR",
            Sar => "SAR",
            Eq => "EQ",
            Ne => "NE",
            Lt => "LT",
            Le => "LE",
            Gt => "GT",
            Ge => "GE",
            LtU => "LTU",
            GtU => "GTU",
            Push8 => "PUSH8",
            Pick => "PICK",
            Jr => "JR",
            Jrz => "JRZ",
            Jrnz => "JRNZ",
            Load8 => "LOAD8",
            Load16 => "LOAD16",
            Load32 => "LOAD32",
            Load64 => "LOAD64",
            Store8 => "STORE8",
            Store16 => "STORE16",
            Store32 => "STORE32",
            Store64 => "STORE64",
            Push16 => "PUSH16",
            Jmp => "JMP",
            Jz => "JZ",
            Jnz => "JNZ",
            Call => "CALL",
            Ret => "RET",
            I2F => "I2F",
            F2I => "F2I",
            I2B => "I2B",
            Ext8 => "EXT8",
            Ext16 => "EXT16",
            Zext8 => "ZEXT8",
            Zext16 => "ZEXT16",
            Push32 => "PUSH32",
        }
    }

    /// Look an opcode up by its assembly mnemonic (case-sensitive, the
    /// assembler upcases before calling).
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        use Opcode::*;
        let op = match mnemonic {
            "NOP" => Nop,
            "HALT" => Halt,
            "BREAK" => Break,
            "GET_TICKS" => GetTicks,
            "DUP" => Dup,
            "DROP" => Drop,
            "SWAP" => Swap,
            "OVER" => Over,
            "ROT" => Rot,
            "LOADI8" => LoadI8,
            "LOADI32" => LoadI32,
            "STOREI8" => StoreI8,
            "STOREI32" => StoreI32,
            "LOADI16" => LoadI16,
            "STOREI16" => StoreI16,
            "STRLEN" => StrLen,
            "STRCPY" => StrCpy,
            "STRCAT" => StrCat,
            "STRCMP" => StrCmp,
            "STRCLR" => StrClr,
            "ADD" => Add,
            "SUB" => Sub,
            "MUL" => Mul,
            "DIV" => Div,
            "MOD" => Mod,
            "NEG" => Neg,
            "ABS" => Abs,
            "ADDF" => AddF,
            "SUBF" => SubF,
            "MULF" => MulF,
            "DIVF" => DivF,
            "NEGF" => NegF,
            "ABSF" => AbsF,
            "AND" => And,
            "OR" => Or,
            "XOR" => Xor,
            "NOT" => Not,
            "SHL" => Shl,
            "SHR" => Shr,
            "SAR" => Sar,
            "EQ" => Eq,
            "NE" => Ne,
            "LT" => Lt,
            "LE" => Le,
            "GT" => Gt,
            "GE" => Ge,
            "LTU" => LtU,
            "GTU" => GtU,
            "PUSH8" => Push8,
            "PICK" => Pick,
            "JR" => Jr,
            "JRZ" => Jrz,
            "JRNZ" => Jrnz,
            "LOAD8" => Load8,
            "LOAD16" => Load16,
            "LOAD32" => Load32,
            "LOAD64" => Load64,
            "STORE8" => Store8,
            "STORE16" => Store16,
            "STORE32" => Store32,
            "STORE64" => Store64,
            "PUSH16" => Push16,
            "JMP" => Jmp,
            "JZ" => Jz,
            "JNZ" => Jnz,
            "CALL" => Call,
            "RET" => Ret,
            "I2F" => I2F,
            "F2I" => F2I,
            "I2B" => I2B,
            "EXT8" => Ext8,
            "EXT16" => Ext16,
            "ZEXT8" => Zext8,
            "ZEXT16" => Zext16,
            "PUSH32" => Push32,
            _ => return None,
        };
        Some(op)
    }

    /// Every opcode, in encoding order.
    pub fn all() -> impl Iterator<Item = Opcode> {
        (0u8..=0xFF).filter_map(|b| Opcode::try_from(b).ok())
    }
}

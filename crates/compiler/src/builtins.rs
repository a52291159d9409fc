//! Built-in library registry
//!
//! Two disjoint tables, both keyed case-insensitively by name:
//!
//! - **function blocks** — stateful; every instance occupies a fixed number
//!   of work-memory bytes and exposes named members at fixed offsets. The
//!   code generator inlines one cycle of the block's behaviour at each call
//!   site against the instance's base address (`codegen/blocks.rs` holds the
//!   emitters, dispatched on [`FbKind`]).
//! - **functions** — stateless; each has an inline emitter dispatched on
//!   [`FunctionKind`] (`codegen/functions.rs`).
//!
//! The registry itself is declarative: names, sizes, member layouts, arities
//! and result types. Keeping the tables data-only lets the symbol table and
//! the code generator share one source of truth.

use crate::ast::ElementaryType;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Role of a function-block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Input,
    Output,
    Internal,
}

/// One member of a built-in function block.
#[derive(Debug, Clone, Copy)]
pub struct FbMember {
    pub name: &'static str,
    pub offset: u16,
    pub size: u16,
    pub role: MemberRole,
    pub ty: ElementaryType,
}

/// Emitter selector for built-in function blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbKind {
    Ton,
    Tof,
    Tp,
    RTrig,
    FTrig,
    Rs,
    Sr,
    Ctu,
    Ctd,
    Ctud,
    Blink,
    Pwm,
    Pulse,
    Hysteresis,
    Deadband,
    LagFilter,
    RampReal,
    Integral,
    Derivative,
    PidCompact,
    Fifo,
    Lifo,
}

/// A built-in function-block definition.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFb {
    pub name: &'static str,
    pub size: u16,
    pub members: &'static [FbMember],
    pub kind: FbKind,
}

impl BuiltinFb {
    pub fn member(&self, name: &str) -> Option<&'static FbMember> {
        self.members
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

/// Ring capacity of the FIFO buffer block.
pub const FIFO_CAPACITY: u16 = 10;
/// Stack capacity of the LIFO buffer block.
pub const LIFO_CAPACITY: u16 = 9;

use ElementaryType::{Bool, DInt, Int, Real, Time, UDInt};
use MemberRole::{Input, Internal, Output};

macro_rules! member {
    ($name:literal, $offset:literal, $size:literal, $role:expr, $ty:expr) => {
        FbMember { name: $name, offset: $offset, size: $size, role: $role, ty: $ty }
    };
}

const TIMER_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 1, Input, Bool),
    member!("Q", 1, 1, Output, Bool),
    member!("RUNNING", 2, 1, Internal, Bool),
    member!("PT", 4, 4, Input, Time),
    member!("ET", 8, 4, Output, Time),
    member!("START", 12, 4, Internal, Time),
];

const EDGE_MEMBERS: &[FbMember] = &[
    member!("CLK", 0, 1, Input, Bool),
    member!("Q", 1, 1, Output, Bool),
    member!("PREV", 2, 1, Internal, Bool),
];

const RS_MEMBERS: &[FbMember] = &[
    member!("S", 0, 1, Input, Bool),
    member!("R1", 1, 1, Input, Bool),
    member!("Q1", 2, 1, Output, Bool),
];

const SR_MEMBERS: &[FbMember] = &[
    member!("S1", 0, 1, Input, Bool),
    member!("R", 1, 1, Input, Bool),
    member!("Q1", 2, 1, Output, Bool),
];

const CTU_MEMBERS: &[FbMember] = &[
    member!("CU", 0, 1, Input, Bool),
    member!("R", 1, 1, Input, Bool),
    member!("Q", 2, 1, Output, Bool),
    member!("PREV", 3, 1, Internal, Bool),
    member!("PV", 4, 2, Input, Int),
    member!("CV", 6, 2, Output, Int),
];

const CTD_MEMBERS: &[FbMember] = &[
    member!("CD", 0, 1, Input, Bool),
    member!("LD", 1, 1, Input, Bool),
    member!("Q", 2, 1, Output, Bool),
    member!("PREV", 3, 1, Internal, Bool),
    member!("PV", 4, 2, Input, Int),
    member!("CV", 6, 2, Output, Int),
];

const CTUD_MEMBERS: &[FbMember] = &[
    member!("CU", 0, 1, Input, Bool),
    member!("CD", 1, 1, Input, Bool),
    member!("R", 2, 1, Input, Bool),
    member!("LD", 3, 1, Input, Bool),
    member!("QU", 4, 1, Output, Bool),
    member!("QD", 5, 1, Output, Bool),
    member!("PREV_U", 6, 1, Internal, Bool),
    member!("PREV_D", 7, 1, Internal, Bool),
    member!("PV", 8, 2, Input, Int),
    member!("CV", 10, 2, Output, Int),
];

const BLINK_MEMBERS: &[FbMember] = &[
    member!("ENABLE", 0, 1, Input, Bool),
    member!("OUT", 1, 1, Output, Bool),
    member!("PHASE", 2, 1, Internal, Bool),
    member!("T_ON", 4, 4, Input, Time),
    member!("T_OFF", 8, 4, Input, Time),
    member!("LAST", 12, 4, Internal, Time),
];

const PWM_MEMBERS: &[FbMember] = &[
    member!("ENABLE", 0, 1, Input, Bool),
    member!("OUT", 1, 1, Output, Bool),
    member!("PERIOD", 4, 4, Input, Time),
    member!("DUTY", 8, 4, Input, UDInt),
    member!("START", 12, 4, Internal, Time),
];

const PULSE_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 1, Input, Bool),
    member!("Q", 1, 1, Output, Bool),
    member!("PREV", 2, 1, Internal, Bool),
    member!("RUNNING", 3, 1, Internal, Bool),
    member!("PT", 4, 4, Input, Time),
    member!("START", 8, 4, Internal, Time),
    member!("ET", 12, 4, Output, Time),
];

const HYSTERESIS_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 4, Input, Real),
    member!("HIGH", 4, 4, Input, Real),
    member!("LOW", 8, 4, Input, Real),
    member!("OUT", 12, 1, Output, Bool),
];

const DEADBAND_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 4, Input, Real),
    member!("BAND", 4, 4, Input, Real),
    member!("OUT", 8, 4, Output, Real),
];

const LAG_FILTER_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 4, Input, Real),
    member!("GAIN", 4, 4, Input, Real),
    member!("OUT", 8, 4, Output, Real),
    member!("INIT", 12, 1, Internal, Bool),
];

const RAMP_REAL_MEMBERS: &[FbMember] = &[
    member!("TARGET", 0, 4, Input, Real),
    member!("RATE", 4, 4, Input, Real),
    member!("OUT", 8, 4, Output, Real),
];

const INTEGRAL_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 4, Input, Real),
    member!("K", 4, 4, Input, Real),
    member!("OUT", 8, 4, Output, Real),
    member!("RESET", 12, 1, Input, Bool),
];

const DERIVATIVE_MEMBERS: &[FbMember] = &[
    member!("IN", 0, 4, Input, Real),
    member!("K", 4, 4, Input, Real),
    member!("OUT", 8, 4, Output, Real),
    member!("PREV", 12, 4, Internal, Real),
];

const PID_MEMBERS: &[FbMember] = &[
    member!("SP", 0, 4, Input, Real),
    member!("PV", 4, 4, Input, Real),
    member!("KP", 8, 4, Input, Real),
    member!("KI", 12, 4, Input, Real),
    member!("KD", 16, 4, Input, Real),
    member!("OUT_MIN", 20, 4, Input, Real),
    member!("OUT_MAX", 24, 4, Input, Real),
    member!("OUT", 28, 4, Output, Real),
    member!("I_SUM", 32, 4, Internal, Real),
    member!("PREV_ERR", 36, 4, Internal, Real),
    member!("ENABLE", 40, 1, Input, Bool),
];

const FIFO_MEMBERS: &[FbMember] = &[
    member!("PUSH", 0, 1, Input, Bool),
    member!("POP", 1, 1, Input, Bool),
    member!("RESET", 2, 1, Input, Bool),
    member!("PREV_PUSH", 3, 1, Internal, Bool),
    member!("PREV_POP", 4, 1, Internal, Bool),
    member!("EMPTY", 5, 1, Output, Bool),
    member!("FULL", 6, 1, Output, Bool),
    member!("IN", 8, 4, Input, DInt),
    member!("OUT", 12, 4, Output, DInt),
    member!("COUNT", 16, 2, Output, Int),
    member!("HEAD", 18, 2, Internal, Int),
    member!("TAIL", 20, 2, Internal, Int),
    member!("BUF", 24, 40, Internal, DInt),
];

const LIFO_MEMBERS: &[FbMember] = &[
    member!("PUSH", 0, 1, Input, Bool),
    member!("POP", 1, 1, Input, Bool),
    member!("RESET", 2, 1, Input, Bool),
    member!("PREV_PUSH", 3, 1, Internal, Bool),
    member!("PREV_POP", 4, 1, Internal, Bool),
    member!("EMPTY", 5, 1, Output, Bool),
    member!("FULL", 6, 1, Output, Bool),
    member!("IN", 8, 4, Input, DInt),
    member!("OUT", 12, 4, Output, DInt),
    member!("COUNT", 16, 2, Output, Int),
    member!("BUF", 20, 36, Internal, DInt),
];

/// All built-in function blocks.
pub static BUILTIN_FBS: &[BuiltinFb] = &[
    BuiltinFb { name: "TON", size: 16, members: TIMER_MEMBERS, kind: FbKind::Ton },
    BuiltinFb { name: "TOF", size: 16, members: TIMER_MEMBERS, kind: FbKind::Tof },
    BuiltinFb { name: "TP", size: 16, members: TIMER_MEMBERS, kind: FbKind::Tp },
    BuiltinFb { name: "R_TRIG", size: 4, members: EDGE_MEMBERS, kind: FbKind::RTrig },
    BuiltinFb { name: "F_TRIG", size: 4, members: EDGE_MEMBERS, kind: FbKind::FTrig },
    BuiltinFb { name: "RS", size: 4, members: RS_MEMBERS, kind: FbKind::Rs },
    BuiltinFb { name: "SR", size: 4, members: SR_MEMBERS, kind: FbKind::Sr },
    BuiltinFb { name: "CTU", size: 8, members: CTU_MEMBERS, kind: FbKind::Ctu },
    BuiltinFb { name: "CTD", size: 8, members: CTD_MEMBERS, kind: FbKind::Ctd },
    BuiltinFb { name: "CTUD", size: 12, members: CTUD_MEMBERS, kind: FbKind::Ctud },
    BuiltinFb { name: "BLINK", size: 16, members: BLINK_MEMBERS, kind: FbKind::Blink },
    BuiltinFb { name: "PWM", size: 16, members: PWM_MEMBERS, kind: FbKind::Pwm },
    BuiltinFb { name: "PULSE", size: 16, members: PULSE_MEMBERS, kind: FbKind::Pulse },
    BuiltinFb { name: "HYSTERESIS", size: 16, members: HYSTERESIS_MEMBERS, kind: FbKind::Hysteresis },
    BuiltinFb { name: "DEADBAND", size: 16, members: DEADBAND_MEMBERS, kind: FbKind::Deadband },
    BuiltinFb { name: "LAG_FILTER", size: 16, members: LAG_FILTER_MEMBERS, kind: FbKind::LagFilter },
    BuiltinFb { name: "RAMP_REAL", size: 16, members: RAMP_REAL_MEMBERS, kind: FbKind::RampReal },
    BuiltinFb { name: "INTEGRAL", size: 16, members: INTEGRAL_MEMBERS, kind: FbKind::Integral },
    BuiltinFb { name: "DERIVATIVE", size: 16, members: DERIVATIVE_MEMBERS, kind: FbKind::Derivative },
    BuiltinFb { name: "PID_Compact", size: 48, members: PID_MEMBERS, kind: FbKind::PidCompact },
    BuiltinFb { name: "FIFO", size: 64, members: FIFO_MEMBERS, kind: FbKind::Fifo },
    BuiltinFb { name: "LIFO", size: 56, members: LIFO_MEMBERS, kind: FbKind::Lifo },
];

static FB_INDEX: LazyLock<HashMap<String, &'static BuiltinFb>> = LazyLock::new(|| {
    BUILTIN_FBS
        .iter()
        .map(|fb| (fb.name.to_ascii_uppercase(), fb))
        .collect()
});

/// Look a built-in function block up by name, case-insensitively.
pub fn builtin_fb(name: &str) -> Option<&'static BuiltinFb> {
    FB_INDEX.get(&name.to_ascii_uppercase()).copied()
}

// ---------------------------------------------------------------------------
// Built-in functions
// ---------------------------------------------------------------------------

/// Emitter selector for built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    // Selection
    Max,
    Min,
    Limit,
    Sel,
    Mux,
    // Bitwise beyond the operators
    Nand,
    Nor,
    Shl,
    Shr,
    Rol,
    Ror,
    // Math
    Abs,
    AbsF,
    Neg,
    NegF,
    Sqrt,
    Expt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Ln,
    Log,
    Exp,
    Trunc,
    Round,
    // Conversions
    IntToReal,
    RealToInt,
    BoolToInt,
    IntToBool,
    TimeToDint,
    DintToTime,
    // Scaling
    NormX,
    ScaleX,
    // Strings
    Len,
    Concat,
    Left,
    Right,
    Mid,
    Find,
    Insert,
    Delete,
    Replace,
    Copy,
    Clear,
    Strcmp,
    EqString,
    NeString,
    // System
    Uptime,
    CycleTime,
    WatchdogReset,
}

/// How many arguments a built-in function takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(u8),
    /// At least this many (MUX takes a selector plus any number of inputs).
    AtLeast(u8),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n as usize,
            Arity::AtLeast(n) => count >= n as usize,
        }
    }
}

/// Result type of a built-in function, for expression type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetType {
    Bool,
    Int,
    DInt,
    Real,
    Time,
    Str,
    /// Same type as the first argument (selection functions).
    SameAsArg,
    /// No value; only valid as a statement.
    None,
}

/// A built-in function definition.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub kind: FunctionKind,
    pub arity: Arity,
    pub returns: RetType,
}

macro_rules! function {
    ($name:literal, $kind:expr, $arity:expr, $ret:expr) => {
        BuiltinFunction { name: $name, kind: $kind, arity: $arity, returns: $ret }
    };
}

/// All built-in functions. Conversion aliases share an emitter: on this VM a
/// DINT and an INT are the same stack cell, so `INT_TO_REAL` and
/// `DINT_TO_REAL` both lower to `I2F`.
pub static BUILTIN_FUNCTIONS: &[BuiltinFunction] = &[
    function!("MAX", FunctionKind::Max, Arity::Exact(2), RetType::SameAsArg),
    function!("MIN", FunctionKind::Min, Arity::Exact(2), RetType::SameAsArg),
    function!("LIMIT", FunctionKind::Limit, Arity::Exact(3), RetType::SameAsArg),
    function!("SEL", FunctionKind::Sel, Arity::Exact(3), RetType::SameAsArg),
    function!("MUX", FunctionKind::Mux, Arity::AtLeast(2), RetType::SameAsArg),
    function!("NAND", FunctionKind::Nand, Arity::Exact(2), RetType::Bool),
    function!("NOR", FunctionKind::Nor, Arity::Exact(2), RetType::Bool),
    function!("SHL", FunctionKind::Shl, Arity::Exact(2), RetType::DInt),
    function!("SHR", FunctionKind::Shr, Arity::Exact(2), RetType::DInt),
    function!("ROL", FunctionKind::Rol, Arity::Exact(2), RetType::DInt),
    function!("ROR", FunctionKind::Ror, Arity::Exact(2), RetType::DInt),
    function!("ABS", FunctionKind::Abs, Arity::Exact(1), RetType::SameAsArg),
    function!("ABSF", FunctionKind::AbsF, Arity::Exact(1), RetType::Real),
    function!("NEG", FunctionKind::Neg, Arity::Exact(1), RetType::SameAsArg),
    function!("NEGF", FunctionKind::NegF, Arity::Exact(1), RetType::Real),
    function!("SQRT", FunctionKind::Sqrt, Arity::Exact(1), RetType::Real),
    function!("EXPT", FunctionKind::Expt, Arity::Exact(2), RetType::Real),
    function!("SIN", FunctionKind::Sin, Arity::Exact(1), RetType::Real),
    function!("COS", FunctionKind::Cos, Arity::Exact(1), RetType::Real),
    function!("TAN", FunctionKind::Tan, Arity::Exact(1), RetType::Real),
    function!("ASIN", FunctionKind::Asin, Arity::Exact(1), RetType::Real),
    function!("ACOS", FunctionKind::Acos, Arity::Exact(1), RetType::Real),
    function!("ATAN", FunctionKind::Atan, Arity::Exact(1), RetType::Real),
    function!("ATAN2", FunctionKind::Atan2, Arity::Exact(2), RetType::Real),
    function!("LN", FunctionKind::Ln, Arity::Exact(1), RetType::Real),
    function!("LOG", FunctionKind::Log, Arity::Exact(1), RetType::Real),
    function!("EXP", FunctionKind::Exp, Arity::Exact(1), RetType::Real),
    function!("TRUNC", FunctionKind::Trunc, Arity::Exact(1), RetType::DInt),
    function!("ROUND", FunctionKind::Round, Arity::Exact(1), RetType::DInt),
    function!("INT_TO_REAL", FunctionKind::IntToReal, Arity::Exact(1), RetType::Real),
    function!("DINT_TO_REAL", FunctionKind::IntToReal, Arity::Exact(1), RetType::Real),
    function!("REAL_TO_INT", FunctionKind::RealToInt, Arity::Exact(1), RetType::Int),
    function!("REAL_TO_DINT", FunctionKind::RealToInt, Arity::Exact(1), RetType::DInt),
    function!("BOOL_TO_INT", FunctionKind::BoolToInt, Arity::Exact(1), RetType::Int),
    function!("INT_TO_BOOL", FunctionKind::IntToBool, Arity::Exact(1), RetType::Bool),
    function!("TIME_TO_DINT", FunctionKind::TimeToDint, Arity::Exact(1), RetType::DInt),
    function!("DINT_TO_TIME", FunctionKind::DintToTime, Arity::Exact(1), RetType::Time),
    function!("NORM_X", FunctionKind::NormX, Arity::Exact(3), RetType::Real),
    function!("SCALE_X", FunctionKind::ScaleX, Arity::Exact(3), RetType::Real),
    function!("LEN", FunctionKind::Len, Arity::Exact(1), RetType::DInt),
    function!("CONCAT", FunctionKind::Concat, Arity::Exact(2), RetType::Str),
    function!("LEFT", FunctionKind::Left, Arity::Exact(2), RetType::Str),
    function!("RIGHT", FunctionKind::Right, Arity::Exact(2), RetType::Str),
    function!("MID", FunctionKind::Mid, Arity::Exact(3), RetType::Str),
    function!("FIND", FunctionKind::Find, Arity::Exact(2), RetType::DInt),
    function!("INSERT", FunctionKind::Insert, Arity::Exact(3), RetType::Str),
    function!("DELETE", FunctionKind::Delete, Arity::Exact(3), RetType::Str),
    function!("REPLACE", FunctionKind::Replace, Arity::Exact(4), RetType::Str),
    function!("COPY", FunctionKind::Copy, Arity::Exact(2), RetType::None),
    function!("CLEAR", FunctionKind::Clear, Arity::Exact(1), RetType::None),
    function!("STRCMP", FunctionKind::Strcmp, Arity::Exact(2), RetType::DInt),
    function!("EQ_STRING", FunctionKind::EqString, Arity::Exact(2), RetType::Bool),
    function!("NE_STRING", FunctionKind::NeString, Arity::Exact(2), RetType::Bool),
    function!("UPTIME", FunctionKind::Uptime, Arity::Exact(0), RetType::Time),
    function!("CYCLE_TIME", FunctionKind::CycleTime, Arity::Exact(0), RetType::Time),
    function!("WATCHDOG_RESET", FunctionKind::WatchdogReset, Arity::Exact(0), RetType::None),
];

static FUNCTION_INDEX: LazyLock<HashMap<String, &'static BuiltinFunction>> = LazyLock::new(|| {
    BUILTIN_FUNCTIONS
        .iter()
        .map(|f| (f.name.to_ascii_uppercase(), f))
        .collect()
});

/// Look a built-in function up by name, case-insensitively.
pub fn builtin_function(name: &str) -> Option<&'static BuiltinFunction> {
    FUNCTION_INDEX.get(&name.to_ascii_uppercase()).copied()
}

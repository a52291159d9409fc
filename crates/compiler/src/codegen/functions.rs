//! Built-in function emitters
//!
//! Selection and bitwise helpers stay on the stack; transcendentals expand
//! to polynomial approximations over the float opcodes (Horner form, with
//! explicit range reduction where one is possible in straight-line code);
//! string-producing functions build their result in the per-program scratch
//! buffer and evaluate to its address, using emitted byte-copy loops over
//! the indirect memory opcodes.
//!
//! Emitters assume argument expressions are free of side effects; a handful
//! re-evaluate nothing and keep everything on the stack or in the scratch
//! index cells.

use super::CodeGen;
use crate::ast::{DataType, Expression};
use crate::builtins::{BuiltinFunction, FunctionKind};
use crate::error::Diagnostic;
use zplc_core::memory::WATCHDOG_CELL;

/// sin(t) = t·P(t²) on [-π, π].
const SIN_COEFFS: [f32; 5] = [
    2.755_731_9e-6,  // 1/9!
    -1.984_127e-4,   // -1/7!
    8.333_334e-3,    // 1/5!
    -0.166_666_67,   // -1/3!
    1.0,
];

/// atan(t) = t·P(t²) on [-1, 1].
const ATAN_COEFFS: [f32; 5] = [0.106_562_6, -0.142_089, 0.199_935_5, -0.333_331_5, 1.0];

/// ln(x) = 2t·P(t²), t = (x−1)/(x+1).
const LN_COEFFS: [f32; 5] = [
    0.111_111_11, // 1/9
    0.142_857_14, // 1/7
    0.2,          // 1/5
    0.333_333_34, // 1/3
    1.0,
];

/// exp(x) = P(x), coefficients 1/9! … 1/0!.
const EXP_COEFFS: [f32; 10] = [
    2.755_731_9e-6,
    2.480_158_7e-5,
    1.984_127e-4,
    1.388_888_9e-3,
    8.333_334e-3,
    4.166_666_8e-2,
    0.166_666_67,
    0.5,
    1.0,
    1.0,
];

const LOG10_E: f32 = 0.434_294_48;
const PI: f32 = std::f32::consts::PI;
const HALF_PI: f32 = std::f32::consts::FRAC_PI_2;
const TAU: f32 = std::f32::consts::TAU;
const INV_TAU: f32 = 1.0 / std::f32::consts::TAU;

impl CodeGen<'_> {
    pub(crate) fn emit_builtin_function(
        &mut self,
        function: &'static BuiltinFunction,
        args: &[Expression],
        line: u32,
    ) -> Result<(), Diagnostic> {
        if !function.arity.accepts(args.len()) {
            return Err(Diagnostic::codegen(
                line,
                format!("'{}' does not take {} arguments", function.name, args.len()),
            ));
        }

        use FunctionKind::*;
        match function.kind {
            Max => self.emit_pairwise_pick(args, "GE", "max"),
            Min => self.emit_pairwise_pick(args, "LE", "min"),
            Limit => self.emit_limit(args),
            Sel => self.emit_sel(args),
            Mux => self.emit_mux(args, line),
            Nand => {
                self.emit_expression(&args[0])?;
                self.emit_expression(&args[1])?;
                self.op("AND");
                self.op("NOT");
                self.push_int(1);
                self.op("AND");
                Ok(())
            }
            Nor => {
                self.emit_expression(&args[0])?;
                self.emit_expression(&args[1])?;
                self.op("OR");
                self.op("NOT");
                self.push_int(1);
                self.op("AND");
                Ok(())
            }
            Shl | Shr => {
                self.emit_expression(&args[0])?;
                self.emit_expression(&args[1])?;
                self.op(if function.kind == Shl { "SHL" } else { "SHR" });
                Ok(())
            }
            Rol => self.emit_rotate(args, true),
            Ror => self.emit_rotate(args, false),
            Abs => {
                let float = self.infer_type(&args[0])?.is_real();
                self.emit_expression(&args[0])?;
                self.op(if float { "ABSF" } else { "ABS" });
                Ok(())
            }
            AbsF => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.op("ABSF");
                Ok(())
            }
            Neg => {
                let float = self.infer_type(&args[0])?.is_real();
                self.emit_expression(&args[0])?;
                self.op(if float { "NEGF" } else { "NEG" });
                Ok(())
            }
            NegF => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.op("NEGF");
                Ok(())
            }
            Sqrt => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_sqrt_top();
                Ok(())
            }
            Expt => {
                // base ^ exponent = exp(exponent · ln base)
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_ln_top();
                self.emit_expression_as(&args[1], &DataType::REAL)?;
                self.op("MULF");
                self.emit_exp_top();
                Ok(())
            }
            Sin => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_sin_top();
                Ok(())
            }
            Cos => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.push_f32(HALF_PI);
                self.op("ADDF");
                self.emit_sin_top();
                Ok(())
            }
            Tan => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.op("DUP");
                self.emit_sin_top();
                self.op("SWAP");
                self.push_f32(HALF_PI);
                self.op("ADDF");
                self.emit_sin_top();
                self.op("DIVF");
                Ok(())
            }
            Asin => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_asin_top();
                Ok(())
            }
            Acos => {
                // acos x = π/2 − asin x
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_asin_top();
                self.push_f32(HALF_PI);
                self.op("SWAP");
                self.op("SUBF");
                Ok(())
            }
            Atan => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_atan_top();
                Ok(())
            }
            Atan2 => self.emit_atan2(args),
            Ln => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_ln_top();
                Ok(())
            }
            Log => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_ln_top();
                self.push_f32(LOG10_E);
                self.op("MULF");
                Ok(())
            }
            Exp => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_exp_top();
                Ok(())
            }
            Trunc => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.op("F2I");
                Ok(())
            }
            Round => {
                self.emit_expression_as(&args[0], &DataType::REAL)?;
                self.emit_round_top();
                Ok(())
            }
            IntToReal => {
                self.emit_expression(&args[0])?;
                self.op("I2F");
                Ok(())
            }
            RealToInt => {
                self.emit_expression(&args[0])?;
                self.op("F2I");
                Ok(())
            }
            BoolToInt | TimeToDint | DintToTime => {
                // Identity on the stack cell.
                self.emit_expression(&args[0])
            }
            IntToBool => {
                self.emit_expression(&args[0])?;
                self.op("I2B");
                Ok(())
            }
            NormX => {
                for arg in args {
                    self.emit_expression_as(arg, &DataType::REAL)?;
                }
                // (value − min) / (max − min), all three on the stack
                self.op("ROT");
                self.op("DUP");
                self.op("ROT");
                self.op("SWAP");
                self.op("SUBF");
                self.op("ROT");
                self.op("ROT");
                self.op("SUBF");
                self.op("SWAP");
                self.op("DIVF");
                Ok(())
            }
            ScaleX => {
                for arg in args {
                    self.emit_expression_as(arg, &DataType::REAL)?;
                }
                // min + norm · (max − min)
                self.op("ROT");
                self.op("DUP");
                self.op("ROT");
                self.op("SWAP");
                self.op("SUBF");
                self.op("ROT");
                self.op("MULF");
                self.op("ADDF");
                Ok(())
            }
            Len => {
                self.emit_string_arg(&args[0], line)?;
                self.op("STRLEN");
                Ok(())
            }
            Concat => {
                let scratch = self.scratch(line)?;
                self.emit_string_arg(&args[0], line)?;
                self.push_u16(scratch.tmp);
                self.op("STRCPY");
                self.emit_string_arg(&args[1], line)?;
                self.push_u16(scratch.tmp);
                self.op("STRCAT");
                self.push_u16(scratch.tmp);
                Ok(())
            }
            Left => self.emit_left(args, line),
            Right => self.emit_right(args, line),
            Mid => self.emit_mid(args, line),
            Find => self.emit_find(args, line),
            Insert => self.emit_insert(args, line),
            Delete => self.emit_delete(args, line),
            Replace => self.emit_replace(args, line),
            Copy => {
                self.emit_string_arg(&args[0], line)?;
                self.emit_string_arg(&args[1], line)?;
                self.op("STRCPY");
                Ok(())
            }
            Clear => {
                self.emit_string_arg(&args[0], line)?;
                self.op("STRCLR");
                Ok(())
            }
            Strcmp => {
                self.emit_string_arg(&args[0], line)?;
                self.emit_string_arg(&args[1], line)?;
                self.op("STRCMP");
                Ok(())
            }
            EqString | NeString => {
                self.emit_string_arg(&args[0], line)?;
                self.emit_string_arg(&args[1], line)?;
                self.op("STRCMP");
                self.push_int(0);
                self.op(if function.kind == EqString { "EQ" } else { "NE" });
                Ok(())
            }
            Uptime => {
                self.op("GET_TICKS");
                Ok(())
            }
            CycleTime => {
                let slot = self.cycle_slot(line)?;
                self.op("GET_TICKS");
                self.load(32, slot);
                self.op("SUB");
                Ok(())
            }
            WatchdogReset => {
                self.push_int(1);
                self.store(8, WATCHDOG_CELL);
                Ok(())
            }
        }
    }

    fn emit_string_arg(&mut self, arg: &Expression, line: u32) -> Result<(), Diagnostic> {
        if !self.infer_type(arg)?.is_string() {
            return Err(Diagnostic::codegen(line, "expected a STRING argument".to_string()));
        }
        self.emit_expression(arg)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Emit both arguments and keep one of the top two: with "GE" the
    /// greater survives, with "LE" the smaller.
    fn emit_pairwise_pick(
        &mut self,
        args: &[Expression],
        compare: &str,
        prefix: &str,
    ) -> Result<(), Diagnostic> {
        let float = self.infer_type(&args[0])?.is_real() || self.infer_type(&args[1])?.is_real();
        let target = if float { DataType::REAL } else { DataType::DINT };
        self.emit_expression_as(&args[0], &target)?;
        self.emit_expression_as(&args[1], &target)?;
        self.pick_top2(compare, prefix);
        Ok(())
    }

    /// Stack `(a b)` → the value selected by `a <compare> b`.
    fn pick_top2(&mut self, compare: &str, prefix: &str) {
        let keep_first = self.new_label(&format!("{}_a", prefix));
        self.op("OVER");
        self.op("OVER");
        self.op(compare);
        self.op_arg("JNZ", &keep_first);
        self.op("SWAP");
        self.label(&keep_first);
        self.op("DROP");
    }

    fn emit_limit(&mut self, args: &[Expression]) -> Result<(), Diagnostic> {
        // LIMIT(MN, IN, MX) = MIN(MAX(IN, MN), MX)
        let float = args
            .iter()
            .try_fold(false, |acc, a| Ok::<_, Diagnostic>(acc || self.infer_type(a)?.is_real()))?;
        let target = if float { DataType::REAL } else { DataType::DINT };
        self.emit_expression_as(&args[1], &target)?;
        self.emit_expression_as(&args[0], &target)?;
        self.pick_top2("GE", "max");
        self.emit_expression_as(&args[2], &target)?;
        self.pick_top2("LE", "min");
        Ok(())
    }

    fn emit_sel(&mut self, args: &[Expression]) -> Result<(), Diagnostic> {
        // SEL(G, IN0, IN1): only the chosen input is evaluated.
        let one = self.new_label("sel_one");
        let end = self.new_label("sel_end");
        self.emit_expression(&args[0])?;
        self.op_arg("JNZ", &one);
        self.emit_expression(&args[1])?;
        self.op_arg("JMP", &end);
        self.label(&one);
        self.emit_expression(&args[2])?;
        self.label(&end);
        Ok(())
    }

    fn emit_mux(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let inputs = &args[1..];
        if inputs.is_empty() {
            return Err(Diagnostic::codegen(line, "MUX needs at least one input".to_string()));
        }
        let end = self.new_label("mux_end");
        let default = self.new_label("mux_default");
        let labels: Vec<String> = (0..inputs.len() - 1).map(|_| self.new_label("mux_in")).collect();

        self.emit_expression(&args[0])?;
        for (i, label) in labels.iter().enumerate() {
            self.op("DUP");
            self.push_int(i as i64);
            self.op("EQ");
            self.op_arg("JNZ", label);
        }
        self.op_arg("JMP", &default);

        for (input, label) in inputs.iter().zip(&labels) {
            self.label(label);
            self.op("DROP");
            self.emit_expression(input)?;
            self.op_arg("JMP", &end);
        }

        // Out-of-range selectors fall back to the last input.
        self.label(&default);
        self.op("DROP");
        self.emit_expression(inputs.last().expect("checked non-empty"))?;
        self.label(&end);
        Ok(())
    }

    fn emit_rotate(&mut self, args: &[Expression], left: bool) -> Result<(), Diagnostic> {
        // ROL(x, n) = (x << n) | (x >> (32 − n)); ROR mirrors it.
        self.emit_expression(&args[0])?;
        self.emit_expression(&args[1])?;
        self.op("OVER");
        self.op("OVER");
        self.op(if left { "SHL" } else { "SHR" });
        self.op("ROT");
        self.op("ROT");
        self.push_int(32);
        self.op("SWAP");
        self.op("SUB");
        self.op(if left { "SHR" } else { "SHL" });
        self.op("OR");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transcendentals (top-of-stack transformers)
    // ------------------------------------------------------------------

    /// `t t²` → `t·P(t²)` for a coefficient list from the highest power
    /// down; consumes both, leaves the polynomial value.
    fn horner_odd(&mut self, coefficients: &[f32]) {
        self.op("DUP");
        self.op("DUP");
        self.op("MULF");
        self.push_f32(coefficients[0]);
        for c in &coefficients[1..] {
            self.op("OVER");
            self.op("MULF");
            self.push_f32(*c);
            self.op("ADDF");
        }
        self.op("ROT");
        self.op("MULF");
        self.op("SWAP");
        self.op("DROP");
    }

    /// Reduce the top of stack into [-π, π] and apply the sine polynomial.
    fn emit_sin_top(&mut self) {
        let negative = self.new_label("sin_neg");
        let rounded = self.new_label("sin_rnd");

        // k = round(x / 2π); t = x − k·2π
        self.op("DUP");
        self.push_f32(INV_TAU);
        self.op("MULF");
        self.op("DUP");
        self.push_f32(0.0);
        self.op("GE");
        self.op_arg("JZ", &negative);
        self.push_f32(0.5);
        self.op("ADDF");
        self.op_arg("JMP", &rounded);
        self.label(&negative);
        self.push_f32(0.5);
        self.op("SUBF");
        self.label(&rounded);
        self.op("F2I");
        self.op("I2F");
        self.push_f32(TAU);
        self.op("MULF");
        self.op("SUBF");

        self.horner_odd(&SIN_COEFFS);
    }

    /// atan over the full range: the polynomial on [-1, 1], the reflection
    /// ±π/2 − atan(1/x) outside it.
    fn emit_atan_top(&mut self) {
        let small = self.new_label("atan_small");
        let negative = self.new_label("atan_negbig");
        let combine = self.new_label("atan_comb");
        let end = self.new_label("atan_end");

        self.op("DUP");
        self.op("ABSF");
        self.push_f32(1.0);
        self.op("LE");
        self.op_arg("JNZ", &small);

        self.op("DUP");
        self.push_f32(1.0);
        self.op("SWAP");
        self.op("DIVF");
        self.horner_odd(&ATAN_COEFFS);
        self.op("SWAP");
        self.push_f32(0.0);
        self.op("GT");
        self.op_arg("JZ", &negative);
        self.push_f32(HALF_PI);
        self.op_arg("JMP", &combine);
        self.label(&negative);
        self.push_f32(-HALF_PI);
        self.label(&combine);
        self.op("SWAP");
        self.op("SUBF");
        self.op_arg("JMP", &end);

        self.label(&small);
        self.horner_odd(&ATAN_COEFFS);
        self.label(&end);
    }

    /// asin x = atan(x / √(1 − x²))
    fn emit_asin_top(&mut self) {
        self.op("DUP");
        self.op("DUP");
        self.op("MULF");
        self.push_f32(1.0);
        self.op("SWAP");
        self.op("SUBF");
        self.emit_sqrt_top();
        self.op("DIVF");
        self.emit_atan_top();
    }

    fn emit_atan2(&mut self, args: &[Expression]) -> Result<(), Diagnostic> {
        let main = self.new_label("at2_main");
        let y_negative = self.new_label("at2_ymin");
        let keep = self.new_label("at2_keep");
        let x_negative = self.new_label("at2_neg");
        let done = self.new_label("at2_done");
        let end = self.new_label("at2_end");

        self.emit_expression_as(&args[0], &DataType::REAL)?;
        self.emit_expression_as(&args[1], &DataType::REAL)?;

        // x = 0: ±π/2 from the sign of y
        self.op("DUP");
        self.push_f32(0.0);
        self.op("EQ");
        self.op_arg("JZ", &main);
        self.op("DROP");
        self.push_f32(0.0);
        self.op("GE");
        self.op_arg("JZ", &y_negative);
        self.push_f32(HALF_PI);
        self.op_arg("JMP", &end);
        self.label(&y_negative);
        self.push_f32(-HALF_PI);
        self.op_arg("JMP", &end);

        self.label(&main);
        self.op("OVER");
        self.op("OVER");
        self.op("DIVF");
        self.emit_atan_top();
        // stack: y x a — x > 0 keeps a, x < 0 adds ±π by the sign of y
        self.op("SWAP");
        self.push_f32(0.0);
        self.op("GT");
        self.op_arg("JNZ", &keep);
        self.op("SWAP");
        self.push_f32(0.0);
        self.op("GE");
        self.op_arg("JZ", &x_negative);
        self.push_f32(PI);
        self.op("ADDF");
        self.op_arg("JMP", &done);
        self.label(&x_negative);
        self.push_f32(PI);
        self.op("SUBF");
        self.op_arg("JMP", &done);
        self.label(&keep);
        self.op("SWAP");
        self.op("DROP");
        self.label(&done);
        self.label(&end);
        Ok(())
    }

    /// Newton-Raphson square root seeded with the argument itself;
    /// non-positive inputs collapse to zero.
    fn emit_sqrt_top(&mut self) {
        let go = self.new_label("sqrt_go");
        let end = self.new_label("sqrt_end");

        self.op("DUP");
        self.push_f32(0.0);
        self.op("GT");
        self.op_arg("JNZ", &go);
        self.op("DROP");
        self.push_f32(0.0);
        self.op_arg("JMP", &end);

        self.label(&go);
        self.op("DUP");
        for _ in 0..10 {
            // y ← (y + x/y) / 2
            self.op("OVER");
            self.op("OVER");
            self.op("DIVF");
            self.op("ADDF");
            self.push_f32(0.5);
            self.op("MULF");
        }
        self.op("SWAP");
        self.op("DROP");
        self.label(&end);
    }

    /// ln via the atanh series around 1: accurate for moderate arguments,
    /// which covers the scaling work PLC programs do.
    fn emit_ln_top(&mut self) {
        self.op("DUP");
        self.push_f32(1.0);
        self.op("SUBF");
        self.op("SWAP");
        self.push_f32(1.0);
        self.op("ADDF");
        self.op("DIVF");
        self.horner_odd(&LN_COEFFS);
        self.push_f32(2.0);
        self.op("MULF");
    }

    fn emit_exp_top(&mut self) {
        self.push_f32(EXP_COEFFS[0]);
        for c in &EXP_COEFFS[1..] {
            self.op("OVER");
            self.op("MULF");
            self.push_f32(*c);
            self.op("ADDF");
        }
        self.op("SWAP");
        self.op("DROP");
    }

    /// Round-to-nearest through ±0.5 and truncation.
    fn emit_round_top(&mut self) {
        let negative = self.new_label("round_neg");
        let truncate = self.new_label("round_f");

        self.op("DUP");
        self.push_f32(0.0);
        self.op("GE");
        self.op_arg("JZ", &negative);
        self.push_f32(0.5);
        self.op("ADDF");
        self.op_arg("JMP", &truncate);
        self.label(&negative);
        self.push_f32(0.5);
        self.op("SUBF");
        self.label(&truncate);
        self.op("F2I");
    }

    // ------------------------------------------------------------------
    // String routines
    // ------------------------------------------------------------------

    /// `min` of the two integers on the stack.
    fn min_top2(&mut self) {
        self.pick_top2("LE", "smin");
    }

    /// Emit `tmp[4+len] := 0` followed by pushing the scratch address.
    fn finish_scratch(&mut self, tmp: u16) {
        self.push_u16(tmp + 4);
        self.load(16, tmp);
        self.op("ADD");
        self.push_int(0);
        self.op("STOREI8");
        self.push_u16(tmp);
    }

    /// `tmp[4 + j] := a[4 + i]` for index cells holding byte offsets.
    fn copy_byte(&mut self, tmp: u16, src_cell: u16, src_index: u16, dst_index: u16) {
        self.push_u16(tmp + 4);
        self.load(16, dst_index);
        self.op("ADD");
        self.load(16, src_cell);
        self.push_int(4);
        self.op("ADD");
        self.load(16, src_index);
        self.op("ADD");
        self.op("LOADI8");
        self.op("STOREI8");
    }

    fn bump_cell(&mut self, cell: u16) {
        self.load(16, cell);
        self.push_int(1);
        self.op("ADD");
        self.store(16, cell);
    }

    fn emit_left(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;
        self.emit_string_arg(&args[0], line)?;
        self.push_u16(scratch.tmp);
        self.op("STRCPY");
        // tmp.len = min(n, len(tmp))
        self.emit_expression(&args[1])?;
        self.push_u16(scratch.tmp);
        self.op("STRLEN");
        self.min_top2();
        self.op("DUP");
        self.store(16, scratch.tmp);
        // terminate at the new length
        self.push_u16(scratch.tmp + 4);
        self.op("ADD");
        self.push_int(0);
        self.op("STOREI8");
        self.push_u16(scratch.tmp);
        Ok(())
    }

    fn emit_right(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;
        let top = self.new_label("right_loop");
        let done = self.new_label("right_done");

        self.emit_string_arg(&args[0], line)?;
        self.store(16, scratch.a);
        // n' = min(n, len); tmp.len = n'; i = len − n'; j = 0
        self.emit_expression(&args[1])?;
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.min_top2();
        self.op("DUP");
        self.store(16, scratch.tmp);
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.op("SWAP");
        self.op("SUB");
        self.store(16, scratch.i);
        self.push_int(0);
        self.store(16, scratch.j);

        self.label(&top);
        self.load(16, scratch.i);
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.op("GE");
        self.op_arg("JNZ", &done);
        self.copy_byte(scratch.tmp, scratch.a, scratch.i, scratch.j);
        self.bump_cell(scratch.i);
        self.bump_cell(scratch.j);
        self.op_arg("JMP", &top);

        self.label(&done);
        self.finish_scratch(scratch.tmp);
        Ok(())
    }

    fn emit_mid(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;
        let top = self.new_label("mid_loop");
        let done = self.new_label("mid_done");

        self.emit_string_arg(&args[0], line)?;
        self.store(16, scratch.a);
        // i = min(pos − 1, len)
        self.emit_expression(&args[2])?;
        self.push_int(1);
        self.op("SUB");
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.min_top2();
        self.store(16, scratch.i);
        // bound = min(count, len − i); tmp.len = bound
        self.emit_expression(&args[1])?;
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.load(16, scratch.i);
        self.op("SUB");
        self.min_top2();
        self.op("DUP");
        self.store(16, scratch.tmp);
        self.store(16, scratch.b);
        self.push_int(0);
        self.store(16, scratch.j);

        self.label(&top);
        self.load(16, scratch.j);
        self.load(16, scratch.b);
        self.op("GE");
        self.op_arg("JNZ", &done);
        self.copy_byte(scratch.tmp, scratch.a, scratch.i, scratch.j);
        self.bump_cell(scratch.i);
        self.bump_cell(scratch.j);
        self.op_arg("JMP", &top);

        self.label(&done);
        self.finish_scratch(scratch.tmp);
        Ok(())
    }

    fn emit_find(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;
        let outer = self.new_label("find_outer");
        let inner = self.new_label("find_inner");
        let next = self.new_label("find_next");
        let hit = self.new_label("find_hit");
        let fail = self.new_label("find_fail");
        let end = self.new_label("find_end");

        self.emit_string_arg(&args[0], line)?;
        self.store(16, scratch.a);
        self.emit_string_arg(&args[1], line)?;
        self.store(16, scratch.b);
        self.push_int(0);
        self.store(16, scratch.i);

        self.label(&outer);
        self.load(16, scratch.i);
        self.load(16, scratch.b);
        self.op("STRLEN");
        self.op("ADD");
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.op("GT");
        self.op_arg("JNZ", &fail);
        self.push_int(0);
        self.store(16, scratch.j);

        self.label(&inner);
        self.load(16, scratch.j);
        self.load(16, scratch.b);
        self.op("STRLEN");
        self.op("GE");
        self.op_arg("JNZ", &hit);
        // a[4+i+j] == b[4+j] ?
        self.load(16, scratch.a);
        self.push_int(4);
        self.op("ADD");
        self.load(16, scratch.i);
        self.op("ADD");
        self.load(16, scratch.j);
        self.op("ADD");
        self.op("LOADI8");
        self.load(16, scratch.b);
        self.push_int(4);
        self.op("ADD");
        self.load(16, scratch.j);
        self.op("ADD");
        self.op("LOADI8");
        self.op("EQ");
        self.op_arg("JZ", &next);
        self.bump_cell(scratch.j);
        self.op_arg("JMP", &inner);

        self.label(&next);
        self.bump_cell(scratch.i);
        self.op_arg("JMP", &outer);

        // 1-based position, 0 when absent
        self.label(&hit);
        self.load(16, scratch.i);
        self.push_int(1);
        self.op("ADD");
        self.op_arg("JMP", &end);
        self.label(&fail);
        self.push_int(0);
        self.label(&end);
        Ok(())
    }

    /// Shared tail loop: append `a[i..len(a)]` at `tmp[j..]`, bounded by the
    /// scratch capacity.
    fn emit_tail_append(&mut self, scratch: super::Scratch, prefix: &str) {
        let top = self.new_label(&format!("{}_tail", prefix));
        let done = self.new_label(&format!("{}_done", prefix));

        self.label(&top);
        self.load(16, scratch.i);
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.op("GE");
        self.op_arg("JNZ", &done);
        self.load(16, scratch.j);
        self.push_int(crate::ast::STRING_CAPACITY as i64);
        self.op("GE");
        self.op_arg("JNZ", &done);
        self.copy_byte(scratch.tmp, scratch.a, scratch.i, scratch.j);
        self.bump_cell(scratch.i);
        self.bump_cell(scratch.j);
        self.op_arg("JMP", &top);

        self.label(&done);
        self.load(16, scratch.j);
        self.store(16, scratch.tmp);
        self.finish_scratch(scratch.tmp);
    }

    /// Shared prefix loop: copy `a[0..i]` into `tmp[0..i]` via `j`.
    fn emit_prefix_copy(&mut self, scratch: super::Scratch, prefix: &str) {
        let top = self.new_label(&format!("{}_pre", prefix));
        let done = self.new_label(&format!("{}_mid", prefix));

        self.push_int(0);
        self.store(16, scratch.j);
        self.label(&top);
        self.load(16, scratch.j);
        self.load(16, scratch.i);
        self.op("GE");
        self.op_arg("JNZ", &done);
        self.copy_byte(scratch.tmp, scratch.a, scratch.j, scratch.j);
        self.bump_cell(scratch.j);
        self.op_arg("JMP", &top);
        self.label(&done);
    }

    fn emit_insert(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;

        self.emit_string_arg(&args[0], line)?;
        self.store(16, scratch.a);
        self.emit_string_arg(&args[1], line)?;
        self.store(16, scratch.b);
        // i = min(P, len(a)) is both the prefix length and the resume point
        self.emit_expression(&args[2])?;
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.min_top2();
        self.store(16, scratch.i);

        self.emit_prefix_copy(scratch, "ins");

        // tmp.len = i, terminate, then STRCAT the insertion
        self.load(16, scratch.i);
        self.store(16, scratch.tmp);
        self.push_u16(scratch.tmp + 4);
        self.load(16, scratch.i);
        self.op("ADD");
        self.push_int(0);
        self.op("STOREI8");
        self.load(16, scratch.b);
        self.push_u16(scratch.tmp);
        self.op("STRCAT");
        // resume the source after the prefix, appending at the new end
        self.load(16, scratch.tmp);
        self.store(16, scratch.j);
        self.emit_tail_append(scratch, "ins");
        Ok(())
    }

    fn emit_delete(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;

        self.emit_string_arg(&args[0], line)?;
        self.store(16, scratch.a);
        // i = min(P − 1, len)
        self.emit_expression(&args[2])?;
        self.push_int(1);
        self.op("SUB");
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.min_top2();
        self.store(16, scratch.i);
        // b = min(L, len − i) — the span to drop
        self.emit_expression(&args[1])?;
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.load(16, scratch.i);
        self.op("SUB");
        self.min_top2();
        self.store(16, scratch.b);

        self.emit_prefix_copy(scratch, "del");

        // skip the deleted span, then stream the rest
        self.load(16, scratch.i);
        self.load(16, scratch.b);
        self.op("ADD");
        self.store(16, scratch.i);
        self.emit_tail_append(scratch, "del");
        Ok(())
    }

    fn emit_replace(&mut self, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        let scratch = self.scratch(line)?;

        self.emit_string_arg(&args[0], line)?;
        self.store(16, scratch.a);
        self.emit_string_arg(&args[1], line)?;
        self.store(16, scratch.b);
        // i = min(P − 1, len)
        self.emit_expression(&args[3])?;
        self.push_int(1);
        self.op("SUB");
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.min_top2();
        self.store(16, scratch.i);
        // keep the resume point (i + span) on the stack through the loops
        self.emit_expression(&args[2])?;
        self.load(16, scratch.a);
        self.op("STRLEN");
        self.load(16, scratch.i);
        self.op("SUB");
        self.min_top2();
        self.load(16, scratch.i);
        self.op("ADD");

        self.emit_prefix_copy(scratch, "rep");

        self.load(16, scratch.i);
        self.store(16, scratch.tmp);
        self.push_u16(scratch.tmp + 4);
        self.load(16, scratch.i);
        self.op("ADD");
        self.push_int(0);
        self.op("STOREI8");
        self.load(16, scratch.b);
        self.push_u16(scratch.tmp);
        self.op("STRCAT");
        self.load(16, scratch.tmp);
        self.store(16, scratch.j);
        // pop the resume point into the source index
        self.store(16, scratch.i);
        self.emit_tail_append(scratch, "rep");
        Ok(())
    }
}

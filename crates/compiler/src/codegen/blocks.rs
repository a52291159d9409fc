//! Built-in function-block emitters
//!
//! Each emitter inlines one scan cycle of the block's behaviour against the
//! instance base address: named parameters are stored to their member slots
//! first, then the state machine runs over the stored members. Timers use
//! `GET_TICKS` (milliseconds since start) and keep their own start stamps.
//!
//! Stack discipline note: binary operators pop the top as the right operand,
//! so `LOAD32 ET / LOAD32 PT / GE` computes `ET >= PT`.

use super::CodeGen;
use crate::ast::{DataType, Expression};
use crate::builtins::{BuiltinFb, FbKind, FbMember, MemberRole, FIFO_CAPACITY, LIFO_CAPACITY};
use crate::error::Diagnostic;

impl CodeGen<'_> {
    pub(crate) fn emit_builtin_fb(
        &mut self,
        fb: &'static BuiltinFb,
        base: u16,
        args: &[(String, Expression)],
        line: u32,
    ) -> Result<(), Diagnostic> {
        self.store_fb_inputs(fb, base, args, line)?;
        match fb.kind {
            FbKind::Ton => self.emit_ton(fb, base),
            FbKind::Tof => self.emit_tof(fb, base),
            FbKind::Tp => self.emit_tp(fb, base),
            FbKind::RTrig => self.emit_r_trig(fb, base),
            FbKind::FTrig => self.emit_f_trig(fb, base),
            FbKind::Rs => self.emit_rs(fb, base),
            FbKind::Sr => self.emit_sr(fb, base),
            FbKind::Ctu => self.emit_ctu(fb, base),
            FbKind::Ctd => self.emit_ctd(fb, base),
            FbKind::Ctud => self.emit_ctud(fb, base),
            FbKind::Blink => self.emit_blink(fb, base),
            FbKind::Pwm => self.emit_pwm(fb, base),
            FbKind::Pulse => self.emit_pulse(fb, base),
            FbKind::Hysteresis => self.emit_hysteresis(fb, base),
            FbKind::Deadband => self.emit_deadband(fb, base),
            FbKind::LagFilter => self.emit_lag_filter(fb, base),
            FbKind::RampReal => self.emit_ramp_real(fb, base),
            FbKind::Integral => self.emit_integral(fb, base),
            FbKind::Derivative => self.emit_derivative(fb, base),
            FbKind::PidCompact => self.emit_pid(fb, base),
            FbKind::Fifo => self.emit_fifo(fb, base),
            FbKind::Lifo => self.emit_lifo(fb, base),
        }
        Ok(())
    }

    /// Store each named parameter to its member slot.
    fn store_fb_inputs(
        &mut self,
        fb: &'static BuiltinFb,
        base: u16,
        args: &[(String, Expression)],
        line: u32,
    ) -> Result<(), Diagnostic> {
        for (param, value) in args {
            let Some(member) = fb.member(param) else {
                return Err(Diagnostic::codegen(
                    line,
                    format!("'{}' has no parameter '{}'", fb.name, param),
                ));
            };
            if member.role != MemberRole::Input {
                return Err(Diagnostic::codegen(
                    line,
                    format!("'{}.{}' is not an input", fb.name, member.name),
                ));
            }
            self.emit_expression_as(value, &DataType::Elementary(member.ty))?;
            self.store(Self::suffix_for_size(member.size), base + member.offset);
        }
        Ok(())
    }

    fn member(fb: &'static BuiltinFb, name: &str) -> &'static FbMember {
        fb.member(name).expect("member names are fixed in the registry")
    }

    fn ld(&mut self, fb: &'static BuiltinFb, base: u16, name: &str) {
        let m = Self::member(fb, name);
        self.load(Self::suffix_for_size(m.size), base + m.offset);
    }

    fn st(&mut self, fb: &'static BuiltinFb, base: u16, name: &str) {
        let m = Self::member(fb, name);
        self.store(Self::suffix_for_size(m.size), base + m.offset);
    }

    fn addr(fb: &'static BuiltinFb, base: u16, name: &str) -> u16 {
        base + Self::member(fb, name).offset
    }

    /// `value AND rising-edge-of(member vs prev)` helper: leaves
    /// `current AND NOT prev` on the stack.
    fn rising_edge(&mut self, fb: &'static BuiltinFb, base: u16, current: &str, prev: &str) {
        self.ld(fb, base, current);
        self.ld(fb, base, prev);
        self.op("NOT");
        self.push_int(1);
        self.op("AND");
        self.op("AND");
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn emit_ton(&mut self, fb: &'static BuiltinFb, base: u16) {
        let idle = self.new_label("ton_idle");
        let running = self.new_label("ton_run");
        let end = self.new_label("ton_end");

        self.ld(fb, base, "IN");
        self.op_arg("JZ", &idle);

        self.ld(fb, base, "RUNNING");
        self.op_arg("JNZ", &running);
        self.op("GET_TICKS");
        self.st(fb, base, "START");
        self.push_int(1);
        self.st(fb, base, "RUNNING");

        self.label(&running);
        self.op("GET_TICKS");
        self.ld(fb, base, "START");
        self.op("SUB");
        self.st(fb, base, "ET");
        self.ld(fb, base, "ET");
        self.ld(fb, base, "PT");
        self.op("GE");
        self.op_arg("JZ", &end);
        self.push_int(1);
        self.st(fb, base, "Q");
        self.ld(fb, base, "PT");
        self.st(fb, base, "ET");
        self.op_arg("JMP", &end);

        self.label(&idle);
        self.push_int(0);
        self.st(fb, base, "RUNNING");
        self.push_int(0);
        self.st(fb, base, "Q");
        self.push_int(0);
        self.st(fb, base, "ET");

        self.label(&end);
    }

    fn emit_tof(&mut self, fb: &'static BuiltinFb, base: u16) {
        let on = self.new_label("tof_on");
        let timing = self.new_label("tof_timing");
        let end = self.new_label("tof_end");

        self.ld(fb, base, "IN");
        self.op_arg("JNZ", &on);

        // Input low: time out a still-set output.
        self.ld(fb, base, "RUNNING");
        self.op_arg("JNZ", &timing);
        self.ld(fb, base, "Q");
        self.op_arg("JZ", &end);
        self.push_int(1);
        self.st(fb, base, "RUNNING");
        self.op("GET_TICKS");
        self.st(fb, base, "START");

        self.label(&timing);
        self.op("GET_TICKS");
        self.ld(fb, base, "START");
        self.op("SUB");
        self.st(fb, base, "ET");
        self.ld(fb, base, "ET");
        self.ld(fb, base, "PT");
        self.op("GE");
        self.op_arg("JZ", &end);
        self.push_int(0);
        self.st(fb, base, "Q");
        self.push_int(0);
        self.st(fb, base, "RUNNING");
        self.ld(fb, base, "PT");
        self.st(fb, base, "ET");
        self.op_arg("JMP", &end);

        self.label(&on);
        self.push_int(1);
        self.st(fb, base, "Q");
        self.push_int(0);
        self.st(fb, base, "RUNNING");
        self.push_int(0);
        self.st(fb, base, "ET");

        self.label(&end);
    }

    fn emit_tp(&mut self, fb: &'static BuiltinFb, base: u16) {
        let timing = self.new_label("tp_timing");
        let done = self.new_label("tp_done");
        let end = self.new_label("tp_end");

        self.ld(fb, base, "RUNNING");
        self.op_arg("JNZ", &timing);
        self.ld(fb, base, "IN");
        self.op_arg("JZ", &end);
        // Start the pulse.
        self.push_int(1);
        self.st(fb, base, "RUNNING");
        self.push_int(1);
        self.st(fb, base, "Q");
        self.op("GET_TICKS");
        self.st(fb, base, "START");

        self.label(&timing);
        self.op("GET_TICKS");
        self.ld(fb, base, "START");
        self.op("SUB");
        self.st(fb, base, "ET");
        self.ld(fb, base, "ET");
        self.ld(fb, base, "PT");
        self.op("GE");
        self.op_arg("JNZ", &done);
        self.op_arg("JMP", &end);

        self.label(&done);
        self.push_int(0);
        self.st(fb, base, "Q");
        self.ld(fb, base, "PT");
        self.st(fb, base, "ET");
        // Re-arm only once the input has dropped.
        self.ld(fb, base, "IN");
        self.op_arg("JNZ", &end);
        self.push_int(0);
        self.st(fb, base, "RUNNING");

        self.label(&end);
    }

    // ------------------------------------------------------------------
    // Edge detectors and bistables
    // ------------------------------------------------------------------

    fn emit_r_trig(&mut self, fb: &'static BuiltinFb, base: u16) {
        self.rising_edge(fb, base, "CLK", "PREV");
        self.st(fb, base, "Q");
        self.ld(fb, base, "CLK");
        self.st(fb, base, "PREV");
    }

    fn emit_f_trig(&mut self, fb: &'static BuiltinFb, base: u16) {
        self.ld(fb, base, "CLK");
        self.op("NOT");
        self.push_int(1);
        self.op("AND");
        self.ld(fb, base, "PREV");
        self.op("AND");
        self.st(fb, base, "Q");
        self.ld(fb, base, "CLK");
        self.st(fb, base, "PREV");
    }

    fn emit_rs(&mut self, fb: &'static BuiltinFb, base: u16) {
        // Reset-dominant: Q1 := (S OR Q1) AND NOT R1
        self.ld(fb, base, "S");
        self.ld(fb, base, "Q1");
        self.op("OR");
        self.ld(fb, base, "R1");
        self.op("NOT");
        self.push_int(1);
        self.op("AND");
        self.op("AND");
        self.st(fb, base, "Q1");
    }

    fn emit_sr(&mut self, fb: &'static BuiltinFb, base: u16) {
        // Set-dominant: Q1 := S1 OR (NOT R AND Q1)
        self.ld(fb, base, "R");
        self.op("NOT");
        self.push_int(1);
        self.op("AND");
        self.ld(fb, base, "Q1");
        self.op("AND");
        self.ld(fb, base, "S1");
        self.op("OR");
        self.st(fb, base, "Q1");
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    fn emit_ctu(&mut self, fb: &'static BuiltinFb, base: u16) {
        let count = self.new_label("ctu_count");
        let out = self.new_label("ctu_out");

        self.ld(fb, base, "R");
        self.op_arg("JZ", &count);
        self.push_int(0);
        self.st(fb, base, "CV");
        self.op_arg("JMP", &out);

        self.label(&count);
        self.rising_edge(fb, base, "CU", "PREV");
        self.op_arg("JZ", &out);
        self.ld(fb, base, "CV");
        self.push_int(1);
        self.op("ADD");
        self.st(fb, base, "CV");

        self.label(&out);
        self.ld(fb, base, "CU");
        self.st(fb, base, "PREV");
        self.ld(fb, base, "CV");
        self.ld(fb, base, "PV");
        self.op("GE");
        self.st(fb, base, "Q");
    }

    fn emit_ctd(&mut self, fb: &'static BuiltinFb, base: u16) {
        let count = self.new_label("ctd_count");
        let out = self.new_label("ctd_out");

        self.ld(fb, base, "LD");
        self.op_arg("JZ", &count);
        self.ld(fb, base, "PV");
        self.st(fb, base, "CV");
        self.op_arg("JMP", &out);

        self.label(&count);
        self.rising_edge(fb, base, "CD", "PREV");
        self.op_arg("JZ", &out);
        self.ld(fb, base, "CV");
        self.op_arg("JZ", &out);
        self.ld(fb, base, "CV");
        self.push_int(1);
        self.op("SUB");
        self.st(fb, base, "CV");

        self.label(&out);
        self.ld(fb, base, "CD");
        self.st(fb, base, "PREV");
        self.ld(fb, base, "CV");
        self.push_int(0);
        self.op("EQ");
        self.st(fb, base, "Q");
    }

    fn emit_ctud(&mut self, fb: &'static BuiltinFb, base: u16) {
        let load = self.new_label("ctud_load");
        let edges = self.new_label("ctud_edges");
        let down = self.new_label("ctud_down");
        let out = self.new_label("ctud_out");

        self.ld(fb, base, "R");
        self.op_arg("JZ", &load);
        self.push_int(0);
        self.st(fb, base, "CV");
        self.op_arg("JMP", &out);

        self.label(&load);
        self.ld(fb, base, "LD");
        self.op_arg("JZ", &edges);
        self.ld(fb, base, "PV");
        self.st(fb, base, "CV");
        self.op_arg("JMP", &out);

        self.label(&edges);
        self.rising_edge(fb, base, "CU", "PREV_U");
        self.op_arg("JZ", &down);
        self.ld(fb, base, "CV");
        self.push_int(1);
        self.op("ADD");
        self.st(fb, base, "CV");

        self.label(&down);
        self.rising_edge(fb, base, "CD", "PREV_D");
        self.op_arg("JZ", &out);
        self.ld(fb, base, "CV");
        self.op_arg("JZ", &out);
        self.ld(fb, base, "CV");
        self.push_int(1);
        self.op("SUB");
        self.st(fb, base, "CV");

        self.label(&out);
        self.ld(fb, base, "CU");
        self.st(fb, base, "PREV_U");
        self.ld(fb, base, "CD");
        self.st(fb, base, "PREV_D");
        self.ld(fb, base, "CV");
        self.ld(fb, base, "PV");
        self.op("GE");
        self.st(fb, base, "QU");
        self.ld(fb, base, "CV");
        self.push_int(0);
        self.op("EQ");
        self.st(fb, base, "QD");
    }

    // ------------------------------------------------------------------
    // Generators
    // ------------------------------------------------------------------

    fn emit_blink(&mut self, fb: &'static BuiltinFb, base: u16) {
        let off = self.new_label("blink_off");
        let use_toff = self.new_label("blink_toff");
        let compare = self.new_label("blink_cmp");
        let end = self.new_label("blink_end");

        self.ld(fb, base, "ENABLE");
        self.op_arg("JZ", &off);

        // elapsed = now - LAST, duration = PHASE ? T_ON : T_OFF
        self.op("GET_TICKS");
        self.ld(fb, base, "LAST");
        self.op("SUB");
        self.ld(fb, base, "PHASE");
        self.op_arg("JZ", &use_toff);
        self.ld(fb, base, "T_ON");
        self.op_arg("JMP", &compare);
        self.label(&use_toff);
        self.ld(fb, base, "T_OFF");
        self.label(&compare);
        self.op("GE");
        self.op_arg("JZ", &end);

        // Phase over: toggle and restamp.
        self.ld(fb, base, "PHASE");
        self.op("NOT");
        self.push_int(1);
        self.op("AND");
        self.st(fb, base, "PHASE");
        self.ld(fb, base, "PHASE");
        self.st(fb, base, "OUT");
        self.op("GET_TICKS");
        self.st(fb, base, "LAST");
        self.op_arg("JMP", &end);

        self.label(&off);
        self.push_int(0);
        self.st(fb, base, "OUT");
        self.push_int(0);
        self.st(fb, base, "PHASE");

        self.label(&end);
    }

    fn emit_pwm(&mut self, fb: &'static BuiltinFb, base: u16) {
        let off = self.new_label("pwm_off");
        let calc = self.new_label("pwm_calc");
        let end = self.new_label("pwm_end");

        self.ld(fb, base, "ENABLE");
        self.op_arg("JZ", &off);

        self.op("GET_TICKS");
        self.ld(fb, base, "START");
        self.op("SUB");
        self.op("DUP");
        self.ld(fb, base, "PERIOD");
        self.op("LT");
        self.op_arg("JNZ", &calc);
        // Period rolled over: restart it.
        self.op("DROP");
        self.op("GET_TICKS");
        self.st(fb, base, "START");
        self.push_int(0);

        self.label(&calc);
        // OUT := phase < PERIOD * DUTY / 100
        self.ld(fb, base, "PERIOD");
        self.ld(fb, base, "DUTY");
        self.op("MUL");
        self.push_int(100);
        self.op("DIV");
        self.op("LT");
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&off);
        self.push_int(0);
        self.st(fb, base, "OUT");
        self.op("GET_TICKS");
        self.st(fb, base, "START");

        self.label(&end);
    }

    fn emit_pulse(&mut self, fb: &'static BuiltinFb, base: u16) {
        let run = self.new_label("pulse_run");
        let out = self.new_label("pulse_out");

        // A rising edge starts (or restarts) the pulse.
        self.rising_edge(fb, base, "IN", "PREV");
        self.op_arg("JZ", &run);
        self.push_int(1);
        self.st(fb, base, "RUNNING");
        self.push_int(1);
        self.st(fb, base, "Q");
        self.op("GET_TICKS");
        self.st(fb, base, "START");

        self.label(&run);
        self.ld(fb, base, "RUNNING");
        self.op_arg("JZ", &out);
        self.op("GET_TICKS");
        self.ld(fb, base, "START");
        self.op("SUB");
        self.st(fb, base, "ET");
        self.ld(fb, base, "ET");
        self.ld(fb, base, "PT");
        self.op("LT");
        self.op_arg("JNZ", &out);
        self.push_int(0);
        self.st(fb, base, "Q");
        self.push_int(0);
        self.st(fb, base, "RUNNING");
        self.ld(fb, base, "PT");
        self.st(fb, base, "ET");

        self.label(&out);
        self.ld(fb, base, "IN");
        self.st(fb, base, "PREV");
    }

    // ------------------------------------------------------------------
    // Process control
    // ------------------------------------------------------------------

    fn emit_hysteresis(&mut self, fb: &'static BuiltinFb, base: u16) {
        let low = self.new_label("hys_low");
        let end = self.new_label("hys_end");

        self.ld(fb, base, "IN");
        self.ld(fb, base, "HIGH");
        self.op("GT");
        self.op_arg("JZ", &low);
        self.push_int(1);
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&low);
        self.ld(fb, base, "IN");
        self.ld(fb, base, "LOW");
        self.op("LT");
        self.op_arg("JZ", &end);
        self.push_int(0);
        self.st(fb, base, "OUT");

        self.label(&end);
    }

    fn emit_deadband(&mut self, fb: &'static BuiltinFb, base: u16) {
        let zero = self.new_label("db_zero");
        let end = self.new_label("db_end");

        self.ld(fb, base, "IN");
        self.op("ABSF");
        self.ld(fb, base, "BAND");
        self.op("GT");
        self.op_arg("JZ", &zero);
        self.ld(fb, base, "IN");
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&zero);
        self.push_f32(0.0);
        self.st(fb, base, "OUT");

        self.label(&end);
    }

    fn emit_lag_filter(&mut self, fb: &'static BuiltinFb, base: u16) {
        let run = self.new_label("lag_run");
        let end = self.new_label("lag_end");

        self.ld(fb, base, "INIT");
        self.op_arg("JNZ", &run);
        // First call tracks the input directly.
        self.push_int(1);
        self.st(fb, base, "INIT");
        self.ld(fb, base, "IN");
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&run);
        // OUT := OUT + GAIN * (IN - OUT)
        self.ld(fb, base, "IN");
        self.ld(fb, base, "OUT");
        self.op("SUBF");
        self.ld(fb, base, "GAIN");
        self.op("MULF");
        self.ld(fb, base, "OUT");
        self.op("ADDF");
        self.st(fb, base, "OUT");

        self.label(&end);
    }

    fn emit_ramp_real(&mut self, fb: &'static BuiltinFb, base: u16) {
        let step = self.new_label("ramp_step");
        let down = self.new_label("ramp_down");
        let end = self.new_label("ramp_end");

        self.ld(fb, base, "TARGET");
        self.ld(fb, base, "OUT");
        self.op("SUBF");
        self.op("DUP");
        self.op("ABSF");
        self.ld(fb, base, "RATE");
        self.op("LE");
        self.op_arg("JZ", &step);
        // Close enough: snap to the target.
        self.op("DROP");
        self.ld(fb, base, "TARGET");
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&step);
        self.push_f32(0.0);
        self.op("GT");
        self.op_arg("JZ", &down);
        self.ld(fb, base, "OUT");
        self.ld(fb, base, "RATE");
        self.op("ADDF");
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&down);
        self.ld(fb, base, "OUT");
        self.ld(fb, base, "RATE");
        self.op("SUBF");
        self.st(fb, base, "OUT");

        self.label(&end);
    }

    fn emit_integral(&mut self, fb: &'static BuiltinFb, base: u16) {
        let accumulate = self.new_label("int_acc");
        let end = self.new_label("int_end");

        self.ld(fb, base, "RESET");
        self.op_arg("JZ", &accumulate);
        self.push_f32(0.0);
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&accumulate);
        self.ld(fb, base, "IN");
        self.ld(fb, base, "K");
        self.op("MULF");
        self.ld(fb, base, "OUT");
        self.op("ADDF");
        self.st(fb, base, "OUT");

        self.label(&end);
    }

    fn emit_derivative(&mut self, fb: &'static BuiltinFb, base: u16) {
        self.ld(fb, base, "IN");
        self.ld(fb, base, "PREV");
        self.op("SUBF");
        self.ld(fb, base, "K");
        self.op("MULF");
        self.st(fb, base, "OUT");
        self.ld(fb, base, "IN");
        self.st(fb, base, "PREV");
    }

    fn emit_pid(&mut self, fb: &'static BuiltinFb, base: u16) {
        let clamp_low = self.new_label("pid_lo");
        let store = self.new_label("pid_store");
        let off = self.new_label("pid_off");
        let end = self.new_label("pid_end");

        self.ld(fb, base, "ENABLE");
        self.op_arg("JZ", &off);

        // err = SP - PV
        self.ld(fb, base, "SP");
        self.ld(fb, base, "PV");
        self.op("SUBF");
        // I_SUM += err * KI
        self.op("DUP");
        self.ld(fb, base, "KI");
        self.op("MULF");
        self.ld(fb, base, "I_SUM");
        self.op("ADDF");
        self.st(fb, base, "I_SUM");
        // d = (err - PREV_ERR) * KD, remembering err
        self.op("DUP");
        self.ld(fb, base, "PREV_ERR");
        self.op("SUBF");
        self.ld(fb, base, "KD");
        self.op("MULF");
        self.op("OVER");
        self.st(fb, base, "PREV_ERR");
        // out = err * KP + d + I_SUM
        self.op("SWAP");
        self.ld(fb, base, "KP");
        self.op("MULF");
        self.op("ADDF");
        self.ld(fb, base, "I_SUM");
        self.op("ADDF");
        // Clamp to [OUT_MIN, OUT_MAX].
        self.op("DUP");
        self.ld(fb, base, "OUT_MAX");
        self.op("GT");
        self.op_arg("JZ", &clamp_low);
        self.op("DROP");
        self.ld(fb, base, "OUT_MAX");
        self.label(&clamp_low);
        self.op("DUP");
        self.ld(fb, base, "OUT_MIN");
        self.op("LT");
        self.op_arg("JZ", &store);
        self.op("DROP");
        self.ld(fb, base, "OUT_MIN");
        self.label(&store);
        self.st(fb, base, "OUT");
        self.op_arg("JMP", &end);

        self.label(&off);
        self.push_f32(0.0);
        self.st(fb, base, "OUT");

        self.label(&end);
    }

    // ------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------

    fn emit_fifo(&mut self, fb: &'static BuiltinFb, base: u16) {
        let edges = self.new_label("fifo_edges");
        let pop = self.new_label("fifo_pop");
        let flags = self.new_label("fifo_flags");
        let buf = Self::addr(fb, base, "BUF");

        self.ld(fb, base, "RESET");
        self.op_arg("JZ", &edges);
        self.push_int(0);
        self.st(fb, base, "COUNT");
        self.push_int(0);
        self.st(fb, base, "HEAD");
        self.push_int(0);
        self.st(fb, base, "TAIL");
        self.op_arg("JMP", &flags);

        self.label(&edges);
        self.rising_edge(fb, base, "PUSH", "PREV_PUSH");
        self.op_arg("JZ", &pop);
        self.ld(fb, base, "COUNT");
        self.push_int(FIFO_CAPACITY as i64);
        self.op("GE");
        self.op_arg("JNZ", &pop);
        // BUF[TAIL] := IN
        self.push_u16(buf);
        self.ld(fb, base, "TAIL");
        self.push_int(4);
        self.op("MUL");
        self.op("ADD");
        self.ld(fb, base, "IN");
        self.op("STOREI32");
        self.ld(fb, base, "TAIL");
        self.push_int(1);
        self.op("ADD");
        self.push_int(FIFO_CAPACITY as i64);
        self.op("MOD");
        self.st(fb, base, "TAIL");
        self.ld(fb, base, "COUNT");
        self.push_int(1);
        self.op("ADD");
        self.st(fb, base, "COUNT");

        self.label(&pop);
        self.rising_edge(fb, base, "POP", "PREV_POP");
        self.op_arg("JZ", &flags);
        self.ld(fb, base, "COUNT");
        self.op_arg("JZ", &flags);
        // OUT := BUF[HEAD]
        self.push_u16(buf);
        self.ld(fb, base, "HEAD");
        self.push_int(4);
        self.op("MUL");
        self.op("ADD");
        self.op("LOADI32");
        self.st(fb, base, "OUT");
        self.ld(fb, base, "HEAD");
        self.push_int(1);
        self.op("ADD");
        self.push_int(FIFO_CAPACITY as i64);
        self.op("MOD");
        self.st(fb, base, "HEAD");
        self.ld(fb, base, "COUNT");
        self.push_int(1);
        self.op("SUB");
        self.st(fb, base, "COUNT");

        self.label(&flags);
        self.ld(fb, base, "PUSH");
        self.st(fb, base, "PREV_PUSH");
        self.ld(fb, base, "POP");
        self.st(fb, base, "PREV_POP");
        self.ld(fb, base, "COUNT");
        self.push_int(0);
        self.op("EQ");
        self.st(fb, base, "EMPTY");
        self.ld(fb, base, "COUNT");
        self.push_int(FIFO_CAPACITY as i64);
        self.op("GE");
        self.st(fb, base, "FULL");
    }

    fn emit_lifo(&mut self, fb: &'static BuiltinFb, base: u16) {
        let edges = self.new_label("lifo_edges");
        let pop = self.new_label("lifo_pop");
        let flags = self.new_label("lifo_flags");
        let buf = Self::addr(fb, base, "BUF");

        self.ld(fb, base, "RESET");
        self.op_arg("JZ", &edges);
        self.push_int(0);
        self.st(fb, base, "COUNT");
        self.op_arg("JMP", &flags);

        self.label(&edges);
        self.rising_edge(fb, base, "PUSH", "PREV_PUSH");
        self.op_arg("JZ", &pop);
        self.ld(fb, base, "COUNT");
        self.push_int(LIFO_CAPACITY as i64);
        self.op("GE");
        self.op_arg("JNZ", &pop);
        // BUF[COUNT] := IN, then grow
        self.push_u16(buf);
        self.ld(fb, base, "COUNT");
        self.push_int(4);
        self.op("MUL");
        self.op("ADD");
        self.ld(fb, base, "IN");
        self.op("STOREI32");
        self.ld(fb, base, "COUNT");
        self.push_int(1);
        self.op("ADD");
        self.st(fb, base, "COUNT");

        self.label(&pop);
        self.rising_edge(fb, base, "POP", "PREV_POP");
        self.op_arg("JZ", &flags);
        self.ld(fb, base, "COUNT");
        self.op_arg("JZ", &flags);
        // Shrink, then OUT := BUF[COUNT]
        self.ld(fb, base, "COUNT");
        self.push_int(1);
        self.op("SUB");
        self.st(fb, base, "COUNT");
        self.push_u16(buf);
        self.ld(fb, base, "COUNT");
        self.push_int(4);
        self.op("MUL");
        self.op("ADD");
        self.op("LOADI32");
        self.st(fb, base, "OUT");

        self.label(&flags);
        self.ld(fb, base, "PUSH");
        self.st(fb, base, "PREV_PUSH");
        self.ld(fb, base, "POP");
        self.st(fb, base, "PREV_POP");
        self.ld(fb, base, "COUNT");
        self.push_int(0);
        self.op("EQ");
        self.st(fb, base, "EMPTY");
        self.ld(fb, base, "COUNT");
        self.push_int(LIFO_CAPACITY as i64);
        self.op("GE");
        self.st(fb, base, "FULL");
    }
}

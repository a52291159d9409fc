//! Abstract stack-depth verification of generated bytecode
//!
//! Every opcode has a fixed stack effect, so a worklist pass over the
//! control-flow graph can prove that generated code never pops an empty
//! stack and that every program point is reached with one consistent depth.
//! This exercises the hand-tuned emitter sequences (selection juggling,
//! polynomial evaluation, the string routines, the function-block bodies)
//! much harder than pattern assertions can.
//!
//! Programs containing CALL are skipped by the checker (a call's net effect
//! depends on the callee's arity, which bytecode alone does not carry).

use std::collections::HashMap;
use zplc_compiler::compile_source;
use zplc_core::disasm::Decoder;
use zplc_core::opcode::Opcode;

/// `(pops, pushes)` of one opcode, `None` for CALL/RET (not modelled).
fn stack_effect(opcode: Opcode) -> Option<(i32, i32)> {
    use Opcode::*;
    Some(match opcode {
        Nop | Break | Jr | Jmp => (0, 0),
        Halt => (0, 0),
        GetTicks => (0, 1),
        Dup => (1, 2),
        Drop => (1, 0),
        Swap => (2, 2),
        Over => (2, 3),
        Rot => (3, 3),
        Pick => (0, 1),
        LoadI8 | LoadI16 | LoadI32 => (1, 1),
        StoreI8 | StoreI16 | StoreI32 => (2, 0),
        StrLen => (1, 1),
        StrCpy | StrCat => (2, 0),
        StrCmp => (2, 1),
        StrClr => (1, 0),
        Add | Sub | Mul | Div | Mod | AddF | SubF | MulF | DivF => (2, 1),
        Neg | Abs | NegF | AbsF | Not => (1, 1),
        And | Or | Xor | Shl | Shr | Sar => (2, 1),
        Eq | Ne | Lt | Le | Gt | Ge | LtU | GtU => (2, 1),
        Push8 | Push16 | Push32 => (0, 1),
        Load8 | Load16 | Load32 | Load64 => (0, 1),
        Store8 | Store16 | Store32 | Store64 => (1, 0),
        Jrz | Jrnz | Jz | Jnz => (1, 0),
        I2F | F2I | I2B | Ext8 | Ext16 | Zext8 | Zext16 => (1, 1),
        Call | Ret => return None,
    })
}

/// Walk all paths from PC 0, tracking stack depth. Panics on underflow or
/// on a join reached with two different depths. Returns false when the code
/// contains CALL/RET and cannot be modelled.
fn verify_balance(code: &[u8]) -> bool {
    let mut instructions = HashMap::new();
    for decoded in Decoder::new(code) {
        let instruction = decoded.expect("generated code must decode");
        instructions.insert(instruction.pc, instruction);
    }
    if instructions
        .values()
        .any(|i| matches!(i.opcode, Opcode::Call | Opcode::Ret))
    {
        return false;
    }

    let mut depth_at: HashMap<usize, i32> = HashMap::new();
    let mut worklist = vec![(0usize, 0i32)];
    while let Some((pc, depth)) = worklist.pop() {
        match depth_at.get(&pc) {
            Some(&known) => {
                assert_eq!(known, depth, "PC 0x{:04X} reached with depths {} and {}", pc, known, depth);
                continue;
            }
            None => {
                depth_at.insert(pc, depth);
            }
        }

        let instruction = instructions
            .get(&pc)
            .unwrap_or_else(|| panic!("branch into mid-instruction PC 0x{:04X}", pc));
        let (pops, pushes) = stack_effect(instruction.opcode).expect("CALL/RET filtered above");
        assert!(
            depth >= pops,
            "stack underflow at PC 0x{:04X} ({:?}): depth {} pops {}",
            pc,
            instruction.opcode,
            depth,
            pops
        );
        let next_depth = depth - pops + pushes;

        match instruction.opcode {
            Opcode::Halt => {
                assert_eq!(next_depth, 0, "HALT at PC 0x{:04X} with {} values left", pc, next_depth);
            }
            Opcode::Jmp => {
                worklist.push((instruction.operand.expect("JMP operand") as usize, next_depth));
            }
            Opcode::Jz | Opcode::Jnz => {
                worklist.push((instruction.operand.expect("branch operand") as usize, next_depth));
                worklist.push((pc + instruction.opcode.encoded_size(), next_depth));
            }
            _ => {
                worklist.push((pc + instruction.opcode.encoded_size(), next_depth));
            }
        }
    }
    true
}

fn assert_balanced(source: &str) {
    let program = compile_source(source).unwrap_or_else(|e| panic!("compile: {}", e));
    assert!(
        verify_balance(&program.bytecode),
        "program unexpectedly contains CALL/RET"
    );
}

#[test]
fn control_flow_is_balanced() {
    assert_balanced(
        "PROGRAM Flow
         VAR x : INT; sum : INT; sel : INT; END_VAR
         IF x > 3 THEN sum := 1; ELSIF x > 1 THEN sum := 2; ELSE sum := 3; END_IF;
         FOR x := 1 TO 10 DO
             IF x = 5 THEN CONTINUE; END_IF;
             IF x = 8 THEN EXIT; END_IF;
             sum := sum + x;
         END_FOR;
         WHILE sum > 0 DO sum := sum - 1; END_WHILE;
         REPEAT sum := sum + 2; UNTIL sum >= 10 END_REPEAT;
         CASE sel OF
         1, 3, 5..7: sum := 1;
         10: sum := 2;
         ELSE sum := 0;
         END_CASE;
         END_PROGRAM",
    );
}

#[test]
fn timers_and_counters_are_balanced() {
    assert_balanced(
        "PROGRAM Timers
         VAR t1 : TON; t2 : TOF; t3 : TP; e1 : R_TRIG; e2 : F_TRIG;
             b1 : RS; b2 : SR; c1 : CTU; c2 : CTD; c3 : CTUD;
             run : BOOL; n : INT; END_VAR
         t1(IN := run, PT := T#500ms);
         t2(IN := run, PT := T#1s);
         t3(IN := t1.Q, PT := T#100ms);
         e1(CLK := run);
         e2(CLK := run);
         b1(S := e1.Q, R1 := e2.Q);
         b2(S1 := run, R := t2.Q);
         c1(CU := e1.Q, R := b1.Q1, PV := 10);
         c2(CD := e1.Q, LD := run, PV := 10);
         c3(CU := run, CD := e2.Q, R := FALSE, LD := FALSE, PV := 5);
         n := c1.CV;
         END_PROGRAM",
    );
}

#[test]
fn generators_and_process_blocks_are_balanced() {
    assert_balanced(
        "PROGRAM Process
         VAR g1 : BLINK; g2 : PWM; g3 : PULSE;
             h : HYSTERESIS; d : DEADBAND; f : LAG_FILTER;
             r : RAMP_REAL; i : INTEGRAL; v : DERIVATIVE; pid : PID_Compact;
             enable : BOOL; pv : REAL; out : REAL; END_VAR
         g1(ENABLE := enable, T_ON := T#500ms, T_OFF := T#500ms);
         g2(ENABLE := enable, PERIOD := T#20ms, DUTY := 30);
         g3(IN := enable, PT := T#50ms);
         h(IN := pv, HIGH := 80.0, LOW := 20.0);
         d(IN := pv, BAND := 0.5);
         f(IN := pv, GAIN := 0.1);
         r(TARGET := pv, RATE := 2.5);
         i(IN := pv, K := 0.01, RESET := FALSE);
         v(IN := pv, K := 10.0);
         pid(SP := 50.0, PV := pv, KP := 1.2, KI := 0.1, KD := 0.05,
             OUT_MIN := 0.0, OUT_MAX := 100.0, ENABLE := enable);
         out := pid.OUT;
         END_PROGRAM",
    );
}

#[test]
fn buffers_are_balanced() {
    assert_balanced(
        "PROGRAM Buffers
         VAR q : FIFO; s : LIFO; push : BOOL; pop : BOOL; v : DINT; END_VAR
         q(PUSH := push, POP := pop, IN := v);
         s(PUSH := pop, POP := push, IN := v);
         v := q.OUT + s.OUT;
         END_PROGRAM",
    );
}

#[test]
fn math_functions_are_balanced() {
    assert_balanced(
        "PROGRAM Math
         VAR a : REAL; b : REAL; n : DINT; END_VAR
         a := SQRT(b);
         a := SIN(b) + COS(b) + TAN(b);
         a := ASIN(b) + ACOS(b) + ATAN(b) + ATAN2(a, b);
         a := LN(b) + LOG(b) + EXP(b) + EXPT(b, 2.0);
         a := ABSF(b) + NEGF(b);
         n := TRUNC(b) + ROUND(b);
         a := MAX(a, b) + MIN(a, b) + LIMIT(0.0, a, 100.0);
         a := SEL(a > b, a, b);
         n := MUX(n, 1, 2, 3);
         n := SHL(n, 2) + SHR(n, 2) + ROL(n, 3) + ROR(n, 3);
         n := BOOL_TO_INT(a > b);
         a := INT_TO_REAL(n);
         a := NORM_X(0.0, a, 100.0);
         a := SCALE_X(4.0, a, 20.0);
         END_PROGRAM",
    );
}

#[test]
fn string_functions_are_balanced() {
    assert_balanced(
        "PROGRAM Strings
         VAR s1 : STRING := 'hello'; s2 : STRING := 'world'; s3 : STRING;
             n : DINT; ok : BOOL; END_VAR
         s3 := CONCAT(s1, s2);
         s3 := LEFT(s1, 3);
         s3 := RIGHT(s1, 3);
         s3 := MID(s1, 2, 2);
         s3 := INSERT(s1, s2, 2);
         s3 := DELETE(s1, 2, 1);
         s3 := REPLACE(s1, s2, 2, 1);
         n := LEN(s1) + FIND(s1, s2) + STRCMP(s1, s2);
         ok := EQ_STRING(s1, s2) OR NE_STRING(s1, s2) OR s1 = s2 OR s1 <> s2;
         COPY(s1, s3);
         CLEAR(s3);
         END_PROGRAM",
    );
}

#[test]
fn arrays_and_structs_are_balanced() {
    assert_balanced(
        "TYPE Reading : STRUCT value : REAL; id : INT; END_STRUCT; END_TYPE
         PROGRAM Data
         VAR a : ARRAY[1..5] OF INT := [1, 2, 3, 4, 5];
             m : ARRAY[0..2, 0..2] OF REAL;
             r : Reading; i : INT; END_VAR
         a[i + 1] := a[i] + 1;
         m[1, 2] := m[0, 0] * 2.0;
         r.value := m[1, 1];
         r.id := a[2];
         END_PROGRAM",
    );
}

#[test]
fn user_fb_inlining_is_balanced() {
    assert_balanced(
        "FUNCTION_BLOCK Debounce
         VAR_INPUT raw : BOOL; window : TIME; END_VAR
         VAR_OUTPUT clean : BOOL; END_VAR
         VAR hold : TON; END_VAR
         hold(IN := raw, PT := window);
         clean := hold.Q;
         END_FUNCTION_BLOCK
         PROGRAM P
         VAR d : Debounce; button AT %I0.0 : BOOL; lamp AT %Q0.0 : BOOL; END_VAR
         d(raw := button, window := T#20ms);
         lamp := d.clean;
         END_PROGRAM",
    );
}

#[test]
fn system_functions_are_balanced() {
    assert_balanced(
        "PROGRAM Sys
         VAR t : TIME; END_VAR
         t := UPTIME();
         t := CYCLE_TIME();
         WATCHDOG_RESET();
         END_PROGRAM",
    );
}

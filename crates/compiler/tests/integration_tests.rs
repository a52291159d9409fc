//! End-to-end pipeline tests: source text through codegen, assembly and
//! linking down to container bytes.

use zplc_compiler::codegen::CodegenConfig;
use zplc_compiler::linker::{link_project, relocate, ProgramSource, SourceLanguage};
use zplc_compiler::project::ProjectDescriptor;
use zplc_compiler::{assemble, compile_source, compile_source_with_config, parse};
use zplc_core::disasm::{disassemble, Decoder};
use zplc_core::image;
use zplc_core::opcode::Opcode;

const BLINKY: &str = "\
PROGRAM Blinky
VAR BlinkTimer : TON; LedState : BOOL := FALSE; END_VAR
VAR_OUTPUT LED_Output AT %Q0.0 : BOOL; END_VAR
BlinkTimer(IN := TRUE, PT := T#500ms);
IF BlinkTimer.Q THEN LedState := NOT LedState; BlinkTimer(IN := FALSE, PT := T#500ms); END_IF;
LED_Output := LedState;
END_PROGRAM
";

/// Instruction-start PCs of a code buffer.
fn instruction_starts(code: &[u8]) -> Vec<usize> {
    Decoder::new(code)
        .map(|i| i.expect("well-formed bytecode").pc)
        .collect()
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ---------------------------------------------------------------------------
// S1 — Blinky
// ---------------------------------------------------------------------------

#[test]
fn s1_blinky_layout_and_code() {
    let program = compile_source(BLINKY).unwrap();

    // LedState at the window base, the timer instance right behind it,
    // the output pin in the output process image.
    let map_has = |name: &str, rest: &str| {
        program
            .assembly
            .lines()
            .any(|l| l.contains(name) && l.contains(rest))
    };
    assert!(map_has("LedState", "0x2000 (1 bytes)"));
    assert!(map_has("BlinkTimer", "0x2001 (16 bytes)"));
    assert!(map_has("LED_Output", "0x1000 (1 bytes)"));

    // The timer reads the tick counter.
    assert!(program.bytecode.contains(&u8::from(Opcode::GetTicks)));

    // PT := T#500ms stores 500 (little-endian u32) to the PT slot at
    // base + 4 = 0x2005.
    let push_500_store_pt = [0xC0, 0xF4, 0x01, 0x00, 0x00, 0x86, 0x05, 0x20];
    assert!(contains_subsequence(&program.bytecode, &push_500_store_pt));

    // IF BlinkTimer.Q jumps over the toggle body on zero.
    assert!(program.bytecode.contains(&u8::from(Opcode::Jz)));
}

// ---------------------------------------------------------------------------
// S2 — FOR loop sum
// ---------------------------------------------------------------------------

#[test]
fn s2_for_loop_shape() {
    let program = compile_source(
        "PROGRAM Sum
         VAR sum : INT; i : INT; END_VAR
         sum := 0;
         FOR i := 1 TO 10 DO sum := sum + i; END_FOR;
         END_PROGRAM",
    )
    .unwrap();
    let asm = &program.assembly;

    // Exactly one loop head, one continue point, one end label.
    assert_eq!(asm.matches("\nfor_loop_").count(), 1, "{}", asm);
    assert_eq!(asm.matches("\nfor_continue_").count(), 1);
    assert_eq!(asm.matches("\nend_for_").count(), 1);

    // Counter compare exits on GT, the increment re-enters the loop.
    let gt = asm.find("    GT\n").expect("counter compare");
    let jnz = asm[gt..].find("JNZ end_for_").expect("exit branch");
    assert!(jnz < 40);
    let continue_at = asm.find("for_continue_").expect("continue label");
    let add = asm[continue_at..].find("    ADD\n").expect("increment");
    let store = asm[continue_at + add..].find("STORE16").expect("counter store");
    assert!(store < 40);
    assert!(asm[continue_at..].contains("JMP for_"));
}

// ---------------------------------------------------------------------------
// S3 — multi-task build
// ---------------------------------------------------------------------------

#[test]
fn s3_multi_task_container() {
    let descriptor = ProjectDescriptor::from_json(
        r#"{
            "name": "two", "version": "1.0",
            "tasks": [
                { "name": "fast", "trigger": "cyclic", "interval": 10, "programs": ["FastLogic.st"] },
                { "name": "slow", "trigger": "cyclic", "interval": 100, "programs": ["SlowLogic.st"] }
            ]
        }"#,
    )
    .unwrap();
    let sources = vec![
        ProgramSource {
            name: "FastLogic.st".to_string(),
            language: SourceLanguage::StructuredText,
            text: "PROGRAM FastLogic VAR a : INT; END_VAR a := a + 1; END_PROGRAM".to_string(),
        },
        ProgramSource {
            name: "SlowLogic.st".to_string(),
            language: SourceLanguage::StructuredText,
            text: "PROGRAM SlowLogic VAR b : INT; END_VAR IF b < 9 THEN b := 0; END_IF; END_PROGRAM"
                .to_string(),
        },
    ];

    let output = link_project(&descriptor, &sources).unwrap();
    let fast_size = output.programs[0].size;

    assert_eq!(output.image.tasks[0].interval_us, 10_000);
    assert_eq!(output.image.tasks[0].entry_point, 0);
    assert_eq!(output.image.tasks[1].interval_us, 100_000);
    assert_eq!(output.image.tasks[1].entry_point, fast_size);

    // No absolute operand in SlowLogic's slot points below its base.
    for instruction in Decoder::new(&output.image.code).map(|i| i.unwrap()) {
        if instruction.pc >= fast_size as usize && instruction.opcode.is_absolute_branch() {
            assert!(
                instruction.operand.unwrap_or(0) >= fast_size as u32,
                "branch at PC {} targets below the slot base",
                instruction.pc
            );
        }
    }

    // The container round-trips through its binary form.
    let mut bytes = Vec::new();
    image::write(&mut bytes, &output.image).unwrap();
    let parsed = image::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(parsed, output.image);
}

// ---------------------------------------------------------------------------
// S4 — CASE with ranges
// ---------------------------------------------------------------------------

#[test]
fn s4_case_dispatch_shape() {
    let program = compile_source(
        "PROGRAM Sel
         VAR sel : INT; x : INT; END_VAR
         CASE sel OF
         1, 3, 5..7: x := 1;
         ELSE x := 0;
         END_CASE;
         END_PROGRAM",
    )
    .unwrap();
    let asm = &program.assembly;

    // Single values: DUP / PUSH / EQ / JNZ.
    assert!(asm.contains("    DUP\n    PUSH8 1\n    EQ\n    JNZ case_branch_"), "{}", asm);
    assert!(asm.contains("    DUP\n    PUSH8 3\n    EQ\n    JNZ case_branch_"));

    // The range keeps the selector available for both bound checks.
    assert!(asm.contains("    DUP\n    PUSH8 5\n    GE\n"));
    assert!(asm.contains("    PUSH8 7\n    LE\n"));

    // Every branch (including ELSE) discards the selector first.
    for label in ["case_branch_", "case_else_"] {
        let at = asm.find(&format!("\n{}", label)).expect(label);
        let after = &asm[at..];
        let colon = after.find(":\n").expect("label line");
        assert!(after[colon..].starts_with(":\n    DROP\n"), "{} does not DROP", label);
    }
}

// ---------------------------------------------------------------------------
// S5 / S6 — assembler round trip and relative range
// ---------------------------------------------------------------------------

#[test]
fn s5_assemble_disassemble_round_trip() {
    let assembled = assemble("_start:\n    PUSH8 42\n    HALT\n").unwrap();
    assert_eq!(assembled.bytecode, vec![0x40, 0x2A, 0x01]);

    let text = disassemble(&assembled.bytecode);
    assert!(text.contains("PUSH8 42"));
    assert!(text.contains("HALT"));
}

#[test]
fn s6_relative_jump_range() {
    let mut listing = String::from("    JR too_far\n");
    for _ in 0..200 {
        listing.push_str("    NOP\n");
    }
    listing.push_str("too_far:\n    HALT\n");

    let err = assemble(&listing).unwrap_err();
    assert!(err.message.contains("out of range"));

    let fixed = listing.replace("JR too_far", "JMP too_far");
    assert!(assemble(&fixed).is_ok());
}

// ---------------------------------------------------------------------------
// Universal invariants
// ---------------------------------------------------------------------------

#[test]
fn every_opcode_assembles_to_its_encoded_size() {
    for opcode in Opcode::all() {
        let line = match opcode.operand_size() {
            0 => format!("    {}\n", opcode.mnemonic()),
            _ => format!("    {} 0\n", opcode.mnemonic()),
        };
        let assembled = assemble(&line)
            .unwrap_or_else(|e| panic!("{} failed to assemble: {}", opcode.mnemonic(), e));
        assert_eq!(
            assembled.bytecode.len(),
            opcode.encoded_size(),
            "{}",
            opcode.mnemonic()
        );
        assert_eq!(assembled.bytecode[0], u8::from(opcode));
    }
}

#[test]
fn branch_targets_hit_instruction_starts() {
    let program = compile_source(BLINKY).unwrap();
    let starts = instruction_starts(&program.bytecode);
    for instruction in Decoder::new(&program.bytecode).map(|i| i.unwrap()) {
        if instruction.opcode.is_absolute_branch() {
            let target = instruction.operand.unwrap() as usize;
            assert!(
                starts.contains(&target),
                "{:?} at {} targets mid-instruction PC {}",
                instruction.opcode,
                instruction.pc,
                target
            );
        }
    }
}

#[test]
fn relocation_keeps_branches_inside_their_slots() {
    let a = compile_source_with_config(
        "PROGRAM A VAR x : INT; END_VAR WHILE x < 3 DO x := x + 1; END_WHILE; END_PROGRAM",
        &CodegenConfig::new().with_work_base(0x2000),
    )
    .unwrap();
    let b = compile_source_with_config(
        "PROGRAM B VAR y : INT; END_VAR IF y = 0 THEN y := 2; END_IF; END_PROGRAM",
        &CodegenConfig::new().with_work_base(0x2100),
    )
    .unwrap();

    let split = a.bytecode.len();
    let mut combined = a.bytecode.clone();
    let mut slot_b = b.bytecode.clone();
    relocate(&mut slot_b, split as u16).unwrap();
    combined.extend_from_slice(&slot_b);

    for instruction in Decoder::new(&combined).map(|i| i.unwrap()) {
        if instruction.opcode.is_absolute_branch() {
            let target = instruction.operand.unwrap() as usize;
            if instruction.pc < split {
                assert!(target < split);
            } else {
                assert!(target >= split && target < combined.len());
            }
        }
    }
}

#[test]
fn init_guard_runs_initializers_once() {
    let program = compile_source(
        "PROGRAM Guard VAR x : INT := 5; END_VAR x := x + 1; END_PROGRAM",
    )
    .unwrap();

    // _start begins by testing the flag and branching straight to _cycle.
    assert_eq!(&program.bytecode[0..3], &[0x80, 0xFF, 0x3F], "LOAD8 0x3FFF");
    assert_eq!(program.bytecode[3], u8::from(Opcode::Jnz));
    let cycle_pc = u16::from_le_bytes([program.bytecode[4], program.bytecode[5]]) as usize;

    // The flag is set to 1 immediately before _cycle.
    let set_flag = [0x40, 0x01, 0x84, 0xFF, 0x3F]; // PUSH8 1; STORE8 0x3FFF
    assert_eq!(&program.bytecode[cycle_pc - set_flag.len()..cycle_pc], &set_flag);

    // The initializer (PUSH8 5 / STORE16 0x2000) sits between guard and flag set.
    let init = [0x40, 0x05, 0x85, 0x00, 0x20];
    assert!(contains_subsequence(&program.bytecode[6..cycle_pc], &init));
}

#[test]
fn float_arithmetic_promotes_and_integer_does_not() {
    let float = compile_source(
        "PROGRAM F VAR r : REAL; i : INT; END_VAR r := r + i; END_PROGRAM",
    )
    .unwrap();
    assert!(float.bytecode.contains(&u8::from(Opcode::AddF)));
    assert!(float.bytecode.contains(&u8::from(Opcode::I2F)));

    let int = compile_source(
        "PROGRAM I VAR a : INT; b : INT; END_VAR a := a + b; END_PROGRAM",
    )
    .unwrap();
    assert!(int.bytecode.contains(&u8::from(Opcode::Add)));
    assert!(!int.bytecode.contains(&u8::from(Opcode::AddF)));
}

#[test]
fn string_equality_uses_strcmp() {
    let program = compile_source(
        "PROGRAM S VAR a : STRING := 'on'; b : STRING; flag : BOOL; END_VAR
         flag := a = b;
         END_PROGRAM",
    )
    .unwrap();
    assert!(program.bytecode.contains(&u8::from(Opcode::StrCmp)));
}

#[test]
fn string_plus_is_rejected() {
    let err = compile_source(
        "PROGRAM S VAR a : STRING; b : STRING; c : STRING; END_VAR
         c := a + b;
         END_PROGRAM",
    )
    .unwrap_err();
    assert!(err.message.contains("CONCAT"));
}

#[test]
fn exit_outside_loop_is_rejected() {
    let err = compile_source("PROGRAM E EXIT; END_PROGRAM").unwrap_err();
    assert!(err.message.contains("EXIT outside"));
}

#[test]
fn visual_models_re_enter_the_pipeline() {
    let descriptor = ProjectDescriptor::from_json(
        r#"{
            "name": "mixed", "version": "1.0",
            "tasks": [ { "name": "main", "trigger": "cyclic", "programs": ["Conveyor.ld.json"] } ]
        }"#,
    )
    .unwrap();
    let sources = vec![ProgramSource {
        name: "Conveyor.ld.json".to_string(),
        language: SourceLanguage::LadderJson,
        text: r#"{
            "name": "Conveyor",
            "variables": [
                { "name": "Start", "address": "%I0.0" },
                { "name": "Motor", "address": "%Q0.0" }
            ],
            "rungs": [
                { "contacts": [ [ { "variable": "Start" } ] ],
                  "coil": { "variable": "Motor" } }
            ]
        }"#
        .to_string(),
    }];

    let output = link_project(&descriptor, &sources).unwrap();
    assert!(!output.image.code.is_empty());
    assert_eq!(output.image.tasks.len(), 1);
}

#[test]
fn user_function_block_is_inlined_per_instance() {
    let program = compile_source(
        "FUNCTION_BLOCK Doubler
         VAR_INPUT x : INT; END_VAR
         VAR_OUTPUT y : INT; END_VAR
         y := x * 2;
         END_FUNCTION_BLOCK
         PROGRAM P
         VAR d1 : Doubler; d2 : Doubler; r : INT; END_VAR
         d1(x := 3);
         d2(x := 4);
         r := d1.y + d2.y;
         END_PROGRAM",
    )
    .unwrap();
    // Two inlined bodies mean the multiply appears twice.
    let muls = program
        .bytecode
        .iter()
        .filter(|&&b| b == u8::from(Opcode::Mul))
        .count();
    assert_eq!(muls, 2, "one inlined body per instance");
}

#[test]
fn parse_preserves_literals_exactly() {
    let unit = parse(
        "PROGRAM L VAR a : DINT := 1234567; b : REAL := 0.5; t : TIME := T#90s;
         s : STRING := 'a''b'; END_VAR END_PROGRAM",
    )
    .unwrap();
    use zplc_compiler::ast::{Expression, Initializer};
    let decls = &unit.programs[0].var_blocks[0].decls;
    let init = |i: usize| match &decls[i].init {
        Some(Initializer::Expr(e)) => e.clone(),
        other => panic!("unexpected initializer {:?}", other),
    };
    assert!(matches!(init(0), Expression::IntLit { value: 1_234_567, .. }));
    assert!(matches!(init(1), Expression::RealLit { value, .. } if value == 0.5));
    assert!(matches!(init(2), Expression::TimeLit { ms: 90_000, .. }));
    assert!(matches!(init(3), Expression::StringLit { value, .. } if value == "a'b"));
}

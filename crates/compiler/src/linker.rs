//! Multi-task linker
//!
//! Compiles every program referenced by the project's tasks against its own
//! disjoint work-memory window, concatenates the resulting bytecode,
//! relocates absolute branch targets, and packages the image with the task
//! table.
//!
//! Relocation walks a program's slot linearly, decoding instruction
//! boundaries through the operand-size table, and adds the slot's base
//! offset to every `JMP`/`JZ`/`JNZ`/`CALL` operand. `LOAD`/`STORE` operands
//! are data addresses — already biased through the per-program work base at
//! compile time — and are never touched.

use crate::assembler::assemble;
use crate::codegen::{generate, CodegenConfig};
use crate::error::Diagnostic;
use crate::frontends;
use crate::parser::parse;
use crate::project::{
    ProjectDescriptor, TriggerKind, DEFAULT_INTERVAL_MS, DEFAULT_PRIORITY, DEFAULT_STACK_SIZE,
    FREEWHEELING_INTERVAL_MS,
};
use zplc_core::image::{ContainerImage, TaskRecord, TaskType};
use zplc_core::memory::work_window_base;
use zplc_core::opcode::Opcode;

/// Source language of a program file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    StructuredText,
    LadderJson,
    FbdJson,
    SfcJson,
}

impl SourceLanguage {
    /// Classify by file name; `.il` is recognized but not compiled here.
    pub fn from_file_name(name: &str) -> Option<SourceLanguage> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".ld.json") {
            Some(SourceLanguage::LadderJson)
        } else if lower.ends_with(".fbd.json") {
            Some(SourceLanguage::FbdJson)
        } else if lower.ends_with(".sfc.json") {
            Some(SourceLanguage::SfcJson)
        } else if lower.ends_with(".st") {
            Some(SourceLanguage::StructuredText)
        } else {
            None
        }
    }
}

/// One program source handed to the linker.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    /// File name (extension optional when referenced from tasks).
    pub name: String,
    pub language: SourceLanguage,
    pub text: String,
}

/// Per-program link results, kept for listings and diagnostics.
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    pub name: String,
    /// Entry PC in the concatenated image.
    pub entry_point: u16,
    pub size: u16,
    pub assembly: String,
}

/// A fully linked project.
#[derive(Debug, Clone)]
pub struct LinkOutput {
    pub image: ContainerImage,
    pub programs: Vec<LinkedProgram>,
}

/// Strip any known extension and lowercase for tolerant matching.
fn canonical_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    for suffix in [".ld.json", ".fbd.json", ".sfc.json", ".st", ".il"] {
        if let Some(stripped) = lower.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    lower
}

pub fn link_project(
    project: &ProjectDescriptor,
    sources: &[ProgramSource],
) -> Result<LinkOutput, Diagnostic> {
    // Insertion-ordered, deduplicated set of referenced programs.
    let mut order: Vec<&ProgramSource> = Vec::new();
    for task in &project.tasks {
        for reference in &task.programs {
            let wanted = canonical_name(reference);
            let source = sources
                .iter()
                .find(|s| canonical_name(&s.name) == wanted)
                .ok_or_else(|| {
                    Diagnostic::linker(format!(
                        "task '{}' references program '{}' which is not among the sources",
                        task.name, reference
                    ))
                })?;
            if !order.iter().any(|s| canonical_name(&s.name) == wanted) {
                order.push(source);
            }
        }
    }

    // Compile each program in its own work window.
    let mut programs = Vec::new();
    let mut code = Vec::new();
    for (index, source) in order.iter().enumerate() {
        let offset = code.len() as u32;
        if offset > u16::MAX as u32 {
            return Err(Diagnostic::linker("concatenated code exceeds the 16-bit PC space".to_string()));
        }

        let st_text = match source.language {
            SourceLanguage::StructuredText => source.text.clone(),
            SourceLanguage::LadderJson => frontends::ladder_to_st(&source.text)
                .map_err(|e| e.with_context(&source.name))?,
            SourceLanguage::FbdJson => frontends::fbd_to_st(&source.text)
                .map_err(|e| e.with_context(&source.name))?,
            SourceLanguage::SfcJson => frontends::sfc_to_st(&source.text)
                .map_err(|e| e.with_context(&source.name))?,
        };

        let unit = parse(&st_text).map_err(|e| e.with_context(&source.name))?;
        let config = CodegenConfig::new().with_work_base(work_window_base(index));
        let assembly = generate(&unit, &config).map_err(|e| e.with_context(&source.name))?;
        let assembled = assemble(&assembly).map_err(|e| e.with_context(&source.name))?;

        let mut slot = assembled.bytecode;
        relocate(&mut slot, offset as u16).map_err(|e| e.with_context(&source.name))?;

        programs.push(LinkedProgram {
            name: source.name.clone(),
            entry_point: offset as u16 + assembled.entry_point,
            size: slot.len() as u16,
            assembly,
        });
        code.extend_from_slice(&slot);
    }

    // Task table: each task enters at its first program.
    let mut tasks = Vec::new();
    for (id, task) in project.tasks.iter().enumerate() {
        let first = canonical_name(&task.programs[0]);
        let entry = programs
            .iter()
            .find(|p| canonical_name(&p.name) == first)
            .map(|p| p.entry_point)
            .ok_or_else(|| Diagnostic::linker(format!("task '{}' lost its program", task.name)))?;

        // Every trigger kind shares the 10 ms interval default; only
        // freewheeling overrides it, to the runtime's minimum period.
        let (task_type, interval_ms) = match task.trigger {
            TriggerKind::Cyclic => (TaskType::Cyclic, task.interval.unwrap_or(DEFAULT_INTERVAL_MS)),
            TriggerKind::Event => (TaskType::Event, task.interval.unwrap_or(DEFAULT_INTERVAL_MS)),
            TriggerKind::Freewheeling => (TaskType::Cyclic, FREEWHEELING_INTERVAL_MS),
            TriggerKind::Init => (TaskType::Init, task.interval.unwrap_or(DEFAULT_INTERVAL_MS)),
        };

        tasks.push(TaskRecord {
            id: id as u16,
            task_type,
            priority: task.priority.unwrap_or(DEFAULT_PRIORITY),
            interval_us: interval_ms.saturating_mul(1000),
            entry_point: entry,
            stack_size: DEFAULT_STACK_SIZE,
        });
    }

    Ok(LinkOutput {
        image: ContainerImage { code, tasks },
        programs,
    })
}

/// Add `offset` to every absolute branch/call operand in `slot`.
pub fn relocate(slot: &mut [u8], offset: u16) -> Result<(), Diagnostic> {
    if offset == 0 {
        return Ok(());
    }
    let mut pc = 0usize;
    while pc < slot.len() {
        let opcode = Opcode::try_from(slot[pc]).map_err(|_| {
            Diagnostic::linker(format!("undecodable byte 0x{:02X} at PC 0x{:04X}", slot[pc], pc))
        })?;
        let size = opcode.operand_size();
        if pc + 1 + size > slot.len() {
            return Err(Diagnostic::linker(format!(
                "truncated instruction at PC 0x{:04X}",
                pc
            )));
        }
        if opcode.is_absolute_branch() {
            let target = u16::from_le_bytes([slot[pc + 1], slot[pc + 2]]);
            let patched = target.checked_add(offset).ok_or_else(|| {
                Diagnostic::linker(format!("relocated branch at PC 0x{:04X} overflows", pc))
            })?;
            slot[pc + 1..pc + 3].copy_from_slice(&patched.to_le_bytes());
        }
        pc += 1 + size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zplc_core::disasm::Decoder;

    fn descriptor(json: &str) -> ProjectDescriptor {
        ProjectDescriptor::from_json(json).unwrap()
    }

    fn st(name: &str, text: &str) -> ProgramSource {
        ProgramSource {
            name: name.to_string(),
            language: SourceLanguage::StructuredText,
            text: text.to_string(),
        }
    }

    const TWO_TASKS: &str = r#"{
        "name": "two", "version": "1.0",
        "tasks": [
            { "name": "fast", "trigger": "cyclic", "interval": 10, "programs": ["FastLogic.st"] },
            { "name": "slow", "trigger": "cyclic", "interval": 100, "programs": ["SlowLogic.st"] }
        ]
    }"#;

    fn two_programs() -> Vec<ProgramSource> {
        vec![
            st(
                "FastLogic.st",
                "PROGRAM FastLogic VAR a : INT; END_VAR a := a + 1; END_PROGRAM",
            ),
            st(
                "SlowLogic.st",
                "PROGRAM SlowLogic VAR b : INT; END_VAR IF b < 100 THEN b := b + 1; END_IF; END_PROGRAM",
            ),
        ]
    }

    #[test]
    fn test_two_task_link() {
        let output = link_project(&descriptor(TWO_TASKS), &two_programs()).unwrap();
        assert_eq!(output.programs.len(), 2);
        assert_eq!(output.programs[0].entry_point, 0);
        assert_eq!(output.programs[1].entry_point, output.programs[0].size);
        assert_eq!(
            output.image.code.len() as u16,
            output.programs[0].size + output.programs[1].size
        );

        let tasks = &output.image.tasks;
        assert_eq!(tasks[0].interval_us, 10_000);
        assert_eq!(tasks[0].entry_point, 0);
        assert_eq!(tasks[1].interval_us, 100_000);
        assert_eq!(tasks[1].entry_point, output.programs[0].size);
    }

    #[test]
    fn test_relocation_confines_branches_to_their_slot() {
        let output = link_project(&descriptor(TWO_TASKS), &two_programs()).unwrap();
        let split = output.programs[0].size as usize;
        let code = &output.image.code;
        for instruction in Decoder::new(code).map(|i| i.unwrap()) {
            if instruction.opcode.is_absolute_branch() {
                let target = instruction.operand.unwrap_or(0) as usize;
                if instruction.pc < split {
                    assert!(target < split, "branch at {} escapes slot 0", instruction.pc);
                } else {
                    assert!(
                        target >= split && target < code.len(),
                        "branch at {} escapes slot 1",
                        instruction.pc
                    );
                }
            }
        }
    }

    #[test]
    fn test_programs_use_disjoint_work_windows() {
        let output = link_project(&descriptor(TWO_TASKS), &two_programs()).unwrap();
        // slot 0 addresses work at 0x2000, slot 1 at 0x2100
        assert!(output.programs[0].assembly.contains("0x2000"));
        assert!(output.programs[1].assembly.contains("0x2100"));
        assert!(!output.programs[1].assembly.contains("0x2000"));
    }

    #[test]
    fn test_shared_program_compiles_once() {
        let json = r#"{
            "name": "shared", "version": "1.0",
            "tasks": [
                { "name": "a", "trigger": "cyclic", "programs": ["Common"] },
                { "name": "b", "trigger": "cyclic", "interval": 50, "programs": ["Common.st"] }
            ]
        }"#;
        let sources = vec![st("Common.st", "PROGRAM Common VAR x : INT; END_VAR x := 1; END_PROGRAM")];
        let output = link_project(&descriptor(json), &sources).unwrap();
        assert_eq!(output.programs.len(), 1);
        assert_eq!(output.image.tasks[0].entry_point, output.image.tasks[1].entry_point);
    }

    #[test]
    fn test_missing_program_fails() {
        let err = link_project(&descriptor(TWO_TASKS), &two_programs()[..1].to_vec()).unwrap_err();
        assert!(err.message.contains("SlowLogic"));
    }

    #[test]
    fn test_event_and_init_tasks_share_the_interval_default() {
        let json = r#"{
            "name": "triggers", "version": "1.0",
            "tasks": [
                { "name": "ev", "trigger": "event", "programs": ["FastLogic"] },
                { "name": "boot", "trigger": "init", "programs": ["SlowLogic"] },
                { "name": "ev2", "trigger": "event", "interval": 25, "programs": ["FastLogic"] }
            ]
        }"#;
        let output = link_project(&descriptor(json), &two_programs()).unwrap();
        let tasks = &output.image.tasks;
        assert_eq!(tasks[0].task_type, TaskType::Event);
        assert_eq!(tasks[0].interval_us, 10_000);
        assert_eq!(tasks[1].task_type, TaskType::Init);
        assert_eq!(tasks[1].interval_us, 10_000);
        assert_eq!(tasks[2].interval_us, 25_000);
    }

    #[test]
    fn test_freewheeling_becomes_fast_cyclic() {
        let json = r#"{
            "name": "free", "version": "1.0",
            "tasks": [ { "name": "t", "trigger": "freewheeling", "programs": ["FastLogic"] } ]
        }"#;
        let output = link_project(&descriptor(json), &two_programs()).unwrap();
        assert_eq!(output.image.tasks[0].task_type, TaskType::Cyclic);
        assert_eq!(output.image.tasks[0].interval_us, 1_000);
    }

    #[test]
    fn test_relocate_leaves_loads_alone() {
        // LOAD16 0x2000 / JMP 0x0000 / HALT
        let mut slot = vec![0x81, 0x00, 0x20, 0x90, 0x00, 0x00, 0x01];
        relocate(&mut slot, 0x100).unwrap();
        assert_eq!(&slot[..3], &[0x81, 0x00, 0x20], "data address was relocated");
        assert_eq!(&slot[3..6], &[0x90, 0x00, 0x01], "branch target was not relocated");
    }
}

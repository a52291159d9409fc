//! ZPLC Compiler Library
//!
//! Translates IEC 61131-3 programs (Structured Text plus the JSON models of
//! the visual languages) into stack-machine bytecode and multi-task
//! container images for the ZPLC runtime.
//!
//! The pipeline:
//!
//! ```text
//! source text ─lexer→ tokens ─parser→ AST ─symbols→ addresses
//!     ─codegen→ assembly text ─assembler→ bytecode + line map
//!     ─linker→ relocated image + task table → container file
//! ```
//!
//! [`compile_source`] runs a single program through lex/parse/codegen/
//! assemble; [`build_project`] drives the multi-task linker over a parsed
//! `zplc.json` descriptor and a set of program sources.

pub mod assembler;
pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod error;
pub mod frontends;
pub mod lexer;
pub mod linker;
pub mod parser;
pub mod project;
pub mod symbols;

pub use assembler::{assemble, AssembledProgram};
pub use codegen::{generate, CodegenConfig};
pub use error::{Diagnostic, Phase};
pub use lexer::tokenize;
pub use linker::{link_project, LinkOutput, LinkedProgram, ProgramSource, SourceLanguage};
pub use parser::parse;
pub use project::ProjectDescriptor;
pub use symbols::SymbolTable;

use std::fs;
use std::path::Path;
use zplc_core::image::{ContainerImage, TaskRecord, TaskType};
use zplc_core::memory::WORK_BASE;

/// One compiled program: bytecode plus its listing and line map.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub bytecode: Vec<u8>,
    pub entry_point: u16,
    pub assembly: String,
    /// `(pc, source line)` pairs ordered by PC.
    pub mappings: Vec<(u16, u32)>,
}

/// Compile a single Structured Text source, giving the program the whole
/// work region.
pub fn compile_source(source: &str) -> Result<CompiledProgram, Diagnostic> {
    compile_source_with_config(source, &CodegenConfig::new())
}

pub fn compile_source_with_config(
    source: &str,
    config: &CodegenConfig,
) -> Result<CompiledProgram, Diagnostic> {
    let unit = parse(source)?;
    let assembly = generate(&unit, config)?;
    let assembled = assemble(&assembly)?;
    Ok(CompiledProgram {
        bytecode: assembled.bytecode,
        entry_point: assembled.entry_point,
        assembly,
        mappings: assembled.mappings,
    })
}

/// Compile one source into a standalone container with a single default
/// cyclic task — the quick path for flashing a one-program board.
pub fn compile_source_to_image(source: &str) -> Result<ContainerImage, Diagnostic> {
    let program = compile_source(source)?;
    Ok(ContainerImage {
        code: program.bytecode,
        tasks: vec![TaskRecord {
            id: 0,
            task_type: TaskType::Cyclic,
            priority: project::DEFAULT_PRIORITY,
            interval_us: project::DEFAULT_INTERVAL_MS * 1000,
            entry_point: program.entry_point,
            stack_size: project::DEFAULT_STACK_SIZE,
        }],
    })
}

/// Link a parsed descriptor against in-memory sources.
pub fn build_project(
    descriptor: &ProjectDescriptor,
    sources: &[ProgramSource],
) -> Result<LinkOutput, Diagnostic> {
    link_project(descriptor, sources)
}

/// Build a project directory: reads `zplc.json` and every recognized
/// source file beside it, then links.
pub fn build_project_dir(dir: &Path) -> Result<LinkOutput, Diagnostic> {
    let descriptor_path = dir.join("zplc.json");
    let descriptor_text = fs::read_to_string(&descriptor_path).map_err(|e| {
        Diagnostic::linker(format!("cannot read {}: {}", descriptor_path.display(), e))
    })?;
    let descriptor = ProjectDescriptor::from_json(&descriptor_text)?;

    let mut sources = Vec::new();
    let entries = fs::read_dir(dir)
        .map_err(|e| Diagnostic::linker(format!("cannot read {}: {}", dir.display(), e)))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Diagnostic::linker(format!("cannot scan {}: {}", dir.display(), e)))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(language) = SourceLanguage::from_file_name(name) else {
            continue;
        };
        let text = fs::read_to_string(&path)
            .map_err(|e| Diagnostic::linker(format!("cannot read {}: {}", path.display(), e)))?;
        sources.push(ProgramSource { name: name.to_string(), language, text });
    }

    link_project(&descriptor, &sources)
}

/// The default work-memory base, re-exported for callers that present
/// memory maps.
pub const DEFAULT_WORK_BASE: u16 = WORK_BASE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_smoke() {
        let program = compile_source(
            "PROGRAM Smoke VAR x : INT; END_VAR x := x + 1; END_PROGRAM",
        )
        .unwrap();
        assert!(!program.bytecode.is_empty());
        assert_eq!(program.entry_point, 0);
        // The body is annotated for the line map.
        assert!(program.mappings.iter().any(|(_, line)| *line == 1));
    }

    #[test]
    fn test_compile_error_carries_phase() {
        let err = compile_source("PROGRAM P x := ; END_PROGRAM").unwrap_err();
        assert_eq!(err.phase, Phase::Parser);

        let err = compile_source("PROGRAM P x := 1; END_PROGRAM").unwrap_err();
        assert_eq!(err.phase, Phase::Codegen);
        assert!(err.message.contains("unknown identifier 'x'"));
    }

    #[test]
    fn test_single_source_image() {
        let image = compile_source_to_image(
            "PROGRAM P VAR x : BOOL; END_VAR x := TRUE; END_PROGRAM",
        )
        .unwrap();
        assert_eq!(image.tasks.len(), 1);
        assert_eq!(image.tasks[0].interval_us, 10_000);
        assert_eq!(image.tasks[0].entry_point, 0);
    }

    #[test]
    fn test_build_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("zplc.json"),
            r#"{
                "name": "ondisk", "version": "1.0",
                "tasks": [
                    { "name": "main", "trigger": "cyclic", "interval": 20, "programs": ["Blinky"] }
                ]
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("Blinky.st"),
            "PROGRAM Blinky VAR on : BOOL; END_VAR on := NOT on; END_PROGRAM",
        )
        .unwrap();
        // Unrecognized files beside the sources are ignored.
        fs::write(dir.path().join("notes.txt"), "not a program").unwrap();

        let output = build_project_dir(dir.path()).unwrap();
        assert_eq!(output.programs.len(), 1);
        assert_eq!(output.programs[0].name, "Blinky.st");
        assert!(!output.image.code.is_empty());
        assert_eq!(output.image.tasks[0].interval_us, 20_000);
    }

    #[test]
    fn test_build_project_dir_without_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_project_dir(dir.path()).unwrap_err();
        assert_eq!(err.phase, Phase::Linker);
        assert!(err.message.contains("zplc.json"));
    }
}

//! Project descriptor (`zplc.json`)
//!
//! Serde model of the declarative project file: metadata, target and
//! compiler options, I/O pin map, and the task list that drives the
//! multi-task link. Unknown fields are tolerated for forward
//! compatibility; defaults follow the documented descriptor semantics
//! (10 ms interval, priority 1).

use crate::error::Diagnostic;
use crate::lexer::{tokenize, TokenKind};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub target: Option<TargetConfig>,
    #[serde(default)]
    pub compiler: Option<CompilerOptions>,
    #[serde(default)]
    pub io: Option<IoConfig>,
    #[serde(default)]
    pub build: Option<BuildConfig>,
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub board: String,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub clock_mhz: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilerOptions {
    #[serde(default)]
    pub optimization: Optimization,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub warnings: Warnings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimization {
    #[default]
    None,
    Speed,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Warnings {
    None,
    #[default]
    Default,
    All,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    #[serde(default)]
    pub inputs: Vec<IoPin>,
    #[serde(default)]
    pub outputs: Vec<IoPin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoPin {
    pub name: String,
    /// `%I0.0`-style address literal.
    pub address: String,
    #[serde(default)]
    pub pin: Option<u32>,
    #[serde(rename = "type", default)]
    pub pin_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(rename = "outDir", default)]
    pub out_dir: Option<String>,
    #[serde(rename = "entryPoints", default)]
    pub entry_points: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub trigger: TriggerKind,
    /// Milliseconds; defaults to 10.
    #[serde(default)]
    pub interval: Option<u32>,
    /// Defaults to 1.
    #[serde(default)]
    pub priority: Option<u8>,
    /// Watchdog limit in milliseconds.
    #[serde(default)]
    pub watchdog: Option<u32>,
    pub programs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Cyclic,
    Event,
    Freewheeling,
    Init,
}

/// Default cyclic interval when a task omits one.
pub const DEFAULT_INTERVAL_MS: u32 = 10;
/// Interval assigned to freewheeling tasks (the runtime's minimum period).
pub const FREEWHEELING_INTERVAL_MS: u32 = 1;
/// Default task priority.
pub const DEFAULT_PRIORITY: u8 = 1;
/// Default VM stack cells per task.
pub const DEFAULT_STACK_SIZE: u16 = 64;

impl ProjectDescriptor {
    /// Parse and validate a descriptor.
    pub fn from_json(json: &str) -> Result<Self, Diagnostic> {
        let descriptor: ProjectDescriptor = serde_json::from_str(json)
            .map_err(|e| Diagnostic::linker(format!("invalid zplc.json: {}", e)))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), Diagnostic> {
        if self.name.is_empty() {
            return Err(Diagnostic::linker("project name must not be empty".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(Diagnostic::linker("project defines no tasks".to_string()));
        }
        for task in &self.tasks {
            if task.programs.is_empty() {
                return Err(Diagnostic::linker(format!("task '{}' names no programs", task.name)));
            }
        }
        if let Some(io) = &self.io {
            let mut seen = std::collections::HashSet::new();
            for pin in io.inputs.iter().chain(io.outputs.iter()) {
                if !seen.insert(pin.name.as_str()) {
                    return Err(Diagnostic::linker(format!("duplicate I/O pin '{}'", pin.name)));
                }
                validate_io_address(&pin.address)
                    .map_err(|why| Diagnostic::linker(format!("pin '{}': {}", pin.name, why)))?;
            }
        }
        Ok(())
    }
}

/// An I/O pin address must lex as a single `%` literal.
fn validate_io_address(address: &str) -> Result<(), String> {
    let tokens = tokenize(address).map_err(|e| e.message)?;
    match tokens.as_slice() {
        [first, rest] if matches!(rest.kind, TokenKind::Eof) => {
            if matches!(first.kind, TokenKind::IoLiteral(_)) {
                Ok(())
            } else {
                Err(format!("'{}' is not an I/O address", address))
            }
        }
        _ => Err(format!("'{}' is not an I/O address", address)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "name": "blink",
        "version": "1.0.0",
        "tasks": [
            { "name": "main", "trigger": "cyclic", "programs": ["Blinky.st"] }
        ]
    }"#;

    #[test]
    fn test_minimal_descriptor() {
        let descriptor = ProjectDescriptor::from_json(MINIMAL).unwrap();
        assert_eq!(descriptor.name, "blink");
        assert_eq!(descriptor.tasks.len(), 1);
        assert_eq!(descriptor.tasks[0].trigger, TriggerKind::Cyclic);
        assert_eq!(descriptor.tasks[0].interval, None);
    }

    #[test]
    fn test_full_descriptor() {
        let json = r#"{
            "name": "plant",
            "version": "2.1.0",
            "description": "two-speed control",
            "author": "line 4 team",
            "target": { "board": "zplc-m0", "clock_mhz": 48 },
            "compiler": { "optimization": "size", "debug": true, "warnings": "all" },
            "io": {
                "inputs": [ { "name": "estop", "address": "%I0.0", "type": "BOOL" } ],
                "outputs": [ { "name": "valve", "address": "%QW2", "pin": 7 } ]
            },
            "build": { "outDir": "dist" },
            "tasks": [
                { "name": "fast", "trigger": "cyclic", "interval": 10, "programs": ["Fast"] },
                { "name": "slow", "trigger": "freewheeling", "priority": 3, "programs": ["Slow"] }
            ]
        }"#;
        let descriptor = ProjectDescriptor::from_json(json).unwrap();
        assert_eq!(descriptor.target.unwrap().clock_mhz, Some(48));
        let compiler = descriptor.compiler.unwrap();
        assert_eq!(compiler.optimization, Optimization::Size);
        assert!(compiler.debug);
        assert_eq!(descriptor.tasks[1].trigger, TriggerKind::Freewheeling);
    }

    #[test]
    fn test_empty_tasks_rejected() {
        let err = ProjectDescriptor::from_json(
            r#"{ "name": "x", "version": "1", "tasks": [] }"#,
        )
        .unwrap_err();
        assert!(err.message.contains("no tasks"));
    }

    #[test]
    fn test_task_without_programs_rejected() {
        let err = ProjectDescriptor::from_json(
            r#"{ "name": "x", "version": "1", "tasks": [ { "name": "t", "trigger": "cyclic", "programs": [] } ] }"#,
        )
        .unwrap_err();
        assert!(err.message.contains("names no programs"));
    }

    #[test]
    fn test_bad_pin_address_rejected() {
        let json = r#"{
            "name": "x", "version": "1",
            "io": { "inputs": [ { "name": "a", "address": "Q0.0" } ], "outputs": [] },
            "tasks": [ { "name": "t", "trigger": "cyclic", "programs": ["p"] } ]
        }"#;
        let err = ProjectDescriptor::from_json(json).unwrap_err();
        assert!(err.message.contains("pin 'a'"));
    }

    #[test]
    fn test_duplicate_pin_rejected() {
        let json = r#"{
            "name": "x", "version": "1",
            "io": {
                "inputs": [ { "name": "a", "address": "%I0.0" } ],
                "outputs": [ { "name": "a", "address": "%Q0.0" } ]
            },
            "tasks": [ { "name": "t", "trigger": "cyclic", "programs": ["p"] } ]
        }"#;
        let err = ProjectDescriptor::from_json(json).unwrap_err();
        assert!(err.message.contains("duplicate I/O pin"));
    }
}

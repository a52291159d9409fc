//! Visual-language front-ends
//!
//! The three graphical languages are stored as JSON models and transpiled
//! to Structured Text, which then re-enters the normal pipeline. The
//! transpilers are plain tree walkers: they validate the graph (no dangling
//! connections, no undeclared variables) and print ST source; all further
//! checking happens in the ST parser and the later phases.

mod fbd;
mod ladder;
mod sfc;

pub use fbd::fbd_to_st;
pub use ladder::ladder_to_st;
pub use sfc::sfc_to_st;

use crate::error::Diagnostic;
use serde::Deserialize;
use std::fmt::Write as _;

/// A variable declared by a visual model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelVariable {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub ty: String,
    /// `%I0.0`-style binding.
    #[serde(default)]
    pub address: Option<String>,
    /// Initializer, spliced verbatim (`TRUE`, `0`, `T#500ms`, ...).
    #[serde(default)]
    pub init: Option<String>,
}

fn default_type() -> String {
    "BOOL".to_string()
}

pub(crate) fn parse_model<'a, T: Deserialize<'a>>(json: &'a str, what: &str) -> Result<T, Diagnostic> {
    serde_json::from_str(json)
        .map_err(|e| Diagnostic::linker(format!("invalid {} model: {}", what, e)))
}

/// Render declaration blocks: input-mapped variables into `VAR_INPUT`,
/// output-mapped into `VAR_OUTPUT`, everything else into `VAR`.
pub(crate) fn write_declarations(out: &mut String, variables: &[ModelVariable], extra: &[String]) {
    let is_area = |v: &ModelVariable, letter: char| {
        v.address
            .as_deref()
            .and_then(|a| a.chars().nth(1))
            .map(|c| c.eq_ignore_ascii_case(&letter))
            .unwrap_or(false)
    };

    let render = |out: &mut String, v: &ModelVariable| {
        let _ = write!(out, "    {}", v.name);
        if let Some(address) = &v.address {
            let _ = write!(out, " AT {}", address);
        }
        let _ = write!(out, " : {}", v.ty);
        if let Some(init) = &v.init {
            let _ = write!(out, " := {}", init);
        }
        let _ = writeln!(out, ";");
    };

    let inputs: Vec<&ModelVariable> = variables.iter().filter(|v| is_area(v, 'I')).collect();
    if !inputs.is_empty() {
        let _ = writeln!(out, "VAR_INPUT");
        for v in inputs {
            render(out, v);
        }
        let _ = writeln!(out, "END_VAR");
    }

    let outputs: Vec<&ModelVariable> = variables.iter().filter(|v| is_area(v, 'Q')).collect();
    if !outputs.is_empty() {
        let _ = writeln!(out, "VAR_OUTPUT");
        for v in outputs {
            render(out, v);
        }
        let _ = writeln!(out, "END_VAR");
    }

    let plain: Vec<&ModelVariable> = variables
        .iter()
        .filter(|v| !is_area(v, 'I') && !is_area(v, 'Q'))
        .collect();
    if !plain.is_empty() || !extra.is_empty() {
        let _ = writeln!(out, "VAR");
        for v in plain {
            render(out, v);
        }
        for line in extra {
            let _ = writeln!(out, "    {}", line);
        }
        let _ = writeln!(out, "END_VAR");
    }
}

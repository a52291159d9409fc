//! Ladder Diagram transpiler
//!
//! A ladder model is a list of rungs. Each rung is a series of contact
//! groups (the contacts inside a group are wired in parallel) feeding one
//! coil:
//!
//! ```json
//! {
//!   "name": "Conveyor",
//!   "variables": [
//!     { "name": "Start", "address": "%I0.0" },
//!     { "name": "Stop",  "address": "%I0.1" },
//!     { "name": "Motor", "address": "%Q0.0" }
//!   ],
//!   "rungs": [
//!     {
//!       "contacts": [ [ { "variable": "Start" }, { "variable": "Motor" } ],
//!                     [ { "variable": "Stop", "negated": true } ] ],
//!       "coil": { "variable": "Motor" }
//!     }
//!   ]
//! }
//! ```
//!
//! transpiles to `Motor := (Start OR Motor) AND (NOT Stop);` — the classic
//! seal-in rung.

use super::{parse_model, write_declarations, ModelVariable};
use crate::error::Diagnostic;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;

#[derive(Debug, Deserialize)]
struct LadderModel {
    name: String,
    #[serde(default)]
    variables: Vec<ModelVariable>,
    rungs: Vec<Rung>,
}

#[derive(Debug, Deserialize)]
struct Rung {
    /// Series of parallel groups.
    contacts: Vec<Vec<Contact>>,
    coil: Coil,
}

#[derive(Debug, Deserialize)]
struct Contact {
    variable: String,
    #[serde(default)]
    negated: bool,
}

#[derive(Debug, Deserialize)]
struct Coil {
    variable: String,
    #[serde(default)]
    mode: CoilMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CoilMode {
    #[default]
    Normal,
    Negated,
    Set,
    Reset,
}

pub fn ladder_to_st(json: &str) -> Result<String, Diagnostic> {
    let model: LadderModel = parse_model(json, "ladder")?;
    let declared: HashSet<&str> = model.variables.iter().map(|v| v.name.as_str()).collect();

    let check = |name: &str, rung: usize| -> Result<(), Diagnostic> {
        if declared.contains(name) {
            Ok(())
        } else {
            Err(Diagnostic::linker(format!(
                "rung {}: variable '{}' is not declared in the model",
                rung + 1,
                name
            )))
        }
    };

    let mut out = String::new();
    let _ = writeln!(out, "PROGRAM {}", model.name);
    write_declarations(&mut out, &model.variables, &[]);

    for (index, rung) in model.rungs.iter().enumerate() {
        if rung.contacts.iter().any(|group| group.is_empty()) {
            return Err(Diagnostic::linker(format!(
                "rung {}: a parallel group has no contacts",
                index + 1
            )));
        }
        check(&rung.coil.variable, index)?;

        let mut condition = String::new();
        if rung.contacts.is_empty() {
            condition.push_str("TRUE");
        }
        for (i, group) in rung.contacts.iter().enumerate() {
            if i > 0 {
                condition.push_str(" AND ");
            }
            let parenthesize = rung.contacts.len() > 1 && (group.len() > 1 || group[0].negated);
            if parenthesize {
                condition.push('(');
            }
            for (j, contact) in group.iter().enumerate() {
                check(&contact.variable, index)?;
                if j > 0 {
                    condition.push_str(" OR ");
                }
                if contact.negated {
                    condition.push_str("NOT ");
                }
                condition.push_str(&contact.variable);
            }
            if parenthesize {
                condition.push(')');
            }
        }

        match rung.coil.mode {
            CoilMode::Normal => {
                let _ = writeln!(out, "{} := {};", rung.coil.variable, condition);
            }
            CoilMode::Negated => {
                let _ = writeln!(out, "{} := NOT ({});", rung.coil.variable, condition);
            }
            CoilMode::Set => {
                let _ = writeln!(
                    out,
                    "IF {} THEN {} := TRUE; END_IF;",
                    condition, rung.coil.variable
                );
            }
            CoilMode::Reset => {
                let _ = writeln!(
                    out,
                    "IF {} THEN {} := FALSE; END_IF;",
                    condition, rung.coil.variable
                );
            }
        }
    }

    let _ = writeln!(out, "END_PROGRAM");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const SEAL_IN: &str = r#"{
        "name": "Conveyor",
        "variables": [
            { "name": "Start", "address": "%I0.0" },
            { "name": "Stop",  "address": "%I0.1" },
            { "name": "Motor", "address": "%Q0.0" }
        ],
        "rungs": [
            {
                "contacts": [ [ { "variable": "Start" }, { "variable": "Motor" } ],
                              [ { "variable": "Stop", "negated": true } ] ],
                "coil": { "variable": "Motor" }
            }
        ]
    }"#;

    #[test]
    fn test_seal_in_rung() {
        let st = ladder_to_st(SEAL_IN).unwrap();
        assert!(st.contains("Motor := (Start OR Motor) AND (NOT Stop);"), "{}", st);
        // the output feeds straight back into the pipeline
        assert!(parse(&st).is_ok(), "{}", st);
    }

    #[test]
    fn test_set_reset_coils() {
        let json = r#"{
            "name": "Latch",
            "variables": [
                { "name": "On",  "address": "%I0.0" },
                { "name": "Off", "address": "%I0.1" },
                { "name": "Out", "address": "%Q0.0" }
            ],
            "rungs": [
                { "contacts": [ [ { "variable": "On" } ] ],
                  "coil": { "variable": "Out", "mode": "set" } },
                { "contacts": [ [ { "variable": "Off" } ] ],
                  "coil": { "variable": "Out", "mode": "reset" } }
            ]
        }"#;
        let st = ladder_to_st(json).unwrap();
        assert!(st.contains("IF On THEN Out := TRUE; END_IF;"));
        assert!(st.contains("IF Off THEN Out := FALSE; END_IF;"));
        assert!(parse(&st).is_ok());
    }

    #[test]
    fn test_undeclared_variable_is_error() {
        let json = r#"{
            "name": "Bad",
            "variables": [ { "name": "A", "address": "%I0.0" } ],
            "rungs": [
                { "contacts": [ [ { "variable": "Ghost" } ] ],
                  "coil": { "variable": "A" } }
            ]
        }"#;
        let err = ladder_to_st(json).unwrap_err();
        assert!(err.message.contains("Ghost"));
    }

    #[test]
    fn test_empty_rung_is_always_true() {
        let json = r#"{
            "name": "Always",
            "variables": [ { "name": "Out", "address": "%Q0.0" } ],
            "rungs": [ { "contacts": [], "coil": { "variable": "Out" } } ]
        }"#;
        let st = ladder_to_st(json).unwrap();
        assert!(st.contains("Out := TRUE;"));
    }
}

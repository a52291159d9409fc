//! Sequential Function Chart transpiler
//!
//! Steps become BOOL flags, transitions become guarded flag handovers, and
//! actions run while their step is active. A step with `minTime` (ms) holds
//! its outgoing transitions until that long after activation, using
//! `UPTIME()` stamps:
//!
//! ```text
//! IF step_Fill AND (LevelHigh) AND UPTIME() - step_Fill_since >= T#500ms THEN
//!     step_Fill := FALSE;
//!     step_Drain := TRUE;
//!     step_Drain_since := UPTIME();
//! END_IF;
//! ```
//!
//! Transitions are evaluated before actions, all in model order, so one
//! scan takes at most one transition per branch.

use super::{parse_model, write_declarations, ModelVariable};
use crate::error::Diagnostic;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;

#[derive(Debug, Deserialize)]
struct SfcModel {
    name: String,
    #[serde(default)]
    variables: Vec<ModelVariable>,
    steps: Vec<Step>,
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Step {
    name: String,
    #[serde(default)]
    initial: bool,
    /// ST statements executed while the step is active.
    #[serde(default)]
    actions: Vec<String>,
    /// Minimum active time in milliseconds before transitions may fire.
    #[serde(rename = "minTime", default)]
    min_time: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    from: String,
    to: String,
    /// ST boolean expression.
    condition: String,
}

pub fn sfc_to_st(json: &str) -> Result<String, Diagnostic> {
    let model: SfcModel = parse_model(json, "SFC")?;

    if model.steps.is_empty() {
        return Err(Diagnostic::linker("SFC model has no steps".to_string()));
    }
    let initial_count = model.steps.iter().filter(|s| s.initial).count();
    if initial_count != 1 {
        return Err(Diagnostic::linker(format!(
            "SFC model needs exactly one initial step, found {}",
            initial_count
        )));
    }
    let step_names: HashSet<&str> = model.steps.iter().map(|s| s.name.as_str()).collect();
    if step_names.len() != model.steps.len() {
        return Err(Diagnostic::linker("duplicate step names in the SFC model".to_string()));
    }
    for transition in &model.transitions {
        for end in [&transition.from, &transition.to] {
            if !step_names.contains(end.as_str()) {
                return Err(Diagnostic::linker(format!(
                    "transition references unknown step '{}'",
                    end
                )));
            }
        }
    }

    // Step flags and activation stamps.
    let mut extra = Vec::new();
    let timed: HashSet<&str> = model
        .steps
        .iter()
        .filter(|s| s.min_time.is_some())
        .map(|s| s.name.as_str())
        .collect();
    for step in &model.steps {
        extra.push(format!(
            "step_{} : BOOL := {};",
            step.name,
            if step.initial { "TRUE" } else { "FALSE" }
        ));
        if timed.contains(step.name.as_str()) {
            extra.push(format!("step_{}_since : TIME := T#0ms;", step.name));
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "PROGRAM {}", model.name);
    write_declarations(&mut out, &model.variables, &extra);

    for transition in &model.transitions {
        let mut guard = format!("step_{} AND ({})", transition.from, transition.condition);
        if let Some(min_time) = model
            .steps
            .iter()
            .find(|s| s.name == transition.from)
            .and_then(|s| s.min_time)
        {
            let _ = write!(
                guard,
                " AND UPTIME() - step_{}_since >= T#{}ms",
                transition.from, min_time
            );
        }
        let _ = writeln!(out, "IF {} THEN", guard);
        let _ = writeln!(out, "    step_{} := FALSE;", transition.from);
        let _ = writeln!(out, "    step_{} := TRUE;", transition.to);
        if timed.contains(transition.to.as_str()) {
            let _ = writeln!(out, "    step_{}_since := UPTIME();", transition.to);
        }
        let _ = writeln!(out, "END_IF;");
    }

    for step in &model.steps {
        if step.actions.is_empty() {
            continue;
        }
        let _ = writeln!(out, "IF step_{} THEN", step.name);
        for action in &step.actions {
            let _ = writeln!(out, "    {}", action);
        }
        let _ = writeln!(out, "END_IF;");
    }

    let _ = writeln!(out, "END_PROGRAM");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const TANK: &str = r#"{
        "name": "Tank",
        "variables": [
            { "name": "LevelHigh", "address": "%I0.0" },
            { "name": "LevelLow",  "address": "%I0.1" },
            { "name": "FillValve",  "address": "%Q0.0" },
            { "name": "DrainValve", "address": "%Q0.1" }
        ],
        "steps": [
            { "name": "Fill",  "initial": true,
              "actions": ["FillValve := TRUE;", "DrainValve := FALSE;"],
              "minTime": 500 },
            { "name": "Drain",
              "actions": ["FillValve := FALSE;", "DrainValve := TRUE;"] }
        ],
        "transitions": [
            { "from": "Fill",  "to": "Drain", "condition": "LevelHigh" },
            { "from": "Drain", "to": "Fill",  "condition": "NOT LevelLow" }
        ]
    }"#;

    #[test]
    fn test_tank_chart() {
        let st = sfc_to_st(TANK).unwrap();
        assert!(st.contains("step_Fill : BOOL := TRUE;"), "{}", st);
        assert!(st.contains("step_Drain : BOOL := FALSE;"), "{}", st);
        // the timed step guards its transition
        assert!(
            st.contains("UPTIME() - step_Fill_since >= T#500ms"),
            "{}",
            st
        );
        // actions run under the step flag
        assert!(st.contains("IF step_Drain THEN"), "{}", st);
        assert!(parse(&st).is_ok(), "{}", st);
    }

    #[test]
    fn test_unknown_step_in_transition() {
        let json = r#"{
            "name": "Bad",
            "steps": [ { "name": "A", "initial": true } ],
            "transitions": [ { "from": "A", "to": "Ghost", "condition": "TRUE" } ]
        }"#;
        let err = sfc_to_st(json).unwrap_err();
        assert!(err.message.contains("Ghost"));
    }

    #[test]
    fn test_exactly_one_initial_step() {
        let none = r#"{ "name": "X", "steps": [ { "name": "A" } ] }"#;
        assert!(sfc_to_st(none).is_err());
        let two = r#"{ "name": "X", "steps": [
            { "name": "A", "initial": true }, { "name": "B", "initial": true } ] }"#;
        assert!(sfc_to_st(two).is_err());
    }
}

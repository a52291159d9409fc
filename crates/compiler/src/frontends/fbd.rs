//! Function Block Diagram transpiler
//!
//! An FBD model is a graph of blocks with typed ports. Operator blocks
//! (AND, ADD, GT, ...) become temporaries assigned in dependency order;
//! function-block blocks (TON, CTU, ...) become instance declarations plus
//! named-parameter invocations; OUTPUT blocks write a declared variable.
//!
//! A connection is one of:
//!
//! - `{ "var": "Start" }` — read a declared variable
//! - `{ "const": "T#500ms" }` — a literal, spliced verbatim
//! - `{ "block": "t1", "port": "Q" }` — another block's output
//!
//! Any reference to a missing block or variable, a missing required input,
//! or a cycle in the graph is a transpile error.

use super::{parse_model, write_declarations, ModelVariable};
use crate::builtins::builtin_fb;
use crate::error::Diagnostic;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

#[derive(Debug, Deserialize)]
struct FbdModel {
    name: String,
    #[serde(default)]
    variables: Vec<ModelVariable>,
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    id: String,
    #[serde(rename = "type")]
    block_type: String,
    /// Instance name for function-block types.
    #[serde(default)]
    instance: Option<String>,
    /// Destination variable for OUTPUT terminals.
    #[serde(default)]
    variable: Option<String>,
    /// Result type of an operator block.
    #[serde(rename = "dataType", default = "default_data_type")]
    data_type: String,
    #[serde(default)]
    inputs: BTreeMap<String, Connection>,
}

fn default_data_type() -> String {
    "BOOL".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Connection {
    Variable { var: String },
    Constant { r#const: String },
    Port { block: String, port: String },
}

/// Operator metadata: ST infix symbol or prefix form.
fn operator(block_type: &str) -> Option<(&'static str, bool)> {
    let symbol = match block_type.to_ascii_uppercase().as_str() {
        "AND" => "AND",
        "OR" => "OR",
        "XOR" => "XOR",
        "ADD" => "+",
        "SUB" => "-",
        "MUL" => "*",
        "DIV" => "/",
        "MOD" => "MOD",
        "GT" => ">",
        "GE" => ">=",
        "LT" => "<",
        "LE" => "<=",
        "EQ" => "=",
        "NE" => "<>",
        "NOT" => return Some(("NOT", true)),
        "MOVE" => return Some(("", true)),
        _ => return None,
    };
    Some((symbol, false))
}

pub fn fbd_to_st(json: &str) -> Result<String, Diagnostic> {
    let model: FbdModel = parse_model(json, "FBD")?;
    let declared: HashSet<&str> = model.variables.iter().map(|v| v.name.as_str()).collect();
    let by_id: HashMap<&str, &Block> = model.blocks.iter().map(|b| (b.id.as_str(), b)).collect();

    // Dependency edges: a block waits for every block feeding its inputs.
    let mut order: Vec<&Block> = Vec::new();
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut pending: Vec<&Block> = model.blocks.iter().collect();
    while !pending.is_empty() {
        let mut progressed = false;
        pending.retain(|block| {
            let ready = block.inputs.values().all(|c| match c {
                Connection::Port { block: source, .. } => resolved.contains(source.as_str()),
                _ => true,
            });
            if ready {
                resolved.insert(block.id.as_str());
                order.push(*block);
                progressed = true;
                false
            } else {
                true
            }
        });
        if !progressed {
            let stuck: Vec<&str> = pending.iter().map(|b| b.id.as_str()).collect();
            return Err(Diagnostic::linker(format!(
                "FBD graph has a cycle or dangling connection through {:?}",
                stuck
            )));
        }
    }

    // Render a connection as an ST expression.
    let render = |connection: &Connection| -> Result<String, Diagnostic> {
        match connection {
            Connection::Variable { var } => {
                if !declared.contains(var.as_str()) {
                    return Err(Diagnostic::linker(format!(
                        "connection reads undeclared variable '{}'",
                        var
                    )));
                }
                Ok(var.clone())
            }
            Connection::Constant { r#const } => Ok(r#const.clone()),
            Connection::Port { block, port } => {
                let source = by_id.get(block.as_str()).ok_or_else(|| {
                    Diagnostic::linker(format!("connection references missing block '{}'", block))
                })?;
                if builtin_fb(&source.block_type).is_some() {
                    let instance = source.instance.as_deref().ok_or_else(|| {
                        Diagnostic::linker(format!("block '{}' needs an instance name", source.id))
                    })?;
                    Ok(format!("{}.{}", instance, port))
                } else {
                    Ok(format!("_{}", source.id))
                }
            }
        }
    };

    // Declarations: model variables, instances, operator temporaries.
    let mut extra = Vec::new();
    for block in &model.blocks {
        if let Some(fb) = builtin_fb(&block.block_type) {
            let instance = block.instance.as_deref().ok_or_else(|| {
                Diagnostic::linker(format!("block '{}' needs an instance name", block.id))
            })?;
            extra.push(format!("{} : {};", instance, fb.name));
        } else if operator(&block.block_type).is_some() {
            extra.push(format!("_{} : {};", block.id, block.data_type));
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "PROGRAM {}", model.name);
    write_declarations(&mut out, &model.variables, &extra);

    for block in order {
        if let Some(_fb) = builtin_fb(&block.block_type) {
            let instance = block.instance.as_deref().expect("validated above");
            let mut parameters = Vec::new();
            for (port, connection) in &block.inputs {
                parameters.push(format!("{} := {}", port, render(connection)?));
            }
            let _ = writeln!(out, "{}({});", instance, parameters.join(", "));
        } else if let Some((symbol, prefix)) = operator(&block.block_type) {
            let inputs: Vec<String> = block
                .inputs
                .values()
                .map(|connection| render(connection))
                .collect::<Result<_, _>>()?;
            if inputs.is_empty() {
                return Err(Diagnostic::linker(format!(
                    "block '{}' has no inputs connected",
                    block.id
                )));
            }
            let expression = if prefix {
                if symbol.is_empty() {
                    inputs[0].clone()
                } else {
                    format!("{} {}", symbol, inputs[0])
                }
            } else {
                inputs.join(&format!(" {} ", symbol))
            };
            let _ = writeln!(out, "_{} := {};", block.id, expression);
        } else if block.block_type.eq_ignore_ascii_case("OUTPUT") {
            let variable = block.variable.as_deref().ok_or_else(|| {
                Diagnostic::linker(format!("OUTPUT block '{}' names no variable", block.id))
            })?;
            if !declared.contains(variable) {
                return Err(Diagnostic::linker(format!(
                    "OUTPUT block '{}' writes undeclared variable '{}'",
                    block.id, variable
                )));
            }
            let connection = block.inputs.values().next().ok_or_else(|| {
                Diagnostic::linker(format!("OUTPUT block '{}' has no input", block.id))
            })?;
            let _ = writeln!(out, "{} := {};", variable, render(connection)?);
        } else {
            return Err(Diagnostic::linker(format!(
                "unknown FBD block type '{}'",
                block.block_type
            )));
        }
    }

    let _ = writeln!(out, "END_PROGRAM");
    Ok(out)
}

//! Code generation
//!
//! Lowers a typed compilation unit to textual stack-machine assembly. The
//! emission sequence is fixed:
//!
//! 1. build the symbol table at the configured work base
//! 2. walk the unit once to collect string literals into the pool (placed
//!    after the last work-memory variable) and to detect which generated
//!    scratch slots the program needs
//! 3. emit a memory-map comment header
//! 4. emit user-function bodies (`func_<name>` + prologue/epilogue)
//! 5. emit `_start`: the init-flag guard, variable and string-pool
//!    initializers, then fall through to `_cycle`
//! 6. emit `_cycle`: the program body, terminated by `HALT`
//!
//! Statement and expression lowering live in `statements.rs` and
//! `expressions.rs`; the built-in function-block and function emitters in
//! `blocks.rs` and `functions.rs`.

mod blocks;
mod expressions;
mod functions;
mod statements;

use crate::ast::*;
use crate::builtins::{builtin_function, FunctionKind};
use crate::error::Diagnostic;
use crate::symbols::SymbolTable;
use std::fmt::Write as _;
use zplc_core::memory::align_to;

/// Code-generator configuration.
#[derive(Debug, Clone, Default)]
pub struct CodegenConfig {
    /// Work-memory window base; `None` gives the program the whole region.
    pub work_base: Option<u16>,
    /// Emit `; @source N` annotations for the line↔PC map.
    pub emit_source_annotations: bool,
}

impl CodegenConfig {
    pub fn new() -> Self {
        CodegenConfig { work_base: None, emit_source_annotations: true }
    }

    pub fn with_work_base(mut self, base: u16) -> Self {
        self.work_base = Some(base);
        self
    }
}

/// Generate assembly for a compilation unit.
pub fn generate(unit: &CompilationUnit, config: &CodegenConfig) -> Result<String, Diagnostic> {
    let symbols = SymbolTable::build(unit, config.work_base)?;
    let mut generator = CodeGen::new(unit, symbols, config.emit_source_annotations);
    generator.run()?;
    Ok(generator.out)
}

/// Loop labels for EXIT and CONTINUE.
struct LoopContext {
    continue_label: String,
    exit_label: String,
}

/// Scratch slots for the emitted string routines.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scratch {
    /// Result buffer of string-producing functions.
    pub tmp: u16,
    /// Source-record address cells and loop indices.
    pub a: u16,
    pub b: u16,
    pub i: u16,
    pub j: u16,
}

pub(crate) struct CodeGen<'a> {
    unit: &'a CompilationUnit,
    pub(crate) symbols: SymbolTable,
    out: String,
    label_counter: u32,
    loop_stack: Vec<LoopContext>,
    /// Deduplicated `(value, address)` pairs in collection order.
    string_pool: Vec<(String, u16)>,
    scratch: Option<Scratch>,
    /// Cycle-start slot, present only when CYCLE_TIME is used.
    cycle_slot: Option<u16>,
    /// Name of the user function being emitted (its scope and epilogue).
    pub(crate) current_function: Option<String>,
    /// Base address and type name of the user-FB instance being inlined.
    pub(crate) current_instance: Option<(u16, String)>,
    emit_annotations: bool,
    last_annotated_line: u32,
}

impl<'a> CodeGen<'a> {
    fn new(unit: &'a CompilationUnit, symbols: SymbolTable, emit_annotations: bool) -> Self {
        CodeGen {
            unit,
            symbols,
            out: String::new(),
            label_counter: 0,
            loop_stack: Vec::new(),
            string_pool: Vec::new(),
            scratch: None,
            cycle_slot: None,
            current_function: None,
            current_instance: None,
            emit_annotations,
            last_annotated_line: 0,
        }
    }

    fn run(&mut self) -> Result<(), Diagnostic> {
        let program = self
            .unit
            .programs
            .first()
            .ok_or_else(|| Diagnostic::codegen(0, "compilation unit contains no PROGRAM".to_string()))?
            .clone();

        self.plan_pool_and_scratch()?;
        self.emit_memory_map(&program);

        let functions = self.unit.functions.clone();
        for function in &functions {
            self.emit_user_function(function)?;
        }

        self.emit_start(&program)?;

        self.comment("");
        self.label("_cycle");
        if self.cycle_slot.is_some() {
            self.op("GET_TICKS");
            let slot = self.cycle_slot.expect("checked above");
            self.store(32, slot);
        }
        let body = program.body.clone();
        self.emit_statements(&body)?;
        self.op("HALT");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Planning pass: string pool and scratch slots
    // ------------------------------------------------------------------

    fn plan_pool_and_scratch(&mut self) -> Result<(), Diagnostic> {
        let mut literals: Vec<String> = Vec::new();
        let mut needs_scratch = false;
        let mut needs_cycle_slot = false;

        {
            let mut on_expr = |expr: &Expression| {
                match expr {
                    Expression::StringLit { value, .. } => {
                        if !literals.iter().any(|l| l == value) {
                            literals.push(value.clone());
                        }
                    }
                    // Zero-argument calls parse as FbCall, so match both.
                    Expression::Call { name, .. } | Expression::FbCall { name, .. } => {
                        if let Some(function) = builtin_function(name) {
                            match function.kind {
                                FunctionKind::Concat
                                | FunctionKind::Left
                                | FunctionKind::Right
                                | FunctionKind::Mid
                                | FunctionKind::Find
                                | FunctionKind::Insert
                                | FunctionKind::Delete
                                | FunctionKind::Replace => needs_scratch = true,
                                FunctionKind::CycleTime => needs_cycle_slot = true,
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            };

            walk_unit(self.unit, &mut on_expr);
        }

        // The pool starts right after the last allocated variable.
        let mut cursor = align_to(self.symbols.work_end(), 2);
        for value in literals {
            let address = cursor;
            cursor += 4 + value.len() as u16 + 1;
            self.string_pool.push((value, address));
        }

        if needs_scratch {
            cursor = align_to(cursor, 2);
            let tmp = cursor;
            cursor += STRING_SIZE;
            cursor = align_to(cursor, 2);
            let scratch = Scratch {
                tmp,
                a: cursor,
                b: cursor + 2,
                i: cursor + 4,
                j: cursor + 6,
            };
            cursor += 8;
            self.scratch = Some(scratch);
        }

        if needs_cycle_slot {
            cursor = align_to(cursor, 4);
            self.cycle_slot = Some(cursor);
            cursor += 4;
        }

        if cursor > self.symbols.init_flag {
            return Err(Diagnostic::codegen(
                0,
                format!(
                    "work memory overflow: string pool ends at 0x{:04X} but the window ends at 0x{:04X}",
                    cursor, self.symbols.init_flag
                ),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Header and program frame
    // ------------------------------------------------------------------

    fn emit_memory_map(&mut self, program: &Program) {
        self.comment("=======================================");
        let title = format!("program {}", program.name);
        self.comment(&title);
        self.comment("=======================================");
        let flag = format!("_initialized      0x{:04X}", self.symbols.init_flag);
        self.comment(&flag);
        let lines: Vec<String> = self
            .symbols
            .symbols()
            .iter()
            .map(|s| format!("{:<17} 0x{:04X} ({} bytes)", s.name, s.address, s.size))
            .collect();
        for line in lines {
            self.comment(&line);
        }
        let pool_lines: Vec<String> = self
            .string_pool
            .iter()
            .map(|(value, address)| format!("'{}'{:<12} 0x{:04X}", value, "", address))
            .collect();
        for line in pool_lines {
            self.comment(&line);
        }
        if let Some(scratch) = self.scratch {
            let line = format!("_strtmp           0x{:04X}", scratch.tmp);
            self.comment(&line);
        }
        if let Some(slot) = self.cycle_slot {
            let line = format!("_cycle_start      0x{:04X}", slot);
            self.comment(&line);
        }
        self.comment("");
    }

    fn emit_start(&mut self, program: &Program) -> Result<(), Diagnostic> {
        self.label("_start");
        self.load(8, self.symbols.init_flag);
        self.op_arg("JNZ", "_cycle");

        // Variable initializers run exactly once.
        let blocks = program.var_blocks.clone();
        let globals = self.unit.globals.clone();
        for block in globals.iter().chain(blocks.iter()) {
            for decl in &block.decls {
                self.emit_var_initializer(decl)?;
            }
        }

        self.emit_pool_initializers();

        if let Some(scratch) = self.scratch {
            // The scratch buffer's capacity header.
            self.push_int(0);
            self.store(16, scratch.tmp);
            self.push_int(STRING_CAPACITY as i64);
            self.store(16, scratch.tmp + 2);
        }

        self.push_int(1);
        self.store(8, self.symbols.init_flag);
        Ok(())
    }

    fn emit_var_initializer(&mut self, decl: &VarDecl) -> Result<(), Diagnostic> {
        // String variables always need their record header written.
        if decl.ty.is_string() {
            let symbol = self
                .symbols
                .lookup_scoped(None, &decl.name)
                .ok_or_else(|| Diagnostic::codegen(decl.line, format!("unknown identifier '{}'", decl.name)))?;
            let address = symbol.address;
            self.annotate(decl.line);
            self.push_int(0);
            self.store(16, address);
            self.push_int(STRING_CAPACITY as i64);
            self.store(16, address + 2);
            if let Some(Initializer::Expr(Expression::StringLit { value, .. })) = &decl.init {
                let pool = self.pool_address(value, decl.line)?;
                self.push_u16(pool);
                self.push_u16(address);
                self.op("STRCPY");
            }
            return Ok(());
        }

        let Some(init) = decl.init.clone() else {
            return Ok(());
        };
        let symbol = self
            .symbols
            .lookup_scoped(None, &decl.name)
            .ok_or_else(|| Diagnostic::codegen(decl.line, format!("unknown identifier '{}'", decl.name)))?
            .clone();

        self.annotate(decl.line);
        match init {
            Initializer::Expr(expr) => {
                let suffix = self.symbols.suffix_for(&symbol.ty, decl.line)?;
                self.emit_expression_as(&expr, &symbol.ty)?;
                self.store(suffix, symbol.address);
            }
            Initializer::Array(elements) => {
                let DataType::Array { dims, element } = &symbol.ty else {
                    return Err(Diagnostic::codegen(
                        decl.line,
                        format!("'{}' is not an array but has an array initializer", decl.name),
                    ));
                };
                let count = DataType::array_len(dims);
                if elements.len() as i64 != count {
                    return Err(Diagnostic::codegen(
                        decl.line,
                        format!(
                            "array initializer for '{}' has {} elements, expected {}",
                            decl.name,
                            elements.len(),
                            count
                        ),
                    ));
                }
                let element_size = self.symbols.size_of(element, decl.line)?;
                let suffix = self.symbols.suffix_for(element, decl.line)?;
                let element_ty = element.as_ref().clone();
                for (i, expr) in elements.iter().enumerate() {
                    self.emit_expression_as(expr, &element_ty)?;
                    self.store(suffix, symbol.address + i as u16 * element_size);
                }
            }
        }
        Ok(())
    }

    fn emit_pool_initializers(&mut self) {
        let pool = self.string_pool.clone();
        for (value, address) in pool {
            self.push_int(value.len() as i64);
            self.store(16, address);
            self.push_int(value.len() as i64);
            self.store(16, address + 2);
            for (i, byte) in value.bytes().enumerate() {
                self.push_int(byte as i64);
                self.store(8, address + 4 + i as u16);
            }
            self.push_int(0);
            self.store(8, address + 4 + value.len() as u16);
        }
    }

    fn emit_user_function(&mut self, function: &UserFunction) -> Result<(), Diagnostic> {
        self.comment("");
        let header = format!("function {}", function.name);
        self.comment(&header);
        self.label(&format!("func_{}", function.name));
        self.current_function = Some(function.name.clone());

        // Arguments arrive on the stack in call order; popping stores them
        // in reverse.
        let scope = self
            .symbols
            .function_scope(&function.name)
            .ok_or_else(|| {
                Diagnostic::codegen(function.line, format!("unknown function '{}'", function.name))
            })?;
        let params: Vec<String> = scope.params.clone();
        for param in params.iter().rev() {
            let symbol = self
                .symbols
                .lookup_scoped(Some(&function.name), param)
                .ok_or_else(|| {
                    Diagnostic::codegen(function.line, format!("unknown parameter '{}'", param))
                })?
                .clone();
            let suffix = self.symbols.suffix_for(&symbol.ty, function.line)?;
            self.store(suffix, symbol.address);
        }

        self.emit_statements(&function.body)?;

        self.label(&format!("func_{}_end", function.name));
        let result = self
            .symbols
            .lookup_scoped(Some(&function.name), &function.name)
            .ok_or_else(|| {
                Diagnostic::codegen(function.line, format!("missing result slot for '{}'", function.name))
            })?
            .clone();
        let suffix = self.symbols.suffix_for(&result.ty, function.line)?;
        self.load(suffix, result.address);
        self.op("RET");
        self.current_function = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Emission primitives
    // ------------------------------------------------------------------

    pub(crate) fn op(&mut self, mnemonic: &str) {
        let _ = writeln!(self.out, "    {}", mnemonic);
    }

    pub(crate) fn op_arg(&mut self, mnemonic: &str, operand: impl std::fmt::Display) {
        let _ = writeln!(self.out, "    {} {}", mnemonic, operand);
    }

    pub(crate) fn label(&mut self, name: &str) {
        let _ = writeln!(self.out, "{}:", name);
    }

    pub(crate) fn comment(&mut self, text: &str) {
        if text.is_empty() {
            let _ = writeln!(self.out, ";");
        } else {
            let _ = writeln!(self.out, "; {}", text);
        }
    }

    /// Mint a unique label. The counter is never reset within a unit.
    pub(crate) fn new_label(&mut self, prefix: &str) -> String {
        let label = format!("{}_{}", prefix, self.label_counter);
        self.label_counter += 1;
        label
    }

    pub(crate) fn annotate(&mut self, line: u32) {
        if self.emit_annotations && line != 0 && line != self.last_annotated_line {
            let _ = writeln!(self.out, "    ; @source {}", line);
            self.last_annotated_line = line;
        }
    }

    /// Push an integer with the smallest encoding that holds it.
    pub(crate) fn push_int(&mut self, value: i64) {
        if (0..=0xFF).contains(&value) {
            self.op_arg("PUSH8", value);
        } else if (0..=0xFFFF).contains(&value) {
            self.op_arg("PUSH16", value);
        } else {
            self.op_arg("PUSH32", value as i32 as u32);
        }
    }

    /// Push a 16-bit data address.
    pub(crate) fn push_u16(&mut self, address: u16) {
        self.op_arg("PUSH16", format!("0x{:04X}", address));
    }

    /// Push a single-precision float as its IEEE-754 bit pattern.
    pub(crate) fn push_f32(&mut self, value: f32) {
        self.op_arg("PUSH32", value.to_bits());
    }

    pub(crate) fn load(&mut self, suffix: u16, address: u16) {
        self.op_arg(&format!("LOAD{}", suffix), format!("0x{:04X}", address));
    }

    pub(crate) fn store(&mut self, suffix: u16, address: u16) {
        self.op_arg(&format!("STORE{}", suffix), format!("0x{:04X}", address));
    }

    pub(crate) fn pool_address(&self, value: &str, line: u32) -> Result<u16, Diagnostic> {
        self.string_pool
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, address)| *address)
            .ok_or_else(|| Diagnostic::codegen(line, "string literal missing from the pool".to_string()))
    }

    pub(crate) fn scratch(&self, line: u32) -> Result<Scratch, Diagnostic> {
        self.scratch.ok_or_else(|| {
            Diagnostic::codegen(line, "string scratch area was not planned".to_string())
        })
    }

    pub(crate) fn cycle_slot(&self, line: u32) -> Result<u16, Diagnostic> {
        self.cycle_slot.ok_or_else(|| {
            Diagnostic::codegen(line, "cycle-start slot was not planned".to_string())
        })
    }

    pub(crate) fn push_loop(&mut self, continue_label: String, exit_label: String) {
        self.loop_stack.push(LoopContext { continue_label, exit_label });
    }

    pub(crate) fn pop_loop(&mut self) {
        self.loop_stack.pop();
    }

    pub(crate) fn loop_continue_label(&self) -> Option<String> {
        self.loop_stack.last().map(|c| c.continue_label.clone())
    }

    pub(crate) fn loop_exit_label(&self) -> Option<String> {
        self.loop_stack.last().map(|c| c.exit_label.clone())
    }

    /// LOAD/STORE suffix for a member of `size` bytes.
    pub(crate) fn suffix_for_size(size: u16) -> u16 {
        match size {
            1 => 8,
            2 => 16,
            4 => 32,
            _ => 64,
        }
    }

    /// Resolve `name` as an FB instance: a member of the user-FB instance
    /// being inlined first, then a unit-scope symbol of composite type.
    pub(crate) fn resolve_instance(&self, name: &str) -> Option<(u16, String)> {
        if let Some((base, type_name)) = &self.current_instance {
            if let Some(info) = self.symbols.member_of(type_name, name) {
                if let DataType::Named(inner) = &info.ty {
                    return Some((base + info.offset, inner.clone()));
                }
            }
        }
        let symbol = self
            .symbols
            .lookup_scoped(self.current_function.as_deref(), name)?;
        match &symbol.ty {
            DataType::Named(type_name) => Some((symbol.address, type_name.clone())),
            _ => None,
        }
    }

    /// Resolve a load/store target expression to `(address, type)`,
    /// honouring the user-FB inlining context for bare identifiers.
    pub(crate) fn resolve_target(&self, expr: &Expression) -> Result<(u16, DataType), Diagnostic> {
        if let Expression::Ident { name, line } = expr {
            if let Some((base, type_name)) = &self.current_instance {
                if let Some(info) = self.symbols.member_of(type_name, name) {
                    return Ok((base + info.offset, info.ty));
                }
            }
            let symbol = self
                .symbols
                .lookup_scoped(self.current_function.as_deref(), name)
                .ok_or_else(|| Diagnostic::codegen(*line, format!("unknown identifier '{}'", name)))?;
            return Ok((symbol.address, symbol.ty.clone()));
        }
        if let Expression::Member { object, member, line } = expr {
            let (base, object_ty) = self.resolve_target(object)?;
            let type_name = match &object_ty {
                DataType::Named(n) => n.clone(),
                _ => {
                    return Err(Diagnostic::codegen(*line, "only composite values have members".to_string()));
                }
            };
            let info = self
                .symbols
                .member_of(&type_name, member)
                .ok_or_else(|| {
                    Diagnostic::codegen(*line, format!("'{}' has no member '{}'", type_name, member))
                })?;
            return Ok((base + info.offset, info.ty));
        }
        Err(Diagnostic::codegen(expr.line(), "expected a variable or member path".to_string()))
    }
}

/// Apply `on_expr` to every expression in the unit, including initializers
/// and the bodies of functions and function blocks.
fn walk_unit(unit: &CompilationUnit, on_expr: &mut impl FnMut(&Expression)) {
    for block in &unit.globals {
        walk_block(block, on_expr);
    }
    for function in &unit.functions {
        for block in &function.var_blocks {
            walk_block(block, on_expr);
        }
        walk_statements(&function.body, on_expr);
    }
    for fb in &unit.function_blocks {
        for block in &fb.var_blocks {
            walk_block(block, on_expr);
        }
        walk_statements(&fb.body, on_expr);
    }
    for program in &unit.programs {
        for block in &program.var_blocks {
            walk_block(block, on_expr);
        }
        walk_statements(&program.body, on_expr);
    }
}

fn walk_block(block: &VarBlock, on_expr: &mut impl FnMut(&Expression)) {
    for decl in &block.decls {
        match &decl.init {
            Some(Initializer::Expr(e)) => walk_expression(e, on_expr),
            Some(Initializer::Array(elements)) => {
                for e in elements {
                    walk_expression(e, on_expr);
                }
            }
            None => {}
        }
    }
}

fn walk_statements(statements: &[Statement], on_expr: &mut impl FnMut(&Expression)) {
    for statement in statements {
        match statement {
            Statement::Assign { target, value, .. } => {
                walk_expression(target, on_expr);
                walk_expression(value, on_expr);
            }
            Statement::If { cond, then_body, elsifs, else_body, .. } => {
                walk_expression(cond, on_expr);
                walk_statements(then_body, on_expr);
                for (c, body) in elsifs {
                    walk_expression(c, on_expr);
                    walk_statements(body, on_expr);
                }
                if let Some(body) = else_body {
                    walk_statements(body, on_expr);
                }
            }
            Statement::While { cond, body, .. } => {
                walk_expression(cond, on_expr);
                walk_statements(body, on_expr);
            }
            Statement::For { start, end, step, body, .. } => {
                walk_expression(start, on_expr);
                walk_expression(end, on_expr);
                if let Some(step) = step {
                    walk_expression(step, on_expr);
                }
                walk_statements(body, on_expr);
            }
            Statement::Repeat { body, until, .. } => {
                walk_statements(body, on_expr);
                walk_expression(until, on_expr);
            }
            Statement::Case { selector, branches, else_body, .. } => {
                walk_expression(selector, on_expr);
                for branch in branches {
                    walk_statements(&branch.body, on_expr);
                }
                if let Some(body) = else_body {
                    walk_statements(body, on_expr);
                }
            }
            Statement::FbCall { name, args, line } => {
                if args.is_empty() {
                    // Could be a zero-argument function statement.
                    on_expr(&Expression::Call {
                        name: name.clone(),
                        args: Vec::new(),
                        line: *line,
                    });
                }
                for (_, e) in args {
                    walk_expression(e, on_expr);
                }
            }
            Statement::FunctionCall { name, args, line } => {
                // Surface the call itself so feature detection sees
                // statement-position invocations too.
                on_expr(&Expression::Call {
                    name: name.clone(),
                    args: Vec::new(),
                    line: *line,
                });
                for e in args {
                    walk_expression(e, on_expr);
                }
            }
            Statement::Exit { .. } | Statement::Continue { .. } | Statement::Return { .. } => {}
        }
    }
}

fn walk_expression(expr: &Expression, on_expr: &mut impl FnMut(&Expression)) {
    on_expr(expr);
    match expr {
        Expression::Member { object, .. } => walk_expression(object, on_expr),
        Expression::Index { array, indices, .. } => {
            walk_expression(array, on_expr);
            for e in indices {
                walk_expression(e, on_expr);
            }
        }
        Expression::Unary { operand, .. } => walk_expression(operand, on_expr),
        Expression::Binary { lhs, rhs, .. } => {
            walk_expression(lhs, on_expr);
            walk_expression(rhs, on_expr);
        }
        Expression::Call { args, .. } => {
            for e in args {
                walk_expression(e, on_expr);
            }
        }
        Expression::FbCall { args, .. } => {
            for (_, e) in args {
                walk_expression(e, on_expr);
            }
        }
        Expression::ArrayLit { elements, .. } => {
            for e in elements {
                walk_expression(e, on_expr);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn asm(source: &str) -> String {
        let unit = parse(source).unwrap_or_else(|e| panic!("parse: {}", e));
        generate(&unit, &CodegenConfig::new()).unwrap_or_else(|e| panic!("codegen: {}", e))
    }

    #[test]
    fn test_init_guard_shape() {
        let text = asm("PROGRAM P VAR x : INT := 7; END_VAR x := x + 1; END_PROGRAM");
        let start = text.find("_start:").expect("has _start");
        let cycle = text.find("_cycle:").expect("has _cycle");
        assert!(start < cycle);
        // guard loads the flag and skips initializers when set
        let guard = &text[start..cycle];
        assert!(guard.contains("LOAD8 0x3FFF"));
        assert!(guard.contains("JNZ _cycle"));
        // flag is set after the initializers
        assert!(guard.contains("STORE8 0x3FFF"));
        // body ends the cycle
        assert!(text.trim_end().ends_with("HALT"));
    }

    #[test]
    fn test_initializer_stores_value() {
        let text = asm("PROGRAM P VAR x : INT := 7; END_VAR END_PROGRAM");
        assert!(text.contains("PUSH8 7"));
        assert!(text.contains("STORE16 0x2000"));
    }

    #[test]
    fn test_string_pool_record() {
        let text = asm("PROGRAM P VAR s : STRING := 'hi'; END_VAR s := 'hi'; END_PROGRAM");
        // pool entry right after the 85-byte variable: 0x2000 + 85 = 0x2055,
        // aligned to 2 -> 0x2056
        assert!(text.contains("STORE16 0x2056"), "{}", text);
        // the variable header is written: len 0, cap 80
        assert!(text.contains("PUSH8 80"));
    }

    #[test]
    fn test_custom_work_base_moves_the_flag() {
        let unit = parse("PROGRAM P VAR x : BOOL; END_VAR x := TRUE; END_PROGRAM").unwrap();
        let text = generate(&unit, &CodegenConfig::new().with_work_base(0x2100)).unwrap();
        assert!(text.contains("LOAD8 0x21FF"));
        assert!(text.contains("STORE8 0x2100"));
    }

    #[test]
    fn test_user_function_frame() {
        let text = asm(
            "FUNCTION Add2 : INT\n\
             VAR_INPUT a : INT; b : INT; END_VAR\n\
             Add2 := a + b;\n\
             END_FUNCTION\n\
             PROGRAM P VAR r : INT; END_VAR r := Add2(1, 2); END_PROGRAM",
        );
        let func = text.find("func_Add2:").expect("function label");
        let end = text.find("func_Add2_end:").expect("epilogue label");
        assert!(func < end);
        // prologue pops b then a
        let prologue = &text[func..end];
        let store_b = prologue.find("STORE16").expect("stores params");
        assert!(store_b < prologue.len());
        assert!(text[end..].contains("RET"));
        // call site pushes args then calls
        assert!(text.contains("CALL func_Add2"));
    }

    #[test]
    fn test_no_program_is_an_error() {
        let unit = parse("FUNCTION F : INT F := 1; END_FUNCTION").unwrap();
        let err = generate(&unit, &CodegenConfig::new()).unwrap_err();
        assert!(err.message.contains("no PROGRAM"));
    }
}

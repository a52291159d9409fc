//! Statement lowering
//!
//! Control flow lowers to conditional branches over unique labels; EXIT and
//! CONTINUE resolve against the innermost entry of the loop-context stack.

use super::CodeGen;
use crate::ast::*;
use crate::builtins::{builtin_fb, builtin_function, RetType};
use crate::error::Diagnostic;

impl CodeGen<'_> {
    pub(crate) fn emit_statements(&mut self, statements: &[Statement]) -> Result<(), Diagnostic> {
        for statement in statements {
            self.emit_statement(statement)?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, statement: &Statement) -> Result<(), Diagnostic> {
        self.annotate(statement.line());
        match statement {
            Statement::Assign { target, value, line } => self.emit_assign(target, value, *line),
            Statement::If { cond, then_body, elsifs, else_body, .. } => {
                self.emit_if(cond, then_body, elsifs, else_body.as_deref())
            }
            Statement::While { cond, body, .. } => self.emit_while(cond, body),
            Statement::For { counter, start, end, step, body, line } => {
                self.emit_for(counter, start, end, step.as_ref(), body, *line)
            }
            Statement::Repeat { body, until, .. } => self.emit_repeat(body, until),
            Statement::Case { selector, branches, else_body, line } => {
                self.emit_case(selector, branches, else_body.as_deref(), *line)
            }
            Statement::Exit { line } => {
                let Some(label) = self.loop_exit_label() else {
                    return Err(Diagnostic::codegen(*line, "EXIT outside of a loop".to_string()));
                };
                self.op_arg("JMP", label);
                Ok(())
            }
            Statement::Continue { line } => {
                let Some(label) = self.loop_continue_label() else {
                    return Err(Diagnostic::codegen(*line, "CONTINUE outside of a loop".to_string()));
                };
                self.op_arg("JMP", label);
                Ok(())
            }
            Statement::Return { .. } => {
                // In a user function, RETURN branches to the epilogue; in the
                // program body it ends the scan cycle.
                match self.current_function.clone() {
                    Some(name) => self.op_arg("JMP", format!("func_{}_end", name)),
                    None => self.op("HALT"),
                }
                Ok(())
            }
            Statement::FbCall { name, args, line } => self.emit_fb_call(name, args, *line),
            Statement::FunctionCall { name, args, line } => {
                self.emit_function_call_statement(name, args, *line)
            }
        }
    }

    fn emit_assign(
        &mut self,
        target: &Expression,
        value: &Expression,
        line: u32,
    ) -> Result<(), Diagnostic> {
        // Array element target: address computation, then the value, then an
        // indirect store.
        if let Expression::Index { array, indices, line } = target {
            let (element_ty, element_size) = self.emit_element_address(array, indices, *line)?;
            let suffix = self.indirect_suffix(element_size, *line)?;
            self.emit_expression_as(value, &element_ty)?;
            self.op(&format!("STOREI{}", suffix));
            return Ok(());
        }

        let (address, target_ty) = self.resolve_target(target)?;

        if target_ty.is_string() {
            // Strings travel by address: copy the source record.
            let value_ty = self.infer_type(value)?;
            if !value_ty.is_string() {
                return Err(Diagnostic::codegen(line, "a STRING can only be assigned a string".to_string()));
            }
            self.emit_expression(value)?;
            self.push_u16(address);
            self.op("STRCPY");
            return Ok(());
        }

        let suffix = match &target_ty {
            DataType::Elementary(e) => e.load_suffix(),
            _ => {
                return Err(Diagnostic::codegen(line, "composite values cannot be assigned directly".to_string()));
            }
        };
        self.emit_expression_as(value, &target_ty)?;
        self.store(suffix, address);
        Ok(())
    }

    fn emit_if(
        &mut self,
        cond: &Expression,
        then_body: &[Statement],
        elsifs: &[(Expression, Vec<Statement>)],
        else_body: Option<&[Statement]>,
    ) -> Result<(), Diagnostic> {
        let end = self.new_label("end_if");

        let mut next = self.new_label("else_if");
        self.emit_expression(cond)?;
        self.op_arg("JZ", &next);
        self.emit_statements(then_body)?;
        self.op_arg("JMP", &end);

        for (elsif_cond, elsif_body) in elsifs {
            self.label(&next);
            next = self.new_label("else_if");
            self.emit_expression(elsif_cond)?;
            self.op_arg("JZ", &next);
            self.emit_statements(elsif_body)?;
            self.op_arg("JMP", &end);
        }

        self.label(&next);
        if let Some(body) = else_body {
            self.emit_statements(body)?;
        }
        self.label(&end);
        Ok(())
    }

    fn emit_while(&mut self, cond: &Expression, body: &[Statement]) -> Result<(), Diagnostic> {
        let top = self.new_label("while");
        let end = self.new_label("end_while");

        self.label(&top);
        self.emit_expression(cond)?;
        self.op_arg("JZ", &end);

        self.push_loop(top.clone(), end.clone());
        self.emit_statements(body)?;
        self.pop_loop();

        self.op_arg("JMP", &top);
        self.label(&end);
        Ok(())
    }

    fn emit_for(
        &mut self,
        counter: &str,
        start: &Expression,
        end: &Expression,
        step: Option<&Expression>,
        body: &[Statement],
        line: u32,
    ) -> Result<(), Diagnostic> {
        let counter_expr = Expression::Ident { name: counter.to_string(), line };
        let (address, counter_ty) = self.resolve_target(&counter_expr)?;
        let suffix = match &counter_ty {
            DataType::Elementary(e) if !e.is_real() => e.load_suffix(),
            _ => {
                return Err(Diagnostic::codegen(line, format!("FOR counter '{}' must be an integer", counter)));
            }
        };

        let top = self.new_label("for_loop");
        let continue_label = self.new_label("for_continue");
        let end_label = self.new_label("end_for");

        self.emit_expression_as(start, &counter_ty)?;
        self.store(suffix, address);

        self.label(&top);
        self.load(suffix, address);
        self.emit_expression_as(end, &counter_ty)?;
        self.op("GT");
        self.op_arg("JNZ", &end_label);

        self.push_loop(continue_label.clone(), end_label.clone());
        self.emit_statements(body)?;
        self.pop_loop();

        self.label(&continue_label);
        self.load(suffix, address);
        match step {
            Some(step) => self.emit_expression_as(step, &counter_ty)?,
            None => self.push_int(1),
        }
        self.op("ADD");
        self.store(suffix, address);
        self.op_arg("JMP", &top);
        self.label(&end_label);
        Ok(())
    }

    fn emit_repeat(&mut self, body: &[Statement], until: &Expression) -> Result<(), Diagnostic> {
        let top = self.new_label("repeat");
        let continue_label = self.new_label("repeat_continue");
        let end = self.new_label("end_repeat");

        self.label(&top);
        self.push_loop(continue_label.clone(), end.clone());
        self.emit_statements(body)?;
        self.pop_loop();

        self.label(&continue_label);
        self.emit_expression(until)?;
        self.op_arg("JZ", &top);
        self.label(&end);
        Ok(())
    }

    fn emit_case(
        &mut self,
        selector: &Expression,
        branches: &[CaseBranch],
        else_body: Option<&[Statement]>,
        _line: u32,
    ) -> Result<(), Diagnostic> {
        let end = self.new_label("end_case");
        let else_label = self.new_label("case_else");

        self.emit_expression(selector)?;

        let branch_labels: Vec<String> = branches
            .iter()
            .map(|_| self.new_label("case_branch"))
            .collect();

        // The selector stays on the stack through the dispatch chain; every
        // test duplicates it first.
        for (branch, label) in branches.iter().zip(&branch_labels) {
            for case_label in &branch.labels {
                match case_label {
                    CaseLabel::Value(v) => {
                        self.op("DUP");
                        self.push_int(*v);
                        self.op("EQ");
                        self.op_arg("JNZ", label);
                    }
                    CaseLabel::Range(lo, hi) => {
                        self.op("DUP");
                        self.push_int(*lo);
                        self.op("GE");
                        self.op("OVER");
                        self.push_int(*hi);
                        self.op("LE");
                        self.op("AND");
                        self.op_arg("JNZ", label);
                    }
                }
            }
        }
        self.op_arg("JMP", &else_label);

        for (branch, label) in branches.iter().zip(&branch_labels) {
            self.label(label);
            self.op("DROP");
            self.emit_statements(&branch.body)?;
            self.op_arg("JMP", &end);
        }

        self.label(&else_label);
        self.op("DROP");
        if let Some(body) = else_body {
            self.emit_statements(body)?;
        }
        self.label(&end);
        Ok(())
    }

    /// An FB call statement: a built-in instance dispatches to its emitter, a
    /// user-FB instance stores the named parameters and inlines the body.
    fn emit_fb_call(
        &mut self,
        name: &str,
        args: &[(String, Expression)],
        line: u32,
    ) -> Result<(), Diagnostic> {
        let Some((base, type_name)) = self.resolve_instance(name) else {
            // Not an instance: an empty-parens function call parses as an FB
            // call, so fall back to the function path.
            if args.is_empty() {
                return self.emit_function_call_statement(name, &[], line);
            }
            return Err(Diagnostic::codegen(line, format!("unknown function block instance '{}'", name)));
        };

        if let Some(fb) = builtin_fb(&type_name) {
            return self.emit_builtin_fb(fb, base, args, line);
        }

        let Some(def) = self.symbols.user_fb_def(&type_name).cloned() else {
            return Err(Diagnostic::codegen(line, format!("unknown function block type '{}'", type_name)));
        };

        // Store the named parameters into the instance.
        for (param, value) in args {
            let Some(info) = def.member(param).cloned() else {
                return Err(Diagnostic::codegen(
                    line,
                    format!("'{}' has no parameter '{}'", type_name, param),
                ));
            };
            if info.ty.is_string() {
                self.emit_expression(value)?;
                self.push_u16(base + info.offset);
                self.op("STRCPY");
            } else {
                let suffix = Self::suffix_for_size(info.size);
                self.emit_expression_as(value, &info.ty)?;
                self.store(suffix, base + info.offset);
            }
        }

        // Inline the body against the instance base. Bare identifiers inside
        // resolve against the instance's members first.
        let body = self
            .unit_fb_body(&type_name)
            .ok_or_else(|| Diagnostic::codegen(line, format!("missing body for '{}'", type_name)))?;
        let saved = self.current_instance.replace((base, type_name));
        let result = self.emit_statements(&body);
        self.current_instance = saved;
        result
    }

    fn unit_fb_body(&self, type_name: &str) -> Option<Vec<Statement>> {
        self.unit
            .function_blocks
            .iter()
            .find(|fb| fb.name == type_name)
            .map(|fb| fb.body.clone())
    }

    fn emit_function_call_statement(
        &mut self,
        name: &str,
        args: &[Expression],
        line: u32,
    ) -> Result<(), Diagnostic> {
        if let Some(function) = builtin_function(name) {
            self.emit_builtin_function(function, args, line)?;
            if function.returns != RetType::None {
                self.op("DROP");
            }
            return Ok(());
        }
        if self.symbols.function_scope(name).is_some() {
            let call = Expression::Call {
                name: name.to_string(),
                args: args.to_vec(),
                line,
            };
            self.emit_expression(&call)?;
            self.op("DROP");
            return Ok(());
        }
        Err(Diagnostic::codegen(line, format!("unknown function '{}'", name)))
    }
}

//! Expression lowering and type inference
//!
//! Values are evaluated onto the VM stack. Integer literals pick the
//! smallest PUSH encoding; real and time literals are always `PUSH32`
//! (IEEE-754 bits and milliseconds respectively); strings evaluate to the
//! address of their record. Binary arithmetic selects the `F`-suffixed
//! opcode family when either operand is REAL, promoting the other side
//! through `I2F`.

use super::CodeGen;
use crate::ast::*;
use crate::builtins::{builtin_function, RetType};
use crate::error::Diagnostic;

impl CodeGen<'_> {
    pub(crate) fn emit_expression(&mut self, expr: &Expression) -> Result<(), Diagnostic> {
        match expr {
            Expression::BoolLit { value, .. } => {
                self.push_int(if *value { 1 } else { 0 });
                Ok(())
            }
            Expression::IntLit { value, .. } => {
                self.push_int(*value);
                Ok(())
            }
            Expression::RealLit { value, .. } => {
                self.push_f32(*value as f32);
                Ok(())
            }
            Expression::TimeLit { ms, .. } => {
                self.op_arg("PUSH32", *ms);
                Ok(())
            }
            Expression::StringLit { value, line } => {
                let address = self.pool_address(value, *line)?;
                self.push_u16(address);
                Ok(())
            }
            Expression::Ident { .. } | Expression::Member { .. } => {
                let (address, ty) = self.resolve_target(expr)?;
                match &ty {
                    DataType::Elementary(ElementaryType::Str) => {
                        self.push_u16(address);
                        Ok(())
                    }
                    DataType::Elementary(e) => {
                        self.load(e.load_suffix(), address);
                        Ok(())
                    }
                    _ => Err(Diagnostic::codegen(
                        expr.line(),
                        "a composite value cannot be used in an expression".to_string(),
                    )),
                }
            }
            Expression::Index { array, indices, line } => {
                let (_, element_size) = self.emit_element_address(array, indices, *line)?;
                let suffix = self.indirect_suffix(element_size, *line)?;
                self.op(&format!("LOADI{}", suffix));
                Ok(())
            }
            Expression::Unary { op, operand, .. } => {
                match op {
                    UnaryOp::Not => {
                        self.emit_expression(operand)?;
                        // Mask to 0/1 after the bitwise NOT.
                        self.op("NOT");
                        self.push_int(1);
                        self.op("AND");
                    }
                    UnaryOp::Neg => {
                        self.emit_expression(operand)?;
                        if self.infer_type(operand)?.is_real() {
                            self.op("NEGF");
                        } else {
                            self.op("NEG");
                        }
                    }
                }
                Ok(())
            }
            Expression::Binary { op, lhs, rhs, line } => self.emit_binary(*op, lhs, rhs, *line),
            Expression::Call { name, args, line } => self.emit_call(name, args, *line),
            Expression::FbCall { name, args, line } => {
                // Empty parens parse as an FB call; in expression position
                // this can only be a zero-argument function.
                if args.is_empty() {
                    self.emit_call(name, &[], *line)
                } else {
                    Err(Diagnostic::codegen(
                        *line,
                        format!("function block '{}' cannot be called inside an expression", name),
                    ))
                }
            }
            Expression::ArrayLit { line, .. } => Err(Diagnostic::codegen(
                *line,
                "array literals are only valid as initializers".to_string(),
            )),
        }
    }

    /// Evaluate `expr` and convert the result to `target` if the numeric
    /// families differ.
    pub(crate) fn emit_expression_as(
        &mut self,
        expr: &Expression,
        target: &DataType,
    ) -> Result<(), Diagnostic> {
        self.emit_expression(expr)?;
        let value_ty = self.infer_type(expr)?;
        if target.is_real() && !value_ty.is_real() && !value_ty.is_string() {
            self.op("I2F");
        } else if !target.is_real() && !target.is_string() && value_ty.is_real() {
            self.op("F2I");
        }
        Ok(())
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
        line: u32,
    ) -> Result<(), Diagnostic> {
        let lhs_ty = self.infer_type(lhs)?;
        let rhs_ty = self.infer_type(rhs)?;
        let strings = lhs_ty.is_string() || rhs_ty.is_string();

        if strings {
            if !(lhs_ty.is_string() && rhs_ty.is_string()) {
                return Err(Diagnostic::codegen(line, "cannot mix strings and numbers".to_string()));
            }
            return match op {
                BinaryOp::Eq | BinaryOp::Ne => {
                    self.emit_expression(lhs)?;
                    self.emit_expression(rhs)?;
                    self.op("STRCMP");
                    self.push_int(0);
                    self.op(if op == BinaryOp::Eq { "EQ" } else { "NE" });
                    Ok(())
                }
                BinaryOp::Add => Err(Diagnostic::codegen(
                    line,
                    "'+' is not defined for strings; use CONCAT".to_string(),
                )),
                _ => Err(Diagnostic::codegen(
                    line,
                    "only = and <> are defined for strings".to_string(),
                )),
            };
        }

        let float = lhs_ty.is_real() || rhs_ty.is_real();

        if op.is_logical() {
            self.emit_expression(lhs)?;
            self.emit_expression(rhs)?;
            self.op(match op {
                BinaryOp::And => "AND",
                BinaryOp::Or => "OR",
                _ => "XOR",
            });
            return Ok(());
        }

        if op == BinaryOp::Mod && float {
            return Err(Diagnostic::codegen(line, "MOD is not defined for REAL operands".to_string()));
        }

        self.emit_expression(lhs)?;
        if float && !lhs_ty.is_real() {
            self.op("I2F");
        }
        self.emit_expression(rhs)?;
        if float && !rhs_ty.is_real() {
            self.op("I2F");
        }

        let mnemonic = match (op, float) {
            (BinaryOp::Add, false) => "ADD",
            (BinaryOp::Add, true) => "ADDF",
            (BinaryOp::Sub, false) => "SUB",
            (BinaryOp::Sub, true) => "SUBF",
            (BinaryOp::Mul, false) => "MUL",
            (BinaryOp::Mul, true) => "MULF",
            (BinaryOp::Div, false) => "DIV",
            (BinaryOp::Div, true) => "DIVF",
            (BinaryOp::Mod, _) => "MOD",
            (BinaryOp::Eq, _) => "EQ",
            (BinaryOp::Ne, _) => "NE",
            (BinaryOp::Lt, _) => "LT",
            (BinaryOp::Le, _) => "LE",
            (BinaryOp::Gt, _) => "GT",
            (BinaryOp::Ge, _) => "GE",
            (BinaryOp::And | BinaryOp::Or | BinaryOp::Xor, _) => unreachable!("handled above"),
        };
        self.op(mnemonic);
        Ok(())
    }

    fn emit_call(&mut self, name: &str, args: &[Expression], line: u32) -> Result<(), Diagnostic> {
        if let Some(function) = builtin_function(name) {
            if !function.arity.accepts(args.len()) {
                return Err(Diagnostic::codegen(
                    line,
                    format!("'{}' does not take {} arguments", function.name, args.len()),
                ));
            }
            if function.returns == RetType::None {
                return Err(Diagnostic::codegen(
                    line,
                    format!("'{}' has no value and cannot be used in an expression", function.name),
                ));
            }
            return self.emit_builtin_function(function, args, line);
        }

        let Some(scope) = self.symbols.function_scope(name) else {
            return Err(Diagnostic::codegen(line, format!("unknown function '{}'", name)));
        };
        let params = scope.params.clone();
        if params.len() != args.len() {
            return Err(Diagnostic::codegen(
                line,
                format!("'{}' takes {} arguments, got {}", name, params.len(), args.len()),
            ));
        }
        for (param, arg) in params.iter().zip(args) {
            let param_ty = self
                .symbols
                .lookup_scoped(Some(name), param)
                .map(|s| s.ty.clone())
                .ok_or_else(|| Diagnostic::codegen(line, format!("unknown parameter '{}'", param)))?;
            self.emit_expression_as(arg, &param_ty)?;
        }
        self.op_arg("CALL", format!("func_{}", name));
        Ok(())
    }

    /// Leave the absolute byte address of an array element on the stack.
    /// Returns the element type and size.
    pub(crate) fn emit_element_address(
        &mut self,
        array: &Expression,
        indices: &[Expression],
        line: u32,
    ) -> Result<(DataType, u16), Diagnostic> {
        let (base, array_ty) = self.resolve_target(array)?;
        let DataType::Array { dims, element } = &array_ty else {
            return Err(Diagnostic::codegen(line, "indexed access needs an array".to_string()));
        };
        if indices.len() != dims.len() {
            return Err(Diagnostic::codegen(
                line,
                format!("array has {} dimensions, got {} indices", dims.len(), indices.len()),
            ));
        }

        let element_ty = element.as_ref().clone();
        let element_size = self.symbols.size_of(&element_ty, line)?;

        // Row-major linearisation: sum of (index - lo) * stride, where the
        // stride of a dimension is the element count of the dimensions
        // after it.
        let dims = dims.clone();
        let mut strides = vec![1i64; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            let (lo, hi) = dims[i + 1];
            strides[i] = strides[i + 1] * (hi - lo + 1);
        }

        for (i, index) in indices.iter().enumerate() {
            self.emit_expression(index)?;
            let (lo, _) = dims[i];
            if lo != 0 {
                self.push_int(lo);
                self.op("SUB");
            }
            if strides[i] != 1 {
                self.push_int(strides[i]);
                self.op("MUL");
            }
            if i > 0 {
                self.op("ADD");
            }
        }
        if element_size != 1 {
            self.push_int(element_size as i64);
            self.op("MUL");
        }
        self.push_u16(base);
        self.op("ADD");
        Ok((element_ty, element_size))
    }

    /// Width suffix for indirect element access. The ISA has no 64-bit
    /// indirect load/store.
    pub(crate) fn indirect_suffix(&self, element_size: u16, line: u32) -> Result<u16, Diagnostic> {
        match element_size {
            1 => Ok(8),
            2 => Ok(16),
            4 => Ok(32),
            _ => Err(Diagnostic::codegen(
                line,
                "arrays of 64-bit elements cannot be accessed indirectly".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Type inference
    // ------------------------------------------------------------------

    pub(crate) fn infer_type(&self, expr: &Expression) -> Result<DataType, Diagnostic> {
        match expr {
            Expression::BoolLit { .. } => Ok(DataType::BOOL),
            Expression::IntLit { .. } => Ok(DataType::DINT),
            Expression::RealLit { .. } => Ok(DataType::REAL),
            Expression::TimeLit { .. } => Ok(DataType::TIME),
            Expression::StringLit { .. } => Ok(DataType::STRING),
            Expression::Ident { .. } | Expression::Member { .. } => {
                let (_, ty) = self.resolve_target(expr)?;
                Ok(ty)
            }
            Expression::Index { array, line, .. } => {
                let (_, array_ty) = self.resolve_target(array)?;
                match array_ty {
                    DataType::Array { element, .. } => Ok(*element),
                    _ => Err(Diagnostic::codegen(*line, "indexed access needs an array".to_string())),
                }
            }
            Expression::Unary { op, operand, .. } => match op {
                UnaryOp::Not => Ok(DataType::BOOL),
                UnaryOp::Neg => self.infer_type(operand),
            },
            Expression::Binary { op, lhs, rhs, .. } => {
                if op.is_comparison() {
                    return Ok(DataType::BOOL);
                }
                let lhs_ty = self.infer_type(lhs)?;
                let rhs_ty = self.infer_type(rhs)?;
                if op.is_logical() {
                    return Ok(if lhs_ty == DataType::BOOL && rhs_ty == DataType::BOOL {
                        DataType::BOOL
                    } else {
                        DataType::DINT
                    });
                }
                if lhs_ty.is_real() || rhs_ty.is_real() {
                    Ok(DataType::REAL)
                } else if lhs_ty == DataType::TIME || rhs_ty == DataType::TIME {
                    Ok(DataType::TIME)
                } else {
                    Ok(DataType::DINT)
                }
            }
            Expression::Call { name, args, line } => self.infer_call_type(name, args, *line),
            Expression::FbCall { name, args, line } => {
                if args.is_empty() {
                    self.infer_call_type(name, &[], *line)
                } else {
                    Err(Diagnostic::codegen(
                        *line,
                        format!("function block '{}' has no value", name),
                    ))
                }
            }
            Expression::ArrayLit { line, .. } => Err(Diagnostic::codegen(
                *line,
                "array literals are only valid as initializers".to_string(),
            )),
        }
    }

    fn infer_call_type(
        &self,
        name: &str,
        args: &[Expression],
        line: u32,
    ) -> Result<DataType, Diagnostic> {
        if let Some(function) = builtin_function(name) {
            return match function.returns {
                RetType::Bool => Ok(DataType::BOOL),
                RetType::Int => Ok(DataType::INT),
                RetType::DInt => Ok(DataType::DINT),
                RetType::Real => Ok(DataType::REAL),
                RetType::Time => Ok(DataType::TIME),
                RetType::Str => Ok(DataType::STRING),
                RetType::SameAsArg => {
                    // Selection functions take the selector first; their
                    // value type is that of the selected inputs.
                    let witness = match function.kind {
                        crate::builtins::FunctionKind::Sel | crate::builtins::FunctionKind::Mux => {
                            args.get(1)
                        }
                        _ => args.first(),
                    };
                    match witness {
                        Some(arg) => self.infer_type(arg),
                        None => Ok(DataType::DINT),
                    }
                }
                RetType::None => Err(Diagnostic::codegen(
                    line,
                    format!("'{}' has no value", function.name),
                )),
            };
        }
        if let Some(scope) = self.symbols.function_scope(name) {
            return scope
                .return_type
                .clone()
                .ok_or_else(|| Diagnostic::codegen(line, format!("'{}' has no return type", name)));
        }
        Err(Diagnostic::codegen(line, format!("unknown function '{}'", name)))
    }
}

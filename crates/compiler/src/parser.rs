//! Structured Text parser
//!
//! Recursive descent over the token stream. A compilation unit is any
//! interleaving of `TYPE`, `VAR_GLOBAL`, `FUNCTION`, `FUNCTION_BLOCK` and
//! `PROGRAM` declarations. Expression parsing follows the IEC 61131-3
//! precedence ladder, low to high:
//!
//! ```text
//! OR < XOR < AND < comparison < additive < multiplicative < unary < postfix
//! ```

use crate::ast::*;
use crate::error::Diagnostic;
use crate::lexer::{tokenize, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a whole source string.
pub fn parse(source: &str) -> Result<CompilationUnit, Diagnostic> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_unit()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {}, got '{}'", what, self.describe_current())))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<(String, u32), Diagnostic> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                let line = self.peek().line;
                self.advance();
                Ok((name, line))
            }
            _ => Err(self.error_here(format!("expected {}, got '{}'", what, self.describe_current()))),
        }
    }

    fn describe_current(&self) -> String {
        let t = self.peek();
        if matches!(t.kind, TokenKind::Eof) {
            "end of file".to_string()
        } else {
            t.lexeme.clone()
        }
    }

    fn error_here(&self, message: String) -> Diagnostic {
        let t = self.peek();
        Diagnostic::parser(t.line, t.column, message)
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    pub fn parse_unit(&mut self) -> Result<CompilationUnit, Diagnostic> {
        let mut unit = CompilationUnit::default();
        while !self.at_end() {
            match self.peek_kind() {
                TokenKind::Type => unit.structs.extend(self.parse_type_block()?),
                TokenKind::VarGlobal => unit.globals.push(self.parse_var_block()?),
                TokenKind::Function => unit.functions.push(self.parse_function()?),
                TokenKind::FunctionBlock => unit.function_blocks.push(self.parse_function_block()?),
                TokenKind::Program => unit.programs.push(self.parse_program()?),
                _ => {
                    return Err(self.error_here(format!(
                        "expected TYPE, VAR_GLOBAL, FUNCTION, FUNCTION_BLOCK or PROGRAM, got '{}'",
                        self.describe_current()
                    )));
                }
            }
        }
        Ok(unit)
    }

    /// `TYPE Name : STRUCT ... END_STRUCT; Name2 : STRUCT ... END_TYPE`
    fn parse_type_block(&mut self) -> Result<Vec<StructDef>, Diagnostic> {
        self.expect(&TokenKind::Type, "TYPE")?;
        let mut defs = Vec::new();
        while !self.check(&TokenKind::EndType) {
            if self.at_end() {
                return Err(self.error_here("missing END_TYPE".to_string()));
            }
            let (name, line) = self.expect_identifier("a type name")?;
            self.expect(&TokenKind::Colon, "':'")?;
            self.expect(&TokenKind::Struct, "STRUCT")?;
            let mut members = Vec::new();
            while !self.check(&TokenKind::EndStruct) {
                if self.at_end() {
                    return Err(self.error_here(format!("missing END_STRUCT in '{}'", name)));
                }
                let (member_name, member_line) = self.expect_identifier("a member name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                members.push(StructMember { name: member_name, ty, line: member_line });
            }
            self.expect(&TokenKind::EndStruct, "END_STRUCT")?;
            self.eat(&TokenKind::Semicolon);
            defs.push(StructDef { name, members, line });
        }
        self.expect(&TokenKind::EndType, "END_TYPE")?;
        self.eat(&TokenKind::Semicolon);
        Ok(defs)
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::Program, "PROGRAM")?;
        let (name, _) = self.expect_identifier("a program name")?;
        let var_blocks = self.parse_var_blocks()?;
        let body = self.parse_statements(&[TokenKind::EndProgram])?;
        self.expect(&TokenKind::EndProgram, "END_PROGRAM")?;
        self.eat(&TokenKind::Semicolon);
        Ok(Program { name, var_blocks, body, line })
    }

    fn parse_function(&mut self) -> Result<UserFunction, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::Function, "FUNCTION")?;
        let (name, _) = self.expect_identifier("a function name")?;
        self.expect(&TokenKind::Colon, "':' before the return type")?;
        let return_type = self.parse_type()?;
        let var_blocks = self.parse_var_blocks()?;
        let body = self.parse_statements(&[TokenKind::EndFunction])?;
        self.expect(&TokenKind::EndFunction, "END_FUNCTION")?;
        self.eat(&TokenKind::Semicolon);
        Ok(UserFunction { name, return_type, var_blocks, body, line })
    }

    fn parse_function_block(&mut self) -> Result<UserFunctionBlock, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::FunctionBlock, "FUNCTION_BLOCK")?;
        let (name, _) = self.expect_identifier("a function block name")?;
        let var_blocks = self.parse_var_blocks()?;
        let body = self.parse_statements(&[TokenKind::EndFunctionBlock])?;
        self.expect(&TokenKind::EndFunctionBlock, "END_FUNCTION_BLOCK")?;
        self.eat(&TokenKind::Semicolon);
        Ok(UserFunctionBlock { name, var_blocks, body, line })
    }

    // ------------------------------------------------------------------
    // Variable blocks
    // ------------------------------------------------------------------

    fn parse_var_blocks(&mut self) -> Result<Vec<VarBlock>, Diagnostic> {
        let mut blocks = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Var
                | TokenKind::VarInput
                | TokenKind::VarOutput
                | TokenKind::VarInOut
                | TokenKind::VarTemp
                | TokenKind::VarRetain
                | TokenKind::VarGlobal => blocks.push(self.parse_var_block()?),
                _ => break,
            }
        }
        Ok(blocks)
    }

    fn parse_var_block(&mut self) -> Result<VarBlock, Diagnostic> {
        let line = self.peek().line;
        let section = match self.advance().kind {
            TokenKind::Var => VarSection::Var,
            TokenKind::VarInput => VarSection::Input,
            TokenKind::VarOutput => VarSection::Output,
            TokenKind::VarInOut => VarSection::InOut,
            TokenKind::VarTemp => VarSection::Temp,
            TokenKind::VarRetain => VarSection::Retain,
            TokenKind::VarGlobal => VarSection::Global,
            _ => unreachable!("caller checked for a VAR keyword"),
        };

        let mut decls = Vec::new();
        while !self.check(&TokenKind::EndVar) {
            if self.at_end() {
                return Err(self.error_here("missing END_VAR".to_string()));
            }
            decls.push(self.parse_var_decl(section)?);
        }
        self.expect(&TokenKind::EndVar, "END_VAR")?;
        self.eat(&TokenKind::Semicolon);
        Ok(VarBlock { section, decls, line })
    }

    /// `Name [AT %addr] : type [:= initializer] ;`
    fn parse_var_decl(&mut self, section: VarSection) -> Result<VarDecl, Diagnostic> {
        let (name, line) = self.expect_identifier("a variable name")?;

        let mut io = None;
        if self.eat(&TokenKind::At) {
            match self.peek_kind().clone() {
                TokenKind::IoLiteral(address) => {
                    self.advance();
                    io = Some(address);
                }
                _ => {
                    return Err(self.error_here(format!(
                        "expected an I/O address after AT, got '{}'",
                        self.describe_current()
                    )));
                }
            }
        }

        self.expect(&TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;

        let mut init = None;
        if self.eat(&TokenKind::Assign) {
            if self.check(&TokenKind::LBracket) {
                self.advance();
                let mut elements = Vec::new();
                loop {
                    elements.push(self.parse_expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                init = Some(Initializer::Array(elements));
            } else {
                init = Some(Initializer::Expr(self.parse_expression()?));
            }
        }

        self.expect(&TokenKind::Semicolon, "';' after the declaration")?;
        Ok(VarDecl { name, ty, init, io, section, line })
    }

    fn parse_type(&mut self) -> Result<DataType, Diagnostic> {
        use TokenKind::*;
        let elementary = match self.peek_kind() {
            BoolType => Some(ElementaryType::Bool),
            SIntType => Some(ElementaryType::SInt),
            IntType => Some(ElementaryType::Int),
            DIntType => Some(ElementaryType::DInt),
            LIntType => Some(ElementaryType::LInt),
            USIntType => Some(ElementaryType::USInt),
            UIntType => Some(ElementaryType::UInt),
            UDIntType => Some(ElementaryType::UDInt),
            ULIntType => Some(ElementaryType::ULInt),
            RealType => Some(ElementaryType::Real),
            LRealType => Some(ElementaryType::LReal),
            TimeType => Some(ElementaryType::Time),
            StringType => Some(ElementaryType::Str),
            _ => None,
        };
        if let Some(e) = elementary {
            self.advance();
            return Ok(DataType::Elementary(e));
        }

        if self.check(&TokenKind::ArrayType) {
            let line = self.peek().line;
            self.advance();
            self.expect(&TokenKind::LBracket, "'[' after ARRAY")?;
            let mut dims = Vec::new();
            loop {
                let lo = self.parse_array_bound()?;
                self.expect(&TokenKind::DotDot, "'..' in the array bounds")?;
                let hi = self.parse_array_bound()?;
                if hi < lo {
                    return Err(Diagnostic::parser(
                        line,
                        1,
                        format!("array upper bound {} is below lower bound {}", hi, lo),
                    ));
                }
                dims.push((lo, hi));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "']'")?;
            if dims.len() > 3 {
                return Err(Diagnostic::parser(line, 1, "arrays support at most 3 dimensions".to_string()));
            }
            self.expect(&TokenKind::Of, "OF")?;
            let element = self.parse_type()?;
            return Ok(DataType::Array { dims, element: Box::new(element) });
        }

        let (name, _) = self.expect_identifier("a type")?;
        Ok(DataType::Named(name))
    }

    fn parse_array_bound(&mut self) -> Result<i64, Diagnostic> {
        let negative = self.eat(&TokenKind::Minus);
        match self.peek_kind().clone() {
            TokenKind::IntLiteral(v) => {
                self.advance();
                Ok(if negative { -v } else { v })
            }
            _ => Err(self.error_here(format!(
                "expected an integer array bound, got '{}'",
                self.describe_current()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse statements until one of `terminators` (or ELSE/ELSIF/UNTIL,
    /// which always end a statement list) is at the front.
    fn parse_statements(&mut self, terminators: &[TokenKind]) -> Result<Vec<Statement>, Diagnostic> {
        let mut statements = Vec::new();
        loop {
            if self.at_end() {
                break;
            }
            let kind = self.peek_kind();
            if terminators.iter().any(|t| std::mem::discriminant(t) == std::mem::discriminant(kind)) {
                break;
            }
            if matches!(
                kind,
                TokenKind::Else | TokenKind::Elsif | TokenKind::Until | TokenKind::EndCase
            ) {
                break;
            }
            // CASE branch labels start with an integer (possibly negative)
            if matches!(kind, TokenKind::IntLiteral(_))
                || (matches!(kind, TokenKind::Minus)
                    && matches!(self.peek_at(1).kind, TokenKind::IntLiteral(_)))
            {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, Diagnostic> {
        match self.peek_kind() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Repeat => self.parse_repeat(),
            TokenKind::Case => self.parse_case(),
            TokenKind::Exit => {
                let line = self.advance().line;
                self.expect(&TokenKind::Semicolon, "';' after EXIT")?;
                Ok(Statement::Exit { line })
            }
            TokenKind::Continue => {
                let line = self.advance().line;
                self.expect(&TokenKind::Semicolon, "';' after CONTINUE")?;
                Ok(Statement::Continue { line })
            }
            TokenKind::Return => {
                let line = self.advance().line;
                self.expect(&TokenKind::Semicolon, "';' after RETURN")?;
                Ok(Statement::Return { line })
            }
            TokenKind::Identifier(_) => self.parse_assign_or_call(),
            _ => Err(self.error_here(format!("unexpected token '{}'", self.describe_current()))),
        }
    }

    fn parse_if(&mut self) -> Result<Statement, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::If, "IF")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::Then, "THEN")?;
        let then_body = self.parse_statements(&[TokenKind::EndIf])?;

        let mut elsifs = Vec::new();
        while self.check(&TokenKind::Elsif) {
            self.advance();
            let elsif_cond = self.parse_expression()?;
            self.expect(&TokenKind::Then, "THEN")?;
            let elsif_body = self.parse_statements(&[TokenKind::EndIf])?;
            elsifs.push((elsif_cond, elsif_body));
        }

        let mut else_body = None;
        if self.eat(&TokenKind::Else) {
            else_body = Some(self.parse_statements(&[TokenKind::EndIf])?);
        }

        self.expect(&TokenKind::EndIf, "END_IF")?;
        self.eat(&TokenKind::Semicolon);
        Ok(Statement::If { cond, then_body, elsifs, else_body, line })
    }

    fn parse_while(&mut self) -> Result<Statement, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::While, "WHILE")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::Do, "DO")?;
        let body = self.parse_statements(&[TokenKind::EndWhile])?;
        self.expect(&TokenKind::EndWhile, "END_WHILE")?;
        self.eat(&TokenKind::Semicolon);
        Ok(Statement::While { cond, body, line })
    }

    fn parse_for(&mut self) -> Result<Statement, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::For, "FOR")?;
        let (counter, _) = self.expect_identifier("the loop counter")?;
        self.expect(&TokenKind::Assign, "':=' after the loop counter")?;
        let start = self.parse_expression()?;
        self.expect(&TokenKind::To, "TO")?;
        let end = self.parse_expression()?;
        let step = if self.eat(&TokenKind::By) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Do, "DO")?;
        let body = self.parse_statements(&[TokenKind::EndFor])?;
        self.expect(&TokenKind::EndFor, "END_FOR")?;
        self.eat(&TokenKind::Semicolon);
        Ok(Statement::For { counter, start, end, step, body, line })
    }

    fn parse_repeat(&mut self) -> Result<Statement, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::Repeat, "REPEAT")?;
        let body = self.parse_statements(&[TokenKind::Until])?;
        self.expect(&TokenKind::Until, "UNTIL")?;
        let until = self.parse_expression()?;
        self.expect(&TokenKind::EndRepeat, "END_REPEAT")?;
        self.eat(&TokenKind::Semicolon);
        Ok(Statement::Repeat { body, until, line })
    }

    fn parse_case(&mut self) -> Result<Statement, Diagnostic> {
        let line = self.peek().line;
        self.expect(&TokenKind::Case, "CASE")?;
        let selector = self.parse_expression()?;
        self.expect(&TokenKind::Of, "OF")?;

        let mut branches = Vec::new();
        let mut else_body = None;
        loop {
            if self.check(&TokenKind::EndCase) {
                break;
            }
            if self.eat(&TokenKind::Else) {
                else_body = Some(self.parse_statements(&[TokenKind::EndCase])?);
                break;
            }
            if self.at_end() {
                return Err(self.error_here("missing END_CASE".to_string()));
            }

            let branch_line = self.peek().line;
            let mut labels = Vec::new();
            loop {
                let lo = self.parse_case_value()?;
                if self.eat(&TokenKind::DotDot) {
                    let hi = self.parse_case_value()?;
                    labels.push(CaseLabel::Range(lo, hi));
                } else {
                    labels.push(CaseLabel::Value(lo));
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Colon, "':' after the CASE labels")?;
            let body = self.parse_statements(&[TokenKind::EndCase])?;
            branches.push(CaseBranch { labels, body, line: branch_line });
        }

        self.expect(&TokenKind::EndCase, "END_CASE")?;
        self.eat(&TokenKind::Semicolon);
        Ok(Statement::Case { selector, branches, else_body, line })
    }

    fn parse_case_value(&mut self) -> Result<i64, Diagnostic> {
        let negative = self.eat(&TokenKind::Minus);
        match self.peek_kind().clone() {
            TokenKind::IntLiteral(v) => {
                self.advance();
                Ok(if negative { -v } else { v })
            }
            _ => Err(self.error_here(format!(
                "expected a constant CASE label, got '{}'",
                self.describe_current()
            ))),
        }
    }

    /// Assignment, FB call statement, or function call statement — all begin
    /// with an identifier.
    fn parse_assign_or_call(&mut self) -> Result<Statement, Diagnostic> {
        let line = self.peek().line;
        let target = self.parse_postfix()?;

        if self.eat(&TokenKind::Assign) {
            let value = self.parse_expression()?;
            self.expect(&TokenKind::Semicolon, "';' after the assignment")?;
            return Ok(Statement::Assign { target, value, line });
        }

        self.expect(&TokenKind::Semicolon, "':=' or ';'")?;
        match target {
            Expression::FbCall { name, args, .. } => Ok(Statement::FbCall { name, args, line }),
            Expression::Call { name, args, .. } => Ok(Statement::FunctionCall { name, args, line }),
            _ => Err(Diagnostic::parser(
                line,
                1,
                "expected ':=' in assignment or a call statement".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<Expression, Diagnostic> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, Diagnostic> {
        let mut lhs = self.parse_xor()?;
        while self.check(&TokenKind::Or) {
            let line = self.advance().line;
            let rhs = self.parse_xor()?;
            lhs = Expression::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Expression, Diagnostic> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Xor) {
            let line = self.advance().line;
            let rhs = self.parse_and()?;
            lhs = Expression::Binary { op: BinaryOp::Xor, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expression, Diagnostic> {
        let mut lhs = self.parse_comparison()?;
        while self.check(&TokenKind::And) {
            let line = self.advance().line;
            let rhs = self.parse_comparison()?;
            lhs = Expression::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expression, Diagnostic> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Equal => BinaryOp::Eq,
                TokenKind::NotEqual => BinaryOp::Ne,
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                _ => break,
            };
            let line = self.advance().line;
            let rhs = self.parse_additive()?;
            lhs = Expression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expression, Diagnostic> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let line = self.advance().line;
            let rhs = self.parse_multiplicative()?;
            lhs = Expression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, Diagnostic> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Mod => BinaryOp::Mod,
                _ => break,
            };
            let line = self.advance().line;
            let rhs = self.parse_unary()?;
            lhs = Expression::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), line };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression, Diagnostic> {
        match self.peek_kind() {
            TokenKind::Not => {
                let line = self.advance().line;
                let operand = self.parse_unary()?;
                Ok(Expression::Unary { op: UnaryOp::Not, operand: Box::new(operand), line })
            }
            TokenKind::Minus => {
                let line = self.advance().line;
                let operand = self.parse_unary()?;
                Ok(Expression::Unary { op: UnaryOp::Neg, operand: Box::new(operand), line })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    let line = self.advance().line;
                    let (member, _) = self.expect_identifier("a member name after '.'")?;
                    expr = Expression::Member { object: Box::new(expr), member, line };
                }
                TokenKind::LBracket => {
                    let line = self.advance().line;
                    let mut indices = Vec::new();
                    loop {
                        indices.push(self.parse_expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    if indices.len() > 3 {
                        return Err(Diagnostic::parser(
                            line,
                            1,
                            "array access supports at most 3 indices".to_string(),
                        ));
                    }
                    expr = Expression::Index { array: Box::new(expr), indices, line };
                }
                TokenKind::LParen => {
                    let name = match &expr {
                        Expression::Ident { name, .. } => name.clone(),
                        _ => {
                            return Err(self.error_here("only a simple name can be called".to_string()));
                        }
                    };
                    let line = self.advance().line;
                    expr = self.parse_call_arguments(name, line)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Arguments of a call. `Name(Param := expr, ...)` is a function-block
    /// invocation; positional arguments make a function call. The two forms
    /// do not mix.
    fn parse_call_arguments(&mut self, name: String, line: u32) -> Result<Expression, Diagnostic> {
        if self.eat(&TokenKind::RParen) {
            // Empty parens: an FB invocation with no parameters, or a
            // zero-argument function. The code generator resolves by name.
            return Ok(Expression::FbCall { name, args: Vec::new(), line });
        }

        let named = matches!(self.peek_kind(), TokenKind::Identifier(_))
            && matches!(self.peek_at(1).kind, TokenKind::Assign);

        if named {
            let mut args = Vec::new();
            loop {
                let (param, _) = self.expect_identifier("a parameter name")?;
                self.expect(&TokenKind::Assign, "':=' after the parameter name")?;
                let value = self.parse_expression()?;
                args.push((param, value));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
            Ok(Expression::FbCall { name, args, line })
        } else {
            let mut args = Vec::new();
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
            Ok(Expression::Call { name, args, line })
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, Diagnostic> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::True => {
                self.advance();
                Ok(Expression::BoolLit { value: true, line: token.line })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::BoolLit { value: false, line: token.line })
            }
            TokenKind::IntLiteral(value) => {
                self.advance();
                Ok(Expression::IntLit { value, line: token.line })
            }
            TokenKind::RealLiteral(value) => {
                self.advance();
                Ok(Expression::RealLit { value, line: token.line })
            }
            TokenKind::TimeLiteral(ms) => {
                self.advance();
                Ok(Expression::TimeLit { ms, line: token.line })
            }
            TokenKind::StringLiteral(ref value) => {
                let value = value.clone();
                self.advance();
                Ok(Expression::StringLit { value, line: token.line })
            }
            TokenKind::Identifier(ref name) => {
                let name = name.clone();
                self.advance();
                Ok(Expression::Ident { name, line: token.line })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(self.error_here(format!(
                "expected an expression, got '{}'",
                self.describe_current()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> CompilationUnit {
        parse(source).unwrap_or_else(|e| panic!("parse failed: {}", e))
    }

    #[test]
    fn test_minimal_program() {
        let unit = parse_ok("PROGRAM Main END_PROGRAM");
        assert_eq!(unit.programs.len(), 1);
        assert_eq!(unit.programs[0].name, "Main");
        assert!(unit.programs[0].body.is_empty());
    }

    #[test]
    fn test_var_blocks_and_sections() {
        let unit = parse_ok(
            "PROGRAM P\n\
             VAR x : INT := 3; END_VAR\n\
             VAR_OUTPUT led AT %Q0.0 : BOOL; END_VAR\n\
             VAR_RETAIN total : DINT; END_VAR\n\
             END_PROGRAM",
        );
        let blocks = &unit.programs[0].var_blocks;
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].section, VarSection::Var);
        assert_eq!(blocks[1].section, VarSection::Output);
        assert!(blocks[1].decls[0].io.is_some());
        assert_eq!(blocks[2].section, VarSection::Retain);
    }

    #[test]
    fn test_initializer_survives_round_trip() {
        let unit = parse_ok(
            "PROGRAM P VAR t : TIME := T#500ms; s : STRING := 'it''s'; r : REAL := 2.5; END_VAR END_PROGRAM",
        );
        let decls = &unit.programs[0].var_blocks[0].decls;
        assert_eq!(
            decls[0].init,
            Some(Initializer::Expr(Expression::TimeLit { ms: 500, line: 1 }))
        );
        assert_eq!(
            decls[1].init,
            Some(Initializer::Expr(Expression::StringLit { value: "it's".to_string(), line: 1 }))
        );
        assert_eq!(
            decls[2].init,
            Some(Initializer::Expr(Expression::RealLit { value: 2.5, line: 1 }))
        );
    }

    #[test]
    fn test_array_type_and_literal() {
        let unit = parse_ok(
            "PROGRAM P VAR a : ARRAY[1..3] OF INT := [1, 2, 3]; m : ARRAY[0..1, 0..1] OF REAL; END_VAR END_PROGRAM",
        );
        let decls = &unit.programs[0].var_blocks[0].decls;
        match &decls[0].ty {
            DataType::Array { dims, element } => {
                assert_eq!(dims, &vec![(1, 3)]);
                assert_eq!(**element, DataType::INT);
            }
            other => panic!("unexpected type {:?}", other),
        }
        assert!(matches!(decls[0].init, Some(Initializer::Array(ref v)) if v.len() == 3));
        match &decls[1].ty {
            DataType::Array { dims, .. } => assert_eq!(dims.len(), 2),
            other => panic!("unexpected type {:?}", other),
        }
    }

    #[test]
    fn test_rank_four_rejected() {
        let err = parse("PROGRAM P VAR a : ARRAY[1..2, 1..2, 1..2, 1..2] OF INT; END_VAR END_PROGRAM")
            .unwrap_err();
        assert!(err.message.contains("3 dimensions"));
    }

    #[test]
    fn test_precedence() {
        let unit = parse_ok("PROGRAM P x := a OR b AND c = d + e * 2; END_PROGRAM");
        let stmt = &unit.programs[0].body[0];
        // OR binds loosest: (a) OR (b AND (c = (d + (e * 2))))
        match stmt {
            Statement::Assign { value: Expression::Binary { op: BinaryOp::Or, rhs, .. }, .. } => {
                match rhs.as_ref() {
                    Expression::Binary { op: BinaryOp::And, rhs: cmp, .. } => match cmp.as_ref() {
                        Expression::Binary { op: BinaryOp::Eq, rhs: add, .. } => match add.as_ref() {
                            Expression::Binary { op: BinaryOp::Add, rhs: mul, .. } => {
                                assert!(matches!(mul.as_ref(), Expression::Binary { op: BinaryOp::Mul, .. }));
                            }
                            other => panic!("expected +, got {:?}", other),
                        },
                        other => panic!("expected =, got {:?}", other),
                    },
                    other => panic!("expected AND, got {:?}", other),
                }
            }
            other => panic!("expected OR at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elsif_else() {
        let unit = parse_ok(
            "PROGRAM P IF a THEN x := 1; ELSIF b THEN x := 2; ELSIF c THEN x := 3; ELSE x := 4; END_IF; END_PROGRAM",
        );
        match &unit.programs[0].body[0] {
            Statement::If { elsifs, else_body, .. } => {
                assert_eq!(elsifs.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected IF, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_step() {
        let unit = parse_ok("PROGRAM P FOR i := 10 TO 0 BY -2 DO x := i; END_FOR; END_PROGRAM");
        match &unit.programs[0].body[0] {
            Statement::For { counter, step, body, .. } => {
                assert_eq!(counter, "i");
                assert!(step.is_some());
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected FOR, got {:?}", other),
        }
    }

    #[test]
    fn test_repeat_until() {
        let unit = parse_ok("PROGRAM P REPEAT x := x + 1; UNTIL x >= 10 END_REPEAT; END_PROGRAM");
        assert!(matches!(&unit.programs[0].body[0], Statement::Repeat { body, .. } if body.len() == 1));
    }

    #[test]
    fn test_case_with_ranges() {
        let unit = parse_ok(
            "PROGRAM P CASE sel OF 1, 3, 5..7: x := 1; 10: x := 2; ELSE x := 0; END_CASE; END_PROGRAM",
        );
        match &unit.programs[0].body[0] {
            Statement::Case { branches, else_body, .. } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(
                    branches[0].labels,
                    vec![CaseLabel::Value(1), CaseLabel::Value(3), CaseLabel::Range(5, 7)]
                );
                assert_eq!(branches[1].labels, vec![CaseLabel::Value(10)]);
                assert!(else_body.is_some());
            }
            other => panic!("expected CASE, got {:?}", other),
        }
    }

    #[test]
    fn test_fb_call_statement() {
        let unit = parse_ok("PROGRAM P Timer(IN := TRUE, PT := T#500ms); END_PROGRAM");
        match &unit.programs[0].body[0] {
            Statement::FbCall { name, args, .. } => {
                assert_eq!(name, "Timer");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].0, "IN");
                assert_eq!(args[1].0, "PT");
            }
            other => panic!("expected an FB call, got {:?}", other),
        }
    }

    #[test]
    fn test_function_call_statement() {
        let unit = parse_ok("PROGRAM P CLEAR(msg); END_PROGRAM");
        assert!(matches!(
            &unit.programs[0].body[0],
            Statement::FunctionCall { name, args, .. } if name == "CLEAR" && args.len() == 1
        ));
    }

    #[test]
    fn test_member_and_index_access() {
        let unit = parse_ok("PROGRAM P x := Timer.Q; a[i + 1] := pt.lo; m[1, 2] := 0; END_PROGRAM");
        let body = &unit.programs[0].body;
        assert!(matches!(
            &body[0],
            Statement::Assign { value: Expression::Member { .. }, .. }
        ));
        assert!(matches!(
            &body[1],
            Statement::Assign { target: Expression::Index { indices, .. }, .. } if indices.len() == 1
        ));
        assert!(matches!(
            &body[2],
            Statement::Assign { target: Expression::Index { indices, .. }, .. } if indices.len() == 2
        ));
    }

    #[test]
    fn test_struct_type_block() {
        let unit = parse_ok(
            "TYPE Point : STRUCT x : INT; y : INT; END_STRUCT; END_TYPE\n\
             PROGRAM P VAR p : Point; END_VAR p.x := 1; END_PROGRAM",
        );
        assert_eq!(unit.structs.len(), 1);
        assert_eq!(unit.structs[0].members.len(), 2);
    }

    #[test]
    fn test_function_declaration() {
        let unit = parse_ok(
            "FUNCTION Add2 : INT\n\
             VAR_INPUT a : INT; b : INT; END_VAR\n\
             Add2 := a + b;\n\
             END_FUNCTION",
        );
        assert_eq!(unit.functions.len(), 1);
        assert_eq!(unit.functions[0].return_type, DataType::INT);
    }

    #[test]
    fn test_function_block_declaration() {
        let unit = parse_ok(
            "FUNCTION_BLOCK Debounce\n\
             VAR_INPUT raw : BOOL; END_VAR\n\
             VAR_OUTPUT clean : BOOL; END_VAR\n\
             clean := raw;\n\
             END_FUNCTION_BLOCK",
        );
        assert_eq!(unit.function_blocks.len(), 1);
    }

    #[test]
    fn test_global_var_block() {
        let unit = parse_ok("VAR_GLOBAL speed : REAL; END_VAR PROGRAM P END_PROGRAM");
        assert_eq!(unit.globals.len(), 1);
        assert_eq!(unit.globals[0].section, VarSection::Global);
    }

    #[test]
    fn test_missing_end_program() {
        let err = parse("PROGRAM P x := 1;").unwrap_err();
        assert!(err.message.contains("END_PROGRAM"), "{}", err.message);
    }

    #[test]
    fn test_missing_assign_reported() {
        let err = parse("PROGRAM P x = 1; END_PROGRAM").unwrap_err();
        assert!(err.message.contains(":="), "{}", err.message);
    }

    #[test]
    fn test_unary_not_and_neg() {
        let unit = parse_ok("PROGRAM P x := NOT a AND -b; END_PROGRAM");
        match &unit.programs[0].body[0] {
            Statement::Assign { value: Expression::Binary { op: BinaryOp::And, lhs, rhs, .. }, .. } => {
                assert!(matches!(lhs.as_ref(), Expression::Unary { op: UnaryOp::Not, .. }));
                assert!(matches!(rhs.as_ref(), Expression::Unary { op: UnaryOp::Neg, .. }));
            }
            other => panic!("expected AND, got {:?}", other),
        }
    }
}

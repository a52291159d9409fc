//! Symbol table and memory layout
//!
//! Assigns every declared name an absolute address in the four-region memory
//! model and computes member offsets for composite types. Build order is
//! fixed for layout stability:
//!
//! 1. STRUCT definitions (member offsets, `min(size, 4)` alignment)
//! 2. user function-block definitions (input, output, in-out, then locals)
//! 3. global variable blocks
//! 4. user-function parameters, locals and the result slot
//! 5. per-program variable blocks
//!
//! Within a variable sweep, elementary and array variables are placed first
//! at their natural alignment; STRUCT and function-block instances follow as
//! byte-packed blobs (the VM has no alignment requirement, and instance
//! members are always addressed as base + recorded offset).
//!
//! I/O-mapped BOOLs are bit-expanded: `%QX1.3` lands at
//! `OUTPUT_BASE + 1*8 + 3`, one byte per bit.

use crate::ast::*;
use crate::builtins::{builtin_fb, builtin_function};
use crate::error::Diagnostic;
use crate::lexer::{IoAddress, IoArea, IoSize};
use std::collections::HashMap;
use zplc_core::memory::{
    align_to, init_flag_address, natural_alignment, INPUT_BASE, INPUT_SIZE, OUTPUT_BASE,
    OUTPUT_SIZE, RETAIN_BASE, RETAIN_SIZE, WORK_BASE,
};

/// Resolved information about one member of a composite type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub offset: u16,
    pub size: u16,
    pub ty: DataType,
}

/// Layout of a user STRUCT or user function-block type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDef {
    pub name: String,
    pub size: u16,
    /// Ordered `(member name, info)` pairs.
    pub members: Vec<(String, MemberInfo)>,
}

impl CompositeDef {
    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }
}

/// One addressed symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: DataType,
    pub address: u16,
    pub size: u16,
    pub section: VarSection,
    pub io: Option<IoAddress>,
    pub line: u32,
}

/// Per-function scope: ordered input parameters plus a name→symbol map.
#[derive(Debug, Clone, Default)]
pub struct FunctionScope {
    pub params: Vec<String>,
    pub return_type: Option<DataType>,
    index: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct SymbolTable {
    pub work_base: u16,
    pub init_flag: u16,
    structs: HashMap<String, CompositeDef>,
    user_fbs: HashMap<String, CompositeDef>,
    symbols: Vec<Symbol>,
    index: HashMap<String, usize>,
    functions: HashMap<String, FunctionScope>,
    next_work: u16,
    next_retain: u16,
}

impl SymbolTable {
    /// Build a table for a compilation unit, allocating work-memory symbols
    /// from `work_base` (`None` means the program owns the whole region).
    pub fn build(unit: &CompilationUnit, work_base: Option<u16>) -> Result<Self, Diagnostic> {
        let base = work_base.unwrap_or(WORK_BASE);
        let mut table = SymbolTable {
            work_base: base,
            init_flag: init_flag_address(work_base),
            structs: HashMap::new(),
            user_fbs: HashMap::new(),
            symbols: Vec::new(),
            index: HashMap::new(),
            functions: HashMap::new(),
            next_work: base,
            next_retain: RETAIN_BASE,
        };

        for def in &unit.structs {
            let layout = table.layout_struct(def)?;
            if table.structs.insert(def.name.clone(), layout).is_some() {
                return Err(Diagnostic::symbols(def.line, format!("duplicate type '{}'", def.name)));
            }
        }

        for fb in &unit.function_blocks {
            let layout = table.layout_user_fb(fb)?;
            if table.user_fbs.insert(fb.name.clone(), layout).is_some() {
                return Err(Diagnostic::symbols(fb.line, format!("duplicate function block '{}'", fb.name)));
            }
        }

        for block in &unit.globals {
            table.allocate_block(&mut None, block)?;
        }

        for function in &unit.functions {
            table.declare_function(function)?;
        }

        for program in &unit.programs {
            let blocks: Vec<&VarBlock> = program.var_blocks.iter().collect();
            table.allocate_blocks(&mut None, &blocks)?;
        }

        if table.next_work > table.init_flag {
            return Err(Diagnostic::symbols(
                0,
                format!(
                    "work memory overflow: variables end at 0x{:04X} but the window ends at 0x{:04X}",
                    table.next_work, table.init_flag
                ),
            ));
        }

        Ok(table)
    }

    // ------------------------------------------------------------------
    // Type geometry
    // ------------------------------------------------------------------

    /// Size in bytes of a declared type. `Named` resolves against user
    /// STRUCTs, then user FBs, then built-in FBs.
    pub fn size_of(&self, ty: &DataType, line: u32) -> Result<u16, Diagnostic> {
        match ty {
            DataType::Elementary(e) => Ok(e.size()),
            DataType::Array { dims, element } => {
                if dims.len() > 3 {
                    return Err(Diagnostic::symbols(line, "arrays support at most 3 dimensions".to_string()));
                }
                let count = DataType::array_len(dims);
                let element_size = self.size_of(element, line)? as i64;
                let total = count * element_size;
                if !(1..=0x2000).contains(&total) {
                    return Err(Diagnostic::symbols(line, format!("array size {} bytes is out of range", total)));
                }
                Ok(total as u16)
            }
            DataType::Named(name) => {
                if let Some(def) = self.structs.get(name) {
                    Ok(def.size)
                } else if let Some(def) = self.user_fbs.get(name) {
                    Ok(def.size)
                } else if let Some(fb) = builtin_fb(name) {
                    Ok(fb.size)
                } else {
                    Err(Diagnostic::symbols(line, format!("undefined type '{}'", name)))
                }
            }
        }
    }

    /// Alignment of a variable of this type. Composite instances are
    /// byte-packed; everything else uses natural alignment clamped to 4.
    fn alignment_of(&self, ty: &DataType, line: u32) -> Result<u16, Diagnostic> {
        match ty {
            DataType::Named(_) => Ok(1),
            DataType::Array { element, .. } => self.alignment_of(element, line),
            DataType::Elementary(_) => Ok(natural_alignment(self.size_of(ty, line)?)),
        }
    }

    fn layout_struct(&self, def: &StructDef) -> Result<CompositeDef, Diagnostic> {
        let mut members = Vec::new();
        let mut offset = 0u16;
        for member in &def.members {
            if members.iter().any(|(n, _)| n == &member.name) {
                return Err(Diagnostic::symbols(
                    member.line,
                    format!("duplicate member '{}' in '{}'", member.name, def.name),
                ));
            }
            let size = self.size_of(&member.ty, member.line)?;
            offset = align_to(offset, natural_alignment(size));
            members.push((
                member.name.clone(),
                MemberInfo { offset, size, ty: member.ty.clone() },
            ));
            offset += size;
        }
        Ok(CompositeDef { name: def.name.clone(), size: offset, members })
    }

    /// User FB layout concatenates input, output, in-out and local members.
    fn layout_user_fb(&self, fb: &UserFunctionBlock) -> Result<CompositeDef, Diagnostic> {
        let order = [
            VarSection::Input,
            VarSection::Output,
            VarSection::InOut,
            VarSection::Var,
            VarSection::Temp,
        ];
        let mut members = Vec::new();
        let mut offset = 0u16;
        for section in order {
            for block in fb.var_blocks.iter().filter(|b| b.section == section) {
                for decl in &block.decls {
                    if members.iter().any(|(n, _)| n == &decl.name) {
                        return Err(Diagnostic::symbols(
                            decl.line,
                            format!("duplicate member '{}' in '{}'", decl.name, fb.name),
                        ));
                    }
                    let size = self.size_of(&decl.ty, decl.line)?;
                    offset = align_to(offset, natural_alignment(size));
                    members.push((
                        decl.name.clone(),
                        MemberInfo { offset, size, ty: decl.ty.clone() },
                    ));
                    offset += size;
                }
            }
        }
        Ok(CompositeDef { name: fb.name.clone(), size: offset, members })
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn allocate_blocks(
        &mut self,
        scope: &mut Option<FunctionScope>,
        blocks: &[&VarBlock],
    ) -> Result<(), Diagnostic> {
        // Scalars and arrays first, composite instances second: keeps the
        // simple variables at the window base regardless of declaration order.
        for composite_pass in [false, true] {
            for block in blocks {
                for decl in &block.decls {
                    if matches!(decl.ty, DataType::Named(_)) != composite_pass {
                        continue;
                    }
                    self.allocate_decl(scope, decl)?;
                }
            }
        }
        Ok(())
    }

    fn allocate_block(
        &mut self,
        scope: &mut Option<FunctionScope>,
        block: &VarBlock,
    ) -> Result<(), Diagnostic> {
        self.allocate_blocks(scope, &[block])
    }

    fn allocate_decl(
        &mut self,
        scope: &mut Option<FunctionScope>,
        decl: &VarDecl,
    ) -> Result<(), Diagnostic> {
        let size = self.size_of(&decl.ty, decl.line)?;
        let address = match &decl.io {
            Some(io) => self.io_address(io, size, decl.line)?,
            None => {
                if decl.section == VarSection::Retain {
                    let align = self.alignment_of(&decl.ty, decl.line)?;
                    let address = align_to(self.next_retain, align);
                    if address + size > RETAIN_BASE + RETAIN_SIZE {
                        return Err(Diagnostic::symbols(decl.line, "retentive memory overflow".to_string()));
                    }
                    self.next_retain = address + size;
                    address
                } else {
                    let align = self.alignment_of(&decl.ty, decl.line)?;
                    let address = align_to(self.next_work, align);
                    self.next_work = address + size;
                    address
                }
            }
        };

        let symbol = Symbol {
            name: decl.name.clone(),
            ty: decl.ty.clone(),
            address,
            size,
            section: decl.section,
            io: decl.io,
            line: decl.line,
        };

        match scope {
            Some(function_scope) => {
                if function_scope.index.contains_key(&decl.name) {
                    return Err(Diagnostic::symbols(
                        decl.line,
                        format!("duplicate symbol '{}'", decl.name),
                    ));
                }
                self.symbols.push(symbol);
                function_scope.index.insert(decl.name.clone(), self.symbols.len() - 1);
            }
            None => {
                if self.index.contains_key(&decl.name) {
                    return Err(Diagnostic::symbols(
                        decl.line,
                        format!("duplicate symbol '{}'", decl.name),
                    ));
                }
                self.symbols.push(symbol);
                self.index.insert(decl.name.clone(), self.symbols.len() - 1);
            }
        }
        Ok(())
    }

    fn io_address(&self, io: &IoAddress, size: u16, line: u32) -> Result<u16, Diagnostic> {
        let (base, region_size) = match io.area {
            IoArea::Input => (INPUT_BASE, INPUT_SIZE),
            IoArea::Output => (OUTPUT_BASE, OUTPUT_SIZE),
            IoArea::Marker => (WORK_BASE, 0x2000),
        };
        let offset = match io.size {
            // Bit addresses are expanded one byte per bit.
            IoSize::Bit => io.byte_offset() * 8 + io.bit.unwrap_or(0) as u16,
            _ => io.byte_offset(),
        };
        if offset + size > region_size {
            return Err(Diagnostic::symbols(line, format!("I/O address outside its 0x{:04X}-byte area", region_size)));
        }
        Ok(base + offset)
    }

    fn declare_function(&mut self, function: &UserFunction) -> Result<(), Diagnostic> {
        if self.functions.contains_key(&function.name) {
            return Err(Diagnostic::symbols(
                function.line,
                format!("duplicate function '{}'", function.name),
            ));
        }
        let mut scope = Some(FunctionScope {
            params: Vec::new(),
            return_type: Some(function.return_type.clone()),
            index: HashMap::new(),
        });

        let blocks: Vec<&VarBlock> = function.var_blocks.iter().collect();
        self.allocate_blocks(&mut scope, &blocks)?;

        let mut scope = scope.expect("scope was just created");
        for block in function.var_blocks.iter().filter(|b| b.section == VarSection::Input) {
            for decl in &block.decls {
                scope.params.push(decl.name.clone());
            }
        }

        // Result slot, bound to the function's own name.
        let result_decl = VarDecl {
            name: function.name.clone(),
            ty: function.return_type.clone(),
            init: None,
            io: None,
            section: VarSection::Var,
            line: function.line,
        };
        let mut wrapped = Some(scope);
        self.allocate_decl(&mut wrapped, &result_decl)?;
        self.functions.insert(function.name.clone(), wrapped.expect("scope still present"));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// First address past every allocated work-memory symbol; the string
    /// pool starts here.
    pub fn work_end(&self) -> u16 {
        self.next_work
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn function_scope(&self, name: &str) -> Option<&FunctionScope> {
        self.functions.get(name)
    }

    pub fn struct_def(&self, name: &str) -> Option<&CompositeDef> {
        self.structs.get(name)
    }

    pub fn user_fb_def(&self, name: &str) -> Option<&CompositeDef> {
        self.user_fbs.get(name)
    }

    /// Look a bare name up: the enclosing function scope (when inside one)
    /// first, then the unit scope.
    pub fn lookup_scoped(&self, scope: Option<&str>, name: &str) -> Option<&Symbol> {
        if let Some(function_name) = scope {
            if let Some(function_scope) = self.functions.get(function_name) {
                if let Some(&i) = function_scope.index.get(name) {
                    return Some(&self.symbols[i]);
                }
            }
        }
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    /// Member info of `type_name.member`, searching user STRUCTs, then user
    /// FBs, then built-in FBs.
    pub fn member_of(&self, type_name: &str, member: &str) -> Option<MemberInfo> {
        if let Some(def) = self.structs.get(type_name) {
            return def.member(member).cloned();
        }
        if let Some(def) = self.user_fbs.get(type_name) {
            return def.member(member).cloned();
        }
        if let Some(fb) = builtin_fb(type_name) {
            return fb.member(member).map(|m| MemberInfo {
                offset: m.offset,
                size: m.size,
                ty: DataType::Elementary(m.ty),
            });
        }
        None
    }

    /// Resolve `x`, `x.m` or `x.m.n` to `(absolute address, data type)`.
    pub fn resolve_member_path(
        &self,
        expr: &Expression,
        scope: Option<&str>,
    ) -> Result<(u16, DataType), Diagnostic> {
        match expr {
            Expression::Ident { name, line } => {
                let symbol = self.lookup_scoped(scope, name).ok_or_else(|| {
                    Diagnostic::codegen(*line, format!("unknown identifier '{}'", name))
                })?;
                Ok((symbol.address, symbol.ty.clone()))
            }
            Expression::Member { object, member, line } => {
                let (base, object_ty) = self.resolve_member_path(object, scope)?;
                let type_name = match &object_ty {
                    DataType::Named(n) => n.clone(),
                    other => {
                        return Err(Diagnostic::codegen(
                            *line,
                            format!("'{:?}' has no members", other),
                        ));
                    }
                };
                let info = self.member_of(&type_name, member).ok_or_else(|| {
                    Diagnostic::codegen(
                        *line,
                        format!("'{}' has no member '{}'", type_name, member),
                    )
                })?;
                Ok((base + info.offset, info.ty))
            }
            other => Err(Diagnostic::codegen(
                other.line(),
                "expected a variable or member path".to_string(),
            )),
        }
    }

    /// LOAD/STORE width suffix for a value of this type. Member accesses use
    /// the member's recorded size.
    pub fn suffix_for(&self, ty: &DataType, line: u32) -> Result<u16, Diagnostic> {
        match ty {
            DataType::Elementary(e) => Ok(e.load_suffix()),
            DataType::Array { .. } => Err(Diagnostic::codegen(
                line,
                "an array cannot be loaded as a single value".to_string(),
            )),
            DataType::Named(name) => Err(Diagnostic::codegen(
                line,
                format!("'{}' instances cannot be loaded as a single value", name),
            )),
        }
    }

    /// Whether `name` refers to a callable: a built-in or user function.
    pub fn is_function(&self, name: &str) -> bool {
        self.functions.contains_key(name) || builtin_function(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn table(source: &str) -> SymbolTable {
        let unit = parse(source).unwrap_or_else(|e| panic!("parse: {}", e));
        SymbolTable::build(&unit, None).unwrap_or_else(|e| panic!("build: {}", e))
    }

    #[test]
    fn test_scalars_precede_composites() {
        // Mirrors the blinky layout: the BOOL goes to the window base even
        // though the timer instance is declared first.
        let t = table(
            "PROGRAM Blinky\n\
             VAR BlinkTimer : TON; LedState : BOOL := FALSE; END_VAR\n\
             VAR_OUTPUT LED_Output AT %Q0.0 : BOOL; END_VAR\n\
             END_PROGRAM",
        );
        let led_state = t.lookup_scoped(None, "LedState").unwrap();
        assert_eq!((led_state.address, led_state.size), (0x2000, 1));
        let timer = t.lookup_scoped(None, "BlinkTimer").unwrap();
        assert_eq!((timer.address, timer.size), (0x2001, 16));
        let led = t.lookup_scoped(None, "LED_Output").unwrap();
        assert_eq!(led.address, 0x1000);
    }

    #[test]
    fn test_alignment_of_scalars() {
        let t = table(
            "PROGRAM P VAR a : BOOL; b : INT; c : BOOL; d : DINT; END_VAR END_PROGRAM",
        );
        assert_eq!(t.lookup_scoped(None, "a").unwrap().address, 0x2000);
        assert_eq!(t.lookup_scoped(None, "b").unwrap().address, 0x2002);
        assert_eq!(t.lookup_scoped(None, "c").unwrap().address, 0x2004);
        assert_eq!(t.lookup_scoped(None, "d").unwrap().address, 0x2008);
    }

    #[test]
    fn test_symbol_ranges_are_disjoint() {
        let t = table(
            "PROGRAM P\n\
             VAR a : BOOL; t1 : TON; b : INT; pid : PID_Compact; c : ARRAY[1..5] OF DINT; END_VAR\n\
             END_PROGRAM",
        );
        let work: Vec<&Symbol> = t.symbols().iter().filter(|s| s.io.is_none()).collect();
        for (i, a) in work.iter().enumerate() {
            for b in &work[i + 1..] {
                let disjoint =
                    a.address + a.size <= b.address || b.address + b.size <= a.address;
                assert!(disjoint, "{} overlaps {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_io_bit_expansion() {
        let t = table(
            "PROGRAM P\n\
             VAR_INPUT start AT %IX1.3 : BOOL; level AT %IW2 : INT; END_VAR\n\
             VAR_OUTPUT motor AT %Q0.5 : BOOL; END_VAR\n\
             END_PROGRAM",
        );
        assert_eq!(t.lookup_scoped(None, "start").unwrap().address, 1 * 8 + 3);
        assert_eq!(t.lookup_scoped(None, "level").unwrap().address, 4);
        assert_eq!(t.lookup_scoped(None, "motor").unwrap().address, 0x1000 + 5);
    }

    #[test]
    fn test_retain_allocation() {
        let t = table("PROGRAM P VAR_RETAIN total : DINT; count : INT; END_VAR END_PROGRAM");
        assert_eq!(t.lookup_scoped(None, "total").unwrap().address, 0x4000);
        assert_eq!(t.lookup_scoped(None, "count").unwrap().address, 0x4004);
    }

    #[test]
    fn test_struct_layout() {
        let t = table(
            "TYPE Reading : STRUCT flag : BOOL; value : REAL; id : INT; END_STRUCT; END_TYPE\n\
             PROGRAM P VAR r : Reading; END_VAR END_PROGRAM",
        );
        let def = t.struct_def("Reading").unwrap();
        assert_eq!(def.member("flag").unwrap().offset, 0);
        assert_eq!(def.member("value").unwrap().offset, 4);
        assert_eq!(def.member("id").unwrap().offset, 8);
        assert_eq!(def.size, 10);
    }

    #[test]
    fn test_user_fb_layout_concatenates_sections() {
        let t = table(
            "FUNCTION_BLOCK Debounce\n\
             VAR_INPUT raw : BOOL; window : TIME; END_VAR\n\
             VAR_OUTPUT clean : BOOL; END_VAR\n\
             VAR since : TIME; END_VAR\n\
             clean := raw;\n\
             END_FUNCTION_BLOCK\n\
             PROGRAM P VAR d : Debounce; END_VAR END_PROGRAM",
        );
        let def = t.user_fb_def("Debounce").unwrap();
        assert_eq!(def.member("raw").unwrap().offset, 0);
        assert_eq!(def.member("window").unwrap().offset, 4);
        assert_eq!(def.member("clean").unwrap().offset, 8);
        assert_eq!(def.member("since").unwrap().offset, 12);
        assert_eq!(def.size, 16);
    }

    #[test]
    fn test_member_path_resolution() {
        let t = table(
            "PROGRAM P VAR x : BOOL; t : TON; END_VAR END_PROGRAM",
        );
        let expr = Expression::Member {
            object: Box::new(Expression::Ident { name: "t".to_string(), line: 1 }),
            member: "Q".to_string(),
            line: 1,
        };
        let (address, ty) = t.resolve_member_path(&expr, None).unwrap();
        let base = t.lookup_scoped(None, "t").unwrap().address;
        assert_eq!(address, base + 1);
        assert_eq!(ty, DataType::BOOL);
    }

    #[test]
    fn test_nested_struct_path() {
        let t = table(
            "TYPE Inner : STRUCT n : INT; END_STRUCT; END_TYPE\n\
             TYPE Outer : STRUCT pre : DINT; inner : Inner; END_STRUCT; END_TYPE\n\
             PROGRAM P VAR o : Outer; END_VAR END_PROGRAM",
        );
        let expr = Expression::Member {
            object: Box::new(Expression::Member {
                object: Box::new(Expression::Ident { name: "o".to_string(), line: 1 }),
                member: "inner".to_string(),
                line: 1,
            }),
            member: "n".to_string(),
            line: 1,
        };
        let (address, ty) = t.resolve_member_path(&expr, None).unwrap();
        let base = t.lookup_scoped(None, "o").unwrap().address;
        assert_eq!(address, base + 4);
        assert_eq!(ty, DataType::INT);
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let unit = parse("PROGRAM P VAR x : INT; x : BOOL; END_VAR END_PROGRAM").unwrap();
        let err = SymbolTable::build(&unit, None).unwrap_err();
        assert!(err.message.contains("duplicate symbol 'x'"));
    }

    #[test]
    fn test_undefined_type_rejected() {
        let unit = parse("PROGRAM P VAR x : Widget; END_VAR END_PROGRAM").unwrap();
        let err = SymbolTable::build(&unit, None).unwrap_err();
        assert!(err.message.contains("undefined type 'Widget'"));
    }

    #[test]
    fn test_function_scope_and_result_slot() {
        let t = table(
            "FUNCTION Add2 : INT\n\
             VAR_INPUT a : INT; b : INT; END_VAR\n\
             Add2 := a + b;\n\
             END_FUNCTION\n\
             PROGRAM P VAR a : DINT; END_VAR END_PROGRAM",
        );
        let scope = t.function_scope("Add2").unwrap();
        assert_eq!(scope.params, vec!["a", "b"]);
        // the function's `a` and the program's `a` are distinct symbols
        let inner = t.lookup_scoped(Some("Add2"), "a").unwrap();
        let outer = t.lookup_scoped(None, "a").unwrap();
        assert_ne!(inner.address, outer.address);
        assert_eq!(inner.ty, DataType::INT);
        assert_eq!(outer.ty, DataType::DINT);
        // result slot carries the function's name
        assert!(t.lookup_scoped(Some("Add2"), "Add2").is_some());
    }

    #[test]
    fn test_window_confinement() {
        let unit = parse(
            "PROGRAM P VAR big : ARRAY[1..200] OF DINT; END_VAR END_PROGRAM",
        )
        .unwrap();
        // 800 bytes cannot fit a 256-byte window
        let err = SymbolTable::build(&unit, Some(0x2100)).unwrap_err();
        assert!(err.message.contains("work memory overflow"));
        // but fits the full region
        assert!(SymbolTable::build(&unit, None).is_ok());
    }

    #[test]
    fn test_globals_allocate_before_program_vars() {
        let t = table(
            "VAR_GLOBAL shared : DINT; END_VAR\n\
             PROGRAM P VAR local : INT; END_VAR END_PROGRAM",
        );
        assert_eq!(t.lookup_scoped(None, "shared").unwrap().address, 0x2000);
        assert_eq!(t.lookup_scoped(None, "local").unwrap().address, 0x2004);
    }
}

use crate::{
    bytecode::{make, Instructions, Opcode},
    object::{CompiledFunction, Object, BUILTINS},
    parser::{Expression, Literal, Operator, Statement},
};
use anyhow::{bail, Result};
use std::{collections::HashMap, mem, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    pub store: HashMap<String, Symbol>,
    pub num_definitions: usize,
    pub outer: Option<Box<SymbolTable>>,
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Default::default()
        }
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_some() {
            SymbolScope::Local
        } else {
            SymbolScope::Global
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Binds the name a function is being `let`-bound to inside its own
    /// body, so the function can call itself without a global lookup.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        if let Some(ref mut outer) = self.outer {
            if let Some(symbol) = outer.resolve(name) {
                if symbol.scope == SymbolScope::Global || symbol.scope == SymbolScope::Builtin {
                    return Some(symbol);
                }
                // A local of an enclosing function: record it as a free
                // variable at every intermediate scope so closure
                // construction can capture it.
                return Some(self.define_free(symbol));
            }
        }
        None
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

#[derive(Debug)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    scope_index: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }
        Self::new_with_state(symbol_table, Vec::new())
    }

    /// Resumes compilation against an existing symbol table and constant
    /// pool, which is how the REPL keeps bindings alive across lines.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
            scope_index: 0,
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbol_table, self.constants)
    }

    pub fn compile(&mut self, program: &[Statement]) -> Result<Bytecode> {
        for statement in program {
            self.compile_statement(statement)?;
        }
        Ok(self.bytecode())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[self.scope_index].instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[]);
            }
            Statement::Let(name, value) => {
                // The symbol is defined before its value is compiled so the
                // value can refer to the binding (self-recursion).
                let symbol = self.symbol_table.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index]),
                    _ => self.emit(Opcode::SetLocal, &[symbol.index]),
                };
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[]);
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> Result<()> {
        match expression {
            Expression::Identifier(name) => {
                let symbol = match self.symbol_table.resolve(name) {
                    Some(symbol) => symbol,
                    None => bail!("undefined variable {}", name),
                };
                self.load_symbol(&symbol);
            }
            Expression::Literal(literal) => self.compile_literal(literal)?,
            Expression::Boolean(value) => {
                let opcode = if *value { Opcode::True } else { Opcode::False };
                self.emit(opcode, &[]);
            }
            Expression::Prefix(operator, operand) => {
                self.compile_expression(operand)?;
                match operator {
                    Operator::Negate => self.emit(Opcode::Minus, &[]),
                    Operator::Not => self.emit(Opcode::Bang, &[]),
                    operator => bail!("unknown operator {}", operator),
                };
            }
            Expression::Infix(left, operator, right) => {
                self.compile_infix(left, operator, right)?;
            }
            Expression::If(condition, consequence, alternative) => {
                self.compile_if(condition, consequence, alternative.as_deref())?;
            }
            Expression::Function {
                name,
                parameters,
                body,
            } => self.compile_function(name.as_deref(), parameters, body)?,
            Expression::Call(function, arguments) => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()]);
            }
            Expression::Index(left, index) => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
            }
        }
        Ok(())
    }

    fn compile_literal(&mut self, literal: &Literal) -> Result<()> {
        match literal {
            Literal::Integer(value) => {
                let constant = self.add_constant(Object::Integer(*value));
                self.emit(Opcode::Constant, &[constant]);
            }
            Literal::String(value) => {
                let constant = self.add_constant(Object::string(value.clone()));
                self.emit(Opcode::Constant, &[constant]);
            }
            Literal::Array(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
            }
            Literal::Hash(pairs) => {
                // Key order is source-order-independent: sort by the key's
                // textual form so emission is deterministic.
                let mut pairs = pairs.iter().collect::<Vec<_>>();
                pairs.sort_by_key(|(key, _)| key.to_string());
                for (key, value) in pairs.iter() {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2]);
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        left: &Expression,
        operator: &Operator,
        right: &Expression,
    ) -> Result<()> {
        if *operator == Operator::LessThan {
            // `a < b` compiles as `b > a`; there is no less-than opcode.
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Opcode::GreaterThan, &[]);
            return Ok(());
        }
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        match operator {
            Operator::Add => self.emit(Opcode::Add, &[]),
            Operator::Subtract => self.emit(Opcode::Sub, &[]),
            Operator::Multiply => self.emit(Opcode::Mul, &[]),
            Operator::Divide => self.emit(Opcode::Div, &[]),
            Operator::GreaterThan => self.emit(Opcode::GreaterThan, &[]),
            Operator::Equal => self.emit(Opcode::Equal, &[]),
            Operator::NotEqual => self.emit(Opcode::NotEqual, &[]),
            operator => bail!("unknown operator {}", operator),
        };
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &[Statement],
        alternative: Option<&[Statement]>,
    ) -> Result<()> {
        self.compile_expression(condition)?;

        // Placeholder target, backpatched once the consequence is laid down.
        let jump_not_truthy_position = self.emit(Opcode::JumpNotTruthy, &[9999]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        }

        let jump_position = self.emit(Opcode::Jump, &[9999]);

        let after_consequence = self.current_instructions().len();
        self.change_operand(jump_not_truthy_position, after_consequence)?;

        match alternative {
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }
            }
            None => {
                self.emit(Opcode::Null, &[]);
            }
        }

        let after_alternative = self.current_instructions().len();
        self.change_operand(jump_position, after_alternative)?;

        Ok(())
    }

    fn compile_function(
        &mut self,
        name: Option<&str>,
        parameters: &[String],
        body: &[Statement],
    ) -> Result<()> {
        self.enter_scope();

        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in parameters {
            self.symbol_table.define(parameter);
        }

        self.compile_block(body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table.num_definitions;
        let instructions = self.leave_scope();

        // Each captured free variable is loaded in the enclosing scope, in
        // capture order, for OpClosure to pick up.
        for symbol in free_symbols.iter() {
            self.load_symbol(symbol);
        }

        let function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        };
        let constant = self.add_constant(Object::CompiledFunction(Rc::new(function)));
        self.emit(Opcode::Closure, &[constant, free_symbols.len()]);

        Ok(())
    }

    fn compile_block(&mut self, block: &[Statement]) -> Result<()> {
        for statement in block {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        };
    }

    fn add_constant(&mut self, object: Object) -> usize {
        self.constants.push(object);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.add_instruction(&instruction);
        self.set_last_instruction(op, position);
        position
    }

    fn add_instruction(&mut self, instruction: &[u8]) -> usize {
        let position = self.current_instructions().len();
        self.scopes[self.scope_index]
            .instructions
            .extend_from_slice(instruction);
        position
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scopes[self.scope_index].instructions
    }

    fn set_last_instruction(&mut self, opcode: Opcode, position: usize) {
        let scope = &mut self.scopes[self.scope_index];
        scope.previous_instruction = scope.last_instruction.take();
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        self.scopes[self.scope_index]
            .last_instruction
            .map_or(false, |last| last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = &mut self.scopes[self.scope_index];
        if let Some(last) = scope.last_instruction.take() {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction.take();
        }
    }

    fn replace_instruction(&mut self, position: usize, new_instruction: &[u8]) {
        let instructions = &mut self.scopes[self.scope_index].instructions;
        instructions[position..position + new_instruction.len()].copy_from_slice(new_instruction);
    }

    fn change_operand(&mut self, op_position: usize, operand: usize) -> Result<()> {
        let op = Opcode::from_byte(self.current_instructions()[op_position])?;
        self.replace_instruction(op_position, &make(op, &[operand]));
        Ok(())
    }

    fn replace_last_pop_with_return(&mut self) {
        let position = match self.scopes[self.scope_index].last_instruction {
            Some(last) => last.position,
            None => return,
        };
        self.replace_instruction(position, &make(Opcode::ReturnValue, &[]));
        if let Some(last) = self.scopes[self.scope_index].last_instruction.as_mut() {
            last.opcode = Opcode::ReturnValue;
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.scope_index += 1;
        let outer = mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().unwrap_or_default();
        self.scope_index -= 1;
        if let Some(outer) = self.symbol_table.outer.take() {
            self.symbol_table = *outer;
        }
        scope.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::disassemble, Lexer, Parser};

    fn compile(input: &str) -> Result<Bytecode> {
        let tokens = Lexer::new(input).tokenize()?;
        let program = Parser::new(&tokens).parse()?;
        Compiler::new().compile(&program)
    }

    fn assert_instructions(bytecode: &Bytecode, expected: &[Vec<u8>]) {
        assert_eq!(
            disassemble(&bytecode.instructions),
            disassemble(&expected.concat())
        );
    }

    fn assert_function_constant(constant: &Object, expected: &[Vec<u8>]) {
        match constant {
            Object::CompiledFunction(function) => {
                assert_eq!(
                    disassemble(&function.instructions),
                    disassemble(&expected.concat())
                );
            }
            other => panic!("expected compiled function constant, got {:?}", other),
        }
    }

    #[test]
    fn test_define() {
        let mut global = SymbolTable::new();
        let a = global.define("a");
        assert_eq!(
            a,
            Symbol {
                name: "a".to_string(),
                scope: SymbolScope::Global,
                index: 0
            }
        );
        let b = global.define("b");
        assert_eq!(
            b,
            Symbol {
                name: "b".to_string(),
                scope: SymbolScope::Global,
                index: 1
            }
        );

        let mut first_local = SymbolTable::new_enclosed(global);
        let c = first_local.define("c");
        assert_eq!(
            c,
            Symbol {
                name: "c".to_string(),
                scope: SymbolScope::Local,
                index: 0
            }
        );

        let mut second_local = SymbolTable::new_enclosed(first_local);
        let d = second_local.define("d");
        assert_eq!(
            d,
            Symbol {
                name: "d".to_string(),
                scope: SymbolScope::Local,
                index: 0
            }
        );
    }

    #[test]
    fn test_resolve_global() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");

        assert_eq!(
            global.resolve("a"),
            Some(Symbol {
                name: "a".to_string(),
                scope: SymbolScope::Global,
                index: 0
            })
        );
        assert_eq!(
            global.resolve("b"),
            Some(Symbol {
                name: "b".to_string(),
                scope: SymbolScope::Global,
                index: 1
            })
        );
        assert_eq!(global.resolve("c"), None);
    }

    #[test]
    fn test_resolve_nested_local() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define("b");
        let mut second_local = SymbolTable::new_enclosed(first_local);
        second_local.define("c");

        assert_eq!(
            second_local.resolve("c"),
            Some(Symbol {
                name: "c".to_string(),
                scope: SymbolScope::Local,
                index: 0
            })
        );
        assert_eq!(
            second_local.resolve("a"),
            Some(Symbol {
                name: "a".to_string(),
                scope: SymbolScope::Global,
                index: 0
            })
        );
        // b lives in the enclosing function, so it resolves as a free
        // variable here.
        assert_eq!(
            second_local.resolve("b"),
            Some(Symbol {
                name: "b".to_string(),
                scope: SymbolScope::Free,
                index: 0
            })
        );
        assert_eq!(second_local.free_symbols.len(), 1);
        assert_eq!(second_local.free_symbols[0].scope, SymbolScope::Local);
    }

    #[test]
    fn test_resolve_builtins() {
        let mut global = SymbolTable::new();
        global.define_builtin(0, "len");
        global.define_builtin(1, "puts");

        let mut local = SymbolTable::new_enclosed(global);
        assert_eq!(
            local.resolve("len"),
            Some(Symbol {
                name: "len".to_string(),
                scope: SymbolScope::Builtin,
                index: 0
            })
        );
        assert_eq!(
            local.resolve("puts"),
            Some(Symbol {
                name: "puts".to_string(),
                scope: SymbolScope::Builtin,
                index: 1
            })
        );
    }

    #[test]
    fn test_resolve_free() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut first_local = SymbolTable::new_enclosed(global);
        first_local.define("c");
        let mut second_local = SymbolTable::new_enclosed(first_local);
        second_local.define("e");
        second_local.define("f");

        assert_eq!(
            second_local.resolve("c"),
            Some(Symbol {
                name: "c".to_string(),
                scope: SymbolScope::Free,
                index: 0
            })
        );
        assert_eq!(
            second_local.resolve("e"),
            Some(Symbol {
                name: "e".to_string(),
                scope: SymbolScope::Local,
                index: 0
            })
        );
        assert_eq!(
            second_local.resolve("a"),
            Some(Symbol {
                name: "a".to_string(),
                scope: SymbolScope::Global,
                index: 0
            })
        );
    }

    #[test]
    fn test_define_and_resolve_function_name() {
        let mut global = SymbolTable::new();
        global.define_function_name("a");
        assert_eq!(
            global.resolve("a"),
            Some(Symbol {
                name: "a".to_string(),
                scope: SymbolScope::Function,
                index: 0
            })
        );
    }

    #[test]
    fn test_shadowing_function_name() {
        let mut global = SymbolTable::new();
        global.define_function_name("a");
        global.define("a");
        assert_eq!(
            global.resolve("a"),
            Some(Symbol {
                name: "a".to_string(),
                scope: SymbolScope::Global,
                index: 0
            })
        );
    }

    #[test]
    fn test_integer_arithmetic() -> Result<()> {
        let bytecode = compile("1 + 2")?;
        assert_eq!(
            bytecode.constants,
            vec![Object::Integer(1), Object::Integer(2)]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("1; 2")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Pop, &[]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("-1")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Minus, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_boolean_expressions() -> Result<()> {
        let bytecode = compile("true")?;
        assert_instructions(
            &bytecode,
            &[make(Opcode::True, &[]), make(Opcode::Pop, &[])],
        );

        let bytecode = compile("1 > 2")?;
        assert_eq!(
            bytecode.constants,
            vec![Object::Integer(1), Object::Integer(2)]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::GreaterThan, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        // `<` swaps its operands and reuses OpGreaterThan.
        let bytecode = compile("1 < 2")?;
        assert_eq!(
            bytecode.constants,
            vec![Object::Integer(2), Object::Integer(1)]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::GreaterThan, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("!true")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::True, &[]),
                make(Opcode::Bang, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_conditionals() -> Result<()> {
        let bytecode = compile("if (true) { 10 }; 3333;")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::True, &[]),
                make(Opcode::JumpNotTruthy, &[10]),
                make(Opcode::Constant, &[0]),
                make(Opcode::Jump, &[11]),
                make(Opcode::Null, &[]),
                make(Opcode::Pop, &[]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("if (true) { 10 } else { 20 }; 3333;")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::True, &[]),
                make(Opcode::JumpNotTruthy, &[10]),
                make(Opcode::Constant, &[0]),
                make(Opcode::Jump, &[13]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Pop, &[]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_global_let_statements() -> Result<()> {
        let bytecode = compile("let one = 1; let two = 2;")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::SetGlobal, &[1]),
            ],
        );

        let bytecode = compile("let one = 1; one;")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_string_expressions() -> Result<()> {
        let bytecode = compile("\"ri\" + \"me\"")?;
        assert_eq!(
            bytecode.constants,
            vec![Object::string("ri"), Object::string("me")]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
        Ok(())
    }

    #[test]
    fn test_array_literals() -> Result<()> {
        let bytecode = compile("[]")?;
        assert_instructions(
            &bytecode,
            &[make(Opcode::Array, &[0]), make(Opcode::Pop, &[])],
        );

        let bytecode = compile("[1 + 2, 3 - 4, 5 * 6]")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Constant, &[3]),
                make(Opcode::Sub, &[]),
                make(Opcode::Constant, &[4]),
                make(Opcode::Constant, &[5]),
                make(Opcode::Mul, &[]),
                make(Opcode::Array, &[3]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_hash_literals() -> Result<()> {
        let bytecode = compile("{}")?;
        assert_instructions(
            &bytecode,
            &[make(Opcode::Hash, &[0]), make(Opcode::Pop, &[])],
        );

        let bytecode = compile("{1: 2, 3: 4, 5: 6}")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Constant, &[3]),
                make(Opcode::Constant, &[4]),
                make(Opcode::Constant, &[5]),
                make(Opcode::Hash, &[6]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_index_expressions() -> Result<()> {
        let bytecode = compile("[1, 2, 3][1 + 1]")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Array, &[3]),
                make(Opcode::Constant, &[3]),
                make(Opcode::Constant, &[4]),
                make(Opcode::Add, &[]),
                make(Opcode::Index, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
        Ok(())
    }

    #[test]
    fn test_functions() -> Result<()> {
        let bytecode = compile("fn() { return 5 + 10 }")?;
        assert_function_constant(
            &bytecode.constants[2],
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_instructions(
            &bytecode,
            &[make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
        );

        // The trailing expression's Pop becomes an implicit return.
        let bytecode = compile("fn() { 5 + 10 }")?;
        assert_function_constant(
            &bytecode.constants[2],
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        let bytecode = compile("fn() { 1; 2 }")?;
        assert_function_constant(
            &bytecode.constants[2],
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Pop, &[]),
                make(Opcode::Constant, &[1]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        let bytecode = compile("fn() { }")?;
        assert_function_constant(&bytecode.constants[0], &[make(Opcode::Return, &[])]);

        Ok(())
    }

    #[test]
    fn test_function_calls() -> Result<()> {
        let bytecode = compile("fn() { 24 }();")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Closure, &[1, 0]),
                make(Opcode::Call, &[0]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("let oneArg = fn(a) { a }; oneArg(24);")?;
        assert_function_constant(
            &bytecode.constants[0],
            &[
                make(Opcode::GetLocal, &[0]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Closure, &[0, 0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("let manyArg = fn(a, b, c) { a; b; c }; manyArg(24, 25, 26);")?;
        assert_function_constant(
            &bytecode.constants[0],
            &[
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Pop, &[]),
                make(Opcode::GetLocal, &[1]),
                make(Opcode::Pop, &[]),
                make(Opcode::GetLocal, &[2]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_let_statement_scopes() -> Result<()> {
        let bytecode = compile("let num = 55; fn() { num }")?;
        assert_function_constant(
            &bytecode.constants[1],
            &[
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        let bytecode = compile("fn() { let num = 55; num }")?;
        assert_function_constant(
            &bytecode.constants[1],
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::SetLocal, &[0]),
                make(Opcode::GetLocal, &[0]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        let bytecode = compile("fn() { let a = 55; let b = 77; a + b }")?;
        assert_function_constant(
            &bytecode.constants[2],
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::SetLocal, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::SetLocal, &[1]),
                make(Opcode::GetLocal, &[0]),
                make(Opcode::GetLocal, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_builtins() -> Result<()> {
        let bytecode = compile("len([]); push([], 1);")?;
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::GetBuiltin, &[0]),
                make(Opcode::Array, &[0]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
                make(Opcode::GetBuiltin, &[5]),
                make(Opcode::Array, &[0]),
                make(Opcode::Constant, &[0]),
                make(Opcode::Call, &[2]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("fn() { len([]) }")?;
        assert_function_constant(
            &bytecode.constants[0],
            &[
                make(Opcode::GetBuiltin, &[0]),
                make(Opcode::Array, &[0]),
                make(Opcode::Call, &[1]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_closures() -> Result<()> {
        let bytecode = compile("fn(a) { fn(b) { a + b } }")?;
        assert_function_constant(
            &bytecode.constants[0],
            &[
                make(Opcode::GetFree, &[0]),
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Add, &[]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_function_constant(
            &bytecode.constants[1],
            &[
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Closure, &[0, 1]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_instructions(
            &bytecode,
            &[make(Opcode::Closure, &[1, 0]), make(Opcode::Pop, &[])],
        );

        let bytecode = compile("fn(a) { fn(b) { fn(c) { a + b + c } } }")?;
        assert_function_constant(
            &bytecode.constants[0],
            &[
                make(Opcode::GetFree, &[0]),
                make(Opcode::GetFree, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Add, &[]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_function_constant(
            &bytecode.constants[1],
            &[
                make(Opcode::GetFree, &[0]),
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Closure, &[0, 2]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_function_constant(
            &bytecode.constants[2],
            &[
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Closure, &[1, 1]),
                make(Opcode::ReturnValue, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_recursive_functions() -> Result<()> {
        let bytecode = compile("let countDown = fn(x) { countDown(x - 1); }; countDown(1);")?;
        assert_function_constant(
            &bytecode.constants[1],
            &[
                make(Opcode::CurrentClosure, &[]),
                make(Opcode::GetLocal, &[0]),
                make(Opcode::Constant, &[0]),
                make(Opcode::Sub, &[]),
                make(Opcode::Call, &[1]),
                make(Opcode::ReturnValue, &[]),
            ],
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Closure, &[1, 0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );

        Ok(())
    }

    #[test]
    fn test_compiler_scopes() {
        let mut compiler = Compiler::new();
        assert_eq!(compiler.scope_index, 0);

        compiler.emit(Opcode::Mul, &[]);
        assert_eq!(compiler.scopes[0].instructions.len(), 1);

        compiler.enter_scope();
        assert_eq!(compiler.scope_index, 1);
        assert!(compiler.symbol_table.outer.is_some());

        compiler.emit(Opcode::Sub, &[]);
        assert_eq!(compiler.scopes[1].instructions.len(), 1);
        assert!(compiler.last_instruction_is(Opcode::Sub));

        compiler.leave_scope();
        assert_eq!(compiler.scope_index, 0);
        assert!(compiler.symbol_table.outer.is_none());

        compiler.emit(Opcode::Add, &[]);
        assert_eq!(compiler.scopes[0].instructions.len(), 2);
        assert!(compiler.last_instruction_is(Opcode::Add));
    }

    #[test]
    fn test_undefined_variable() {
        let error = compile("foo").unwrap_err();
        assert_eq!(error.to_string(), "undefined variable foo");
    }
}

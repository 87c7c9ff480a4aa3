use crate::{
    bytecode::{read_u16, read_u8, Instructions, Opcode},
    compiler::Bytecode,
    object::{Builtin, Closure, CompiledFunction, HashPair, Object, BUILTINS},
};
use anyhow::{bail, Result};
use std::{collections::BTreeMap, rc::Rc};

const STACK_SIZE: usize = 2048;
const GLOBALS_SIZE: usize = 65536;
const MAX_FRAMES: usize = 1024;

#[derive(Debug, Clone)]
pub struct Frame {
    closure: Rc<Closure>,
    // Pre-incremented before each fetch, so execution starts at -1 and jump
    // targets are stored as the target address minus one.
    ip: i64,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: -1,
            base_pointer,
        }
    }

    fn instructions(&self) -> &Instructions {
        &self.closure.function.instructions
    }
}

pub struct VirtualMachine {
    constants: Vec<Object>,
    stack: Vec<Object>,
    stack_pointer: usize,
    globals: Vec<Object>,
    frames: Vec<Frame>,
    frame_index: usize,
}

impl VirtualMachine {
    pub fn new(bytecode: Bytecode) -> Self {
        let main_function = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main_closure = Closure {
            function: Rc::new(main_function),
            free: Vec::new(),
        };

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(Rc::new(main_closure), 0));

        Self {
            constants: bytecode.constants,
            stack: vec![Object::Null; STACK_SIZE],
            stack_pointer: 0,
            globals: vec![Object::Null; GLOBALS_SIZE],
            frames,
            frame_index: 1,
        }
    }

    /// Runs against an existing globals vector, which is how the REPL keeps
    /// `let` bindings alive across lines.
    pub fn new_with_globals(bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let mut vm = Self::new(bytecode);
        vm.globals = globals;
        vm
    }

    pub fn new_globals() -> Vec<Object> {
        vec![Object::Null; GLOBALS_SIZE]
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// The value most recently removed from the stack. Expression statements
    /// end with OpPop, so after a run this is the program's result.
    pub fn last_popped(&self) -> Object {
        self.stack[self.stack_pointer].clone()
    }

    pub fn run(&mut self) -> Result<()> {
        while self.frame_index > 0
            && self.current_frame().ip < self.current_frame().instructions().len() as i64 - 1
        {
            self.current_frame_mut().ip += 1;
            let ip = self.current_frame().ip as usize;
            let op = Opcode::from_byte(self.current_frame().instructions()[ip])?;
            match op {
                Opcode::Constant => {
                    let constant_index =
                        read_u16(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let constant = self.constants[constant_index].clone();
                    self.push(constant)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(op)?;
                }
                Opcode::True => self.push(Object::Boolean(true))?,
                Opcode::False => self.push(Object::Boolean(false))?,
                Opcode::Null => self.push(Object::Null)?,
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    self.execute_comparison(op)?;
                }
                Opcode::Bang => {
                    let value = self.pop()?;
                    self.push(Object::Boolean(!value.is_truthy()))?;
                }
                Opcode::Minus => {
                    let value = self.pop()?;
                    match value {
                        Object::Integer(value) => self.push(Object::Integer(-value))?,
                        other => {
                            bail!("unsupported type for negation: {}", other.type_name())
                        }
                    }
                }
                Opcode::Jump => {
                    let target = read_u16(&self.current_frame().instructions()[ip + 1..]) as i64;
                    self.current_frame_mut().ip = target - 1;
                }
                Opcode::JumpNotTruthy => {
                    let target = read_u16(&self.current_frame().instructions()[ip + 1..]) as i64;
                    self.current_frame_mut().ip += 2;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target - 1;
                    }
                }
                Opcode::SetGlobal => {
                    let global_index =
                        read_u16(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    self.globals[global_index] = self.pop()?;
                }
                Opcode::GetGlobal => {
                    let global_index =
                        read_u16(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let global = self.globals[global_index].clone();
                    self.push(global)?;
                }
                Opcode::Array => {
                    let count = read_u16(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let elements =
                        self.stack[self.stack_pointer - count..self.stack_pointer].to_vec();
                    self.stack_pointer -= count;
                    self.push(Object::array(elements))?;
                }
                Opcode::Hash => {
                    let count = read_u16(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let mut pairs = BTreeMap::new();
                    for _ in 0..count / 2 {
                        let value = self.pop()?;
                        let key = self.pop()?;
                        let hash_key = match key.hash_key() {
                            Some(hash_key) => hash_key,
                            None => bail!("unusable as hash key: {}", key.type_name()),
                        };
                        pairs.insert(hash_key, HashPair { key, value });
                    }
                    self.push(Object::Hash(Rc::new(pairs)))?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }
                Opcode::Call => {
                    let num_args = read_u8(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let callee = self.stack[self.stack_pointer - 1 - num_args].clone();
                    match callee {
                        Object::Closure(closure) => self.call_closure(closure, num_args)?,
                        Object::Builtin(builtin) => self.call_builtin(builtin, num_args)?,
                        _ => bail!("calling non-closure and non-builtin"),
                    }
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop()?;
                    let frame = self.pop_frame();
                    self.finish_return(frame, return_value)?;
                }
                Opcode::Return => {
                    let frame = self.pop_frame();
                    self.finish_return(frame, Object::Null)?;
                }
                Opcode::SetLocal => {
                    let local_index =
                        read_u8(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let base_pointer = self.current_frame().base_pointer;
                    self.stack[base_pointer + local_index] = self.pop()?;
                }
                Opcode::GetLocal => {
                    let local_index =
                        read_u8(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let base_pointer = self.current_frame().base_pointer;
                    let local = self.stack[base_pointer + local_index].clone();
                    self.push(local)?;
                }
                Opcode::GetBuiltin => {
                    let builtin_index =
                        read_u8(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    self.push(Object::Builtin(BUILTINS[builtin_index]))?;
                }
                Opcode::Closure => {
                    let constant_index =
                        read_u16(&self.current_frame().instructions()[ip + 1..]) as usize;
                    let num_free = read_u8(&self.current_frame().instructions()[ip + 3..]) as usize;
                    self.current_frame_mut().ip += 3;

                    let function = match self.constants[constant_index].clone() {
                        Object::CompiledFunction(function) => function,
                        other => bail!("not a function: {}", other.type_name()),
                    };
                    let free = self.stack[self.stack_pointer - num_free..self.stack_pointer]
                        .to_vec();
                    self.stack_pointer -= num_free;
                    self.push(Object::Closure(Rc::new(Closure { function, free })))?;
                }
                Opcode::GetFree => {
                    let free_index =
                        read_u8(&self.current_frame().instructions()[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let free = self.current_frame().closure.free[free_index].clone();
                    self.push(free)?;
                }
                Opcode::CurrentClosure => {
                    let closure = self.current_frame().closure.clone();
                    self.push(Object::Closure(closure))?;
                }
            }
        }
        Ok(())
    }

    fn execute_binary_operation(&mut self, op: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        match (&left, &right) {
            (Object::Integer(left), Object::Integer(right)) => {
                let result = match op {
                    Opcode::Add => left + right,
                    Opcode::Sub => left - right,
                    Opcode::Mul => left * right,
                    Opcode::Div => {
                        if *right == 0 {
                            bail!("division by zero");
                        }
                        left / right
                    }
                    op => bail!("unknown integer operator: {:?}", op),
                };
                self.push(Object::Integer(result))
            }
            (Object::String(left), Object::String(right)) => {
                if op != Opcode::Add {
                    bail!("unknown string operator: {:?}", op);
                }
                self.push(Object::string(format!("{}{}", left, right)))
            }
            _ => bail!(
                "unsupported types for binary operation: {} {}",
                left.type_name(),
                right.type_name()
            ),
        }
    }

    fn execute_comparison(&mut self, op: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        if let (Object::Integer(left), Object::Integer(right)) = (&left, &right) {
            let result = match op {
                Opcode::Equal => left == right,
                Opcode::NotEqual => left != right,
                Opcode::GreaterThan => left > right,
                op => bail!("unknown operator: {:?}", op),
            };
            return self.push(Object::Boolean(result));
        }
        match op {
            Opcode::Equal => {
                let result = left == right;
                self.push(Object::Boolean(result))
            }
            Opcode::NotEqual => {
                let result = left != right;
                self.push(Object::Boolean(result))
            }
            op => bail!(
                "unknown operator: {:?} ({} {})",
                op,
                left.type_name(),
                right.type_name()
            ),
        }
    }

    fn execute_index_expression(&mut self, left: Object, index: Object) -> Result<()> {
        match (&left, &index) {
            (Object::Array(elements), Object::Integer(index)) => {
                // Out-of-range array access yields null, not an error.
                let element = if *index < 0 || *index as usize >= elements.len() {
                    Object::Null
                } else {
                    elements[*index as usize].clone()
                };
                self.push(element)
            }
            (Object::Hash(pairs), index) => {
                let hash_key = match index.hash_key() {
                    Some(hash_key) => hash_key,
                    None => bail!("unusable as hash key: {}", index.type_name()),
                };
                let value = pairs
                    .get(&hash_key)
                    .map(|pair| pair.value.clone())
                    .unwrap_or(Object::Null);
                self.push(value)
            }
            _ => bail!("index operator not supported: {}", left.type_name()),
        }
    }

    /// Restores the caller's stack after a frame pop. A return from the
    /// top-level frame ends the program; its value lands in the slot
    /// `last_popped` reads, with `stack_pointer` back at zero.
    fn finish_return(&mut self, frame: Frame, return_value: Object) -> Result<()> {
        if self.frame_index == 0 {
            self.stack[0] = return_value;
            self.stack_pointer = 0;
            return Ok(());
        }
        // base_pointer - 1 is the callee's slot; restoring sp there discards
        // the callee along with the locals.
        self.stack_pointer = frame.base_pointer - 1;
        self.push(return_value)
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<()> {
        if num_args != closure.function.num_parameters {
            bail!(
                "wrong number of arguments: want={}, got={}",
                closure.function.num_parameters,
                num_args
            );
        }
        if self.frame_index >= MAX_FRAMES
            || self.stack_pointer - num_args + closure.function.num_locals >= STACK_SIZE
        {
            bail!("stack overflow");
        }
        let num_locals = closure.function.num_locals;
        let frame = Frame::new(closure, self.stack_pointer - num_args);
        let base_pointer = frame.base_pointer;
        self.push_frame(frame);
        self.stack_pointer = base_pointer + num_locals;
        Ok(())
    }

    fn call_builtin(&mut self, builtin: Builtin, num_args: usize) -> Result<()> {
        let args = self.stack[self.stack_pointer - num_args..self.stack_pointer].to_vec();
        let result = (builtin.function)(&args);
        self.stack_pointer -= num_args + 1;
        self.push(result)
    }

    fn current_frame(&self) -> &Frame {
        &self.frames[self.frame_index - 1]
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        &mut self.frames[self.frame_index - 1]
    }

    fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
        self.frame_index += 1;
    }

    fn pop_frame(&mut self) -> Frame {
        self.frame_index -= 1;
        self.frames.pop().unwrap()
    }

    fn push(&mut self, object: Object) -> Result<()> {
        if self.stack_pointer >= STACK_SIZE {
            bail!("stack overflow");
        }
        self.stack[self.stack_pointer] = object;
        self.stack_pointer += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object> {
        if self.stack_pointer == 0 {
            bail!("stack underflow");
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer].clone())
    }
}

use crate::{
    bytecode::Instructions,
    evaluator::Environment,
    flatten,
    parser::{Block, Identifier},
};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    rc::Rc,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<String>),
    Array(Rc<Vec<Object>>),
    Hash(Rc<BTreeMap<HashKey, HashPair>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(Builtin),
    Error(String),
    /// Early-return marker threaded through the tree-walking evaluator.
    Return(Box<Object>),
    /// A function value in the tree-walking evaluator, carrying the
    /// environment it was defined in.
    Function(Vec<Identifier>, Block, Rc<RefCell<Environment>>),
}

impl Object {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(Rc::new(value.into()))
    }

    pub fn array(elements: Vec<Object>) -> Self {
        Self::Array(Rc::new(elements))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "INTEGER",
            Self::Boolean(_) => "BOOLEAN",
            Self::Null => "NULL",
            Self::String(_) => "STRING",
            Self::Array(_) => "ARRAY",
            Self::Hash(_) => "HASH",
            Self::CompiledFunction(_) => "COMPILED_FUNCTION",
            Self::Closure(_) | Self::Function(..) => "FUNCTION",
            Self::Builtin(_) => "BUILTIN",
            Self::Error(_) => "ERROR",
            Self::Return(_) => "RETURN_VALUE",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Boolean(false) | Self::Null)
    }

    /// Integers, booleans, and strings can key a hash; nothing else can.
    pub fn hash_key(&self) -> Option<HashKey> {
        let value = match self {
            Self::Integer(value) => *value as u64,
            Self::Boolean(value) => *value as u64,
            Self::String(value) => fnv1a(value.as_bytes()),
            _ => return None,
        };
        Some(HashKey {
            object_type: self.type_name(),
            value,
        })
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Boolean(value) => write!(f, "{}", value),
            Self::Null => write!(f, "null"),
            Self::String(value) => write!(f, "{}", value),
            Self::Array(elements) => write!(f, "[{}]", flatten(elements, ", ")),
            Self::Hash(pairs) => {
                let pairs = pairs
                    .values()
                    .map(|pair| format!("{}: {}", pair.key, pair.value))
                    .collect::<Vec<_>>();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Self::CompiledFunction(function) => {
                write!(f, "CompiledFunction[{} bytes]", function.instructions.len())
            }
            Self::Closure(closure) => {
                write!(
                    f,
                    "Closure[params={}, free={}]",
                    closure.function.num_parameters,
                    closure.free.len()
                )
            }
            Self::Builtin(builtin) => write!(f, "builtin function '{}'", builtin.name),
            Self::Error(message) => write!(f, "Error: {}", message),
            Self::Return(value) => write!(f, "{}", value),
            Self::Function(parameters, body, _environment) => {
                write!(f, "fn({}) {{ {} }}", parameters.join(", "), flatten(body, " "))
            }
        }
    }
}

/// Key identity for hash maps: the value's type tag plus a 64-bit digest, so
/// equal strings collide with equal strings and never with integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashKey {
    pub object_type: &'static str,
    pub value: u64,
}

/// A hash entry keeps the original key object so inspection can print it.
#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub function: fn(&[Object]) -> Object,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Builtins in their canonical order; `OpGetBuiltin` indexes this table.
pub const BUILTINS: [Builtin; 6] = [
    Builtin {
        name: "len",
        function: builtin_len,
    },
    Builtin {
        name: "puts",
        function: builtin_puts,
    },
    Builtin {
        name: "first",
        function: builtin_first,
    },
    Builtin {
        name: "last",
        function: builtin_last,
    },
    Builtin {
        name: "rest",
        function: builtin_rest,
    },
    Builtin {
        name: "push",
        function: builtin_push,
    },
];

pub fn builtin_by_name(name: &str) -> Option<Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name).copied()
}

fn builtin_len(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_argument_count(args.len(), 1);
    }
    match &args[0] {
        Object::String(value) => Object::Integer(value.len() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => Object::Error(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        )),
    }
}

fn builtin_puts(args: &[Object]) -> Object {
    for arg in args {
        println!("{}", arg);
    }
    Object::Null
}

fn builtin_first(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_argument_count(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => elements.first().cloned().unwrap_or(Object::Null),
        other => not_an_array("first", other),
    }
}

fn builtin_last(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_argument_count(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => elements.last().cloned().unwrap_or(Object::Null),
        other => not_an_array("last", other),
    }
}

fn builtin_rest(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_argument_count(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => {
            if elements.is_empty() {
                Object::Null
            } else {
                Object::array(elements[1..].to_vec())
            }
        }
        other => not_an_array("rest", other),
    }
}

fn builtin_push(args: &[Object]) -> Object {
    if args.len() != 2 {
        return wrong_argument_count(args.len(), 2);
    }
    match &args[0] {
        Object::Array(elements) => {
            let mut elements = elements.as_ref().clone();
            elements.push(args[1].clone());
            Object::array(elements)
        }
        other => not_an_array("push", other),
    }
}

fn wrong_argument_count(got: usize, want: usize) -> Object {
    Object::Error(format!(
        "wrong number of arguments. got={}, want={}",
        got, want
    ))
}

fn not_an_array(builtin_name: &str, other: &Object) -> Object {
    Object::Error(format!(
        "argument to `{}` must be ARRAY, got {}",
        builtin_name,
        other.type_name()
    ))
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

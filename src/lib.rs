mod bytecode;
mod compiler;
mod evaluator;
mod lexer;
mod object;
mod parser;
mod vm;

pub use self::{
    bytecode::*, compiler::*, evaluator::*, lexer::*, object::*, parser::*, vm::*,
};

use std::fmt::Display;

fn flatten(items: &[impl Display], separator: &str) -> String {
    let strings = items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    strings.join(separator)
}

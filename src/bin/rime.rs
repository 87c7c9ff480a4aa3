use anyhow::{Context, Result};
use clap::Parser;
use rime::{Bytecode, Compiler, Lexer, Parser as AstParser, VirtualMachine};
use std::{fs, path::PathBuf};

#[derive(Parser)]
#[command(name = "rime", about = "Compiles and runs a Rime script")]
struct Cli {
    /// Path to the script to execute
    script: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let source = fs::read_to_string(&cli.script)
        .with_context(|| format!("could not read {}", cli.script.display()))?;

    let bytecode = compile_source(&source)
        .with_context(|| format!("could not compile {}", cli.script.display()))?;

    let mut vm = VirtualMachine::new(bytecode);
    vm.run()
        .with_context(|| format!("runtime error in {}", cli.script.display()))?;

    Ok(())
}

fn compile_source(source: &str) -> Result<Bytecode> {
    let tokens = Lexer::new(source).tokenize()?;
    let program = AstParser::new(&tokens).parse()?;
    Compiler::new().compile(&program)
}

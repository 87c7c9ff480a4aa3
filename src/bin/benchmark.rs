use anyhow::{bail, Result};
use clap::Parser;
use rime::{
    evaluate_statements, Compiler, Environment, Lexer, Parser as RimeParser, VirtualMachine,
};
use std::{thread, time::Instant};

const FIBONACCI: &str = r#"
let fibonacci = fn(x) {
    if (x == 0) {
        0
    } else {
        if (x == 1) {
            return 1;
        } else {
            fibonacci(x - 1) + fibonacci(x - 2);
        }
    }
};
fibonacci(35);
"#;

#[derive(Parser)]
#[command(name = "benchmark")]
#[command(about = "Times the fibonacci benchmark on the chosen engine")]
struct Cli {
    /// Execution engine, either 'vm' or 'eval'
    #[arg(long, default_value = "vm")]
    engine: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The evaluator recurses on the host stack, so give it headroom.
    let builder = thread::Builder::new().stack_size(32 * 1024 * 1024);
    let handle = builder.spawn(move || run_benchmark(&cli.engine))?;
    match handle.join() {
        Ok(result) => result,
        Err(_) => bail!("benchmark thread panicked"),
    }
}

fn run_benchmark(engine: &str) -> Result<()> {
    let tokens = Lexer::new(FIBONACCI).tokenize()?;
    let program = RimeParser::new(&tokens).parse()?;

    let (result, duration) = match engine {
        "vm" => {
            let bytecode = Compiler::new().compile(&program)?;
            let mut vm = VirtualMachine::new(bytecode);
            let start = Instant::now();
            vm.run()?;
            (vm.last_popped(), start.elapsed())
        }
        "eval" => {
            let environment = Environment::new_rc(None);
            let start = Instant::now();
            let result = evaluate_statements(&program, environment)?;
            (result, start.elapsed())
        }
        other => bail!("unknown engine '{}', expected 'vm' or 'eval'", other),
    };

    println!(
        "engine={}, result={}, duration={:?}",
        engine, result, duration
    );
    Ok(())
}

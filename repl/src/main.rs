use anyhow::Result;
use rime::{Compiler, Lexer, Object, Parser, SymbolTable, VirtualMachine, BUILTINS};
use rustyline::{error::ReadlineError, Editor};

fn main() -> Result<()> {
    println!(
        r"
Welcome to the Rime programming language REPL!
You may type Rime code below for evaluation.
Enter 'exit' or press 'CTRL+C' to exit the REPL.
    "
    );

    let mut rl = Editor::<()>::new();
    if rl.load_history("history.txt").is_err() {
        println!("No previous history.");
    }

    // Bindings survive across lines: the symbol table, constant pool, and
    // globals vector are threaded through every compile and run.
    let mut symbol_table = SymbolTable::new();
    for (index, builtin) in BUILTINS.iter().enumerate() {
        symbol_table.define_builtin(index, builtin.name);
    }
    let mut constants = Vec::new();
    let mut globals = VirtualMachine::new_globals();

    loop {
        let readline = rl.readline(">> ");
        match readline {
            Ok(line) => match line.as_ref() {
                "exit" => break,
                line => {
                    rl.add_history_entry(line);

                    let mut lexer = Lexer::new(line);
                    let tokens = match lexer.tokenize() {
                        Ok(tokens) => tokens,
                        Err(error) => {
                            eprintln!("Woops! Lexing failed:\n {}", error);
                            continue;
                        }
                    };

                    let mut parser = Parser::new(&tokens);
                    let program = match parser.parse() {
                        Ok(program) => program,
                        Err(error) => {
                            eprintln!("Woops! Parsing failed:\n {}", error);
                            continue;
                        }
                    };

                    let mut compiler = Compiler::new_with_state(symbol_table, constants);
                    let compiled = compiler.compile(&program);
                    let (table, pool) = compiler.into_state();
                    symbol_table = table;
                    constants = pool;
                    let bytecode = match compiled {
                        Ok(bytecode) => bytecode,
                        Err(error) => {
                            eprintln!("Woops! Compilation failed:\n {}", error);
                            continue;
                        }
                    };

                    let mut vm = VirtualMachine::new_with_globals(bytecode, globals);
                    let outcome = vm.run();
                    let result = vm.last_popped();
                    globals = vm.into_globals();
                    if let Err(error) = outcome {
                        eprintln!("Woops! Executing bytecode failed:\n {}", error);
                        continue;
                    }

                    if result != Object::Null {
                        println!("{}", result);
                    }
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history("history.txt")?;
    Ok(())
}

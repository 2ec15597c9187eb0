use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use scheme_eval::ast::{Procedure, Value};
use scheme_eval::evaluator::{self, Environment};
use scheme_eval::scheme::parse_program;
use scheme_eval::{Error, evaluate};
use std::panic;
use std::process;

/// Install a tracing subscriber when `RUST_LOG` is set,
/// e.g. `RUST_LOG=scheme_eval=debug` to see definitions.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() {
    init_tracing();

    let result = panic::catch_unwind(run_repl);

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            eprintln!("Could not start the REPL: {err}");
            process::exit(1);
        }
        Err(panic_info) => {
            eprintln!("The REPL encountered an unexpected error and must exit.");

            if let Some(msg) = panic_info.downcast_ref::<&str>() {
                eprintln!("Error: {msg}");
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                eprintln!("Error: {msg}");
            } else {
                eprintln!("Error: Unknown panic occurred");
            }

            process::exit(1);
        }
    }
}

/// Input that ends inside an open list or string is continued on the next line
fn is_incomplete(err: &Error) -> bool {
    matches!(err, Error::ParseError(message) if message.contains("Unexpected end of input"))
}

fn run_repl() -> Result<(), ReadlineError> {
    println!("Scheme evaluator with lexical (lambda) and dynamic (mu) procedures");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let env = evaluator::create_global_env();

    // Custom builtin callable from user code, for demonstration purposes
    env.register_builtin_operation::<_, ()>("help", print_help);

    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "scheme> " } else { "   ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    match command {
                        ":help" => {
                            let _ = print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                let expressions = match parse_program(&pending) {
                    Ok(expressions) => expressions,
                    Err(err) if is_incomplete(&err) => continue,
                    Err(err) => {
                        let _ = rl.add_history_entry(pending.trim());
                        pending.clear();
                        println!("Error: {err}");
                        continue;
                    }
                };
                let _ = rl.add_history_entry(pending.trim());
                pending.clear();

                for expr in expressions {
                    match evaluate(&expr, &env) {
                        // Don't print Unspecified values (e.g., from display)
                        Ok(Value::Unspecified) => {}
                        Ok(result) => println!("{result}"),
                        Err(e) => {
                            println!("Error: {e}");
                            break;
                        }
                    }
                }
            }

            Err(ReadlineError::Interrupted) => {
                // Ctrl+C abandons a partially entered expression
                if pending.is_empty() {
                    println!("Goodbye!");
                    break;
                }
                pending.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn print_help() -> Result<Value, Error> {
    println!("Scheme evaluator commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Special forms:");
    println!("  define quote begin lambda mu if and or cond let quasiquote unquote");
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (let ((x 1) (y 2)) `(sum ,(+ x y)))");
    println!("  (define f (mu () x))   ; x is looked up where f is called");
    println!("  (let ((x 42)) (f))");
    println!();

    Ok(Value::Unspecified)
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Procedure(Procedure::Builtin(_)) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}

// File: src/main.rs
//
// Entry point: `loxc [script]`. With no argument, launches the REPL; with
// one argument, compiles and runs that file; with more than one, clap
// prints usage and the process exits 64.

use clap::Parser;
use loxc::{repl, vm};
use std::path::PathBuf;
use std::process::ExitCode;

/// A bytecode compiler and virtual machine for a small dynamically-typed,
/// class-based scripting language.
#[derive(Parser)]
#[command(name = "loxc", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Cli {
    /// Path to a script to run. Omit to start the REPL.
    script: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = err.exit_code();
            let _ = err.print();
            return ExitCode::from(if code == 0 { 0 } else { 64 });
        }
    };

    match cli.script {
        None => run_repl(),
        Some(path) => run_file(&path),
    }
}

fn run_repl() -> ExitCode {
    match repl::Repl::new() {
        Ok(mut repl) => {
            if let Err(err) = repl.run() {
                eprintln!("Error: {}", err);
                return ExitCode::from(74);
            }
            ExitCode::from(0)
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(74)
        }
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error: could not read file '{}': {}", path.display(), err);
            return ExitCode::from(74);
        }
    };

    let mut vm = vm::Vm::new();
    let result = vm.interpret(&source);
    ExitCode::from(result.exit_code() as u8)
}

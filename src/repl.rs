// File: src/repl.rs
//
// Interactive REPL. Each line the user enters is compiled and run as its
// own complete program, matching the reference interpreter's line-at-a-time
// loop: there is no multi-line brace buffering, so a statement must fit on
// one line (a `{ ... }` block works fine within a single line).

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub struct Repl {
    editor: DefaultEditor,
    vm: crate::vm::Vm,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self { editor: DefaultEditor::new()?, vm: crate::vm::Vm::new() })
    }

    fn show_banner(&self) {
        println!("{}", format!("loxc {}", env!("CARGO_PKG_VERSION")).bright_cyan().bold());
        println!("Type {} for help, {} to exit.", ":help".bright_yellow(), ":quit".bright_yellow());
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();
        loop {
            match self.editor.readline("> ") {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match trimmed {
                        ":quit" | ":q" | ":exit" => break,
                        ":help" | ":h" => {
                            self.show_help();
                            continue;
                        }
                        _ => {}
                    }
                    self.vm.interpret(&line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red(), err);
                    break;
                }
            }
        }
        Ok(())
    }

    fn show_help(&self) {
        println!("Enter one complete statement per line; declarations persist across lines.");
        println!("  {}   show this message", ":help".bright_yellow());
        println!("  {}   exit the REPL", ":quit".bright_yellow());
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new().expect("failed to initialize line editor")
    }
}

//! Line-editor debugger attached to breakpoint handlers.

use colored::Colorize;
use rustyline::{DefaultEditor, error::ReadlineError};
use std::sync::{Mutex, PoisonError};
use waypoint_engine::{Debugger, Frame, HostError};

const PROMPT: &str = "(waypoint) ";

const HELP: &str = "\
c, continue   resume the script
p <expr>      print the value of an expression
locals        list the frame's bindings
q, quit       abort the script
<statements>  run statements in the frame";

/// What the user asked for at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Continue,
    Print(&'a str),
    Locals,
    Quit,
    Help,
    Exec(&'a str),
}

impl<'a> Command<'a> {
    fn parse(input: &'a str) -> Option<Self> {
        let input = input.trim();
        match input {
            "" => None,
            "c" | "continue" => Some(Self::Continue),
            "locals" => Some(Self::Locals),
            "q" | "quit" => Some(Self::Quit),
            "h" | "help" => Some(Self::Help),
            _ => Some(
                input
                    .strip_prefix("p ")
                    .map_or(Self::Exec(input), |expr| Self::Print(expr.trim())),
            ),
        }
    }
}

fn add_history(editor: &mut DefaultEditor, line: &str) {
    if let Err(e) = editor.add_history_entry(line) {
        log::debug!("cannot add `{line}` to the console history: {e}");
    }
}

/// Interactive debugger reading commands from the terminal.
#[derive(Debug, Default)]
pub(crate) struct ConsoleDebugger {
    history: Mutex<Vec<String>>,
}

impl ConsoleDebugger {
    fn remember(&self, editor: &mut DefaultEditor, line: &str) {
        add_history(editor, line);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
    }
}

impl Debugger for ConsoleDebugger {
    #[allow(clippy::print_stdout, clippy::print_stderr)]
    fn interact(&self, frame: &mut dyn Frame) -> Result<(), HostError> {
        let mut editor =
            DefaultEditor::new().map_err(|e| HostError::new(format!("cannot open the console: {e}")))?;
        for line in self.history.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            add_history(&mut editor, line);
        }

        eprintln!(
            "{} line {} of `{}`",
            "break:".yellow().bold(),
            frame.line(),
            frame.routine().name()
        );

        loop {
            let input = match editor.readline(PROMPT) {
                Ok(input) => input,
                Err(ReadlineError::Eof) => return Ok(()),
                Err(ReadlineError::Interrupted) => {
                    return Err(HostError::new("interrupted in the debugger"));
                }
                Err(e) => return Err(HostError::new(format!("cannot read from the console: {e}"))),
            };
            let Some(command) = Command::parse(&input) else {
                continue;
            };
            self.remember(&mut editor, &input);

            match command {
                Command::Continue => return Ok(()),
                Command::Quit => return Err(HostError::new("aborted from the debugger")),
                Command::Help => eprintln!("{HELP}"),
                Command::Locals => {
                    let mut names = frame.local_names();
                    names.sort();
                    for name in names {
                        if let Some(value) = frame.local(&name) {
                            println!("{} = {value}", name.cyan());
                        }
                    }
                }
                Command::Print(expr) => match frame.eval(expr) {
                    Ok(value) => println!("{value}"),
                    Err(e) => eprintln!("{} {}", "error:".red(), e.message()),
                },
                Command::Exec(statements) => {
                    if let Err(e) = frame.exec(statements) {
                        eprintln!("{} {}", "error:".red(), e.message());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        assert_eq!(Command::parse("  "), None);
        assert_eq!(Command::parse("c"), Some(Command::Continue));
        assert_eq!(Command::parse("continue "), Some(Command::Continue));
        assert_eq!(Command::parse("p x + 1"), Some(Command::Print("x + 1")));
        assert_eq!(Command::parse("locals"), Some(Command::Locals));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("x = 2"), Some(Command::Exec("x = 2")));
        assert_eq!(Command::parse("pass"), Some(Command::Exec("pass")));
    }

    #[test]
    fn history_carries_over_between_breakpoints() {
        use rustyline::history::History;

        let debugger = ConsoleDebugger::default();
        let mut editor = DefaultEditor::new().unwrap();
        debugger.remember(&mut editor, "p x");
        debugger.remember(&mut editor, "x = 1");
        assert_eq!(editor.history().len(), 2);
        assert_eq!(*debugger.history.lock().unwrap(), ["p x", "x = 1"]);
    }
}

//! The interactive binary: a minimal line loop around the library shell.
//! The prompt, terminal state, and continuation reads live here; the
//! language itself does not.

mod prompt;

use nix::sys::termios::{self, SetArg, Termios};
use std::io::{self, BufRead, Write};
use whelk_shell::Shell;

pub struct Binary {
    shell: Shell,
    saved_termios: Option<Termios>,
}

impl Binary {
    pub fn new(mut shell: Shell) -> Self {
        shell.options.interactive = true;
        shell.history = whelk_shell::shell::history::History::with_environment();
        let saved_termios = termios::tcgetattr(0).ok();
        Binary { shell, saved_termios }
    }

    pub fn shell_mut(&mut self) -> &mut Shell { &mut self.shell }

    /// Children occasionally leave the terminal in a strange mode; put it
    /// back before prompting.
    fn restore_terminal(&self) {
        if let Some(saved) = &self.saved_termios {
            let _ = termios::tcsetattr(0, SetArg::TCSANOW, saved);
        }
    }

    fn print_prompt(&self) {
        // The end-of-line mark survives only when the last command left a
        // partial line; otherwise the prompt overwrites it.
        if let Ok(mark) = std::env::var("PROMPT_EOL_MARK") {
            if !mark.is_empty() {
                print!("{}\r", mark);
            }
        }
        print!("{}", prompt::expand_prompt(&self.shell));
        let _ = io::stdout().flush();
    }

    fn read_input(&mut self) -> Option<String> {
        self.print_prompt();
        let stdin = io::stdin();
        let mut input = String::new();
        if stdin.lock().read_line(&mut input).ok()? == 0 {
            return None;
        }

        // Keep reading while the parse could be completed by more input:
        // open quotes, heredocs without terminators, dangling operators.
        loop {
            let tree =
                whelk_shell::parser::parse(&input, self.shell.options.posix_mode);
            if !tree.is_syntax_error() || !tree.is_continuable_error() {
                break;
            }
            print!("> ");
            let _ = io::stdout().flush();
            let mut more = String::new();
            match stdin.lock().read_line(&mut more) {
                Ok(0) | Err(_) => break,
                Ok(_) => input.push_str(&more),
            }
        }
        Some(input)
    }

    pub fn main_loop(&mut self) -> i32 {
        loop {
            self.shell.jobs.reap();
            self.shell.jobs.cleanup();
            self.shell.history.maybe_autosave();
            self.restore_terminal();

            let input = match self.read_input() {
                Some(input) => input,
                None => break,
            };
            if input.trim().is_empty() {
                continue;
            }
            self.shell.history.add(&input);
            self.shell.run_command(&input);
        }
        println!();
        self.shell.prep_for_exit();
        self.shell.last_return_code
    }
}

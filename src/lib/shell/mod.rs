//! The shell structure owns every piece of process-wide state: local
//! frames, aliases, functions, jobs, history, the directory stack, and
//! the cached runnable path. Several instances may coexist; nothing here
//! is a global.

pub mod directory_stack;
pub mod history;
pub mod job;
pub mod pipe_exec;
pub mod signals;

pub use self::job::{Job, JobRef, JobState, JobTable};
pub use scopes::FrameKind;

use self::{directory_stack::DirectoryStack, history::History};
use crate::{
    builtins::BuiltinMap,
    error::{Error, Result},
    parser,
    position::Position,
    types::Str,
    value::{Redirection, Variable},
};
use scopes::FrameStack;
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    env,
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    process,
};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Behavior toggles, mostly driven by `setopt` and the command line.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    pub posix_mode: bool,
    pub interactive: bool,
    /// Echo each command before running it.
    pub verbose: bool,
    /// Keep empty segments when splitting captured output on IFS.
    pub inline_exec_keep_empty_segments: bool,
}

#[derive(Clone, Debug)]
pub struct ShellFunction {
    pub name:     Str,
    pub argnames: Vec<Str>,
    pub body:     Option<crate::ast::Node>,
}

pub struct Shell {
    pub options: Options,
    pub last_return_code: i32,
    pub jobs: JobTable,
    pub history: History,
    pub(crate) is_library: bool,
    pub(crate) directory_stack: DirectoryStack,
    pub(crate) aliases: HashMap<Str, Str>,
    pub(crate) functions: HashMap<Str, ShellFunction>,
    pub(crate) global_redirections: Vec<Redirection>,
    pub(crate) builtins: BuiltinMap,
    frames: FrameStack<Str, Variable>,
    program_name: Str,
    runnable_cache: RefCell<Option<Vec<Str>>>,
}

/// Startup staging, mirroring how the binary brings a shell up: install
/// handlers, block job-control signals, take a process group.
pub struct ShellBuilder;

impl ShellBuilder {
    pub fn new() -> ShellBuilder { ShellBuilder }

    pub fn install_signal_handler(self) -> ShellBuilder {
        signals::install();
        self
    }

    pub fn block_signals(self) -> ShellBuilder {
        signals::block();
        self
    }

    pub fn set_unique_pid(self) -> ShellBuilder {
        let pid = nix::unistd::getpid();
        if nix::unistd::setpgid(pid, pid).is_ok() {
            let _ = nix::unistd::tcsetpgrp(0, pid);
        }
        self
    }

    pub fn as_library(self) -> Shell { Shell::new(true) }

    pub fn as_binary(self) -> Shell { Shell::new(false) }
}

impl Default for ShellBuilder {
    fn default() -> Self { Self::new() }
}

impl Shell {
    pub(crate) fn new(is_library: bool) -> Shell {
        if env::var_os("PATH").is_none() {
            env::set_var("PATH", DEFAULT_PATH);
        }
        Shell {
            options: Options::default(),
            last_return_code: 0,
            jobs: JobTable::new(),
            history: History::default(),
            is_library,
            directory_stack: DirectoryStack::default(),
            aliases: HashMap::new(),
            functions: HashMap::new(),
            global_redirections: Vec::new(),
            builtins: BuiltinMap::default(),
            frames: FrameStack::new(),
            program_name: "whelk".into(),
            runnable_cache: RefCell::new(None),
        }
    }

    /// An embeddable instance: no terminal ownership, no handlers.
    pub fn library() -> Shell { Shell::new(true) }

    pub fn set_program_name(&mut self, name: impl Into<Str>) { self.program_name = name.into(); }

    // ---- variables --------------------------------------------------------

    pub fn variable(&self, name: &str) -> Option<Variable> {
        if let Some(variable) = self.frames.get(name) {
            return Some(variable.clone());
        }
        env::var(name).ok().map(Variable::Str)
    }

    pub fn variable_or_empty(&self, name: &str) -> Str {
        self.variable(name).map(|variable| variable.to_joined_string()).unwrap_or_default()
    }

    /// The store rule: an existing binding updates in place; a new one
    /// lands on the closest function-or-global frame in POSIX mode and
    /// the innermost frame in native mode.
    pub fn assign_variable(&mut self, name: &str, value: Variable) {
        if name == "PATH" {
            self.runnable_cache.replace(None);
        }
        if self.options.posix_mode {
            self.frames.set_scoped(Str::from(name), value);
        } else {
            self.frames.set_innermost(Str::from(name), value);
        }
    }

    /// Binds in the innermost frame unconditionally (loop and match
    /// variables shadow).
    pub fn set_local_variable(&mut self, name: &str, value: Variable) {
        self.frames.define(Str::from(name), value);
    }

    pub fn unset_variable(&mut self, name: &str) -> bool {
        let had_local = self.frames.remove(name).is_some();
        let had_env = env::var_os(name).is_some();
        if had_env {
            env::remove_var(name);
        }
        had_local || had_env
    }

    pub fn push_frame(&mut self, name: &str, kind: FrameKind) { self.frames.push(name, kind); }

    pub fn pop_frame(&mut self) { self.frames.pop(); }

    pub fn frame_depth(&self) -> usize { self.frames.depth() }

    pub fn local_variable_names(&self) -> Vec<Str> {
        let mut names: Vec<Str> = self
            .frames
            .frames()
            .flat_map(|frame| frame.keys().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    pub fn set_argv(&mut self, args: Vec<Str>) {
        self.set_local_variable("ARGV", Variable::List(args));
    }

    pub fn argv(&self) -> Vec<Str> {
        match self.variable("ARGV") {
            Some(variable) => variable.into_list(),
            None => Vec::new(),
        }
    }

    /// The one-character shell quantities: `$?`, `$$`, `$*`, `$#`, `$!`,
    /// `$0`, and the positionals.
    pub fn special_variable(&self, name: char) -> Option<Variable> {
        match name {
            '?' => Some(Variable::Str(self.last_return_code.to_string())),
            '$' => Some(Variable::Str(process::id().to_string())),
            '*' => Some(Variable::List(self.argv())),
            '#' => Some(Variable::Str(self.argv().len().to_string())),
            '!' => self
                .jobs
                .most_recent_background()
                .map(|job| Variable::Str(job.borrow().pid().to_string())),
            '0' => Some(Variable::Str(self.program_name.clone())),
            '1'..='9' => {
                let index = name.to_digit(10).unwrap() as usize - 1;
                self.argv().get(index).cloned().map(Variable::Str)
            }
            _ => None,
        }
    }

    // ---- expansion helpers -----------------------------------------------

    pub fn tilde_home(&self, username: Option<&str>) -> Option<Str> {
        match username {
            None => env::var("HOME").ok(),
            Some(username) => {
                #[cfg(unix)]
                {
                    use users::os::unix::UserExt;
                    users::get_user_by_name(username)
                        .map(|user| user.home_dir().display().to_string())
                }
                #[cfg(not(unix))]
                {
                    let _ = username;
                    None
                }
            }
        }
    }

    /// Expands a glob against the working directory. No match is the
    /// empty list; a malformed pattern is an error.
    pub fn expand_glob(&mut self, pattern: &str, position: Position) -> Result<Vec<Str>> {
        let paths = glob::glob(pattern).map_err(|_| Error::InvalidGlob {
            pattern:  pattern.into(),
            position: Some(position),
        })?;
        Ok(paths
            .filter_map(std::result::Result::ok)
            .map(|path| path.display().to_string())
            .collect())
    }

    // ---- aliases and functions -------------------------------------------

    pub fn define_alias(&mut self, name: impl Into<Str>, expansion: impl Into<Str>) {
        self.runnable_cache.replace(None);
        self.aliases.insert(name.into(), expansion.into());
    }

    pub fn remove_alias(&mut self, name: &str) -> bool {
        self.runnable_cache.replace(None);
        self.aliases.remove(name).is_some()
    }

    pub fn alias(&self, name: &str) -> Option<&Str> { self.aliases.get(name) }

    pub fn define_function(&mut self, function: ShellFunction) {
        self.runnable_cache.replace(None);
        self.functions.insert(function.name.clone(), function);
    }

    /// Expands the head of each command through the alias map to a fixed
    /// point; a cycle stops rather than loops.
    pub fn expand_aliases(&mut self, mut commands: Vec<crate::value::Command>) -> Vec<crate::value::Command> {
        for command in &mut commands {
            let mut seen: HashSet<Str> = HashSet::new();
            while let Some(first) = command.argv.first().cloned() {
                let expansion = match self.aliases.get(&first) {
                    Some(expansion) if !seen.contains(&first) => expansion.clone(),
                    _ => break,
                };
                seen.insert(first);
                let mut new_argv = split_words(&expansion);
                new_argv.extend(command.argv.drain(1..));
                command.argv = new_argv;
            }
        }
        commands
    }

    /// Calls a function in-process: fresh boundary frame, bound argument
    /// names, `ARGV` with the remaining arguments.
    pub(crate) fn invoke_function(
        &mut self,
        function: &ShellFunction,
        argv: &[Str],
    ) -> Result<()> {
        self.push_frame(&function.name, FrameKind::FunctionOrGlobal);
        let arguments = &argv[1..];
        for (index, name) in function.argnames.iter().enumerate() {
            let value = arguments.get(index).cloned().unwrap_or_default();
            self.set_local_variable(name, Variable::Str(value));
        }
        self.set_local_variable("ARGV", Variable::List(arguments.to_vec()));

        let outcome = match &function.body {
            Some(body) => body.run(self).map(|_| ()),
            None => Ok(()),
        };
        self.pop_frame();
        match outcome {
            Err(Error::Return) => Ok(()),
            other => other,
        }
    }

    pub(crate) fn run_builtin(&mut self, name: &str, argv: &[Str]) -> Result<i32> {
        let builtin = self
            .builtins
            .get(name)
            .unwrap_or_else(|| panic!("builtin '{}' vanished from the map", name));
        builtin(argv, self).map(|status| status.code())
    }

    // ---- the command loop entry ------------------------------------------

    /// Parses and runs one input, reporting errors the way the command
    /// loop does. Returns the exit code of the input.
    pub fn run_command(&mut self, source: &str) -> i32 {
        let tree = parser::parse(source, self.options.posix_mode);
        if tree.is_syntax_error() {
            let message = tree.error_message().unwrap_or("could not parse input").to_string();
            let position = tree
                .syntax_error_node()
                .map(|node| node.position())
                .unwrap_or_default();
            self.print_error_with_source(&message, Some(position), source);
            self.last_return_code = 1;
            return self.last_return_code;
        }

        if self.options.verbose {
            eprintln!("> {}", source.trim_end());
        }

        match self.run_node(&tree) {
            Ok(()) => {}
            Err(Error::Interrupted) | Err(Error::Killed) => {
                // Interactive interruption: reset to the prompt.
                eprintln!();
                self.last_return_code = 130;
            }
            Err(error) => {
                self.print_error_with_source(&error.to_string(), error.position(), source);
                self.last_return_code = 1;
            }
        }
        self.jobs.reap();
        self.jobs.cleanup();
        self.history.maybe_autosave();
        self.last_return_code
    }

    /// One line, `Shell: `-prefixed, then the offending source line with
    /// the span underlined in red.
    fn print_error_with_source(&self, message: &str, position: Option<Position>, source: &str) {
        eprintln!("Shell: {}", message);
        let position = match position {
            Some(position) if !source.is_empty() => position,
            _ => return,
        };
        let line_index = position.start_line.line;
        let line = match source.lines().nth(line_index) {
            Some(line) => line,
            None => return,
        };
        eprintln!("  {}", line);
        let start_col = position.start_line.col.min(line.len());
        let end_col = if position.end_line.line == line_index {
            position.end_line.col.min(line.len()).max(start_col + 1)
        } else {
            line.len().max(start_col + 1)
        };
        let underline: String = std::iter::repeat(' ')
            .take(start_col)
            .chain(std::iter::repeat('^').take(end_col - start_col))
            .collect();
        eprintln!("  \x1b[31m{}\x1b[0m", underline);
    }

    /// Runs a script file; its path becomes `$0`.
    pub fn execute_script(&mut self, path: &std::path::Path, args: Vec<Str>) -> std::io::Result<i32> {
        let contents = std::fs::read_to_string(path)?;
        self.set_program_name(path.display().to_string());
        self.set_argv(args);
        Ok(self.run_command(&contents))
    }

    // ---- runnables and completion ----------------------------------------

    pub fn find_in_path(&self, name: &str) -> Option<PathBuf> {
        let path = env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.into());
        for dir in path.split(':').filter(|dir| !dir.is_empty()) {
            let candidate = PathBuf::from(dir).join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn runnable_names(&self) -> Vec<Str> {
        if let Some(cached) = self.runnable_cache.borrow().as_ref() {
            return cached.clone();
        }
        let mut names: HashSet<Str> = HashSet::new();
        names.extend(self.builtins.keys().map(Str::from));
        names.extend(self.functions.keys().cloned());
        names.extend(self.aliases.keys().cloned());
        let path = env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.into());
        for dir in path.split(':').filter(|dir| !dir.is_empty()) {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if is_executable(&entry.path()) {
                        names.insert(entry.file_name().to_string_lossy().into_owned());
                    }
                }
            }
        }
        let mut names: Vec<Str> = names.into_iter().collect();
        names.sort();
        self.runnable_cache.replace(Some(names.clone()));
        names
    }

    pub fn complete_program(&self, prefix: &str) -> Vec<Str> {
        self.runnable_names()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect()
    }

    pub fn complete_path(&self, prefix: &str) -> Vec<Str> {
        let (dir, file_prefix) = match prefix.rfind('/') {
            Some(slash) => (&prefix[..=slash], &prefix[slash + 1..]),
            None => ("./", prefix),
        };
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(if dir.is_empty() { "." } else { dir }) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(file_prefix) {
                    let shown_dir = if dir == "./" { "" } else { dir };
                    out.push(format!("{}{}", shown_dir, name));
                }
            }
        }
        out.sort();
        out
    }

    pub fn is_runnable(&self, name: &str) -> bool {
        self.builtins.contains(name)
            || self.functions.contains_key(name)
            || self.aliases.contains_key(name)
            || self.find_in_path(name).is_some()
    }

    // ---- lifecycle --------------------------------------------------------

    pub fn prep_for_exit(&mut self) {
        self.history.save();
        self.jobs.hangup_all();
    }

    pub fn exit(&mut self, status: i32) -> ! {
        self.prep_for_exit();
        process::exit(status);
    }
}

fn is_executable(path: &std::path::Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Splits alias expansion text into words, honoring quotes.
fn split_words(text: &str) -> Vec<Str> {
    let mut words = Vec::new();
    let mut current = Str::new();
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        match quote {
            Some(active) => {
                if ch == active {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                ch if ch.is_whitespace() => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                ch => current.push(ch),
            },
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Command;

    #[test]
    #[serial_test::serial]
    fn variables_prefer_frames_over_environment() {
        let mut shell = Shell::library();
        env::set_var("WHELK_TEST_VAR_A", "env");
        shell.assign_variable("WHELK_TEST_VAR_A", Variable::Str("frame".into()));
        assert_eq!(shell.variable("WHELK_TEST_VAR_A").unwrap().to_joined_string(), "frame");
        env::remove_var("WHELK_TEST_VAR_A");
    }

    #[test]
    #[serial_test::serial]
    fn unset_removes_both_frame_and_environment() {
        let mut shell = Shell::library();
        env::set_var("WHELK_TEST_VAR_B", "env");
        shell.assign_variable("WHELK_TEST_VAR_B", Variable::Str("frame".into()));
        assert!(shell.unset_variable("WHELK_TEST_VAR_B"));
        assert!(shell.variable("WHELK_TEST_VAR_B").is_none());
    }

    #[test]
    fn posix_store_skips_block_frames() {
        let mut shell = Shell::library();
        shell.options.posix_mode = true;
        shell.push_frame("block", FrameKind::Block);
        shell.assign_variable("scoped_thing", Variable::Str("kept".into()));
        shell.pop_frame();
        assert_eq!(shell.variable("scoped_thing").unwrap().to_joined_string(), "kept");
    }

    #[test]
    fn native_store_targets_the_innermost_frame() {
        let mut shell = Shell::library();
        shell.push_frame("block", FrameKind::Block);
        shell.assign_variable("inner_thing", Variable::Str("gone".into()));
        shell.pop_frame();
        assert!(shell.variable("inner_thing").is_none());
    }

    #[test]
    fn special_variables_report_state() {
        let mut shell = Shell::library();
        shell.last_return_code = 42;
        assert_eq!(shell.special_variable('?').unwrap().to_joined_string(), "42");
        shell.set_argv(vec!["a".into(), "b".into()]);
        assert_eq!(shell.special_variable('#').unwrap().to_joined_string(), "2");
        assert_eq!(shell.special_variable('1').unwrap().to_joined_string(), "a");
    }

    #[test]
    fn alias_expansion_reaches_a_fixed_point() {
        let mut shell = Shell::library();
        shell.define_alias("ll", "ls -l");
        shell.define_alias("ls", "ls --color");
        let commands = vec![Command::from_argv(vec!["ll".into(), "x".into()])];
        let expanded = shell.expand_aliases(commands);
        assert_eq!(expanded[0].argv, vec!["ls", "--color", "-l", "x"]);
    }

    #[test]
    fn alias_cycles_stop() {
        let mut shell = Shell::library();
        shell.define_alias("a", "b");
        shell.define_alias("b", "a");
        let commands = vec![Command::from_argv(vec!["a".into()])];
        let expanded = shell.expand_aliases(commands);
        // The head resolves without looping forever.
        assert_eq!(expanded[0].argv, vec!["a"]);
    }

    #[test]
    fn split_words_honors_quotes() {
        assert_eq!(split_words("grep -r 'two words'"), vec!["grep", "-r", "two words"]);
    }
}

//! The builtin corpus. Builtins run inside the shell process when they
//! are the foreground head of a command; a map of plain function
//! pointers keeps dispatch allocation-free.

mod command_info;
mod directories;
mod helpers;
mod job_control;
mod variables;

pub use self::helpers::Status;
use self::{
    command_info::*,
    directories::*,
    job_control::*,
    variables::*,
};
use crate::{
    error::{Error, Result},
    shell::Shell,
    types::Str,
};
use std::collections::HashMap;

/// The type for builtin functions. Builtins have direct access to the
/// shell; control-flow builtins unwind through the error sum.
pub type BuiltinFunction = fn(&[Str], &mut Shell) -> Result<Status>;

/// A container for builtins and their respective help text.
pub struct BuiltinMap {
    fcts: HashMap<&'static str, BuiltinFunction>,
    help: HashMap<&'static str, &'static str>,
}

impl Default for BuiltinMap {
    fn default() -> Self {
        let mut builtins = Self::with_capacity(64);
        builtins
            .with_basic()
            .with_variables()
            .with_process_control()
            .with_files_and_directory()
            .with_flow_control();
        builtins
    }
}

impl BuiltinMap {
    pub fn new() -> Self { BuiltinMap { fcts: HashMap::new(), help: HashMap::new() } }

    pub fn with_capacity(cap: usize) -> Self {
        BuiltinMap { fcts: HashMap::with_capacity(cap), help: HashMap::with_capacity(cap) }
    }

    pub fn contains(&self, name: &str) -> bool { self.fcts.contains_key(name) }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ { self.fcts.keys().copied() }

    pub fn get_help(&self, name: &str) -> Option<&'static str> { self.help.get(name).copied() }

    pub fn get(&self, name: &str) -> Option<BuiltinFunction> { self.fcts.get(name).copied() }

    pub fn add(
        &mut self,
        name: &'static str,
        func: BuiltinFunction,
        help: &'static str,
    ) -> &mut Self {
        self.fcts.insert(name, func);
        self.help.insert(name, help);
        self
    }

    /// Everyday commands with no better group
    pub fn with_basic(&mut self) -> &mut Self {
        self.add(":", builtin_noop, "Do nothing, successfully")
            .add("eval", builtin_eval, "Evaluate the joined arguments as a command")
            .add("exec", builtin_exec, "Replace the shell with the given command")
            .add("exit", builtin_exit, "Exit the shell\n    exit <code>")
            .add("history", builtin_history, "Display the command history")
            .add("reset", builtin_reset, "Reset and clear the terminal")
            .add("time", builtin_time, "Run a command and report the elapsed real time")
            .add("source", builtin_source, "Evaluate a file in the current shell\n    source <file>")
            .add("dump", builtin_dump, "Parse the arguments and dump the syntax tree")
            .add(
                "shell_set_active_prompt",
                builtin_set_active_prompt,
                "Set the prompt for this session",
            )
            .add("umask", builtin_umask, "Show or set the file creation mask")
            .add(
                "argsparser_parse",
                builtin_argsparser_parse,
                "Parse options from a list of arguments\n    argsparser_parse -- <args...>",
            )
    }

    /// Create and control variables
    ///
    /// Contains `alias`, `unalias`, `export`, `unset`, `set`, `setopt`,
    /// `shift`, `read`
    pub fn with_variables(&mut self) -> &mut Self {
        self.add("alias", builtin_alias, "View or set aliases\n    alias <name>='<value>'")
            .add("unalias", builtin_unalias, "Delete an alias")
            .add("export", builtin_export, "Export a variable into the environment")
            .add("unset", builtin_unset, "Delete variables")
            .add("set", builtin_set, "Set variables, options, or positional parameters")
            .add("setopt", builtin_setopt, "Toggle shell behavior options")
            .add("shift", builtin_shift, "Drop leading positional parameters")
            .add("read", builtin_read, "Read a line into variables\n    read <variable>...")
    }

    /// Control subprocess state
    ///
    /// Contains `bg`, `fg`, `jobs`, `disown`, `wait`, `kill`
    pub fn with_process_control(&mut self) -> &mut Self {
        self.add("bg", builtin_bg, "Resume a stopped job in the background")
            .add("fg", builtin_fg, "Bring a job to the foreground")
            .add("jobs", builtin_jobs, "Display jobs the shell is tracking")
            .add("disown", builtin_disown, "Remove a job from the shell's job table")
            .add("wait", builtin_wait, "Wait for background jobs to finish")
            .add("kill", builtin_kill, "Send a signal to a job or process")
            .add("not", builtin_not, "Run a command and invert its exit status")
            .add("run_with_env", builtin_run_with_env, "Run a command with extra environment")
            .add(
                "in_parallel",
                builtin_in_parallel,
                "Launch a command in the background once a job slot is free\n    in_parallel [-j N] <command...>",
            )
            .add("command", builtin_command, "Run a command, bypassing functions")
            .add("type", builtin_type, "Describe how a name would be run")
            .add("where", builtin_where, "List every definition of a name")
            .add("glob", builtin_glob, "Expand glob patterns and print the matches")
    }

    /// Utilities concerning the filesystem
    ///
    /// Contains `cd`, `cdh`, `dirs`, `pushd`, `popd`, `pwd`
    pub fn with_files_and_directory(&mut self) -> &mut Self {
        self.add("cd", builtin_cd, "Change the current directory\n    cd <path>")
            .add("cdh", builtin_cdh, "Re-enter a recently visited directory")
            .add("dirs", builtin_dirs, "Display the directory stack")
            .add("pushd", builtin_pushd, "Push a directory onto the stack")
            .add("popd", builtin_popd, "Pop a directory from the stack")
            .add("pwd", builtin_pwd, "Print the current directory")
    }

    /// Loop and function control flow
    pub fn with_flow_control(&mut self) -> &mut Self {
        self.add("break", builtin_break, "Exit the enclosing loop")
            .add("continue", builtin_continue, "Start the next loop iteration")
            .add("return", builtin_return, "Return from the enclosing function\n    return <code>")
    }
}

fn builtin_noop(_: &[Str], _: &mut Shell) -> Result<Status> { Ok(Status::SUCCESS) }

fn builtin_break(_: &[Str], _: &mut Shell) -> Result<Status> { Err(Error::Break) }

fn builtin_continue(_: &[Str], _: &mut Shell) -> Result<Status> { Err(Error::Continue) }

fn builtin_return(args: &[Str], shell: &mut Shell) -> Result<Status> {
    match helpers::numeric_argument(args, shell.last_return_code) {
        Ok(code) => {
            shell.last_return_code = code;
            Err(Error::Return)
        }
        Err(status) => Ok(status),
    }
}

fn builtin_exit(args: &[Str], shell: &mut Shell) -> Result<Status> {
    match helpers::numeric_argument(args, shell.last_return_code) {
        Ok(code) => shell.exit(code),
        Err(status) => Ok(status),
    }
}

fn builtin_eval(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let source = args[1..].join(" ");
    Ok(Status::new(shell.run_command(&source)))
}

fn builtin_history(_: &[Str], shell: &mut Shell) -> Result<Status> {
    for (index, entry) in shell.history.entries().iter().enumerate() {
        println!("{:5}  {}", index, entry);
    }
    Ok(Status::SUCCESS)
}

fn builtin_reset(_: &[Str], _: &mut Shell) -> Result<Status> {
    // Full terminal reset, then clear.
    print!("\x1bc\x1b[2J\x1b[H");
    use std::io::Write;
    let _ = std::io::stdout().flush();
    Ok(Status::SUCCESS)
}

fn builtin_time(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() < 2 {
        return Ok(Status::bad_argument("time: expected a command"));
    }
    let started = std::time::Instant::now();
    let command = crate::value::Command::from_argv(args[1..].to_vec());
    let outcome = shell.run_commands(vec![command]);
    let elapsed = started.elapsed();
    eprintln!("Time: {}.{:03} seconds", elapsed.as_secs(), elapsed.subsec_millis());
    outcome?;
    Ok(Status::new(shell.last_return_code))
}

fn builtin_source(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let path = match args.get(1) {
        Some(path) => path,
        None => return Ok(Status::bad_argument("source: expected a file")),
    };
    let contents = match std::fs::read_to_string(path.as_str()) {
        Ok(contents) => contents,
        Err(err) => return Ok(Status::error(format!("source: {}: {}", path, err))),
    };
    let saved_argv = shell.argv();
    if args.len() > 2 {
        shell.set_argv(args[2..].to_vec());
    }
    let status = shell.run_command(&contents);
    if args.len() > 2 {
        shell.set_argv(saved_argv);
    }
    Ok(Status::new(status))
}

fn builtin_dump(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let source = args[1..].join(" ");
    let tree = crate::parser::parse(&source, shell.options.posix_mode);
    println!("{:#?}", tree);
    Ok(Status::SUCCESS)
}

fn builtin_set_active_prompt(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let prompt = args[1..].join(" ");
    shell.assign_variable("PROMPT", crate::value::Variable::Str(prompt));
    Ok(Status::SUCCESS)
}

fn builtin_umask(args: &[Str], _: &mut Shell) -> Result<Status> {
    use nix::sys::stat::{umask, Mode};
    match args.get(1) {
        None => {
            // Reading the mask means setting it twice.
            let current = umask(Mode::empty());
            let _ = umask(current);
            println!("{:04o}", current.bits());
            Ok(Status::SUCCESS)
        }
        Some(raw) => match u32::from_str_radix(raw, 8) {
            Ok(bits) => {
                let _ = umask(Mode::from_bits_truncate(bits as nix::sys::stat::mode_t));
                Ok(Status::SUCCESS)
            }
            Err(_) => Ok(Status::bad_argument(format!("umask: invalid mask '{}'", raw))),
        },
    }
}

fn builtin_argsparser_parse(args: &[Str], shell: &mut Shell) -> Result<Status> {
    // Options before `--` name expected flags; the rest is parsed.
    let split = args.iter().position(|arg| arg == "--").unwrap_or(args.len());
    let parsed = &args[split.min(args.len() - 1) + 1..];

    let mut positionals = Vec::new();
    for arg in parsed {
        if let Some(body) = arg.strip_prefix("--") {
            match body.split_once('=') {
                Some((name, value)) => shell.assign_variable(
                    name,
                    crate::value::Variable::Str(value.into()),
                ),
                None => {
                    shell.assign_variable(body, crate::value::Variable::Str("1".into()))
                }
            }
        } else {
            positionals.push(arg.clone());
        }
    }
    shell.assign_variable("REST", crate::value::Variable::List(positionals));
    Ok(Status::SUCCESS)
}

//! Introspection over runnables (`type`, `where`, `command`) and the
//! glob / exec helpers.

use super::helpers::Status;
use crate::{error::Result, position::Position, shell::Shell, types::Str, value::Command};
use std::ffi::CString;

enum Definition {
    Alias(Str),
    Function,
    Builtin,
    File(std::path::PathBuf),
}

fn definitions(shell: &Shell, name: &str) -> Vec<Definition> {
    let mut found = Vec::new();
    if let Some(expansion) = shell.alias(name) {
        found.push(Definition::Alias(expansion.clone()));
    }
    if shell.functions.contains_key(name) {
        found.push(Definition::Function);
    }
    if shell.builtins.contains(name) {
        found.push(Definition::Builtin);
    }
    if let Some(path) = shell.find_in_path(name) {
        found.push(Definition::File(path));
    }
    found
}

fn describe(name: &str, definition: &Definition) -> String {
    match definition {
        Definition::Alias(expansion) => format!("{} is aliased to '{}'", name, expansion),
        Definition::Function => format!("{} is a shell function", name),
        Definition::Builtin => format!("{} is a shell builtin", name),
        Definition::File(path) => format!("{} is {}", name, path.display()),
    }
}

pub fn builtin_type(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut status = Status::SUCCESS;
    for name in &args[1..] {
        match definitions(shell, name).first() {
            Some(definition) => println!("{}", describe(name, definition)),
            None => status = Status::error(format!("type: {}: not found", name)),
        }
    }
    Ok(status)
}

pub fn builtin_where(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut status = Status::SUCCESS;
    for name in &args[1..] {
        let found = definitions(shell, name);
        if found.is_empty() {
            status = Status::error(format!("where: {}: not found", name));
            continue;
        }
        for definition in &found {
            println!("{}", describe(name, definition));
        }
    }
    Ok(status)
}

/// Runs a command while skipping shell functions, so `command ls` reaches
/// the real binary even under a function named `ls`.
pub fn builtin_command(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() < 2 {
        return Ok(Status::bad_argument("command: expected a command"));
    }
    let name = args[1].clone();
    let hidden = shell.functions.remove(&name);
    let outcome = shell.run_commands(vec![Command::from_argv(args[1..].to_vec())]);
    if let Some(function) = hidden {
        shell.functions.insert(name, function);
    }
    outcome?;
    Ok(Status::new(shell.last_return_code))
}

pub fn builtin_glob(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut matched_any = false;
    for pattern in &args[1..] {
        match shell.expand_glob(pattern, Position::default()) {
            Ok(matches) => {
                for found in matches {
                    matched_any = true;
                    println!("{}", found);
                }
            }
            Err(error) => return Ok(Status::error(format!("glob: {}", error))),
        }
    }
    Ok(Status::from_bool(matched_any))
}

/// Replaces the shell with the given program.
pub fn builtin_exec(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() < 2 {
        return Ok(Status::bad_argument("exec: expected a command"));
    }
    let path = if args[1].contains('/') {
        Some(std::path::PathBuf::from(args[1].as_str()))
    } else {
        shell.find_in_path(&args[1])
    };
    let path = match path {
        Some(path) => path,
        None => return Ok(Status::new(127)),
    };

    shell.prep_for_exit();
    crate::shell::signals::unblock();

    let c_path = match CString::new(path.display().to_string()) {
        Ok(c_path) => c_path,
        Err(_) => return Ok(Status::new(126)),
    };
    let c_args: Vec<CString> = args[1..]
        .iter()
        .map(|arg| CString::new(arg.as_bytes()).unwrap_or_default())
        .collect();
    let refs: Vec<&std::ffi::CStr> = c_args.iter().map(CString::as_c_str).collect();
    let _ = nix::unistd::execv(&c_path, &refs);
    Ok(Status::error(format!("exec: failed to execute {}", args[1])))
}

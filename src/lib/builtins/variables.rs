//! Builtins that view and mutate variables, aliases, and positional
//! parameters.

use super::helpers::Status;
use crate::{
    error::Result,
    shell::Shell,
    types::Str,
    value::Variable,
};
use itertools::Itertools;
use std::io::BufRead;

pub fn builtin_alias(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() == 1 {
        let mut pairs: Vec<_> = shell.aliases.iter().collect();
        pairs.sort_by_key(|(name, _)| name.clone());
        for (name, expansion) in pairs {
            println!("alias {}='{}'", name, expansion);
        }
        return Ok(Status::SUCCESS);
    }
    for arg in &args[1..] {
        match arg.split_once('=') {
            Some((name, expansion)) => {
                let expansion = expansion.trim_matches('\'');
                shell.define_alias(name, expansion);
            }
            None => match shell.alias(arg) {
                Some(expansion) => println!("alias {}='{}'", arg, expansion),
                None => return Ok(Status::error(format!("alias: '{}' not found", arg))),
            },
        }
    }
    Ok(Status::SUCCESS)
}

pub fn builtin_unalias(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut status = Status::SUCCESS;
    for name in &args[1..] {
        if !shell.remove_alias(name) {
            status = Status::error(format!("unalias: '{}' not found", name));
        }
    }
    Ok(status)
}

pub fn builtin_export(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() == 1 {
        for (name, value) in std::env::vars() {
            println!("{}={}", name, value);
        }
        return Ok(Status::SUCCESS);
    }
    for arg in &args[1..] {
        match arg.split_once('=') {
            Some((name, value)) => std::env::set_var(name, value),
            None => {
                let value = shell.variable_or_empty(arg);
                std::env::set_var(arg.as_str(), value);
            }
        }
    }
    Ok(Status::SUCCESS)
}

pub fn builtin_unset(args: &[Str], shell: &mut Shell) -> Result<Status> {
    for name in &args[1..] {
        shell.unset_variable(name);
    }
    Ok(Status::SUCCESS)
}

/// `set` wears three hats: `set NAME = values...` assigns, `set -- a b`
/// replaces the positional parameters, and dash options toggle behavior.
pub fn builtin_set(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() == 1 {
        for name in shell.local_variable_names() {
            let value = shell.variable_or_empty(&name);
            println!("{} = {}", name, value);
        }
        return Ok(Status::SUCCESS);
    }

    if args[1] == "--" {
        shell.set_argv(args[2..].to_vec());
        return Ok(Status::SUCCESS);
    }

    if let Some(flags) = args[1].strip_prefix('-').filter(|flags| !flags.is_empty()) {
        for flag in flags.chars() {
            match flag {
                'x' => shell.options.verbose = true,
                _ => return Ok(Status::bad_argument(format!("set: unknown option -{}", flag))),
            }
        }
        return Ok(Status::SUCCESS);
    }
    if let Some(flags) = args[1].strip_prefix('+') {
        for flag in flags.chars() {
            match flag {
                'x' => shell.options.verbose = false,
                _ => return Ok(Status::bad_argument(format!("set: unknown option +{}", flag))),
            }
        }
        return Ok(Status::SUCCESS);
    }

    let name = &args[1];
    if args.get(2).map(Str::as_str) != Some("=") {
        return Ok(Status::bad_argument("set: expected '=' after the variable name"));
    }
    let values = &args[3..];
    let variable = match values.len() {
        0 => Variable::Str(Str::new()),
        1 => Variable::Str(values[0].clone()),
        _ => Variable::List(values.to_vec()),
    };
    shell.assign_variable(name, variable);
    Ok(Status::SUCCESS)
}

pub fn builtin_setopt(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() == 1 {
        println!("verbose: {}", shell.options.verbose);
        println!(
            "inline_exec_keep_empty_segments: {}",
            shell.options.inline_exec_keep_empty_segments
        );
        return Ok(Status::SUCCESS);
    }
    let (unset, names) = if args[1] == "--unset" {
        (true, &args[2..])
    } else {
        (false, &args[1..])
    };
    for name in names {
        match name.as_str() {
            "verbose" => shell.options.verbose = !unset,
            "inline_exec_keep_empty_segments" => {
                shell.options.inline_exec_keep_empty_segments = !unset
            }
            other => return Ok(Status::bad_argument(format!("setopt: unknown option '{}'", other))),
        }
    }
    Ok(Status::SUCCESS)
}

pub fn builtin_shift(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let count = match super::helpers::numeric_argument(args, 1) {
        Ok(count) if count >= 0 => count as usize,
        Ok(_) => return Ok(Status::bad_argument("shift: count must not be negative")),
        Err(status) => return Ok(status),
    };
    let mut argv = shell.argv();
    if count > argv.len() {
        return Ok(Status::error("shift: not enough arguments"));
    }
    argv.drain(..count);
    shell.set_argv(argv);
    Ok(Status::SUCCESS)
}

/// Reads one line from stdin and distributes its fields over the named
/// variables; the last name receives the remainder.
pub fn builtin_read(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut line = String::new();
    let count = match std::io::stdin().lock().read_line(&mut line) {
        Ok(count) => count,
        Err(err) => return Ok(Status::error(format!("read: {}", err))),
    };
    if count == 0 {
        return Ok(Status::FAILURE);
    }
    let line = line.trim_end_matches('\n');

    let names = &args[1..];
    if names.is_empty() {
        shell.assign_variable("REPLY", Variable::Str(line.into()));
        return Ok(Status::SUCCESS);
    }
    let mut fields = line.split_whitespace();
    for (index, name) in names.iter().enumerate() {
        let value: Str = if index == names.len() - 1 {
            fields.clone().join(" ")
        } else {
            fields.next().unwrap_or("").into()
        };
        shell.assign_variable(name, Variable::Str(value));
    }
    Ok(Status::SUCCESS)
}

//! Job-control builtins plus the process-adjacent commands (`kill`,
//! `not`, `run_with_env`, `in_parallel`).

use super::helpers::Status;
use crate::{
    error::Result,
    shell::{JobRef, JobState, Shell},
    types::Str,
    value::Command,
};
use nix::{sys::signal::Signal, unistd};
use std::{convert::TryFrom, str::FromStr};

fn resolve_or_recent(args: &[Str], shell: &Shell, suspended_wanted: bool) -> Option<JobRef> {
    match args.get(1) {
        Some(spec) => shell.jobs.resolve_spec(spec),
        None => shell
            .jobs
            .iter()
            .rev()
            .find(|job| {
                let job = job.borrow();
                !job.is_finished() && (!suspended_wanted || job.is_suspended())
            })
            .cloned()
            .or_else(|| shell.jobs.most_recent_background()),
    }
}

pub fn builtin_jobs(_: &[Str], shell: &mut Shell) -> Result<Status> {
    for job in shell.jobs.iter() {
        println!("{}", job.borrow());
    }
    Ok(Status::SUCCESS)
}

pub fn builtin_bg(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let job = match resolve_or_recent(args, shell, true) {
        Some(job) => job,
        None => return Ok(Status::error("bg: no current job")),
    };
    {
        let mut job = job.borrow_mut();
        job.move_to_background();
        job.set_shell_did_continue();
        eprintln!("{}", job);
    }
    crate::shell::signals::resume(job.borrow().pgid());
    Ok(Status::SUCCESS)
}

pub fn builtin_fg(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let job = match resolve_or_recent(args, shell, false) {
        Some(job) => job,
        None => return Ok(Status::error("fg: no current job")),
    };
    {
        let mut borrowed = job.borrow_mut();
        borrowed.move_to_foreground();
        borrowed.set_shell_did_continue();
        eprintln!("{}", borrowed.command());
    }
    if shell.options.interactive && !shell.is_library {
        let _ = unistd::tcsetpgrp(0, job.borrow().pgid());
    }
    crate::shell::signals::resume(job.borrow().pgid());
    shell.block_on_job(&job)?;
    Ok(Status::new(shell.last_return_code))
}

pub fn builtin_disown(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let jobs: Vec<JobRef> = if args.len() > 1 {
        args[1..].iter().filter_map(|spec| shell.jobs.resolve_spec(spec)).collect()
    } else {
        shell.jobs.iter().cloned().collect()
    };
    if jobs.is_empty() {
        return Ok(Status::error("disown: no jobs to disown"));
    }
    for job in jobs {
        job.borrow_mut().disown();
    }
    Ok(Status::SUCCESS)
}

pub fn builtin_wait(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let jobs: Vec<JobRef> = if args.len() > 1 {
        args[1..].iter().filter_map(|spec| shell.jobs.resolve_spec(spec)).collect()
    } else {
        shell.jobs.iter().cloned().collect()
    };
    for job in jobs {
        let finished = job.borrow().is_finished();
        if !finished {
            shell.block_on_job(&job)?;
        }
    }
    Ok(Status::new(shell.last_return_code))
}

fn parse_signal(raw: &str) -> Option<Signal> {
    if let Some(name) = raw.strip_prefix('-') {
        if let Ok(number) = name.parse::<i32>() {
            return Signal::try_from(number).ok();
        }
        let name = if name.starts_with("SIG") {
            name.to_string()
        } else {
            format!("SIG{}", name)
        };
        return Signal::from_str(&name).ok();
    }
    None
}

pub fn builtin_kill(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut signal = Signal::SIGTERM;
    let mut targets = &args[1..];
    if let Some(first) = targets.first() {
        if let Some(parsed) = parse_signal(first) {
            signal = parsed;
            targets = &targets[1..];
        }
    }
    if targets.is_empty() {
        return Ok(Status::bad_argument("kill: expected a job spec or pid"));
    }

    let mut status = Status::SUCCESS;
    for target in targets {
        if let Some(job) = shell.jobs.resolve_spec(target) {
            shell.jobs.kill_job(&job, signal);
            continue;
        }
        match target.parse::<i32>() {
            Ok(pid) => {
                if nix::sys::signal::kill(unistd::Pid::from_raw(pid), signal).is_err() {
                    status = Status::error(format!("kill: ({}) - no such process", pid));
                }
            }
            Err(_) => status = Status::error(format!("kill: invalid target '{}'", target)),
        }
    }
    Ok(status)
}

pub fn builtin_not(args: &[Str], shell: &mut Shell) -> Result<Status> {
    if args.len() < 2 {
        return Ok(Status::bad_argument("not: expected a command"));
    }
    shell.run_commands(vec![Command::from_argv(args[1..].to_vec())])?;
    Ok(Status::from_bool(shell.last_return_code != 0))
}

/// `run_with_env -eNAME=VALUE ... -- command ...` runs the command with
/// the extra variables exported, then restores the environment.
pub fn builtin_run_with_env(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut saved: Vec<(Str, Option<std::ffi::OsString>)> = Vec::new();
    let mut index = 1;
    while index < args.len() {
        let arg = &args[index];
        if arg == "--" {
            index += 1;
            break;
        }
        match arg.strip_prefix("-e").and_then(|pair| pair.split_once('=')) {
            Some((name, value)) => {
                saved.push((name.into(), std::env::var_os(name)));
                std::env::set_var(name, value);
            }
            None => {
                return Ok(Status::bad_argument(format!(
                    "run_with_env: malformed option '{}'",
                    arg
                )))
            }
        }
        index += 1;
    }

    let status = if index < args.len() {
        let outcome = shell.run_commands(vec![Command::from_argv(args[index..].to_vec())]);
        let status = Status::new(shell.last_return_code);
        restore_environment(saved);
        outcome?;
        status
    } else {
        restore_environment(saved);
        Status::SUCCESS
    };
    Ok(status)
}

fn restore_environment(saved: Vec<(Str, Option<std::ffi::OsString>)>) {
    for (name, previous) in saved {
        match previous {
            Some(value) => std::env::set_var(&name, value),
            None => std::env::remove_var(&name),
        }
    }
}

/// `in_parallel [-j N] command...` launches the command in the
/// background once the running-job count is below the cap, which
/// defaults to the number of online processors.
pub fn builtin_in_parallel(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let mut max_jobs = online_processors();
    let mut index = 1;
    while index < args.len() {
        let arg = &args[index];
        if arg == "--" {
            index += 1;
            break;
        }
        let raw = if let Some(count) = arg.strip_prefix("--max-jobs=") {
            Some(count)
        } else if arg == "-j" || arg == "--max-jobs" {
            index += 1;
            match args.get(index) {
                Some(count) => Some(count.as_str()),
                None => {
                    return Ok(Status::bad_argument("in_parallel: -j expects a job count"))
                }
            }
        } else {
            None
        };
        match raw {
            Some(raw) => match raw.parse::<usize>() {
                Ok(count) if count > 0 => max_jobs = count,
                _ => {
                    return Ok(Status::bad_argument(format!(
                        "in_parallel: invalid job count '{}'",
                        raw
                    )))
                }
            },
            None => break,
        }
        index += 1;
    }
    if index >= args.len() {
        return Ok(Status::bad_argument("in_parallel: expected a command"));
    }

    // Hold the launch until a slot frees up.
    loop {
        shell.jobs.reap();
        let running = shell
            .jobs
            .iter()
            .filter(|job| job.borrow().state() == JobState::Running)
            .count();
        if running < max_jobs {
            break;
        }
        shell.jobs.wait_for_any_update();
    }

    let mut command = Command::from_argv(args[index..].to_vec());
    command.should_wait = false;
    shell.run_commands(vec![command])?;
    Ok(Status::SUCCESS)
}

fn online_processors() -> usize {
    let count = unsafe { nix::libc::sysconf(nix::libc::_SC_NPROCESSORS_ONLN) };
    if count > 0 {
        count as usize
    } else {
        1
    }
}

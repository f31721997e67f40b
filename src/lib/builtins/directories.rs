//! Directory motion: `cd`, the `cdh` history, and the pushd/popd stack.

use super::helpers::Status;
use crate::{error::Result, shell::Shell, types::Str};

pub fn builtin_cd(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let target = args.get(1).map(Str::as_str);
    match shell.directory_stack.cd(target) {
        Ok(_) => Ok(Status::SUCCESS),
        Err(error) => Ok(Status::error(format!("cd: {}", error))),
    }
}

pub fn builtin_cdh(args: &[Str], shell: &mut Shell) -> Result<Status> {
    match args.get(1) {
        None => {
            for (index, dir) in shell.directory_stack.recent().enumerate() {
                println!("{:2}  {}", index + 1, dir.display());
            }
            Ok(Status::SUCCESS)
        }
        Some(raw) => match raw.parse::<usize>() {
            Ok(index) => match shell.directory_stack.cd_history(index) {
                Ok(_) => Ok(Status::SUCCESS),
                Err(error) => Ok(Status::error(format!("cdh: {}", error))),
            },
            Err(_) => Ok(Status::bad_argument(format!("cdh: invalid index '{}'", raw))),
        },
    }
}

pub fn builtin_dirs(_: &[Str], shell: &mut Shell) -> Result<Status> {
    println!("{}", shell.directory_stack.to_strings().join(" "));
    Ok(Status::SUCCESS)
}

pub fn builtin_pushd(args: &[Str], shell: &mut Shell) -> Result<Status> {
    let target = match args.get(1) {
        Some(target) => target,
        None => return Ok(Status::bad_argument("pushd: expected a directory")),
    };
    match shell.directory_stack.pushd(target) {
        Ok(_) => {
            println!("{}", shell.directory_stack.to_strings().join(" "));
            Ok(Status::SUCCESS)
        }
        Err(error) => Ok(Status::error(format!("pushd: {}", error))),
    }
}

pub fn builtin_popd(_: &[Str], shell: &mut Shell) -> Result<Status> {
    match shell.directory_stack.popd() {
        Ok(dir) => {
            println!("{}", dir.display());
            Ok(Status::SUCCESS)
        }
        Err(error) => Ok(Status::error(format!("popd: {}", error))),
    }
}

pub fn builtin_pwd(_: &[Str], shell: &mut Shell) -> Result<Status> {
    println!("{}", shell.directory_stack.current().display());
    Ok(Status::SUCCESS)
}

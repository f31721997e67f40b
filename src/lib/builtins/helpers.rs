//! Shared helpers for builtins: the `Status` result type and small
//! argument utilities.

use std::fmt::Display;

/// The outcome of a builtin: an exit code, with constructors that report
/// the failure on stderr as they build it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const FAILURE: Status = Status(1);

    pub fn new(code: i32) -> Status { Status(code) }

    pub fn error(message: impl Display) -> Status {
        eprintln!("Shell: {}", message);
        Status(1)
    }

    pub fn bad_argument(message: impl Display) -> Status {
        eprintln!("Shell: {}", message);
        Status(2)
    }

    pub fn from_bool(success: bool) -> Status {
        if success {
            Status::SUCCESS
        } else {
            Status::FAILURE
        }
    }

    pub fn code(self) -> i32 { self.0 }

    pub fn is_success(self) -> bool { self.0 == 0 }
}

/// Parses an optional leading numeric argument, defaulting otherwise.
pub fn numeric_argument(args: &[crate::types::Str], default: i32) -> Result<i32, Status> {
    match args.get(1) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| Status::bad_argument(format!("'{}' is not a number", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bool_maps_to_exit_codes() {
        assert_eq!(Status::from_bool(true).code(), 0);
        assert_eq!(Status::from_bool(false).code(), 1);
    }

    #[test]
    fn numeric_argument_defaults_and_parses() {
        let args = args!["exit", "3"];
        assert_eq!(numeric_argument(&args, 0), Ok(3));
        let args = args!["exit"];
        assert_eq!(numeric_argument(&args, 7), Ok(7));
    }
}

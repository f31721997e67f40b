use crate::position::Position;
use std::io;
use thiserror::Error;

/// Everything that can go wrong while parsing or evaluating, including the
/// internal control-flow kinds that unwind evaluation without being user
/// errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A structural error noticed at evaluation time
    #[error("{message}")]
    EvaluatedSyntax { message: String, position: Option<Position> },
    /// The glob pattern could not be compiled
    #[error("invalid glob pattern '{pattern}'")]
    InvalidGlob { pattern: String, position: Option<Position> },
    /// A slice selector did not apply to the sliced value
    #[error("invalid slice: {message}")]
    InvalidSliceContents { message: String, position: Option<Position> },
    /// A match expression ran out of rules
    #[error("no rule matched the value '{subject}'")]
    NonExhaustiveMatchRules { subject: String, position: Option<Position> },
    /// A redirection target could not be opened
    #[error("failed to open '{path}': {source}")]
    OpenFailure { path: String, #[source] source: io::Error },
    /// pipe(2) failed
    #[error("failed to create a pipe: {0}")]
    PipeFailure(#[source] nix::Error),
    /// A write to a descriptor the shell owns failed
    #[error("write failed: {0}")]
    WriteFailure(#[source] io::Error),
    /// A child could not be spawned
    #[error("failed to launch '{name}': {message}")]
    LaunchError { name: String, message: String },
    #[error("out of memory")]
    OutOfMemory,

    /// `break` unwinding to the enclosing loop
    #[error("break called outside of a loop")]
    Break,
    /// `continue` unwinding to the enclosing loop
    #[error("continue called outside of a loop")]
    Continue,
    /// `return` unwinding to the enclosing function invocation
    #[error("return called outside of a function")]
    Return,
    /// SIGINT observed while evaluating
    #[error("interrupted")]
    Interrupted,
    /// The foreground job was killed
    #[error("killed")]
    Killed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn syntax(message: impl Into<String>, position: Position) -> Self {
        Error::EvaluatedSyntax { message: message.into(), position: Some(position) }
    }

    /// Control-flow kinds unwind evaluation but are invisible to the error
    /// reporter.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Error::Break | Error::Continue | Error::Return | Error::Interrupted | Error::Killed
        )
    }

    /// Interrupted/Killed re-raise all the way to the command loop.
    pub fn must_reach_command_loop(&self) -> bool {
        matches!(self, Error::Interrupted | Error::Killed)
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            Error::EvaluatedSyntax { position, .. }
            | Error::InvalidGlob { position, .. }
            | Error::InvalidSliceContents { position, .. }
            | Error::NonExhaustiveMatchRules { position, .. } => *position,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flow_is_not_reported() {
        assert!(Error::Break.is_control_flow());
        assert!(Error::Interrupted.is_control_flow());
        assert!(!Error::OutOfMemory.is_control_flow());
        assert!(!Error::syntax("x", Position::default()).is_control_flow());
    }

    #[test]
    fn only_interruptions_reach_the_command_loop() {
        assert!(Error::Interrupted.must_reach_command_loop());
        assert!(Error::Killed.must_reach_command_loop());
        assert!(!Error::Break.must_reach_command_loop());
    }
}

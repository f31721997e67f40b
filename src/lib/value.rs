//! The lazy value model. Evaluating an AST node yields a `Value`; values
//! resolve on demand to flat string lists, single strings, or runnable
//! command descriptors.

use crate::{
    ast::Node,
    error::{Error, Result},
    position::Position,
    shell::Shell,
    types::Str,
};
use itertools::Itertools;
use nix::unistd::Pid;
use std::{cell::RefCell, os::unix::io::RawFd, rc::Rc};
use unicode_segmentation::UnicodeSegmentation;

/// A variable binding as stored in a local frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Variable {
    Str(Str),
    List(Vec<Str>),
}

impl Variable {
    pub fn into_list(self) -> Vec<Str> {
        match self {
            Variable::Str(s) => vec![s],
            Variable::List(list) => list,
        }
    }

    pub fn to_joined_string(&self) -> Str {
        match self {
            Variable::Str(s) => s.clone(),
            Variable::List(list) => list.iter().join(" "),
        }
    }
}

/// What to do with a chained node once the owning command exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainAction {
    /// Run only if the command exited zero
    And,
    /// Run only if the command exited non-zero
    Or,
    /// Run unconditionally
    Sequence,
}

/// A node queued to run after a command exits.
#[derive(Clone, Debug)]
pub struct NodeWithAction {
    pub node:   Node,
    pub action: ChainAction,
}

/// The process-group record shared by every member of one pipeline. The
/// first spawning member fills `pgid`; everyone else only reads it.
#[derive(Debug, Default)]
pub struct Pipeline {
    pub pgid: Option<Pid>,
}

/// How a path redirection opens its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathDirection {
    Read,
    Write,
    WriteAppend,
    ReadWrite,
}

/// Which side of an fd-to-fd redirection is closed after rewiring, and
/// whether a fresh pipe backs it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosePolicy {
    None,
    Old,
    New,
    RefreshNew,
    RefreshOld,
    ImmediatelyCloseNew,
}

/// An fd-to-fd redirection. The `Refresh*` policies allocate a pipe at
/// resolution time and publish the peer's end through `other_pipe_end`.
#[derive(Clone, Debug)]
pub struct FdRedirection {
    pub old_fd:         RawFd,
    pub new_fd:         RawFd,
    pub close_policy:   ClosePolicy,
    pub other_pipe_end: Option<Rc<RefCell<RawFd>>>,
}

#[derive(Clone, Debug)]
pub enum Redirection {
    Path { path: Str, fd: RawFd, direction: PathDirection },
    FdToFd(FdRedirection),
    Close { fd: RawFd },
}

/// A runtime command descriptor: what to run, how its descriptors are
/// rewired, and what runs after it.
#[derive(Clone, Debug)]
pub struct Command {
    pub argv: Vec<Str>,
    pub redirections: Vec<Redirection>,
    pub should_wait: bool,
    pub is_pipe_source: bool,
    pub should_notify_if_in_background: bool,
    /// Set only on argv-less chain carriers: the child, not the parent,
    /// evaluates `next_chain`.
    pub should_immediately_execute_next: bool,
    pub pipeline: Option<Rc<RefCell<Pipeline>>>,
    pub next_chain: Vec<NodeWithAction>,
    pub position: Option<Position>,
}

impl Default for Command {
    fn default() -> Self {
        Command {
            argv: Vec::new(),
            redirections: Vec::new(),
            should_wait: true,
            is_pipe_source: false,
            should_notify_if_in_background: true,
            should_immediately_execute_next: false,
            pipeline: None,
            next_chain: Vec::new(),
            position: None,
        }
    }
}

impl Command {
    pub fn from_argv(argv: Vec<Str>) -> Self { Command { argv, ..Default::default() } }

    /// True when running this command would do nothing at all.
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty() && self.pipeline.is_none() && self.next_chain.is_empty()
    }
}

#[derive(Clone, Debug)]
pub enum ValueKind {
    Str {
        text:       Str,
        /// When set, the string is list-shaped: it resolves to a list by
        /// splitting on this delimiter.
        split:      Option<Str>,
        keep_empty: bool,
    },
    List(Vec<Value>),
    Glob {
        pattern:  Str,
        position: Position,
    },
    SimpleVariable(Str),
    SpecialVariable(char),
    Tilde(Str),
    Command(Box<Command>),
    CommandSequence(Vec<Command>),
    Job(crate::shell::JobRef),
}

/// A lazily resolved value. The optional slice nodes compose in order,
/// each selecting from the entries of a resolved list or the grapheme
/// clusters of a resolved string.
#[derive(Clone, Debug)]
pub struct Value {
    pub kind: ValueKind,
    slices:   Vec<Node>,
}

enum Resolved {
    Str(Str),
    List(Vec<Str>),
}

impl Value {
    pub fn new(kind: ValueKind) -> Self { Value { kind, slices: Vec::new() } }

    pub fn string(text: impl Into<Str>) -> Self {
        Value::new(ValueKind::Str { text: text.into(), split: None, keep_empty: false })
    }

    pub fn string_with_split(text: impl Into<Str>, split: Str, keep_empty: bool) -> Self {
        Value::new(ValueKind::Str { text: text.into(), split: Some(split), keep_empty })
    }

    pub fn list(entries: Vec<Value>) -> Self { Value::new(ValueKind::List(entries)) }

    pub fn string_list(entries: Vec<Str>) -> Self {
        Value::list(entries.into_iter().map(Value::string).collect())
    }

    pub fn command(command: Command) -> Self { Value::new(ValueKind::Command(Box::new(command))) }

    pub fn sequence(commands: Vec<Command>) -> Self {
        Value::new(ValueKind::CommandSequence(commands))
    }

    pub fn empty_list() -> Self { Value::list(Vec::new()) }

    pub fn with_slices(mut self, slices: Vec<Node>) -> Self {
        self.slices.extend(slices);
        self
    }

    pub fn is_list(&self) -> bool {
        match &self.kind {
            ValueKind::List(_) => true,
            ValueKind::Str { split, .. } => split.is_some(),
            _ => false,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(&self.kind, ValueKind::Str { split: None, .. })
    }

    pub fn is_command_like(&self) -> bool {
        matches!(
            &self.kind,
            ValueKind::Command(_) | ValueKind::CommandSequence(_) | ValueKind::Job(_)
        )
    }

    pub fn is_job(&self) -> bool { matches!(&self.kind, ValueKind::Job(_)) }

    fn resolve_base(&self, shell: &mut Shell) -> Result<Resolved> {
        match &self.kind {
            ValueKind::Str { text, split: None, .. } => Ok(Resolved::Str(text.clone())),
            ValueKind::Str { text, split: Some(delim), keep_empty } => {
                if delim.is_empty() {
                    return Ok(Resolved::List(
                        text.graphemes(true).map(Str::from).collect(),
                    ));
                }
                let entries = text
                    .split(delim.as_str())
                    .filter(|segment| *keep_empty || !segment.is_empty())
                    .map(Str::from)
                    .collect();
                Ok(Resolved::List(entries))
            }
            ValueKind::List(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for entry in entries {
                    out.extend(entry.resolve_as_list(shell)?);
                }
                Ok(Resolved::List(out))
            }
            ValueKind::Glob { pattern, position } => {
                Ok(Resolved::List(shell.expand_glob(pattern, *position)?))
            }
            ValueKind::SimpleVariable(name) => match shell.variable(name) {
                Some(Variable::Str(s)) => Ok(Resolved::Str(s)),
                Some(Variable::List(list)) => Ok(Resolved::List(list)),
                None => Ok(Resolved::List(Vec::new())),
            },
            ValueKind::SpecialVariable(name) => match shell.special_variable(*name) {
                Some(Variable::Str(s)) => Ok(Resolved::Str(s)),
                Some(Variable::List(list)) => Ok(Resolved::List(list)),
                None => Ok(Resolved::List(Vec::new())),
            },
            ValueKind::Tilde(username) => {
                let user = if username.is_empty() { None } else { Some(username.as_str()) };
                match shell.tilde_home(user) {
                    Some(home) => Ok(Resolved::Str(home)),
                    None => Ok(Resolved::Str(format!("~{}", username))),
                }
            }
            ValueKind::Command(command) => {
                let entries = shell.capture_output_of(vec![(**command).clone()])?;
                Ok(Resolved::List(entries))
            }
            ValueKind::CommandSequence(_) => Err(Error::EvaluatedSyntax {
                message:  "cannot use a command sequence as a list".into(),
                position: None,
            }),
            ValueKind::Job(_) => Err(Error::EvaluatedSyntax {
                message:  "cannot use a job as a list".into(),
                position: None,
            }),
        }
    }

    fn apply_slices(&self, shell: &mut Shell, base: Resolved) -> Result<Resolved> {
        let mut current = base;
        for slice in &self.slices {
            let selectors = slice.run(shell)?.resolve_as_list(shell)?;
            current = match current {
                Resolved::Str(text) => {
                    let graphemes: Vec<&str> = text.graphemes(true).collect();
                    let selected = select(&selectors, graphemes.len(), slice.position())?
                        .into_iter()
                        .map(|i| graphemes[i])
                        .collect::<Str>();
                    Resolved::Str(selected)
                }
                Resolved::List(entries) => {
                    let selected = select(&selectors, entries.len(), slice.position())?
                        .into_iter()
                        .map(|i| entries[i].clone())
                        .collect();
                    Resolved::List(selected)
                }
            };
        }
        Ok(current)
    }

    pub fn resolve_as_list(&self, shell: &mut Shell) -> Result<Vec<Str>> {
        let base = self.resolve_base(shell)?;
        match self.apply_slices(shell, base)? {
            Resolved::Str(s) => Ok(vec![s]),
            Resolved::List(list) => Ok(list),
        }
    }

    pub fn resolve_as_string(&self, shell: &mut Shell) -> Result<Str> {
        let base = self.resolve_base(shell)?;
        match self.apply_slices(shell, base)? {
            Resolved::Str(s) => Ok(s),
            Resolved::List(list) => Ok(list.iter().join(" ")),
        }
    }

    pub fn resolve_as_commands(&self, shell: &mut Shell) -> Result<Vec<Command>> {
        match &self.kind {
            ValueKind::Command(command) => Ok(vec![(**command).clone()]),
            ValueKind::CommandSequence(commands) => Ok(commands.clone()),
            // The job already ran while this value was produced; there is
            // nothing left to execute.
            ValueKind::Job(_) => Ok(Vec::new()),
            _ => Ok(vec![Command::from_argv(self.resolve_as_list(shell)?)]),
        }
    }
}

fn select(selectors: &[Str], length: usize, position: Position) -> Result<Vec<usize>> {
    let mut indices = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let selected = ranges::indices_for(selector, length).map_err(|err| {
            Error::InvalidSliceContents { message: err.to_string(), position: Some(position) }
        })?;
        indices.extend(selected);
    }
    Ok(indices)
}

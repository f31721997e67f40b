//! Node evaluation. `run` yields a lazy `Value`; `for_each_entry` streams
//! list-shaped constructs without materializing them first.

use super::{
    ContinuationKind, HeredocNode, JuxtapositionMode, MatchEntry, MatchPatterns, Node, NodeKind,
    PathRedirection,
};
use crate::{
    error::{Error, Result},
    expansion::{self, globber},
    shell::{FrameKind, Shell, ShellFunction},
    types::Str,
    value::{
        ChainAction, ClosePolicy, Command, FdRedirection, NodeWithAction, PathDirection, Pipeline,
        Redirection, Value, ValueKind, Variable,
    },
};
use std::{cell::RefCell, rc::Rc};

/// Decision returned by `for_each_entry` callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Iterate {
    Continue,
    Break,
}

pub type EntryCallback<'a> = dyn FnMut(&mut Shell, Value) -> Result<Iterate> + 'a;

impl Node {
    /// Evaluates this node to a `Value`.
    pub fn run(&self, shell: &mut Shell) -> Result<Value> {
        match self.kind() {
            NodeKind::And { left, right } => {
                let mut commands = left.to_lazy_evaluated_commands(shell)?;
                if let Some(last) = commands.last_mut() {
                    last.next_chain.push(NodeWithAction {
                        node:   (**right).clone(),
                        action: ChainAction::And,
                    });
                }
                Ok(Value::sequence(commands))
            }
            NodeKind::Or { left, right } => {
                let mut commands = left.to_lazy_evaluated_commands(shell)?;
                if let Some(last) = commands.last_mut() {
                    last.next_chain.push(NodeWithAction {
                        node:   (**right).clone(),
                        action: ChainAction::Or,
                    });
                }
                Ok(Value::sequence(commands))
            }
            NodeKind::Pipe { left, right } => {
                let left_commands = left.to_lazy_evaluated_commands(shell)?;
                let right_commands = right.to_lazy_evaluated_commands(shell)?;
                Ok(Value::sequence(connect_pipe(left_commands, right_commands)))
            }
            NodeKind::Sequence { entries } => {
                let mut all = Vec::new();
                for entry in entries {
                    let wait_for_tail =
                        all.last().map(|command: &Command| command.should_wait).unwrap_or(false);
                    if wait_for_tail {
                        all.last_mut().unwrap().next_chain.push(NodeWithAction {
                            node:   entry.clone(),
                            action: ChainAction::Sequence,
                        });
                    } else {
                        all.extend(entry.to_lazy_evaluated_commands(shell)?);
                    }
                }
                Ok(Value::sequence(all))
            }
            NodeKind::Background { command } => {
                let mut commands = command.to_lazy_evaluated_commands(shell)?;
                for command in &mut commands {
                    command.should_wait = false;
                }
                Ok(Value::sequence(commands))
            }
            NodeKind::Join { left, right } => {
                let mut left_commands = left.to_lazy_evaluated_commands(shell)?;
                let rewrite = match left_commands.last() {
                    Some(last) => last.should_wait && !last.next_chain.is_empty(),
                    None => false,
                };
                if rewrite {
                    // Join (C0s*; C1) X -> (C0s*; Join C1 X)
                    let last_chained = left_commands
                        .last_mut()
                        .unwrap()
                        .next_chain
                        .last_mut()
                        .unwrap();
                    let inner = last_chained.node.clone();
                    last_chained.node = Node::new(
                        NodeKind::Join {
                            left:  Box::new(inner),
                            right: Box::new((**right).clone()),
                        },
                        self.position(),
                    );
                    return Ok(Value::sequence(left_commands));
                }
                let right_commands = right.to_lazy_evaluated_commands(shell)?;
                Ok(Value::sequence(join_commands(left_commands, right_commands)))
            }

            NodeKind::Execute { command, .. } => {
                if command.would_execute() {
                    return command.run(shell);
                }
                let mut values = Vec::new();
                self.for_each_entry(shell, &mut |_, value| {
                    values.push(value);
                    Ok(Iterate::Continue)
                })?;
                if values.len() == 1 && values[0].is_job() {
                    return Ok(values.remove(0));
                }
                Ok(Value::list(values))
            }
            NodeKind::CastToCommand { inner } => {
                let value = inner.run(shell)?;
                if value.is_command_like() {
                    return Ok(value);
                }
                let mut command = Command::from_argv(value.resolve_as_list(shell)?);
                command.position = Some(self.position());
                Ok(Value::command(command))
            }
            NodeKind::CastToList { inner } => match inner {
                None => Ok(Value::empty_list()),
                Some(inner) => {
                    let mut values = Vec::new();
                    inner.for_each_entry(shell, &mut |_, value| {
                        values.push(value);
                        Ok(Iterate::Continue)
                    })?;
                    Ok(Value::list(values))
                }
            },
            NodeKind::ReadRedirection(redir) => {
                self.run_path_redirection(shell, redir, PathDirection::Read)
            }
            NodeKind::WriteRedirection(redir) => {
                self.run_path_redirection(shell, redir, PathDirection::Write)
            }
            NodeKind::WriteAppendRedirection(redir) => {
                self.run_path_redirection(shell, redir, PathDirection::WriteAppend)
            }
            NodeKind::ReadWriteRedirection(redir) => {
                self.run_path_redirection(shell, redir, PathDirection::ReadWrite)
            }
            NodeKind::Fd2FdRedirection { old_fd, new_fd } => {
                let mut command = Command::default();
                command.position = Some(self.position());
                command.redirections.push(Redirection::FdToFd(FdRedirection {
                    old_fd:         *old_fd,
                    new_fd:         *new_fd,
                    close_policy:   ClosePolicy::None,
                    other_pipe_end: None,
                }));
                Ok(Value::command(command))
            }
            NodeKind::CloseFdRedirection { fd } => {
                let mut command = Command::default();
                command.position = Some(self.position());
                command.redirections.push(Redirection::Close { fd: *fd });
                Ok(Value::command(command))
            }
            NodeKind::CommandLiteral { command } => Ok(Value::command(command.clone())),

            NodeKind::StringLiteral { text, .. } => Ok(Value::string(text.clone())),
            NodeKind::DoubleQuotedString { inner } => match inner {
                None => Ok(Value::string("")),
                Some(inner) => {
                    let text = inner.run(shell)?.resolve_as_string(shell)?;
                    Ok(Value::string(text))
                }
            },
            NodeKind::BarewordLiteral { text } => Ok(Value::string(text.clone())),
            NodeKind::Glob { text } => Ok(Value::new(ValueKind::Glob {
                pattern:  text.clone(),
                position: self.position(),
            })),
            NodeKind::Tilde { username } => Ok(Value::new(ValueKind::Tilde(username.clone()))),
            NodeKind::Heredoc(heredoc) => self.run_heredoc(shell, heredoc),
            NodeKind::StringPartCompose { .. } => {
                // Flattened iteratively so long concatenations do not
                // recurse through every part.
                let mut text = Str::new();
                for part in flatten_compose(self) {
                    text.push_str(&part.run(shell)?.resolve_as_string(shell)?);
                }
                Ok(Value::string(text))
            }
            NodeKind::Juxtaposition { left, right, mode } => {
                let left_value = left.run(shell)?;
                let right_value = right.run(shell)?;
                juxtapose(shell, &left_value, &right_value, *mode)
            }

            NodeKind::SimpleVariable { name, slice } => {
                let value = Value::new(ValueKind::SimpleVariable(name.clone()));
                Ok(match slice {
                    Some(slice) => value.with_slices(vec![(**slice).clone()]),
                    None => value,
                })
            }
            NodeKind::SpecialVariable { name, slice } => {
                let value = Value::new(ValueKind::SpecialVariable(*name));
                Ok(match slice {
                    Some(slice) => value.with_slices(vec![(**slice).clone()]),
                    None => value,
                })
            }
            NodeKind::Slice { inner } => inner.run(shell),

            NodeKind::ListConcatenate { entries } => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    values.push(entry.run(shell)?);
                }
                Ok(Value::list(values))
            }
            NodeKind::BraceExpansion { entries } => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    values.push(entry.run(shell)?);
                }
                Ok(Value::list(values))
            }
            NodeKind::Range { start, end } => {
                let start_text = start.run(shell)?.resolve_as_string(shell)?;
                let end_text = end.run(shell)?.resolve_as_string(shell)?;
                match ranges::expand_range(&start_text, &end_text) {
                    Some(entries) => Ok(Value::string_list(entries)),
                    None => Err(Error::syntax(
                        "range endpoints are neither single code points nor integers",
                        self.position(),
                    )),
                }
            }

            NodeKind::IfCond { condition, true_branch, false_branch, .. } => {
                let cond = condition.run(shell)?;
                if let ValueKind::Job(job) = &cond.kind {
                    shell.block_on_job(job)?;
                }
                let branch =
                    if shell.last_return_code == 0 { true_branch } else { false_branch };
                match branch {
                    Some(branch) => branch.run(shell),
                    None => Ok(Value::empty_list()),
                }
            }
            NodeKind::ForLoop { .. } => self.run_for_loop(shell),
            NodeKind::Subshell { block } => match block {
                None => Ok(Value::empty_list()),
                Some(block) => {
                    let mut carrier = Command::default();
                    carrier.position = Some(self.position());
                    carrier.should_immediately_execute_next = true;
                    carrier.next_chain.push(NodeWithAction {
                        node:   (**block).clone(),
                        action: ChainAction::Sequence,
                    });
                    Ok(Value::command(carrier))
                }
            },
            NodeKind::MatchExpr { .. } => self.run_match(shell),
            NodeKind::ContinuationControl { kind } => match kind {
                ContinuationKind::Break => Err(Error::Break),
                ContinuationKind::Continue => Err(Error::Continue),
            },
            NodeKind::FunctionDeclaration { name, arguments, block } => {
                shell.define_function(ShellFunction {
                    name:     name.name.clone(),
                    argnames: arguments.iter().map(|arg| arg.name.clone()).collect(),
                    body:     block.as_deref().cloned(),
                });
                Ok(Value::empty_list())
            }

            NodeKind::DynamicEvaluate { inner } => {
                let value = inner.run(shell)?;
                if value.is_string() {
                    let name = value.resolve_as_string(shell)?;
                    return Ok(Value::new(ValueKind::SimpleVariable(name)));
                }
                let argv = value.resolve_as_list(shell)?;
                let mut command = Command::from_argv(argv);
                command.position = Some(self.position());
                Ok(Value::command(command))
            }
            NodeKind::ImmediateExpression { name, arguments } => {
                let replacement =
                    expansion::invoke_immediate(shell, name, arguments, self.position())?;
                replacement.run(shell)
            }
            NodeKind::HistoryEvent { selector } => {
                let entry = shell.history.find(&selector.event).ok_or_else(|| {
                    Error::syntax("history event did not match any entry", self.position())
                })?;
                let parsed = crate::parser::parse(&entry, shell.options.posix_mode);
                if parsed.is_syntax_error() {
                    return Err(Error::syntax(
                        "selected history entry does not parse",
                        self.position(),
                    ));
                }
                let words: Vec<Str> = entry.split_whitespace().map(Str::from).collect();
                let selected: Vec<Str> = match selector.word_range {
                    None => words,
                    Some((start, end)) => {
                        let end = end.unwrap_or_else(|| words.len().saturating_sub(1));
                        if start >= words.len() || end >= words.len() || end < start {
                            return Err(Error::syntax(
                                "history word range is out of bounds",
                                self.position(),
                            ));
                        }
                        words[start..=end].to_vec()
                    }
                };
                Ok(Value::string_list(selected))
            }
            NodeKind::VariableDeclarations { variables } => {
                for declaration in variables {
                    let name = declaration.name.run(shell)?.resolve_as_string(shell)?;
                    let value = declaration.value.run(shell)?;
                    let variable = if value.is_list() {
                        Variable::List(value.resolve_as_list(shell)?)
                    } else {
                        Variable::Str(value.resolve_as_string(shell)?)
                    };
                    shell.assign_variable(&name, variable);
                }
                Ok(Value::empty_list())
            }
            NodeKind::Comment { .. } => Ok(Value::empty_list()),
            NodeKind::SyntaxError(info) => {
                Err(Error::syntax(info.message.clone(), self.position()))
            }
            NodeKind::SyntheticValue { value } => Ok(value.clone()),
        }
    }

    /// Evaluates to commands: the composition used everywhere a node is
    /// about to be executed.
    pub fn to_lazy_evaluated_commands(&self, shell: &mut Shell) -> Result<Vec<Command>> {
        let commands = self.run(shell)?.resolve_as_commands(shell)?;
        Ok(commands)
    }

    /// Streams the entries this node produces. List-shaped constructs
    /// iterate lazily; everything else resolves and yields its list.
    pub fn for_each_entry(
        &self,
        shell: &mut Shell,
        callback: &mut EntryCallback<'_>,
    ) -> Result<Iterate> {
        match self.kind() {
            NodeKind::ListConcatenate { entries } | NodeKind::BraceExpansion { entries } => {
                for entry in entries {
                    if entry.for_each_entry(shell, callback)? == Iterate::Break {
                        return Ok(Iterate::Break);
                    }
                }
                Ok(Iterate::Continue)
            }
            NodeKind::Range { .. } => {
                let entries = self.run(shell)?.resolve_as_list(shell)?;
                for entry in entries {
                    if callback(shell, Value::string(entry))? == Iterate::Break {
                        return Ok(Iterate::Break);
                    }
                }
                Ok(Iterate::Continue)
            }
            NodeKind::Execute { command, capture_stdout } => {
                if command.would_execute() {
                    return command.for_each_entry(shell, callback);
                }
                let commands = command.to_lazy_evaluated_commands(shell)?;

                if *capture_stdout {
                    if !commands.iter().any(|command| !command.is_empty()) {
                        return Err(Error::syntax(
                            "cannot capture standard output when no command is being executed",
                            self.position(),
                        ));
                    }
                    return shell.for_each_captured_entry(commands, self.position(), callback);
                }

                let jobs = shell.run_commands(commands)?;
                if let Some(job) = jobs.last() {
                    return callback(shell, Value::new(ValueKind::Job(job.clone())));
                }
                Ok(Iterate::Continue)
            }
            _ => {
                let value = self.run(shell)?;
                if value.is_job() || value.is_command_like() {
                    return callback(shell, value);
                }
                for entry in value.resolve_as_list(shell)? {
                    if callback(shell, Value::string(entry))? == Iterate::Break {
                        return Ok(Iterate::Break);
                    }
                }
                Ok(Iterate::Continue)
            }
        }
    }

    fn run_path_redirection(
        &self,
        shell: &mut Shell,
        redir: &PathRedirection,
        direction: PathDirection,
    ) -> Result<Value> {
        let words = redir.path.run(shell)?.resolve_as_list(shell)?;
        // A path expression resolving to several words joins with a single
        // space. Surprising, but what the language has always done.
        let path = words.join(" ");
        let mut command = Command::default();
        command.position = Some(self.position());
        command.redirections.push(Redirection::Path { path, fd: redir.fd, direction });
        Ok(Value::command(command))
    }

    fn run_heredoc(&self, shell: &mut Shell, heredoc: &HeredocNode) -> Result<Value> {
        let contents = heredoc.contents.borrow();
        let node = match &*contents {
            Some(node) => node,
            None if shell.options.posix_mode => {
                return Ok(Value::string(""));
            }
            None => {
                return Err(Error::syntax(
                    format!("heredoc '{}' was never resolved", heredoc.end),
                    self.position(),
                ))
            }
        };
        let text = node.run(shell)?.resolve_as_string(shell)?;
        if heredoc.evaluates_to_string {
            return Ok(Value::string(text));
        }

        let (read_end, write_end) = nix::unistd::pipe().map_err(Error::PipeFailure)?;
        let mut written = 0;
        let bytes = text.as_bytes();
        while written < bytes.len() {
            match nix::unistd::write(write_end, &bytes[written..]) {
                Ok(count) => written += count,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => {
                    let _ = nix::unistd::close(write_end);
                    let _ = nix::unistd::close(read_end);
                    return Err(Error::WriteFailure(std::io::Error::from_raw_os_error(
                        err as i32,
                    )));
                }
            }
        }
        let _ = nix::unistd::close(write_end);

        let mut command = Command::default();
        command.position = Some(self.position());
        command.redirections.push(Redirection::FdToFd(FdRedirection {
            old_fd:         read_end,
            new_fd:         heredoc.target_fd,
            close_policy:   ClosePolicy::Old,
            other_pipe_end: None,
        }));
        Ok(Value::command(command))
    }

    fn run_for_loop(&self, shell: &mut Shell) -> Result<Value> {
        let (variable, index_variable, iterated_expression, block) = match self.kind() {
            NodeKind::ForLoop { variable, index_variable, iterated_expression, block } => {
                (variable, index_variable, iterated_expression, block)
            }
            _ => unreachable!("run_for_loop on a non-loop node"),
        };
        let block = match block {
            Some(block) => block,
            None => return Ok(Value::empty_list()),
        };

        let mut consecutive_interruptions = 0usize;

        match iterated_expression {
            Some(iterated) => {
                let variable_name =
                    variable.as_ref().map(|name| name.name.clone()).unwrap_or_else(|| "it".into());
                let index_name = index_variable.as_ref().map(|name| name.name.clone());
                let mut index = 0usize;
                iterated.for_each_entry(shell, &mut |shell, value| {
                    if consecutive_interruptions >= 2 {
                        return Ok(Iterate::Break);
                    }
                    let entry = value.resolve_as_string(shell)?;
                    shell.push_frame("for", FrameKind::Block);
                    shell.set_local_variable(&variable_name, Variable::Str(entry));
                    if let Some(index_name) = &index_name {
                        shell.set_local_variable(index_name, Variable::Str(index.to_string()));
                    }
                    index += 1;
                    let outcome = run_loop_body(shell, block);
                    shell.pop_frame();
                    decide(outcome, &mut consecutive_interruptions)
                })?;
            }
            None => loop {
                if consecutive_interruptions >= 2 {
                    break;
                }
                shell.push_frame("loop", FrameKind::Block);
                let outcome = run_loop_body(shell, block);
                shell.pop_frame();
                if decide(outcome, &mut consecutive_interruptions)? == Iterate::Break {
                    break;
                }
            },
        }

        Ok(Value::empty_list())
    }

    fn run_match(&self, shell: &mut Shell) -> Result<Value> {
        let (subject, subject_name, entries) = match self.kind() {
            NodeKind::MatchExpr { subject, subject_name, entries } => {
                (subject, subject_name, entries)
            }
            _ => unreachable!("run_match on a non-match node"),
        };

        let subject_value = subject.run(shell)?;
        let subject_list = subject_value.resolve_as_list(shell)?;

        for entry in entries {
            if let Some(bindings) = entry_match(shell, entry, &subject_list)? {
                let body = match &entry.body {
                    Some(body) => body,
                    None => return Ok(Value::empty_list()),
                };
                shell.push_frame("match", FrameKind::Block);
                if let Some(name) = subject_name {
                    shell.set_local_variable(name, Variable::List(subject_list.clone()));
                }
                for (name, capture) in entry.match_names.iter().zip(bindings) {
                    shell.set_local_variable(&name.name, Variable::Str(capture));
                }
                let result = body.run(shell);
                shell.pop_frame();
                return result;
            }
        }

        if shell.options.posix_mode {
            return Ok(Value::empty_list());
        }
        Err(Error::NonExhaustiveMatchRules {
            subject:  subject_list.join(" "),
            position: Some(self.position()),
        })
    }

}

fn run_loop_body(shell: &mut Shell, block: &Node) -> Result<()> {
    let value = block.run(shell)?;
    if let ValueKind::Job(job) = &value.kind {
        let background = job.borrow().is_running_in_background();
        if !background {
            shell.block_on_job(job)?;
        }
    }
    Ok(())
}

/// Applies the loop's control-flow rules to one iteration's outcome.
fn decide(outcome: Result<()>, consecutive_interruptions: &mut usize) -> Result<Iterate> {
    match outcome {
        Ok(()) => {
            *consecutive_interruptions = 0;
            Ok(Iterate::Continue)
        }
        Err(Error::Break) | Err(Error::Return) => Ok(Iterate::Break),
        Err(Error::Continue) => {
            *consecutive_interruptions = 0;
            Ok(Iterate::Continue)
        }
        Err(Error::Interrupted) => {
            *consecutive_interruptions += 1;
            Ok(Iterate::Continue)
        }
        Err(Error::Killed) => Ok(Iterate::Break),
        Err(other) => Err(other),
    }
}

fn entry_match(
    shell: &mut Shell,
    entry: &MatchEntry,
    subject: &[Str],
) -> Result<Option<Vec<Str>>> {
    match &entry.patterns {
        MatchPatterns::Glob(options) => {
            for option in options {
                let patterns = option.run(shell)?.resolve_as_list(shell)?;
                if patterns.len() != subject.len() {
                    continue;
                }
                let mut captures = Vec::new();
                let matched = patterns.iter().zip(subject).all(|(pattern, text)| {
                    match globber::match_with_captures(pattern, text) {
                        Some(spans) => {
                            captures.extend(spans);
                            true
                        }
                        None => false,
                    }
                });
                if matched {
                    return Ok(Some(captures));
                }
            }
            Ok(None)
        }
        MatchPatterns::Regex(sources) => {
            if subject.len() != 1 {
                return Ok(None);
            }
            for source in sources {
                let regex = regex::Regex::new(source).map_err(|_| Error::EvaluatedSyntax {
                    message:  format!("invalid regular expression '{}'", source),
                    position: None,
                })?;
                if let Some(found) = regex.captures(&subject[0]) {
                    let captures = found
                        .iter()
                        .skip(1)
                        .map(|group| group.map(|m| Str::from(m.as_str())).unwrap_or_default())
                        .collect();
                    return Ok(Some(captures));
                }
            }
            Ok(None)
        }
    }
}

/// Wires `left | right`: the write end on the left tail, the read end on
/// the right head, both through refreshable descriptors resolved when the
/// commands spawn.
fn connect_pipe(mut left: Vec<Command>, mut right: Vec<Command>) -> Vec<Command> {
    let mut last_in_left = match left.pop() {
        Some(command) => command,
        None => return right,
    };
    let mut first_in_right = match right.first().cloned() {
        Some(command) => {
            right.remove(0);
            command
        }
        None => {
            left.push(last_in_left);
            return left;
        }
    };

    let shared_end = Rc::new(RefCell::new(-1));
    let read_end = FdRedirection {
        old_fd:         -1,
        new_fd:         0,
        close_policy:   ClosePolicy::Old,
        other_pipe_end: Some(shared_end.clone()),
    };
    let write_end = FdRedirection {
        old_fd:         -1,
        new_fd:         1,
        close_policy:   ClosePolicy::RefreshOld,
        other_pipe_end: Some(shared_end),
    };

    insert_at_start_or_after_last_pipe(&mut first_in_right.redirections, Redirection::FdToFd(read_end));
    insert_at_start_or_after_last_pipe(&mut last_in_left.redirections, Redirection::FdToFd(write_end));

    last_in_left.should_wait = false;
    last_in_left.is_pipe_source = true;

    match &first_in_right.pipeline {
        Some(pipeline) => last_in_left.pipeline = Some(pipeline.clone()),
        None => {
            let pipeline = Rc::new(RefCell::new(Pipeline::default()));
            last_in_left.pipeline = Some(pipeline.clone());
            first_in_right.pipeline = Some(pipeline);
        }
    }

    let mut commands = left;
    commands.push(last_in_left);
    commands.push(first_in_right);
    commands.extend(right);
    commands
}

fn insert_at_start_or_after_last_pipe(redirections: &mut Vec<Redirection>, redirection: Redirection) {
    let mut insert_index = 0;
    for (i, existing) in redirections.iter().enumerate().rev() {
        if let Redirection::FdToFd(fd_redirection) = existing {
            if fd_redirection.old_fd == -1 {
                insert_index = i;
                break;
            }
        }
    }
    redirections.insert(insert_index, redirection);
}

fn join_commands(mut left: Vec<Command>, mut right: Vec<Command>) -> Vec<Command> {
    let last_in_left = match left.pop() {
        Some(command) => command,
        None => return right,
    };
    if right.is_empty() {
        left.push(last_in_left);
        return left;
    }
    let first_in_right = right.remove(0);

    let mut command = Command::default();
    command.argv.extend(last_in_left.argv);
    command.argv.extend(first_in_right.argv);
    command.redirections.extend(last_in_left.redirections);
    command.redirections.extend(first_in_right.redirections);
    command.should_wait = last_in_left.should_wait && first_in_right.should_wait;
    command.is_pipe_source = first_in_right.is_pipe_source;
    command.should_notify_if_in_background = first_in_right.should_notify_if_in_background;
    command.pipeline = first_in_right.pipeline.or(last_in_left.pipeline);
    command.next_chain = first_in_right.next_chain;
    command.position = match (last_in_left.position, first_in_right.position) {
        (Some(left_pos), Some(right_pos)) => Some(left_pos.with_end(&right_pos)),
        (left_pos, right_pos) => left_pos.or(right_pos),
    };

    let mut commands = left;
    commands.push(command);
    commands.extend(right);
    commands
}

/// Left-to-right leaves of a `StringPartCompose` chain, collected with an
/// explicit stack.
fn flatten_compose(node: &Node) -> Vec<&Node> {
    let mut parts = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            NodeKind::StringPartCompose { left, right } => {
                stack.push(right);
                stack.push(left);
            }
            _ => parts.push(current),
        }
    }
    parts
}

pub(crate) fn juxtapose(
    shell: &mut Shell,
    left: &Value,
    right: &Value,
    mode: JuxtapositionMode,
) -> Result<Value> {
    let left_is_string = left.is_string();
    let right_is_string = right.is_string();
    let left_list = left.resolve_as_list(shell)?;
    let right_list = right.resolve_as_list(shell)?;

    match mode {
        JuxtapositionMode::ListExpand => {
            if left_is_string && right_is_string && left_list.len() == 1 && right_list.len() == 1 {
                return Ok(Value::string(format!("{}{}", left_list[0], right_list[0])));
            }
            // Cartesian concatenation, left-major; an empty side empties
            // the product.
            let mut product = Vec::with_capacity(left_list.len() * right_list.len());
            for left_entry in &left_list {
                for right_entry in &right_list {
                    product.push(format!("{}{}", left_entry, right_entry));
                }
            }
            Ok(Value::string_list(product))
        }
        JuxtapositionMode::StringExpand => {
            if left_list.is_empty() {
                return Ok(Value::string_list(right_list));
            }
            if right_list.is_empty() {
                return Ok(Value::string_list(left_list));
            }
            let mut glued = Vec::with_capacity(left_list.len() + right_list.len() - 1);
            glued.extend(left_list[..left_list.len() - 1].iter().cloned());
            glued.push(format!("{}{}", left_list[left_list.len() - 1], right_list[0]));
            glued.extend(right_list[1..].iter().cloned());
            Ok(Value::string_list(glued))
        }
    }
}

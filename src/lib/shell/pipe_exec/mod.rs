//! The execution engine: turning `Command` descriptors into processes,
//! builtins, and function calls; wiring pipelines; tracking jobs; and
//! driving tail chains once exits are observed.

pub mod streams;

use self::streams::{apply_rewirings, resolve_redirections, FdCollector, Rewiring, SavedStreams};
use super::{signals, JobRef, JobState, Shell};
use crate::{
    ast::{Iterate, Node, NodeKind},
    error::{Error, Result},
    position::Position,
    types::Str,
    value::{
        ChainAction, ClosePolicy, Command, FdRedirection, NodeWithAction, Redirection, Value,
    },
};
use nix::{
    poll::{poll, PollFd, PollFlags},
    sys::signal::Signal,
    unistd::{self, ForkResult},
};
use std::{ffi::CString, process};

/// What the child process does once the sync byte arrives and the
/// rewirings are applied.
enum ChildWork {
    Exec,
    Builtin,
    Function,
    Chain(Vec<NodeWithAction>),
}

impl Shell {
    /// Runs a command sequence, returning every job it spawned.
    pub fn run_commands(&mut self, commands: Vec<Command>) -> Result<Vec<JobRef>> {
        let commands = self.expand_aliases(commands);
        self.run_commands_preexpanded(commands)
    }

    /// The engine proper, for commands whose argv already went through
    /// alias expansion.
    fn run_commands_preexpanded(&mut self, commands: Vec<Command>) -> Result<Vec<JobRef>> {
        let mut jobs = Vec::new();
        for command in commands {
            let should_wait = command.should_wait;
            let is_pipe_source = command.is_pipe_source;
            let notify = command.should_notify_if_in_background;
            let immediate = command.should_immediately_execute_next;
            let chain = command.next_chain.clone();
            let spawned = self.run_one_command(command)?;

            if let Some(job) = spawned {
                jobs.push(job.clone());
                if should_wait && !is_pipe_source {
                    self.block_on_job(&job)?;
                    if job.borrow().is_finished() {
                        self.wait_for_pipeline_peers(&job);
                    }
                    // An immediate carrier's child already ran the chain.
                    if !immediate {
                        self.run_tail_chain(&chain)?;
                    }
                } else if !should_wait {
                    let id = job.borrow().job_id();
                    let pid = job.borrow().pid();
                    if self.options.interactive && notify {
                        eprintln!("[{}] {}", id, pid);
                    }
                }
            } else if should_wait {
                // Builtins and functions ran inline; their chain still
                // follows the fresh return code.
                self.run_tail_chain(&chain)?;
            }
        }
        self.jobs.cleanup();
        Ok(jobs)
    }

    /// Waits out the remaining members of a finished job's pipeline.
    fn wait_for_pipeline_peers(&mut self, job: &JobRef) {
        let pgid = job.borrow().pgid();
        loop {
            let peer = self
                .jobs
                .iter()
                .find(|peer| {
                    let peer = peer.borrow();
                    peer.pgid() == pgid && !peer.is_finished() && !peer.is_suspended()
                })
                .cloned();
            match peer {
                Some(peer) => self.jobs.wait_for_update(&peer),
                None => break,
            }
        }
    }

    fn run_one_command(&mut self, mut command: Command) -> Result<Option<JobRef>> {
        // An empty command that only carries redirections extends the
        // shell's own redirection scope; its chain (if any) runs in the
        // caller with the current return code.
        if command.argv.is_empty()
            && !command.should_immediately_execute_next
            && command.pipeline.is_none()
        {
            self.global_redirections.extend(command.redirections.drain(..));
            return Ok(None);
        }

        // A background command with a tail chain becomes a chain carrier:
        // the child runs both, asynchronously from us. Pipe sources are
        // exempt; their descriptors must resolve in this process.
        if !command.should_wait
            && !command.is_pipe_source
            && !command.next_chain.is_empty()
            && !command.should_immediately_execute_next
            && !command.argv.is_empty()
        {
            command = make_carrier(command);
        }

        let is_carrier = command.should_immediately_execute_next && command.argv.is_empty();
        let program = command.argv.first().cloned().unwrap_or_default();
        let can_run_inline = command.should_wait
            && !command.is_pipe_source
            && command.pipeline.is_none()
            && !is_carrier;

        if can_run_inline && self.builtins.contains(&program) {
            let mut collector = FdCollector::new();
            let rewirings = self.resolve_all_redirections(&command, &mut collector)?;
            let status = {
                let _saved = SavedStreams::apply_in_process(&rewirings)?;
                self.run_builtin(&program, &command.argv)?
            };
            drop(collector);
            self.last_return_code = status;
            return Ok(None);
        }

        if can_run_inline && self.functions.contains_key(&program) {
            let function = self.functions.get(&program).cloned().unwrap();
            let mut collector = FdCollector::new();
            let rewirings = self.resolve_all_redirections(&command, &mut collector)?;
            let _saved = SavedStreams::apply_in_process(&rewirings)?;
            self.invoke_function(&function, &command.argv)?;
            return Ok(None);
        }

        // Everything else forks.
        let work = if is_carrier {
            ChildWork::Chain(command.next_chain.clone())
        } else if self.builtins.contains(&program) {
            ChildWork::Builtin
        } else if self.functions.contains_key(&program) {
            ChildWork::Function
        } else {
            ChildWork::Exec
        };
        let job = self.spawn(&command, work)?;
        Ok(Some(job))
    }

    fn resolve_all_redirections(
        &mut self,
        command: &Command,
        collector: &mut FdCollector,
    ) -> Result<Vec<Rewiring>> {
        let mut combined = self.global_redirections.clone();
        combined.extend(command.redirections.iter().cloned());
        resolve_redirections(&combined, collector)
    }

    fn spawn(&mut self, command: &Command, work: ChildWork) -> Result<JobRef> {
        let mut collector = FdCollector::new();
        let rewirings = self.resolve_all_redirections(command, &mut collector)?;

        let (sync_read, sync_write) =
            unistd::pipe().map_err(Error::PipeFailure)?;

        match unsafe { unistd::fork() }.map_err(|errno| Error::LaunchError {
            name:    command.argv.first().cloned().unwrap_or_else(|| "fork".into()),
            message: errno.to_string(),
        })? {
            ForkResult::Child => {
                let _ = unistd::close(sync_write);
                signals::prepare_child();

                // Wait for the parent to finish group and terminal setup.
                let mut byte = [0u8; 1];
                loop {
                    match unistd::read(sync_read, &mut byte) {
                        Err(nix::errno::Errno::EINTR) => continue,
                        _ => break,
                    }
                }
                let _ = unistd::close(sync_read);

                if apply_rewirings(&rewirings).is_err() {
                    process::exit(126);
                }
                drop(collector);

                let code = self.run_child_work(command, work);
                process::exit(code);
            }
            ForkResult::Parent { child } => {
                let _ = unistd::close(sync_read);

                let pgid = match &command.pipeline {
                    Some(pipeline) => {
                        let mut pipeline = pipeline.borrow_mut();
                        match pipeline.pgid {
                            Some(pgid) => {
                                let _ = unistd::setpgid(child, pgid);
                                pgid
                            }
                            None => {
                                let _ = unistd::setpgid(child, child);
                                pipeline.pgid = Some(child);
                                child
                            }
                        }
                    }
                    None => {
                        let _ = unistd::setpgid(child, child);
                        child
                    }
                };

                if command.should_wait && self.options.interactive && !self.is_library {
                    let _ = unistd::tcsetpgrp(0, pgid);
                }

                let _ = unistd::write(sync_write, &[1u8]);
                let _ = unistd::close(sync_write);
                drop(collector);

                let description = if command.argv.is_empty() {
                    Str::from("(subshell)")
                } else {
                    command.argv.join(" ")
                };
                let job = self.jobs.add(child, pgid, description, !command.should_wait);
                if command.is_pipe_source {
                    // Pipeline members are bookkeeping, not user-visible
                    // background jobs.
                    let mut member = job.borrow_mut();
                    member.set_should_announce(false);
                    member.mark_notified();
                } else if !command.should_notify_if_in_background {
                    job.borrow_mut().set_should_announce(false);
                }
                Ok(job)
            }
        }
    }

    fn run_child_work(&mut self, command: &Command, work: ChildWork) -> i32 {
        // This copy of the shell is a child: it never owns the terminal,
        // and the inherited job records belong to the parent.
        self.is_library = true;
        self.options.interactive = false;
        self.jobs = super::JobTable::new();
        match work {
            ChildWork::Exec => self.exec_external(&command.argv),
            ChildWork::Builtin => {
                let program = command.argv[0].clone();
                match self.run_builtin(&program, &command.argv) {
                    Ok(status) => status,
                    Err(_) => 1,
                }
            }
            ChildWork::Function => {
                let program = command.argv[0].clone();
                let function = self.functions.get(&program).cloned().unwrap();
                match self.invoke_function(&function, &command.argv) {
                    Ok(()) => self.last_return_code,
                    Err(_) => 1,
                }
            }
            ChildWork::Chain(chain) => match self.run_tail_chain_all(&chain) {
                Ok(()) => self.last_return_code,
                Err(error) if error.is_control_flow() => self.last_return_code,
                Err(error) => {
                    eprintln!("Shell: {}", error);
                    1
                }
            },
        }
    }

    /// exec(2) with the `#!` fallback: scripts whose interpreter line the
    /// kernel refused get one retry through their interpreter.
    fn exec_external(&mut self, argv: &[Str]) -> i32 {
        let program = match argv.first() {
            Some(program) => program,
            // Rewirings applied, nothing to run.
            None => return 0,
        };
        let path = if program.contains('/') {
            Some(std::path::PathBuf::from(program.as_str()))
        } else {
            self.find_in_path(program)
        };
        let path = match path {
            Some(path) => path,
            None => {
                eprintln!("Shell: {}: command not found", program);
                return 127;
            }
        };

        let c_args: Vec<CString> = argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()).unwrap_or_default())
            .collect();
        let c_path = match CString::new(path.display().to_string()) {
            Ok(c_path) => c_path,
            Err(_) => return 126,
        };

        let refs: Vec<&std::ffi::CStr> = c_args.iter().map(CString::as_c_str).collect();
        let error = match unistd::execv(&c_path, &refs) {
            Err(errno) => errno,
            Ok(_) => unreachable!("execv returned successfully"),
        };

        if error == nix::errno::Errno::ENOENT {
            if let Some(code) = self.try_shebang(&path, argv) {
                return code;
            }
            eprintln!("Shell: {}: command not found", program);
            return 127;
        }
        if error == nix::errno::Errno::EACCES {
            eprintln!("Shell: {}: permission denied", program);
            return 126;
        }
        eprintln!("Shell: failed to execute {}: {}", program, error);
        126
    }

    fn try_shebang(&self, path: &std::path::Path, argv: &[Str]) -> Option<i32> {
        let contents = std::fs::read(path).ok()?;
        let first_line = contents.split(|byte| *byte == b'\n').next()?;
        let line = std::str::from_utf8(first_line).ok()?;
        let interpreter_line = line.strip_prefix("#!")?.trim();
        if interpreter_line.is_empty() {
            return None;
        }

        let mut new_argv: Vec<Str> =
            interpreter_line.split_whitespace().map(Str::from).collect();
        new_argv.push(path.display().to_string());
        new_argv.extend(argv.iter().skip(1).cloned());

        let c_args: Vec<CString> = new_argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()).unwrap_or_default())
            .collect();
        let refs: Vec<&std::ffi::CStr> = c_args.iter().map(CString::as_c_str).collect();
        let c_path = CString::new(new_argv[0].as_str()).ok()?;
        let _ = unistd::execv(&c_path, &refs);
        Some(127)
    }

    /// Tail-chain entries run in order, each gated on the current return
    /// code by its action.
    pub(crate) fn run_tail_chain(&mut self, chain: &[NodeWithAction]) -> Result<()> {
        for entry in chain {
            let applicable = match entry.action {
                ChainAction::Sequence => true,
                ChainAction::And => self.last_return_code == 0,
                ChainAction::Or => self.last_return_code != 0,
            };
            if applicable {
                self.run_node(&entry.node)?;
            }
        }
        Ok(())
    }

    /// Like `run_tail_chain`, but for chain carriers where the first
    /// entry always runs.
    fn run_tail_chain_all(&mut self, chain: &[NodeWithAction]) -> Result<()> {
        for (index, entry) in chain.iter().enumerate() {
            let applicable = index == 0
                || match entry.action {
                    ChainAction::Sequence => true,
                    ChainAction::And => self.last_return_code == 0,
                    ChainAction::Or => self.last_return_code != 0,
                };
            if applicable {
                self.run_node(&entry.node)?;
            }
        }
        Ok(())
    }

    /// Evaluates a node and executes whatever commands it produces.
    pub fn run_node(&mut self, node: &Node) -> Result<()> {
        // Command literals carry argv that was alias-expanded when it was
        // first materialized.
        if let NodeKind::CommandLiteral { command } = node.kind() {
            self.run_commands_preexpanded(vec![command.clone()])?;
            return Ok(());
        }
        let value = node.run(self)?;
        match &value.kind {
            crate::value::ValueKind::Job(job) => {
                let background = job.borrow().is_running_in_background();
                if !background && !job.borrow().is_finished() {
                    self.block_on_job(&job.clone())?;
                }
            }
            crate::value::ValueKind::Command(_) | crate::value::ValueKind::CommandSequence(_) => {
                let commands = value.resolve_as_commands(self)?;
                self.run_commands(commands)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Blocks until the job leaves the running state, keeping the
    /// terminal and return code in order.
    pub fn block_on_job(&mut self, job: &JobRef) -> Result<()> {
        loop {
            if signals::pending_includes(signals::SIGINT) {
                signals::clear(signals::SIGINT);
                self.restore_foreground();
                return Err(Error::Interrupted);
            }
            signals::clear(signals::SIGCHLD);

            let state = job.borrow().state();
            match state {
                JobState::Exited(code) => {
                    self.last_return_code = code;
                    break;
                }
                JobState::Signaled(signal) => {
                    self.last_return_code = 128 + signal as i32;
                    self.restore_foreground();
                    self.jobs.cleanup();
                    return match signal {
                        Signal::SIGINT => Err(Error::Interrupted),
                        Signal::SIGKILL => Err(Error::Killed),
                        _ => Ok(()),
                    };
                }
                JobState::Suspended => {
                    // A stopped foreground job becomes a background entry.
                    let mut borrowed = job.borrow_mut();
                    borrowed.move_to_background();
                    eprintln!("{}", borrowed);
                    self.last_return_code = 128 + Signal::SIGTSTP as i32;
                    break;
                }
                JobState::Running => self.jobs.wait_for_update(job),
            }
        }
        self.restore_foreground();
        self.jobs.reap();
        self.jobs.cleanup();
        Ok(())
    }

    pub(crate) fn restore_foreground(&self) {
        if self.options.interactive && !self.is_library {
            let _ = unistd::tcsetpgrp(0, unistd::getpid());
        }
    }

    /// Collects the capture-stdout entries of a command list.
    pub fn capture_output_of(&mut self, commands: Vec<Command>) -> Result<Vec<Str>> {
        let mut entries = Vec::new();
        self.for_each_captured_entry(commands, Position::default(), &mut |_, value| {
            if let crate::value::ValueKind::Str { text, .. } = &value.kind {
                entries.push(text.clone());
            }
            Ok(Iterate::Continue)
        })?;
        Ok(entries)
    }

    /// The `$(cmd)` event loop: runs the commands with their stdout wired
    /// into a pipe and streams IFS-separated entries to the callback.
    pub fn for_each_captured_entry(
        &mut self,
        commands: Vec<Command>,
        position: Position,
        callback: &mut dyn FnMut(&mut Shell, Value) -> Result<Iterate>,
    ) -> Result<Iterate> {
        if !commands.iter().any(|command| !command.is_empty()) {
            return Err(Error::syntax(
                "cannot capture standard output when no command is being executed",
                position,
            ));
        }
        let commands = self.expand_aliases(commands);

        let (read_end, write_end) = unistd::pipe().map_err(Error::PipeFailure)?;
        streams::set_cloexec(read_end);

        // The whole sequence runs under one background carrier whose
        // stdout is the pipe's write end, so chained and piped members
        // all feed the capture.
        let mut carrier = Command::default();
        carrier.position = Some(position);
        carrier.should_wait = false;
        carrier.should_notify_if_in_background = false;
        carrier.should_immediately_execute_next = true;
        carrier.redirections.push(Redirection::FdToFd(FdRedirection {
            old_fd:         write_end,
            new_fd:         1,
            close_policy:   ClosePolicy::Old,
            other_pipe_end: None,
        }));
        carrier.next_chain = commands
            .into_iter()
            .map(|command| NodeWithAction {
                node:   Node::new(NodeKind::CommandLiteral { command }, position),
                action: ChainAction::Sequence,
            })
            .collect();

        let jobs = match self.run_commands_preexpanded(vec![carrier]) {
            Ok(jobs) => jobs,
            Err(error) => {
                let _ = unistd::close(read_end);
                return Err(error);
            }
        };

        // The IFS delimiter is matched as a byte sequence, not a class.
        let ifs: Vec<u8> = self
            .variable("IFS")
            .map(|variable| variable.to_joined_string().into_bytes())
            .filter(|bytes| !bytes.is_empty())
            .unwrap_or_else(|| b"\n".to_vec());

        let mut buffer: Vec<u8> = Vec::with_capacity(1024);
        let mut outcome = Iterate::Continue;
        let mut saw_eof = false;

        'event_loop: loop {
            // Drain complete segments before reading more.
            while let Some(found) = find_subsequence(&buffer, &ifs) {
                let segment: Vec<u8> = buffer.drain(..found + ifs.len()).collect();
                let segment = &segment[..found];
                if segment.is_empty() && !self.options.inline_exec_keep_empty_segments {
                    continue;
                }
                let text = String::from_utf8_lossy(segment).into_owned();
                if callback(self, Value::string(text))? == Iterate::Break {
                    outcome = Iterate::Break;
                    break 'event_loop;
                }
            }
            if saw_eof {
                break;
            }

            let mut fds = [
                PollFd::new(read_end, PollFlags::POLLIN),
                PollFd::new(signals::wake_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, -1) {
                Err(nix::errno::Errno::EINTR) => {}
                Err(errno) => {
                    let _ = unistd::close(read_end);
                    return Err(Error::PipeFailure(errno));
                }
                Ok(_) => {}
            }

            if signals::pending_includes(signals::SIGCHLD) {
                signals::clear(signals::SIGCHLD);
                signals::drain_wake_pipe();
                self.jobs.reap();
            }
            if signals::pending_includes(signals::SIGINT) {
                signals::clear(signals::SIGINT);
                kill_capture_jobs(self, &jobs);
                let _ = unistd::close(read_end);
                return Err(Error::Interrupted);
            }

            let readable = fds[0]
                .revents()
                .map(|events| {
                    events.contains(PollFlags::POLLIN) || events.contains(PollFlags::POLLHUP)
                })
                .unwrap_or(false);
            if readable {
                let mut chunk = [0u8; 4096];
                match unistd::read(read_end, &mut chunk) {
                    Ok(0) => saw_eof = true,
                    Ok(count) => buffer.extend_from_slice(&chunk[..count]),
                    Err(nix::errno::Errno::EINTR) => {}
                    Err(_) => saw_eof = true,
                }
            }
        }

        // EOF with residue yields one final entry.
        if outcome == Iterate::Continue && !buffer.is_empty() {
            let text = String::from_utf8_lossy(&buffer).into_owned();
            let _ = callback(self, Value::string(text))?;
        }

        let _ = unistd::close(read_end);

        if outcome == Iterate::Break {
            kill_capture_jobs(self, &jobs);
        }

        // Wait the producers out so the return code is theirs.
        for job in &jobs {
            while job.borrow().state() == JobState::Running {
                self.jobs.wait_for_update(job);
            }
            if let Some(code) = job.borrow().exit_code() {
                self.last_return_code = code;
            }
        }
        self.jobs.cleanup();
        Ok(outcome)
    }
}

/// Wraps a backgrounded, chained command so the child runs the command
/// and its chain while the parent moves on.
fn make_carrier(mut command: Command) -> Command {
    let position = command.position.unwrap_or_default();
    let chain = std::mem::take(&mut command.next_chain);
    command.should_wait = true;

    let mut entries = vec![NodeWithAction {
        node:   Node::new(NodeKind::CommandLiteral { command: command.clone() }, position),
        action: ChainAction::Sequence,
    }];
    entries.extend(chain);

    let mut carrier = Command::default();
    carrier.should_wait = false;
    carrier.should_immediately_execute_next = true;
    carrier.should_notify_if_in_background = command.should_notify_if_in_background;
    carrier.position = command.position;
    carrier.next_chain = entries;
    carrier
}

fn kill_capture_jobs(shell: &mut Shell, jobs: &[JobRef]) {
    for job in jobs {
        let finished = job.borrow().is_finished();
        if !finished {
            job.borrow_mut().set_should_announce(false);
            shell.jobs.kill_job(job, Signal::SIGTERM);
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

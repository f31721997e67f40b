//! Job bookkeeping: one record per spawned process (or pipeline leader),
//! a table the shell owns, and the draining reaper that keeps the
//! records in step with wait(2).

use crate::types::Str;
use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};
use std::{cell::RefCell, fmt, rc::Rc, time::Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Suspended,
    Exited(i32),
    Signaled(Signal),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "Running"),
            JobState::Suspended => write!(f, "Suspended"),
            JobState::Exited(code) => write!(f, "Exited({})", code),
            JobState::Signaled(signal) => write!(f, "Signaled({})", signal),
        }
    }
}

#[derive(Debug)]
pub struct Job {
    pid:     Pid,
    pgid:    Pid,
    job_id:  usize,
    command: Str,
    started: Instant,
    state:   JobState,
    in_background: bool,
    disowned: bool,
    /// Cleared when the shell kills the job itself and an announcement
    /// would only be noise.
    should_announce: bool,
    /// The exit has been reported to the user (or never needs to be).
    notified: bool,
    /// Set when the shell sent SIGCONT and the next wait status should
    /// flip the state back to Running.
    shell_did_continue: bool,
}

pub type JobRef = Rc<RefCell<Job>>;

impl Job {
    pub fn pid(&self) -> Pid { self.pid }

    pub fn pgid(&self) -> Pid { self.pgid }

    pub fn job_id(&self) -> usize { self.job_id }

    pub fn command(&self) -> &str { &self.command }

    pub fn state(&self) -> JobState { self.state }

    pub fn started(&self) -> Instant { self.started }

    pub fn is_running_in_background(&self) -> bool {
        self.in_background && matches!(self.state, JobState::Running | JobState::Suspended)
    }

    pub fn is_suspended(&self) -> bool { self.state == JobState::Suspended }

    pub fn exited(&self) -> bool { matches!(self.state, JobState::Exited(_)) }

    pub fn signaled(&self) -> bool { matches!(self.state, JobState::Signaled(_)) }

    pub fn is_finished(&self) -> bool { self.exited() || self.signaled() }

    pub fn disown(&mut self) { self.disowned = true; }

    pub fn is_disowned(&self) -> bool { self.disowned }

    pub fn set_should_announce(&mut self, announce: bool) { self.should_announce = announce; }

    pub fn move_to_background(&mut self) { self.in_background = true; }

    pub fn move_to_foreground(&mut self) { self.in_background = false; }

    pub fn mark_notified(&mut self) { self.notified = true; }

    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            JobState::Exited(code) => Some(code),
            JobState::Signaled(signal) => Some(128 + signal as i32),
            _ => None,
        }
    }

    fn apply_wait_status(&mut self, status: &WaitStatus) {
        match status {
            WaitStatus::Exited(_, code) => self.state = JobState::Exited(*code),
            WaitStatus::Signaled(_, signal, _) => self.state = JobState::Signaled(*signal),
            WaitStatus::Stopped(..) => self.state = JobState::Suspended,
            WaitStatus::Continued(_) => {
                self.shell_did_continue = false;
                self.state = JobState::Running;
            }
            _ => {}
        }
        if self.shell_did_continue && self.state == JobState::Suspended {
            // The SIGCONT has not been observed yet; trust the shell.
            self.state = JobState::Running;
            self.shell_did_continue = false;
        }
    }

    pub fn set_shell_did_continue(&mut self) {
        self.shell_did_continue = true;
        self.state = JobState::Running;
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {} {}", self.job_id, self.pid, self.state, self.command)
    }
}

#[derive(Default)]
pub struct JobTable {
    jobs:    Vec<JobRef>,
    next_id: usize,
}

impl JobTable {
    pub fn new() -> Self { JobTable { jobs: Vec::new(), next_id: 1 } }

    pub fn add(&mut self, pid: Pid, pgid: Pid, command: Str, in_background: bool) -> JobRef {
        let job = Rc::new(RefCell::new(Job {
            pid,
            pgid,
            job_id: self.next_id,
            command,
            started: Instant::now(),
            state: JobState::Running,
            in_background,
            disowned: false,
            should_announce: true,
            notified: !in_background,
            shell_did_continue: false,
        }));
        self.next_id += 1;
        self.jobs.push(job.clone());
        job
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &JobRef> { self.jobs.iter() }

    pub fn is_empty(&self) -> bool { self.jobs.is_empty() }

    pub fn find_by_pid(&self, pid: Pid) -> Option<JobRef> {
        self.jobs.iter().find(|job| job.borrow().pid == pid).cloned()
    }

    /// Resolves a job spec: a numeric pid, `%N` by job id, or `%?text` by
    /// command substring.
    pub fn resolve_spec(&self, spec: &str) -> Option<JobRef> {
        if let Some(rest) = spec.strip_prefix('%') {
            if let Some(text) = rest.strip_prefix('?') {
                return self
                    .jobs
                    .iter()
                    .find(|job| job.borrow().command.contains(text))
                    .cloned();
            }
            let id = rest.parse::<usize>().ok()?;
            return self.jobs.iter().find(|job| job.borrow().job_id == id).cloned();
        }
        let pid = spec.parse::<i32>().ok()?;
        self.find_by_pid(Pid::from_raw(pid))
    }

    /// The most recently backgrounded live job, for `fg`/`bg` without a
    /// spec and for `$!`.
    pub fn most_recent_background(&self) -> Option<JobRef> {
        self.jobs
            .iter()
            .rev()
            .find(|job| job.borrow().in_background && !job.borrow().is_finished())
            .cloned()
    }

    /// Non-blocking drain: processes every currently reapable child.
    /// ECHILD means everything is gone, which reads as a clean exit.
    pub fn reap(&mut self) {
        loop {
            let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
            match wait::waitpid(Pid::from_raw(-1), Some(flags)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    let pid = match status.pid() {
                        Some(pid) => pid,
                        None => break,
                    };
                    if let Some(job) = self.find_by_pid(pid) {
                        job.borrow_mut().apply_wait_status(&status);
                    }
                }
                Err(Errno::ECHILD) => {
                    for job in &self.jobs {
                        let mut job = job.borrow_mut();
                        if !job.is_finished() {
                            job.state = JobState::Exited(0);
                        }
                    }
                    break;
                }
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    /// Blocks until any child changes state and folds the result into
    /// the table. Callers loop on this when they need a job slot to
    /// free up.
    pub fn wait_for_any_update(&mut self) {
        let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        match wait::waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    if let Some(job) = self.find_by_pid(pid) {
                        job.borrow_mut().apply_wait_status(&status);
                    }
                }
            }
            Err(Errno::ECHILD) => {
                for job in &self.jobs {
                    let mut job = job.borrow_mut();
                    if !job.is_finished() {
                        job.state = JobState::Exited(0);
                    }
                }
            }
            Err(_) => {}
        }
    }

    /// Waits for one job to change state, retrying with exponential
    /// backoff to ride out the delivery race between the signal and the
    /// observable child state.
    pub fn wait_for_update(&mut self, job: &JobRef) {
        let pid = job.borrow().pid;
        let mut delay_us = 500u64;
        for _ in 0..10 {
            let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
            match wait::waitpid(pid, Some(flags)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    job.borrow_mut().apply_wait_status(&status);
                    return;
                }
                Err(Errno::ECHILD) => {
                    let mut job = job.borrow_mut();
                    if !job.is_finished() {
                        job.state = JobState::Exited(0);
                    }
                    return;
                }
                Err(Errno::EINTR) => continue,
                Err(_) => {}
            }
            std::thread::sleep(std::time::Duration::from_micros(delay_us));
            delay_us = delay_us.saturating_mul(2);
        }
    }

    /// Announces finished background jobs and drops records that are
    /// done with (exited + reported, or disowned).
    pub fn cleanup(&mut self) {
        for job in &self.jobs {
            let mut job = job.borrow_mut();
            if job.is_finished() && !job.notified {
                if job.should_announce && !job.disowned {
                    eprintln!("{}", job);
                }
                job.notified = true;
            }
        }
        self.jobs.retain(|job| {
            let job = job.borrow();
            !(job.is_finished() && (job.notified || job.disowned))
        });
    }

    pub fn kill_job(&self, job: &JobRef, signal: Signal) {
        let pgid = job.borrow().pgid;
        if signal::killpg(pgid, signal).is_err() {
            let _ = signal::kill(job.borrow().pid, signal);
        }
    }

    /// On shutdown, surviving jobs get SIGHUP and, shortly after,
    /// SIGKILL.
    pub fn hangup_all(&mut self) {
        let mut any = false;
        for job in &self.jobs {
            let job = job.borrow();
            if !job.is_finished() {
                let _ = signal::killpg(job.pgid, Signal::SIGHUP);
                any = true;
            }
        }
        if any {
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.reap();
            for job in &self.jobs {
                let job = job.borrow();
                if !job.is_finished() {
                    let _ = signal::killpg(job.pgid, Signal::SIGKILL);
                }
            }
        }
    }
}

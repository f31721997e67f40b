//! Signal plumbing. Handlers only set bits in an atomic pending set and
//! poke a self-pipe; all real work happens in the event loop, outside
//! signal context.

use nix::{
    sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal},
    unistd,
};
use std::{
    os::unix::io::RawFd,
    sync::atomic::{AtomicI32, AtomicUsize, Ordering},
};

pub static PENDING: AtomicUsize = AtomicUsize::new(0);
pub const SIGINT: usize = 1;
pub const SIGHUP: usize = 2;
pub const SIGTERM: usize = 4;
pub const SIGCHLD: usize = 8;

static WAKE_WRITE: AtomicI32 = AtomicI32::new(-1);
static WAKE_READ: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handler(signal: i32) {
    let bit = match signal {
        libc_consts::SIGINT => SIGINT,
        libc_consts::SIGHUP => SIGHUP,
        libc_consts::SIGTERM => SIGTERM,
        libc_consts::SIGCHLD => SIGCHLD,
        _ => return,
    };
    PENDING.fetch_or(bit, Ordering::SeqCst);
    // A single byte wakes the event loop; write(2) is async-signal-safe.
    let fd = WAKE_WRITE.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = unistd::write(fd, &[1u8]);
    }
}

mod libc_consts {
    pub const SIGINT: i32 = nix::sys::signal::Signal::SIGINT as i32;
    pub const SIGHUP: i32 = nix::sys::signal::Signal::SIGHUP as i32;
    pub const SIGTERM: i32 = nix::sys::signal::Signal::SIGTERM as i32;
    pub const SIGCHLD: i32 = nix::sys::signal::Signal::SIGCHLD as i32;
}

/// Installs the handlers and the wake pipe. Called once at startup.
pub fn install() {
    if WAKE_READ.load(Ordering::SeqCst) < 0 {
        if let Ok((read_end, write_end)) = unistd::pipe() {
            let _ = nix::fcntl::fcntl(
                read_end,
                nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
            );
            WAKE_READ.store(read_end, Ordering::SeqCst);
            WAKE_WRITE.store(write_end, Ordering::SeqCst);
        }
    }

    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &action);
        let _ = signal::sigaction(Signal::SIGHUP, &action);
        let _ = signal::sigaction(Signal::SIGTERM, &action);
        let _ = signal::sigaction(Signal::SIGCHLD, &action);
    }
}

/// The read end of the wake pipe, for event loops to poll.
pub fn wake_fd() -> RawFd { WAKE_READ.load(Ordering::SeqCst) }

/// Drains the wake pipe after a poll wakeup.
pub fn drain_wake_pipe() {
    let fd = wake_fd();
    if fd < 0 {
        return;
    }
    let mut buffer = [0u8; 64];
    while let Ok(count) = unistd::read(fd, &mut buffer) {
        if count < buffer.len() {
            break;
        }
    }
}

/// Takes and clears the pending signal set.
pub fn take_pending() -> usize { PENDING.swap(0, Ordering::SeqCst) }

pub fn pending_includes(bit: usize) -> bool { PENDING.load(Ordering::SeqCst) & bit != 0 }

pub fn clear(bit: usize) { PENDING.fetch_and(!bit, Ordering::SeqCst); }

/// Blocks the job-control signals so the shell can manage its own
/// process group and children.
pub fn block() {
    let mut set = SigSet::empty();
    set.add(Signal::SIGTSTP);
    set.add(Signal::SIGTTOU);
    set.add(Signal::SIGTTIN);
    let _ = signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None);
}

pub fn unblock() {
    let mut set = SigSet::empty();
    set.add(Signal::SIGTSTP);
    set.add(Signal::SIGTTOU);
    set.add(Signal::SIGTTIN);
    let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
}

/// Restores a child's signal dispositions before exec or dispatch.
pub fn prepare_child() {
    unblock();
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &default);
        let _ = signal::sigaction(Signal::SIGHUP, &default);
        let _ = signal::sigaction(Signal::SIGTERM, &default);
        let _ = signal::sigaction(Signal::SIGCHLD, &default);
    }
}

/// Resumes a stopped process group.
pub fn resume(pgid: nix::unistd::Pid) {
    let _ = signal::killpg(pgid, Signal::SIGCONT);
}

/// Ignores SIGTTOU for as long as the guard lives; used while the shell
/// hands the terminal around.
pub struct SignalHandler;

impl SignalHandler {
    pub fn new() -> Self {
        block();
        SignalHandler
    }
}

impl Default for SignalHandler {
    fn default() -> Self { Self::new() }
}

impl Drop for SignalHandler {
    fn drop(&mut self) { unblock(); }
}

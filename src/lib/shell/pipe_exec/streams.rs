//! Redirection resolution. Redirections resolve to rewirings (dup2/close
//! instructions applied between fork and exec); every descriptor opened
//! along the way lands in a scope-bound collector that closes it on all
//! exit paths.

use crate::{
    error::{Error, Result},
    value::{ClosePolicy, FdRedirection, PathDirection, Redirection},
};
use nix::{
    fcntl::{self, FcntlArg, FdFlag, OFlag},
    sys::stat::Mode,
    unistd,
};
use std::os::unix::io::RawFd;

/// One resolved instruction for the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rewiring {
    /// dup2(src, dst)
    Dup { src: RawFd, dst: RawFd },
    /// close(fd)
    Close { fd: RawFd },
}

/// Owns descriptors opened during resolution; closing happens on drop so
/// every exit path is covered.
#[derive(Debug, Default)]
pub struct FdCollector {
    fds: Vec<RawFd>,
}

impl FdCollector {
    pub fn new() -> Self { FdCollector { fds: Vec::new() } }

    pub fn adopt(&mut self, fd: RawFd) { self.fds.push(fd); }

    pub fn fds(&self) -> &[RawFd] { &self.fds }
}

impl Drop for FdCollector {
    fn drop(&mut self) {
        for fd in self.fds.drain(..) {
            let _ = unistd::close(fd);
        }
    }
}

fn open_flags(direction: PathDirection) -> OFlag {
    match direction {
        PathDirection::Read => OFlag::O_RDONLY,
        PathDirection::Write => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        PathDirection::WriteAppend => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
        PathDirection::ReadWrite => OFlag::O_RDWR | OFlag::O_CREAT,
    }
}

/// Resolves a command's redirections into rewirings. Pipe-backed
/// (`Refresh*`) redirections allocate the pipe on the first side that
/// resolves and publish the peer's descriptor through the shared cell.
pub fn resolve_redirections(
    redirections: &[Redirection],
    collector: &mut FdCollector,
) -> Result<Vec<Rewiring>> {
    let mut rewirings = Vec::new();
    for redirection in redirections {
        match redirection {
            Redirection::Path { path, fd, direction } => {
                let opened = fcntl::open(
                    path.as_str(),
                    open_flags(*direction),
                    Mode::from_bits_truncate(0o666),
                )
                .map_err(|errno| Error::OpenFailure {
                    path:   path.clone(),
                    source: std::io::Error::from_raw_os_error(errno as i32),
                })?;
                collector.adopt(opened);
                rewirings.push(Rewiring::Dup { src: opened, dst: *fd });
            }
            Redirection::FdToFd(fd_redirection) => {
                resolve_fd_redirection(fd_redirection, collector, &mut rewirings)?;
            }
            Redirection::Close { fd } => rewirings.push(Rewiring::Close { fd: *fd }),
        }
    }
    Ok(rewirings)
}

fn resolve_fd_redirection(
    redirection: &FdRedirection,
    collector: &mut FdCollector,
    rewirings: &mut Vec<Rewiring>,
) -> Result<()> {
    let mut src = redirection.old_fd;

    if src < 0 {
        if let Some(cell) = &redirection.other_pipe_end {
            let published = *cell.borrow();
            if published >= 0 {
                // The peer resolved first and left our end here.
                src = published;
                collector.adopt(src);
            } else {
                // First side to resolve: make the pipe now. The write end
                // belongs to whoever redirects stdout-like descriptors.
                let (read_end, write_end) =
                    unistd::pipe().map_err(Error::PipeFailure)?;
                match redirection.close_policy {
                    ClosePolicy::RefreshOld | ClosePolicy::RefreshNew => {
                        src = write_end;
                        *cell.borrow_mut() = read_end;
                    }
                    _ => {
                        src = read_end;
                        *cell.borrow_mut() = write_end;
                    }
                }
                collector.adopt(src);
            }
        } else {
            return Err(Error::EvaluatedSyntax {
                message:  "redirection references a descriptor that was never produced".into(),
                position: None,
            });
        }
    } else if redirection.close_policy == ClosePolicy::ImmediatelyCloseNew
        || redirection.close_policy == ClosePolicy::Old
    {
        collector.adopt(src);
    }

    rewirings.push(Rewiring::Dup { src, dst: redirection.new_fd });
    Ok(())
}

/// Applies rewirings in the child between fork and exec.
pub fn apply_rewirings(rewirings: &[Rewiring]) -> Result<()> {
    for rewiring in rewirings {
        match rewiring {
            Rewiring::Dup { src, dst } => {
                unistd::dup2(*src, *dst).map_err(|errno| Error::LaunchError {
                    name:    format!("fd {}", dst),
                    message: format!("dup2 failed: {}", errno),
                })?;
            }
            Rewiring::Close { fd } => {
                let _ = unistd::close(*fd);
            }
        }
    }
    Ok(())
}

/// Saved copies of descriptors a builtin is about to clobber, restored
/// when the guard drops.
pub struct SavedStreams {
    saved: Vec<(RawFd, RawFd)>,
}

impl SavedStreams {
    /// Duplicates each target descriptor (above the user range, cloexec)
    /// and applies the rewirings in the current process.
    pub fn apply_in_process(rewirings: &[Rewiring]) -> Result<SavedStreams> {
        let mut saved = Vec::new();
        for rewiring in rewirings {
            let target = match rewiring {
                Rewiring::Dup { dst, .. } => *dst,
                Rewiring::Close { fd } => *fd,
            };
            if saved.iter().any(|(original, _)| *original == target) {
                continue;
            }
            if let Ok(copy) = fcntl::fcntl(target, FcntlArg::F_DUPFD_CLOEXEC(10)) {
                saved.push((target, copy));
            }
        }
        apply_rewirings(rewirings)?;
        Ok(SavedStreams { saved })
    }
}

impl Drop for SavedStreams {
    fn drop(&mut self) {
        for (original, copy) in self.saved.drain(..) {
            let _ = unistd::dup2(copy, original);
            let _ = unistd::close(copy);
        }
    }
}

/// Marks a descriptor close-on-exec.
pub fn set_cloexec(fd: RawFd) {
    let _ = fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ClosePolicy, FdRedirection, Redirection};
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn close_resolves_to_a_close() {
        let mut collector = FdCollector::new();
        let rewirings =
            resolve_redirections(&[Redirection::Close { fd: 7 }], &mut collector).unwrap();
        assert_eq!(rewirings, vec![Rewiring::Close { fd: 7 }]);
    }

    #[test]
    fn refresh_pair_shares_one_pipe() {
        let cell = Rc::new(RefCell::new(-1));
        let write_side = Redirection::FdToFd(FdRedirection {
            old_fd:         -1,
            new_fd:         1,
            close_policy:   ClosePolicy::RefreshOld,
            other_pipe_end: Some(cell.clone()),
        });
        let read_side = Redirection::FdToFd(FdRedirection {
            old_fd:         -1,
            new_fd:         0,
            close_policy:   ClosePolicy::Old,
            other_pipe_end: Some(cell.clone()),
        });

        let mut left_collector = FdCollector::new();
        let left = resolve_redirections(&[write_side], &mut left_collector).unwrap();
        assert_eq!(left.len(), 1);
        assert!(*cell.borrow() >= 0, "peer end was not published");

        let mut right_collector = FdCollector::new();
        let right = resolve_redirections(&[read_side], &mut right_collector).unwrap();
        match (left[0], right[0]) {
            (Rewiring::Dup { src: write, dst: 1 }, Rewiring::Dup { src: read, dst: 0 }) => {
                assert_ne!(write, read);
            }
            other => panic!("unexpected rewirings: {:?}", other),
        }
    }

    #[test]
    fn missing_path_is_an_open_failure() {
        let mut collector = FdCollector::new();
        let result = resolve_redirections(
            &[Redirection::Path {
                path:      "/definitely/not/a/real/path".into(),
                fd:        0,
                direction: crate::value::PathDirection::Read,
            }],
            &mut collector,
        );
        assert!(matches!(result, Err(crate::error::Error::OpenFailure { .. })));
    }

    #[test]
    fn collector_closes_on_drop() {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        {
            let mut collector = FdCollector::new();
            collector.adopt(read_end);
            collector.adopt(write_end);
        }
        // Both ends are gone; closing again reports EBADF.
        assert!(nix::unistd::close(read_end).is_err());
        assert!(nix::unistd::close(write_end).is_err());
    }
}

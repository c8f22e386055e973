//! Blocks until the host attaches to the serial port.
//!
//! A virtio serial port reports `EPOLLHUP` for as long as nothing is attached on the host side
//! and becomes writable once the host opens it, so the wait is edge triggered on `EPOLLOUT` and
//! ignores hangups.

use crate::error::ChannelError;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use std::os::fd::{AsRawFd, BorrowedFd};
use tracing::debug;

const SERIAL_TOKEN: u64 = 1;

/// What a single readiness event means for the wait
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Readiness {
    Writable,
    Failed,
    Hangup,
    Idle,
}

impl From<EpollFlags> for Readiness {
    fn from(flags: EpollFlags) -> Self {
        // an error is never overridden by a writable bit in the same event
        if flags.contains(EpollFlags::EPOLLERR) {
            Readiness::Failed
        } else if flags.contains(EpollFlags::EPOLLOUT) {
            Readiness::Writable
        } else if flags.contains(EpollFlags::EPOLLHUP) {
            Readiness::Hangup
        } else {
            Readiness::Idle
        }
    }
}

/// Waits, without timeout, until `fd` becomes writable or reports an error.
///
/// This is a blocking call and must not run on an async worker thread.
pub(crate) fn wait_writable(fd: BorrowedFd<'_>) -> Result<(), ChannelError> {
    if fd.as_raw_fd() == 0 {
        return Err(ChannelError::SerialIoClosed);
    }

    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(ChannelError::Epoll)?;
    let interest =
        EpollFlags::EPOLLOUT | EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP | EpollFlags::EPOLLET;
    epoll
        .add(fd, EpollEvent::new(interest, SERIAL_TOKEN))
        .map_err(ChannelError::Epoll)?;

    let result = await_peer(EpollEvents {
        epoll: &epoll,
        token: SERIAL_TOKEN,
    });
    if let Err(errno) = epoll.delete(fd) {
        debug!(%errno, "could not deregister serial port from epoll");
    }
    result
}

/// Runs the readiness decision table over a sequence of events
pub(crate) fn await_peer<I>(events: I) -> Result<(), ChannelError>
where
    I: IntoIterator<Item = Result<EpollFlags, Errno>>,
{
    for flags in events {
        let flags = flags.map_err(ChannelError::Epoll)?;
        debug!(events = ?flags, "new serial channel event");
        match Readiness::from(flags) {
            Readiness::Writable => return Ok(()),
            Readiness::Failed => return Err(ChannelError::SerialIoFailure),
            Readiness::Hangup | Readiness::Idle => continue,
        }
    }
    Err(ChannelError::SerialIoClosed)
}

/// Endless stream of the events epoll reports for one registered descriptor
struct EpollEvents<'a> {
    epoll: &'a Epoll,
    token: u64,
}

impl Iterator for EpollEvents<'_> {
    type Item = Result<EpollFlags, Errno>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut events = [EpollEvent::empty()];
        loop {
            match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(0) => continue,
                Ok(_) if events[0].data() != self.token => continue,
                Ok(_) => return Some(Ok(events[0].events())),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Some(Err(errno)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;
    use std::os::fd::AsFd;

    #[test]
    fn hangups_then_writable_is_ready() {
        let events = vec![
            Ok(EpollFlags::EPOLLHUP),
            Ok(EpollFlags::EPOLLHUP),
            Ok(EpollFlags::EPOLLHUP),
            Ok(EpollFlags::EPOLLOUT),
        ];
        await_peer(events).expect("writable event should finish the wait");
    }

    #[test]
    fn error_is_fatal_even_after_hangups() {
        let events = vec![
            Ok(EpollFlags::EPOLLHUP),
            Ok(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP),
            Ok(EpollFlags::EPOLLOUT),
        ];
        let err = await_peer(events).unwrap_err();
        assert!(matches!(err, ChannelError::SerialIoFailure), "got {err:?}");
    }

    #[test]
    fn error_wins_over_writable_in_same_event() {
        assert_eq!(
            Readiness::from(EpollFlags::EPOLLOUT | EpollFlags::EPOLLERR),
            Readiness::Failed
        );
        assert_eq!(Readiness::from(EpollFlags::EPOLLIN), Readiness::Idle);
    }

    #[test]
    fn epoll_errors_are_surfaced() {
        let events = vec![Ok(EpollFlags::EPOLLHUP), Err(Errno::EBADF)];
        let err = await_peer(events).unwrap_err();
        assert!(matches!(err, ChannelError::Epoll(Errno::EBADF)), "got {err:?}");
    }

    #[test]
    fn exhausted_events_mean_closed() {
        let err = await_peer(Vec::new()).unwrap_err();
        assert!(matches!(err, ChannelError::SerialIoClosed));
    }

    #[test]
    fn writable_pipe_finishes_wait() {
        let (_read, write) = pipe().unwrap();
        wait_writable(write.as_fd()).expect("an empty pipe is writable");
    }

    #[test]
    fn pipe_without_reader_fails_wait() {
        let (read, write) = pipe().unwrap();
        drop(read);
        let err = wait_writable(write.as_fd()).unwrap_err();
        assert!(matches!(err, ChannelError::SerialIoFailure), "got {err:?}");
    }
}

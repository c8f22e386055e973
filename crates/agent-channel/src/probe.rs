//! Checks whether the kernel can create `AF_VSOCK` sockets

use crate::error::ProbeError;
use nix::errno::Errno;
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use nix::unistd::close;
use std::os::fd::IntoRawFd;
use tracing::trace;

/// Creates and immediately releases a vsock socket.
///
/// `Ok(false)` means the address family is not supported on this system, which is an expected
/// outcome and lets discovery fall back to the serial port. Any other failure is an error.
pub fn is_vsock_supported() -> Result<bool, ProbeError> {
    let fd = match socket(
        AddressFamily::Vsock,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    ) {
        Ok(fd) => fd,
        Err(errno) => return classify_create_error(errno),
    };
    trace!("created probe vsock socket");
    close(fd.into_raw_fd()).map_err(ProbeError::Release)?;
    Ok(true)
}

fn classify_create_error(errno: Errno) -> Result<bool, ProbeError> {
    match errno {
        Errno::EAFNOSUPPORT => Ok(false),
        other => Err(ProbeError::Create(other)),
    }
}

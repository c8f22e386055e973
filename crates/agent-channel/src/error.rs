use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The vsock capability probe failed for a reason other than the address family being unsupported
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not create vsock socket: {0}")]
    Create(#[source] Errno),
    #[error("could not release vsock socket: {0}")]
    Release(#[source] Errno),
}

/// Failure to map a serial channel name to a device node
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("could not list virtio ports at {path:?}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not read port name at {path:?}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not find virtio port {name}")]
    NotFound { name: String },
}

impl ResolveError {
    /// Whether this is the not-found classification surfaced to RPC callers
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}

impl From<ResolveError> for io::Error {
    fn from(value: ResolveError) -> Self {
        let kind = match &value {
            ResolveError::NotFound { .. } => io::ErrorKind::NotFound,
            ResolveError::RootUnavailable { source, .. }
            | ResolveError::ReadFailure { source, .. } => source.kind(),
        };
        io::Error::new(kind, value)
    }
}

/// Discovery ran out of attempts without finding a usable transport
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("neither vsocks nor serial ports were found")]
    NotFound {
        /// The last error seen while resolving the serial port
        serial: Option<ResolveError>,
        /// The last error seen while probing vsock support
        vsock: Option<ProbeError>,
    },
}

/// A lifecycle stage of a selected channel failed
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("could not open serial port {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serial port IO closed")]
    SerialIoClosed,
    #[error("serial port IO failure")]
    SerialIoFailure,
    #[error("epoll failed while waiting on serial port: {0}")]
    Epoll(#[source] Errno),
    #[error("timeout waiting for yamux channel to close after {0:?}")]
    SessionTeardownTimeout(Duration),
    #[error("cannot {operation} a channel that is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("could not close serial port: {0}")]
    Close(#[source] Errno),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_io_not_found() {
        let error = ResolveError::NotFound {
            name: "agent.channel.0".to_string(),
        };
        assert!(error.is_not_found());
        let io_error = io::Error::from(error);
        assert_eq!(io_error.kind(), io::ErrorKind::NotFound);
        assert_eq!(io_error.to_string(), "could not find virtio port agent.channel.0");
    }

    #[test]
    fn read_failure_keeps_source_kind() {
        let error = ResolveError::ReadFailure {
            path: PathBuf::from("/sys/class/virtio-ports/vport0p1/name"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(!error.is_not_found());
        assert_eq!(io::Error::from(error).kind(), io::ErrorKind::PermissionDenied);
    }
}

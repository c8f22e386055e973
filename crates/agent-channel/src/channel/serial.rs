use crate::channel::Channel;
use crate::config::CHANNEL_CLOSE_TIMEOUT;
use crate::error::ChannelError;
use crate::mux::{self, MuxListener, SessionHandle};
use nix::unistd::close;
use std::fmt::{Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::fd::{AsFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use stream::SerialStream;

mod readiness;
mod stream;

/// Where a [SerialChannel] is in its lifecycle
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SerialState {
    /// Nothing has been opened yet
    Unopened,
    /// The port is open but the host may not be attached
    Opened,
    /// The host is attached
    Ready,
    /// A multiplexing session is running over the port
    Serving,
    /// The port has been closed, the channel cannot be reused
    Closed,
}

impl SerialState {
    fn as_str(&self) -> &'static str {
        match self {
            SerialState::Unopened => "unopened",
            SerialState::Opened => "opened",
            SerialState::Ready => "ready",
            SerialState::Serving => "serving",
            SerialState::Closed => "closed",
        }
    }
}

impl Display for SerialState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum Lifecycle {
    Unopened,
    Opened(File),
    Ready(File),
    Serving {
        file: File,
        session: SessionHandle,
    },
    Closed,
}

impl Lifecycle {
    fn state(&self) -> SerialState {
        match self {
            Lifecycle::Unopened => SerialState::Unopened,
            Lifecycle::Opened(_) => SerialState::Opened,
            Lifecycle::Ready(_) => SerialState::Ready,
            Lifecycle::Serving { .. } => SerialState::Serving,
            Lifecycle::Closed => SerialState::Closed,
        }
    }
}

/// Virtio serial port transport.
///
/// The port carries a single byte stream, so once the host is attached the channel runs a
/// yamux server over it. The open descriptor is owned here from `setup` until `teardown`,
/// which closes it exactly once.
#[derive(Debug)]
pub struct SerialChannel {
    path: PathBuf,
    close_timeout: Duration,
    lifecycle: Lifecycle,
}

impl SerialChannel {
    /// Creates a channel over the serial device node at `path`, nothing is opened yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            close_timeout: CHANNEL_CLOSE_TIMEOUT,
            lifecycle: Lifecycle::Unopened,
        }
    }

    /// Sets how long teardown waits for the session to close
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SerialState {
        self.lifecycle.state()
    }

    fn invalid(&self, operation: &'static str) -> ChannelError {
        ChannelError::InvalidState {
            operation,
            state: self.state().as_str(),
        }
    }
}

impl Channel for SerialChannel {
    type Listener = MuxListener;

    #[instrument(skip_all, fields(path = ?self.path), err)]
    async fn setup(&mut self) -> Result<(), ChannelError> {
        if !matches!(self.lifecycle, Lifecycle::Unopened) {
            return Err(self.invalid("setup"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|source| ChannelError::Open {
                path: self.path.clone(),
                source,
            })?;
        self.lifecycle = Lifecycle::Opened(file);
        Ok(())
    }

    #[instrument(skip_all, fields(path = ?self.path), err)]
    async fn wait(&mut self) -> Result<(), ChannelError> {
        let file = match mem::replace(&mut self.lifecycle, Lifecycle::Closed) {
            Lifecycle::Opened(file) => file,
            other => {
                self.lifecycle = other;
                return Err(self.invalid("wait"));
            }
        };

        let (file, result) = tokio::task::spawn_blocking(move || {
            let result = readiness::wait_writable(file.as_fd());
            (file, result)
        })
        .await
        .map_err(io::Error::other)?;

        match result {
            Ok(()) => {
                debug!("host attached to serial port");
                self.lifecycle = Lifecycle::Ready(file);
                Ok(())
            }
            Err(e) => {
                self.lifecycle = Lifecycle::Opened(file);
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(path = ?self.path), err)]
    async fn listen(&mut self) -> Result<Self::Listener, ChannelError> {
        let file = match mem::replace(&mut self.lifecycle, Lifecycle::Closed) {
            Lifecycle::Ready(file) => file,
            other => {
                self.lifecycle = other;
                return Err(self.invalid("listen"));
            }
        };

        let stream = match file.try_clone().and_then(SerialStream::new) {
            Ok(stream) => stream,
            Err(e) => {
                self.lifecycle = Lifecycle::Ready(file);
                return Err(e.into());
            }
        };
        let (listener, session) = mux::serve(stream);
        self.lifecycle = Lifecycle::Serving { file, session };
        Ok(listener)
    }

    #[instrument(skip_all, fields(path = ?self.path), err)]
    async fn teardown(&mut self) -> Result<(), ChannelError> {
        match mem::replace(&mut self.lifecycle, Lifecycle::Closed) {
            Lifecycle::Opened(file) | Lifecycle::Ready(file) => close_file(file),
            Lifecycle::Serving { file, session } => {
                let waited = session.wait_closed(self.close_timeout).await;
                let closed_file = close_file(file);
                waited?;
                closed_file
            }
            other => {
                self.lifecycle = other;
                Err(self.invalid("teardown"))
            }
        }
    }
}

fn close_file(file: File) -> Result<(), ChannelError> {
    close(file.into_raw_fd()).map_err(ChannelError::Close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::Instant;

    fn serving(close_timeout: Duration) -> (SerialChannel, MuxListener, DuplexStream) {
        let (agent, host) = duplex(1024);
        let (listener, session) = mux::serve(agent);
        let channel = SerialChannel {
            path: PathBuf::from("/dev/null"),
            close_timeout,
            lifecycle: Lifecycle::Serving {
                file: File::open("/dev/null").unwrap(),
                session,
            },
        };
        (channel, listener, host)
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_times_out_on_stuck_session() {
        let (mut channel, mut listener, _host) = serving(Duration::from_secs(5));
        let start = Instant::now();
        let err = channel.teardown().await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, ChannelError::SessionTeardownTimeout(_)), "got {err:?}");
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
        assert_eq!(channel.state(), SerialState::Closed);
        assert!(listener.accept().await.is_err(), "session outlived teardown");
    }

    #[tokio::test]
    async fn teardown_after_session_closed() {
        let (mut channel, listener, _host) = serving(Duration::from_secs(5));
        listener.close();
        channel.teardown().await.unwrap();
        assert_eq!(channel.state(), SerialState::Closed);
    }

    #[tokio::test]
    async fn teardown_after_host_hangup() {
        let (mut channel, _listener, host) = serving(Duration::from_secs(5));
        drop(host);
        channel.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn teardown_twice_is_rejected() {
        let (mut channel, listener, _host) = serving(Duration::from_secs(5));
        drop(listener);
        channel.teardown().await.unwrap();
        let err = channel.teardown().await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::InvalidState {
                operation: "teardown",
                state: "closed"
            }
        ));
    }

    #[tokio::test]
    async fn stages_out_of_order_are_rejected() {
        let mut channel = SerialChannel::new("/dev/null");
        assert!(matches!(
            channel.teardown().await,
            Err(ChannelError::InvalidState { state: "unopened", .. })
        ));
        assert!(matches!(
            channel.wait().await,
            Err(ChannelError::InvalidState { operation: "wait", .. })
        ));
        assert!(matches!(
            channel.listen().await,
            Err(ChannelError::InvalidState { operation: "listen", .. })
        ));
        assert_eq!(channel.state(), SerialState::Unopened);
    }

    #[tokio::test]
    async fn setup_on_missing_device_fails() {
        let mut channel = SerialChannel::new("/dev/agent-channel-does-not-exist");
        let err = channel.setup().await.unwrap_err();
        assert!(matches!(err, ChannelError::Open { .. }), "got {err:?}");
        assert_eq!(channel.state(), SerialState::Unopened);
    }
}

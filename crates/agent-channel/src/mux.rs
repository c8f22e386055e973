//! Hands the serial port to a yamux session so the host can open many streams over it

use crate::error::ChannelError;
use futures_util::StreamExt;
use std::fmt::{Debug, Formatter};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_yamux::{Config, Session, StreamHandle};
use tracing::{debug, trace, warn, warn_span, Instrument};

/// Starts a yamux server session over `io`.
///
/// Returns the listener yielding the host's streams and the handle teardown uses to wait for
/// the session to end.
///
/// The driver's own diagnostics are emitted at `warn` inside a `yamux` span. Records that
/// `tokio-yamux` writes through the `log` facade keep the level the library gives them (mostly
/// `debug`), they reach the subscriber through its `tracing-log` bridge but are not raised to
/// `warn`.
pub(crate) fn serve<T>(io: T) -> (MuxListener, SessionHandle)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // the host side may be too busy to answer pings, which would tear the session down
    let config = Config {
        enable_keepalive: false,
        ..Config::default()
    };
    let session = Session::new_server(io, config);

    let (incoming_tx, incoming_rx) = unbounded_channel();
    let (closed_tx, closed_rx) = oneshot::channel();
    let shutdown = CancellationToken::new();

    tokio::spawn(
        drive_session(session, incoming_tx, shutdown.clone(), closed_tx)
            .instrument(warn_span!("yamux", component = "yamux")),
    );

    let handle = SessionHandle {
        closed: closed_rx,
        shutdown: shutdown.clone(),
    };
    let listener = MuxListener {
        incoming: incoming_rx,
        shutdown,
    };
    (listener, handle)
}

/// Teardown's side of a running session
#[derive(Debug)]
pub(crate) struct SessionHandle {
    closed: oneshot::Receiver<()>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Waits up to `deadline` for the session to end on its own.
    ///
    /// The deadline is polled first so it wins when both are ready. On timeout the session is
    /// forced down and its copy of the descriptor released before the error is returned.
    pub(crate) async fn wait_closed(mut self, deadline: Duration) -> Result<(), ChannelError> {
        tokio::select! {
            biased;
            _ = tokio::time::sleep(deadline) => {}
            _ = &mut self.closed => return Ok(()),
        }
        warn!(?deadline, "yamux session did not close in time, forcing it down");
        self.shutdown.cancel();
        // the driver never awaits anything but the shutdown token and the session
        let _ = self.closed.await;
        Err(ChannelError::SessionTeardownTimeout(deadline))
    }
}

/// Polls the session until it ends or is asked to shut down, forwarding inbound streams.
async fn drive_session<T>(
    session: Session<T>,
    incoming: UnboundedSender<StreamHandle>,
    shutdown: CancellationToken,
    closed: oneshot::Sender<()>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Box::pin(session);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutting down yamux session");
                break;
            }
            next = session.next() => match next {
                Some(Ok(stream)) => {
                    trace!("host opened a new stream");
                    if incoming.send(stream).is_err() {
                        warn!("listener dropped, closing yamux session");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("yamux session failed: {e}");
                    break;
                }
                None => {
                    warn!("yamux session closed by host");
                    break;
                }
            }
        }
    }
    drop(session);
    // teardown may have given up waiting already
    let _ = closed.send(());
}

/// Listener over the logical streams of a serial port's yamux session
pub struct MuxListener {
    incoming: UnboundedReceiver<StreamHandle>,
    shutdown: CancellationToken,
}

impl MuxListener {
    /// Waits for the host to open a stream
    pub async fn accept(&mut self) -> io::Result<StreamHandle> {
        self.incoming.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "yamux session closed")
        })
    }

    /// Shuts the session down
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MuxListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Debug for MuxListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxListener")
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

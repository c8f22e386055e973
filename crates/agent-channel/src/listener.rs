//! What the RPC layer serves on

use crate::mux::MuxListener;
use pin_project::pin_project;
use std::fmt::{Debug, Formatter};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_vsock::{VsockListener, VsockStream};
use tokio_yamux::StreamHandle;
use tracing::trace;

/// An accept-style listener over whichever transport was discovered
pub enum AgentListener {
    /// Connections accepted directly on the vsock port
    Vsock(VsockListener),
    /// Logical streams opened by the host inside the serial port's multiplexing session
    Mux(MuxListener),
}

impl AgentListener {
    /// Waits for the next connection from the host
    pub async fn accept(&mut self) -> io::Result<AgentStream> {
        match self {
            AgentListener::Vsock(listener) => {
                let (stream, addr) = listener.accept().await?;
                trace!(?addr, "accepted vsock connection");
                Ok(AgentStream::Vsock(stream))
            }
            AgentListener::Mux(listener) => listener.accept().await.map(AgentStream::Mux),
        }
    }

    /// Stops accepting. For the serial transport this shuts the multiplexing session down,
    /// which is what channel teardown waits for.
    pub fn close(&self) {
        match self {
            AgentListener::Vsock(_) => {}
            AgentListener::Mux(listener) => listener.close(),
        }
    }
}

impl Debug for AgentListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentListener::Vsock(_) => f.write_str("Vsock(..)"),
            AgentListener::Mux(listener) => f.debug_tuple("Mux").field(listener).finish(),
        }
    }
}

/// A single bidirectional byte stream to the host
#[pin_project(project = AgentStreamProj)]
pub enum AgentStream {
    Vsock(#[pin] VsockStream),
    Mux(#[pin] StreamHandle),
}

impl Debug for AgentStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStream::Vsock(_) => f.write_str("AgentStream::Vsock"),
            AgentStream::Mux(_) => f.write_str("AgentStream::Mux"),
        }
    }
}

impl AsyncRead for AgentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            AgentStreamProj::Vsock(stream) => stream.poll_read(cx, buf),
            AgentStreamProj::Mux(stream) => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AgentStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            AgentStreamProj::Vsock(stream) => stream.poll_write(cx, buf),
            AgentStreamProj::Mux(stream) => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            AgentStreamProj::Vsock(stream) => stream.poll_flush(cx),
            AgentStreamProj::Mux(stream) => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            AgentStreamProj::Vsock(stream) => stream.poll_shutdown(cx),
            AgentStreamProj::Mux(stream) => stream.poll_shutdown(cx),
        }
    }
}

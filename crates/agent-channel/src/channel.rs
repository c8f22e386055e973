//! The channel contract and the two transports that implement it

use crate::error::ChannelError;
use crate::listener::AgentListener;
use std::fmt::{Display, Formatter};

pub use serial::{SerialChannel, SerialState};
pub use vsock::VsockChannel;

mod serial;
mod vsock;

/// A transport between the agent and the host.
///
/// A channel is single use and goes through `setup`, `wait`, `listen` and finally `teardown`.
/// Every stage failure is fatal, retrying is left to discovery.
pub trait Channel {
    type Listener;

    /// Acquires the OS level resources of the transport
    #[expect(async_fn_in_trait)]
    async fn setup(&mut self) -> Result<(), ChannelError>;

    /// Blocks until the host side can talk over the transport
    #[expect(async_fn_in_trait)]
    async fn wait(&mut self) -> Result<(), ChannelError>;

    /// Produces the listener the RPC server accepts connections from
    #[expect(async_fn_in_trait)]
    async fn listen(&mut self) -> Result<Self::Listener, ChannelError>;

    /// Releases the transport, waiting a bounded time for an active session to close
    #[expect(async_fn_in_trait)]
    async fn teardown(&mut self) -> Result<(), ChannelError>;
}

/// Which transport a channel runs over
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ChannelKind {
    Vsock,
    Serial,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Vsock => "vsock",
            ChannelKind::Serial => "serial",
        }
    }
}

impl Display for ChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The channel chosen by discovery
#[derive(Debug)]
pub enum AgentChannel {
    Vsock(VsockChannel),
    Serial(SerialChannel),
}

impl AgentChannel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            AgentChannel::Vsock(_) => ChannelKind::Vsock,
            AgentChannel::Serial(_) => ChannelKind::Serial,
        }
    }
}

impl Channel for AgentChannel {
    type Listener = AgentListener;

    async fn setup(&mut self) -> Result<(), ChannelError> {
        match self {
            AgentChannel::Vsock(vsock) => vsock.setup().await,
            AgentChannel::Serial(serial) => serial.setup().await,
        }
    }

    async fn wait(&mut self) -> Result<(), ChannelError> {
        match self {
            AgentChannel::Vsock(vsock) => vsock.wait().await,
            AgentChannel::Serial(serial) => serial.wait().await,
        }
    }

    async fn listen(&mut self) -> Result<Self::Listener, ChannelError> {
        match self {
            AgentChannel::Vsock(vsock) => vsock.listen().await.map(AgentListener::Vsock),
            AgentChannel::Serial(serial) => serial.listen().await.map(AgentListener::Mux),
        }
    }

    async fn teardown(&mut self) -> Result<(), ChannelError> {
        match self {
            AgentChannel::Vsock(vsock) => vsock.teardown().await,
            AgentChannel::Serial(serial) => serial.teardown().await,
        }
    }
}

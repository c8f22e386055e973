//! # `agent-channel`
//!
//! Finds and readies the single channel a guest agent uses to expose its RPC surface to the
//! host. The host may have provisioned either a vsock device or a hot-plugged virtio serial
//! port; [discover] probes for both, preferring vsock on every attempt, and returns an
//! [AgentChannel] that walks through `setup -> wait -> listen -> teardown`.
//!
//! ```no_run
//! use agent_channel::{discover, Channel, ChannelConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut channel = discover(&ChannelConfig::default()).await?;
//! channel.setup().await?;
//! channel.wait().await?;
//! let mut listener = channel.listen().await?;
//! let _stream = listener.accept().await?;
//! listener.close();
//! channel.teardown().await?;
//! # Ok(())
//! # }
//! ```

pub use channel::{AgentChannel, Channel, ChannelKind, SerialChannel, SerialState, VsockChannel};
pub use config::ChannelConfig;
pub use discover::{discover, Discovery, VsockProbe};
pub use error::{ChannelError, DiscoveryError, ProbeError, ResolveError};
pub use listener::{AgentListener, AgentStream};
pub use mux::MuxListener;
pub use probe::is_vsock_supported;
pub use resolve::find_virtual_serial_path;

pub mod channel;
mod config;
mod discover;
mod error;
mod listener;
mod mux;
mod probe;
mod resolve;

//! Finds out which transport the host provisioned

use crate::channel::{AgentChannel, ChannelKind, SerialChannel, VsockChannel};
use crate::config::ChannelConfig;
use crate::error::{DiscoveryError, ProbeError, ResolveError};
use crate::probe::is_vsock_supported;
use crate::resolve::find_virtual_serial_path;
use std::path::PathBuf;
use tracing::field::Empty;
use tracing::{error, instrument, trace, Span};

/// Checks whether vsock sockets can be created, see [is_vsock_supported]
pub type VsockProbe = fn() -> Result<bool, ProbeError>;

/// Discovers the channel with the given configuration, see [Discovery::discover]
pub async fn discover(config: &ChannelConfig) -> Result<AgentChannel, DiscoveryError> {
    Discovery::new(config.clone()).discover().await
}

/// The discovery protocol.
///
/// The runtime hot plugs either a vsock device or a virtio serial port depending on its own
/// configuration and on host support, and the guest has no other way to know which. Discovery
/// polls for both, at most `max_tries` times with `retry_interval` in between.
#[derive(Debug, Clone)]
pub struct Discovery {
    config: ChannelConfig,
    probe: VsockProbe,
}

/// What one iteration of the discovery loop observed
#[derive(Debug, Default)]
struct DiscoveryAttempt {
    vsock_device: bool,
    vsock_supported: bool,
    vsock_error: Option<ProbeError>,
    serial_path: Option<PathBuf>,
    serial_error: Option<ResolveError>,
}

impl Discovery {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            probe: is_vsock_supported,
        }
    }

    /// Replaces the vsock capability probe
    pub fn with_probe(mut self, probe: VsockProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Returns the first usable channel, preferring vsock over serial on every iteration.
    ///
    /// A serial port seen earlier does not stick, so vsock still wins if it shows up late. When
    /// every iteration fails the last serial and vsock errors are returned together. The worst
    /// case duration is [ChannelConfig::discovery_budget].
    #[instrument(skip_all, fields(channel_type = Empty, serial_path = Empty), err)]
    pub async fn discover(&self) -> Result<AgentChannel, DiscoveryError> {
        let mut serial_error = None;
        let mut vsock_error = None;

        for iteration in 0..self.config.max_tries() {
            if iteration > 0 {
                tokio::time::sleep(self.config.retry_interval()).await;
            }

            let attempt = self.attempt();
            trace!(iteration, ?attempt, "discovery attempt");

            if attempt.vsock_supported {
                Span::current().record("channel_type", ChannelKind::Vsock.as_str());
                return Ok(AgentChannel::Vsock(VsockChannel::new(
                    self.config.vsock_port(),
                )));
            }
            if let Some(path) = attempt.serial_path {
                let span = Span::current();
                span.record("channel_type", ChannelKind::Serial.as_str());
                span.record("serial_path", tracing::field::debug(&path));
                return Ok(AgentChannel::Serial(
                    SerialChannel::new(path).with_close_timeout(self.config.close_timeout()),
                ));
            }

            if attempt.vsock_device {
                vsock_error = attempt.vsock_error;
            }
            serial_error = attempt.serial_error;
        }

        if let Some(e) = &serial_error {
            error!(error = %e, "serial port not found");
        }
        if let Some(e) = &vsock_error {
            error!(error = %e, "vsock not found");
        }
        Err(DiscoveryError::NotFound {
            serial: serial_error,
            vsock: vsock_error,
        })
    }

    fn attempt(&self) -> DiscoveryAttempt {
        let mut attempt = DiscoveryAttempt {
            vsock_device: self.config.vsock_device().exists(),
            ..Default::default()
        };

        if attempt.vsock_device {
            match (self.probe)() {
                Ok(supported) => attempt.vsock_supported = supported,
                Err(e) => attempt.vsock_error = Some(e),
            }
            if attempt.vsock_supported {
                return attempt;
            }
        }

        match find_virtual_serial_path(
            self.config.virtio_ports_root(),
            self.config.device_root(),
            self.config.serial_channel_name(),
        ) {
            Ok(path) => attempt.serial_path = Some(path),
            Err(e) => attempt.serial_error = Some(e),
        }
        attempt
    }
}

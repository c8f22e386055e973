//! Fixed values the channel layer is built around, gathered so they can be retargeted

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of discovery iterations before giving up
pub const CHANNEL_EXIST_MAX_TRIES: u32 = 200;
/// Pause between two discovery iterations
pub const CHANNEL_EXIST_WAIT_TIME: Duration = Duration::from_millis(50);
/// How long teardown waits for the multiplexing session to close
pub const CHANNEL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// The vsock port the agent listens on
pub const VSOCK_PORT: u32 = 1024;
/// Name the runtime gives to the agent's virtio serial port
pub const SERIAL_CHANNEL_NAME: &str = "agent.channel.0";

const VSOCK_DEVICE: &str = "/dev/vsock";
const VIRTIO_PORTS_ROOT: &str = "/sys/class/virtio-ports";
const DEVICE_ROOT: &str = "/dev";

/// Configuration shared by discovery and both channel variants.
///
/// The defaults match what the runtime provisions inside the guest. Tests point the paths
/// at temporary directories.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    max_tries: u32,
    retry_interval: Duration,
    close_timeout: Duration,
    vsock_device: PathBuf,
    vsock_port: u32,
    virtio_ports_root: PathBuf,
    device_root: PathBuf,
    serial_channel_name: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_tries: CHANNEL_EXIST_MAX_TRIES,
            retry_interval: CHANNEL_EXIST_WAIT_TIME,
            close_timeout: CHANNEL_CLOSE_TIMEOUT,
            vsock_device: PathBuf::from(VSOCK_DEVICE),
            vsock_port: VSOCK_PORT,
            virtio_ports_root: PathBuf::from(VIRTIO_PORTS_ROOT),
            device_root: PathBuf::from(DEVICE_ROOT),
            serial_channel_name: SERIAL_CHANNEL_NAME.to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_vsock_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.vsock_device = path.into();
        self
    }

    pub fn with_vsock_port(mut self, port: u32) -> Self {
        self.vsock_port = port;
        self
    }

    pub fn with_virtio_ports_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.virtio_ports_root = path.into();
        self
    }

    pub fn with_device_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_root = path.into();
        self
    }

    pub fn with_serial_channel_name(mut self, name: impl Into<String>) -> Self {
        self.serial_channel_name = name.into();
        self
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    pub fn vsock_device(&self) -> &Path {
        &self.vsock_device
    }

    pub fn vsock_port(&self) -> u32 {
        self.vsock_port
    }

    pub fn virtio_ports_root(&self) -> &Path {
        &self.virtio_ports_root
    }

    pub fn device_root(&self) -> &Path {
        &self.device_root
    }

    pub fn serial_channel_name(&self) -> &str {
        &self.serial_channel_name
    }

    /// The worst case time discovery spends before failing, `max_tries * retry_interval`.
    ///
    /// This is the boot time budget of the discovery phase. Callers should not put their own
    /// timeout around [discover](crate::discover), the retry loop is the only timeout authority.
    pub fn discovery_budget(&self) -> Duration {
        self.retry_interval.saturating_mul(self.max_tries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_is_ten_seconds() {
        let config = ChannelConfig::default();
        assert_eq!(config.discovery_budget(), Duration::from_secs(10));
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.serial_channel_name(), "agent.channel.0");
        assert_eq!(config.vsock_port(), 1024);
    }

    #[test]
    fn builders_override_defaults() {
        let config = ChannelConfig::default()
            .with_max_tries(3)
            .with_retry_interval(Duration::from_millis(10))
            .with_device_root("/tmp/dev");
        assert_eq!(config.discovery_budget(), Duration::from_millis(30));
        assert_eq!(config.device_root(), Path::new("/tmp/dev"));
    }
}

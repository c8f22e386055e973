use crate::channel::Channel;
use crate::error::ChannelError;
use tokio_vsock::{VsockAddr, VsockListener};
use tracing::debug;

/// Vsock transport.
///
/// The transport accepts many connections natively so there is nothing to set up, wait for or
/// tear down. Listening binds the agent port for any context id.
#[derive(Debug, Clone)]
pub struct VsockChannel {
    port: u32,
}

impl VsockChannel {
    pub fn new(port: u32) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u32 {
        self.port
    }
}

impl Channel for VsockChannel {
    type Listener = VsockListener;

    async fn setup(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn listen(&mut self) -> Result<Self::Listener, ChannelError> {
        debug!(port = self.port, "binding vsock listener");
        let listener = VsockListener::bind(VsockAddr::new(libc::VMADDR_CID_ANY, self.port))?;
        Ok(listener)
    }

    async fn teardown(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_stages_are_no_ops() {
        let mut channel = VsockChannel::new(1024);
        channel.setup().await.unwrap();
        channel.wait().await.unwrap();
        channel.teardown().await.unwrap();
        assert_eq!(channel.port(), 1024);
    }
}

//! Fake guest hardware for exercising channel discovery without a VM

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::trace;

/// A temporary stand in for the parts of `/sys` and `/dev` that discovery looks at.
///
/// Everything is removed once the topology is dropped.
#[derive(Debug)]
pub struct VirtioTopology {
    dir: TempDir,
}

impl VirtioTopology {
    /// Creates an empty topology, with no ports and no vsock device
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("agent-channel-topology")
            .tempdir()?;
        fs::create_dir(dir.path().join("virtio-ports"))?;
        fs::create_dir(dir.path().join("dev"))?;
        Ok(Self { dir })
    }

    /// The directory playing `/sys/class/virtio-ports`
    pub fn ports_root(&self) -> PathBuf {
        self.dir.path().join("virtio-ports")
    }

    /// The directory playing `/dev`
    pub fn device_root(&self) -> PathBuf {
        self.dir.path().join("dev")
    }

    /// The path playing `/dev/vsock`, which only exists after [plug_vsock](Self::plug_vsock)
    pub fn vsock_device(&self) -> PathBuf {
        self.device_root().join("vsock")
    }

    /// Hot plugs a port whose `name` file holds `name`, along with its device node
    pub fn plug_port(&self, port: &str, name: &str) -> io::Result<PathBuf> {
        let port_dir = self.ports_root().join(port);
        fs::create_dir(&port_dir)?;
        fs::write(port_dir.join("name"), name)?;
        trace!(port, name, "plugged virtio port");
        self.create_node(port)
    }

    /// Hot plugs a port that has not published its `name` file yet
    pub fn plug_partial_port(&self, port: &str) -> io::Result<()> {
        fs::create_dir(self.ports_root().join(port))
    }

    /// Hot plugs a port whose `name` cannot be read as a file
    pub fn plug_broken_port(&self, port: &str) -> io::Result<()> {
        fs::create_dir_all(self.ports_root().join(port).join("name"))
    }

    /// Creates the vsock device node
    pub fn plug_vsock(&self) -> io::Result<()> {
        create_file(&self.vsock_device())
    }

    fn create_node(&self, port: &str) -> io::Result<PathBuf> {
        let node = self.device_root().join(port);
        create_file(&node)?;
        Ok(node)
    }
}

fn create_file(path: &Path) -> io::Result<()> {
    fs::File::create(path).map(drop)
}

//! Maps a virtio serial channel name to its device node

use crate::error::ResolveError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Scans `ports_root` (normally `/sys/class/virtio-ports`) for a port whose `name` file contains
/// `channel_name`, returning the matching node under `device_root`.
///
/// Ports without a `name` file are skipped since hot-plugged ports may still be initializing.
/// Any other read failure aborts the scan. The match is a substring match and the first port
/// in directory order wins.
pub fn find_virtual_serial_path(
    ports_root: &Path,
    device_root: &Path,
    channel_name: &str,
) -> Result<PathBuf, ResolveError> {
    let root_unavailable = |source: io::Error| ResolveError::RootUnavailable {
        path: ports_root.to_path_buf(),
        source,
    };
    let entries = fs::read_dir(ports_root).map_err(root_unavailable)?;

    for entry in entries {
        let port = entry.map_err(root_unavailable)?.file_name();
        let name_path = ports_root.join(&port).join("name");
        let content = match fs::read_to_string(&name_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = ?name_path, "skip parsing of non-existent file");
                continue;
            }
            Err(source) => {
                return Err(ResolveError::ReadFailure {
                    path: name_path,
                    source,
                })
            }
        };
        trace!(port = ?port, name = content.trim_end(), "inspecting virtio port");

        if content.contains(channel_name) {
            return Ok(device_root.join(port));
        }
    }

    Err(ResolveError::NotFound {
        name: channel_name.to_string(),
    })
}

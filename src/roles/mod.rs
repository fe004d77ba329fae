//! Process roles
//!
//! Reader, Router and Display each run as their own process and talk over
//! Unix stream sockets:
//!
//! ```text
//! modem ──AT+CENG?──▶ Reader ──batch (88 B)──▶ Router ──tower / end (32 B)──▶ Display
//! ```

pub mod display;
pub mod reader;
pub mod router;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tracing::{debug, warn};

/// Bind a listening socket, removing a stale socket file first.
pub fn bind_fresh(path: &Path) -> Result<UnixListener> {
    remove_socket_file(path);
    UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "Removed stale socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket = %path.display(), error = %e, "Could not remove stale socket file"),
    }
}

/// Removes a listening socket file when dropped.
pub struct SocketGuard {
    path: PathBuf,
}

impl SocketGuard {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        remove_socket_file(&self.path);
    }
}

//! Unix domain socket listener setup (the "C2" layer's accept side).
//!
//! Binds a `UnixListener` at a fixed path under `0700` permissions, removing
//! a stale socket file left behind by a crashed prior broker. Accepting a
//! connection briefly toggles the listener into non-blocking mode so the
//! broker's single-threaded poll loop never has to dedicate a thread to
//! `accept()`: poll readiness is checked first, then `accept()` is attempted
//! without blocking, and the listener is restored to blocking mode
//! regardless of the outcome.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Max length of a Unix domain socket path on Linux (`sun_path` is 108 bytes
/// including the NUL terminator).
pub const MAX_SOCKET_PATH: usize = 104;

/// Directory permission bits applied to the socket file: owner read/write/
/// execute only. Renderer and producer processes run as the same user as
/// the broker, so group/other access is never required.
const SOCKET_MODE: u32 = 0o700;

/// Backlog passed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 8;

/// Resolve the default socket path for `session_label`, preferring
/// `$XDG_RUNTIME_DIR` and falling back to `/tmp`.
#[must_use]
pub fn default_socket_path(session_label: &str) -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    dir.join(format!("spectra-{session_label}.sock"))
}

/// A bound, listening broker socket.
#[derive(Debug)]
pub struct Listener {
    inner: UnixListener,
    path: PathBuf,
}

impl Listener {
    /// Bind at `path`, removing a stale socket file first and setting
    /// `0700` permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` exceeds [`MAX_SOCKET_PATH`], a stale file
    /// exists but cannot be removed, the parent directory cannot be created,
    /// or the bind/listen/chmod syscalls fail.
    pub fn bind(path: &Path) -> Result<Self> {
        let path_len = path.as_os_str().len();
        if path_len > MAX_SOCKET_PATH {
            bail!(
                "socket path too long ({path_len} > {MAX_SOCKET_PATH}): {}; use a shorter session label",
                path.display()
            );
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create socket directory: {}", parent.display()))?;
        }
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("remove stale socket file: {}", path.display()))?;
        }
        let inner = UnixListener::bind(path)
            .with_context(|| format!("bind broker socket: {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("set socket permissions: {}", path.display()))?;

        // std's UnixListener::bind already calls listen(2) with a platform
        // default backlog; re-issue it explicitly with our chosen backlog.
        let ret = unsafe { libc::listen(inner.as_raw_fd(), LISTEN_BACKLOG) };
        if ret != 0 {
            bail!("listen({}) failed: {}", LISTEN_BACKLOG, std::io::Error::last_os_error());
        }

        Ok(Self { inner, path: path.to_path_buf() })
    }

    /// Raw fd for this listener, for use in a `poll()` readiness check.
    #[must_use]
    pub fn as_raw_fd(&self) -> i32 {
        self.inner.as_raw_fd()
    }

    /// Attempt to accept one pending connection without blocking.
    ///
    /// Call only after `poll()` reports the listener fd readable. Toggles
    /// the descriptor non-blocking for the duration of the call and always
    /// restores blocking mode before returning, then forces the *accepted*
    /// descriptor back to blocking mode (accepted sockets on Linux do not
    /// inherit `O_NONBLOCK` from the listener, but this keeps the contract
    /// explicit and portable). Returns `Ok(None)` if another thread or the
    /// kernel already drained the pending connection (spurious wakeup).
    ///
    /// # Errors
    ///
    /// Returns an error if toggling non-blocking mode or `accept()` itself
    /// fails for a reason other than "would block".
    pub fn try_accept(&self) -> Result<Option<UnixStream>> {
        set_nonblocking(self.inner.as_raw_fd(), true)?;
        let result = self.inner.accept();
        set_nonblocking(self.inner.as_raw_fd(), false)?;

        match result {
            Ok((stream, _addr)) => {
                set_nonblocking(stream.as_raw_fd(), false)?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("accept on broker socket"),
        }
    }

    /// Path this listener is bound to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn set_nonblocking(fd: i32, nonblocking: bool) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        bail!("fcntl(F_GETFL) failed: {}", std::io::Error::last_os_error());
    }
    let new_flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) };
    if ret < 0 {
        bail!("fcntl(F_SETFL) failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

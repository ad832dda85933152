//! Renderer process supervisor: spawns `spectra-window` children, tracks
//! their pid/window/liveness, and reaps exited ones without the broker's
//! single-threaded main loop ever blocking on a `wait()`.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use anyhow::{Context, Result};

/// One supervised renderer child process.
#[derive(Debug)]
pub struct ProcessEntry {
    pub pid: u32,
    pub window_id: u64,
    pub alive: bool,
    /// Socket path the renderer was told to connect to. Kept on the
    /// supervisor's own bookkeeping (rather than read off the renderer's
    /// connection) so it's available for logging even before the renderer
    /// has said HELLO.
    pub socket_path: PathBuf,
    child: Child,
}

/// Tracks every renderer process the broker has spawned.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    entries: Vec<ProcessEntry>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Spawn a renderer for `window_id`, pointed at `socket_path`.
    ///
    /// Resolves the renderer binary as a sibling of the broker's own
    /// executable first, falling back to `spectra-window` resolved from
    /// `PATH`, so a normal install (both binaries in the same `bin/`
    /// directory) never needs the renderer on `PATH` at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the child process fails to spawn.
    pub fn spawn_renderer(&mut self, window_id: u64, socket_path: &Path) -> Result<u32> {
        let binary = renderer_binary_path();
        let child = Command::new(&binary)
            .arg("--socket")
            .arg(socket_path)
            .spawn()
            .with_context(|| format!("spawn renderer at {}", binary.display()))?;
        let pid = child.id();
        log::info!("[process] spawned renderer pid={pid} window={window_id} socket={}", socket_path.display());
        self.entries.push(ProcessEntry { pid, window_id, alive: true, socket_path: socket_path.to_path_buf(), child });
        Ok(pid)
    }

    /// Non-blocking reap of every tracked child. Call on the broker's 2s
    /// reap-timer cadence. Marks an entry `alive = false` once its child has
    /// exited but does not remove it — the caller decides when a process
    /// entry is no longer worth keeping, typically once its window has also
    /// left the session graph.
    pub fn reap(&mut self) {
        for entry in &mut self.entries {
            if !entry.alive {
                continue;
            }
            match entry.child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("[process] renderer pid={} exited: {status}", entry.pid);
                    entry.alive = false;
                }
                Ok(None) => {}
                Err(e) => log::warn!("[process] waitpid for pid {} failed: {e}", entry.pid),
            }
        }
    }

    #[must_use]
    pub fn is_alive(&self, window_id: u64) -> bool {
        self.entries.iter().any(|e| e.window_id == window_id && e.alive)
    }

    /// Send `SIGTERM` to every still-alive child, e.g. on broker shutdown.
    pub fn terminate_all(&mut self) {
        for entry in &self.entries {
            if entry.alive {
                log::info!("[process] sending SIGTERM to renderer pid={}", entry.pid);
                #[allow(clippy::cast_possible_wrap, reason = "pids fit in pid_t on every supported platform")]
                // SAFETY: pid came from Child::id() for a process this supervisor spawned and still owns.
                unsafe {
                    libc::kill(entry.pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
    }

    /// Drop a process entry once it's no longer relevant (exited and its
    /// window has already been forgotten by the session graph).
    pub fn remove(&mut self, window_id: u64) {
        self.entries.retain(|e| e.window_id != window_id);
    }

    /// Diagnostic query kept for logging/debugging parity with the
    /// original's own read-only supervisor accessors.
    #[must_use]
    pub fn pid_for_window(&self, window_id: u64) -> Option<u32> {
        self.entries.iter().find(|e| e.window_id == window_id).map(|e| e.pid)
    }

    pub fn all_processes(&self) -> impl Iterator<Item = &ProcessEntry> {
        self.entries.iter()
    }
}

fn renderer_binary_path() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("spectra-window");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("spectra-window")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_and_reap_a_short_lived_child() {
        let mut supervisor = ProcessSupervisor::new();
        // `true` exits immediately with status 0; stand in for a renderer
        // binary without depending on spectra-window actually existing.
        let socket_path = PathBuf::from("/tmp/does-not-matter.sock");
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        supervisor.entries.push(ProcessEntry { pid, window_id: 1, alive: true, socket_path, child });

        assert!(supervisor.is_alive(1));
        std::thread::sleep(std::time::Duration::from_millis(50));
        supervisor.reap();
        assert!(!supervisor.is_alive(1));
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut supervisor = ProcessSupervisor::new();
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        supervisor.entries.push(ProcessEntry {
            pid,
            window_id: 2,
            alive: true,
            socket_path: PathBuf::from("/tmp/x.sock"),
            child,
        });
        supervisor.remove(2);
        assert!(supervisor.pid_for_window(2).is_none());
    }

    #[test]
    fn renderer_binary_path_falls_back_to_bare_name() {
        // current_exe() under the test harness won't have a spectra-window
        // sibling, so this should fall back to the PATH-resolved name.
        assert_eq!(renderer_binary_path(), PathBuf::from("spectra-window"));
    }
}

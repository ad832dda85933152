//! Session graph: the broker's logical map from windows to the figures they
//! display, independent of whatever socket connection currently carries a
//! window's traffic.
//!
//! A window can exist here before any renderer has connected to it — the
//! broker reserves a pending slot the instant it decides a new renderer
//! process is needed (so a spawn failure has something concrete to roll
//! back), and a real renderer connection claims that slot once it sends
//! HELLO. Figure ids only ever point at one window at a time; moving a
//! figure (detach, or redistribution after a renderer dies) always goes
//! through [`SessionGraph::assign_figure`]/[`SessionGraph::remove_window`] so
//! the reverse index stays consistent with `windows`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One window's logical state: which figures it's showing and whether a
/// renderer has actually attached to it yet.
#[derive(Debug)]
pub struct WindowEntry {
    pub window_id: u64,
    pub figure_ids: Vec<u64>,
    /// `None` until a renderer process claims this slot by sending HELLO.
    pub pid: Option<u32>,
    pub last_heartbeat: Instant,
}

impl WindowEntry {
    fn pending(window_id: u64, now: Instant) -> Self {
        Self { window_id, figure_ids: Vec::new(), pid: None, last_heartbeat: now }
    }
}

/// `WindowId` → [`WindowEntry`] plus the reverse `FigureId` → `WindowId` index.
#[derive(Debug)]
pub struct SessionGraph {
    windows: HashMap<u64, WindowEntry>,
    figure_owner: HashMap<u64, u64>,
    next_window_id: u64,
}

impl Default for SessionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGraph {
    /// Empty graph with window ids starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self { windows: HashMap::new(), figure_owner: HashMap::new(), next_window_id: 1 }
    }

    /// Reserve a new window id and create its pending slot, not yet claimed
    /// by any renderer connection.
    pub fn create_pending_window(&mut self, now: Instant) -> u64 {
        let id = self.next_window_id;
        self.next_window_id += 1;
        self.windows.insert(id, WindowEntry::pending(id, now));
        id
    }

    /// Drop a window entirely, e.g. rolling back a pending slot whose
    /// renderer failed to spawn, or forgetting one whose renderer
    /// disconnected after its figures were redistributed elsewhere. Returns
    /// the figure ids that were still assigned to it.
    pub fn remove_window(&mut self, window_id: u64) -> Vec<u64> {
        let Some(entry) = self.windows.remove(&window_id) else {
            return Vec::new();
        };
        for figure_id in &entry.figure_ids {
            self.figure_owner.remove(figure_id);
        }
        entry.figure_ids
    }

    /// Mark `window_id` claimed by a live renderer process, resetting its
    /// heartbeat clock.
    pub fn claim_window(&mut self, window_id: u64, pid: u32, now: Instant) -> Option<&mut WindowEntry> {
        let entry = self.windows.get_mut(&window_id)?;
        entry.pid = Some(pid);
        entry.last_heartbeat = now;
        Some(entry)
    }

    #[must_use]
    pub fn window(&self, window_id: u64) -> Option<&WindowEntry> {
        self.windows.get(&window_id)
    }

    pub fn window_mut(&mut self, window_id: u64) -> Option<&mut WindowEntry> {
        self.windows.get_mut(&window_id)
    }

    pub fn window_ids(&self) -> impl Iterator<Item = &u64> {
        self.windows.keys()
    }

    /// First window still tracked, in arbitrary order — used to pick a
    /// redistribution target for figures orphaned by a dead renderer.
    #[must_use]
    pub fn any_window_id(&self) -> Option<u64> {
        self.windows.keys().next().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    #[must_use]
    pub fn owner_of(&self, figure_id: u64) -> Option<u64> {
        self.figure_owner.get(&figure_id).copied()
    }

    /// Assign `figure_id` to `window_id`, removing it from its previous
    /// window (if any) first.
    pub fn assign_figure(&mut self, window_id: u64, figure_id: u64) {
        if let Some(prev) = self.figure_owner.insert(figure_id, window_id) {
            if prev != window_id {
                if let Some(prev_entry) = self.windows.get_mut(&prev) {
                    prev_entry.figure_ids.retain(|&id| id != figure_id);
                }
            }
        }
        if let Some(entry) = self.windows.get_mut(&window_id) {
            if !entry.figure_ids.contains(&figure_id) {
                entry.figure_ids.push(figure_id);
            }
        }
    }

    /// Unassign `figure_id` from whatever window it's on, e.g. on
    /// `EVT_FIGURE_DESTROYED`.
    pub fn forget_figure(&mut self, figure_id: u64) {
        if let Some(window_id) = self.figure_owner.remove(&figure_id) {
            if let Some(entry) = self.windows.get_mut(&window_id) {
                entry.figure_ids.retain(|&id| id != figure_id);
            }
        }
    }

    pub fn heartbeat(&mut self, window_id: u64, now: Instant) {
        if let Some(entry) = self.windows.get_mut(&window_id) {
            entry.last_heartbeat = now;
        }
    }

    /// Claimed windows whose last heartbeat predates `now - timeout`. A
    /// pending window (no pid yet) is never considered stale here — it has
    /// no heartbeat cadence until a renderer actually attaches.
    #[must_use]
    pub fn stale_windows(&self, now: Instant, timeout: Duration) -> Vec<u64> {
        self.windows
            .values()
            .filter(|e| e.pid.is_some() && now.duration_since(e.last_heartbeat) > timeout)
            .map(|e| e.window_id)
            .collect()
    }

    /// A read accessor for a single window's entry, kept for
    /// logging/debugging parity with the original session graph (see
    /// `DESIGN.md`), even though the broker's own dispatch logic always goes
    /// through `window`/`window_mut`.
    #[must_use]
    pub fn agent(&self, window_id: u64) -> Option<&WindowEntry> {
        self.windows.get(&window_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_window_has_no_pid_until_claimed() {
        let mut graph = SessionGraph::new();
        let now = Instant::now();
        let id = graph.create_pending_window(now);
        assert!(graph.window(id).unwrap().pid.is_none());
        graph.claim_window(id, 4242, now);
        assert_eq!(graph.window(id).unwrap().pid, Some(4242));
    }

    #[test]
    fn assign_figure_moves_ownership_between_windows() {
        let mut graph = SessionGraph::new();
        let now = Instant::now();
        let w1 = graph.create_pending_window(now);
        let w2 = graph.create_pending_window(now);
        graph.assign_figure(w1, 7);
        assert_eq!(graph.owner_of(7), Some(w1));
        assert_eq!(graph.window(w1).unwrap().figure_ids, vec![7]);

        graph.assign_figure(w2, 7);
        assert_eq!(graph.owner_of(7), Some(w2));
        assert!(graph.window(w1).unwrap().figure_ids.is_empty());
        assert_eq!(graph.window(w2).unwrap().figure_ids, vec![7]);
    }

    #[test]
    fn remove_window_returns_orphaned_figures_and_clears_reverse_index() {
        let mut graph = SessionGraph::new();
        let now = Instant::now();
        let w1 = graph.create_pending_window(now);
        graph.assign_figure(w1, 1);
        graph.assign_figure(w1, 2);

        let orphaned = graph.remove_window(w1);
        assert_eq!(orphaned, vec![1, 2]);
        assert!(graph.owner_of(1).is_none());
        assert!(graph.owner_of(2).is_none());
        assert!(graph.window(w1).is_none());
    }

    #[test]
    fn stale_windows_ignores_pending_slots() {
        let mut graph = SessionGraph::new();
        let now = Instant::now();
        let pending = graph.create_pending_window(now);
        let claimed = graph.create_pending_window(now);
        graph.claim_window(claimed, 1, now - Duration::from_secs(30));

        let stale = graph.stale_windows(now, Duration::from_secs(15));
        assert_eq!(stale, vec![claimed]);
        assert!(!stale.contains(&pending));
    }

    #[test]
    fn heartbeat_resets_staleness_clock() {
        let mut graph = SessionGraph::new();
        let now = Instant::now();
        let id = graph.create_pending_window(now);
        graph.claim_window(id, 1, now - Duration::from_secs(30));
        graph.heartbeat(id, now);
        assert!(graph.stale_windows(now, Duration::from_secs(15)).is_empty());
    }

    #[test]
    fn forget_figure_detaches_without_removing_window() {
        let mut graph = SessionGraph::new();
        let now = Instant::now();
        let w1 = graph.create_pending_window(now);
        graph.assign_figure(w1, 9);
        graph.forget_figure(9);
        assert!(graph.owner_of(9).is_none());
        assert!(graph.window(w1).unwrap().figure_ids.is_empty());
    }

    #[test]
    fn any_window_id_is_none_when_empty() {
        let graph = SessionGraph::new();
        assert!(graph.any_window_id().is_none());
    }
}

//! The broker's single-threaded event loop (the "C4" layer): accepts
//! producer and renderer connections, classifies them from their `HELLO`,
//! and dispatches every message type to the figure store, the session
//! graph, and the renderer process supervisor.
//!
//! There is exactly one [`Broker`] per running process. It never spawns a
//! thread: readiness is checked with a single `poll(2)` call over the listen
//! socket plus every connected client, with a 1ms timeout so the stale-window
//! and reap timers still get serviced promptly even when nothing is ready.

pub mod classify;
pub mod spawn_groups;

use std::collections::HashMap;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::codec::diff::{DiffOp, DiffOpType};
use crate::codec::messages::{
    CmdAssignFiguresPayload, CmdRemoveFigurePayload, EvtFigureDestroyedPayload, EvtHeartbeatPayload, EvtInputPayload,
    EvtWindowClosedPayload, FigureIdPayload, HelloPayload, InputType, MessageType, ReqAddSeriesPayload,
    ReqCreateAxesPayload, ReqCreateFigurePayload, ReqCreateWindowPayload, ReqDetachFigurePayload, ReqGetSnapshotPayload,
    ReqReconnectPayload, ReqRemoveSeriesPayload, ReqSetDataPayload, ReqShowPayload, ReqUpdateBatchPayload,
    ReqUpdatePropertyPayload, RespAxesCreatedPayload, RespErrPayload, RespFigureListPayload, RespSeriesAddedPayload,
    StateDiffPayload, StateSnapshotPayload, WelcomePayload, WindowIdPayload,
};
use crate::model::figure::{Figure, Series};
use crate::model::knob::Knob;
use crate::model::store::FigureStore;
use crate::process::ProcessSupervisor;
use crate::session::SessionGraph;
use crate::transport::connection::{Connection, Frame};
use crate::transport::listener::Listener;

use classify::ClientClass;

/// How often the broker checks for renderers that have missed their
/// heartbeat.
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// How often exited renderer children are reaped.
const REAP_INTERVAL: Duration = Duration::from_secs(2);
/// A window is stale once it's gone this many heartbeat intervals without a ping.
const HEARTBEAT_STALE_FACTOR: u64 = 3;
/// `poll(2)` timeout, in milliseconds. Short enough that the stale/reap
/// timers above stay responsive even under constant traffic.
const POLL_TIMEOUT_MS: i32 = 1;

/// Result of resolving a `REQ_UPDATE_PROPERTY`/`REQ_UPDATE_BATCH` entry's
/// named `property` field against the recognised-name table.
enum PropertyDispatch {
    /// Apply this op to the store and forward it.
    Apply(DiffOp),
    /// A recognised name the model doesn't actually need to act on.
    NoOp,
    /// Not one of the recognised property names.
    Unknown,
}

#[derive(Debug)]
struct ClientEntry {
    connection: Connection,
    handshake_done: bool,
    class: Option<ClientClass>,
    /// Set once a renderer's `HELLO` claims a window; never set for producers.
    window_id: Option<u64>,
}

/// The broker process: one listen socket, every connected client, the
/// authoritative figure store, the session graph, and the renderer
/// supervisor.
#[derive(Debug)]
pub struct Broker {
    listener: Listener,
    clients: HashMap<u64, ClientEntry>,
    next_client_id: u64,
    session_id: u64,
    graph: SessionGraph,
    store: FigureStore,
    supervisor: ProcessSupervisor,
    heartbeat_ms: u64,
    /// Once a renderer has connected, an empty session graph means "nobody
    /// is watching anymore" and the broker shuts itself down. Before the
    /// first renderer connects, an empty graph just means "still starting up".
    had_agents: bool,
    shutdown: bool,
    last_stale_check: Instant,
    last_reap: Instant,
}

impl Broker {
    /// Bind a broker listening at `socket_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (see [`Listener::bind`]).
    pub fn new(socket_path: &Path, heartbeat_ms: u64) -> Result<Self> {
        let listener = Listener::bind(socket_path)?;
        let now = Instant::now();
        Ok(Self {
            listener,
            clients: HashMap::new(),
            next_client_id: 1,
            session_id: 1,
            graph: SessionGraph::new(),
            store: FigureStore::new(),
            supervisor: ProcessSupervisor::new(),
            heartbeat_ms,
            had_agents: false,
            shutdown: false,
            last_stale_check: now,
            last_reap: now,
        })
    }

    /// Path of the bound listen socket, e.g. to pass to a spawned renderer.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        self.listener.path()
    }

    /// Run the event loop until `shutdown_flag` is set or the broker decides
    /// to stop on its own (a producer disconnected, or every renderer left
    /// after at least one had connected).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying `poll(2)` syscall fails for a
    /// reason other than `EINTR`.
    pub fn run(&mut self, shutdown_flag: &AtomicBool) -> Result<()> {
        while !self.shutdown && !shutdown_flag.load(Ordering::Relaxed) {
            self.poll_once()?;

            let now = Instant::now();
            if now.duration_since(self.last_stale_check) >= STALE_CHECK_INTERVAL {
                self.check_stale_windows(now);
                self.last_stale_check = now;
            }
            if now.duration_since(self.last_reap) >= REAP_INTERVAL {
                self.supervisor.reap();
                self.last_reap = now;
            }
            if self.had_agents && self.graph.is_empty() {
                log::info!("[broker] no windows remain, shutting down");
                self.shutdown = true;
            }
        }
        log::info!("[broker] terminating renderer processes");
        self.supervisor.terminate_all();
        Ok(())
    }

    fn poll_once(&mut self) -> Result<()> {
        let client_ids: Vec<u64> = self.clients.keys().copied().collect();
        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(1 + client_ids.len());
        fds.push(libc::pollfd { fd: self.listener.as_raw_fd(), events: libc::POLLIN, revents: 0 });
        for &id in &client_ids {
            let fd = self.clients[&id].connection.as_raw_fd();
            fds.push(libc::pollfd { fd, events: libc::POLLIN, revents: 0 });
        }

        // SAFETY: `fds` is a correctly-sized, live buffer for the duration of this call.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_TIMEOUT_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(());
            }
            bail!("poll failed: {err}");
        }
        if ready == 0 {
            return Ok(());
        }

        if fds[0].revents & libc::POLLIN != 0 {
            self.accept_pending();
        }
        for (i, &id) in client_ids.iter().enumerate() {
            let revents = fds[i + 1].revents;
            if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                self.service_client(id);
            }
        }
        Ok(())
    }

    fn accept_pending(&mut self) {
        match self.listener.try_accept() {
            Ok(Some(stream)) => {
                let id = self.next_client_id;
                self.next_client_id += 1;
                self.clients.insert(id, ClientEntry {
                    connection: Connection::new(stream),
                    handshake_done: false,
                    class: None,
                    window_id: None,
                });
                log::debug!("[broker] accepted client {id}");
            }
            Ok(None) => {}
            Err(e) => log::warn!("[broker] accept failed: {e}"),
        }
    }

    fn service_client(&mut self, id: u64) {
        let frames_result = {
            let Some(entry) = self.clients.get_mut(&id) else { return };
            entry.connection.read_ready()
        };
        let frames = match frames_result {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!("[broker] client {id} read failed: {e}");
                self.handle_client_failure(id);
                return;
            }
        };
        for frame in frames {
            if let Err(e) = self.dispatch_frame(id, frame) {
                log::warn!("[broker] client {id} dispatch error: {e}");
            }
        }
    }

    fn handle_client_failure(&mut self, id: u64) {
        let Some(entry) = self.clients.remove(&id) else { return };
        match entry.class {
            Some(class) if class.is_producer() => {
                log::error!("[broker] producer client {id} disconnected, tearing down all renderers");
                self.supervisor.terminate_all();
                self.shutdown = true;
            }
            _ => {
                if let Some(window_id) = entry.window_id {
                    self.retire_window(window_id);
                }
            }
        }
    }

    /// Remove `window_id` from the session graph and, if it still held
    /// figures, redistribute them onto another remaining window.
    fn retire_window(&mut self, window_id: u64) {
        let orphaned = self.graph.remove_window(window_id);
        self.supervisor.remove(window_id);
        if orphaned.is_empty() {
            return;
        }
        let Some(target) = self.graph.any_window_id() else {
            log::warn!("[broker] {} figure(s) orphaned with no remaining window to host them", orphaned.len());
            return;
        };
        for figure_id in &orphaned {
            self.graph.assign_figure(target, *figure_id);
        }
        self.send_assignment_and_snapshot(target);
    }

    fn check_stale_windows(&mut self, now: Instant) {
        let timeout = Duration::from_millis(self.heartbeat_ms.saturating_mul(HEARTBEAT_STALE_FACTOR));
        for window_id in self.graph.stale_windows(now, timeout) {
            log::warn!("[broker] window {window_id} missed its heartbeat, reclaiming its figures");
            if let Some(client_id) = self.client_id_for_window(window_id) {
                self.clients.remove(&client_id);
            }
            self.retire_window(window_id);
        }
    }

    fn client_id_for_window(&self, window_id: u64) -> Option<u64> {
        self.clients.iter().find(|(_, e)| e.window_id == Some(window_id)).map(|(&id, _)| id)
    }

    fn claim_pending_window(&mut self, now: Instant) -> u64 {
        let pending =
            self.graph.window_ids().copied().find(|&wid| self.graph.window(wid).is_some_and(|w| w.pid.is_none()));
        let window_id = pending.unwrap_or_else(|| self.graph.create_pending_window(now));
        let pid = self.supervisor.pid_for_window(window_id).unwrap_or(0);
        self.graph.claim_window(window_id, pid, now);
        window_id
    }

    fn send_assignment_and_snapshot(&mut self, window_id: u64) {
        let Some(figure_ids) = self.graph.window(window_id).map(|w| w.figure_ids.clone()) else { return };
        let active_figure = figure_ids.first().copied().unwrap_or(0);
        let assign = CmdAssignFiguresPayload { figure_ids: figure_ids.clone(), active_figure };
        self.send_to_window(window_id, MessageType::CmdAssignFigures, 0, &assign.encode());

        match self.store.snapshot_figures(&figure_ids) {
            Ok((revision, figures)) => {
                let (_, _, knobs) = self.store.snapshot_all();
                let snapshot =
                    StateSnapshotPayload { revision, figures, knobs: knobs.iter().map(Knob::to_snapshot).collect() };
                self.send_to_window(window_id, MessageType::StateSnapshot, 0, &snapshot.encode());
            }
            Err(e) => log::warn!("[broker] could not build snapshot for window {window_id}: {e}"),
        }
    }

    fn send_to_window(&mut self, window_id: u64, msg_type: MessageType, request_id: u64, payload: &[u8]) {
        let session_id = self.session_id;
        if let Some(entry) = self.clients.values_mut().find(|e| e.window_id == Some(window_id)) {
            if let Err(e) = entry.connection.send(msg_type as u16, request_id, session_id, window_id, payload) {
                log::warn!("[broker] send to window {window_id} failed: {e}");
            }
        }
    }

    fn send_to_producers(&mut self, msg_type: MessageType, payload: &[u8]) {
        let session_id = self.session_id;
        for entry in self.clients.values_mut() {
            if entry.class.is_some_and(ClientClass::is_producer) {
                if let Err(e) = entry.connection.send(msg_type as u16, 0, session_id, 0, payload) {
                    log::warn!("[broker] send to producer failed: {e}");
                }
            }
        }
    }

    fn respond(&mut self, id: u64, msg_type: MessageType, request_id: u64, payload: &[u8]) {
        let session_id = self.session_id;
        if let Some(entry) = self.clients.get_mut(&id) {
            let window_id = entry.window_id.unwrap_or(0);
            if let Err(e) = entry.connection.send(msg_type as u16, request_id, session_id, window_id, payload) {
                log::warn!("[broker] send to client {id} failed: {e}");
            }
        }
    }

    fn respond_err(&mut self, id: u64, request_id: u64, code: u16, message: impl Into<String>) {
        let payload = RespErrPayload { request_id, error_code: code, error_message: message.into() }.encode();
        self.respond(id, MessageType::RespErr, request_id, &payload);
    }

    /// Forward a single applied op as a `STATE_DIFF` to whichever window
    /// currently owns `figure_id`, if any. A figure nobody has shown yet has
    /// no owner, so the mutation is silently absorbed into the store and
    /// picked up by the full snapshot the first renderer to display it gets.
    fn forward_diff_to_owner(&mut self, figure_id: u64, op: DiffOp) {
        let Some(window_id) = self.graph.owner_of(figure_id) else { return };
        let new_revision = self.store.revision();
        let diff = StateDiffPayload { base_revision: new_revision.saturating_sub(1), new_revision, ops: vec![op] };
        self.send_to_window(window_id, MessageType::StateDiff, 0, &diff.encode());
    }

    fn dispatch_frame(&mut self, id: u64, frame: Frame) -> Result<()> {
        if !self.clients.contains_key(&id) {
            return Ok(());
        }
        let msg_type = MessageType::from_u16(frame.header.msg_type)?;
        let request_id = frame.header.request_id;

        let handshake_done = self.clients.get(&id).is_some_and(|e| e.handshake_done);
        if !handshake_done {
            if msg_type != MessageType::Hello {
                log::warn!("[broker] client {id} sent {msg_type:?} before HELLO, dropping connection");
                self.handle_client_failure(id);
                return Ok(());
            }
            return self.handle_hello(id, &frame.payload);
        }

        match msg_type {
            MessageType::ReqCreateFigure => self.handle_create_figure(id, request_id, &frame.payload),
            MessageType::ReqCreateAxes => self.handle_create_axes(id, request_id, &frame.payload),
            MessageType::ReqAddSeries => self.handle_add_series(id, request_id, &frame.payload),
            MessageType::ReqSetData | MessageType::ReqAppendData => {
                self.handle_set_data(id, request_id, &frame.payload)
            }
            MessageType::ReqRemoveSeries => self.handle_remove_series(id, request_id, &frame.payload),
            MessageType::ReqUpdateProperty => self.handle_update_property(id, request_id, &frame.payload),
            MessageType::ReqUpdateBatch => self.handle_update_batch(id, request_id, &frame.payload),
            MessageType::ReqDestroyFigure | MessageType::ReqCloseFigure => {
                self.handle_destroy_figure(id, request_id, &frame.payload)
            }
            MessageType::ReqShow => self.handle_show(id, request_id, &frame.payload),
            MessageType::ReqListFigures => self.handle_list_figures(id, request_id),
            MessageType::ReqGetSnapshot => self.handle_get_snapshot(id, request_id, &frame.payload),
            MessageType::ReqReconnect => self.handle_reconnect(id, request_id, &frame.payload),
            MessageType::ReqDisconnect => {
                self.handle_client_failure(id);
                Ok(())
            }
            MessageType::StateSnapshot => self.handle_producer_bulk_push(id, &frame.payload),
            MessageType::ReqCreateWindow => self.handle_create_window(id, request_id, &frame.payload),
            MessageType::ReqCloseWindow => self.handle_close_window(&frame.payload),
            MessageType::ReqDetachFigure => self.handle_detach_figure(&frame.payload),
            MessageType::EvtHeartbeat => self.handle_heartbeat(&frame.payload),
            MessageType::EvtWindow => self.handle_window_closed(&frame.payload),
            MessageType::EvtInput => self.handle_input(&frame.payload),
            MessageType::StateDiff => self.handle_renderer_diff(&frame.payload),
            other => {
                log::warn!("[broker] client {id} sent unexpected message {other:?} post-handshake");
                Ok(())
            }
        }
    }

    fn handle_hello(&mut self, id: u64, payload: &[u8]) -> Result<()> {
        let hello = HelloPayload::decode(payload)?;
        let class = classify::classify(&hello);
        let now = Instant::now();

        let window_id = if class == ClientClass::Renderer {
            let window_id = self.claim_pending_window(now);
            self.had_agents = true;
            Some(window_id)
        } else {
            None
        };

        if let Some(entry) = self.clients.get_mut(&id) {
            entry.handshake_done = true;
            entry.class = Some(class);
            entry.window_id = window_id;
        }

        let welcome = WelcomePayload {
            session_id: self.session_id,
            window_id: window_id.unwrap_or(0),
            process_id: std::process::id(),
            heartbeat_ms: u32::try_from(self.heartbeat_ms).unwrap_or(u32::MAX),
            mode: "multiproc".to_owned(),
        };
        self.respond(id, MessageType::Welcome, 0, &welcome.encode());

        if let Some(window_id) = window_id {
            self.send_assignment_and_snapshot(window_id);
        }
        Ok(())
    }

    fn handle_reconnect(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqReconnectPayload::decode(payload)?;
        if req.session_id != self.session_id {
            self.respond_err(id, request_id, 409, "session id mismatch");
            return Ok(());
        }
        let now = Instant::now();
        let window_id = self.claim_pending_window(now);
        self.had_agents = true;
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.window_id = Some(window_id);
            entry.class = Some(ClientClass::Renderer);
        }

        let welcome = WelcomePayload {
            session_id: self.session_id,
            window_id,
            process_id: std::process::id(),
            heartbeat_ms: u32::try_from(self.heartbeat_ms).unwrap_or(u32::MAX),
            mode: "multiproc".to_owned(),
        };
        self.respond(id, MessageType::Welcome, request_id, &welcome.encode());
        self.send_assignment_and_snapshot(window_id);
        Ok(())
    }

    /// A producer's bulk `STATE_SNAPSHOT` push: wipe and reload the store,
    /// then spawn one renderer per [`spawn_groups::SpawnGroup`].
    fn handle_producer_bulk_push(&mut self, id: u64, payload: &[u8]) -> Result<()> {
        let is_producer = self.clients.get(&id).and_then(|e| e.class).is_some_and(ClientClass::is_producer);
        if !is_producer {
            log::warn!("[broker] client {id} pushed STATE_SNAPSHOT but isn't a producer, ignoring");
            return Ok(());
        }
        let snapshot = StateSnapshotPayload::decode(payload)?;
        let ids = self.store.load_full_snapshot(snapshot);
        let figures: Vec<Figure> = ids.iter().filter_map(|fid| self.store.figure(*fid).cloned()).collect();
        let groups = spawn_groups::partition_by_window_group(&figures);

        let now = Instant::now();
        let socket_path = self.listener.path().to_path_buf();
        for group in groups {
            let window_id = self.graph.create_pending_window(now);
            for figure_id in &group.figure_ids {
                self.graph.assign_figure(window_id, *figure_id);
            }
            if let Err(e) = self.supervisor.spawn_renderer(window_id, &socket_path) {
                log::error!("[broker] failed to spawn renderer for window {window_id}: {e}");
                self.graph.remove_window(window_id);
            }
        }
        Ok(())
    }

    fn handle_create_figure(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqCreateFigurePayload::decode(payload)?;
        let (figure_id, _revision) = self.store.create_figure(req.title, req.width, req.height, req.window_group);
        self.respond(id, MessageType::RespFigureCreated, request_id, &FigureIdPayload { figure_id }.encode());
        Ok(())
    }

    fn handle_create_axes(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqCreateAxesPayload::decode(payload)?;
        match self.store.create_axes(
            req.figure_id,
            req.grid_rows,
            req.grid_cols,
            req.grid_index,
            req.is_3d,
            req.x_label,
            req.y_label,
            req.title,
        ) {
            Ok((axes_index, _revision)) => {
                self.respond(
                    id,
                    MessageType::RespAxesCreated,
                    request_id,
                    &RespAxesCreatedPayload { axes_index }.encode(),
                );
                let op = DiffOp {
                    op_type: DiffOpType::AddAxes,
                    figure_id: req.figure_id,
                    bool_val: req.is_3d,
                    ..Default::default()
                };
                self.forward_diff_to_owner(req.figure_id, op);
            }
            Err(e) => self.respond_err(id, request_id, 404, e.to_string()),
        }
        Ok(())
    }

    fn handle_add_series(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqAddSeriesPayload::decode(payload)?;
        let series = Series::from(req.series.clone());
        match self.store.add_series(req.figure_id, req.axes_index, series) {
            Ok((series_index, _revision)) => {
                self.respond(
                    id,
                    MessageType::RespSeriesAdded,
                    request_id,
                    &RespSeriesAddedPayload { series_index }.encode(),
                );
                let op = DiffOp {
                    op_type: DiffOpType::AddSeries,
                    figure_id: req.figure_id,
                    axes_index: req.axes_index,
                    str_val: req.series.name,
                    data: req.series.data,
                    ..Default::default()
                };
                self.forward_diff_to_owner(req.figure_id, op);
            }
            Err(e) => self.respond_err(id, request_id, 404, e.to_string()),
        }
        Ok(())
    }

    fn handle_remove_series(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqRemoveSeriesPayload::decode(payload)?;
        let op = DiffOp {
            op_type: DiffOpType::RemoveSeries,
            figure_id: req.figure_id,
            axes_index: req.axes_index,
            series_index: req.series_index,
            ..Default::default()
        };
        match self.store.apply_diff_op(&op) {
            Ok(_revision) => {
                self.respond(id, MessageType::RespOk, request_id, &[]);
                self.forward_diff_to_owner(req.figure_id, op);
            }
            Err(e) => self.respond_err(id, request_id, 404, e.to_string()),
        }
        Ok(())
    }

    fn handle_set_data(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqSetDataPayload::decode(payload)?;
        let op = DiffOp {
            op_type: DiffOpType::SetSeriesData,
            figure_id: req.figure_id,
            axes_index: req.axes_index,
            series_index: req.series_index,
            data: req.data,
            ..Default::default()
        };
        match self.store.apply_diff_op(&op) {
            Ok(_revision) => {
                self.respond(id, MessageType::RespOk, request_id, &[]);
                self.forward_diff_to_owner(req.figure_id, op);
            }
            Err(e) => self.respond_err(id, request_id, 404, e.to_string()),
        }
        Ok(())
    }

    /// Resolve a named property update against the fixed recognised-name
    /// table. `xlim`/`ylim` pull the axes' current opposite-pair limits from
    /// the store first, so setting one doesn't clobber the other; `legend`/
    /// `legend_visible` are acknowledged but never touch the model, since
    /// legend rendering is left to the renderer.
    fn property_to_diff_op(&self, req: &ReqUpdatePropertyPayload) -> PropertyDispatch {
        let op_type = match req.property.as_str() {
            "xlim" => {
                let (_, _, y_min, y_max) =
                    self.store.axis_limits(req.figure_id, req.axes_index).unwrap_or_default();
                return PropertyDispatch::Apply(DiffOp {
                    op_type: DiffOpType::SetAxisLimits,
                    figure_id: req.figure_id,
                    axes_index: req.axes_index,
                    f1: req.f1,
                    f2: req.f2,
                    f3: y_min,
                    f4: y_max,
                    ..Default::default()
                });
            }
            "ylim" => {
                let (x_min, x_max, _, _) =
                    self.store.axis_limits(req.figure_id, req.axes_index).unwrap_or_default();
                return PropertyDispatch::Apply(DiffOp {
                    op_type: DiffOpType::SetAxisLimits,
                    figure_id: req.figure_id,
                    axes_index: req.axes_index,
                    f1: x_min,
                    f2: x_max,
                    f3: req.f1,
                    f4: req.f2,
                    ..Default::default()
                });
            }
            "zlim" => DiffOpType::SetAxisZLimits,
            "color" => DiffOpType::SetSeriesColor,
            "title" => DiffOpType::SetFigureTitle,
            "grid" => DiffOpType::SetGridVisible,
            "visible" => DiffOpType::SetSeriesVisible,
            "line_width" => DiffOpType::SetLineWidth,
            "marker_size" => DiffOpType::SetMarkerSize,
            "opacity" => DiffOpType::SetOpacity,
            "xlabel" => DiffOpType::SetAxisXLabel,
            "ylabel" => DiffOpType::SetAxisYLabel,
            "axes_title" => DiffOpType::SetAxisTitle,
            "label" => DiffOpType::SetSeriesLabel,
            "legend" | "legend_visible" => return PropertyDispatch::NoOp,
            _ => return PropertyDispatch::Unknown,
        };
        PropertyDispatch::Apply(DiffOp {
            op_type,
            figure_id: req.figure_id,
            axes_index: req.axes_index,
            series_index: req.series_index,
            f1: req.f1,
            f2: req.f2,
            f3: req.f3,
            f4: req.f4,
            bool_val: req.bool_val,
            str_val: req.str_val.clone(),
            ..Default::default()
        })
    }

    fn handle_update_property(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqUpdatePropertyPayload::decode(payload)?;
        match self.property_to_diff_op(&req) {
            PropertyDispatch::Apply(op) => {
                let figure_id = op.figure_id;
                match self.store.apply_diff_op(&op) {
                    Ok(_revision) => {
                        self.respond(id, MessageType::RespOk, request_id, &[]);
                        self.forward_diff_to_owner(figure_id, op);
                    }
                    Err(e) => self.respond_err(id, request_id, 404, e.to_string()),
                }
            }
            PropertyDispatch::NoOp => self.respond(id, MessageType::RespOk, request_id, &[]),
            PropertyDispatch::Unknown => {
                self.respond_err(id, request_id, 400, format!("unrecognised property {:?}", req.property));
            }
        }
        Ok(())
    }

    /// Applies every recognised update in order, skipping unrecognised names
    /// or ones that fail to apply rather than aborting the rest of the
    /// batch, then broadcasts one composite `STATE_DIFF` per owning window
    /// spanning the whole batch's revision range.
    fn handle_update_batch(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqUpdateBatchPayload::decode(payload)?;
        let base_revision = self.store.revision();
        let mut applied_by_window: HashMap<u64, Vec<DiffOp>> = HashMap::new();
        for update in req.updates {
            let op = match self.property_to_diff_op(&update) {
                PropertyDispatch::Apply(op) => op,
                PropertyDispatch::NoOp | PropertyDispatch::Unknown => continue,
            };
            match self.store.apply_diff_op(&op) {
                Ok(_revision) => {
                    if let Some(window_id) = self.graph.owner_of(op.figure_id) {
                        applied_by_window.entry(window_id).or_default().push(op);
                    }
                }
                Err(e) => log::warn!("[broker] batch update skipped: {e}"),
            }
        }
        self.respond(id, MessageType::RespOk, request_id, &[]);
        let new_revision = self.store.revision();
        for (window_id, ops) in applied_by_window {
            let diff = StateDiffPayload { base_revision, new_revision, ops };
            self.send_to_window(window_id, MessageType::StateDiff, 0, &diff.encode());
        }
        Ok(())
    }

    fn handle_destroy_figure(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = FigureIdPayload::decode(payload)?;
        let owner = self.graph.owner_of(req.figure_id);
        match self.store.remove_figure(req.figure_id) {
            Ok(_revision) => {
                self.graph.forget_figure(req.figure_id);
                if let Some(window_id) = owner {
                    let cmd = CmdRemoveFigurePayload { figure_id: req.figure_id, reason: "destroyed".to_owned() };
                    self.send_to_window(window_id, MessageType::CmdRemoveFigure, 0, &cmd.encode());
                }
                self.respond(id, MessageType::RespOk, request_id, &[]);
                let evt = EvtFigureDestroyedPayload { figure_id: req.figure_id };
                self.send_to_producers(MessageType::EvtFigureDestroyed, &evt.encode());
            }
            Err(e) => self.respond_err(id, request_id, 404, e.to_string()),
        }
        Ok(())
    }

    fn handle_show(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqShowPayload::decode(payload)?;
        if self.store.figure(req.figure_id).is_none() {
            self.respond_err(id, request_id, 404, format!("unknown figure {}", req.figure_id));
            return Ok(());
        }

        if req.target_window == 0 {
            let now = Instant::now();
            let window_id = self.graph.create_pending_window(now);
            self.graph.assign_figure(window_id, req.figure_id);
            let socket_path = self.listener.path().to_path_buf();
            if let Err(e) = self.supervisor.spawn_renderer(window_id, &socket_path) {
                self.graph.remove_window(window_id);
                self.respond_err(id, request_id, 500, format!("failed to spawn renderer: {e}"));
                return Ok(());
            }
        } else {
            if self.graph.window(req.target_window).is_none() {
                self.respond_err(id, request_id, 404, format!("unknown window {}", req.target_window));
                return Ok(());
            }
            self.graph.assign_figure(req.target_window, req.figure_id);
            self.send_assignment_and_snapshot(req.target_window);
        }
        self.respond(id, MessageType::RespOk, request_id, &[]);
        Ok(())
    }

    fn handle_list_figures(&mut self, id: u64, request_id: u64) -> Result<()> {
        let ids = self.store.figure_ids().to_vec();
        #[allow(clippy::cast_possible_truncation, reason = "figure counts stay far below u32::MAX in practice")]
        let resp = RespFigureListPayload { figure_count: ids.len() as u32, figure_ids: ids };
        self.respond(id, MessageType::RespFigureList, request_id, &resp.encode());
        Ok(())
    }

    fn handle_get_snapshot(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqGetSnapshotPayload::decode(payload)?;
        match self.store.snapshot_figures(&[req.figure_id]) {
            Ok((revision, figures)) => {
                let snapshot = StateSnapshotPayload { revision, figures, knobs: Vec::new() };
                self.respond(id, MessageType::RespSnapshot, request_id, &snapshot.encode());
            }
            Err(_) => self.respond_err(id, request_id, 404, format!("unknown figure {}", req.figure_id)),
        }
        Ok(())
    }

    fn handle_create_window(&mut self, id: u64, request_id: u64, payload: &[u8]) -> Result<()> {
        let req = ReqCreateWindowPayload::decode(payload)?;
        let _ = req.template_window; // layout hint only; every window starts empty

        let now = Instant::now();
        let window_id = self.graph.create_pending_window(now);
        let socket_path = self.listener.path().to_path_buf();
        if let Err(e) = self.supervisor.spawn_renderer(window_id, &socket_path) {
            self.graph.remove_window(window_id);
            self.respond_err(id, request_id, 500, format!("failed to spawn renderer: {e}"));
            return Ok(());
        }
        self.respond(id, MessageType::RespOk, request_id, &WindowIdPayload { window_id }.encode());
        Ok(())
    }

    fn handle_close_window(&mut self, payload: &[u8]) -> Result<()> {
        let req = WindowIdPayload::decode(payload)?;
        self.close_window_and_notify(req.window_id);
        Ok(())
    }

    fn handle_detach_figure(&mut self, payload: &[u8]) -> Result<()> {
        let req = ReqDetachFigurePayload::decode(payload)?;
        if self.store.figure(req.figure_id).is_none() {
            return Ok(());
        }
        let now = Instant::now();
        let new_window = self.graph.create_pending_window(now);
        self.graph.assign_figure(new_window, req.figure_id);

        let remove_cmd = CmdRemoveFigurePayload { figure_id: req.figure_id, reason: "detached".to_owned() };
        self.send_to_window(req.source_window, MessageType::CmdRemoveFigure, 0, &remove_cmd.encode());

        let socket_path = self.listener.path().to_path_buf();
        if let Err(e) = self.supervisor.spawn_renderer(new_window, &socket_path) {
            log::error!("[broker] failed to spawn renderer for detached window {new_window}: {e}");
            self.graph.remove_window(new_window);
        }
        Ok(())
    }

    fn handle_heartbeat(&mut self, payload: &[u8]) -> Result<()> {
        let evt = EvtHeartbeatPayload::decode(payload)?;
        self.graph.heartbeat(evt.window_id, Instant::now());
        Ok(())
    }

    fn handle_window_closed(&mut self, payload: &[u8]) -> Result<()> {
        let evt = EvtWindowClosedPayload::decode(payload)?;
        self.close_window_and_notify(evt.window_id);
        Ok(())
    }

    /// A window going away through any path (user closed it, `REQ_CLOSE_WINDOW`,
    /// heartbeat timeout, or its connection dying) redistributes its figures
    /// and tells every producer a window closed.
    fn close_window_and_notify(&mut self, window_id: u64) {
        if let Some(client_id) = self.client_id_for_window(window_id) {
            self.clients.remove(&client_id);
        }
        self.retire_window(window_id);
        let evt = EvtWindowClosedPayload { window_id };
        self.send_to_producers(MessageType::EvtWindowClosed, &evt.encode());
    }

    fn handle_input(&mut self, payload: &[u8]) -> Result<()> {
        let evt = EvtInputPayload::decode(payload)?;
        match evt.input_type {
            InputType::Scroll => self.apply_scroll_zoom(&evt),
            InputType::KeyPress => self.apply_key_press(&evt),
            InputType::KeyRelease | InputType::MouseButton | InputType::MouseMove => {}
        }
        Ok(())
    }

    /// Scroll is translated into a zoom around the axes' current center:
    /// `factor = clamp(1 - 0.1 * scroll_y, 0.1, 10.0)`. The scroll delta
    /// rides in `cursor_y` for `EVT_INPUT` events of type `Scroll` (the
    /// cursor-position fields are otherwise meaningless for a wheel event).
    fn apply_scroll_zoom(&mut self, evt: &EvtInputPayload) {
        let scroll_y = evt.cursor_y;
        let factor = (1.0 - 0.1 * scroll_y).clamp(0.1, 10.0);
        let Some(figure) = self.store.figure(evt.figure_id) else { return };
        let Some(axis) = figure.axes.get(evt.axes_index as usize) else { return };

        let x_center = (axis.x_min + axis.x_max) / 2.0;
        let y_center = (axis.y_min + axis.y_max) / 2.0;
        let op = DiffOp {
            op_type: DiffOpType::SetAxisLimits,
            figure_id: evt.figure_id,
            axes_index: evt.axes_index,
            f1: x_center - (x_center - axis.x_min) * factor,
            f2: x_center + (axis.x_max - x_center) * factor,
            f3: y_center - (y_center - axis.y_min) * factor,
            f4: y_center + (axis.y_max - y_center) * factor,
            ..Default::default()
        };
        if self.store.apply_diff_op(&op).is_ok() {
            self.forward_diff_to_owner(evt.figure_id, op);
        }
    }

    /// `g`/`G` toggles grid visibility on the target axes; every other key is
    /// reserved and currently a no-op.
    fn apply_key_press(&mut self, evt: &EvtInputPayload) {
        if evt.key_code != u32::from(b'g') && evt.key_code != u32::from(b'G') {
            return;
        }
        let Some(figure) = self.store.figure(evt.figure_id) else { return };
        let Some(axis) = figure.axes.get(evt.axes_index as usize) else { return };
        let op = DiffOp {
            op_type: DiffOpType::SetGridVisible,
            figure_id: evt.figure_id,
            axes_index: evt.axes_index,
            bool_val: !axis.grid_visible,
            ..Default::default()
        };
        if self.store.apply_diff_op(&op).is_ok() {
            self.forward_diff_to_owner(evt.figure_id, op);
        }
    }

    /// A renderer reports a local mutation (e.g. a drag it already applied
    /// optimistically); apply it to the authoritative store and forward to
    /// every producer, but never back out to other renderers.
    fn handle_renderer_diff(&mut self, payload: &[u8]) -> Result<()> {
        let diff = StateDiffPayload::decode(payload)?;
        let mut applied = Vec::with_capacity(diff.ops.len());
        for op in diff.ops {
            if let Err(e) = self.store.apply_diff_op(&op) {
                log::warn!("[broker] renderer diff op rejected: {e}");
                continue;
            }
            applied.push(op);
        }
        if applied.is_empty() {
            return Ok(());
        }
        let new_revision = self.store.revision();
        let forwarded = StateDiffPayload { base_revision: diff.base_revision, new_revision, ops: applied };
        self.send_to_producers(MessageType::StateDiff, &forwarded.encode());
        Ok(())
    }
}

//! End-to-end scenarios driven entirely through the wire protocol: a real
//! [`Broker`] bound to a `tempfile`-backed socket, running on its own
//! thread, with test code playing the part of producer and renderer
//! clients over plain [`UnixStream`]s.

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spectra_broker::codec::diff::DiffOpType;
use spectra_broker::codec::messages::{
    CmdAssignFiguresPayload, CmdRemoveFigurePayload, EvtInputPayload, FigureIdPayload, HelloPayload, InputType,
    MessageType, ReqAddSeriesPayload, ReqCreateAxesPayload, ReqCreateFigurePayload, ReqDetachFigurePayload,
    ReqShowPayload, ReqUpdatePropertyPayload, RespAxesCreatedPayload, RespSeriesAddedPayload, SnapshotSeriesState,
    StateDiffPayload, WelcomePayload,
};
use spectra_broker::transport::connection::{Connection, Frame};
use spectra_broker::Broker;
use tempfile::TempDir;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct TestBroker {
    _dir: TempDir,
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestBroker {
    fn start(heartbeat_ms: u64) -> Self {
        let dir = TempDir::new().expect("create tempdir");
        let socket_path = dir.path().join("broker.sock");
        let mut broker = Broker::new(&socket_path, heartbeat_ms).expect("bind broker");
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            let _ = broker.run(&shutdown_clone);
        });
        thread::sleep(Duration::from_millis(50));
        Self { _dir: dir, socket_path, shutdown, handle: Some(handle) }
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A client connection with a small inbox so tests can receive frames in
/// whatever order the broker happens to batch them.
struct Client {
    conn: Connection,
    inbox: VecDeque<Frame>,
}

impl Client {
    fn connect(socket_path: &Path) -> Self {
        let stream = UnixStream::connect(socket_path).expect("connect to broker");
        stream.set_read_timeout(Some(READ_TIMEOUT)).expect("set read timeout");
        Self { conn: Connection::new(stream), inbox: VecDeque::new() }
    }

    fn hello(socket_path: &Path, client_type: &str, agent_build: &str) -> (Self, WelcomePayload) {
        let mut client = Self::connect(socket_path);
        let hello = HelloPayload {
            protocol_major: 1,
            protocol_minor: 0,
            agent_build: agent_build.to_owned(),
            capabilities: 0,
            client_type: client_type.to_owned(),
        };
        client.send(MessageType::Hello, 1, 0, 0, &hello.encode());
        let welcome_frame = client.recv_type(MessageType::Welcome);
        let welcome = WelcomePayload::decode(&welcome_frame.payload).expect("decode welcome");
        (client, welcome)
    }

    fn send(&mut self, msg_type: MessageType, request_id: u64, session_id: u64, window_id: u64, payload: &[u8]) {
        self.conn.send(msg_type as u16, request_id, session_id, window_id, payload).expect("send frame");
    }

    /// Block for the next frame, whatever type it is.
    fn recv(&mut self) -> Frame {
        if let Some(frame) = self.inbox.pop_front() {
            return frame;
        }
        let frames = self.conn.read_ready().expect("read_ready");
        let mut frames = VecDeque::from(frames);
        let first = frames.pop_front().expect("read_ready returned no frames");
        self.inbox.extend(frames);
        first
    }

    /// Block until a frame of `msg_type` arrives, skipping (and discarding)
    /// anything else — used when a handshake response is interleaved with
    /// assignment/snapshot pushes whose relative order isn't under test.
    fn recv_type(&mut self, msg_type: MessageType) -> Frame {
        loop {
            let frame = self.recv();
            if frame.header.msg_type == msg_type as u16 {
                return frame;
            }
        }
    }
}

fn producer_build() -> &'static str {
    "spectra-producer/1.0"
}

#[test]
fn scenario_hello_welcome() {
    let broker = TestBroker::start(5000);
    let (_client, welcome) = Client::hello(broker.socket_path(), "agent", "test-renderer/0.1");

    assert_eq!(welcome.session_id, 1);
    assert_ne!(welcome.window_id, 0, "a renderer HELLO should claim a window");
    assert_eq!(welcome.mode, "multiproc");
}

#[test]
fn scenario_create_and_plot() {
    let broker = TestBroker::start(5000);
    let (mut producer, _welcome) = Client::hello(broker.socket_path(), "agent", producer_build());

    let create_figure = ReqCreateFigurePayload { title: "fig".to_owned(), width: 640, height: 480, window_group: 0 };
    producer.send(MessageType::ReqCreateFigure, 10, 0, 0, &create_figure.encode());
    let resp = producer.recv_type(MessageType::RespFigureCreated);
    let figure_id = FigureIdPayload::decode(&resp.payload).unwrap().figure_id;
    assert_eq!(figure_id, 1);

    let create_axes = ReqCreateAxesPayload {
        figure_id,
        grid_rows: 1,
        grid_cols: 1,
        grid_index: 0,
        is_3d: false,
        x_label: "x".to_owned(),
        y_label: "y".to_owned(),
        title: String::new(),
    };
    producer.send(MessageType::ReqCreateAxes, 11, 0, 0, &create_axes.encode());
    let resp = producer.recv_type(MessageType::RespAxesCreated);
    let axes_index = RespAxesCreatedPayload::decode(&resp.payload).unwrap().axes_index;
    assert_eq!(axes_index, 0);

    let add_series = ReqAddSeriesPayload {
        figure_id,
        axes_index,
        series: SnapshotSeriesState { name: "y".to_owned(), axes_index, ..Default::default() },
    };
    producer.send(MessageType::ReqAddSeries, 12, 0, 0, &add_series.encode());
    let resp = producer.recv_type(MessageType::RespSeriesAdded);
    let series_index = RespSeriesAddedPayload::decode(&resp.payload).unwrap().series_index;
    assert_eq!(series_index, 0);

    let xlim = ReqUpdatePropertyPayload {
        figure_id,
        axes_index,
        property: "xlim".to_owned(),
        f1: 0.0,
        f2: 10.0,
        ..Default::default()
    };
    producer.send(MessageType::ReqUpdateProperty, 13, 0, 0, &xlim.encode());
    let resp = producer.recv_type(MessageType::RespOk);
    assert_eq!(resp.header.request_id, 13);

    let ylim = ReqUpdatePropertyPayload {
        figure_id,
        axes_index,
        property: "ylim".to_owned(),
        f1: 0.0,
        f2: 10.0,
        ..Default::default()
    };
    producer.send(MessageType::ReqUpdateProperty, 14, 0, 0, &ylim.encode());
    let resp = producer.recv_type(MessageType::RespOk);
    assert_eq!(resp.header.request_id, 14);
}

/// Connects a renderer and a producer, creates a figure with known axis
/// limits, and attaches it to the renderer's window (via a nonzero
/// `target_window` so no child process needs to be spawned).
fn figure_shown_in_window(broker: &TestBroker) -> (Client, Client, u64, u32, u64) {
    let (mut producer, _) = Client::hello(broker.socket_path(), "agent", producer_build());
    let (mut renderer, renderer_welcome) = Client::hello(broker.socket_path(), "agent", "test-renderer/0.1");
    // drain the renderer's own initial CMD_ASSIGN_FIGURES + STATE_SNAPSHOT
    let _ = renderer.recv_type(MessageType::CmdAssignFigures);
    let _ = renderer.recv_type(MessageType::StateSnapshot);

    let create_figure = ReqCreateFigurePayload { title: "fig".to_owned(), width: 640, height: 480, window_group: 0 };
    producer.send(MessageType::ReqCreateFigure, 20, 0, 0, &create_figure.encode());
    let figure_id = FigureIdPayload::decode(&producer.recv_type(MessageType::RespFigureCreated).payload)
        .unwrap()
        .figure_id;

    let create_axes = ReqCreateAxesPayload {
        figure_id,
        grid_rows: 1,
        grid_cols: 1,
        grid_index: 0,
        is_3d: false,
        x_label: String::new(),
        y_label: String::new(),
        title: String::new(),
    };
    producer.send(MessageType::ReqCreateAxes, 21, 0, 0, &create_axes.encode());
    let axes_index =
        RespAxesCreatedPayload::decode(&producer.recv_type(MessageType::RespAxesCreated).payload).unwrap().axes_index;

    let xlim = ReqUpdatePropertyPayload {
        figure_id,
        axes_index,
        property: "xlim".to_owned(),
        f1: 0.0,
        f2: 10.0,
        ..Default::default()
    };
    producer.send(MessageType::ReqUpdateProperty, 22, 0, 0, &xlim.encode());
    let _ = producer.recv_type(MessageType::RespOk);

    let ylim = ReqUpdatePropertyPayload {
        figure_id,
        axes_index,
        property: "ylim".to_owned(),
        f1: 0.0,
        f2: 10.0,
        ..Default::default()
    };
    producer.send(MessageType::ReqUpdateProperty, 23, 0, 0, &ylim.encode());
    let _ = producer.recv_type(MessageType::RespOk);

    let show = ReqShowPayload { figure_id, target_window: renderer_welcome.window_id };
    producer.send(MessageType::ReqShow, 23, 0, 0, &show.encode());
    let _ = producer.recv_type(MessageType::RespOk);

    // the renderer now gets a refreshed assignment + snapshot
    let _ = renderer.recv_type(MessageType::CmdAssignFigures);
    let _ = renderer.recv_type(MessageType::StateSnapshot);

    (producer, renderer, figure_id, axes_index, renderer_welcome.window_id)
}

#[test]
fn scenario_scroll_zoom() {
    let broker = TestBroker::start(5000);
    let (_producer, mut renderer, figure_id, axes_index, _window_id) = figure_shown_in_window(&broker);

    let scroll = EvtInputPayload {
        window_id: 0,
        input_type: InputType::Scroll,
        key_code: 0,
        mods: 0,
        cursor_x: 0.0,
        cursor_y: 1.0,
        figure_id,
        axes_index,
    };
    renderer.send(MessageType::EvtInput, 0, 0, 0, &scroll.encode());

    let diff_frame = renderer.recv_type(MessageType::StateDiff);
    let diff = StateDiffPayload::decode(&diff_frame.payload).unwrap();
    assert_eq!(diff.ops.len(), 1);
    let op = &diff.ops[0];
    assert_eq!(op.op_type, DiffOpType::SetAxisLimits);
    assert!((op.f1 - 0.5).abs() < 1e-6, "x_min should zoom to 0.5, got {}", op.f1);
    assert!((op.f2 - 9.5).abs() < 1e-6, "x_max should zoom to 9.5, got {}", op.f2);
    assert!((op.f3 - 0.5).abs() < 1e-6, "y_min should zoom to 0.5, got {}", op.f3);
    assert!((op.f4 - 9.5).abs() < 1e-6, "y_max should zoom to 9.5, got {}", op.f4);
}

#[test]
fn scenario_grid_toggle() {
    let broker = TestBroker::start(5000);
    let (_producer, mut renderer, figure_id, axes_index, _window_id) = figure_shown_in_window(&broker);

    let key_press = EvtInputPayload {
        window_id: 0,
        input_type: InputType::KeyPress,
        key_code: u32::from(b'g'),
        mods: 0,
        cursor_x: 0.0,
        cursor_y: 0.0,
        figure_id,
        axes_index,
    };
    renderer.send(MessageType::EvtInput, 0, 0, 0, &key_press.encode());

    let diff_frame = renderer.recv_type(MessageType::StateDiff);
    let diff = StateDiffPayload::decode(&diff_frame.payload).unwrap();
    assert_eq!(diff.ops.len(), 1);
    assert_eq!(diff.ops[0].op_type, DiffOpType::SetGridVisible);
    // axes default to grid_visible = true, so the first toggle turns it off
    assert!(!diff.ops[0].bool_val);
}

#[test]
fn scenario_detach() {
    let broker = TestBroker::start(5000);
    let (_producer, mut renderer, figure_id, _axes_index, window_id) = figure_shown_in_window(&broker);

    let detach = ReqDetachFigurePayload { figure_id, source_window: window_id };
    renderer.send(MessageType::ReqDetachFigure, 0, 0, 0, &detach.encode());

    let remove = renderer.recv_type(MessageType::CmdRemoveFigure);
    let remove = CmdRemoveFigurePayload::decode(&remove.payload).unwrap();
    assert_eq!(remove.figure_id, figure_id);
    assert_eq!(remove.reason, "detached");
}

#[test]
fn scenario_heartbeat_miss_reclaims_figures() {
    // A short heartbeat interval so the 3x-miss stale threshold is well
    // under the broker's fixed 5s stale-check cadence; this test still
    // needs to wait out that cadence, so it's the slowest test in the suite.
    let broker = TestBroker::start(50);
    let (_producer, _stale_renderer, figure_id, _axes_index, _window_id) = figure_shown_in_window(&broker);
    let (mut other_renderer, _other_welcome) = Client::hello(broker.socket_path(), "agent", "test-renderer/0.1");
    let _ = other_renderer.recv_type(MessageType::CmdAssignFigures);
    let _ = other_renderer.recv_type(MessageType::StateSnapshot);

    // stale_renderer (still owned by this scope, connection left open) never
    // sends another EVT_HEARTBEAT; only the stale-window check, not a socket
    // disconnect, should reclaim its figure.
    thread::sleep(Duration::from_millis(5_300));

    // the broker should have redistributed the figure onto the other window
    let assign = other_renderer.recv_type(MessageType::CmdAssignFigures);
    let assign = CmdAssignFiguresPayload::decode(&assign.payload).unwrap();
    assert!(assign.figure_ids.contains(&figure_id));
}

use std::{
    panic,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::JoinHandle,
};

use tracing::{debug, error, warn};

use crate::{
    config::ClientConfig,
    conn::{Side, VirtualConn, VirtualConnInner},
    error::MuxError,
    frame::{self, FrameType},
    metadata::{Context, Metadata},
    registry::Registry,
    transport::Transport,
};

const RUNNING: u8 = 0;
const STOPPED: u8 = 1;

/// Which end of the wire protocol a multiplexer plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Per-vconn server handler, run on its own thread for each accepted stream.
pub type Handler = Arc<dyn Fn(VirtualConn) + Send + Sync>;

struct MultiplexerInner {
    role: Role,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry<VirtualConnInner>>,
    state: AtomicU8,
    client_config: Option<ClientConfig>,
    handler: Option<Handler>,
    recv_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owns a transport, the framing codec, and the registry of vconns
/// multiplexed over it. A single struct for both roles; `Role` picks the
/// recv-loop dispatch table.
#[derive(Clone)]
pub struct Multiplexer(Arc<MultiplexerInner>);

impl Multiplexer {
    /// Constructs a client-role multiplexer and immediately launches its
    /// receive loop on a dedicated thread.
    pub fn client(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let max = config.max_virtual_conns();
        let inner = Arc::new(MultiplexerInner {
            role: Role::Client,
            transport,
            registry: Arc::new(Registry::new(max)),
            state: AtomicU8::new(RUNNING),
            client_config: Some(config),
            handler: None,
            recv_handle: std::sync::Mutex::new(None),
        });
        Self::spawn_recv_loop(&inner);
        Self(inner)
    }

    /// Constructs a server-role multiplexer for one accepted transport
    /// connection. `handler` runs on its own thread per accepted vconn; it
    /// must be supplied up front since frames may be dispatched as soon as
    /// the receive loop starts.
    pub fn server(transport: Arc<dyn Transport>, handler: Handler) -> Self {
        let inner = Arc::new(MultiplexerInner {
            role: Role::Server,
            transport,
            registry: Arc::new(Registry::new(0)),
            state: AtomicU8::new(RUNNING),
            client_config: None,
            handler: Some(handler),
            recv_handle: std::sync::Mutex::new(None),
        });
        Self::spawn_recv_loop(&inner);
        Self(inner)
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    pub fn is_running(&self) -> bool {
        self.0.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn len(&self) -> usize {
        self.0.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.registry.is_empty()
    }

    /// Opens a new client-side vconn: allocates an id, registers it, and
    /// emits a `START` frame carrying `metadata`. On transport failure the
    /// registry entry is rolled back and the error surfaces wrapped as
    /// `StreamBufSet`.
    pub fn open_virtual_conn(&self, metadata: Metadata) -> Result<VirtualConn, MuxError> {
        if self.0.role != Role::Client {
            return Err(MuxError::ConnDone);
        }
        let id = self.0.registry.next_id();
        let inner = Arc::new(VirtualConnInner::new(
            id,
            Side::Client,
            self.0.transport.clone(),
            Arc::downgrade(&self.0.registry),
            Context::new(Metadata::new()),
        ));
        self.0.registry.register(id, inner.clone())?;

        let payload = metadata.encode();
        let frame = frame::encode(FrameType::Start, false, id, &payload);
        if let Err(err) = self.0.transport.send(&frame) {
            self.0.registry.remove(id);
            return Err(MuxError::stream_buf_set(MuxError::from(err)));
        }
        debug!(id, "vconn opened");
        Ok(VirtualConn::new(inner))
    }

    /// CAS `Running -> Stopped` and close the transport; the receive loop
    /// observes the next recv error and tears down the registry. Idempotent.
    pub fn close(&self) {
        if self.0.state.compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        let _ = self.0.transport.close();
    }

    fn spawn_recv_loop(inner: &Arc<MultiplexerInner>) {
        let loop_inner = inner.clone();
        let handle = std::thread::spawn(move || recv_loop(loop_inner));
        *inner.recv_handle.lock().unwrap() = Some(handle);
    }
}

fn recv_loop(inner: Arc<MultiplexerInner>) {
    loop {
        let buf = match inner.transport.recv() {
            Ok(buf) => buf,
            Err(err) => {
                terminate(&inner, map_transport_err(&inner, err));
                return;
            }
        };

        let frame = match frame::decode(&buf) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(?err, "dropping multiplexer: failed to decode inbound frame");
                terminate(&inner, err);
                return;
            }
        };

        match inner.role {
            Role::Client => dispatch_client(&inner, frame),
            Role::Server => dispatch_server(&inner, frame),
        }
    }
}

fn dispatch_client(inner: &Arc<MultiplexerInner>, frame: frame::Frame<'_>) {
    match frame.typ {
        FrameType::Raw => {
            let Some(vc) = inner.registry.get(frame.stream_id) else {
                warn!(id = frame.stream_id, "dropping RAW frame for unknown vconn");
                return;
            };
            if !frame.data.is_empty() {
                vc.put(frame.data.to_vec());
            }
        }
        FrameType::Fin => {
            if let Some(vc) = inner.registry.get_and_remove(frame.stream_id) {
                vc.on_close(MuxError::Eof);
            }
        }
        FrameType::Start => {
            warn!(id = frame.stream_id, "client received unexpected START frame, dropping");
        }
    }
}

fn dispatch_server(inner: &Arc<MultiplexerInner>, frame: frame::Frame<'_>) {
    match frame.typ {
        FrameType::Start => handle_start(inner, frame),
        FrameType::Raw => {
            let Some(vc) = inner.registry.get(frame.stream_id) else {
                warn!(id = frame.stream_id, "dropping RAW frame for unknown vconn");
                return;
            };
            if frame.end {
                vc.on_close(MuxError::Eof);
            } else if !frame.data.is_empty() {
                vc.put(frame.data.to_vec());
            }
        }
        FrameType::Fin => {
            warn!(id = frame.stream_id, "server received unexpected FIN frame, dropping");
        }
    }
}

fn handle_start(inner: &Arc<MultiplexerInner>, frame: frame::Frame<'_>) {
    let id = frame.stream_id;
    if inner.registry.exists(id) {
        warn!(id, "dropping START for already-open vconn");
        return;
    }

    let metadata = match Metadata::decode(frame.data) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(id, ?err, "failed to decode START metadata, rejecting");
            send_fin(inner, id);
            return;
        }
    };

    let vc_inner = Arc::new(VirtualConnInner::new(
        id,
        Side::Server,
        inner.transport.clone(),
        Arc::downgrade(&inner.registry),
        Context::new(metadata),
    ));
    if inner.registry.register(id, vc_inner.clone()).is_err() {
        // Registry is latched closed (multiplexer tearing down); nothing to accept.
        return;
    }
    let vc = VirtualConn::new(vc_inner);
    debug!(id, "vconn accepted");

    let Some(handler) = inner.handler.clone() else {
        warn!(id, "server multiplexer has no handler installed, dropping vconn");
        inner.registry.remove(id);
        return;
    };

    let inner = inner.clone();
    std::thread::spawn(move || run_handler(inner, vc, handler));
}

fn run_handler(inner: Arc<MultiplexerInner>, vc: VirtualConn, handler: Handler) {
    let id = vc.id();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| handler(vc.clone())));
    if let Err(panic) = result {
        error!(id, ?panic, "server handler panicked");
    }

    if let Some(entry) = inner.registry.get_and_remove(id) {
        // FIN is owed unless the recv buffer latched something other than a clean EOF.
        let should_fin = match entry.recv_err() {
            None | Some(MuxError::Eof) => true,
            Some(_) => false,
        };
        if should_fin {
            send_fin(&inner, id);
        }
    }
    vc.0.on_close(MuxError::Eof);
}

fn send_fin(inner: &Arc<MultiplexerInner>, id: u64) {
    let frame = frame::encode(FrameType::Fin, false, id, &[]);
    if let Err(err) = inner.transport.send(&frame) {
        debug!(id, ?err, "failed to send FIN, peer likely already gone");
    }
}

fn map_transport_err(inner: &Arc<MultiplexerInner>, err: std::io::Error) -> MuxError {
    if inner.state.load(Ordering::Acquire) == STOPPED {
        return MuxError::Canceled;
    }
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        return MuxError::Eof;
    }
    MuxError::from(err)
}

fn terminate(inner: &Arc<MultiplexerInner>, err: MuxError) {
    inner.state.store(STOPPED, Ordering::Release);
    let _ = inner.transport.close();
    inner.registry.latch_close_all(|vc| vc.on_close(err.clone()));
    if let Some(config) = &inner.client_config {
        if let Some(cb) = config.disconnected_callback() {
            cb(err.clone());
        }
    }
}

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use tracing::debug;

use crate::{
    error::MuxError,
    frame::{self, FrameType},
    metadata::Context,
    recv_buffer::{BlockingQueue, CancelToken},
    registry::Registry,
    transport::Transport,
};

/// Which side of the wire protocol a vconn was created by.
///
/// Drives `close_send`'s choice of outgoing frame: a client signals half-close
/// with `RAW(end=true)`, a server signals full close with `FIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Shared state behind a [`VirtualConn`] handle. Lives in the owning
/// multiplexer's registry; the handle(s) given to application code and the
/// registry entry both point at the same instance.
pub struct VirtualConnInner {
    id: u64,
    side: Side,
    transport: Arc<dyn Transport>,
    registry: Weak<Registry<VirtualConnInner>>,
    context: Context,
    send_closed: AtomicBool,
    closed: AtomicBool,
    recv: BlockingQueue<Vec<u8>>,
}

impl VirtualConnInner {
    pub(crate) fn new(
        id: u64,
        side: Side,
        transport: Arc<dyn Transport>,
        registry: Weak<Registry<VirtualConnInner>>,
        context: Context,
    ) -> Self {
        Self {
            id,
            side,
            transport,
            registry,
            context,
            send_closed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            recv: BlockingQueue::new(),
        }
    }

    pub(crate) fn put(&self, data: Vec<u8>) {
        self.recv.put(data);
    }

    /// Closes the receive half with `err`, at most once. Any blocked `recv`
    /// observes it; later calls are no-ops.
    pub(crate) fn on_close(&self, err: MuxError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.recv.close(err);
    }

    /// The recv buffer's latched terminal error, if it has been closed yet.
    /// `None` means still open; `Some(Eof)` is the normal peer-closed case.
    pub(crate) fn recv_err(&self) -> Option<MuxError> {
        self.recv.err()
    }
}

/// An application-visible bidirectional byte stream multiplexed over a single
/// transport. Cheap to clone: every clone shares the same underlying state.
#[derive(Clone)]
pub struct VirtualConn(pub(crate) Arc<VirtualConnInner>);

impl VirtualConn {
    pub(crate) fn new(inner: Arc<VirtualConnInner>) -> Self {
        Self(inner)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    /// Sends a `RAW` frame with `end=false`. Fails with `ConnDone` if the
    /// write half is already closed.
    pub fn send(&self, data: &[u8]) -> Result<(), MuxError> {
        if self.0.send_closed.load(Ordering::Acquire) {
            return Err(MuxError::ConnDone);
        }
        let frame = frame::encode(FrameType::Raw, false, self.0.id, data);
        self.0.transport.send(&frame).map_err(|err| {
            self.0.send_closed.store(true, Ordering::Release);
            MuxError::from(err)
        })
    }

    /// Signals end-of-stream on the write half. Client side emits
    /// `RAW(end=true)`; server side emits `FIN`. Idempotent: subsequent
    /// `close_send` calls are no-ops, and subsequent `send` calls fail with
    /// `ConnDone`.
    pub fn close_send(&self) -> Result<(), MuxError> {
        if self.0.send_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let typ = match self.0.side {
            Side::Client => FrameType::Raw,
            Side::Server => FrameType::Fin,
        };
        let end = matches!(self.0.side, Side::Client);
        let frame = frame::encode(typ, end, self.0.id, &[]);
        self.0.transport.send(&frame).map_err(MuxError::from)
    }

    /// Blocks until a chunk of application data is available, the stream
    /// closes, or `cancel` fires.
    pub fn recv(&self, cancel: &CancelToken) -> Result<Vec<u8>, MuxError> {
        self.0.recv.get(cancel)
    }

    /// Abandons the vconn locally: closes the write half (best-effort) and
    /// unblocks any blocked `recv` without waiting for the peer. Idempotent.
    pub fn close(&self) {
        let _ = self.close_send();
        self.0.on_close(MuxError::Canceled);
        if let Some(registry) = self.0.registry.upgrade() {
            registry.remove(self.0.id);
        }
        debug!(id = self.0.id, "vconn closed locally");
    }
}

impl std::fmt::Debug for VirtualConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualConn").field("id", &self.0.id).field("side", &self.0.side).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::metadata::Metadata;

    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&self, buf: &[u8]) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("boom"));
            }
            self.sent.lock().unwrap().push(buf.to_vec());
            Ok(())
        }

        fn recv(&self) -> io::Result<Vec<u8>> {
            unimplemented!()
        }

        fn close(&self) -> io::Result<()> {
            Ok(())
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
    }

    fn make_conn(side: Side, transport: Arc<RecordingTransport>) -> VirtualConn {
        let inner = VirtualConnInner::new(7, side, transport, Weak::new(), Context::new(Metadata::new()));
        VirtualConn::new(Arc::new(inner))
    }

    #[test]
    fn send_after_close_send_fails() {
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false });
        let conn = make_conn(Side::Client, transport.clone());
        conn.close_send().unwrap();
        let err = conn.send(b"x").unwrap_err();
        assert!(matches!(err, MuxError::ConnDone));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn close_send_is_idempotent() {
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false });
        let conn = make_conn(Side::Client, transport.clone());
        conn.close_send().unwrap();
        conn.close_send().unwrap();
        conn.close_send().unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn client_close_send_emits_raw_end() {
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false });
        let conn = make_conn(Side::Client, transport.clone());
        conn.close_send().unwrap();
        let sent = transport.sent.lock().unwrap();
        let decoded = frame::decode(&sent[0]).unwrap();
        assert_eq!(decoded.typ, FrameType::Raw);
        assert!(decoded.end);
    }

    #[test]
    fn server_close_send_emits_fin() {
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false });
        let conn = make_conn(Side::Server, transport.clone());
        conn.close_send().unwrap();
        let sent = transport.sent.lock().unwrap();
        let decoded = frame::decode(&sent[0]).unwrap();
        assert_eq!(decoded.typ, FrameType::Fin);
    }

    #[test]
    fn send_failure_latches_write_half_closed() {
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: true });
        let conn = make_conn(Side::Client, transport);
        assert!(conn.send(b"x").is_err());
        let err = conn.send(b"y").unwrap_err();
        assert!(matches!(err, MuxError::ConnDone));
    }

    #[test]
    fn close_unblocks_a_blocked_recv() {
        let transport = Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false });
        let conn = make_conn(Side::Client, transport);
        let conn2 = conn.clone();
        let handle = std::thread::spawn(move || {
            let cancel = CancelToken::new();
            conn2.recv(&cancel)
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.close();
        let result = handle.join().unwrap();
        assert!(result.is_err());
    }
}

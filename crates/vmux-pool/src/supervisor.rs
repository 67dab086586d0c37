use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use tracing::{info, warn};
use vmux::{ClientConfig, Metadata, Multiplexer, MuxError, VirtualConn};

use crate::dial::DialFn;

const NORMAL: u8 = 0;
const RECONNECTING: u8 = 1;
const CLOSED: u8 = 2;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

struct SupervisorInner {
    dial: DialFn,
    client_config: ClientConfig,
    current: RwLock<Option<Multiplexer>>,
    state: AtomicU8,
    reconnecting: AtomicBool,
}

/// Wraps a single multiplexer to survive transport failures: on disconnect it
/// redials with exponentially increasing backoff (100ms doubling to a 5s cap)
/// until it reconnects or is closed.
#[derive(Clone)]
pub struct Supervisor(Arc<SupervisorInner>);

impl Supervisor {
    /// Dials once; if the initial dial fails, returns the error instead of
    /// entering the reconnect loop.
    pub fn new(dial: DialFn, max_conns: u64) -> Result<Self, MuxError> {
        let inner = Arc::new(SupervisorInner {
            dial,
            client_config: ClientConfig::default().with_max_virtual_conns(max_conns),
            current: RwLock::new(None),
            state: AtomicU8::new(NORMAL),
            reconnecting: AtomicBool::new(false),
        });
        let mux = dial_and_build(&inner)?;
        *inner.current.write().unwrap() = Some(mux);
        Ok(Self(inner))
    }

    /// Same as `new`, but a failed initial dial enters the reconnect loop
    /// rather than failing the constructor.
    pub fn create(dial: DialFn, max_conns: u64) -> Self {
        let inner = Arc::new(SupervisorInner {
            dial,
            client_config: ClientConfig::default().with_max_virtual_conns(max_conns),
            current: RwLock::new(None),
            state: AtomicU8::new(RECONNECTING),
            reconnecting: AtomicBool::new(true),
        });
        let spawned = inner.clone();
        std::thread::spawn(move || reconnect_loop(spawned));
        Self(inner)
    }

    pub fn is_connected(&self) -> bool {
        self.0.state.load(Ordering::Acquire) == NORMAL && self.0.current.read().unwrap().is_some()
    }

    pub fn open_virtual_conn(&self, metadata: Metadata) -> Result<VirtualConn, MuxError> {
        let current = self.0.current.read().unwrap();
        match current.as_ref() {
            Some(mux) => mux.open_virtual_conn(metadata),
            None => Err(MuxError::Canceled),
        }
    }

    /// Idempotent: swaps state to `Closed`, which causes an in-flight
    /// reconnect loop to exit on its next timer tick, then closes the
    /// current multiplexer if one is held.
    pub fn close(&self) {
        if self.0.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        if let Some(mux) = self.0.current.write().unwrap().take() {
            mux.close();
        }
    }
}

fn dial_and_build(inner: &Arc<SupervisorInner>) -> Result<Multiplexer, MuxError> {
    let transport = (inner.dial)()?;
    let weak = Arc::downgrade(inner);
    let config = inner.client_config.clone().with_disconnected_callback(move |err| {
        if let Some(inner) = weak.upgrade() {
            on_disconnected(&inner, err);
        }
    });
    Ok(Multiplexer::client(transport, config))
}

/// Invoked from a multiplexer's recv-loop termination. Only one reconnect
/// attempt-loop runs at a time: the `reconnecting` CAS ensures a racing
/// second disconnect callback returns immediately.
fn on_disconnected(inner: &Arc<SupervisorInner>, err: MuxError) {
    if inner.state.load(Ordering::Acquire) == CLOSED {
        return;
    }
    if inner.reconnecting.swap(true, Ordering::AcqRel) {
        return;
    }
    warn!(?err, "multiplexer disconnected, entering reconnect backoff");
    let spawned = inner.clone();
    std::thread::spawn(move || reconnect_loop(spawned));
}

fn reconnect_loop(inner: Arc<SupervisorInner>) {
    inner.state.store(RECONNECTING, Ordering::Release);
    if let Some(mux) = inner.current.write().unwrap().take() {
        mux.close();
    }

    let mut delay = INITIAL_BACKOFF;
    loop {
        if inner.state.load(Ordering::Acquire) == CLOSED {
            break;
        }
        match dial_and_build(&inner) {
            Ok(mux) => {
                *inner.current.write().unwrap() = Some(mux);
                inner.state.store(NORMAL, Ordering::Release);
                info!("multiplexer reconnected");
                break;
            }
            Err(err) => {
                warn!(?err, ?delay, "reconnect attempt failed, backing off");
                std::thread::sleep(delay);
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }
    }
    inner.reconnecting.store(false, Ordering::Release);
}

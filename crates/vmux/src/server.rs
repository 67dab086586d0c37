use std::{
    io,
    net::{TcpListener, ToSocketAddrs},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    config::ServerConfig,
    multiplexer::{Handler, Multiplexer},
    transport::TcpTransport,
};

/// Interval the accept loop polls a non-blocking listener on while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maps each inbound transport connection to its own server-role multiplexer.
///
/// `bind` spawns a dedicated accept thread; every accepted connection gets a
/// `Multiplexer::server` running on its own receive-loop thread, and the
/// accept thread returns immediately to `accept()` without waiting for it.
pub struct Server {
    listener: TcpListener,
    stopped: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    muxes: Arc<Mutex<Vec<Multiplexer>>>,
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, config: ServerConfig, handler: Handler) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let stopped = Arc::new(AtomicBool::new(false));
        let muxes: Arc<Mutex<Vec<Multiplexer>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_handle = {
            let listener = listener.try_clone()?;
            let stopped = stopped.clone();
            let muxes = muxes.clone();
            std::thread::spawn(move || accept_loop(listener, config, handler, stopped, muxes))
        };

        Ok(Self { listener, stopped, accept_handle: Mutex::new(Some(accept_handle)), muxes })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Closes the listener (idempotent) and signals every live server
    /// multiplexer to close. Does not block on in-flight handlers.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("server stopping");
        for mux in self.muxes.lock().unwrap().drain(..) {
            mux.close();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    handler: Handler,
    stopped: Arc<AtomicBool>,
    muxes: Arc<Mutex<Vec<Multiplexer>>>,
) {
    loop {
        if stopped.load(Ordering::Acquire) {
            return;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "server accepted connection");
                match build_transport(stream, &config) {
                    Ok(transport) => {
                        let mux = Multiplexer::server(Arc::new(transport), handler.clone());
                        let mut muxes = muxes.lock().unwrap();
                        muxes.retain(|m| m.is_running());
                        muxes.push(mux);
                    }
                    Err(err) => warn!(?err, %peer, "failed to prepare accepted transport"),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                if stopped.load(Ordering::Acquire) {
                    return;
                }
                warn!(?err, "accept failed");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn build_transport(stream: std::net::TcpStream, config: &ServerConfig) -> io::Result<TcpTransport> {
    let transport = TcpTransport::from_stream(stream)?;
    transport.apply_timeouts(config.read_timeout, config.write_timeout)?;
    Ok(transport)
}

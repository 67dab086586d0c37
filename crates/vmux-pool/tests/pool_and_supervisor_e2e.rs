use std::{
    net::TcpListener,
    sync::{Arc, Mutex},
    time::Duration,
};

use vmux::{CancelToken, Handler, Metadata, Multiplexer, Server, ServerConfig, TcpTransport, Transport, VirtualConn};
use vmux_pool::{DialFn, Multiplexers, PoolConfig, Supervisor};

fn echo_handler() -> Handler {
    Arc::new(|vc: VirtualConn| {
        let cancel = CancelToken::new();
        while let Ok(data) = vc.recv(&cancel) {
            if vc.send(&data).is_err() {
                break;
            }
        }
    })
}

fn dial_to(addr: std::net::SocketAddr) -> DialFn {
    Arc::new(move || {
        let transport = TcpTransport::connect(addr, Duration::from_secs(1))?;
        Ok(Arc::new(transport) as Arc<dyn Transport>)
    })
}

/// S5 over a real listener: the pool fills its long-lived multiplexers first,
/// then spills over, and releases everything back to zero on close.
#[test]
fn pool_spills_over_a_real_server_then_drains() {
    let server = Server::bind("127.0.0.1:0", ServerConfig::default(), echo_handler()).unwrap();
    let addr = server.local_addr().unwrap();

    let pool = Multiplexers::new(dial_to(addr), PoolConfig::new(2, 3)).unwrap();

    let mut conns = Vec::new();
    for _ in 0..10 {
        conns.push(pool.open_virtual_conn(Metadata::new()).unwrap());
    }

    for conn in &conns {
        conn.send(b"ping").unwrap();
        let cancel = CancelToken::new();
        assert_eq!(conn.recv(&cancel).unwrap(), b"ping");
    }

    conns.clear();
    pool.close();
    server.stop();
}

/// S6 over a real listener: forcibly closing the server's side of the
/// connection drives the supervisor through a reconnect, after which it can
/// open vconns again against a second accepted connection on the same
/// still-running listener.
#[test]
fn supervisor_reconnects_after_server_side_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted: Arc<Mutex<Vec<Multiplexer>>> = Arc::new(Mutex::new(Vec::new()));
    let accepted2 = accepted.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let transport = TcpTransport::from_stream(stream).unwrap();
            let mux = Multiplexer::server(Arc::new(transport), echo_handler());
            accepted2.lock().unwrap().push(mux);
        }
    });

    let supervisor = Supervisor::new(dial_to(addr), 10).unwrap();
    assert!(supervisor.is_connected());

    let vc = supervisor.open_virtual_conn(Metadata::new()).unwrap();
    vc.send(b"ping").unwrap();
    let cancel = CancelToken::new();
    assert_eq!(vc.recv(&cancel).unwrap(), b"ping");

    // Close the server's half of the first connection; the listener keeps
    // running so the supervisor's redial lands a fresh second connection.
    std::thread::sleep(Duration::from_millis(50));
    accepted.lock().unwrap()[0].close();
    drop(vc);

    std::thread::sleep(Duration::from_millis(500));
    assert!(supervisor.is_connected());

    let vc2 = supervisor.open_virtual_conn(Metadata::new()).unwrap();
    vc2.send(b"pong").unwrap();
    let cancel = CancelToken::new();
    assert_eq!(vc2.recv(&cancel).unwrap(), b"pong");

    assert_eq!(accepted.lock().unwrap().len(), 2);
    supervisor.close();
}

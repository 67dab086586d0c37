use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::debug;

/// The blocking duplex byte pipe this crate multiplexes over.
///
/// `recv` is expected to block until a full length-delimited message is
/// available; a clean peer close is signalled by `Ok(vec![])` or an
/// `UnexpectedEof` error, either of which the multiplexer maps to `MuxError::Eof`.
pub trait Transport: Send + Sync {
    fn send(&self, buf: &[u8]) -> io::Result<()>;
    fn recv(&self) -> io::Result<Vec<u8>>;
    fn close(&self) -> io::Result<()>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// A `Transport` over `std::net::TcpStream`.
///
/// Delimits the reliable byte stream into discrete `send`/`recv` units with a
/// 4-byte big-endian length prefix ahead of the multiplexer's own frame —
/// the codec in [`crate::frame`] has no notion of message boundaries on its own.
pub struct TcpTransport {
    // Split read/write handles (via `try_clone`) so a blocked `recv` on the
    // read half never stalls a concurrent `send` on the write half.
    reader: std::sync::Mutex<TcpStream>,
    writer: std::sync::Mutex<TcpStream>,
    shutdown_handle: TcpStream,
    peer_addr: SocketAddr,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, dial_timeout: Duration) -> io::Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no resolvable address"))?;
        let stream = TcpStream::connect_timeout(&addr, dial_timeout)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: std::sync::Mutex::new(reader),
            writer: std::sync::Mutex::new(writer),
            shutdown_handle: stream,
            peer_addr,
        })
    }

    pub fn apply_timeouts(&self, read: Duration, write: Duration) -> io::Result<()> {
        self.reader.lock().unwrap().set_read_timeout(Some(read))?;
        self.writer.lock().unwrap().set_write_timeout(Some(write))?;
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn send(&self, buf: &[u8]) -> io::Result<()> {
        let mut stream = self.writer.lock().unwrap();
        let len = u32::try_from(buf.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(buf)?;
        stream.flush()
    }

    fn recv(&self) -> io::Result<Vec<u8>> {
        let mut stream = self.reader.lock().unwrap();
        let mut header = [0u8; LEN_PREFIX];
        stream.read_exact(&mut header)?;
        let len = u32::from_be_bytes(header) as usize;
        let mut data = vec![0u8; len];
        if len > 0 {
            stream.read_exact(&mut data)?;
        }
        Ok(data)
    }

    fn close(&self) -> io::Result<()> {
        match self.shutdown_handle.shutdown(std::net::Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already shut down by a racing `close`; idempotent from the caller's view.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => {
                debug!(?err, "tcp transport close");
                Err(err)
            }
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer_addr)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn round_trips_a_length_delimited_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            TcpTransport::from_stream(stream).unwrap()
        });
        let client = TcpTransport::connect(addr, Duration::from_secs(1)).unwrap();
        let server = server.join().unwrap();

        client.send(b"hello").unwrap();
        assert_eq!(server.recv().unwrap(), b"hello");

        server.send(b"world").unwrap();
        assert_eq!(client.recv().unwrap(), b"world");
    }

    #[test]
    fn recv_sees_eof_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let transport = TcpTransport::from_stream(stream).unwrap();
            transport.close().unwrap();
        });
        let client = TcpTransport::connect(addr, Duration::from_secs(1)).unwrap();
        server.join().unwrap();

        let err = client.recv().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}

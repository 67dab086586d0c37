//! Stream-multiplexing layer over a single reliable, ordered transport
//! connection: many independent, bidirectional virtual connections carried
//! over one socket.
//!
//! See [`Multiplexer`] for the receive loop and dispatch rules, [`VirtualConn`]
//! for the per-stream send/recv/close contract, and [`transport::Transport`]
//! for the collaborator this crate multiplexes over.

pub mod config;
pub mod conn;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod multiplexer;
pub mod recv_buffer;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::{ClientConfig, ServerConfig};
pub use conn::{Side, VirtualConn};
pub use error::MuxError;
pub use frame::{Frame, FrameType};
pub use metadata::{Context, Metadata};
pub use multiplexer::{Handler, Multiplexer, Role};
pub use recv_buffer::CancelToken;
pub use server::Server;
pub use transport::{TcpTransport, Transport};

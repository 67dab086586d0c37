use std::{io, sync::Arc};

use thiserror::Error;

/// The single error currency for every fallible operation in this crate.
///
/// Cheap to clone: every variant that wraps a foreign error stores it behind an `Arc`
/// so the same terminal error can be latched once and handed to every blocked waiter.
#[derive(Error, Debug, Clone)]
pub enum MuxError {
    #[error("context canceled")]
    Canceled,

    #[error("connection already done")]
    ConnDone,

    #[error("virtual connection up limit reached")]
    VirtualConnUpLimit,

    #[error("no available multiplexers")]
    NoAvailableMultiplexers,

    #[error("eof")]
    Eof,

    #[error("failed to set stream buffer")]
    StreamBufSet(#[source] Arc<MuxError>),

    #[error("failed to decode frame")]
    DecodeErr(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),
}

impl MuxError {
    pub fn decode(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        MuxError::DecodeErr(Arc::new(cause))
    }

    pub fn stream_buf_set(cause: MuxError) -> Self {
        MuxError::StreamBufSet(Arc::new(cause))
    }

    /// True for errors that represent a clean, expected end of a stream rather than a fault.
    pub fn is_eof(&self) -> bool {
        matches!(self, MuxError::Eof)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, MuxError::Canceled)
    }
}

impl From<io::Error> for MuxError {
    fn from(err: io::Error) -> Self {
        MuxError::Transport(Arc::new(err))
    }
}

use std::{sync::Arc, time::Duration};

use crate::error::MuxError;

/// Default cap on concurrently open vconns for a single client multiplexer.
pub const DEFAULT_MAX_VIRTUAL_CONNS: u64 = 200;

/// Default ceiling on a single inbound frame's payload.
pub const DEFAULT_MAX_INCOMING_PACKET: usize = 262_144;

/// Per-multiplexer client configuration.
///
/// Built through the functional-option setters rather than struct-literal
/// construction so future fields can be added without breaking callers.
#[derive(Clone)]
pub struct ClientConfig {
    max_virtual_conns: u64,
    disconnected_callback: Option<Arc<dyn Fn(MuxError) + Send + Sync>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { max_virtual_conns: DEFAULT_MAX_VIRTUAL_CONNS, disconnected_callback: None }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-positive values are clamped back to the default cap.
    pub fn with_max_virtual_conns(mut self, max: u64) -> Self {
        self.max_virtual_conns = if max == 0 { DEFAULT_MAX_VIRTUAL_CONNS } else { max };
        self
    }

    pub fn with_disconnected_callback(mut self, cb: impl Fn(MuxError) + Send + Sync + 'static) -> Self {
        self.disconnected_callback = Some(Arc::new(cb));
        self
    }

    pub fn max_virtual_conns(&self) -> u64 {
        self.max_virtual_conns
    }

    pub fn disconnected_callback(&self) -> Option<&Arc<dyn Fn(MuxError) + Send + Sync>> {
        self.disconnected_callback.as_ref()
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("max_virtual_conns", &self.max_virtual_conns)
            .field("disconnected_callback", &self.disconnected_callback.is_some())
            .finish()
    }
}

/// Server-side multiplexer + listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_incoming_packet: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub dial_timeout: Duration,
    /// Reserved passthrough flag: this crate never compresses on its own behalf,
    /// but a `Transport` implementation may honor it.
    pub is_gzip: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_incoming_packet: DEFAULT_MAX_INCOMING_PACKET,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(15),
            is_gzip: false,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrors `default()` today; kept as a distinct call site for when
    /// production tuning diverges from the defaults.
    pub fn production() -> Self {
        Self::default()
    }

    /// Mirrors `default()` today; kept as a distinct call site for when
    /// development tuning diverges from the defaults.
    pub fn development() -> Self {
        Self::default()
    }

    pub fn with_max_incoming_packet(mut self, max: usize) -> Self {
        self.max_incoming_packet = max;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_gzip(mut self, enabled: bool) -> Self {
        self.is_gzip = enabled;
        self
    }
}

use std::sync::Arc;

use vmux::{MuxError, Transport};

/// Produces a fresh transport connection to the pool/supervisor's configured
/// host. Shared by [`crate::pool::Multiplexers`] and [`crate::supervisor::Supervisor`]
/// so both can redial without depending on a concrete transport type.
pub type DialFn = Arc<dyn Fn() -> Result<Arc<dyn Transport>, MuxError> + Send + Sync>;

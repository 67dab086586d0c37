//! Front-ends many [`vmux::Multiplexer`]s with least-loaded placement, bounded
//! capacity and spillover ([`pool::Multiplexers`]), and a self-healing
//! single-multiplexer wrapper that auto-reconnects with exponential backoff
//! ([`supervisor::Supervisor`]).

pub mod balancer;
pub mod dial;
pub mod pool;
pub mod supervisor;

pub use balancer::Balancer;
pub use dial::DialFn;
pub use pool::{Multiplexers, PoolConfig, PooledConn};
pub use supervisor::Supervisor;

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tracing::{debug, warn};
use vmux::{ClientConfig, Metadata, Multiplexer, MuxError, VirtualConn, registry::Registry};

use crate::{balancer::Balancer, dial::DialFn};

/// `mux_count` long-lived multiplexers plus spillover tuning.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub mux_count: usize,
    pub mux_max_conns: u64,
    /// Soft cap on concurrently open spillover vconns. `None` resolves to
    /// `4 * mux_count.max(1) * mux_max_conns`, bounding the otherwise
    /// unbounded temp cache the distilled design left open.
    pub max_temp_conns: Option<usize>,
}

impl PoolConfig {
    pub fn new(mux_count: usize, mux_max_conns: u64) -> Self {
        Self { mux_count, mux_max_conns, max_temp_conns: None }
    }

    pub fn with_max_temp_conns(mut self, max: usize) -> Self {
        self.max_temp_conns = Some(max);
        self
    }

    fn resolved_max_temp_conns(&self) -> u64 {
        self.max_temp_conns
            .map(|v| v as u64)
            .unwrap_or_else(|| 4 * self.mux_count.max(1) as u64 * self.mux_max_conns.max(1))
    }
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;

struct PoolInner {
    muxes: Vec<Multiplexer>,
    balancer: Balancer,
    temp_cache: Registry<Multiplexer>,
    temp_id: AtomicU64,
    dial: DialFn,
    state: std::sync::atomic::AtomicU8,
}

/// A fixed set of long-lived multiplexers to one host, front-ended by a
/// least-loaded balancer, with spillover to transient one-shot multiplexers
/// once every long-lived one is at capacity.
#[derive(Clone)]
pub struct Multiplexers(Arc<PoolInner>);

impl Multiplexers {
    /// Eagerly dials `config.mux_count` multiplexers. If any dial fails, the
    /// ones already opened are closed and the error is returned.
    pub fn new(dial: DialFn, config: PoolConfig) -> Result<Self, MuxError> {
        let client_config = ClientConfig::default().with_max_virtual_conns(config.mux_max_conns);
        let mut muxes = Vec::with_capacity(config.mux_count);
        for _ in 0..config.mux_count {
            match dial() {
                Ok(transport) => muxes.push(Multiplexer::client(transport, client_config.clone())),
                Err(err) => {
                    for mux in muxes {
                        mux.close();
                    }
                    return Err(err);
                }
            }
        }
        let balancer = Balancer::new(muxes.len());
        let temp_cache = Registry::new(config.resolved_max_temp_conns());
        Ok(Self(Arc::new(PoolInner {
            muxes,
            balancer,
            temp_cache,
            temp_id: AtomicU64::new(0),
            dial,
            state: std::sync::atomic::AtomicU8::new(STATE_OPEN),
        })))
    }

    pub fn len(&self) -> usize {
        self.0.muxes.len()
    }

    /// Least-loaded placement across the pool's long-lived multiplexers,
    /// falling back to a transient spillover multiplexer once they're all at
    /// `mux_max_conns`.
    pub fn open_virtual_conn(&self, metadata: Metadata) -> Result<PooledConn, MuxError> {
        if self.0.state.load(Ordering::Acquire) == STATE_CLOSED {
            return Err(MuxError::Canceled);
        }
        let idx = self.0.balancer.next();
        match self.0.muxes[idx].open_virtual_conn(metadata.clone()) {
            Ok(vc) => {
                self.0.balancer.incr(idx);
                Ok(PooledConn::pooled(vc, self.0.clone(), idx))
            }
            Err(MuxError::VirtualConnUpLimit) => self.spillover(metadata),
            Err(err) => Err(err),
        }
    }

    fn spillover(&self, metadata: Metadata) -> Result<PooledConn, MuxError> {
        let transport = (self.0.dial)()?;
        let temp_client_cfg = ClientConfig::default().with_max_virtual_conns(1);
        let temp_mux = Multiplexer::client(transport, temp_client_cfg);
        let vc = match temp_mux.open_virtual_conn(metadata) {
            Ok(vc) => vc,
            Err(err) => {
                temp_mux.close();
                return Err(err);
            }
        };

        let temp_id = self.0.temp_id.fetch_add(1, Ordering::Relaxed);
        if self.0.temp_cache.register(temp_id, Arc::new(temp_mux.clone())).is_err() {
            warn!(temp_id, "spillover temp cache rejected new multiplexer");
            temp_mux.close();
            return Err(MuxError::NoAvailableMultiplexers);
        }
        debug!(temp_id, "spillover multiplexer created");
        Ok(PooledConn::spillover(vc, self.0.clone(), temp_id))
    }

    /// Idempotent: closes each long-lived multiplexer, then latch-closes the
    /// temp cache, closing every spillover multiplexer still in it exactly once.
    pub fn close(&self) {
        if self.0.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return;
        }
        for mux in &self.0.muxes {
            mux.close();
        }
        self.0.temp_cache.latch_close_all(|mux| mux.close());
    }
}

enum CloseHook {
    Pooled { idx: usize },
    Spillover { temp_id: u64 },
}

/// A vconn obtained through the pool. Wraps the underlying [`VirtualConn`]
/// with a close hook that returns capacity to the balancer or drains the
/// spillover temp cache, guarded so the hook fires at most once.
pub struct PooledConn {
    vc: VirtualConn,
    pool: Arc<PoolInner>,
    hook: CloseHook,
    closed: AtomicBool,
}

impl PooledConn {
    fn pooled(vc: VirtualConn, pool: Arc<PoolInner>, idx: usize) -> Self {
        Self { vc, pool, hook: CloseHook::Pooled { idx }, closed: AtomicBool::new(false) }
    }

    fn spillover(vc: VirtualConn, pool: Arc<PoolInner>, temp_id: u64) -> Self {
        Self { vc, pool, hook: CloseHook::Spillover { temp_id }, closed: AtomicBool::new(false) }
    }

    pub fn id(&self) -> u64 {
        self.vc.id()
    }

    pub fn send(&self, data: &[u8]) -> Result<(), MuxError> {
        self.vc.send(data)
    }

    pub fn recv(&self, cancel: &vmux::CancelToken) -> Result<Vec<u8>, MuxError> {
        self.vc.recv(cancel)
    }

    pub fn close_send(&self) -> Result<(), MuxError> {
        self.vc.close_send()
    }

    /// Idempotent: the first call runs `close_send` plus the pool's
    /// decrement/removal hook; later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.vc.close_send();
        match &self.hook {
            CloseHook::Pooled { idx } => self.pool.balancer.decr(*idx),
            CloseHook::Spillover { temp_id } => {
                if let Some(mux) = self.pool.temp_cache.get_and_remove(*temp_id) {
                    mux.close();
                }
            }
        }
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.close();
    }
}

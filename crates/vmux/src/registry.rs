use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::error::MuxError;

/// Thread-safe id to virtual-connection map with a capacity cap and a one-shot
/// close latch that fans out to every live entry.
pub struct Registry<V> {
    idx: AtomicU64,
    max: u64,
    inner: RwLock<Inner<V>>,
}

struct Inner<V> {
    conns: HashMap<u64, Arc<V>>,
    closed: Option<MuxError>,
}

impl<V> Registry<V> {
    /// `max == 0` means unbounded.
    pub fn new(max: u64) -> Self {
        Self {
            idx: AtomicU64::new(0),
            max,
            inner: RwLock::new(Inner { conns: HashMap::new(), closed: None }),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.idx.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn register(&self, id: u64, vc: Arc<V>) -> Result<(), MuxError> {
        let mut inner = self.inner.write().unwrap();
        if let Some(err) = &inner.closed {
            return Err(err.clone());
        }
        if self.max != 0 && inner.conns.len() as u64 >= self.max {
            return Err(MuxError::VirtualConnUpLimit);
        }
        inner.conns.insert(id, vc);
        Ok(())
    }

    pub fn exists(&self, id: u64) -> bool {
        self.inner.read().unwrap().conns.contains_key(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<V>> {
        self.inner.read().unwrap().conns.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: u64) {
        self.inner.write().unwrap().conns.remove(&id);
    }

    pub fn get_and_remove(&self, id: u64) -> Option<Arc<V>> {
        self.inner.write().unwrap().conns.remove(&id)
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<V>)) {
        let snapshot: Vec<Arc<V>> = self.inner.read().unwrap().conns.values().cloned().collect();
        for vc in &snapshot {
            f(vc);
        }
    }

    /// Latch the registry closed with `ErrCancel`-equivalent semantics, invoke `on_each`
    /// for every live entry, then empty the map. Idempotent: only the caller that performs
    /// the transition from open to closed runs the iteration.
    pub fn latch_close_all(&self, mut on_each: impl FnMut(&Arc<V>)) {
        let drained = {
            let mut inner = self.inner.write().unwrap();
            if inner.closed.is_some() {
                return;
            }
            inner.closed = Some(MuxError::Canceled);
            std::mem::take(&mut inner.conns)
        };
        for vc in drained.values() {
            on_each(vc);
        }
    }
}

use std::{
    collections::VecDeque,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::error::MuxError;

/// Interval the consumer re-checks cancellation on while parked on the condvar.
///
/// There's no single condvar shared between a [`CancelToken`] and every [`BlockingQueue`]
/// it might be handed to, so cancellation is observed by polling at this granularity
/// rather than by a direct wakeup. Data and close are still waited on with a real condvar.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// A cooperative cancellation flag handed to a blocking [`BlockingQueue::get`].
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: Option<MuxError>,
}

/// A bounded-in-spirit FIFO of byte chunks with a blocking consumer and a
/// latched terminal error, per the receive-buffer contract.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State { items: VecDeque::new(), closed: None }),
            condvar: Condvar::new(),
        }
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. A no-op once the queue is closed.
    pub fn put(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        if state.closed.is_some() {
            return;
        }
        state.items.push_back(item);
        self.condvar.notify_one();
    }

    /// Block until an item is available, the queue closes, or `cancel` fires.
    pub fn get(&self, cancel: &CancelToken) -> Result<T, MuxError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if let Some(err) = &state.closed {
                return Err(err.clone());
            }
            if cancel.is_canceled() {
                return Err(MuxError::Canceled);
            }
            let (guard, _) = self.condvar.wait_timeout(state, CANCEL_POLL_INTERVAL).unwrap();
            state = guard;
        }
    }

    /// Latch the terminal error exactly once and wake every blocked consumer.
    pub fn close(&self, err: MuxError) {
        let mut state = self.state.lock().unwrap();
        if state.closed.is_none() {
            state.closed = Some(err);
        }
        self.condvar.notify_all();
    }

    pub fn err(&self) -> Option<MuxError> {
        self.state.lock().unwrap().closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn fifo_order() {
        let q = BlockingQueue::new();
        q.put(1);
        q.put(2);
        q.put(3);
        let cancel = CancelToken::new();
        assert_eq!(q.get(&cancel).unwrap(), 1);
        assert_eq!(q.get(&cancel).unwrap(), 2);
        assert_eq!(q.get(&cancel).unwrap(), 3);
    }

    #[test]
    fn put_after_close_is_dropped() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        q.close(MuxError::Eof);
        q.put(1);
        let cancel = CancelToken::new();
        assert!(matches!(q.get(&cancel), Err(MuxError::Eof)));
    }

    #[test]
    fn close_is_latched_once() {
        let q: BlockingQueue<i32> = BlockingQueue::new();
        q.close(MuxError::Eof);
        q.close(MuxError::Canceled);
        assert!(q.err().unwrap().is_eof());
    }

    #[test]
    fn blocked_get_wakes_on_close() {
        let q = Arc::new(BlockingQueue::<i32>::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            let cancel = CancelToken::new();
            q2.get(&cancel)
        });
        thread::sleep(Duration::from_millis(20));
        q.close(MuxError::Eof);
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(MuxError::Eof)));
    }

    #[test]
    fn blocked_get_wakes_on_cancel() {
        let q = Arc::new(BlockingQueue::<i32>::new());
        let q2 = q.clone();
        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();
        let handle = thread::spawn(move || q2.get(&cancel2));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(MuxError::Canceled)));
    }
}

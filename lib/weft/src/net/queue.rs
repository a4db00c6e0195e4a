use crate::value::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One decoded message, tagged with the peer it arrived from and the
/// arrival time in unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedValue {
    pub value: Value,
    pub origin: SocketAddr,
    pub received_at: u64,
}

impl ReceivedValue {
    pub fn new(value: Value, origin: SocketAddr) -> ReceivedValue {
        ReceivedValue {
            value,
            origin,
            received_at: skein::time::timestamp_millis(),
        }
    }
}

/// The bounded FIFO crossing the dispatcher-to-main boundary. Socket
/// handlers push, the traffic loop pops; per producer the order is arrival
/// order, across producers pushes interleave.
pub struct PendingQueue {
    inner: Mutex<VecDeque<ReceivedValue>>,
    available: Condvar,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> PendingQueue {
        if capacity == 0 {
            panic!("Queue capacity must be positive");
        }

        PendingQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Push one message. When the queue is full the oldest message is shed
    /// to make room; returns false in that case so the caller can log the
    /// loss.
    pub fn push(&self, item: ReceivedValue) -> bool {
        let mut queue = self.inner.lock().expect("Queue mutex poisoned");
        let mut kept_all = true;

        if queue.len() == self.capacity {
            queue.pop_front();
            kept_all = false;
        }
        queue.push_back(item);
        drop(queue);

        self.available.notify_one();
        kept_all
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<ReceivedValue> {
        self.inner.lock().expect("Queue mutex poisoned").pop_front()
    }

    /// Pop, waiting up to `timeout` for something to arrive. Used by loops
    /// that would otherwise spin; still bounded so shutdown is prompt.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ReceivedValue> {
        let mut queue = self.inner.lock().expect("Queue mutex poisoned");

        if let Some(item) = queue.pop_front() {
            return Some(item);
        }

        let (mut queue, _) = self
            .available
            .wait_timeout(queue, timeout)
            .expect("Queue mutex poisoned");

        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("Queue mutex poisoned").len()
    }

    /// Wake any waiter without delivering anything, for shutdown.
    pub fn wake(&self) {
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn received(number: i64) -> ReceivedValue {
        ReceivedValue::new(
            Value::Integer(number),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000),
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = PendingQueue::new(8);

        queue.push(received(1));
        queue.push(received(2));
        queue.push(received(3));

        assert_eq!(queue.try_pop().map(|item| item.value), Some(Value::Integer(1)));
        assert_eq!(queue.try_pop().map(|item| item.value), Some(Value::Integer(2)));
        assert_eq!(queue.try_pop().map(|item| item.value), Some(Value::Integer(3)));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_try_pop_never_blocks() {
        let queue = PendingQueue::new(4);
        let start = Instant::now();

        assert_eq!(queue.try_pop(), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_bounded_sheds_oldest() {
        let queue = PendingQueue::new(2);

        assert!(queue.push(received(1)));
        assert!(queue.push(received(2)));
        assert!(!queue.push(received(3)));

        assert_eq!(queue.try_pop().map(|item| item.value), Some(Value::Integer(2)));
        assert_eq!(queue.try_pop().map(|item| item.value), Some(Value::Integer(3)));
    }

    #[test]
    fn test_pop_timeout_sees_cross_thread_push() {
        let queue = Arc::new(PendingQueue::new(4));
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(received(42));
        });

        let item = queue.pop_timeout(Duration::from_millis(500));

        assert_eq!(item.map(|item| item.value), Some(Value::Integer(42)));
        handle.join().unwrap();
    }

    #[test]
    fn test_pop_timeout_bounded_when_empty() {
        let queue = PendingQueue::new(4);
        let start = Instant::now();

        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}

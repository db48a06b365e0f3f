use std::collections::VecDeque;

use bytes::Bytes;

/// FIFO of owned byte buffers, single producer / single consumer.
///
/// Backed by `VecDeque`, which already doubles its capacity on growth and
/// hands out owned elements on `pop_front` — exactly the "ring buffer that
/// doubles, ownership transferred on pop" contract this queue is specified
/// to have, so no hand-rolled ring is written here. `Bytes` gives push/pop
/// cheap, refcounted transfer of ownership without a copy.
#[derive(Debug, Default)]
pub struct ByteQueue {
    buffers: VecDeque<Bytes>,
    closed: bool,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a buffer at the tail. The queue takes ownership.
    pub fn push(&mut self, buf: Bytes) {
        self.buffers.push_back(buf);
    }

    /// Dequeue the buffer at the head, if any. The caller now owns it.
    pub fn pop(&mut self) -> Option<Bytes> {
        self.buffers.pop_front()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Mark the producer side done. Consumers use this together with
    /// `is_empty` to distinguish "temporarily drained" from "no more data
    /// will ever arrive".
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_order_matches_push_order() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"bb"));
        q.push(Bytes::from_static(b"ccc"));

        assert_eq!(q.pop().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(q.pop().unwrap(), Bytes::from_static(b"bb"));
        assert_eq!(q.pop().unwrap(), Bytes::from_static(b"ccc"));
        assert!(q.pop().is_none());
    }

    #[test]
    fn empty_pop_is_none_not_empty_buffer() {
        let mut q = ByteQueue::new();
        assert!(q.pop().is_none());
        q.push(Bytes::new());
        // an explicitly pushed zero-length buffer is still `Some`
        assert_eq!(q.pop(), Some(Bytes::new()));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn close_is_observable_independent_of_emptiness() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"x"));
        q.close();
        assert!(q.is_closed());
        assert!(!q.is_empty());
        q.pop();
        assert!(q.is_closed());
        assert!(q.is_empty());
    }

    // Property: for any sequence of pushes of distinct buffers, pops return
    // them in the same order and nothing is lost or duplicated.
    proptest::proptest! {
        #[test]
        fn fifo_order_holds_for_arbitrary_sequences(bufs in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64), 0..128)) {
            let mut q = ByteQueue::new();
            for b in &bufs {
                q.push(Bytes::from(b.clone()));
            }
            for b in &bufs {
                let popped = q.pop().expect("queue drained early");
                proptest::prop_assert_eq!(popped.as_ref(), b.as_slice());
            }
            proptest::prop_assert!(q.pop().is_none());
        }
    }
}

//! Bounded message queue.
//!
//! A fixed-capacity ring of fixed-size slots. All storage, length headers
//! included, is one block allocated at creation through the configured
//! [`BufferAllocator`]. Enqueueing copies the payload straight into its slot,
//! so there is no per-message allocation and no staging buffer.
//!
//! # Layout
//!
//! ```text
//!  storage: [ len0 | payload 0 | len1 | payload 1 | ... | lenN-1 | payload N-1 ]
//!             ^head                ^head + len (next free)
//!
//!  each slot: LENGTH_HEADER + max_payload bytes
//! ```
//!
//! A full queue rejects new messages immediately. This is the backpressure
//! mechanism: callers see [`Error::QueueFull`] and decide what to do.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem::size_of;
use std::ops::Range;

use tracing::debug;

use crate::alloc::{self, BufferAllocator};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Bytes in front of each slot holding the payload length.
pub(crate) const LENGTH_HEADER: usize = size_of::<usize>();

// ============================================================================
// MessageQueue
// ============================================================================

/// Fixed-capacity FIFO of byte messages.
///
/// Single producer, single consumer, non-blocking on both ends.
pub struct MessageQueue {
    /// Backing storage, `capacity * (LENGTH_HEADER + max_payload)` bytes.
    storage: Box<[u8]>,
    /// Number of slots.
    capacity: usize,
    /// Maximum payload length of one message.
    max_payload: usize,
    /// Index of the oldest message.
    head: usize,
    /// Number of queued messages.
    len: usize,
}

impl MessageQueue {
    /// Creates a queue with `slot_count` slots of `max_payload` bytes each.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if either dimension is zero
    /// - [`Error::OutOfMemory`] if the storage cannot be allocated
    pub fn new(
        slot_count: usize,
        max_payload: usize,
        allocator: &dyn BufferAllocator,
    ) -> Result<Self> {
        if slot_count == 0 || max_payload == 0 {
            return Err(Error::invalid_argument(format!(
                "queue dimensions must be non-zero (slots={slot_count}, max_payload={max_payload})"
            )));
        }

        let storage_len = max_payload
            .checked_add(LENGTH_HEADER)
            .and_then(|stride| stride.checked_mul(slot_count))
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let storage = alloc::allocate(allocator, storage_len)?;

        Ok(Self {
            storage,
            capacity: slot_count,
            max_payload,
            head: 0,
            len: 0,
        })
    }

    /// Copies `payload` into the next free slot.
    ///
    /// On failure the queue is unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] if `payload` exceeds [`max_payload`](Self::max_payload)
    /// - [`Error::QueueFull`] if no slot is free
    pub fn try_enqueue(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(Error::payload_too_large(payload.len(), self.max_payload));
        }
        if self.is_full() {
            return Err(Error::queue_full(self.capacity()));
        }

        let index = (self.head + self.len) % self.capacity;
        self.set_length(index, payload.len());
        let start = self.payload_start(index);
        self.storage[start..start + payload.len()].copy_from_slice(payload);
        self.len += 1;

        Ok(())
    }

    /// Returns the oldest message without removing it.
    #[must_use]
    pub fn peek_front(&self) -> Option<&[u8]> {
        if self.is_empty() {
            return None;
        }

        let start = self.payload_start(self.head);
        Some(&self.storage[start..start + self.length(self.head)])
    }

    /// Removes the oldest message.
    ///
    /// Returns `false` if the queue was empty.
    pub fn consume_front(&mut self) -> bool {
        if self.is_empty() {
            debug!("consume_front on empty queue");
            return false;
        }

        self.set_length(self.head, 0);
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
        true
    }

    /// Copies the oldest message into `buf` and removes it.
    ///
    /// Returns `Ok(0)` when the queue is empty. Note that a zero-length
    /// message also yields `Ok(0)`; use [`len`](Self::len) to tell them apart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferTooSmall`] if `buf` is shorter than the message.
    /// The message stays queued.
    pub fn pop_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(message) = self.peek_front() else {
            return Ok(0);
        };

        let size = message.len();
        if size > buf.len() {
            return Err(Error::buffer_too_small(size, buf.len()));
        }

        buf[..size].copy_from_slice(message);
        self.consume_front();
        Ok(size)
    }

    /// Returns the number of free slots.
    #[inline]
    #[must_use]
    pub fn count_free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Returns the number of queued messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if every slot is in use.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Returns the slot count.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the maximum payload length of one message.
    #[inline]
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

// ============================================================================
// MessageQueue - Slot Layout
// ============================================================================

impl MessageQueue {
    fn header(&self, index: usize) -> Range<usize> {
        let start = index * (LENGTH_HEADER + self.max_payload);
        start..start + LENGTH_HEADER
    }

    fn payload_start(&self, index: usize) -> usize {
        self.header(index).end
    }

    fn length(&self, index: usize) -> usize {
        let mut raw = [0u8; LENGTH_HEADER];
        raw.copy_from_slice(&self.storage[self.header(index)]);
        usize::from_ne_bytes(raw)
    }

    fn set_length(&mut self, index: usize, len: usize) {
        let header = self.header(index);
        self.storage[header].copy_from_slice(&len.to_ne_bytes());
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("max_payload", &self.max_payload)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use proptest::collection::vec;
    use proptest::prelude::*;

    use crate::alloc::SystemAllocator;
    use crate::alloc::testing::BudgetAllocator;

    fn queue(slots: usize, max_payload: usize) -> MessageQueue {
        MessageQueue::new(slots, max_payload, &SystemAllocator).expect("queue creation")
    }

    #[test]
    fn test_new_queue_is_empty() {
        let q = queue(4, 16);
        assert!(q.is_empty());
        assert_eq!(q.count_free(), 4);
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.max_payload(), 16);
        assert!(q.peek_front().is_none());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(
            MessageQueue::new(0, 16, &SystemAllocator),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            MessageQueue::new(4, 0, &SystemAllocator),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_size_overflow_is_out_of_memory() {
        assert!(matches!(
            MessageQueue::new(usize::MAX, 2, &SystemAllocator),
            Err(Error::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_allocation_failure() {
        let allocator = BudgetAllocator::new(0);
        let err = MessageQueue::new(4, 16, &allocator).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory { requested } if requested == 4 * (16 + LENGTH_HEADER)
        ));
    }

    #[test]
    fn test_storage_is_one_allocator_block() {
        #[derive(Debug, Default)]
        struct Recording(Mutex<Vec<usize>>);

        impl BufferAllocator for Recording {
            fn allocate_zeroed(&self, len: usize) -> Option<Box<[u8]>> {
                self.0.lock().unwrap().push(len);
                SystemAllocator.allocate_zeroed(len)
            }
        }

        let allocator = Recording::default();
        let mut q = MessageQueue::new(3, 8, &allocator).unwrap();
        q.try_enqueue(b"abc").unwrap();
        q.try_enqueue(b"defghijk").unwrap();

        assert_eq!(*allocator.0.lock().unwrap(), vec![3 * (8 + LENGTH_HEADER)]);
        assert_eq!(q.peek_front(), Some(&b"abc"[..]));
        q.consume_front();
        assert_eq!(q.peek_front(), Some(&b"defghijk"[..]));
    }

    #[test]
    fn test_full_queue_rejects_without_change() {
        let mut q = queue(2, 8);
        q.try_enqueue(b"one").unwrap();
        q.try_enqueue(b"two").unwrap();

        let err = q.try_enqueue(b"three").unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_front(), Some(&b"one"[..]));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut q = queue(4, 4);
        q.try_enqueue(b"keep").unwrap();

        let err = q.try_enqueue(b"too long").unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { size: 8, max: 4 }));
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_front(), Some(&b"keep"[..]));
    }

    #[test]
    fn test_consume_empty_returns_false() {
        let mut q = queue(1, 1);
        assert!(!q.consume_front());
        assert_eq!(q.count_free(), 1);
    }

    #[test]
    fn test_wraps_around() {
        let mut q = queue(2, 4);
        for round in 0u8..10 {
            q.try_enqueue(&[round]).unwrap();
            assert_eq!(q.peek_front(), Some(&[round][..]));
            assert!(q.consume_front());
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_shorter_message_after_longer_in_same_slot() {
        let mut q = queue(1, 8);
        q.try_enqueue(b"longword").unwrap();
        q.consume_front();
        q.try_enqueue(b"ab").unwrap();
        assert_eq!(q.peek_front(), Some(&b"ab"[..]));
    }

    #[test]
    fn test_pop_into() {
        let mut q = queue(2, 8);
        q.try_enqueue(b"ping").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(q.pop_into(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(q.pop_into(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_pop_into_small_buffer_keeps_message() {
        let mut q = queue(2, 8);
        q.try_enqueue(b"pingpong").unwrap();

        let mut buf = [0u8; 4];
        let err = q.pop_into(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::BufferTooSmall {
                required: 8,
                capacity: 4
            }
        ));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_empty_message() {
        let mut q = queue(2, 8);
        q.try_enqueue(b"").unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek_front(), Some(&b""[..]));
    }

    proptest! {
        #[test]
        fn prop_capacity_is_exact(slots in 1usize..32, extra in 1usize..8) {
            let mut q = queue(slots, 4);
            for i in 0..slots {
                prop_assert!(q.try_enqueue(&[i as u8]).is_ok());
            }
            for _ in 0..extra {
                prop_assert!(q.try_enqueue(b"x").is_err());
                prop_assert_eq!(q.len(), slots);
            }
            prop_assert!(q.consume_front());
            prop_assert!(q.try_enqueue(b"y").is_ok());
        }

        #[test]
        fn prop_fifo_order(messages in vec(vec(any::<u8>(), 0..=32), 1..64)) {
            let mut q = queue(messages.len(), 32);
            for m in &messages {
                q.try_enqueue(m).unwrap();
            }
            for m in &messages {
                prop_assert_eq!(q.peek_front(), Some(m.as_slice()));
                prop_assert!(q.consume_front());
            }
            prop_assert!(q.is_empty());
        }

        #[test]
        fn prop_interleaved_roundtrip(
            ops in vec((any::<bool>(), vec(any::<u8>(), 0..=16)), 1..200)
        ) {
            let mut q = queue(8, 16);
            let mut model = std::collections::VecDeque::new();
            for (push, payload) in ops {
                if push {
                    let accepted = q.try_enqueue(&payload).is_ok();
                    prop_assert_eq!(accepted, model.len() < 8);
                    if accepted {
                        model.push_back(payload);
                    }
                } else {
                    let mut buf = [0u8; 16];
                    let n = q.pop_into(&mut buf).unwrap();
                    match model.pop_front() {
                        Some(expected) => prop_assert_eq!(&buf[..n], expected.as_slice()),
                        None => prop_assert_eq!(n, 0),
                    }
                }
                prop_assert_eq!(q.len(), model.len());
                prop_assert_eq!(q.count_free(), 8 - model.len());
            }
        }
    }
}

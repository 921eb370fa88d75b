#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::{fec::FecDecoder, slot::Slot};

/// Bounded pool of pre-allocated slots.
///
/// Every slot the consumer will ever use is allocated up front; frames in
/// flight borrow slots via [`pop`](Self::pop) and return them via
/// [`push`](Self::push), which resets them to `Free`. An empty pool is the
/// backpressure signal that makes the pipeline skip pulses.
pub struct SlotPool {
    free: Vec<Slot>,
    capacity: usize,
}

impl SlotPool {
    pub const DEFAULT_CAPACITY: usize = 300;

    pub fn new(
        capacity: usize,
        payload_capacity: usize,
        max_retx: u8,
        fec: Arc<dyn FecDecoder>,
    ) -> Self {
        let free = (0..capacity)
            .map(|_| Slot::new(payload_capacity, max_retx, Arc::clone(&fec)))
            .collect();
        Self { free, capacity }
    }

    pub fn pop(&mut self) -> Option<Slot> {
        self.free.pop()
    }

    /// Return a slot. It is cleared before re-entering the pool.
    pub fn push(&mut self, mut slot: Slot) {
        slot.clear();
        debug_assert!(self.free.len() < self.capacity, "pool overfilled");
        self.free.push(slot);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently available.
    pub fn free(&self) -> usize {
        self.free.len()
    }

    /// Slots currently borrowed.
    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::NoFec;

    fn pool(capacity: usize) -> SlotPool {
        SlotPool::new(capacity, 16_000, 3, Arc::new(NoFec))
    }

    #[test]
    fn pop_until_empty_then_recover() {
        let mut pool = pool(2);
        assert_eq!(pool.free(), 2);

        let a = pool.pop().unwrap();
        let b = pool.pop().unwrap();
        assert!(pool.pop().is_none());
        assert_eq!(pool.in_use(), 2);

        pool.push(a);
        assert_eq!(pool.free(), 1);
        assert!(pool.pop().is_some());
        pool.push(b);
        assert_eq!(pool.free() + pool.in_use(), pool.capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_slot_comes_back_free() {
        use std::time::Duration;

        use freshet_core::Name;
        use freshet_net::{DataRequest, Interest};
        use tokio::time::Instant;

        use crate::slot::SlotState;

        let mut pool = pool(1);
        let mut slot = pool.pop().unwrap();
        let request = DataRequest::new(Interest::new(
            Name::from_uri("/c/ndnrtc/v=4/video/s/t/d/seq=1/seg=0").unwrap(),
            Duration::from_secs(1),
        ))
        .unwrap();
        slot.set_requests(&[request], Instant::now()).unwrap();
        assert_eq!(slot.state(), SlotState::New);

        pool.push(slot);
        let slot = pool.pop().unwrap();
        assert_eq!(slot.state(), SlotState::Free);
    }
}

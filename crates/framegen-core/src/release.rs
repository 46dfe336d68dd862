//! Frame-deferred release of GPU objects.
//!
//! A destroyed object may still be referenced by in-flight command buffers, so
//! it is parked here with the frame it was retired on and handed back only
//! once enough later frames have completed.

use std::collections::VecDeque;

use framegen_common::FrameToken;

#[derive(Debug)]
struct Pending<T> {
    item: T,
    enqueued: FrameToken,
    delay: u32,
}

#[derive(Debug)]
pub struct DeferredReleaseQueue<T> {
    pending: VecDeque<Pending<T>>,
}

impl<T> DeferredReleaseQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Park `item`, retired during frame `enqueued`.
    pub fn push(&mut self, item: T, enqueued: FrameToken, delay: u32) {
        self.pending.push_back(Pending {
            item,
            enqueued,
            delay,
        });
    }

    /// Remove every item with `finished > enqueued + delay`, in enqueue order.
    pub fn collect(&mut self, finished: FrameToken) -> Vec<T> {
        let mut ready = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for p in self.pending.drain(..) {
            if finished.0 > p.enqueued.0.saturating_add(p.delay as u64) {
                ready.push(p.item);
            } else {
                kept.push_back(p);
            }
        }
        self.pending = kept;
        ready
    }

    /// Remove everything regardless of delay.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|p| p.item).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for DeferredReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_wait_for_their_delay() {
        let mut q = DeferredReleaseQueue::new();
        q.push("a", FrameToken(10), 3);
        assert!(q.collect(FrameToken(12)).is_empty());
        assert!(q.collect(FrameToken(13)).is_empty());
        assert_eq!(q.collect(FrameToken(14)), vec!["a"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_zero_delay_releases_next_frame() {
        let mut q = DeferredReleaseQueue::new();
        q.push(1, FrameToken(5), 0);
        assert!(q.collect(FrameToken(5)).is_empty());
        assert_eq!(q.collect(FrameToken(6)), vec![1]);
    }

    #[test]
    fn test_collect_keeps_enqueue_order() {
        let mut q = DeferredReleaseQueue::new();
        q.push(1, FrameToken(1), 5);
        q.push(2, FrameToken(2), 0);
        q.push(3, FrameToken(2), 0);
        assert_eq!(q.collect(FrameToken(3)), vec![2, 3]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.collect(FrameToken(7)), vec![1]);
    }

    #[test]
    fn test_drain_all() {
        let mut q = DeferredReleaseQueue::new();
        q.push('x', FrameToken(1), 100);
        q.push('y', FrameToken(1), 100);
        assert_eq!(q.drain_all(), vec!['x', 'y']);
        assert!(q.is_empty());
    }
}

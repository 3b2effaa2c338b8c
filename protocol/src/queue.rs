//! # Two-Stack FIFO Queue
//!
//! `Connection` uses this to buffer outbound frames while a peer socket is
//! disconnected, so a reconnect can flush them in send order. Implemented
//! as the classic two-stack queue: `enqueue` pushes onto `inbox`, `dequeue`
//! pops from `outbox`, refilling `outbox` by draining `inbox` (reversed)
//! only when `outbox` runs dry. Amortized O(1) per operation.

#[derive(Debug, Clone, Default)]
pub struct Queue<T> {
    inbox: Vec<T>,
    outbox: Vec<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inbox: Vec::new(),
            outbox: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.inbox.push(item);
    }

    fn shift_if_needed(&mut self) {
        if self.outbox.is_empty() {
            while let Some(item) = self.inbox.pop() {
                self.outbox.push(item);
            }
        }
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.shift_if_needed();
        self.outbox.pop()
    }

    pub fn peek(&mut self) -> Option<&T> {
        self.shift_if_needed();
        self.outbox.last()
    }

    pub fn len(&self) -> usize {
        self.inbox.len() + self.outbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains every queued item in FIFO order, from both stacks.
    pub fn flush(&mut self) -> Vec<T> {
        let mut drained = std::mem::take(&mut self.outbox);
        drained.reverse(); // outbox is stored latest-to-dequeue-last; undo that for the caller
        drained.extend(std::mem::take(&mut self.inbox)); // inbox is already oldest-first
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_fifo_order() {
        let mut q = Queue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        q.enqueue(4);
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), Some(4));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = Queue::new();
        q.enqueue("a");
        q.enqueue("b");
        assert_eq!(q.peek(), Some(&"a"));
        assert_eq!(q.peek(), Some(&"a"));
        assert_eq!(q.dequeue(), Some("a"));
    }

    #[test]
    fn flush_drains_everything_in_order() {
        let mut q = Queue::new();
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.flush(), vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn flush_drains_inbox_left_over_after_a_dequeue() {
        let mut q = Queue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.dequeue(), Some(1)); // shifts inbox into outbox, leaving [3, 2]
        q.enqueue(4);
        q.enqueue(5);
        assert_eq!(q.flush(), vec![2, 3, 4, 5]);
        assert!(q.is_empty());
    }

    #[test]
    fn len_accounts_for_both_stacks() {
        let mut q = Queue::new();
        q.enqueue(1);
        q.enqueue(2);
        let _ = q.dequeue();
        q.enqueue(3);
        assert_eq!(q.len(), 2);
    }
}

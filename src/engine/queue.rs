// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! A fixed-capacity FIFO event queue.
//!
//! Producers run in interrupt context and only ever construct and
//! enqueue; the dispatcher is the sole consumer. A full queue rejects
//! the event rather than blocking, since there is nothing an interrupt
//! handler could wait on.

/// A fixed-capacity single-producer single-consumer FIFO.
pub struct Queue<T, const N: usize> {
    slots: [Option<T>; N],
    head: usize,
    len: usize,
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Queue<T, N> {
    /// Creates a new, empty `Queue`.
    pub fn new() -> Self {
        Self {
            slots: [(); N].map(|_| None),
            head: 0,
            len: 0,
        }
    }

    /// Enqueues `value`, handing it back if the queue is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.len == N {
            return Err(value);
        }
        self.slots[(self.head + self.len) % N] = Some(value);
        self.len += 1;
        Ok(())
    }

    /// Dequeues the oldest element, if any.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        value
    }

    /// Returns the number of queued elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = Queue::<u32, 4>::new();
        assert!(q.is_empty());
        for i in 0..4 {
            q.push(i).unwrap();
        }
        assert_eq!(q.push(99), Err(99));

        assert_eq!(q.pop(), Some(0));
        q.push(4).unwrap();
        for i in 1..5 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn wraps_around_many_times() {
        let mut q = Queue::<usize, 3>::new();
        for i in 0..100 {
            q.push(i).unwrap();
            assert_eq!(q.pop(), Some(i));
        }
        assert!(q.is_empty());
    }
}

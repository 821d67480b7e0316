use std::collections::VecDeque;

/// Outcome of [`VirtualSemaphore::try_acquire`].
#[derive(Debug, PartialEq, Eq)]
pub enum Acquire<T> {
    /// A unit was taken, the waiter is handed back to the caller.
    Granted(T),
    /// No unit left, the waiter now sits in the queue.
    Suspended,
}

/// Counting gate over an abstract number of slots.
///
/// Waiters that cannot get a unit are parked in FIFO order. Releasing a unit
/// hands the head waiter back to the caller, who is responsible for resuming
/// it; the waiter then acquires again and gets the released unit.
#[derive(Debug)]
pub struct VirtualSemaphore<T> {
    count: u32,
    capacity: u32,
    waiters: VecDeque<T>,
}

impl<T> VirtualSemaphore<T> {
    pub fn new(count: u32) -> Self {
        VirtualSemaphore {
            count,
            capacity: count,
            waiters: VecDeque::new(),
        }
    }

    pub fn try_acquire(&mut self, waiter: T) -> Acquire<T> {
        if self.count > 0 {
            self.count -= 1;
            Acquire::Granted(waiter)
        } else {
            self.waiters.push_back(waiter);
            Acquire::Suspended
        }
    }

    pub fn release(&mut self) -> Option<T> {
        self.count += 1;
        self.waiters.pop_front()
    }

    pub fn available(&self) -> u32 {
        self.count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Restores the initial count, dropping parked waiters.
    pub fn reset(&mut self) {
        self.count = self.capacity;
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_until_exhausted() {
        let mut sem = VirtualSemaphore::new(2);
        assert_eq!(sem.try_acquire(1), Acquire::Granted(1));
        assert_eq!(sem.try_acquire(2), Acquire::Granted(2));
        assert_eq!(sem.try_acquire(3), Acquire::Suspended);
        assert_eq!(sem.available(), 0);
        assert_eq!(sem.waiting(), 1);
    }

    #[test]
    fn resumes_waiters_in_fifo_order() {
        let mut sem = VirtualSemaphore::new(0);
        for waiter in 1..=4 {
            assert_eq!(sem.try_acquire(waiter), Acquire::Suspended);
        }

        let mut resumed = Vec::new();
        for _ in 0..4 {
            let waiter = sem.release().unwrap();
            match sem.try_acquire(waiter) {
                Acquire::Granted(w) => resumed.push(w),
                Acquire::Suspended => panic!("released unit was not available"),
            }
        }
        assert_eq!(resumed, vec![1, 2, 3, 4]);
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn release_without_waiters_adds_a_unit() {
        let mut sem: VirtualSemaphore<u32> = VirtualSemaphore::new(1);
        assert_eq!(sem.release(), None);
        assert_eq!(sem.available(), 2);
        sem.reset();
        assert_eq!(sem.available(), 1);
    }
}

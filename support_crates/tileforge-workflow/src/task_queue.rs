//! A blocking multi-producer, multi-consumer task queue.
//!
//! Unbounded, order-preserving, with "half-close" semantics: when every
//! sender is gone, consumers drain the remaining items and then observe
//! disconnection. This should be replaced with `std::sync::mpmc` once it
//! stabilizes.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Creates the sender/receiver halves of a task queue.
///
/// Both halves can be cloned; items are delivered in FIFO order to whichever
/// consumer dequeues first.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            senders: 1,
        }),
        not_empty: Condvar::new(),
    });
    (Sender(inner.clone()), Receiver(inner))
}

pub struct Sender<T>(Arc<Inner<T>>);

impl<T> Sender<T> {
    /// Enqueues an item. Never blocks.
    pub fn send(&self, item: T) {
        let mut state = self.0.state.lock().unwrap();
        state.queue.push_back(item);
        drop(state);
        self.0.not_empty.notify_one();
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Sender<T> {
        self.0.state.lock().unwrap().senders += 1;
        Sender(self.0.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        state.senders -= 1;
        if state.senders == 0 {
            drop(state);
            // Wake blocked consumers so they can observe the disconnect.
            self.0.not_empty.notify_all();
        }
    }
}

pub struct Receiver<T>(Arc<Inner<T>>);

impl<T> Receiver<T> {
    /// Dequeues the next item, blocking while the queue is empty and at
    /// least one sender is alive. Returns `None` once the queue is drained
    /// and every sender has been dropped.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.0.state.lock().unwrap();
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some(item);
            }
            if state.senders == 0 {
                return None;
            }
            state = self.0.not_empty.wait(state).unwrap();
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Receiver<T> {
        Receiver(self.0.clone())
    }
}

struct State<T> {
    queue: VecDeque<T>,
    senders: usize,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
}

#[cfg(test)]
mod tests {
    use super::channel;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = channel();
        for i in 0..100 {
            tx.send(i);
        }
        for i in 0..100 {
            assert_eq!(rx.recv(), Some(i));
        }
    }

    #[test]
    fn test_disconnect_after_drain() {
        let (tx, rx) = channel();
        tx.send(1);
        tx.send(2);
        drop(tx);
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), Some(2));
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn test_multi_consumer_drains_everything() {
        let (tx, rx) = channel::<usize>();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let rx = rx.clone();
                thread::spawn(move || {
                    let mut got = vec![];
                    while let Some(item) = rx.recv() {
                        got.push(item);
                    }
                    got
                })
            })
            .collect();
        for i in 0..1000 {
            tx.send(i);
        }
        drop(tx);
        drop(rx);
        let mut all: Vec<usize> = consumers
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}

//! Single-consumer serial event queue
//!
//! Platform callbacks may fire on any thread. They are posted through an
//! [`EventSender`] and handled one at a time, to completion, by the owning
//! session manager when it drains its [`EventQueue`]. No handler ever runs
//! concurrently with another handler of the same manager.

use std::sync::mpsc::{self, Receiver, Sender};

use log::warn;

/// Cloneable posting end of a manager's queue
#[derive(Debug)]
pub struct EventSender<E> {
    sender: Sender<E>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E> EventSender<E> {
    /// Post an event. Events posted after the queue is dropped are discarded.
    pub fn post(&self, event: E) {
        if self.sender.send(event).is_err() {
            warn!("Event posted to a closed queue, dropping");
        }
    }
}

/// Receiving end, owned by exactly one manager
#[derive(Debug)]
pub struct EventQueue<E> {
    sender: Sender<E>,
    receiver: Receiver<E>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender<E> {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Take the next pending event, if any, without blocking
    pub fn next(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

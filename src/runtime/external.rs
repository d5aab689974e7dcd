//! Endpoints that let code outside the pipeline take part in it
//!
//! - [`Tap`] consumes one stage output from the orchestrating thread (the
//!   terminal consumer that prints parsed fields).
//! - [`Feed`] produces into one stage input (bytes queued for the serial
//!   device).

use crossbeam_channel::{Receiver as CrossbeamReceiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use super::sender::{ChannelMessage, Sender};

/// External consumer bound to a stage output
pub struct Tap<T> {
    receiver: CrossbeamReceiver<ChannelMessage<T>>,
    ended: bool,
}

impl<T> Tap<T> {
    pub(crate) fn new(receiver: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self {
            receiver,
            ended: false,
        }
    }

    /// Block until the next payload. None once the producing stage has exited.
    pub fn recv(&mut self) -> Option<T> {
        if self.ended {
            return None;
        }
        match self.receiver.recv() {
            Ok(ChannelMessage::Sample(item)) => Some(item),
            Ok(ChannelMessage::EndOfStream) | Err(_) => {
                self.ended = true;
                None
            }
        }
    }

    /// Wait up to `timeout`. `Disconnected` once the producing stage has exited.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        if self.ended {
            return Err(RecvTimeoutError::Disconnected);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                self.ended = true;
                Err(RecvTimeoutError::Disconnected)
            }
            Err(RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if self.ended {
            return Err(TryRecvError::Disconnected);
        }
        match self.receiver.try_recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) | Err(TryRecvError::Disconnected) => {
                self.ended = true;
                Err(TryRecvError::Disconnected)
            }
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl<T> Iterator for Tap<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

/// External producer bound to a stage input
pub struct Feed<T> {
    sender: Sender<T>,
}

impl<T: Clone> Feed<T> {
    pub(crate) fn new(sender: Sender<T>) -> Self {
        Self { sender }
    }

    /// Queue a payload. Fails once the consuming stage has exited.
    pub fn send(&self, value: T) -> Result<(), crossbeam_channel::SendError<T>> {
        self.sender.send(value)
    }

    /// Tell the consuming stage no more payloads will follow
    pub fn close(&self) {
        self.sender.close();
    }
}

impl<T: Clone> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

//! Actor task framework
//!
//! Every simulated entity (SimUe coordinator, RealUe NAS engine, GnbCpUe,
//! GnbUpUe, each PDU session) runs as an independent tokio task owning its
//! own mailbox. Cross-actor communication is message passing over bounded
//! channels only, never shared-memory mutation.
//!
//! The mailboxes are deliberately shallow ([`DEFAULT_CHANNEL_CAPACITY`]):
//! deep enough to decouple peers from lock-step scheduling, shallow enough
//! that a stalled consumer applies backpressure to its producers.

use tokio::sync::mpsc;

/// Default mailbox depth between actors.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 5;

/// Task message envelope wrapping typed payloads with the shutdown control
/// signal.
///
/// Termination is cooperative: a parent sends `Shutdown` into the child's
/// mailbox and then awaits the child's join handle. There is no preemptive
/// cancellation anywhere in the simulator.
#[derive(Debug)]
pub enum TaskMessage<T> {
    /// Regular message payload
    Message(T),
    /// Shutdown signal; the task must wind down and exit its loop
    Shutdown,
}

impl<T> TaskMessage<T> {
    /// Returns true if this is a shutdown signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskMessage::Shutdown)
    }

    /// Returns the payload, or `None` for a shutdown signal.
    pub fn into_message(self) -> Option<T> {
        match self {
            TaskMessage::Message(msg) => Some(msg),
            TaskMessage::Shutdown => None,
        }
    }
}

/// Handle for sending messages into a task's mailbox.
#[derive(Debug)]
pub struct TaskHandle<T> {
    tx: mpsc::Sender<TaskMessage<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TaskHandle<T> {
    /// Creates a handle from a raw sender.
    pub fn new(tx: mpsc::Sender<TaskMessage<T>>) -> Self {
        Self { tx }
    }

    /// Creates a bounded mailbox and returns the handle plus the receiver end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TaskMessage<T>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends a message, waiting for mailbox space.
    ///
    /// Fails only if the receiving task has already exited.
    pub async fn send(&self, msg: T) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Message(msg)).await
    }

    /// Sends a message without waiting; fails if the mailbox is full.
    pub fn try_send(&self, msg: T) -> Result<(), mpsc::error::TrySendError<TaskMessage<T>>> {
        self.tx.try_send(TaskMessage::Message(msg))
    }

    /// Sends the shutdown signal.
    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Shutdown).await
    }

    /// Returns true if the receiving task has dropped its mailbox.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Base trait for actor tasks.
///
/// Implementations process messages from their mailbox until they receive
/// `TaskMessage::Shutdown`, then finish any teardown (joining spawned
/// sub-actors) before returning.
#[async_trait::async_trait]
pub trait Task: Send + Sized + 'static {
    /// The payload type this task's mailbox carries.
    type Message: Send;

    /// Runs the task's main loop to completion, consuming the task.
    async fn run(self, rx: mpsc::Receiver<TaskMessage<Self::Message>>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (handle, mut rx) = TaskHandle::channel(DEFAULT_CHANNEL_CAPACITY);
        handle.send(7u32).await.unwrap();
        match rx.recv().await {
            Some(TaskMessage::Message(v)) => assert_eq!(v, 7),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (handle, mut rx) = TaskHandle::<u32>::channel(1);
        handle.shutdown().await.unwrap();
        assert!(rx.recv().await.unwrap().is_shutdown());
    }

    #[tokio::test]
    async fn test_backpressure_try_send() {
        let (handle, _rx) = TaskHandle::<u32>::channel(1);
        handle.try_send(1).unwrap();
        // Mailbox is full now; try_send must not block, it must fail.
        assert!(handle.try_send(2).is_err());
    }

    #[tokio::test]
    async fn test_closed_detection() {
        let (handle, rx) = TaskHandle::<u32>::channel(1);
        assert!(!handle.is_closed());
        drop(rx);
        assert!(handle.is_closed());
    }
}

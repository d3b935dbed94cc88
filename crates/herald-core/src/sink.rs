//! Outbound connection handles.
//!
//! A [`FrameSink`] is the engine's only view of a client connection. Pushes
//! never block: a slow client whose buffer is full loses the frame instead of
//! stalling a broadcast.

use crate::error::DeliveryError;
use crate::message::Frame;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Push side of one client connection
pub trait FrameSink: Send + Sync {
    /// Queue a frame for the client without waiting
    fn push(&self, frame: Frame) -> Result<(), DeliveryError>;

    /// Release the connection; later pushes fail with [`DeliveryError::Closed`]
    fn close(&self);

    /// Whether the connection is gone (closed here or by the client)
    fn is_closed(&self) -> bool;
}

/// [`FrameSink`] backed by a bounded Tokio channel
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl ChannelSink {
    /// Wrap the sending half of a frame channel
    #[must_use]
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl FrameSink for ChannelSink {
    fn push(&self, frame: Frame) -> Result<(), DeliveryError> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(DeliveryError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        // Dropping the sender ends the receiving stream once it is drained
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(true, mpsc::Sender::is_closed)
    }
}

/// Create a sink and the receiver the transport drains, buffering up to
/// `capacity` frames
#[must_use]
pub fn channel(capacity: usize) -> (ChannelSink, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_and_receive() {
        let (sink, mut rx) = channel(4);
        sink.push(Frame::new("newRent", json!({"message": "hi"}))).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "newRent");
    }

    #[test]
    fn test_full_buffer_drops_frame() {
        let (sink, _rx) = channel(1);
        sink.push(Frame::new("a", json!(1))).unwrap();
        assert_eq!(sink.push(Frame::new("b", json!(2))), Err(DeliveryError::Full));
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (sink, mut rx) = channel(4);
        sink.push(Frame::shutdown()).unwrap();
        sink.close();

        assert!(sink.is_closed());
        assert_eq!(sink.push(Frame::shutdown()), Err(DeliveryError::Closed));
        assert_eq!(rx.recv().await.unwrap().event, "shutdown");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (sink, rx) = channel(4);
        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(sink.push(Frame::shutdown()), Err(DeliveryError::Closed));
    }
}

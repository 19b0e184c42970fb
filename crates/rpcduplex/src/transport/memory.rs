use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{Frame, FrameSink, FrameSource, Transport};

/// Create two connected in-process transports.
///
/// Each direction buffers at most `capacity` frames; a sender beyond that
/// waits until the peer receives. Dropping either side closes both
/// directions for the peer.
pub fn pair(capacity: usize) -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));

    let a = Transport::new(MemorySink(a_tx), MemorySource(b_rx));
    let b = Transport::new(MemorySink(b_tx), MemorySource(a_rx));
    (a, b)
}

struct MemorySink(mpsc::Sender<Frame>);

#[tonic::async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.0.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

struct MemorySource(mpsc::Receiver<Frame>);

#[tonic::async_trait]
impl FrameSource for MemorySource {
    async fn recv_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(self.0.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_frames_cross_in_order() {
        let (mut a, mut b) = pair(4);

        a.sink.send_frame(Frame::Data(Bytes::from_static(b"1"))).await.unwrap();
        a.sink.send_frame(Frame::Data(Bytes::from_static(b"2"))).await.unwrap();

        assert_eq!(
            b.source.recv_frame().await.unwrap(),
            Some(Frame::Data(Bytes::from_static(b"1")))
        );
        assert_eq!(
            b.source.recv_frame().await.unwrap(),
            Some(Frame::Data(Bytes::from_static(b"2")))
        );
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (a, mut b) = pair(1);
        drop(a);

        assert_eq!(b.source.recv_frame().await.unwrap(), None);
        assert_eq!(
            b.sink.send_frame(Frame::Data(Bytes::new())).await,
            Err(TransportError::Closed)
        );
    }
}

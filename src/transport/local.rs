//! In-process transport: frames move between tasks by value.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{PipelineError, Result};
use crate::protocol::Frame;

use super::Channel;

/// Bounded per-direction depth. A stage exchanges at most two frames before
/// awaiting a reply, so a small buffer suffices.
const CHANNEL_DEPTH: usize = 4;

/// One end of an in-process duplex channel.
pub struct LocalChannel {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

/// Create a connected pair of channel ends.
pub fn pair() -> (LocalChannel, LocalChannel) {
    let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
    (
        LocalChannel { tx: a_tx, rx: a_rx },
        LocalChannel { tx: b_tx, rx: b_rx },
    )
}

#[async_trait]
impl Channel for LocalChannel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| PipelineError::Transport("peer task ended".into()))
    }

    async fn recv(&mut self) -> Result<Frame> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| PipelineError::Transport("peer task ended".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MinMax;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut a, mut b) = pair();
        a.send(Frame::MinMax(MinMax { min: 1.0, max: 2.0 }))
            .await
            .unwrap();
        let got = b.recv().await.unwrap();
        assert_eq!(got, Frame::MinMax(MinMax { min: 1.0, max: 2.0 }));

        b.send(Frame::ResultData(vec![7.0])).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Frame::ResultData(vec![7.0]));
    }

    #[tokio::test]
    async fn test_closed_peer_is_fatal() {
        let (mut a, b) = pair();
        drop(b);
        assert!(a.send(Frame::ResultData(vec![])).await.is_err());
        assert!(a.recv().await.is_err());
    }
}

//! TCP transport: length-prefixed CBOR frames over one socket per worker.
//!
//! The coordinator binds a listener and waits for every worker of the fixed
//! topology to connect and identify itself with a `Hello` frame. There is no
//! rediscovery or reconnection; a worker that never arrives stalls the run,
//! and a socket error at any later point is fatal.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::protocol::{read_frame, write_frame, Frame};

use super::Channel;

/// A connected, identified frame channel over TCP.
pub struct TcpChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl TcpChannel {
    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer,
        }
    }

    /// Remote address, for diagnostics.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        write_frame(&mut self.writer, &frame).await
    }

    async fn recv(&mut self) -> Result<Frame> {
        read_frame(&mut self.reader).await
    }
}

/// Bind the coordinator's listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::Transport(format!("failed to bind {addr}: {e}")))?;
    info!(addr = %addr, "listening for workers");
    Ok(listener)
}

/// Accept and identify every remote worker of the topology.
///
/// `workers` is the total participant count including the coordinator, so
/// ranks 1..workers are expected, each exactly once. Returns channels ordered
/// by rank. A duplicate or out-of-range rank, or a run-id claim that does not
/// match this run, rejects the whole startup.
pub async fn accept_workers(
    listener: &TcpListener,
    run_id: Uuid,
    workers: usize,
) -> Result<Vec<TcpChannel>> {
    let remote = workers.saturating_sub(1);
    let mut slots: Vec<Option<TcpChannel>> = (0..remote).map(|_| None).collect();
    let mut connected = 0usize;

    while connected < remote {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| PipelineError::Transport(format!("accept failed: {e}")))?;
        let mut channel = TcpChannel::from_stream(stream, peer);

        let frame = channel.recv().await?;
        let (claimed_run, rank) = match frame {
            Frame::Hello { run_id, rank } => (run_id, rank),
            other => {
                return Err(PipelineError::Protocol(format!(
                    "expected HELLO from {peer}, got {}",
                    other.kind()
                )))
            }
        };

        if !claimed_run.is_nil() && claimed_run != run_id {
            return Err(PipelineError::Transport(format!(
                "worker at {peer} joined run {claimed_run}, this is run {run_id}"
            )));
        }
        let rank = rank as usize;
        if rank == 0 || rank >= workers {
            return Err(PipelineError::Transport(format!(
                "worker at {peer} claimed rank {rank}, expected 1..{workers}"
            )));
        }
        if slots[rank - 1].is_some() {
            return Err(PipelineError::Transport(format!(
                "duplicate rank {rank} from {peer}"
            )));
        }

        channel
            .send(Frame::Hello {
                run_id,
                rank: rank as u32,
            })
            .await?;

        debug!(rank, peer = %peer, "worker identified");
        slots[rank - 1] = Some(channel);
        connected += 1;
    }

    // All slots filled exactly once by construction.
    Ok(slots.into_iter().flatten().collect())
}

/// Connect to the coordinator and identify as `rank`.
///
/// If `expected_run` is given, the coordinator's run id must match it.
/// Returns the channel and the authoritative run id.
pub async fn connect(
    addr: SocketAddr,
    rank: u32,
    expected_run: Option<Uuid>,
) -> Result<(TcpChannel, Uuid)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PipelineError::Transport(format!("failed to connect to {addr}: {e}")))?;
    let peer = stream
        .peer_addr()
        .map_err(|e| PipelineError::Transport(format!("no peer address: {e}")))?;
    let mut channel = TcpChannel::from_stream(stream, peer);

    channel
        .send(Frame::Hello {
            run_id: expected_run.unwrap_or_else(Uuid::nil),
            rank,
        })
        .await?;

    let frame = channel.recv().await?;
    let run_id = match frame {
        Frame::Hello { run_id, rank: r } if r == rank => run_id,
        Frame::Hello { rank: r, .. } => {
            return Err(PipelineError::Transport(format!(
                "coordinator acknowledged rank {r}, we are rank {rank}"
            )))
        }
        other => {
            return Err(PipelineError::Protocol(format!(
                "expected HELLO acknowledgment, got {}",
                other.kind()
            )))
        }
    };
    if let Some(expected) = expected_run {
        if run_id != expected {
            return Err(PipelineError::Transport(format!(
                "coordinator is running {run_id}, expected {expected}"
            )));
        }
    }

    info!(rank, coordinator = %addr, run = %run_id, "joined run");
    Ok((channel, run_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MinMax;

    #[tokio::test]
    async fn test_handshake_and_exchange() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let run_id = Uuid::new_v4();

        let worker = tokio::spawn(async move {
            let (mut channel, joined) = connect(addr, 1, None).await.unwrap();
            assert_eq!(joined, run_id);
            channel
                .send(Frame::MinMax(MinMax { min: 0.5, max: 9.5 }))
                .await
                .unwrap();
            channel.recv().await.unwrap()
        });

        let mut channels = accept_workers(&listener, run_id, 2).await.unwrap();
        assert_eq!(channels.len(), 1);
        let got = channels[0].recv().await.unwrap();
        assert_eq!(got, Frame::MinMax(MinMax { min: 0.5, max: 9.5 }));
        channels[0]
            .send(Frame::ResultData(vec![1.0, 2.0]))
            .await
            .unwrap();

        let echoed = worker.await.unwrap();
        assert_eq!(echoed, Frame::ResultData(vec![1.0, 2.0]));
    }

    #[tokio::test]
    async fn test_ranks_ordered_regardless_of_arrival() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let run_id = Uuid::new_v4();

        // Rank 2 connects first, rank 1 second.
        let workers = tokio::spawn(async move {
            let (mut late, _) = connect(addr, 2, Some(run_id)).await.unwrap();
            let (mut early, _) = connect(addr, 1, Some(run_id)).await.unwrap();
            early.send(Frame::ResultData(vec![1.0])).await.unwrap();
            late.send(Frame::ResultData(vec![2.0])).await.unwrap();
            // Hold both ends open until the assertions are done.
            (early.recv().await, late.recv().await)
        });

        let mut channels = accept_workers(&listener, run_id, 3).await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(
            channels[0].recv().await.unwrap(),
            Frame::ResultData(vec![1.0])
        );
        assert_eq!(
            channels[1].recv().await.unwrap(),
            Frame::ResultData(vec![2.0])
        );
        for channel in &mut channels {
            channel.send(Frame::ResultData(vec![])).await.unwrap();
        }
        workers.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_run_rejected() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let other_run = Uuid::new_v4();
        tokio::spawn(async move {
            // Worker claims membership in a different run.
            let _ = connect(addr, 1, Some(other_run)).await;
        });

        let result = accept_workers(&listener, Uuid::new_v4(), 2).await;
        assert!(matches!(result, Err(PipelineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_rank_rejected() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = connect(addr, 7, None).await;
        });

        let result = accept_workers(&listener, Uuid::new_v4(), 2).await;
        assert!(matches!(result, Err(PipelineError::Transport(_))));
    }
}

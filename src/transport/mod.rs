//! Point-to-point channels between the coordinator and its workers.
//!
//! The pipeline stages are written against the [`Channel`] trait; which
//! implementation backs it is a topology decision made at startup. The
//! in-process variant carries frames by value (no serialization), the TCP
//! variant runs the wire codec. The coordinator never needs a channel to
//! itself: rank 0 is served by direct slicing.

pub mod local;
pub mod tcp;

use async_trait::async_trait;

use crate::errors::Result;
use crate::protocol::Frame;

/// One duplex frame channel to a single peer.
///
/// Frames arrive in the order they were sent; there is no reordering or
/// retransmission layer. A send or receive failure is fatal to the run.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;
    async fn recv(&mut self) -> Result<Frame>;
}

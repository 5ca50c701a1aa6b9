//! The min/max all-reduce: the pipeline's hard synchronization barrier.
//!
//! Every participant contributes the extrema of its own post-convolution
//! working rows; everyone leaves holding the identical global pair. The
//! exchange is coordinator-mediated, matching the wire pattern of the rest of
//! the pipeline: workers send their local pair up, the coordinator folds all
//! contributions with its own and broadcasts the result. The fold is
//! commutative and associative, so combine order is immaterial.

use futures::future::try_join_all;

use crate::errors::{PipelineError, Result};
use crate::protocol::{Frame, MinMax};
use crate::transport::Channel;

/// Extrema of a sample buffer. Empty buffers contribute the fold identity,
/// so zero-row workers never influence the global range.
pub fn local_minmax(samples: &[f64]) -> MinMax {
    samples
        .iter()
        .fold(MinMax::IDENTITY, |acc, &s| acc.observe(s))
}

/// Coordinator side: collect every worker's local pair, fold with `local`,
/// broadcast the global pair, and return it.
///
/// Normalization must not begin anywhere until this returns; the broadcast
/// doubles as the stage barrier.
pub async fn all_reduce_coordinator(
    channels: &mut [Box<dyn Channel>],
    local: MinMax,
) -> Result<MinMax> {
    let locals = try_join_all(channels.iter_mut().map(|channel| async move {
        match channel.recv().await? {
            Frame::MinMax(pair) => Ok(pair),
            other => Err(PipelineError::Protocol(format!(
                "expected MINMAX, got {}",
                other.kind()
            ))),
        }
    }))
    .await?;

    let global = locals.into_iter().fold(local, MinMax::fold);

    try_join_all(
        channels
            .iter_mut()
            .map(|channel| channel.send(Frame::MinMax(global))),
    )
    .await?;

    Ok(global)
}

/// Worker side: send the local pair, block until the global pair arrives.
pub async fn all_reduce_worker(channel: &mut dyn Channel, local: MinMax) -> Result<MinMax> {
    channel.send(Frame::MinMax(local)).await?;
    match channel.recv().await? {
        Frame::MinMax(global) => Ok(global),
        other => Err(PipelineError::Protocol(format!(
            "expected global MINMAX, got {}",
            other.kind()
        ))),
    }
}

//! The three-layer pipeline: coordinator state machine and worker loop.

pub mod coordinator;
pub mod worker;

pub use coordinator::Coordinator;
pub use worker::Worker;

use std::sync::Arc;

use futures::future::try_join_all;
use uuid::Uuid;

use crate::convolve::ConvolveBackend;
use crate::errors::{PipelineError, Result};
use crate::image::ImageMatrix;
use crate::kernels::{KernelTable, Layer};
use crate::transport::{local, Channel};

/// Run the given layers over an in-process topology of `workers` participants.
///
/// Rank 0 is the coordinator (serving itself without serialization); ranks
/// 1..workers run the worker loop as tokio tasks connected over in-process
/// channels. This is the single-process topology used by the `run` command
/// and the cross-worker test suite; the math and wire discipline are the same
/// as the TCP topology's.
pub async fn run_local(
    image: ImageMatrix,
    workers: usize,
    layers: &[Layer],
    kernels: Arc<KernelTable>,
    backend: Arc<dyn ConvolveBackend>,
) -> Result<ImageMatrix> {
    if workers == 0 {
        return Err(PipelineError::Config(
            "topology requires at least one worker".into(),
        ));
    }

    let run_id = Uuid::new_v4();
    let mut channels: Vec<Box<dyn Channel>> = Vec::with_capacity(workers - 1);
    let mut handles = Vec::with_capacity(workers - 1);

    for rank in 1..workers {
        let (coord_end, worker_end) = local::pair();
        channels.push(Box::new(coord_end));

        let worker = Worker::new(
            rank as u32,
            Box::new(worker_end),
            kernels.clone(),
            backend.clone(),
        );
        let layers = layers.to_vec();
        handles.push(tokio::spawn(async move {
            worker.run_layers(&layers).await
        }));
    }

    let mut coordinator = Coordinator::new(run_id, workers, channels, kernels, backend)?;
    let result = coordinator.run_layers(image, layers).await?;

    // The join barrier: a worker failure fails the run even after the last
    // gather completed.
    try_join_all(handles.into_iter().map(|handle| async move {
        handle
            .await
            .map_err(|e| PipelineError::Transport(format!("worker task died: {e}")))?
    }))
    .await?;

    Ok(result)
}

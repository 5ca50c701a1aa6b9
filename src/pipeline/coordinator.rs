//! The coordinator: drives the per-layer stage sequence and owns the
//! assembled image between layers.
//!
//! Per layer: plan, scatter, convolve (its own slab), reduce, normalize,
//! gather. Every stage is a global barrier; scatter and gather transfers are
//! issued concurrently but all awaited before the next stage begins. The
//! coordinator is rank 0 and a full compute participant, serving its own
//! slab by direct slicing rather than through a channel.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};
use uuid::Uuid;

use crate::convolve::ConvolveBackend;
use crate::errors::{PipelineError, Result};
use crate::image::{ImageMatrix, Slab};
use crate::kernels::{KernelTable, Layer};
use crate::normalize;
use crate::partition;
use crate::protocol::{Frame, SlabDims};
use crate::reduce;
use crate::transport::Channel;

pub struct Coordinator {
    run_id: Uuid,
    workers: usize,
    channels: Vec<Box<dyn Channel>>,
    kernels: Arc<KernelTable>,
    backend: Arc<dyn ConvolveBackend>,
}

impl Coordinator {
    /// `workers` is the total participant count including the coordinator;
    /// `channels` are the connections to ranks 1..workers, in rank order.
    pub fn new(
        run_id: Uuid,
        workers: usize,
        channels: Vec<Box<dyn Channel>>,
        kernels: Arc<KernelTable>,
        backend: Arc<dyn ConvolveBackend>,
    ) -> Result<Self> {
        if workers == 0 || channels.len() != workers - 1 {
            return Err(PipelineError::Config(format!(
                "{} channels do not form a topology of {} workers",
                channels.len(),
                workers
            )));
        }
        Ok(Self {
            run_id,
            workers,
            channels,
            kernels,
            backend,
        })
    }

    /// Run the full three-layer sequence.
    pub async fn run(&mut self, image: ImageMatrix) -> Result<ImageMatrix> {
        self.run_layers(image, &Layer::ALL).await
    }

    /// Run a chosen layer sequence. The gathered, normalized image of each
    /// layer is the scatter input of the next; the halo is re-derived per
    /// layer from that layer's kernel radius.
    pub async fn run_layers(&mut self, mut image: ImageMatrix, layers: &[Layer]) -> Result<ImageMatrix> {
        info!(
            run = %self.run_id,
            workers = self.workers,
            rows = image.rows(),
            cols = image.cols(),
            backend = self.backend.name(),
            "starting pipeline"
        );
        for &layer in layers {
            image = self.run_layer(image, layer).await?;
        }
        info!(run = %self.run_id, "pipeline complete");
        Ok(image)
    }

    async fn run_layer(&mut self, image: ImageMatrix, layer: Layer) -> Result<ImageMatrix> {
        let spec = self.kernels.spec_for(layer);
        let height = image.rows();
        let width = image.cols();
        let plan = partition::plan(height, self.workers, spec.radius());

        debug!(layer = layer.number(), radius = spec.radius(), "planned partition");

        // Scatter: all remote transfers in flight at once, then the join.
        let payloads = plan[1..]
            .iter()
            .map(|assignment| {
                let dims = SlabDims::for_assignment(assignment, width)?;
                let samples = image.copy_rows(assignment.buffer_start, assignment.buffer_rows)?;
                Ok((dims, samples))
            })
            .collect::<Result<Vec<_>>>()?;
        try_join_all(self.channels.iter_mut().zip(payloads).map(
            |(channel, (dims, samples))| async move {
                channel.send(Frame::Dimensions(dims)).await?;
                channel.send(Frame::ImageData(samples)).await
            },
        ))
        .await?;
        debug!(layer = layer.number(), "scatter complete");

        // The coordinator's own share, served without serialization.
        let own = &plan[0];
        let slab = Slab::new(
            own.buffer_rows,
            width,
            own.offset(),
            own.rows,
            image.copy_rows(own.buffer_start, own.buffer_rows)?,
        )?;
        let mut own_out = self.backend.convolve(&slab, spec)?;

        // Reduction barrier: nobody normalizes until the global pair is out.
        let local = reduce::local_minmax(&own_out);
        let global = reduce::all_reduce_coordinator(&mut self.channels, local).await?;
        debug!(
            layer = layer.number(),
            min = global.min,
            max = global.max,
            "global range published"
        );

        normalize::apply(&mut own_out, &global);

        // Gather: receive every worker's rows, then assemble.
        let mut assembled = ImageMatrix::zeros(height, width);
        assembled.write_rows(own.start, own.rows, &own_out)?;

        let results = try_join_all(self.channels.iter_mut().zip(plan[1..].iter()).map(
            |(channel, assignment)| async move {
                let samples = match channel.recv().await? {
                    Frame::ResultData(samples) => samples,
                    other => {
                        return Err(PipelineError::Protocol(format!(
                            "expected RESULT_DATA from rank {}, got {}",
                            assignment.rank,
                            other.kind()
                        )))
                    }
                };
                if samples.len() != assignment.rows * width {
                    return Err(PipelineError::Protocol(format!(
                        "rank {} returned {} samples, expected {}",
                        assignment.rank,
                        samples.len(),
                        assignment.rows * width
                    )));
                }
                Ok((*assignment, samples))
            },
        ))
        .await?;
        for (assignment, samples) in &results {
            assembled.write_rows(assignment.start, assignment.rows, samples)?;
        }
        debug!(layer = layer.number(), "gather complete");

        Ok(assembled)
    }
}

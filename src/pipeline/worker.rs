//! The worker loop: one slab in, one result out, once per layer.

use std::sync::Arc;

use tracing::debug;

use crate::convolve::ConvolveBackend;
use crate::errors::{PipelineError, Result};
use crate::image::Slab;
use crate::kernels::{KernelTable, Layer};
use crate::normalize;
use crate::protocol::Frame;
use crate::reduce;
use crate::transport::Channel;

pub struct Worker {
    rank: u32,
    channel: Box<dyn Channel>,
    kernels: Arc<KernelTable>,
    backend: Arc<dyn ConvolveBackend>,
}

impl Worker {
    pub fn new(
        rank: u32,
        channel: Box<dyn Channel>,
        kernels: Arc<KernelTable>,
        backend: Arc<dyn ConvolveBackend>,
    ) -> Self {
        Self {
            rank,
            channel,
            kernels,
            backend,
        }
    }

    /// Process the full three-layer sequence, then return.
    pub async fn run(self) -> Result<()> {
        self.run_layers(&Layer::ALL).await
    }

    /// Process the given layer sequence. Each layer is handled exactly once;
    /// any failure aborts immediately (there is no re-scatter).
    pub async fn run_layers(mut self, layers: &[Layer]) -> Result<()> {
        for &layer in layers {
            self.run_layer(layer).await?;
        }
        Ok(())
    }

    async fn run_layer(&mut self, layer: Layer) -> Result<()> {
        let spec = self.kernels.spec_for(layer);

        // The dimensions record governs every buffer size on this side.
        let dims = match self.channel.recv().await? {
            Frame::Dimensions(dims) => dims,
            other => {
                return Err(PipelineError::Protocol(format!(
                    "expected DIMENSIONS, got {}",
                    other.kind()
                )))
            }
        };
        let expected = dims.slab_len()?;

        let samples = match self.channel.recv().await? {
            Frame::ImageData(samples) => samples,
            other => {
                return Err(PipelineError::Protocol(format!(
                    "expected IMAGE_DATA, got {}",
                    other.kind()
                )))
            }
        };
        if samples.len() != expected {
            return Err(PipelineError::Protocol(format!(
                "slab payload of {} samples does not match dimensions record ({} expected)",
                samples.len(),
                expected
            )));
        }

        let slab = Slab::new(
            dims.total_rows as usize,
            dims.width as usize,
            dims.offset as usize,
            dims.rows as usize,
            samples,
        )?;
        debug!(
            rank = self.rank,
            layer = layer.number(),
            rows = slab.working_rows(),
            buffered = slab.rows(),
            "slab received"
        );

        let mut out = self.backend.convolve(&slab, spec)?;

        // Barrier: wait for the global range before touching the output.
        let local = reduce::local_minmax(&out);
        let global = reduce::all_reduce_worker(self.channel.as_mut(), local).await?;

        normalize::apply(&mut out, &global);

        debug_assert_eq!(out.len(), dims.result_len()?);
        self.channel.send(Frame::ResultData(out)).await?;
        debug!(rank = self.rank, layer = layer.number(), "result sent");

        Ok(())
    }
}

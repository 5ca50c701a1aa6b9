//! halopipe: a distributed halo-exchange convolution pipeline.
//!
//! Three fixed filter layers (edge isolation, difference of Gaussians,
//! sharpening) over one large grayscale image, row-partitioned across a
//! fixed set of workers. Border-dependent convolution stays correct via halo
//! rows, global normalization via a min/max all-reduce; the output is
//! independent of how many workers participate.

pub mod config;
pub mod convolve;
pub mod errors;
pub mod image;
pub mod kernels;
pub mod normalize;
pub mod observability;
pub mod partition;
pub mod pipeline;
pub mod protocol;
pub mod reduce;
pub mod transport;

pub use config::PipelineConfig;
pub use convolve::{backend_from_name, ConvolveBackend, HostBackend, LaneBackend};
pub use errors::{PipelineError, Result};
pub use image::{ImageMatrix, Slab};
pub use kernels::{KernelSpec, KernelTable, Layer};
pub use observability::{init_daemon_logging, init_logging};
pub use partition::Assignment;
pub use pipeline::{run_local, Coordinator, Worker};
pub use protocol::{Frame, MinMax, SlabDims};

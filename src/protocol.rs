//! Wire protocol: the frames exchanged between coordinator and workers.
//!
//! Every frame is CBOR with a big-endian u32 length prefix and a hard size
//! limit. A dimensions record always precedes its sample payload, and the
//! receiver sizes its buffers strictly from the record; any disagreement
//! between the two is a fatal protocol error.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::partition::Assignment;

/// Maximum encoded frame size (1 GiB). Generous enough for one worker's slab
/// of a very large image; a prefix beyond this is treated as corrupt rather
/// than allocated.
pub const FRAME_SIZE_LIMIT: usize = 1024 * 1024 * 1024;

/// Dimensions record sent ahead of each slab payload.
///
/// Field widths are fixed at i32 to keep the record layout stable across
/// topologies; sample counts large enough to overflow are rejected before
/// sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlabDims {
    /// Rows in the halo'd buffer.
    pub total_rows: i32,
    /// Image width.
    pub width: i32,
    /// Rows the worker produces output for.
    pub rows: i32,
    /// Halo padding requested on each side.
    pub halo: i32,
    /// First working row, relative to the buffer.
    pub offset: i32,
}

impl SlabDims {
    /// Build the record for one assignment.
    pub fn for_assignment(assignment: &Assignment, width: usize) -> Result<Self> {
        let to_i32 = |v: usize, what: &str| -> Result<i32> {
            i32::try_from(v)
                .map_err(|_| PipelineError::Protocol(format!("{what} {v} exceeds wire range")))
        };
        Ok(Self {
            total_rows: to_i32(assignment.buffer_rows, "buffer rows")?,
            width: to_i32(width, "width")?,
            rows: to_i32(assignment.rows, "working rows")?,
            halo: to_i32(assignment.halo, "halo")?,
            offset: to_i32(assignment.offset(), "offset")?,
        })
    }

    /// Expected sample count of the slab payload that follows this record.
    pub fn slab_len(&self) -> Result<usize> {
        self.checked()?;
        Ok(self.total_rows as usize * self.width as usize)
    }

    /// Expected sample count of the result payload for this record.
    pub fn result_len(&self) -> Result<usize> {
        self.checked()?;
        Ok(self.rows as usize * self.width as usize)
    }

    fn checked(&self) -> Result<()> {
        if self.total_rows < 0
            || self.width < 0
            || self.rows < 0
            || self.halo < 0
            || self.offset < 0
            || self.offset + self.rows > self.total_rows
        {
            return Err(PipelineError::Protocol(format!(
                "inconsistent dimensions record: {self:?}"
            )));
        }
        Ok(())
    }
}

/// A (min, max) pair, both the per-worker local contribution and the global
/// result of the all-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    /// Identity element of the fold: folds with anything to that thing.
    pub const IDENTITY: MinMax = MinMax {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    /// Element-wise combine. Commutative and associative, so the all-reduce
    /// may fold contributions in any order or tree shape.
    pub fn fold(self, other: MinMax) -> MinMax {
        MinMax {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Fold in a single sample.
    pub fn observe(self, sample: f64) -> MinMax {
        MinMax {
            min: self.min.min(sample),
            max: self.max.max(sample),
        }
    }
}

/// Every message that crosses a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// TCP handshake: binds a connection to a rank within a run.
    Hello { run_id: Uuid, rank: u32 },
    /// Dimensions for the slab payload that follows.
    Dimensions(SlabDims),
    /// Halo'd slab samples, row-major, `total_rows * width` long.
    ImageData(Vec<f64>),
    /// Working-row results, row-major, `rows * width` long.
    ResultData(Vec<f64>),
    /// Local or global extrema, exchanged during the reduction barrier.
    MinMax(MinMax),
}

impl Frame {
    /// Frame kind name, for protocol-violation diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "HELLO",
            Frame::Dimensions(_) => "DIMENSIONS",
            Frame::ImageData(_) => "IMAGE_DATA",
            Frame::ResultData(_) => "RESULT_DATA",
            Frame::MinMax(_) => "MINMAX",
        }
    }
}

/// Read one length-prefixed CBOR frame from an async stream.
pub async fn read_frame<T>(io: &mut T) -> Result<Frame>
where
    T: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > FRAME_SIZE_LIMIT {
        return Err(PipelineError::Protocol(format!(
            "frame size {len} exceeds limit {FRAME_SIZE_LIMIT}"
        )));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    ciborium::from_reader(&buf[..]).map_err(|e| PipelineError::Codec(e.to_string()))
}

/// Write one length-prefixed CBOR frame to an async stream.
pub async fn write_frame<T>(io: &mut T, frame: &Frame) -> Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    let mut buf = Vec::new();
    ciborium::into_writer(frame, &mut buf).map_err(|e| PipelineError::Codec(e.to_string()))?;

    if buf.len() > FRAME_SIZE_LIMIT {
        return Err(PipelineError::Protocol(format!(
            "frame size {} exceeds limit {FRAME_SIZE_LIMIT}",
            buf.len()
        )));
    }

    let len = buf.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&buf).await?;
    io.flush().await?;

    Ok(())
}

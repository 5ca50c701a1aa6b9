//! Grayscale image file adapter.
//!
//! Decodes any format the `image` crate understands into an 8-bit gray
//! buffer widened to `f64`, and writes results back as grayscale PNG.
//! Values are clamped to [0, 255] at this boundary only; the pipeline
//! itself never clamps.

use std::path::Path;

use image::{GrayImage, Luma};

use super::ImageMatrix;
use crate::errors::{PipelineError, Result};

/// Load an image from disk, converting to grayscale f64 samples.
pub fn load_grayscale(path: &Path) -> Result<ImageMatrix> {
    let img = image::open(path)
        .map_err(|e| PipelineError::Image(format!("failed to open {}: {e}", path.display())))?
        .into_luma8();
    let cols = img.width() as usize;
    let rows = img.height() as usize;
    let data = img.into_raw().into_iter().map(f64::from).collect();
    ImageMatrix::from_raw(rows, cols, data)
}

/// Save a sample matrix as a grayscale PNG.
pub fn save_grayscale(image: &ImageMatrix, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Image(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
    }

    let mut out = GrayImage::new(image.cols() as u32, image.rows() as u32);
    for r in 0..image.rows() {
        let row = image.row(r)?;
        for (c, &sample) in row.iter().enumerate() {
            let v = sample.clamp(0.0, 255.0).round() as u8;
            out.put_pixel(c as u32, r as u32, Luma([v]));
        }
    }
    out.save(path)
        .map_err(|e| PipelineError::Image(format!("failed to save {}: {e}", path.display())))
}

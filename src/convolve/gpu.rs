//! Accelerator backend: one compute invocation per output pixel.
//!
//! The halo'd slab is uploaded once per layer, the kernel runs one lane per
//! working pixel, and only working rows are downloaded. Samples are staged as
//! f32 (the shading language has no f64); see DESIGN.md for the precision
//! contract this backend is held to.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::errors::{PipelineError, Result};
use crate::image::Slab;
use crate::kernels::KernelSpec;

use super::ConvolveBackend;

const SHADER: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    offset: u32,
    working_rows: u32,
    kernel_size: u32,
    radius: i32,
    divisor: f32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read> weights: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    let working_row = gid.y;
    if (col >= params.cols || working_row >= params.working_rows) {
        return;
    }

    let row = i32(params.offset + working_row);
    var sum = 0.0;
    for (var ky = 0u; ky < params.kernel_size; ky = ky + 1u) {
        let sample_row = clamp(row + i32(ky) - params.radius, 0, i32(params.rows) - 1);
        for (var kx = 0u; kx < params.kernel_size; kx = kx + 1u) {
            let sample_col = clamp(i32(col) + i32(kx) - params.radius, 0, i32(params.cols) - 1);
            let sample = input[u32(sample_row) * params.cols + u32(sample_col)];
            sum = sum + sample * weights[ky * params.kernel_size + kx];
        }
    }
    output[working_row * params.cols + col] = sum / params.divisor;
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ParamsPod {
    rows: u32,
    cols: u32,
    offset: u32,
    working_rows: u32,
    kernel_size: u32,
    radius: i32,
    divisor: f32,
    _pad: u32,
}

/// A wgpu compute device with the convolution pipeline compiled.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl GpuBackend {
    /// Acquire an adapter and compile the pipeline. Fails fast when no
    /// compatible accelerator is present; the run aborts rather than falling
    /// back.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(
            instance.request_adapter(&wgpu::RequestAdapterOptions::default()),
        )
        .ok_or_else(|| PipelineError::Backend("no compatible accelerator adapter".into()))?;

        let (device, queue) = pollster::block_on(
            adapter.request_device(&wgpu::DeviceDescriptor::default(), None),
        )
        .map_err(|e| PipelineError::Backend(format!("failed to acquire device: {e}")))?;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("halopipe.convolve.layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("halopipe.convolve.pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("halopipe.convolve.shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("halopipe.convolve.pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: Default::default(),
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            layout,
        })
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ConvolveBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn convolve(&self, slab: &Slab, spec: &KernelSpec) -> Result<Vec<f64>> {
        let out_len = slab.working_rows() * slab.cols();
        if out_len == 0 {
            return Ok(Vec::new());
        }

        let input: Vec<f32> = slab.as_slice().iter().map(|&v| v as f32).collect();
        let weights: Vec<f32> = spec
            .weights()
            .iter()
            .flatten()
            .map(|&w| w as f32)
            .collect();
        let params = ParamsPod {
            rows: slab.rows() as u32,
            cols: slab.cols() as u32,
            offset: slab.offset() as u32,
            working_rows: slab.working_rows() as u32,
            kernel_size: spec.size() as u32,
            radius: spec.radius() as i32,
            divisor: spec.divisor() as f32,
            _pad: 0,
        };

        let input_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("halopipe.convolve.input"),
                contents: bytemuck::cast_slice(&input),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let weights_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("halopipe.convolve.weights"),
                contents: bytemuck::cast_slice(&weights),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let params_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("halopipe.convolve.params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let output_size = (out_len * std::mem::size_of::<f32>()) as u64;
        let output_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halopipe.convolve.output"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halopipe.convolve.staging"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("halopipe.convolve.bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: weights_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("halopipe.convolve.encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("halopipe.convolve.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups_x = (slab.cols() as u32).div_ceil(8);
            let groups_y = (slab.working_rows() as u32).div_ceil(8);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buf, 0, &staging_buf, 0, output_size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| PipelineError::Backend("readback callback dropped".into()))?
            .map_err(|e| PipelineError::Backend(format!("failed to map readback buffer: {e}")))?;

        let mapped = slice.get_mapped_range();
        let samples: &[f32] = bytemuck::cast_slice(&mapped);
        let out = samples.iter().map(|&v| f64::from(v)).collect();
        drop(mapped);
        staging_buf.unmap();

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolve::HostBackend;
    use crate::kernels::{KernelTable, Layer};

    /// f32 staging bounds the agreement with the f64 host path; layer sums
    /// stay well inside this envelope for 0-255 inputs.
    const GPU_TOLERANCE: f64 = 1e-3;

    #[test]
    fn test_gpu_matches_host() {
        let backend = match GpuBackend::new() {
            Ok(b) => b,
            // No adapter on this machine; nothing to verify.
            Err(_) => return,
        };

        let mut state = 0x9E37_79B9u64;
        let data: Vec<f64> = (0..16 * 8)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 40) % 256) as f64
            })
            .collect();
        let slab = Slab::new(16, 8, 3, 10, data).unwrap();

        let table = KernelTable::production();
        for layer in Layer::ALL {
            let spec = table.spec_for(layer);
            let host = HostBackend.convolve(&slab, spec).unwrap();
            let gpu = backend.convolve(&slab, spec).unwrap();
            assert_eq!(host.len(), gpu.len());
            for (i, (h, g)) in host.iter().zip(&gpu).enumerate() {
                let scale = h.abs().max(1.0);
                assert!(
                    (h - g).abs() / scale < GPU_TOLERANCE,
                    "layer {} pixel {}: host {} vs gpu {}",
                    layer.number(),
                    i,
                    h,
                    g
                );
            }
        }
    }
}

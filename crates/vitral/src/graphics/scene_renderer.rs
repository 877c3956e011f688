use super::{DeviceContext, Scene};
use crate::profiling::Profiler;
use bytemuck::{Pod, Zeroable};
use std::mem;
use vitral_utils::FrameArena;
use wgpu::*;

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct Vertex {
    /// Normalized device coordinates; the window-space transform happens on the CPU
    /// while the vertices are staged.
    position: [f32; 2],
    color: [f32; 4],
}

/// Draws a [`Scene`] in two passes: a clear of the whole target, then one
/// alpha-blended triangle list with all the scene's rectangles.
pub struct SceneRenderer {
    pipeline: RenderPipeline,
    vertex_buffer: Buffer,
    surface_size: (f32, f32),
}

impl SceneRenderer {
    pub fn new(dc: &DeviceContext, sconfig: &SurfaceConfiguration, scene: &Scene) -> Self {
        let device = &dc.device;
        let shader = device.create_shader_module(include_wgsl!("scene.wgsl"));

        let vertex_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("scene vertex buffer"),
            size: (scene.vertex_count() * mem::size_of::<Vertex>()) as u64,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("scene pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("scene pipeline layout"),
                bind_group_layouts: &[],
                push_constant_ranges: &[],
            })),
            vertex: VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[VertexBufferLayout {
                    array_stride: mem::size_of::<Vertex>() as u64,
                    step_mode: VertexStepMode::Vertex,
                    attributes: &vertex_attr_array![
                        0 => Float32x2, // position
                        1 => Float32x4, // color
                    ],
                }],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(ColorTargetState {
                    format: sconfig.format,
                    blend: Some(BlendState::ALPHA_BLENDING),
                    write_mask: ColorWrites::all(),
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                conservative: false,
                unclipped_depth: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        });

        Self {
            pipeline,
            vertex_buffer,
            surface_size: (sconfig.width as f32, sconfig.height as f32),
        }
    }

    /// Encodes the scene's two render passes into `encoder`, reporting the CPU-side
    /// staging work and the per-pass GPU timings to the profiler.
    pub fn render(
        &mut self,
        dc: &DeviceContext,
        scene: &Scene,
        arena: &FrameArena,
        profiler: &mut Profiler,
        encoder: &mut CommandEncoder,
        target: &TextureView,
    ) {
        let encode_span = profiler.nest("encode scene");
        let vertex_count = scene.vertex_count() as u32;
        let vertices = arena.alloc_slice::<Vertex>(scene.vertex_count());
        self.stage_vertices(scene, vertices);
        dc.queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(vertices));
        profiler.end_span(encode_span);

        let clear_span = profiler.nest("clear pass");
        let clear_query = profiler.begin_gpu_query("clear", encoder);
        encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("scene clear pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(scene.base_color),
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        profiler.end_gpu_query(clear_query, encoder);
        profiler.end_span(clear_span);

        let draw_span = profiler.nest("draw pass");
        let draw_query = profiler.begin_gpu_query("draw", encoder);
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("scene draw pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }
        profiler.end_gpu_query(draw_query, encoder);
        profiler.end_span(draw_span);
    }

    /// Triangulates the scene into `vertices`, two triangles per rectangle.
    fn stage_vertices(&self, scene: &Scene, vertices: &mut [Vertex]) {
        let (width, height) = self.surface_size;
        let to_ndc = |x: f32, y: f32| [x / width * 2.0 - 1.0, 1.0 - y / height * 2.0];

        for (rect, quad) in scene.rects.iter().zip(vertices.chunks_exact_mut(6)) {
            let corners = [
                to_ndc(rect.min.x, rect.min.y),
                to_ndc(rect.max.x, rect.min.y),
                to_ndc(rect.max.x, rect.max.y),
                to_ndc(rect.min.x, rect.max.y),
            ];
            for (target, corner) in quad.iter_mut().zip([0, 1, 2, 0, 2, 3]) {
                *target = Vertex {
                    position: corners[corner],
                    color: rect.color,
                };
            }
        }
    }
}
